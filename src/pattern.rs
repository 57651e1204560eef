//! Gesture pattern definitions and registry
//!
//! `PatternDef` is plain serializable data, so an external store can persist
//! gesture libraries. At registration it is validated and resolved against
//! the engine defaults into a `Pattern`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::step::Step;

/// Gesture definition as stored in a library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PatternDef {
    pub id: String,
    pub steps: Vec<Step>,
    /// Higher wins when candidates compete for the same input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Tie-breaker after confidence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<u8>,
    /// Overall budget from first to last step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_ms: Option<u64>,
    /// Trigger tolerance for steps that don't set their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Conditions on recent completions of other patterns
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<Relationship>,
}

/// How a pattern depends on another pattern's recent completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// `target` must have completed within the window
    Requires,
    /// `target` must not have completed within the window
    Prevents,
}

/// Ordering rule checked when a pattern is about to be emitted
///
/// ```yaml
/// relationships:
///   - type: requires
///     target: crouch
///     window_ms: 500
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Relationship {
    #[serde(rename = "type")]
    pub kind: RelationKind,
    pub target: String,
    pub window_ms: u64,
}

impl Relationship {
    pub fn requires(target: impl Into<String>, window_ms: u64) -> Self {
        Self {
            kind: RelationKind::Requires,
            target: target.into(),
            window_ms,
        }
    }

    pub fn prevents(target: impl Into<String>, window_ms: u64) -> Self {
        Self {
            kind: RelationKind::Prevents,
            target: target.into(),
            window_ms,
        }
    }

    /// Whether the rule holds at `now`, given the target's latest completion
    pub fn holds(&self, last_completion: Option<u64>, now: u64) -> bool {
        let recent = last_completion.is_some_and(|at| now.saturating_sub(at) <= self.window_ms);
        match self.kind {
            RelationKind::Requires => recent,
            RelationKind::Prevents => !recent,
        }
    }
}

impl PatternDef {
    pub fn new(id: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            steps,
            priority: None,
            strength: None,
            timeout_ms: None,
            cooldown_ms: None,
            tolerance_ms: None,
            description: None,
            relationships: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_strength(mut self, strength: u8) -> Self {
        self.strength = Some(strength);
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_cooldown(mut self, cooldown_ms: u64) -> Self {
        self.cooldown_ms = Some(cooldown_ms);
        self
    }

    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }
}

/// How the tracker follows a pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// One hold/combo step tracked continuously with duration logic
    SingleState,
    /// Ordered steps matched across frames
    Sequence,
}

/// Validated pattern with engine defaults resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pub id: String,
    pub steps: Vec<Step>,
    pub kind: PatternKind,
    pub priority: i32,
    pub strength: u8,
    /// Single-state patterns only time out when a budget is set explicitly
    pub timeout_ms: Option<u64>,
    pub cooldown_ms: u64,
    pub relationships: Vec<Relationship>,
    /// Registration sequence, for stable ordering
    pub order: u64,
}

impl Pattern {
    /// Validate a definition and resolve defaults
    pub fn compile(def: &PatternDef, config: &EngineConfig, order: u64) -> Result<Self> {
        let id = def.id.trim();
        if id.is_empty() {
            return Err(EngineError::invalid(&def.id, "id cannot be empty"));
        }
        if def.steps.is_empty() {
            return Err(EngineError::invalid(id, "at least one step is required"));
        }

        let default_tolerance = def.tolerance_ms.unwrap_or(config.default_tolerance_ms);
        let mut steps = def.steps.clone();
        for (idx, step) in steps.iter_mut().enumerate() {
            if step.keys().is_empty() {
                return Err(EngineError::invalid(
                    id,
                    format!("step {} ({}) has no keys", idx, step.kind_name()),
                ));
            }
            let timing = step.timing_mut();
            if let (Some(min), Some(max)) = (timing.min_ms, timing.max_ms) {
                if min > max {
                    return Err(EngineError::invalid(
                        id,
                        format!("step {}: min_ms {} exceeds max_ms {}", idx, min, max),
                    ));
                }
            }
            if timing.trigger_ms.is_some() && timing.tolerance_ms.is_none() {
                timing.tolerance_ms = Some(default_tolerance);
            }
        }

        let mut relationships = def.relationships.clone();
        for rel in &mut relationships {
            rel.target = rel.target.trim().to_string();
            if rel.target.is_empty() {
                return Err(EngineError::invalid(id, "relationship target cannot be empty"));
            }
        }

        let kind = if steps.len() == 1 && steps[0].is_stateful() {
            PatternKind::SingleState
        } else {
            PatternKind::Sequence
        };

        let timeout_ms = match kind {
            PatternKind::SingleState => def.timeout_ms,
            PatternKind::Sequence => Some(def.timeout_ms.unwrap_or(config.default_timeout_ms)),
        };

        Ok(Self {
            id: id.to_string(),
            steps,
            kind,
            priority: def.priority.unwrap_or(0),
            strength: def.strength.unwrap_or(0),
            timeout_ms,
            cooldown_ms: def.cooldown_ms.unwrap_or(config.default_cooldown_ms),
            relationships,
            order,
        })
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

/// Registered patterns, kept in evaluation order
///
/// Most specific first: more steps before fewer, then registration order.
#[derive(Debug, Default)]
pub struct PatternRegistry {
    patterns: Vec<Arc<Pattern>>,
    next_order: u64,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pattern, replacing any existing one with the same id
    ///
    /// Returns the replaced pattern, if any.
    pub fn add(&mut self, def: &PatternDef, config: &EngineConfig) -> Result<Option<Arc<Pattern>>> {
        let pattern = Arc::new(Pattern::compile(def, config, self.next_order)?);
        self.next_order += 1;

        let replaced = self
            .patterns
            .iter()
            .position(|p| p.id == pattern.id)
            .map(|idx| self.patterns.remove(idx));

        debug!(
            "Registered pattern '{}' ({:?}, {} step(s))",
            pattern.id,
            pattern.kind,
            pattern.step_count()
        );
        self.patterns.push(pattern);
        self.patterns
            .sort_by(|a, b| b.step_count().cmp(&a.step_count()).then(a.order.cmp(&b.order)));

        Ok(replaced)
    }

    pub fn remove(&mut self, id: &str) -> Result<Arc<Pattern>> {
        let idx = self
            .patterns
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| EngineError::PatternNotFound(id.to_string()))?;
        Ok(self.patterns.remove(idx))
    }

    pub fn remove_all(&mut self) {
        self.patterns.clear();
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Pattern>> {
        self.patterns.iter().find(|p| p.id == id)
    }

    /// Patterns in evaluation order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Pattern>> {
        self.patterns.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.patterns.iter().map(|p| p.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
