//! Pattern tracker
//!
//! Owns the pattern registry and one state machine per registered pattern.
//! Every frame is offered to every pattern in evaluation order; each pattern
//! is evaluated in isolation, so a failure in one never stops the others.
//!
//! ```text
//!   Idle -> Active -> Complete -> (Cooldown ->) Idle
//!                  \-> Failed  -> Idle
//! ```

pub mod confidence;
pub mod sequence;
pub mod single;

use serde::Serialize;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::{Completion, Failure, MatchedKeys};
use crate::frame::KeyboardFrame;
use crate::ledger::{ConsumptionLedger, CooldownTable};
use crate::pattern::{Pattern, PatternDef, PatternKind, PatternRegistry};

use sequence::SequenceTracker;
use single::SingleTracker;

/// A completed match waiting for conflict resolution
#[derive(Debug, Clone)]
pub struct Candidate {
    pub pattern: Arc<Pattern>,
    pub start_time: u64,
    pub end_time: u64,
    pub confidence: u8,
    pub matched_keys: MatchedKeys,
}

impl Candidate {
    pub fn id(&self) -> &str {
        &self.pattern.id
    }

    /// Ordering key: priority, confidence, strength, step count, earlier start
    pub fn rank(&self) -> (i32, u8, u8, usize, Reverse<u64>) {
        (
            self.pattern.priority,
            self.confidence,
            self.pattern.strength,
            self.pattern.step_count(),
            Reverse(self.start_time),
        )
    }

    pub fn to_completion(&self) -> Completion {
        Completion {
            id: self.pattern.id.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            confidence: self.confidence,
            matched_keys: self.matched_keys.clone(),
        }
    }
}

/// Lifecycle of a pattern attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Active,
    Complete,
    Failed,
    Cooldown,
}

/// Inspection snapshot of a pattern's current attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternState {
    pub pattern_id: String,
    pub step_index: usize,
    pub start_time: u64,
    pub last_step_time: u64,
    pub matched_keys: MatchedKeys,
    pub confidence: u8,
    pub lifecycle: Lifecycle,
    pub cooldown_until: Option<u64>,
}

/// Result of offering one frame (or tick) to all patterns
#[derive(Debug, Default)]
pub struct TrackerOutput {
    pub candidates: Vec<Candidate>,
    pub failures: Vec<Failure>,
}

/// Per-pattern state machine
#[derive(Debug)]
enum Machine {
    Single(SingleTracker),
    Sequence(SequenceTracker),
}

impl Machine {
    fn for_pattern(pattern: &Pattern) -> Self {
        match pattern.kind {
            PatternKind::SingleState => Machine::Single(SingleTracker::new(pattern)),
            PatternKind::Sequence => Machine::Sequence(SequenceTracker::new()),
        }
    }
}

/// Frame context shared by every pattern evaluation
pub(crate) struct FrameContext<'a> {
    pub frame: &'a KeyboardFrame,
    pub ledger: &'a ConsumptionLedger,
    pub cooling: bool,
    /// Oldest frame number still buffered
    pub horizon: Option<u64>,
    pub trace: bool,
}

/// Registry plus per-pattern state
#[derive(Debug, Default)]
pub struct PatternTracker {
    registry: PatternRegistry,
    machines: HashMap<String, Machine>,
}

impl PatternTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a pattern; its state starts fresh
    pub fn add_pattern(&mut self, def: &PatternDef, config: &EngineConfig) -> Result<()> {
        self.registry.add(def, config)?;
        if let Some(pattern) = self.registry.get(def.id.trim()) {
            self.machines
                .insert(pattern.id.clone(), Machine::for_pattern(pattern));
        }
        Ok(())
    }

    pub fn remove_pattern(&mut self, id: &str) -> Result<()> {
        self.registry.remove(id)?;
        self.machines.remove(id);
        Ok(())
    }

    pub fn remove_all(&mut self) {
        self.registry.remove_all();
        self.machines.clear();
    }

    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    /// Drop every in-flight attempt, keeping registrations
    pub fn reset(&mut self) {
        for pattern in self.registry.iter() {
            self.machines
                .insert(pattern.id.clone(), Machine::for_pattern(pattern));
        }
    }

    /// Offer a new frame to every pattern
    pub fn on_frame(
        &mut self,
        frame: &KeyboardFrame,
        ledger: &ConsumptionLedger,
        cooldowns: &CooldownTable,
        horizon: Option<u64>,
        trace: bool,
    ) -> TrackerOutput {
        let mut out = TrackerOutput::default();

        for pattern in self.registry.iter() {
            let Some(machine) = self.machines.get_mut(&pattern.id) else {
                continue;
            };
            let ctx = FrameContext {
                frame,
                ledger,
                cooling: cooldowns.is_cooling(&pattern.id, frame.timestamp),
                horizon,
                trace,
            };

            let (candidate, failure) = match machine {
                Machine::Single(m) => m.on_frame(pattern, &ctx),
                Machine::Sequence(m) => m.on_frame(pattern, &ctx),
            };

            if let Some(c) = candidate {
                debug!(
                    "Candidate '{}' [{}..{}ms] confidence={}",
                    c.id(),
                    c.start_time,
                    c.end_time,
                    c.confidence
                );
                out.candidates.push(c);
            }
            if let Some(f) = failure {
                debug!("Pattern '{}' failed: {} @ {}ms", f.id, f.reason, f.at_time);
                out.failures.push(f);
            }
        }

        out
    }

    /// Expire attempts whose time budget ran out without new input
    pub fn on_tick(&mut self, now: u64) -> Vec<Failure> {
        let mut failures = Vec::new();
        for pattern in self.registry.iter() {
            let failure = match self.machines.get_mut(&pattern.id) {
                Some(Machine::Single(m)) => m.on_tick(pattern, now),
                Some(Machine::Sequence(m)) => m.on_tick(pattern, now),
                None => None,
            };
            if let Some(f) = failure {
                debug!("Pattern '{}' expired: {} @ {}ms", f.id, f.reason, f.at_time);
                failures.push(f);
            }
        }
        failures
    }

    /// Current attempt snapshot for one pattern
    pub fn state(&self, id: &str, cooldowns: &CooldownTable, now: u64) -> Option<PatternState> {
        let pattern = self.registry.get(id)?;
        let snapshot = match self.machines.get(id)? {
            Machine::Single(m) => m.snapshot(pattern),
            Machine::Sequence(m) => m.snapshot(pattern),
        };

        let cooling_until = cooldowns
            .cooldown_until(id)
            .filter(|_| cooldowns.is_cooling(id, now));
        match (snapshot, cooling_until) {
            (Some(mut state), Some(until)) => {
                if state.lifecycle != Lifecycle::Active {
                    state.lifecycle = Lifecycle::Cooldown;
                }
                state.cooldown_until = Some(until);
                Some(state)
            }
            (Some(state), None) => Some(state),
            (None, Some(until)) => Some(PatternState {
                pattern_id: pattern.id.clone(),
                step_index: 0,
                start_time: 0,
                last_step_time: 0,
                matched_keys: MatchedKeys::default(),
                confidence: 0,
                lifecycle: Lifecycle::Cooldown,
                cooldown_until: Some(until),
            }),
            (None, None) => None,
        }
    }
}
