//! Consumption ledger and cooldown bookkeeping
//!
//! When a match is emitted, its press/release events become owned by that
//! pattern and are invisible to every other pattern's evaluation at that
//! frame. Held keys are never recorded, holding is shareable.
//!
//! Records are keyed by a structured `EventKey` (frame number, key, edge)
//! and filtered by field, never by string matching.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::keys::Key;
use crate::pattern::{Pattern, Relationship};

/// Which edge of a key transition an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyEdge {
    Pressed,
    Released,
}

/// One exclusive input event: a press or release of a key at a frame
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    pub frame_number: u64,
    pub key: Key,
    pub edge: KeyEdge,
}

impl EventKey {
    pub fn new(frame_number: u64, key: Key, edge: KeyEdge) -> Self {
        Self {
            frame_number,
            key,
            edge,
        }
    }
}

/// Exclusive-use records: event -> owning pattern id
#[derive(Debug, Clone, Default)]
pub struct ConsumptionLedger {
    records: BTreeMap<EventKey, String>,
}

impl ConsumptionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record events as owned by `owner`
    ///
    /// Events already owned by another pattern keep their first owner.
    pub fn consume<'a>(&mut self, owner: &str, events: impl IntoIterator<Item = &'a EventKey>) {
        for event in events {
            self.records
                .entry(event.clone())
                .or_insert_with(|| owner.to_string());
        }
    }

    pub fn is_consumed(&self, frame_number: u64, key: &Key, edge: KeyEdge) -> bool {
        self.records
            .contains_key(&EventKey::new(frame_number, key.clone(), edge))
    }

    pub fn owner(&self, event: &EventKey) -> Option<&str> {
        self.records.get(event).map(String::as_str)
    }

    /// True if any of the events is already owned
    pub fn any_consumed<'a>(&self, mut events: impl Iterator<Item = &'a EventKey>) -> bool {
        events.any(|e| self.records.contains_key(e))
    }

    /// Drop every record owned by a pattern
    pub fn release_owner(&mut self, owner: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|_, o| o != owner);
        before - self.records.len()
    }

    /// Drop records for frames that left the buffer
    pub fn prune_before(&mut self, frame_number: u64) {
        // Keys order by frame number first
        let keep = self.records.split_off(&EventKey::new(
            frame_number,
            Key::from_name(""),
            KeyEdge::Pressed,
        ));
        self.records = keep;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Post-success cooldowns per pattern id
#[derive(Debug, Clone, Default)]
pub struct CooldownTable {
    until: HashMap<String, u64>,
}

impl CooldownTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or extend) a cooldown; never shortens an existing one
    pub fn start(&mut self, id: &str, until: u64) {
        let entry = self.until.entry(id.to_string()).or_insert(until);
        *entry = (*entry).max(until);
    }

    pub fn is_cooling(&self, id: &str, now: u64) -> bool {
        self.until.get(id).is_some_and(|&until| now < until)
    }

    pub fn cooldown_until(&self, id: &str) -> Option<u64> {
        self.until.get(id).copied()
    }

    /// Remove expired cooldowns, returning the ids that came back to idle
    pub fn expire(&mut self, now: u64) -> Vec<String> {
        let mut expired: Vec<String> = self
            .until
            .iter()
            .filter(|(_, &until)| now >= until)
            .map(|(id, _)| id.clone())
            .collect();
        expired.sort();

        for id in &expired {
            self.until.remove(id);
            debug!("Cooldown expired for '{}'", id);
        }
        expired
    }

    pub fn remove(&mut self, id: &str) {
        self.until.remove(id);
    }

    pub fn clear(&mut self) {
        self.until.clear();
    }
}

/// Latest emitted completion time per pattern id
///
/// Read by `requires`/`prevents` relationships.
#[derive(Debug, Clone, Default)]
pub struct CompletionHistory {
    last: HashMap<String, u64>,
}

impl CompletionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, id: &str, at: u64) {
        let entry = self.last.entry(id.to_string()).or_insert(at);
        *entry = (*entry).max(at);
    }

    pub fn last_completion(&self, id: &str) -> Option<u64> {
        self.last.get(id).copied()
    }

    /// First relationship of `pattern` that does not hold at `now`
    pub fn violation<'a>(&self, pattern: &'a Pattern, now: u64) -> Option<&'a Relationship> {
        pattern
            .relationships
            .iter()
            .find(|rel| !rel.holds(self.last_completion(&rel.target), now))
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(frame: u64, key: &str, edge: KeyEdge) -> EventKey {
        EventKey::new(frame, Key::from(key), edge)
    }

    #[test]
    fn test_consume_and_query() {
        let mut ledger = ConsumptionLedger::new();
        ledger.consume("a", &[ev(10, "p", KeyEdge::Pressed)]);

        assert!(ledger.is_consumed(10, &Key::from("p"), KeyEdge::Pressed));
        assert!(!ledger.is_consumed(10, &Key::from("p"), KeyEdge::Released));
        assert!(!ledger.is_consumed(11, &Key::from("p"), KeyEdge::Pressed));
        assert_eq!(ledger.owner(&ev(10, "p", KeyEdge::Pressed)), Some("a"));
    }

    #[test]
    fn test_first_owner_wins() {
        let mut ledger = ConsumptionLedger::new();
        ledger.consume("a", &[ev(3, "x", KeyEdge::Pressed)]);
        ledger.consume("b", &[ev(3, "x", KeyEdge::Pressed)]);
        assert_eq!(ledger.owner(&ev(3, "x", KeyEdge::Pressed)), Some("a"));
    }

    #[test]
    fn test_release_owner_only_touches_that_owner() {
        let mut ledger = ConsumptionLedger::new();
        ledger.consume("a", &[ev(1, "x", KeyEdge::Pressed), ev(2, "x", KeyEdge::Released)]);
        ledger.consume("b", &[ev(3, "y", KeyEdge::Pressed)]);

        assert_eq!(ledger.release_owner("a"), 2);
        assert_eq!(ledger.len(), 1);
        assert!(ledger.is_consumed(3, &Key::from("y"), KeyEdge::Pressed));
    }

    #[test]
    fn test_prune_before_frame() {
        let mut ledger = ConsumptionLedger::new();
        ledger.consume(
            "a",
            &[
                ev(1, "x", KeyEdge::Pressed),
                ev(5, "a", KeyEdge::Pressed),
                ev(9, "z", KeyEdge::Released),
            ],
        );

        ledger.prune_before(5);
        assert_eq!(ledger.len(), 2);
        assert!(!ledger.is_consumed(1, &Key::from("x"), KeyEdge::Pressed));
        assert!(ledger.is_consumed(5, &Key::from("a"), KeyEdge::Pressed));
    }

    #[test]
    fn test_cooldown_lifecycle() {
        let mut table = CooldownTable::new();
        table.start("dash", 350);
        table.start("dash", 200);

        assert!(table.is_cooling("dash", 349));
        assert!(!table.is_cooling("dash", 350));
        assert!(table.expire(349).is_empty());
        assert_eq!(table.expire(350), vec!["dash".to_string()]);
        assert_eq!(table.cooldown_until("dash"), None);
    }

    #[test]
    fn test_history_finds_violated_relationship() {
        use crate::config::EngineConfig;
        use crate::pattern::PatternDef;
        use crate::step::Step;

        let def = PatternDef::new("combo-finisher", vec![Step::press(["k"])])
            .with_relationship(Relationship::requires("opener", 1000))
            .with_relationship(Relationship::prevents("breaker", 500));
        let pattern = Pattern::compile(&def, &EngineConfig::default(), 0).unwrap();

        let mut history = CompletionHistory::new();
        assert_eq!(history.violation(&pattern, 1000).map(|r| r.target.as_str()), Some("opener"));

        history.record("opener", 1000);
        history.record("breaker", 1300);
        assert_eq!(history.violation(&pattern, 1500).map(|r| r.target.as_str()), Some("breaker"));
        assert!(history.violation(&pattern, 1850).is_none());
        assert_eq!(history.violation(&pattern, 2001).map(|r| r.target.as_str()), Some("opener"));

        history.record("opener", 900);
        assert_eq!(history.last_completion("opener"), Some(1000));
    }
}
