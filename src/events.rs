//! Output events consumed by executors and UI layers

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::keys::Key;
use crate::ledger::{EventKey, KeyEdge};
use crate::step::StepKeys;

/// A key event pinned to the frame it happened on
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyAt {
    pub frame_number: u64,
    pub key: Key,
}

/// Every key that contributed to a match
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedKeys {
    pub pressed: BTreeSet<KeyAt>,
    pub held: BTreeSet<Key>,
    pub released: BTreeSet<KeyAt>,
}

impl MatchedKeys {
    /// Merge the keys that satisfied one step on `frame_number`
    pub fn absorb(&mut self, frame_number: u64, keys: &StepKeys) {
        self.pressed.extend(keys.pressed.iter().map(|key| KeyAt {
            frame_number,
            key: key.clone(),
        }));
        self.held.extend(keys.held.iter().cloned());
        self.released.extend(keys.released.iter().map(|key| KeyAt {
            frame_number,
            key: key.clone(),
        }));
    }

    /// Press/release events this match would claim exclusively
    pub fn exclusive_events(&self) -> Vec<EventKey> {
        let pressed = self
            .pressed
            .iter()
            .map(|p| EventKey::new(p.frame_number, p.key.clone(), KeyEdge::Pressed));
        let released = self
            .released
            .iter()
            .map(|r| EventKey::new(r.frame_number, r.key.clone(), KeyEdge::Released));
        pressed.chain(released).collect()
    }

    /// Two matches compete for at least one press/release event
    pub fn overlaps(&self, other: &MatchedKeys) -> bool {
        !self.pressed.is_disjoint(&other.pressed) || !self.released.is_disjoint(&other.released)
    }
}

/// Why a pattern attempt was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Required keys changed before the window closed (e.g. released too early)
    StateLost,
    /// Held past the maximum duration
    DurationExceeded,
    /// Overall or per-step time budget elapsed without completion
    Timeout,
    /// Completed, but a `requires`/`prevents` relationship did not hold
    WrongOrder,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::StateLost => write!(f, "state_lost"),
            FailureReason::DurationExceeded => write!(f, "duration_exceeded"),
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::WrongOrder => write!(f, "wrong_order"),
        }
    }
}

/// A successful, emitted match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub id: String,
    pub start_time: u64,
    pub end_time: u64,
    pub confidence: u8,
    pub matched_keys: MatchedKeys,
}

/// An abandoned attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub id: String,
    pub reason: FailureReason,
    pub at_time: u64,
}

/// Engine output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchEvent {
    Completed(Completion),
    Failed(Failure),
}

impl MatchEvent {
    pub fn id(&self) -> &str {
        match self {
            MatchEvent::Completed(c) => &c.id,
            MatchEvent::Failed(f) => &f.id,
        }
    }

    pub fn as_completed(&self) -> Option<&Completion> {
        match self {
            MatchEvent::Completed(c) => Some(c),
            MatchEvent::Failed(_) => None,
        }
    }

    pub fn as_failed(&self) -> Option<&Failure> {
        match self {
            MatchEvent::Failed(f) => Some(f),
            MatchEvent::Completed(_) => None,
        }
    }
}

impl fmt::Display for MatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchEvent::Completed(c) => write!(
                f,
                "completed {} [{}..{}ms] confidence={}",
                c.id, c.start_time, c.end_time, c.confidence
            ),
            MatchEvent::Failed(x) => write!(f, "failed {} ({}) @ {}ms", x.id, x.reason, x.at_time),
        }
    }
}
