//! Conflict resolution between competing candidates
//!
//! A completed candidate is held for a short grace period before it is
//! emitted. During that window a better candidate that claims any of the same
//! press/release events supersedes it, which lets a longer gesture win over a
//! shorter one that is a prefix of it.

use tracing::debug;

use crate::tracker::Candidate;

/// Candidate waiting out its grace period
#[derive(Debug, Clone)]
pub struct PendingMatch {
    pub candidate: Candidate,
    pub expires_at: u64,
}

/// What happened to a submitted candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued,
    /// Queued, displacing this many pending entries
    Superseded(usize),
    /// Lost to an equal or better pending entry
    Rejected,
}

#[derive(Debug, Default)]
pub struct ConflictResolver {
    grace_ms: u64,
    pending: Vec<PendingMatch>,
}

impl ConflictResolver {
    pub fn new(grace_ms: u64) -> Self {
        Self {
            grace_ms,
            pending: Vec::new(),
        }
    }

    pub fn grace_ms(&self) -> u64 {
        self.grace_ms
    }

    /// Offer a candidate at time `now`
    pub fn submit(&mut self, candidate: Candidate, now: u64) -> Submission {
        let same = self
            .pending
            .iter()
            .position(|p| p.candidate.id() == candidate.id());
        if let Some(idx) = same {
            if candidate.confidence <= self.pending[idx].candidate.confidence {
                debug!(
                    "'{}' already pending with confidence {}",
                    candidate.id(),
                    self.pending[idx].candidate.confidence
                );
                return Submission::Rejected;
            }
        }

        let rank = candidate.rank();
        let conflicts: Vec<usize> = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                p.candidate.id() != candidate.id()
                    && p.candidate.matched_keys.overlaps(&candidate.matched_keys)
            })
            .map(|(idx, _)| idx)
            .collect();

        if let Some(winner) = conflicts
            .iter()
            .map(|&idx| &self.pending[idx].candidate)
            .find(|p| p.rank() >= rank)
        {
            debug!("'{}' loses to pending '{}'", candidate.id(), winner.id());
            return Submission::Rejected;
        }

        let displaced = conflicts.len() + usize::from(same.is_some());
        self.pending.retain(|p| {
            let drop = p.candidate.id() == candidate.id()
                || p.candidate.matched_keys.overlaps(&candidate.matched_keys);
            if drop {
                debug!("'{}' superseded by '{}'", p.candidate.id(), candidate.id());
            }
            !drop
        });

        let expires_at = now.saturating_add(self.grace_ms);
        debug!(
            "'{}' pending until {}ms (confidence {})",
            candidate.id(),
            expires_at,
            candidate.confidence
        );
        self.pending.push(PendingMatch {
            candidate,
            expires_at,
        });

        if displaced == 0 {
            Submission::Queued
        } else {
            Submission::Superseded(displaced)
        }
    }

    /// Remove and return every entry whose grace period has passed, best first
    pub fn flush(&mut self, now: u64) -> Vec<Candidate> {
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| p.expires_at <= now);
        self.pending = waiting;

        let mut ready: Vec<Candidate> = ready.into_iter().map(|p| p.candidate).collect();
        ready.sort_by(|a, b| b.rank().cmp(&a.rank()));
        ready
    }

    /// Drop pending entries for `id`, returning how many were dropped
    pub fn discard(&mut self, id: &str) -> usize {
        let before = self.pending.len();
        self.pending.retain(|p| p.candidate.id() != id);
        let dropped = before - self.pending.len();
        if dropped > 0 {
            debug!("Discarded {} pending match(es) for '{}'", dropped, id);
        }
        dropped
    }

    pub fn pending(&self) -> &[PendingMatch] {
        &self.pending
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::events::{KeyAt, MatchedKeys};
    use crate::pattern::{Pattern, PatternDef};
    use crate::step::Step;
    use std::sync::Arc;

    fn candidate(id: &str, priority: i32, confidence: u8, pressed: &[(u64, &str)]) -> Candidate {
        let def = PatternDef::new(id, vec![Step::press(["a"])]).with_priority(priority);
        let pattern = Arc::new(Pattern::compile(&def, &EngineConfig::default(), 0).unwrap());
        let mut matched_keys = MatchedKeys::default();
        for (frame_number, key) in pressed {
            matched_keys.pressed.insert(KeyAt {
                frame_number: *frame_number,
                key: (*key).into(),
            });
        }
        Candidate {
            pattern,
            start_time: 0,
            end_time: 0,
            confidence,
            matched_keys,
        }
    }

    #[test]
    fn test_grace_period() {
        let mut r = ConflictResolver::new(100);
        assert_eq!(r.submit(candidate("tap", 0, 10, &[(1, "a")]), 0), Submission::Queued);
        assert!(r.flush(99).is_empty());
        assert_eq!(r.flush(100).len(), 1);
        assert!(r.pending().is_empty());
    }

    #[test]
    fn test_zero_grace_flushes_immediately() {
        let mut r = ConflictResolver::new(0);
        r.submit(candidate("tap", 0, 10, &[(1, "a")]), 40);
        assert_eq!(r.flush(40).len(), 1);
    }

    #[test]
    fn test_better_overlapping_candidate_supersedes() {
        let mut r = ConflictResolver::new(100);
        r.submit(candidate("tap", 0, 10, &[(1, "a")]), 0);
        let outcome = r.submit(candidate("dash", 0, 30, &[(1, "a"), (3, "a")]), 50);
        assert_eq!(outcome, Submission::Superseded(1));

        // The short gesture on the newest press cannot take it back
        assert_eq!(r.submit(candidate("tap", 0, 10, &[(3, "a")]), 50), Submission::Rejected);

        let out = r.flush(150);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id(), "dash");
    }

    #[test]
    fn test_priority_beats_confidence() {
        let mut r = ConflictResolver::new(50);
        r.submit(candidate("strong", 2, 10, &[(1, "a")]), 0);
        assert_eq!(r.submit(candidate("weak", 0, 90, &[(1, "a")]), 0), Submission::Rejected);
    }

    #[test]
    fn test_disjoint_candidates_coexist_and_flush_ranked() {
        let mut r = ConflictResolver::new(0);
        r.submit(candidate("low", 0, 10, &[(1, "a")]), 0);
        r.submit(candidate("high", 1, 10, &[(1, "b")]), 0);
        let ids: Vec<_> = r.flush(0).iter().map(|c| c.id().to_string()).collect();
        assert_eq!(ids, vec!["high", "low"]);
    }

    #[test]
    fn test_same_id_replaced_only_by_higher_confidence() {
        let mut r = ConflictResolver::new(100);
        r.submit(candidate("seq", 0, 20, &[(1, "a")]), 0);
        assert_eq!(r.submit(candidate("seq", 0, 20, &[(2, "a")]), 10), Submission::Rejected);
        assert_eq!(r.submit(candidate("seq", 0, 40, &[(2, "a")]), 10), Submission::Superseded(1));
        assert_eq!(r.pending().len(), 1);
        assert_eq!(r.pending()[0].expires_at, 110);
    }

    #[test]
    fn test_discard_by_id() {
        let mut r = ConflictResolver::new(100);
        r.submit(candidate("tap", 0, 10, &[(1, "a")]), 0);
        r.submit(candidate("kick", 0, 10, &[(1, "k")]), 0);

        assert_eq!(r.discard("tap"), 1);
        assert_eq!(r.discard("tap"), 0);
        let ids: Vec<_> = r.flush(100).iter().map(|c| c.id().to_string()).collect();
        assert_eq!(ids, vec!["kick"]);
    }

    #[test]
    fn test_huge_grace_saturates() {
        let mut r = ConflictResolver::new(u64::MAX);
        r.submit(candidate("tap", 0, 10, &[(1, "a")]), 5);
        assert_eq!(r.pending()[0].expires_at, u64::MAX);
        assert!(r.flush(u64::MAX - 1).is_empty());
    }
}
