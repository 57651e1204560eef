//! Single-state (hold / combo) tracking
//!
//! The pattern's one step must be entered, then maintained while the timing
//! rules decide the outcome:
//! - `trigger_ms` set: succeed once `|elapsed - trigger| <= tolerance`
//!   (this takes precedence; `min_ms`/`max_ms` then only gate it), fail with
//!   `DurationExceeded` once the window has passed.
//! - `max_ms` set (range): succeed on release inside `[min, max]`, fail with
//!   `DurationExceeded` when held past `max`.
//! - otherwise: succeed as soon as `elapsed >= min` while held.
//!
//! Releasing early outside any acceptance window fails with `StateLost`.
//! After an outcome the tracker latches until the keys are let go, so one
//! continuous hold fires at most once.

use std::sync::Arc;
use tracing::debug;

use super::confidence::{window_position, ConfidenceBuilder};
use super::{Candidate, FrameContext, Lifecycle, PatternState};
use crate::events::{Failure, FailureReason, MatchedKeys};
use crate::pattern::Pattern;
use crate::step::{evaluate_available, keys_maintained, DurationConstraint, Step};

#[derive(Debug, Clone)]
enum State {
    Idle,
    Active {
        start_time: u64,
        last_time: u64,
        matched: MatchedKeys,
        key_count: usize,
    },
    /// Outcome reached; wait for the keys to go up
    Latched { lifecycle: Lifecycle, at: u64 },
}

/// Outcome of evaluating an active hold on one frame
enum Verdict {
    Wait,
    Succeed,
    Fail(FailureReason),
}

#[derive(Debug)]
pub struct SingleTracker {
    /// The step with its minimum stripped, used to detect entry
    untimed: Step,
    state: State,
}

impl SingleTracker {
    pub fn new(pattern: &Pattern) -> Self {
        let untimed = pattern.steps[0].clone().timed(DurationConstraint::default());
        Self {
            untimed,
            state: State::Idle,
        }
    }

    pub(crate) fn on_frame(
        &mut self,
        pattern: &Arc<Pattern>,
        ctx: &FrameContext<'_>,
    ) -> (Option<Candidate>, Option<Failure>) {
        let step = &pattern.steps[0];
        let frame = ctx.frame;
        let now = frame.timestamp;

        if let State::Latched { .. } = self.state {
            if keys_maintained(step, frame) {
                return (None, None);
            }
            debug!("'{}' keys released, re-armed", pattern.id);
            self.state = State::Idle;
        }

        if let State::Idle = self.state {
            if ctx.cooling {
                return (None, None);
            }
            let untimed = evaluate_available(&self.untimed, frame, ctx.ledger);
            if !untimed.is_match {
                return (None, None);
            }

            // A hold already in progress started when its newest key went down
            let held_for = step
                .keys()
                .iter()
                .map(|k| frame.hold_duration(k))
                .min()
                .unwrap_or(0);
            let mut matched = MatchedKeys::default();
            matched.absorb(frame.frame_number, &untimed.keys);

            debug!("'{}' active @ {}ms (held {}ms)", pattern.id, now, held_for);
            self.state = State::Active {
                start_time: now.saturating_sub(held_for),
                last_time: now,
                matched,
                key_count: untimed.keys.count(),
            };
        }

        let State::Active {
            start_time,
            ref mut last_time,
            ref matched,
            key_count,
        } = self.state
        else {
            return (None, None);
        };
        *last_time = now;

        // Another pattern claimed our entry press in the meantime
        if ctx.ledger.any_consumed(matched.exclusive_events().iter()) {
            debug!("'{}' lost its input to another match", pattern.id);
            self.state = State::Latched {
                lifecycle: Lifecycle::Failed,
                at: now,
            };
            return (None, None);
        }

        let elapsed = now.saturating_sub(start_time);
        let maintained = keys_maintained(step, frame);
        let timing = step.timing();

        if ctx.trace {
            debug!(
                "'{}' elapsed={}ms maintained={} timing={:?}",
                pattern.id, elapsed, maintained, timing
            );
        }

        let verdict = match pattern.timeout_ms {
            Some(timeout) if elapsed > timeout => Verdict::Fail(FailureReason::Timeout),
            _ => judge(timing, elapsed, maintained),
        };

        match verdict {
            Verdict::Wait => (None, None),
            Verdict::Succeed => {
                let candidate = Candidate {
                    pattern: pattern.clone(),
                    start_time,
                    end_time: now,
                    confidence: score(step, timing, elapsed, key_count),
                    matched_keys: matched.clone(),
                };
                self.settle(maintained, Lifecycle::Complete, now);
                (Some(candidate), None)
            }
            Verdict::Fail(reason) => {
                self.settle(maintained, Lifecycle::Failed, now);
                let failure = Failure {
                    id: pattern.id.clone(),
                    reason,
                    at_time: now,
                };
                (None, Some(failure))
            }
        }
    }

    /// Time-based expiry without a new frame
    pub fn on_tick(&mut self, pattern: &Pattern, now: u64) -> Option<Failure> {
        let State::Active { start_time, .. } = self.state else {
            return None;
        };
        let elapsed = now.saturating_sub(start_time);
        let timing = pattern.steps[0].timing();

        let reason = if pattern.timeout_ms.is_some_and(|t| elapsed > t) {
            FailureReason::Timeout
        } else if past_window(timing, elapsed) {
            FailureReason::DurationExceeded
        } else {
            return None;
        };

        self.state = State::Latched {
            lifecycle: Lifecycle::Failed,
            at: now,
        };
        Some(Failure {
            id: pattern.id.clone(),
            reason,
            at_time: now,
        })
    }

    fn settle(&mut self, maintained: bool, lifecycle: Lifecycle, at: u64) {
        self.state = if maintained {
            State::Latched { lifecycle, at }
        } else {
            State::Idle
        };
    }

    pub fn snapshot(&self, pattern: &Pattern) -> Option<PatternState> {
        match &self.state {
            State::Idle => None,
            State::Active {
                start_time,
                last_time,
                matched,
                key_count,
            } => Some(PatternState {
                pattern_id: pattern.id.clone(),
                step_index: 0,
                start_time: *start_time,
                last_step_time: *last_time,
                matched_keys: matched.clone(),
                confidence: {
                    let mut c = ConfidenceBuilder::new();
                    c.add_step(*key_count, pattern.steps[0].is_strict(), None);
                    c.score()
                },
                lifecycle: Lifecycle::Active,
                cooldown_until: None,
            }),
            State::Latched { lifecycle, at } => Some(PatternState {
                pattern_id: pattern.id.clone(),
                step_index: 1,
                start_time: *at,
                last_step_time: *at,
                matched_keys: MatchedKeys::default(),
                confidence: 0,
                lifecycle: *lifecycle,
                cooldown_until: None,
            }),
        }
    }
}

/// Apply the duration rules to an active hold
fn judge(timing: &DurationConstraint, elapsed: u64, maintained: bool) -> Verdict {
    let min = timing.min_ms.unwrap_or(0);
    let within_bounds = elapsed >= min && timing.max_ms.map_or(true, |max| elapsed <= max);

    if timing.trigger_ms.is_some() {
        if timing.in_trigger_window(elapsed, 0) && within_bounds {
            return Verdict::Succeed;
        }
        if !maintained {
            return Verdict::Fail(FailureReason::StateLost);
        }
        if past_window(timing, elapsed) {
            return Verdict::Fail(FailureReason::DurationExceeded);
        }
        return Verdict::Wait;
    }

    if let Some(max) = timing.max_ms {
        if elapsed > max {
            return Verdict::Fail(FailureReason::DurationExceeded);
        }
        if maintained {
            return Verdict::Wait;
        }
        return if elapsed >= min {
            Verdict::Succeed
        } else {
            Verdict::Fail(FailureReason::StateLost)
        };
    }

    if !maintained {
        return Verdict::Fail(FailureReason::StateLost);
    }
    if elapsed >= min {
        Verdict::Succeed
    } else {
        Verdict::Wait
    }
}

/// The hold can no longer succeed because its window closed
fn past_window(timing: &DurationConstraint, elapsed: u64) -> bool {
    let past_trigger = timing
        .trigger_ms
        .is_some_and(|t| elapsed > t.saturating_add(timing.tolerance_or(0)));
    let past_max = timing.max_ms.is_some_and(|max| elapsed > max);
    past_trigger || past_max
}

fn score(step: &Step, timing: &DurationConstraint, elapsed: u64, key_count: usize) -> u8 {
    let position = match (timing.trigger_ms, timing.max_ms) {
        (Some(trigger), _) => {
            let tol = timing.tolerance_or(0);
            let (lo, hi) = (trigger.saturating_sub(tol), trigger.saturating_add(tol));
            Some(window_position(elapsed, lo, hi))
        }
        (None, Some(max)) => Some(window_position(elapsed, timing.min_ms.unwrap_or(0), max)),
        (None, None) => None,
    };

    let mut c = ConfidenceBuilder::new();
    c.add_step(key_count, step.is_strict(), position);
    c.score()
}
