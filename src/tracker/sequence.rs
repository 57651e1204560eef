//! Multi-step sequence tracking
//!
//! Each in-flight attempt walks the frames in order, consuming the next
//! matching, unclaimed frame for its next step. Timing per step:
//! - hold steps: `min_ms`/`max_ms` bound the hold duration; while the hold
//!   continues the next step's window keeps restarting from the latest frame
//! - other steps: `min_ms`/`max_ms` bound the gap since the previous step
//!
//! The whole attempt must finish within the pattern's `timeout_ms`. Attempts
//! that run out of time are dropped and reported as `Timeout`.

use std::sync::Arc;
use tracing::debug;

use super::confidence::{window_position, ConfidenceBuilder};
use super::{Candidate, FrameContext, Lifecycle, PatternState};
use crate::events::{Failure, FailureReason, MatchedKeys};
use crate::frame::KeyboardFrame;
use crate::ledger::ConsumptionLedger;
use crate::pattern::Pattern;
use crate::step::{evaluate_available, Step};

/// Bound on concurrent partial matches per pattern
const MAX_ATTEMPTS: usize = 16;

#[derive(Debug, Clone)]
struct Attempt {
    /// Next step to match
    step_index: usize,
    start_time: u64,
    start_frame: u64,
    last_step_time: u64,
    matched: MatchedKeys,
    confidence: ConfidenceBuilder,
}

#[derive(Debug, Default)]
pub struct SequenceTracker {
    attempts: Vec<Attempt>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_frame(
        &mut self,
        pattern: &Arc<Pattern>,
        ctx: &FrameContext<'_>,
    ) -> (Option<Candidate>, Option<Failure>) {
        let frame = ctx.frame;
        let now = frame.timestamp;

        if ctx.cooling {
            if !self.attempts.is_empty() {
                debug!(
                    "'{}' cooling down, dropping {} attempt(s)",
                    pattern.id,
                    self.attempts.len()
                );
                self.attempts.clear();
            }
            return (None, None);
        }

        let failure = self.expire(pattern, now);

        // Attempts whose input was claimed by another match, or whose first
        // frame left the buffer, can never complete
        let before = self.attempts.len();
        self.attempts.retain(|a| {
            ctx.horizon.map_or(true, |h| a.start_frame >= h)
                && !ctx.ledger.any_consumed(a.matched.exclusive_events().iter())
        });
        if self.attempts.len() < before {
            debug!("'{}' evicted {} attempt(s)", pattern.id, before - self.attempts.len());
        }

        for attempt in &mut self.attempts {
            let advanced = advance(pattern, attempt, frame, ctx.ledger);
            if ctx.trace {
                debug!(
                    "'{}' attempt@{} step {}/{} advanced={}",
                    pattern.id,
                    attempt.start_time,
                    attempt.step_index,
                    pattern.step_count(),
                    advanced
                );
            }
        }

        let total = pattern.step_count();
        let (mut done, in_flight): (Vec<Attempt>, Vec<Attempt>) = std::mem::take(&mut self.attempts)
            .into_iter()
            .partition(|a| a.step_index >= total);
        self.attempts = in_flight;

        if let Some(attempt) = start(pattern, frame, ctx.ledger, &self.attempts) {
            if attempt.step_index >= total {
                done.push(attempt);
            } else {
                self.attempts.push(attempt);
                if self.attempts.len() > MAX_ATTEMPTS {
                    self.attempts.remove(0);
                }
            }
        }

        let candidate = done
            .into_iter()
            .max_by(|a, b| {
                a.confidence
                    .score()
                    .cmp(&b.confidence.score())
                    .then(a.start_time.cmp(&b.start_time))
            })
            .map(|a| Candidate {
                pattern: pattern.clone(),
                start_time: a.start_time,
                end_time: now,
                confidence: a.confidence.score(),
                matched_keys: a.matched,
            });

        (candidate, failure)
    }

    pub fn on_tick(&mut self, pattern: &Pattern, now: u64) -> Option<Failure> {
        self.expire(pattern, now)
    }

    /// Drop attempts out of time; one failure per pattern per call
    fn expire(&mut self, pattern: &Pattern, now: u64) -> Option<Failure> {
        let before = self.attempts.len();
        self.attempts.retain(|a| !expired(pattern, a, now));
        if self.attempts.len() == before {
            return None;
        }

        debug!(
            "'{}' {} attempt(s) timed out @ {}ms",
            pattern.id,
            before - self.attempts.len(),
            now
        );
        Some(Failure {
            id: pattern.id.clone(),
            reason: FailureReason::Timeout,
            at_time: now,
        })
    }

    pub fn snapshot(&self, pattern: &Pattern) -> Option<PatternState> {
        let best = self
            .attempts
            .iter()
            .max_by(|a, b| a.step_index.cmp(&b.step_index).then(a.start_time.cmp(&b.start_time)))?;

        Some(PatternState {
            pattern_id: pattern.id.clone(),
            step_index: best.step_index,
            start_time: best.start_time,
            last_step_time: best.last_step_time,
            matched_keys: best.matched.clone(),
            confidence: best.confidence.score(),
            lifecycle: Lifecycle::Active,
            cooldown_until: None,
        })
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }
}

fn expired(pattern: &Pattern, attempt: &Attempt, now: u64) -> bool {
    if pattern
        .timeout_ms
        .is_some_and(|t| now.saturating_sub(attempt.start_time) > t)
    {
        return true;
    }

    match pattern.steps.get(attempt.step_index) {
        Some(step @ (Step::Press { .. } | Step::Release { .. } | Step::Combo { .. })) => step
            .timing()
            .max_ms
            .is_some_and(|max| now.saturating_sub(attempt.last_step_time) > max),
        _ => false,
    }
}

/// Duration the step's keys have all been down
fn hold_duration(step: &Step, frame: &KeyboardFrame) -> u64 {
    step.keys()
        .iter()
        .map(|k| frame.hold_duration(k))
        .min()
        .unwrap_or(0)
}

/// Timing check for a step that matched on `frame`
///
/// Returns the match's position inside the step's window (`Some(None)` when
/// the step has no window), or `None` when the timing rules reject it.
fn timing_fit(step: &Step, frame: &KeyboardFrame, gap: u64, first: bool) -> Option<Option<f64>> {
    let timing = step.timing();
    let min = timing.min_ms.unwrap_or(0);

    match step {
        Step::Hold { .. } => {
            let held = hold_duration(step, frame);
            match timing.max_ms {
                Some(max) if held > max => None,
                Some(max) => Some(Some(window_position(held, min, max))),
                None => Some(None),
            }
        }
        _ if first => Some(None),
        _ => {
            if gap < min {
                return None;
            }
            match timing.max_ms {
                Some(max) if gap > max => None,
                Some(max) => Some(Some(window_position(gap, min, max))),
                None => Some(None),
            }
        }
    }
}

/// Try to move an attempt forward with a new frame
fn advance(
    pattern: &Pattern,
    attempt: &mut Attempt,
    frame: &KeyboardFrame,
    ledger: &ConsumptionLedger,
) -> bool {
    let Some(step) = pattern.steps.get(attempt.step_index) else {
        return false;
    };
    let now = frame.timestamp;
    let gap = now.saturating_sub(attempt.last_step_time);

    let m = evaluate_available(step, frame, ledger);
    if m.is_match {
        if let Some(position) = timing_fit(step, frame, gap, false) {
            attempt.matched.absorb(frame.frame_number, &m.keys);
            attempt
                .confidence
                .add_step(m.keys.count(), step.is_strict(), position);
            attempt.step_index += 1;
            attempt.last_step_time = now;
            return true;
        }
    }

    // A hold that is still going keeps the next step's window open
    if let Some(prev @ Step::Hold { .. }) = attempt
        .step_index
        .checked_sub(1)
        .and_then(|i| pattern.steps.get(i))
    {
        if evaluate_available(prev, frame, ledger).is_match
            && timing_fit(prev, frame, 0, false).is_some()
        {
            attempt.last_step_time = now;
        }
    }

    false
}

/// Open a new attempt if the frame satisfies the first step
fn start(
    pattern: &Pattern,
    frame: &KeyboardFrame,
    ledger: &ConsumptionLedger,
    existing: &[Attempt],
) -> Option<Attempt> {
    let step = pattern.steps.first()?;
    let m = evaluate_available(step, frame, ledger);
    if !m.is_match {
        return None;
    }
    let position = timing_fit(step, frame, 0, true)?;

    let now = frame.timestamp;
    let start_time = match step {
        Step::Hold { .. } => now.saturating_sub(hold_duration(step, frame)),
        _ => now,
    };

    // Keys held over from an earlier frame belong to the attempt already open
    let continuing = matches!(step, Step::Hold { .. } | Step::Combo { strict: false, .. })
        && step.keys().iter().all(|k| !frame.just_pressed.contains(k));
    let duplicate = existing
        .iter()
        .any(|a| a.step_index == 1 && (a.start_time == start_time || continuing));
    if pattern.step_count() > 1 && duplicate {
        return None;
    }

    let mut matched = MatchedKeys::default();
    matched.absorb(frame.frame_number, &m.keys);
    let mut confidence = ConfidenceBuilder::new();
    confidence.add_step(m.keys.count(), step.is_strict(), position);

    Some(Attempt {
        step_index: 1,
        start_time,
        start_frame: frame.frame_number,
        last_step_time: now,
        matched,
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::pattern::PatternDef;
    use crate::step::DurationConstraint;

    fn pattern(def: PatternDef) -> Arc<Pattern> {
        Arc::new(Pattern::compile(&def, &EngineConfig::default(), 0).unwrap())
    }

    fn feed(
        tracker: &mut SequenceTracker,
        pattern: &Arc<Pattern>,
        frame: KeyboardFrame,
    ) -> (Option<Candidate>, Option<Failure>) {
        let ledger = ConsumptionLedger::new();
        let ctx = FrameContext {
            frame: &frame,
            ledger: &ledger,
            cooling: false,
            horizon: None,
            trace: false,
        };
        tracker.on_frame(pattern, &ctx)
    }

    #[test]
    fn test_double_tap() {
        let p = pattern(PatternDef::new(
            "double",
            vec![Step::press(["a"]), Step::release(["a"]), Step::press(["a"])],
        ));
        let mut t = SequenceTracker::new();

        assert!(feed(&mut t, &p, KeyboardFrame::new(1, 0).with_pressed(["a"])).0.is_none());
        assert!(feed(&mut t, &p, KeyboardFrame::new(2, 50).with_released(["a"])).0.is_none());
        let (c, f) = feed(&mut t, &p, KeyboardFrame::new(3, 100).with_pressed(["a"]));

        let c = c.expect("double tap completes");
        assert!(f.is_none());
        assert_eq!((c.start_time, c.end_time), (0, 100));
        assert_eq!(c.confidence, 30);
        assert_eq!(c.matched_keys.pressed.len(), 2);
        assert_eq!(c.matched_keys.released.len(), 1);
    }

    #[test]
    fn test_steps_need_distinct_frames() {
        let p = pattern(PatternDef::new("aa", vec![Step::press(["a"]), Step::hold(["a"])]));
        let mut t = SequenceTracker::new();

        assert!(feed(&mut t, &p, KeyboardFrame::new(1, 0).with_pressed(["a"])).0.is_none());
        assert!(feed(&mut t, &p, KeyboardFrame::new(2, 16).with_held(["a"])).0.is_some());
    }

    #[test]
    fn test_step_window_timeout() {
        let p = pattern(PatternDef::new(
            "quick",
            vec![
                Step::press(["a"]),
                Step::press(["b"]).timed(DurationConstraint::max(100)),
            ],
        ));
        let mut t = SequenceTracker::new();

        feed(&mut t, &p, KeyboardFrame::new(1, 0).with_pressed(["a"]));
        let (c, f) = feed(&mut t, &p, KeyboardFrame::new(2, 150).with_pressed(["b"]));
        assert!(c.is_none());
        assert_eq!(f.unwrap().reason, FailureReason::Timeout);
        assert_eq!(t.attempt_count(), 0);
    }

    #[test]
    fn test_overall_timeout_on_tick() {
        let p = pattern(
            PatternDef::new("slow", vec![Step::press(["a"]), Step::press(["b"])]).with_timeout(300),
        );
        let mut t = SequenceTracker::new();

        feed(&mut t, &p, KeyboardFrame::new(1, 0).with_pressed(["a"]));
        assert!(t.on_tick(&p, 300).is_none());
        assert_eq!(t.on_tick(&p, 301).unwrap().reason, FailureReason::Timeout);
        assert!(t.on_tick(&p, 400).is_none());
    }

    #[test]
    fn test_hold_keeps_next_window_open() {
        let p = pattern(PatternDef::new(
            "charge-release",
            vec![
                Step::hold(["right"]).timed(DurationConstraint::max(500)),
                Step::release(["right"]).timed(DurationConstraint::max(100)),
            ],
        ));
        let mut t = SequenceTracker::new();

        feed(&mut t, &p, KeyboardFrame::new(1, 0).with_pressed(["right"]));
        for (n, ts) in [(2u64, 100u64), (3, 200), (4, 300)] {
            let frame = KeyboardFrame::new(n, ts)
                .with_held(["right"])
                .with_hold_duration("right", ts);
            let (c, f) = feed(&mut t, &p, frame);
            assert!(c.is_none() && f.is_none());
        }
        assert_eq!(t.attempt_count(), 1);

        let (c, _) = feed(&mut t, &p, KeyboardFrame::new(5, 350).with_released(["right"]));
        assert_eq!(c.unwrap().start_time, 0);
    }

    #[test]
    fn test_hold_over_max_does_not_count() {
        let p = pattern(PatternDef::new(
            "tap-hold",
            vec![
                Step::press(["x"]),
                Step::hold(["y"]).timed(DurationConstraint::range(None, Some(200))),
            ],
        ));
        let mut t = SequenceTracker::new();

        feed(&mut t, &p, KeyboardFrame::new(1, 0).with_pressed(["x"]));
        let frame = KeyboardFrame::new(2, 16).with_held(["y"]).with_hold_duration("y", 900);
        assert!(feed(&mut t, &p, frame).0.is_none());
    }
}
