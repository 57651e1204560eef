//! Step model and step matcher
//!
//! A step is one required key-state condition. The matcher is a pure function
//! of (step, frame); it reports whether the step is satisfied and exactly
//! which keys satisfied it, split by edge so the ledger knows what to claim.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::frame::KeyboardFrame;
use crate::keys::Key;
use crate::ledger::{ConsumptionLedger, KeyEdge};

/// Timing bounds attached to a step
///
/// For a single-state hold/combo these bound the hold itself: `trigger_ms`
/// fires once at that offset (± `tolerance_ms`), `[min_ms, max_ms]` is an
/// acceptance range. Inside a sequence, `max_ms` bounds the gap from the
/// previous step and `min_ms` is the minimum gap (for holds: minimum hold
/// duration).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DurationConstraint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance_ms: Option<u64>,
}

impl DurationConstraint {
    pub fn range(min_ms: Option<u64>, max_ms: Option<u64>) -> Self {
        Self {
            min_ms,
            max_ms,
            ..Default::default()
        }
    }

    pub fn trigger(trigger_ms: u64, tolerance_ms: u64) -> Self {
        Self {
            trigger_ms: Some(trigger_ms),
            tolerance_ms: Some(tolerance_ms),
            ..Default::default()
        }
    }

    pub fn max(max_ms: u64) -> Self {
        Self::range(None, Some(max_ms))
    }

    pub fn is_unbounded(&self) -> bool {
        self.min_ms.is_none() && self.max_ms.is_none() && self.trigger_ms.is_none()
    }

    /// Tolerance, falling back to a default
    pub fn tolerance_or(&self, default_ms: u64) -> u64 {
        self.tolerance_ms.unwrap_or(default_ms)
    }

    /// `elapsed` falls inside `trigger ± tolerance`
    pub fn in_trigger_window(&self, elapsed: u64, default_tolerance_ms: u64) -> bool {
        match self.trigger_ms {
            Some(trigger) => elapsed.abs_diff(trigger) <= self.tolerance_or(default_tolerance_ms),
            None => false,
        }
    }
}

/// One required key-state condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Step {
    /// All keys go down on the same frame
    Press {
        keys: Vec<Key>,
        #[serde(flatten)]
        timing: DurationConstraint,
    },
    /// All keys are down (held or just pressed)
    Hold {
        keys: Vec<Key>,
        #[serde(flatten)]
        timing: DurationConstraint,
    },
    /// All keys go up on the same frame
    Release {
        keys: Vec<Key>,
        #[serde(flatten)]
        timing: DurationConstraint,
    },
    /// All keys down together; `strict` requires them pressed on the same frame
    Combo {
        keys: Vec<Key>,
        #[serde(default)]
        strict: bool,
        #[serde(flatten)]
        timing: DurationConstraint,
    },
}

impl Step {
    pub fn press<K: Into<Key>>(keys: impl IntoIterator<Item = K>) -> Self {
        Step::Press {
            keys: collect_keys(keys),
            timing: DurationConstraint::default(),
        }
    }

    pub fn hold<K: Into<Key>>(keys: impl IntoIterator<Item = K>) -> Self {
        Step::Hold {
            keys: collect_keys(keys),
            timing: DurationConstraint::default(),
        }
    }

    pub fn release<K: Into<Key>>(keys: impl IntoIterator<Item = K>) -> Self {
        Step::Release {
            keys: collect_keys(keys),
            timing: DurationConstraint::default(),
        }
    }

    pub fn combo<K: Into<Key>>(keys: impl IntoIterator<Item = K>, strict: bool) -> Self {
        Step::Combo {
            keys: collect_keys(keys),
            strict,
            timing: DurationConstraint::default(),
        }
    }

    /// Replace the step's timing bounds
    pub fn timed(mut self, constraint: DurationConstraint) -> Self {
        *self.timing_mut() = constraint;
        self
    }

    pub fn keys(&self) -> &[Key] {
        match self {
            Step::Press { keys, .. }
            | Step::Hold { keys, .. }
            | Step::Release { keys, .. }
            | Step::Combo { keys, .. } => keys,
        }
    }

    pub fn timing(&self) -> &DurationConstraint {
        match self {
            Step::Press { timing, .. }
            | Step::Hold { timing, .. }
            | Step::Release { timing, .. }
            | Step::Combo { timing, .. } => timing,
        }
    }

    pub(crate) fn timing_mut(&mut self) -> &mut DurationConstraint {
        match self {
            Step::Press { timing, .. }
            | Step::Hold { timing, .. }
            | Step::Release { timing, .. }
            | Step::Combo { timing, .. } => timing,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Step::Press { .. } => "press",
            Step::Hold { .. } => "hold",
            Step::Release { .. } => "release",
            Step::Combo { .. } => "combo",
        }
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Step::Combo { strict: true, .. })
    }

    /// Hold and combo steps can stand alone as a timed single-state gesture
    pub fn is_stateful(&self) -> bool {
        matches!(self, Step::Hold { .. } | Step::Combo { .. })
    }
}

fn collect_keys<K: Into<Key>>(keys: impl IntoIterator<Item = K>) -> Vec<Key> {
    keys.into_iter().map(Into::into).collect()
}

/// Keys that satisfied a step on one frame, split by edge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepKeys {
    pub pressed: BTreeSet<Key>,
    pub held: BTreeSet<Key>,
    pub released: BTreeSet<Key>,
}

impl StepKeys {
    pub fn count(&self) -> usize {
        self.pressed.len() + self.held.len() + self.released.len()
    }
}

/// Result of evaluating a step against one frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepMatch {
    pub is_match: bool,
    pub keys: StepKeys,
}

impl StepMatch {
    fn miss() -> Self {
        Self::default()
    }

    fn hit(keys: StepKeys) -> Self {
        Self {
            is_match: true,
            keys,
        }
    }
}

/// Evaluate a step against a frame
pub fn evaluate(step: &Step, frame: &KeyboardFrame) -> StepMatch {
    evaluate_with(step, frame, |_, _| true)
}

/// Evaluate a step, treating press/release events already owned in the
/// ledger as absent
pub fn evaluate_available(
    step: &Step,
    frame: &KeyboardFrame,
    ledger: &ConsumptionLedger,
) -> StepMatch {
    evaluate_with(step, frame, |key, edge| {
        !ledger.is_consumed(frame.frame_number, key, edge)
    })
}

fn evaluate_with<F>(step: &Step, frame: &KeyboardFrame, available: F) -> StepMatch
where
    F: Fn(&Key, KeyEdge) -> bool,
{
    let keys = step.keys();
    if keys.is_empty() {
        return StepMatch::miss();
    }

    let pressed = |k: &Key| frame.just_pressed.contains(k) && available(k, KeyEdge::Pressed);
    let released = |k: &Key| frame.just_released.contains(k) && available(k, KeyEdge::Released);
    let down = |k: &Key| frame.held_keys.contains(k) || pressed(k);

    let mut out = StepKeys::default();
    match step {
        Step::Press { .. } => {
            if !keys.iter().all(pressed) {
                return StepMatch::miss();
            }
            out.pressed.extend(keys.iter().cloned());
        }
        Step::Release { .. } => {
            if !keys.iter().all(released) {
                return StepMatch::miss();
            }
            out.released.extend(keys.iter().cloned());
        }
        Step::Hold { timing, .. } => {
            if !keys.iter().all(down) {
                return StepMatch::miss();
            }
            if let Some(min) = timing.min_ms {
                if keys.iter().any(|k| frame.hold_duration(k) < min) {
                    return StepMatch::miss();
                }
            }
            out.held.extend(keys.iter().cloned());
        }
        Step::Combo { strict: true, .. } => {
            if !keys.iter().all(pressed) {
                return StepMatch::miss();
            }
            out.pressed.extend(keys.iter().cloned());
        }
        Step::Combo { strict: false, .. } => {
            if !keys.iter().all(down) {
                return StepMatch::miss();
            }
            for key in keys {
                if pressed(key) {
                    out.pressed.insert(key.clone());
                } else {
                    out.held.insert(key.clone());
                }
            }
        }
    }

    StepMatch::hit(out)
}

/// A single-state step's keys are all still down on this frame
///
/// Release steps have nothing to maintain.
pub fn keys_maintained(step: &Step, frame: &KeyboardFrame) -> bool {
    match step {
        Step::Release { .. } => true,
        _ => step
            .keys()
            .iter()
            .all(|k| frame.is_down(k) && !frame.just_released.contains(k)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::EventKey;

    fn k(name: &str) -> Key {
        Key::from(name)
    }

    #[test]
    fn test_press_requires_all_keys_just_pressed() {
        let step = Step::press(["a", "b"]);
        let frame = KeyboardFrame::new(1, 0).with_pressed(["a"]).with_held(["b"]);
        assert!(!evaluate(&step, &frame).is_match);

        let frame = KeyboardFrame::new(1, 0).with_pressed(["a", "b"]);
        let m = evaluate(&step, &frame);
        assert!(m.is_match);
        assert_eq!(m.keys.pressed.len(), 2);
        assert!(m.keys.held.is_empty());
    }

    #[test]
    fn test_release() {
        let step = Step::release(["a"]);
        assert!(evaluate(&step, &KeyboardFrame::new(1, 0).with_released(["a"])).is_match);
        assert!(!evaluate(&step, &KeyboardFrame::new(1, 0).with_held(["a"])).is_match);
    }

    #[test]
    fn test_hold_accepts_just_pressed_and_checks_min_duration() {
        let step = Step::hold(["a"]);
        let m = evaluate(&step, &KeyboardFrame::new(1, 0).with_pressed(["a"]));
        assert!(m.is_match);
        assert!(m.keys.held.contains(&k("a")));

        let step = Step::hold(["a"]).timed(DurationConstraint::range(Some(50), Some(300)));
        let early = KeyboardFrame::new(2, 33).with_held(["a"]).with_hold_duration("a", 33);
        let late = KeyboardFrame::new(3, 50).with_held(["a"]).with_hold_duration("a", 50);
        assert!(!evaluate(&step, &early).is_match);
        assert!(evaluate(&step, &late).is_match);
    }

    #[test]
    fn test_strict_combo_needs_same_frame_press() {
        let step = Step::combo(["ctrl", "k"], true);
        let staggered = KeyboardFrame::new(1, 0).with_held(["ctrl"]).with_pressed(["k"]);
        assert!(!evaluate(&step, &staggered).is_match);

        let together = KeyboardFrame::new(1, 0).with_pressed(["ctrl", "k"]);
        assert!(evaluate(&step, &together).is_match);
    }

    #[test]
    fn test_loose_combo_splits_pressed_and_held() {
        let step = Step::combo(["down", "right"], false);
        let frame = KeyboardFrame::new(1, 0).with_held(["down"]).with_pressed(["right"]);
        let m = evaluate(&step, &frame);

        assert!(m.is_match);
        assert_eq!(m.keys.pressed, BTreeSet::from([k("right")]));
        assert_eq!(m.keys.held, BTreeSet::from([k("down")]));
        assert_eq!(m.keys.count(), 2);
    }

    #[test]
    fn test_consumed_press_is_absent() {
        let mut ledger = ConsumptionLedger::new();
        ledger.consume("other", &[EventKey::new(4, k("p"), KeyEdge::Pressed)]);

        let frame = KeyboardFrame::new(4, 64).with_pressed(["p"]);
        assert!(evaluate(&Step::press(["p"]), &frame).is_match);
        assert!(!evaluate_available(&Step::press(["p"]), &frame, &ledger).is_match);

        // A different frame is unaffected
        let later = KeyboardFrame::new(5, 80).with_pressed(["p"]);
        assert!(evaluate_available(&Step::press(["p"]), &later, &ledger).is_match);
    }

    #[test]
    fn test_keys_maintained() {
        let step = Step::hold(["a", "b"]);
        let both = KeyboardFrame::new(1, 0).with_held(["a", "b"]);
        let one_up = KeyboardFrame::new(2, 16).with_held(["a"]).with_released(["b"]);
        assert!(keys_maintained(&step, &both));
        assert!(!keys_maintained(&step, &one_up));
    }

    #[test]
    fn test_step_yaml_shape() {
        let yaml = r#"
kind: hold
keys: [A, 0x27]
trigger_ms: 750
tolerance_ms: 100
"#;
        let step: Step = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(step.keys(), &[k("a"), k("right")]);
        assert_eq!(step.timing().trigger_ms, Some(750));

        let combo: Step =
            serde_yaml::from_str("kind: combo\nkeys: [ctrl, c]\nstrict: true\n").unwrap();
        assert!(combo.is_strict());
        assert!(combo.timing().is_unbounded());
    }
}
