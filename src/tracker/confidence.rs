//! Match confidence scoring
//!
//! `min(100, keys * 10 + strict combos * 10 + timing bonus)`. The timing bonus
//! (up to 20) rewards matches that land early inside their step's allowed
//! window. Confidence only breaks ties between competing candidates.

pub const BASE_CREDIT_PER_KEY: u32 = 10;
pub const STRICT_BONUS: u32 = 10;
pub const TIMING_BONUS_MAX: f64 = 20.0;

/// Accumulates per-step credit as an attempt advances
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConfidenceBuilder {
    key_credit: u32,
    strict_credit: u32,
    timing_sum: f64,
    timed_steps: u32,
}

impl ConfidenceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit one matched step
    ///
    /// `window_position` is where the match fell inside the step's window,
    /// 0.0 at the opening edge and 1.0 at the closing edge. `None` when the
    /// step has no window.
    pub fn add_step(&mut self, matched_keys: usize, strict: bool, window_position: Option<f64>) {
        self.key_credit += matched_keys as u32 * BASE_CREDIT_PER_KEY;
        if strict {
            self.strict_credit += STRICT_BONUS;
        }
        if let Some(pos) = window_position {
            self.timing_sum += 1.0 - pos.clamp(0.0, 1.0);
            self.timed_steps += 1;
        }
    }

    pub fn score(&self) -> u8 {
        let timing = if self.timed_steps == 0 {
            0.0
        } else {
            TIMING_BONUS_MAX * self.timing_sum / f64::from(self.timed_steps)
        };
        let total = f64::from(self.key_credit + self.strict_credit) + timing;
        total.round().min(100.0) as u8
    }
}

/// Position of `value` inside `[lo, hi]`, clamped to 0..=1
pub fn window_position(value: u64, lo: u64, hi: u64) -> f64 {
    if hi <= lo {
        return if value <= lo { 0.0 } else { 1.0 };
    }
    let pos = value.saturating_sub(lo) as f64 / (hi - lo) as f64;
    pos.clamp(0.0, 1.0)
}
