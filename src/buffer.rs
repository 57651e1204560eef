//! Rolling frame buffer
//!
//! Bounded, ordered frame history. Frames are evicted past a maximum count
//! and/or a maximum age. `tick()` prunes by age even when no new frame
//! arrives, so idle time still ages the history out.

use std::collections::VecDeque;
use tracing::trace;

use crate::config::BufferConfig;
use crate::error::{EngineError, Result};
use crate::frame::KeyboardFrame;

/// Last accepted (frame_number, timestamp)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Watermark {
    frame_number: u64,
    timestamp: u64,
}

/// Time/size-windowed frame history
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    config: BufferConfig,
    frames: VecDeque<KeyboardFrame>,
    watermark: Option<Watermark>,
}

impl FrameBuffer {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            frames: VecDeque::with_capacity(config.max_frames.min(1024)),
            config,
            watermark: None,
        }
    }

    /// Append a frame, enforcing strict frame order
    ///
    /// The frame number must be strictly greater than the last accepted one
    /// and the timestamp must not go backwards. On violation nothing changes.
    pub fn add_frame(&mut self, frame: KeyboardFrame) -> Result<()> {
        if let Some(last) = self.watermark {
            if frame.frame_number <= last.frame_number || frame.timestamp < last.timestamp {
                return Err(EngineError::OutOfOrderFrame {
                    last_frame: last.frame_number,
                    last_ts: last.timestamp,
                    got_frame: frame.frame_number,
                    got_ts: frame.timestamp,
                });
            }
        }

        let now = frame.timestamp;
        self.watermark = Some(Watermark {
            frame_number: frame.frame_number,
            timestamp: frame.timestamp,
        });
        self.frames.push_back(frame);

        while self.frames.len() > self.config.max_frames {
            self.frames.pop_front();
        }
        self.prune(now);

        Ok(())
    }

    /// Prune frames older than the configured max age relative to `now`
    ///
    /// Returns the number of frames removed.
    pub fn tick(&mut self, now: u64) -> usize {
        self.prune(now)
    }

    fn prune(&mut self, now: u64) -> usize {
        let Some(max_age) = self.config.max_age_ms else {
            return 0;
        };
        let horizon = now.saturating_sub(max_age);

        let mut removed = 0;
        while self.frames.front().is_some_and(|f| f.timestamp < horizon) {
            self.frames.pop_front();
            removed += 1;
        }
        if removed > 0 {
            trace!("Pruned {} frame(s) older than {}ms", removed, horizon);
        }
        removed
    }

    /// Ordered read-only view, oldest first
    pub fn frames(&self) -> impl DoubleEndedIterator<Item = &KeyboardFrame> + ExactSizeIterator {
        self.frames.iter()
    }

    pub fn latest(&self) -> Option<&KeyboardFrame> {
        self.frames.back()
    }

    /// Frame number of the oldest retained frame
    pub fn oldest_frame_number(&self) -> Option<u64> {
        self.frames.front().map(|f| f.frame_number)
    }

    /// Timestamp of the last accepted frame, even if it has since been pruned
    pub fn last_timestamp(&self) -> Option<u64> {
        self.watermark.map(|w| w.timestamp)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drop all frames but keep the ordering watermark
    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Drop all frames and forget the ordering watermark
    pub fn reset(&mut self) {
        self.frames.clear();
        self.watermark = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn buffer(max_frames: usize, max_age_ms: Option<u64>) -> FrameBuffer {
        FrameBuffer::new(BufferConfig { max_frames, max_age_ms })
    }

    #[test]
    fn test_rejects_duplicate_frame_number() {
        let mut buf = buffer(10, None);
        buf.add_frame(KeyboardFrame::new(1, 0)).unwrap();

        let err = buf.add_frame(KeyboardFrame::new(1, 16)).unwrap_err();
        assert!(matches!(err, EngineError::OutOfOrderFrame { last_frame: 1, got_frame: 1, .. }));
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.latest().unwrap().timestamp, 0);
    }

    #[test]
    fn test_rejects_timestamp_going_backwards() {
        let mut buf = buffer(10, None);
        buf.add_frame(KeyboardFrame::new(1, 100)).unwrap();
        assert!(buf.add_frame(KeyboardFrame::new(2, 99)).is_err());
        // Equal timestamps are accepted
        buf.add_frame(KeyboardFrame::new(2, 100)).unwrap();
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_evicts_by_count() {
        let mut buf = buffer(3, None);
        for n in 1..=5 {
            buf.add_frame(KeyboardFrame::new(n, n * 16)).unwrap();
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.oldest_frame_number(), Some(3));
    }

    #[test]
    fn test_tick_prunes_idle_history() {
        let mut buf = buffer(100, Some(500));
        buf.add_frame(KeyboardFrame::new(1, 0)).unwrap();
        buf.add_frame(KeyboardFrame::new(2, 400)).unwrap();

        assert_eq!(buf.tick(600), 1);
        assert_eq!(buf.oldest_frame_number(), Some(2));
        assert_eq!(buf.tick(2000), 1);
        assert!(buf.is_empty());
        assert_eq!(buf.last_timestamp(), Some(400));
    }

    #[test]
    fn test_clear_keeps_watermark_reset_drops_it() {
        let mut buf = buffer(10, None);
        buf.add_frame(KeyboardFrame::new(5, 80)).unwrap();

        buf.clear();
        assert!(buf.add_frame(KeyboardFrame::new(5, 80)).is_err());

        buf.reset();
        buf.add_frame(KeyboardFrame::new(1, 0)).unwrap();
        assert_eq!(buf.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_out_of_order_leaves_buffer_unchanged(
            steps in prop::collection::vec((0u64..4, 0u64..40), 1..60)
        ) {
            let mut buf = buffer(1000, None);
            let mut frame_number = 0u64;
            let mut ts = 0u64;

            for (dn, dt) in steps {
                let candidate = KeyboardFrame::new(frame_number + dn, ts + dt);
                let before: Vec<u64> = buf.frames().map(|f| f.frame_number).collect();
                match buf.add_frame(candidate) {
                    Ok(()) => {
                        prop_assert!(dn > 0 || before.is_empty());
                        frame_number += dn;
                        ts += dt;
                    }
                    Err(_) => {
                        let after: Vec<u64> = buf.frames().map(|f| f.frame_number).collect();
                        prop_assert_eq!(before, after);
                    }
                }
            }

            let numbers: Vec<u64> = buf.frames().map(|f| f.frame_number).collect();
            prop_assert!(numbers.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn prop_tick_respects_window(
            gaps in prop::collection::vec(1u64..200, 1..80),
            window in 50u64..1000,
            idle in 0u64..2000,
        ) {
            let mut buf = buffer(10_000, Some(window));
            let mut ts = 0u64;
            for (n, gap) in gaps.iter().enumerate() {
                ts += gap;
                buf.add_frame(KeyboardFrame::new(n as u64 + 1, ts)).unwrap();
            }

            let now = ts + idle;
            buf.tick(now);
            prop_assert!(buf.frames().all(|f| f.timestamp >= now.saturating_sub(window)));
        }
    }
}
