//! Keyboard frame types
//!
//! A frame is one discretized sample of keyboard state produced by the
//! upstream hook (~60 Hz). `FrameRecord` is the wire form read from frame
//! logs and stdin; it carries raw keys which are normalized on conversion.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::keys::{Key, RawKey};

/// One sample of keyboard state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyboardFrame {
    /// Monotonic frame counter
    pub frame_number: u64,
    /// Monotonic timestamp in milliseconds
    pub timestamp: u64,
    /// Keys that went down on this frame
    pub just_pressed: BTreeSet<Key>,
    /// Keys that were already down before this frame and still are
    pub held_keys: BTreeSet<Key>,
    /// Keys that went up on this frame
    pub just_released: BTreeSet<Key>,
    /// How long each down key has been held (authoritative)
    pub hold_durations: BTreeMap<Key, u64>,
}

impl KeyboardFrame {
    /// Create an empty frame
    pub fn new(frame_number: u64, timestamp: u64) -> Self {
        Self {
            frame_number,
            timestamp,
            ..Default::default()
        }
    }

    pub fn with_pressed<K: Into<Key>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.just_pressed.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn with_held<K: Into<Key>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.held_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn with_released<K: Into<Key>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.just_released.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn with_hold_duration(mut self, key: impl Into<Key>, ms: u64) -> Self {
        self.hold_durations.insert(key.into(), ms);
        self
    }

    /// Hold duration for a key (0 when not reported)
    pub fn hold_duration(&self, key: &Key) -> u64 {
        self.hold_durations.get(key).copied().unwrap_or(0)
    }

    /// Key is physically down on this frame (held or just pressed)
    pub fn is_down(&self, key: &Key) -> bool {
        self.held_keys.contains(key) || self.just_pressed.contains(key)
    }

    /// Frame carries no key activity at all
    pub fn is_idle(&self) -> bool {
        self.just_pressed.is_empty() && self.held_keys.is_empty() && self.just_released.is_empty()
    }
}

/// Wire form of a frame (frame logs, stdin in live mode)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FrameRecord {
    #[serde(alias = "frameNumber")]
    pub frame_number: u64,
    pub timestamp: u64,
    #[serde(default, alias = "justPressed")]
    pub just_pressed: Vec<RawKey>,
    #[serde(default, alias = "heldKeys")]
    pub held_keys: Vec<RawKey>,
    #[serde(default, alias = "justReleased")]
    pub just_released: Vec<RawKey>,
    /// Keyed by name; `0x41` and multi-digit `65` names are read as
    /// virtual-key codes
    #[serde(default, alias = "holdDurations")]
    pub hold_durations: HashMap<String, u64>,
}

impl From<FrameRecord> for KeyboardFrame {
    fn from(record: FrameRecord) -> Self {
        let normalize = |keys: Vec<RawKey>| keys.into_iter().map(Key::from).collect();

        Self {
            frame_number: record.frame_number,
            timestamp: record.timestamp,
            just_pressed: normalize(record.just_pressed),
            held_keys: normalize(record.held_keys),
            just_released: normalize(record.just_released),
            hold_durations: record
                .hold_durations
                .into_iter()
                .map(|(name, ms)| (Key::from_name(&name), ms))
                .collect(),
        }
    }
}
