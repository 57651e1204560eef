//! Key identity normalization
//!
//! Upstream frame producers report keys either as Windows virtual-key codes
//! (`65`) or as names (`"A"`, `"ArrowRight"`). Everything inside the engine uses
//! one canonical form: a lowercase key name.
//!
//! ```text
//!   65          -> "a"
//!   0x27        -> "right"
//!   "ArrowRight"-> "right"
//!   "Control"   -> "ctrl"
//!   "0x70"      -> "f1"
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical key identifier (lowercase name)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "RawKey", into = "String")]
pub struct Key(String);

/// Key as delivered at the boundary: a virtual-key code or a name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum RawKey {
    Code(u32),
    Name(String),
}

impl Key {
    /// Normalize a virtual-key code
    pub fn from_code(code: u32) -> Self {
        Key(vk_to_name(code))
    }

    /// Normalize a key name, folding common aliases
    pub fn from_name(name: &str) -> Self {
        let trimmed = name.trim();
        if trimmed.is_empty() && !name.is_empty() {
            // A literal " " is the space bar
            return Key("space".to_string());
        }

        let lower = trimmed.to_lowercase();
        if let Some(hex) = lower.strip_prefix("0x") {
            if let Ok(code) = u32::from_str_radix(hex, 16) {
                return Key::from_code(code);
            }
        }
        // Multi-digit decimals are virtual-key codes; single digits are digit keys
        if lower.len() > 1 && lower.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(code) = lower.parse::<u32>() {
                return Key::from_code(code);
            }
        }

        Key(canonical_alias(&lower).map(str::to_string).unwrap_or(lower))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<RawKey> for Key {
    fn from(raw: RawKey) -> Self {
        match raw {
            RawKey::Code(code) => Key::from_code(code),
            RawKey::Name(name) => Key::from_name(&name),
        }
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.0
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::from_name(name)
    }
}

impl From<u32> for Key {
    fn from(code: u32) -> Self {
        Key::from_code(code)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl JsonSchema for Key {
    fn schema_name() -> String {
        "Key".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        RawKey::json_schema(gen)
    }
}

/// Map a name alias to its canonical spelling
fn canonical_alias(name: &str) -> Option<&'static str> {
    let canonical = match name {
        "arrowleft" | "leftarrow" => "left",
        "arrowright" | "rightarrow" => "right",
        "arrowup" | "uparrow" => "up",
        "arrowdown" | "downarrow" => "down",
        "control" | "ctl" | "lctrl" | "rctrl" => "ctrl",
        "lshift" | "rshift" => "shift",
        "option" | "menu" | "lalt" | "ralt" => "alt",
        "cmd" | "command" | "win" | "windows" | "super" | "os" => "meta",
        "escape" => "esc",
        "return" => "enter",
        "spacebar" => "space",
        "del" => "delete",
        "ins" => "insert",
        "pgup" => "pageup",
        "pgdn" | "pgdown" => "pagedown",
        "back" => "backspace",
        _ => return None,
    };
    Some(canonical)
}

/// Windows virtual-key code to canonical name
fn vk_to_name(code: u32) -> String {
    match code {
        // 0-9
        0x30..=0x39 => return char::from(b'0' + (code - 0x30) as u8).to_string(),
        // A-Z
        0x41..=0x5A => return char::from(b'a' + (code - 0x41) as u8).to_string(),
        // F1-F24
        0x70..=0x87 => return format!("f{}", code - 0x70 + 1),
        // Numpad 0-9
        0x60..=0x69 => return format!("num{}", code - 0x60),
        _ => {}
    }

    let name = match code {
        0x08 => "backspace",
        0x09 => "tab",
        0x0D => "enter",
        0x10 | 0xA0 | 0xA1 => "shift",
        0x11 | 0xA2 | 0xA3 => "ctrl",
        0x12 | 0xA4 | 0xA5 => "alt",
        0x13 => "pause",
        0x14 => "capslock",
        0x1B => "esc",
        0x20 => "space",
        0x21 => "pageup",
        0x22 => "pagedown",
        0x23 => "end",
        0x24 => "home",
        0x25 => "left",
        0x26 => "up",
        0x27 => "right",
        0x28 => "down",
        0x2C => "printscreen",
        0x2D => "insert",
        0x2E => "delete",
        0x5B | 0x5C => "meta",
        0x6A => "multiply",
        0x6B => "add",
        0x6D => "subtract",
        0x6E => "decimal",
        0x6F => "divide",
        0x90 => "numlock",
        0x91 => "scrolllock",
        _ => return format!("vk_0x{:02x}", code),
    };
    name.to_string()
}

/// All named keys known to the virtual-key table, for `--list-keys`
pub fn known_keys() -> Vec<(u32, Key)> {
    let mut codes: Vec<u32> = vec![
        0x08, 0x09, 0x0D, 0x10, 0x11, 0x12, 0x13, 0x14, 0x1B, 0x20, 0x21, 0x22, 0x23, 0x24,
        0x25, 0x26, 0x27, 0x28, 0x2C, 0x2D, 0x2E, 0x5B, 0x6A, 0x6B, 0x6D, 0x6E, 0x6F, 0x90,
        0x91,
    ];
    codes.extend(0x30..=0x39);
    codes.extend(0x41..=0x5A);
    codes.extend(0x60..=0x69);
    codes.extend(0x70..=0x87);
    codes.sort_unstable();
    codes.into_iter().map(|c| (c, Key::from_code(c))).collect()
}
