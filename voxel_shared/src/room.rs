//! Room keys.
//!
//! Rooms are named partitions of peers and world state. Every key that reaches
//! the rest of the system has been normalized: trimmed, uppercased, at most
//! [`MAX_ROOM_KEY_CHARS`] characters, never empty.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Room used when the client names none.
pub const DEFAULT_ROOM: &str = "GLOBAL";

/// Maximum room key length in characters.
pub const MAX_ROOM_KEY_CHARS: usize = 32;

/// Normalized room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomKey(String);

impl RoomKey {
    /// The `GLOBAL` room every peer starts in.
    pub fn global() -> Self {
        RoomKey(DEFAULT_ROOM.to_string())
    }

    /// Normalizes a raw JSON value. Non-strings and blank strings map to `GLOBAL`.
    pub fn normalize(raw: Option<&Value>) -> Self {
        match raw {
            Some(Value::String(s)) => Self::normalize_str(s),
            _ => Self::global(),
        }
    }

    pub fn normalize_str(raw: &str) -> Self {
        let key: String = raw
            .trim()
            .to_uppercase()
            .chars()
            .take(MAX_ROOM_KEY_CHARS)
            .collect();
        if key.is_empty() {
            Self::global()
        } else {
            RoomKey(key)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RoomKey {
    fn default() -> Self {
        Self::global()
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
