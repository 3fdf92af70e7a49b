//! Tracked eye identifiers

use serde::{Deserialize, Serialize};

/// Eye tracked by the pupil camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    /// Both tracked eyes, left first.
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];

    /// Code used on the camera stream (0 = left, 1 = right).
    pub fn wire_code(self) -> u8 {
        match self {
            Eye::Left => 0,
            Eye::Right => 1,
        }
    }

    /// Decode a camera stream eye code.
    pub fn from_wire_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Eye::Left),
            1 => Some(Eye::Right),
            _ => None,
        }
    }

    /// Slot index for per-eye storage.
    pub(crate) fn index(self) -> usize {
        self.wire_code() as usize
    }
}
