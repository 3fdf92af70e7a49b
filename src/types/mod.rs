//! Core protocol and camera types.
//!
//! - [`Packet`] is the unit every handler returns and the session serializes
//! - [`Command`] is the closed set of protocol commands
//! - [`FrameInfo`] is a time-stamped camera image living in a ring buffer slot
//! - [`Eye`] identifies a tracked eye on the camera side
//!
//! ## Usage Example
//!
//! ```rust
//! use perimon::types::{Command, Packet};
//!
//! let command: Command = "present".parse().unwrap();
//! assert_eq!(command, Command::Present);
//!
//! let line = Packet::text("ok").to_line();
//! assert_eq!(line, r#"{"error":0,"close":false,"msg":"ok"}"#);
//! ```

mod command;
mod eye;
mod frame;
mod packet;

pub use command::Command;
pub use eye::Eye;
pub use frame::{FrameInfo, INVALID_TIMESTAMP};
pub use packet::{Packet, Payload};

use std::sync::LazyLock;
use std::time::Instant;

static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Milliseconds on the process-wide monotonic clock.
///
/// Frame timestamps, stimulus onsets and pupil requests all use this clock so
/// they can be compared directly.
pub fn monotonic_ms() -> i64 {
    EPOCH.elapsed().as_millis() as i64
}
