//! Device-control monitor for visual-field perimeters.
//!
//! Perimon accepts line-delimited Json commands over TCP, routes them to a
//! pluggable perimeter driver and, for display-based machines, runs a stimulus
//! presentation loop correlated with live pupil tracking.
//!
//! # Features
//!
//! - **Command protocol**: CHOOSE, INITIALIZE, QUERY, SETUP, PRESENT, CLOSE
//! - **Declarative schemas**: every request is validated before a driver sees it
//! - **Pupil tracking**: per-eye frame history with time-correlated pupil queries
//! - **Presentation loop**: render thread driven through a watch-channel handshake
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use perimon::{DriverRegistry, Listener, MonitorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = Listener::bind(MonitorConfig::default(), DriverRegistry::with_builtin()).await?;
//!     let server = listener.spawn();
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! A client session then looks like:
//!
//! ```text
//! > {"command": "CHOOSE", "machine": "Echo"}
//! < {"error":0,"close":false,"msg":"Echo chosen"}
//! > {"command": "PRESENT", "x": 0, "y": 0}
//! < {"error":0,"close":false,"msg":{"x":0,"y":0}}
//! > {"command": "CLOSE"}
//! < {"error":0,"close":true,"msg":"Echo closed after 1 presentations"}
//! ```

// Core types and error handling
pub mod buffer;
pub mod config;
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Command handling
pub mod dispatch;
pub mod driver;
pub mod drivers;
pub mod schema;
pub mod server;

// Real-time subsystems
pub mod camera;
pub mod presentation;

// Core exports
pub use buffer::RingBuffer;
pub use config::MonitorConfig;
pub use error::*;
pub use types::*;

// Command handling exports
pub use dispatch::Dispatcher;
pub use driver::{Driver, MachineState};
pub use drivers::DriverRegistry;
pub use server::{Listener, ServerHandle};
