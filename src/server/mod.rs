//! TCP command server.
//!
//! The [`Listener`] owns the command port and hands each accepted connection
//! to a [`Session`], one at a time. Each session gets a fresh
//! [`Dispatcher`](crate::dispatch::Dispatcher), so machines never outlive the
//! connection that chose them.

pub mod listener;
pub mod session;

pub use listener::{ACCEPT_SLICE, Listener, ServerHandle};
pub use session::{MAX_LINE_LEN, Session, SessionEnd, SessionSummary};
