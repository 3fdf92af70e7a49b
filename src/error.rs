//! Error types for the monitor.
//!
//! Every failure a client can trigger maps onto a [`MonitorError`] variant and is
//! reported back as an error [`Packet`](crate::Packet) with `close: false`, so the
//! session stays open for a retry. Two variants never reach a client:
//!
//! - **TransportFailure**: socket I/O failed, the affected session is torn down
//! - **PipelineOverflow**: a pupil channel was full, the sample is dropped and logged
//!
//! ## Classification
//!
//! ```rust
//! use perimon::MonitorError;
//!
//! let error = MonitorError::missing_parameter("x", "PRESENT");
//! assert!(error.is_client_error());
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

/// Result type alias for monitor operations.
pub type Result<T, E = MonitorError> = std::result::Result<T, E>;

/// Main error type for monitor operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MonitorError {
    #[error("{input} is not a valid Json object: {details}")]
    MalformedMessage { input: String, details: String },

    #[error("Json message does not contain a 'command' field")]
    MissingCommandField,

    #[error("'{name}' is not a valid command")]
    UnknownCommand { name: String },

    #[error("No machine has been chosen yet. Send CHOOSE first")]
    NoActiveDriver,

    #[error("Machine '{name}' is initialized. Send CLOSE before choosing another machine")]
    DriverAlreadyActive { name: String },

    #[error("Machine '{name}' is not known. Available machines: {available}")]
    UnknownDriverName { name: String, available: String },

    #[error("Could not construct machine '{name}': {reason}")]
    DriverConstructionFailed { name: String, reason: String },

    #[error("Parameter '{name}' is missing for command {command}")]
    MissingParameter { name: String, command: String },

    #[error("Parameter '{name}' expects {expected}, received {found}")]
    TypeMismatch { name: String, expected: String, found: String },

    #[error("Value '{value}' for parameter '{name}' is not one of {allowed}")]
    NotInEnum { name: String, value: String, allowed: String },

    #[error("Value {value} for parameter '{name}' is outside [{min}, {max}]")]
    OutOfRange { name: String, value: f64, min: f64, max: f64 },

    #[error("Command {command} failed: {reason}")]
    InvocationFailed { command: String, reason: String },

    #[error("Transport failure: {context}")]
    TransportFailure {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Pupil {channel} channel is full, sample dropped")]
    PipelineOverflow { channel: &'static str },

    #[error("Buffer operation failed: {context}")]
    Buffer { context: String },

    #[error("Operation timed out after {duration:?}: {operation}")]
    Timeout { operation: String, duration: Duration },

    #[error("Device error: {reason}")]
    Device {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Configuration error: {reason}")]
    Config { reason: String },
}

impl MonitorError {
    /// Returns whether this error is reported to the client as an error packet.
    ///
    /// Transport failures and pipeline overflows are handled where they occur.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            MonitorError::TransportFailure { .. } | MonitorError::PipelineOverflow { .. }
        )
    }

    /// Returns whether this error ends the session that produced it.
    pub fn terminates_session(&self) -> bool {
        matches!(self, MonitorError::TransportFailure { .. })
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            MonitorError::MalformedMessage { .. } | MonitorError::MissingCommandField => vec![
                "Send one Json object per line",
                "Include a 'command' field naming the operation",
            ],
            MonitorError::UnknownCommand { .. } => {
                vec!["Use one of CHOOSE, INITIALIZE, QUERY, SETUP, PRESENT, CLOSE"]
            }
            MonitorError::NoActiveDriver => vec!["Send CHOOSE with a 'machine' field first"],
            MonitorError::DriverAlreadyActive { .. } => {
                vec!["Send CLOSE to release the current machine", "Then CHOOSE again"]
            }
            MonitorError::UnknownDriverName { .. } => vec![
                "Check the machine name spelling",
                "Use one of the machines listed in the message",
            ],
            MonitorError::DriverConstructionFailed { .. } | MonitorError::Device { .. } => vec![
                "Check the device is powered and reachable",
                "Check the monitor configuration for this machine",
            ],
            MonitorError::MissingParameter { .. }
            | MonitorError::TypeMismatch { .. }
            | MonitorError::NotInEnum { .. }
            | MonitorError::OutOfRange { .. } => vec![
                "Send QUERY to list the parameters each command expects",
                "Check parameter names, types and ranges",
            ],
            MonitorError::InvocationFailed { .. } => vec![
                "Check the machine was initialized",
                "Inspect the monitor log for the device failure",
            ],
            MonitorError::TransportFailure { .. } => {
                vec!["Reconnect to the monitor", "Check network connectivity"]
            }
            MonitorError::PipelineOverflow { .. } => vec![
                "Reduce the rate of pupil queries",
                "Check the acquisition thread is running",
            ],
            MonitorError::Buffer { .. } => vec!["Use a buffer capacity greater than zero"],
            MonitorError::Timeout { .. } => vec![
                "Increase the configured timeout",
                "Check the render loop is running",
            ],
            MonitorError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Check port numbers and intervals are in range",
            ],
        }
    }

    /// Helper constructor for missing parameter errors.
    pub fn missing_parameter(name: impl Into<String>, command: impl Into<String>) -> Self {
        MonitorError::MissingParameter { name: name.into(), command: command.into() }
    }

    /// Helper constructor for type mismatch errors.
    pub fn type_mismatch(
        name: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        MonitorError::TypeMismatch { name: name.into(), expected: expected.into(), found: found.into() }
    }

    /// Helper constructor for wrapping a driver failure.
    pub fn invocation_failed(command: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        MonitorError::InvocationFailed { command: command.into(), reason: reason.to_string() }
    }

    /// Helper constructor for transport failures.
    pub fn transport(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        MonitorError::TransportFailure { context: context.into(), source: Some(Box::new(source)) }
    }

    /// Helper constructor for device failures without an underlying cause.
    pub fn device(reason: impl Into<String>) -> Self {
        MonitorError::Device { reason: reason.into(), source: None }
    }

    /// Helper constructor for device failures with an underlying cause.
    pub fn device_with_source(
        reason: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        MonitorError::Device { reason: reason.into(), source: Some(Box::new(source)) }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        MonitorError::Config { reason: reason.into() }
    }
}

impl From<std::io::Error> for MonitorError {
    fn from(err: std::io::Error) -> Self {
        MonitorError::TransportFailure { context: "socket I/O".to_string(), source: Some(Box::new(err)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn client_errors_mention_their_context(
            name in "[a-zA-Z][a-zA-Z0-9]*",
            command in "[A-Z]+",
            value in -1000.0f64..1000.0
          ) {
            let missing = MonitorError::missing_parameter(name.clone(), command.clone());
            let msg = missing.to_string();
            prop_assert!(msg.contains(&name));
            prop_assert!(msg.contains(&command));

            let range = MonitorError::OutOfRange { name: name.clone(), value, min: 0.0, max: 1.0 };
            prop_assert!(range.to_string().contains(&name));
            prop_assert!(range.is_client_error());
            prop_assert!(!range.terminates_session());
          }

          #[test]
          fn malformed_message_always_says_not_json(input in ".*", details in ".*") {
            let error = MonitorError::MalformedMessage { input, details };
            prop_assert!(error.to_string().contains("is not a valid Json object"));
          }
        }
    }

    #[test]
    fn transport_and_overflow_stay_off_the_wire() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let transport: MonitorError = io_err.into();
        assert!(!transport.is_client_error());
        assert!(transport.terminates_session());

        let overflow = MonitorError::PipelineOverflow { channel: "responses" };
        assert!(!overflow.is_client_error());
        assert!(!overflow.terminates_session());
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<MonitorError>();

        let error = MonitorError::device("camera unplugged");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn source_chain_is_preserved() {
        let io_err = std::io::Error::other("connection reset");
        let error = MonitorError::device_with_source("bridge write", io_err);
        let source = std::error::Error::source(&error).expect("source kept");
        assert_eq!(source.to_string(), "connection reset");
    }

    #[test]
    fn every_variant_has_suggestions() {
        let errors = vec![
            MonitorError::MissingCommandField,
            MonitorError::NoActiveDriver,
            MonitorError::UnknownCommand { name: "FOO".into() },
            MonitorError::PipelineOverflow { channel: "requests" },
            MonitorError::config("bad port"),
            MonitorError::Timeout { operation: "present".into(), duration: Duration::from_secs(1) },
        ];
        for error in errors {
            assert!(!error.recovery_suggestions().is_empty(), "{error}");
        }
    }
}
