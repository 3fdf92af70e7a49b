//! Monitor configuration
//!
//! Loaded from a YAML file; every field has a default so a partial file (or
//! no file at all) is valid.
//!
//! ```yaml
//! port: 50001
//! camera:
//!   enabled: true
//!   width: 320
//!   height: 240
//!   stream_port: 50008
//! pupil:
//!   buffer_capacity: 30
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::camera::store::DEFAULT_CAPACITY;
use crate::{MonitorError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Address the command listener binds to
    pub bind_address: IpAddr,
    /// Command listener port
    pub port: u16,
    pub camera: CameraConfig,
    pub display: DisplayConfig,
    pub pupil: PupilConfig,
    pub bridge: BridgeConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 50001,
            camera: CameraConfig::default(),
            display: DisplayConfig::default(),
            pupil: PupilConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

/// Pupil camera and viewer stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Track pupils during presentations
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    /// Acquisition tick in milliseconds
    pub interval_ms: u64,
    /// Port of the camera viewer stream, `None` disables the stream
    pub stream_port: Option<u16>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self { enabled: true, width: 320, height: 240, interval_ms: 50, stream_port: Some(50008) }
    }
}

/// Render loop timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Render loop frame interval in milliseconds
    pub frame_interval_ms: u64,
    /// Allowance on top of a stimulus response window before a submit times out
    pub instruction_timeout_ms: u64,
    /// Reaction time of the simulated observer of the headless renderer
    pub simulated_reaction_ms: Option<u64>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { frame_interval_ms: 16, instruction_timeout_ms: 5_000, simulated_reaction_ms: None }
    }
}

/// Pupil request pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PupilConfig {
    /// Frames kept per eye
    pub buffer_capacity: usize,
    /// How long PRESENT waits for pupil responses
    pub response_timeout_ms: u64,
    /// Grey level below which a pixel counts as pupil
    pub threshold: u8,
}

impl Default for PupilConfig {
    fn default() -> Self {
        Self { buffer_capacity: DEFAULT_CAPACITY, response_timeout_ms: 1_000, threshold: 60 }
    }
}

/// Legacy bridge transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub connect_timeout_ms: u64,
    pub reply_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { connect_timeout_ms: 2_000, reply_timeout_ms: 5_000 }
    }
}

impl MonitorConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)
            .map_err(|e| MonitorError::config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| MonitorError::config(format!("cannot read {}: {e}", path.display())))?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_yaml_str(&yaml)
    }

    /// Check value ranges and port conflicts.
    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(MonitorError::config("camera width and height must be positive"));
        }
        if self.camera.interval_ms == 0 {
            return Err(MonitorError::config("camera.interval_ms must be positive"));
        }
        if self.display.frame_interval_ms == 0 {
            return Err(MonitorError::config("display.frame_interval_ms must be positive"));
        }
        if self.pupil.buffer_capacity == 0 {
            return Err(MonitorError::config("pupil.buffer_capacity must be positive"));
        }
        if self.port != 0 && self.camera.stream_port == Some(self.port) {
            return Err(MonitorError::config(format!(
                "camera.stream_port {} collides with the command port",
                self.port
            )));
        }
        Ok(())
    }

    /// Address of the command listener.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Address of the camera viewer stream, when enabled.
    pub fn stream_addr(&self) -> Option<SocketAddr> {
        self.camera.stream_port.filter(|_| self.camera.enabled).map(|port| SocketAddr::new(self.bind_address, port))
    }

    pub fn acquisition_interval(&self) -> Duration {
        Duration::from_millis(self.camera.interval_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.display.frame_interval_ms)
    }

    pub fn pupil_timeout(&self) -> Duration {
        Duration::from_millis(self.pupil.response_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = MonitorConfig::from_yaml_str("port: 6000\ncamera:\n  width: 64\n").unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.camera.width, 64);
        assert_eq!(config.camera.height, 240);
        assert_eq!(config.pupil.buffer_capacity, DEFAULT_CAPACITY);
    }

    #[test]
    fn empty_document_is_the_default() {
        assert_eq!(MonitorConfig::from_yaml_str("{}").unwrap(), MonitorConfig::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        for yaml in [
            "pupil:\n  buffer_capacity: 0\n",
            "camera:\n  interval_ms: 0\n",
            "port: 7000\ncamera:\n  stream_port: 7000\n",
            "port: not-a-number\n",
        ] {
            let err = MonitorConfig::from_yaml_str(yaml).unwrap_err();
            assert!(matches!(err, MonitorError::Config { .. }), "{yaml}: {err}");
        }
    }

    #[test]
    fn disabled_camera_has_no_stream() {
        let mut config = MonitorConfig::default();
        assert!(config.stream_addr().is_some());
        config.camera.enabled = false;
        assert!(config.stream_addr().is_none());
    }
}
