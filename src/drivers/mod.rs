//! Built-in machines and the registry CHOOSE resolves names against.

mod bridge;
mod display;
mod echo;

pub use bridge::Bridge;
pub use display::Display;
pub use echo::Echo;

use crate::config::MonitorConfig;
use crate::driver::Driver;
use crate::{MonitorError, Result};

/// Builds a driver instance from the monitor configuration.
pub type Constructor = fn(&MonitorConfig) -> Result<Box<dyn Driver>>;

/// Machine name to constructor, looked up case-insensitively.
#[derive(Clone)]
pub struct DriverRegistry {
    entries: Vec<(&'static str, Constructor)>,
}

impl DriverRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Registry holding every built-in machine.
    pub fn with_builtin() -> Self {
        Self::new()
            .register(Echo::NAME, Echo::new)
            .register(Display::NAME, Display::new)
            .register(Bridge::NAME, Bridge::new)
    }

    /// Add or replace a machine.
    pub fn register(mut self, name: &'static str, constructor: Constructor) -> Self {
        self.entries.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.entries.push((name, constructor));
        self
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(name, _)| *name)
    }

    /// Construct the machine called `name`.
    pub fn build(&self, name: &str, config: &MonitorConfig) -> Result<Box<dyn Driver>> {
        let Some((canonical, constructor)) =
            self.entries.iter().find(|(registered, _)| registered.eq_ignore_ascii_case(name.trim()))
        else {
            return Err(MonitorError::UnknownDriverName {
                name: name.to_string(),
                available: self.names().collect::<Vec<_>>().join(", "),
            });
        };
        constructor(config).map_err(|e| match e {
            MonitorError::DriverConstructionFailed { .. } => e,
            other => MonitorError::DriverConstructionFailed { name: canonical.to_string(), reason: other.to_string() },
        })
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing(_: &MonitorConfig) -> Result<Box<dyn Driver>> {
        Err(MonitorError::device("no such hardware"))
    }

    #[test]
    fn names_match_case_insensitively() {
        let registry = DriverRegistry::with_builtin();
        let driver = registry.build("echo", &MonitorConfig::default()).unwrap();
        assert_eq!(driver.name(), "Echo");
        assert_eq!(registry.build("DISPLAY", &MonitorConfig::default()).unwrap().name(), "Display");
    }

    #[test]
    fn unknown_name_lists_available_machines() {
        let err = DriverRegistry::with_builtin().build("Octopus", &MonitorConfig::default()).err().unwrap();
        match err {
            MonitorError::UnknownDriverName { name, available } => {
                assert_eq!(name, "Octopus");
                assert_eq!(available, "Echo, Display, Bridge");
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn constructor_failures_are_wrapped() {
        let registry = DriverRegistry::new().register("Broken", failing);
        let err = registry.build("broken", &MonitorConfig::default()).err().unwrap();
        assert!(matches!(err, MonitorError::DriverConstructionFailed { ref name, .. } if name == "Broken"));
    }
}
