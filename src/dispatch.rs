//! Request parsing and routing to the active driver

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::driver::{self, Driver};
use crate::drivers::DriverRegistry;
use crate::schema::{self, Arguments, ParameterSpec, json_kind};
use crate::types::{Command, Packet};
use crate::{MonitorError, Result};

/// Longest slice of a malformed request echoed back in the error message.
const MAX_ECHOED_INPUT: usize = 200;

struct ActiveDriver {
    driver: Box<dyn Driver>,
    initialized: bool,
}

/// Per-session command router.
///
/// Owns at most one driver at a time. Every request produces exactly one
/// [`Packet`]; errors become error packets and leave the session open,
/// except for CLOSE which always ends it.
pub struct Dispatcher {
    registry: Arc<DriverRegistry>,
    config: Arc<MonitorConfig>,
    active: Option<ActiveDriver>,
}

impl Dispatcher {
    pub fn new(registry: Arc<DriverRegistry>, config: Arc<MonitorConfig>) -> Self {
        Self { registry, config, active: None }
    }

    /// Name of the chosen machine, if any.
    pub fn active_machine(&self) -> Option<&'static str> {
        self.active.as_ref().map(|active| active.driver.name())
    }

    /// Whether the chosen machine has been initialized.
    pub fn is_initialized(&self) -> bool {
        self.active.as_ref().is_some_and(|active| active.initialized)
    }

    /// Handle one request line and build its response.
    pub async fn handle_line(&mut self, line: &str) -> Packet {
        match self.handle(line).await {
            Ok(packet) => packet,
            Err(e) if e.is_client_error() => {
                debug!("Request failed: {}", e);
                Packet::from(&e)
            }
            Err(e) => {
                warn!("Request failed outside the protocol: {}", e);
                Packet::from(&e)
            }
        }
    }

    async fn handle(&mut self, line: &str) -> Result<Packet> {
        let (command, fields) = parse_request(line)?;
        debug!(%command, "Request received");
        match command {
            Command::Choose => self.choose(&fields).await,
            other => self.invoke(other, &fields).await,
        }
    }

    async fn choose(&mut self, fields: &Map<String, Value>) -> Result<Packet> {
        let specs = [ParameterSpec::text("machine").describe("name of the machine to drive")];
        let args = schema::validate(Command::Choose, &specs, fields)?;
        let name = args.text("machine")?;

        if let Some(active) = self.active.as_ref().filter(|active| active.initialized) {
            return Err(MonitorError::DriverAlreadyActive { name: active.driver.name().to_string() });
        }

        let driver = self.registry.build(name, &self.config)?;
        if let Some(previous) = self.active.take() {
            close_quietly(previous.driver).await;
        }

        let chosen = driver.name();
        info!(machine = chosen, "Machine chosen");
        self.active = Some(ActiveDriver { driver, initialized: false });
        Ok(Packet::text(format!("{chosen} chosen")))
    }

    async fn invoke(&mut self, command: Command, fields: &Map<String, Value>) -> Result<Packet> {
        let active = self.active.as_mut().ok_or(MonitorError::NoActiveDriver)?;
        let args = active.driver.commands().validate(command, fields)?;

        if command == Command::Close {
            return Ok(self.close(&args).await);
        }

        let packet = driver::invoke(active.driver.as_mut(), &args)
            .await
            .map_err(|e| MonitorError::invocation_failed(command.as_str(), e))?;
        if command == Command::Initialize {
            active.initialized = true;
            info!(machine = active.driver.name(), "Machine initialized");
        }
        Ok(packet)
    }

    /// Close and release the active driver; the packet always ends the session.
    async fn close(&mut self, args: &Arguments) -> Packet {
        let Some(mut active) = self.active.take() else {
            return Packet::from(MonitorError::NoActiveDriver).closing();
        };
        let name = active.driver.name();
        match driver::invoke(active.driver.as_mut(), args).await {
            Ok(packet) => {
                info!(machine = name, "Machine closed");
                packet.closing()
            }
            Err(e) => {
                warn!(machine = name, "Machine close failed: {}", e);
                Packet::from(MonitorError::invocation_failed(Command::Close.as_str(), e)).closing()
            }
        }
    }

    /// Release the active driver, if any. Called when the session ends.
    pub async fn shutdown(&mut self) {
        if let Some(active) = self.active.take() {
            info!(machine = active.driver.name(), "Closing machine left open by the session");
            close_quietly(active.driver).await;
        }
    }
}

async fn close_quietly(mut driver: Box<dyn Driver>) {
    if let Err(e) = driver.close(&Arguments::empty(Command::Close)).await {
        warn!(machine = driver.name(), "Close failed: {}", e);
    }
}

/// Split a request line into its command and remaining fields.
pub fn parse_request(line: &str) -> Result<(Command, Map<String, Value>)> {
    let malformed = |details: String| MonitorError::MalformedMessage {
        input: line.trim().chars().take(MAX_ECHOED_INPUT).collect(),
        details,
    };
    let mut fields = match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(fields)) => fields,
        Ok(other) => return Err(malformed(format!("expected an object, found {}", json_kind(&other)))),
        Err(e) => return Err(malformed(e.to_string())),
    };

    let command = match fields.remove("command") {
        None | Some(Value::Null) => return Err(MonitorError::MissingCommandField),
        Some(Value::String(name)) => name.parse()?,
        Some(other) => return Err(MonitorError::UnknownCommand { name: other.to_string() }),
    };
    Ok((command, fields))
}
