//! Loopback machine that echoes validated arguments

use std::sync::LazyLock;

use serde_json::json;
use tracing::debug;

use crate::config::MonitorConfig;
use crate::driver::{Driver, MachineState};
use crate::schema::{Arguments, CommandTable, EnumKind, ParameterSpec, ReturnSpec};
use crate::types::{Command, Packet};
use crate::{MonitorError, Result};

static COMMANDS: LazyLock<Result<CommandTable>> = LazyLock::new(|| {
    CommandTable::builder("Echo")
        .command(Command::Initialize, vec![], vec![ReturnSpec::new("machine", "name of the machine")])
        .command(
            Command::Setup,
            vec![
                ParameterSpec::number("bgLum", 0.0, 3183.1)
                    .or_default(json!(10))
                    .describe("background luminance in cd/m²"),
                ParameterSpec::symbol("viewMode", EnumKind::ViewMode).or_default(json!("MONO")),
            ],
            vec![ReturnSpec::new("bgLum", "echoed"), ReturnSpec::new("viewMode", "echoed")],
        )
        .command(
            Command::Present,
            vec![
                ParameterSpec::number("x", -90.0, 90.0).describe("x coordinate in degrees"),
                ParameterSpec::number("y", -90.0, 90.0).describe("y coordinate in degrees"),
                ParameterSpec::symbol("eye", EnumKind::Eye).optional(),
            ],
            vec![ReturnSpec::new("x", "echoed"), ReturnSpec::new("y", "echoed")],
        )
        .build()
});

/// Echoes every command's validated arguments; useful for client development.
#[derive(Debug)]
pub struct Echo {
    state: MachineState,
    commands: &'static CommandTable,
}

impl Echo {
    pub const NAME: &'static str = "Echo";

    pub fn new(_config: &MonitorConfig) -> Result<Box<dyn Driver>> {
        Ok(Box::new(Self { state: MachineState::default(), commands: table()? }))
    }
}

fn table() -> Result<&'static CommandTable> {
    COMMANDS.as_ref().map_err(|e| MonitorError::DriverConstructionFailed {
        name: Echo::NAME.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait::async_trait]
impl Driver for Echo {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn commands(&self) -> &'static CommandTable {
        self.commands
    }

    async fn initialize(&mut self, _args: &Arguments) -> Result<Packet> {
        self.state.mark_initialized();
        Ok(Packet::object(json!({"machine": Self::NAME})))
    }

    async fn setup(&mut self, args: &Arguments) -> Result<Packet> {
        debug!(args = %args.to_json(), "Echo setup");
        Ok(Packet::object(args.to_json()))
    }

    async fn present(&mut self, args: &Arguments) -> Result<Packet> {
        let n = self.state.next_presentation();
        debug!(n, args = %args.to_json(), "Echo present");
        Ok(Packet::object(args.to_json()))
    }

    async fn close(&mut self, _args: &Arguments) -> Result<Packet> {
        self.state.mark_closed();
        Ok(Packet::text(format!("{} closed after {} presentations", Self::NAME, self.state.presentations())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::invoke;

    #[tokio::test]
    async fn present_echoes_normalized_arguments() {
        let mut echo = Echo::new(&MonitorConfig::default()).unwrap();
        let request = json!({"x": 3, "y": -4.5, "eye": "left", "ignored": true});
        let args = echo.commands().validate(Command::Present, request.as_object().unwrap()).unwrap();

        let packet = invoke(echo.as_mut(), &args).await.unwrap();
        assert!(!packet.is_error);
        assert_eq!(packet.to_line(), r#"{"error":0,"close":false,"msg":{"eye":"LEFT","x":3,"y":-4.5}}"#);
    }

    #[tokio::test]
    async fn setup_fills_defaults() {
        let mut echo = Echo::new(&MonitorConfig::default()).unwrap();
        let args = echo.commands().validate(Command::Setup, &serde_json::Map::new()).unwrap();
        let packet = invoke(echo.as_mut(), &args).await.unwrap();
        assert_eq!(packet.to_line(), r#"{"error":0,"close":false,"msg":{"bgLum":10,"viewMode":"MONO"}}"#);
    }

    #[tokio::test]
    async fn query_reports_the_command_table() {
        let mut echo = Echo::new(&MonitorConfig::default()).unwrap();
        let packet = invoke(echo.as_mut(), &Arguments::empty(Command::Query)).await.unwrap();
        let line: serde_json::Value = serde_json::from_str(&packet.to_line()).unwrap();
        assert_eq!(line["msg"]["machine"], json!("Echo"));
        assert_eq!(line["msg"]["commands"]["present"]["parameters"][0]["name"], json!("x"));
    }
}
