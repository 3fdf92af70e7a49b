//! Test utilities shared by unit tests, integration tests and benches
//!
//! Provides scripted collaborators (a driver, a renderer) and small builders
//! so tests across the crate exercise the same fixtures.

#![cfg(any(test, feature = "benchmark"))]

use std::cell::Cell;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use serde_json::json;

use crate::config::MonitorConfig;
use crate::driver::{Driver, MachineState};
use crate::presentation::{BackgroundSpec, ObserverResponse, Renderer, ResponseButton, Stimulus};
use crate::schema::{Arguments, CommandTable, ParameterSpec};
use crate::types::{Command, FrameInfo, Packet, monotonic_ms};
use crate::{MonitorError, Result};

/// Stimulus at the origin whose duration and response window are both `window_ms`.
pub fn stimulus(window_ms: u64) -> Stimulus {
    Stimulus {
        eyes: vec!["LEFT".to_string()],
        x: 0.0,
        y: 0.0,
        sx: 0.43,
        sy: 0.43,
        luminance: 100.0,
        shape: "CIRCLE".to_string(),
        texture: "FLAT".to_string(),
        duration_ms: window_ms,
        window_ms,
        colours: None,
    }
}

/// Frame of `width` × `height` pixels, all set to `value`, stamped `timestamp_ms`.
pub fn uniform_frame(timestamp_ms: i64, width: u32, height: u32, value: u8) -> FrameInfo {
    FrameInfo { timestamp_ms, width, height, pixels: vec![value; (width * height) as usize] }
}

/// Configuration suited to fast tests: ephemeral port, no camera, quick timings.
pub fn test_config() -> MonitorConfig {
    let mut config = MonitorConfig::default();
    config.port = 0;
    config.camera.enabled = false;
    config.camera.stream_port = None;
    config.display.frame_interval_ms = 1;
    config.display.instruction_timeout_ms = 1_000;
    config.display.simulated_reaction_ms = Some(5);
    config
}

/// Renderer call recorded by [`RecordingRenderer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderCall {
    Show,
    Hide,
    Background,
    Present,
    Clear,
}

/// Renderer that records every call and responds only to its button.
pub struct RecordingRenderer {
    calls: Arc<Mutex<Vec<RenderCall>>>,
    button: ResponseButton,
}

impl RecordingRenderer {
    /// Renderer plus a handle on the calls it records.
    pub fn new() -> (Self, Arc<Mutex<Vec<RenderCall>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (Self { calls: Arc::clone(&calls), button: ResponseButton::default() }, calls)
    }

    /// Button whose press the next poll reports.
    pub fn button(&self) -> ResponseButton {
        self.button.clone()
    }

    fn record(&self, call: RenderCall) -> Result<()> {
        self.calls.lock().push(call);
        Ok(())
    }
}

impl Renderer for RecordingRenderer {
    fn show(&mut self) -> Result<()> {
        self.record(RenderCall::Show)
    }

    fn hide(&mut self) -> Result<()> {
        self.record(RenderCall::Hide)
    }

    fn set_background(&mut self, _background: &BackgroundSpec) -> Result<()> {
        self.record(RenderCall::Background)
    }

    fn present_stimulus(&mut self, _stimulus: &Stimulus) -> Result<()> {
        self.record(RenderCall::Present)
    }

    fn clear_stimulus(&mut self) -> Result<()> {
        self.record(RenderCall::Clear)
    }

    fn poll_response(&mut self) -> Option<ObserverResponse> {
        self.button.take().then(|| ObserverResponse { at_ms: monotonic_ms() })
    }
}

static SCRIPTED_COMMANDS: LazyLock<Result<CommandTable>> = LazyLock::new(|| {
    let fail = || ParameterSpec::number("fail", 0.0, 1.0).or_default(json!(0));
    CommandTable::builder(ScriptedDriver::NAME)
        .command(Command::Initialize, vec![fail()], vec![])
        .command(Command::Setup, vec![fail()], vec![])
        .command(Command::Present, vec![fail()], vec![])
        .command(Command::Close, vec![fail()], vec![])
        .build()
});

thread_local! {
    static CLOSES: Cell<usize> = const { Cell::new(0) };
}

/// Driver whose commands fail when called with `"fail": 1`.
///
/// Counts `close` calls per thread, so concurrently running tests do not see
/// each other's closes.
pub struct ScriptedDriver {
    state: MachineState,
    commands: &'static CommandTable,
}

impl ScriptedDriver {
    pub const NAME: &'static str = "Scripted";

    pub fn new(_config: &MonitorConfig) -> Result<Box<dyn Driver>> {
        let commands = SCRIPTED_COMMANDS.as_ref().map_err(|e| MonitorError::DriverConstructionFailed {
            name: Self::NAME.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(Self { state: MachineState::default(), commands }))
    }

    /// Number of `close` calls made on this thread.
    pub fn closes() -> usize {
        CLOSES.with(Cell::get)
    }

    fn outcome(command: Command, args: &Arguments) -> Result<Packet> {
        let fail = args.get("fail").and_then(|value| value.as_f64()).unwrap_or(0.0);
        if fail >= 0.5 {
            return Err(MonitorError::device(format!("scripted {command} failure")));
        }
        Ok(Packet::text(format!("scripted {command}")))
    }
}

#[async_trait::async_trait]
impl Driver for ScriptedDriver {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn commands(&self) -> &'static CommandTable {
        self.commands
    }

    async fn initialize(&mut self, args: &Arguments) -> Result<Packet> {
        let packet = Self::outcome(Command::Initialize, args)?;
        self.state.mark_initialized();
        Ok(packet)
    }

    async fn setup(&mut self, args: &Arguments) -> Result<Packet> {
        Self::outcome(Command::Setup, args)
    }

    async fn present(&mut self, args: &Arguments) -> Result<Packet> {
        self.state.next_presentation();
        Self::outcome(Command::Present, args)
    }

    async fn close(&mut self, args: &Arguments) -> Result<Packet> {
        CLOSES.with(|closes| closes.set(closes.get() + 1));
        self.state.mark_closed();
        Self::outcome(Command::Close, args)
    }
}
