//! Display-based perimeter with optional pupil tracking

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::camera::pipeline::{self, PupilClient, PupilResponse};
use crate::camera::{Acquisition, CameraStream, DarkBlobDetector, FrameStore, SyntheticCamera};
use crate::config::MonitorConfig;
use crate::driver::{Driver, MachineState};
use crate::presentation::{
    BackgroundSpec, Fixation, HeadlessRenderer, Instruction, PresentationController, RenderThread, Stimulus,
};
use crate::schema::{Arguments, CommandTable, EnumKind, ParameterSpec, ReturnSpec};
use crate::types::{Command, Eye, Packet};
use crate::{MonitorError, Result};

/// Highest luminance a display can be asked for, in cd/m².
const MAX_LUMINANCE: f64 = 3183.1;

static COMMANDS: LazyLock<Result<CommandTable>> = LazyLock::new(|| {
    CommandTable::builder(Display::NAME)
        .command(
            Command::Initialize,
            vec![
                ParameterSpec::symbol("viewMode", EnumKind::ViewMode).or_default(json!("MONO")),
                ParameterSpec::number("tracking", 0.0, 1.0)
                    .or_default(json!(1))
                    .describe("1 to track pupils during presentations"),
            ],
            vec![
                ReturnSpec::new("viewMode", "view mode in use"),
                ReturnSpec::new("tracking", "whether pupils are tracked"),
                ReturnSpec::new("streamPort", "camera viewer port, -1 when not streaming"),
            ],
        )
        .command(
            Command::Setup,
            vec![
                ParameterSpec::number("bgLum", 0.0, MAX_LUMINANCE)
                    .or_default(json!(10))
                    .describe("background luminance in cd/m²"),
                ParameterSpec::number("bgCol", 0.0, 1.0)
                    .list()
                    .or_default(json!([1, 1, 1]))
                    .describe("background RGB colour"),
                ParameterSpec::symbol("fixShape", EnumKind::Shape).or_default(json!("CROSS")),
                ParameterSpec::number("fixCx", -90.0, 90.0).or_default(json!(0)),
                ParameterSpec::number("fixCy", -90.0, 90.0).or_default(json!(0)),
                ParameterSpec::number("fixSx", 0.0, 10.0)
                    .or_default(json!(0.5))
                    .describe("fixation size in degrees"),
                ParameterSpec::number("fixLum", 0.0, MAX_LUMINANCE).or_default(json!(100)),
            ],
            vec![ReturnSpec::new("bgLum", "background luminance applied")],
        )
        .command(
            Command::Present,
            vec![
                ParameterSpec::symbol("eye", EnumKind::Eye).list().or_default(json!(["BOTH"])),
                ParameterSpec::number("x", -90.0, 90.0).describe("x coordinate in degrees"),
                ParameterSpec::number("y", -90.0, 90.0).describe("y coordinate in degrees"),
                ParameterSpec::number("sx", 0.0, 180.0).or_default(json!(0.43)),
                ParameterSpec::number("sy", 0.0, 180.0).or_default(json!(0.43)),
                ParameterSpec::number("lum", 0.0, MAX_LUMINANCE).describe("stimulus luminance in cd/m²"),
                ParameterSpec::symbol("shape", EnumKind::Shape).or_default(json!("CIRCLE")),
                ParameterSpec::symbol("type", EnumKind::Texture).or_default(json!("FLAT")),
                ParameterSpec::number("t", 0.0, 10_000.0)
                    .or_default(json!(200))
                    .describe("presentation time in ms"),
                ParameterSpec::number("w", 0.0, 20_000.0)
                    .or_default(json!(1500))
                    .describe("response window in ms"),
                ParameterSpec::number("color", 0.0, 1.0)
                    .list_of_list()
                    .optional()
                    .describe("RGB colour per stimulated eye"),
            ],
            vec![
                ReturnSpec::new("seen", "whether the observer responded"),
                ReturnSpec::new("time", "reaction time in ms, -1 when not seen"),
                ReturnSpec::new("eyexStart", "pupil x at onset, -1 when unavailable"),
                ReturnSpec::new("eyeyStart", "pupil y at onset, -1 when unavailable"),
                ReturnSpec::new("eyedStart", "pupil diameter at onset, -1 when unavailable"),
                ReturnSpec::new("eyetStart", "frame time at onset, -1 when unavailable"),
                ReturnSpec::new("eyexEnd", "pupil x at response, -1 when unavailable"),
                ReturnSpec::new("eyeyEnd", "pupil y at response, -1 when unavailable"),
                ReturnSpec::new("eyedEnd", "pupil diameter at response, -1 when unavailable"),
                ReturnSpec::new("eyetEnd", "frame time at response, -1 when unavailable"),
            ],
        )
        .build()
});

/// Pupil tracking resources, alive between INITIALIZE and CLOSE.
struct Tracking {
    acquisition: Acquisition,
    client: PupilClient,
    stream: Option<CameraStream>,
}

/// Rendering resources, alive between INITIALIZE and CLOSE.
struct Session {
    render: RenderThread,
    controller: PresentationController,
    tracking: Option<Tracking>,
}

impl Session {
    /// Stop the render and acquisition threads and the camera stream.
    ///
    /// Blocks while the threads are joined, each exits within one of its intervals.
    fn stop(mut self) {
        self.render.stop();
        if let Some(mut tracking) = self.tracking.take() {
            tracking.acquisition.stop();
            if let Some(stream) = tracking.stream.take() {
                stream.shutdown();
            }
        }
    }

    /// Stop on the blocking pool so the async worker is never parked on a join.
    async fn stop_blocking(self) -> Result<()> {
        tokio::task::spawn_blocking(move || self.stop())
            .await
            .map_err(|e| MonitorError::device_with_source("display shutdown failed", e))
    }
}

/// Perimeter that renders stimuli on a display driven by its own render thread.
pub struct Display {
    state: MachineState,
    commands: &'static CommandTable,
    config: MonitorConfig,
    session: Option<Session>,
}

impl Display {
    pub const NAME: &'static str = "Display";

    pub fn new(config: &MonitorConfig) -> Result<Box<dyn Driver>> {
        Ok(Box::new(Self::build(config)?))
    }

    fn build(config: &MonitorConfig) -> Result<Self> {
        let commands = COMMANDS.as_ref().map_err(|e| MonitorError::DriverConstructionFailed {
            name: Self::NAME.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { state: MachineState::default(), commands, config: config.clone(), session: None })
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        self.state.require_initialized(Self::NAME)?;
        self.session.as_mut().ok_or_else(|| MonitorError::device("display session is gone"))
    }

    fn instruction_timeout(&self, window_ms: u64) -> Duration {
        Duration::from_millis(window_ms + self.config.display.instruction_timeout_ms)
    }

    /// Detach the session, leaving the machine uninitialized.
    fn detach(&mut self) -> Option<Session> {
        self.state.mark_closed();
        self.session.take()
    }
}

/// Request one pupil sample per distinct timestamp.
///
/// Returns the timestamps actually queued, so a rejected request is not waited for.
fn request_samples(client: &PupilClient, eye: Eye, timestamps: [i64; 2]) -> Vec<i64> {
    let mut requested = Vec::with_capacity(timestamps.len());
    for timestamp in timestamps {
        if requested.contains(&timestamp) {
            continue;
        }
        match client.request(eye, timestamp) {
            Ok(()) => requested.push(timestamp),
            Err(e) => warn!("Pupil request at {} dropped: {}", timestamp, e),
        }
    }
    requested
}

async fn start_tracking(config: &MonitorConfig) -> Result<Tracking> {
    let camera = &config.camera;
    let store = Arc::new(FrameStore::new(config.pupil.buffer_capacity, camera.width, camera.height)?);
    let detector = DarkBlobDetector { threshold: config.pupil.threshold, ..DarkBlobDetector::default() };
    let (pipeline, client) = pipeline::channel(Arc::clone(&store), Box::new(detector));

    let (stream, sink) = match config.stream_addr() {
        Some(addr) => {
            let (stream, sink) = CameraStream::bind(addr).await?;
            (Some(stream), Some(sink))
        }
        None => (None, None),
    };

    let acquisition = Acquisition::spawn(
        store,
        Box::new(SyntheticCamera::new(camera.width, camera.height)),
        pipeline,
        sink,
        config.acquisition_interval(),
    )?;
    Ok(Tracking { acquisition, client, stream })
}

fn background(args: &Arguments) -> Result<BackgroundSpec> {
    let colour = args.numbers("bgCol")?;
    let colour = match colour.as_slice() {
        [grey] => [*grey; 3],
        [r, g, b] => [*r, *g, *b],
        other => {
            return Err(MonitorError::type_mismatch("bgCol", "1 or 3 colour channels", format!("{} channels", other.len())));
        }
    };
    Ok(BackgroundSpec {
        luminance: args.number("bgLum")?,
        colour,
        fixation: Fixation {
            shape: args.symbol("fixShape")?.to_string(),
            x: args.number("fixCx")?,
            y: args.number("fixCy")?,
            size: args.number("fixSx")?,
            luminance: args.number("fixLum")?,
        },
    })
}

fn stimulus(args: &Arguments) -> Result<Stimulus> {
    let colours = if args.contains("color") { Some(args.number_lists("color")?) } else { None };
    Ok(Stimulus {
        eyes: args.symbols("eye")?.into_iter().map(str::to_string).collect(),
        x: args.number("x")?,
        y: args.number("y")?,
        sx: args.number("sx")?,
        sy: args.number("sy")?,
        luminance: args.number("lum")?,
        shape: args.symbol("shape")?.to_string(),
        texture: args.symbol("type")?.to_string(),
        duration_ms: args.number("t")?.round() as u64,
        window_ms: args.number("w")?.round() as u64,
        colours,
    })
}

/// Camera eye to sample for a stimulus shown to `eyes`.
fn tracked_eye(eyes: &[String]) -> Eye {
    if eyes.iter().all(|eye| eye == "RIGHT") { Eye::Right } else { Eye::Left }
}

fn insert_sample(msg: &mut serde_json::Map<String, Value>, suffix: &str, sample: Option<&PupilResponse>) {
    let (x, y, d, t) = match sample.filter(|response| response.is_found()) {
        Some(response) => (response.x, response.y, response.diameter, response.acquisition_timestamp as f64),
        None => (-1.0, -1.0, -1.0, -1.0),
    };
    msg.insert(format!("eyex{suffix}"), json!(x));
    msg.insert(format!("eyey{suffix}"), json!(y));
    msg.insert(format!("eyed{suffix}"), json!(d));
    msg.insert(format!("eyet{suffix}"), json!(t));
}

#[async_trait::async_trait]
impl Driver for Display {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn commands(&self) -> &'static CommandTable {
        self.commands
    }

    async fn initialize(&mut self, args: &Arguments) -> Result<Packet> {
        if self.state.is_initialized() {
            return Err(MonitorError::device("Display is already initialized"));
        }
        let view_mode = args.symbol("viewMode")?.to_string();
        let wants_tracking = args.number("tracking")? >= 0.5 && self.config.camera.enabled;

        let mut renderer = HeadlessRenderer::new();
        if let Some(reaction) = self.config.display.simulated_reaction_ms {
            renderer = renderer.with_simulated_observer(Duration::from_millis(reaction));
        }
        let (render, controller) = RenderThread::spawn(Box::new(renderer), self.config.frame_interval())?;
        let mut session = Session { render, controller, tracking: None };

        let started = match session.controller.submit(Instruction::Init, self.instruction_timeout(0)).await {
            Ok(_) if wants_tracking => start_tracking(&self.config).await.map(Some),
            Ok(_) => Ok(None),
            Err(e) => Err(e),
        };
        session.tracking = match started {
            Ok(tracking) => tracking,
            Err(e) => {
                session.stop_blocking().await?;
                return Err(e);
            }
        };

        let stream_port = session
            .tracking
            .as_ref()
            .and_then(|t| t.stream.as_ref())
            .map(|s| i64::from(s.local_addr().port()))
            .unwrap_or(-1);

        info!(view_mode = %view_mode, tracking = session.tracking.is_some(), "Display initialized");
        self.session = Some(session);
        self.state.mark_initialized();

        Ok(Packet::object(json!({
            "viewMode": view_mode,
            "tracking": wants_tracking,
            "streamPort": stream_port,
        })))
    }

    async fn setup(&mut self, args: &Arguments) -> Result<Packet> {
        let background = background(args)?;
        let luminance = background.luminance;
        let timeout = self.instruction_timeout(0);
        let controller = self.session_mut()?.controller.clone();
        controller.submit(Instruction::Setup(background), timeout).await?;
        Ok(Packet::object(json!({"bgLum": luminance})))
    }

    async fn present(&mut self, args: &Arguments) -> Result<Packet> {
        let stimulus = stimulus(args)?;
        let eye = tracked_eye(&stimulus.eyes);
        let timeout = self.instruction_timeout(stimulus.window_ms);
        let pupil_timeout = self.config.pupil_timeout();
        self.state.require_initialized(Self::NAME)?;
        let n = self.state.next_presentation();
        let session = self.session_mut()?;
        let outcome = session.controller.present(stimulus, timeout).await?;
        debug!(n, seen = outcome.seen, time_ms = outcome.time_ms, "Presentation done");

        let mut msg = serde_json::Map::new();
        msg.insert("seen".into(), json!(outcome.seen));
        msg.insert("time".into(), json!(outcome.time_ms));

        let samples = match session.tracking.as_mut() {
            Some(tracking) => {
                tracking.client.drain();
                let requested = request_samples(&tracking.client, eye, [outcome.onset_ms, outcome.response_ms]);
                tracking.client.collect(&requested, pupil_timeout).await
            }
            None => Default::default(),
        };
        insert_sample(&mut msg, "Start", samples.get(&outcome.onset_ms));
        insert_sample(&mut msg, "End", samples.get(&outcome.response_ms));

        Ok(Packet::object(Value::Object(msg)))
    }

    async fn close(&mut self, _args: &Arguments) -> Result<Packet> {
        let timeout = self.instruction_timeout(0);
        let result = match self.session.as_ref().map(|session| session.controller.clone()) {
            Some(controller) => controller.submit(Instruction::Close, timeout).await,
            None => Ok(None),
        };
        let presentations = self.state.presentations();
        if let Some(session) = self.detach() {
            session.stop_blocking().await?;
        }
        result?;
        info!("Display closed after {} presentations", presentations);
        Ok(Packet::text(format!("{} closed", Self::NAME)))
    }
}

impl Drop for Display {
    fn drop(&mut self) {
        let Some(session) = self.detach() else { return };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || session.stop());
            }
            Err(_) => session.stop(),
        }
    }
}
