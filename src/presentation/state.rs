//! Presentation states and the instructions that drive them

use std::fmt;

/// State of the presentation handshake.
///
/// The controller moves the state away from `Idle`; the render loop moves it
/// from every other state, eventually back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresentationState {
    #[default]
    Idle,
    Init,
    Setup,
    Present,
    Wait,
    Responded,
    Close,
}

impl fmt::Display for PresentationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PresentationState::Idle => "IDLE",
            PresentationState::Init => "INIT",
            PresentationState::Setup => "SETUP",
            PresentationState::Present => "PRESENT",
            PresentationState::Wait => "WAIT",
            PresentationState::Responded => "RESPONDED",
            PresentationState::Close => "CLOSE",
        };
        f.write_str(name)
    }
}

/// Fixation target drawn on top of the background.
#[derive(Debug, Clone, PartialEq)]
pub struct Fixation {
    pub shape: String,
    /// Position in degrees of visual angle
    pub x: f64,
    pub y: f64,
    /// Diameter in degrees of visual angle
    pub size: f64,
    pub luminance: f64,
}

/// Background applied by SETUP.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundSpec {
    /// Luminance in cd/m²
    pub luminance: f64,
    /// RGB colour, each channel in `[0, 1]`
    pub colour: [f64; 3],
    pub fixation: Fixation,
}

impl Default for BackgroundSpec {
    fn default() -> Self {
        Self {
            luminance: 10.0,
            colour: [1.0, 1.0, 1.0],
            fixation: Fixation { shape: "CROSS".to_string(), x: 0.0, y: 0.0, size: 0.5, luminance: 100.0 },
        }
    }
}

/// One stimulus to present.
#[derive(Debug, Clone, PartialEq)]
pub struct Stimulus {
    /// Eyes the stimulus is shown to (canonical symbols)
    pub eyes: Vec<String>,
    /// Centre in degrees of visual angle
    pub x: f64,
    pub y: f64,
    /// Semi-axes in degrees of visual angle
    pub sx: f64,
    pub sy: f64,
    /// Luminance in cd/m²
    pub luminance: f64,
    pub shape: String,
    pub texture: String,
    /// How long the stimulus stays on screen
    pub duration_ms: u64,
    /// How long to wait for a response after onset
    pub window_ms: u64,
    /// Optional per-eye RGB colours
    pub colours: Option<Vec<Vec<f64>>>,
}

/// Work handed from the controller to the render loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Init,
    Setup(BackgroundSpec),
    Present(Stimulus),
    Close,
}

impl Instruction {
    /// State the controller moves to when submitting this instruction.
    pub fn state(&self) -> PresentationState {
        match self {
            Instruction::Init => PresentationState::Init,
            Instruction::Setup(_) => PresentationState::Setup,
            Instruction::Present(_) => PresentationState::Present,
            Instruction::Close => PresentationState::Close,
        }
    }
}

/// Observer pressed the response button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverResponse {
    /// Monotonic timestamp of the press
    pub at_ms: i64,
}

/// Result of one presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub seen: bool,
    /// Reaction time in milliseconds, `-1` when not seen
    pub time_ms: i64,
    /// Monotonic timestamp of stimulus onset
    pub onset_ms: i64,
    /// Monotonic timestamp of the response, or of the window end when not seen
    pub response_ms: i64,
}

impl Outcome {
    pub(crate) fn new(onset_ms: i64, response: Option<ObserverResponse>, window_end_ms: i64) -> Self {
        match response {
            Some(response) => Self {
                seen: true,
                time_ms: (response.at_ms - onset_ms).max(0),
                onset_ms,
                response_ms: response.at_ms,
            },
            None => Self { seen: false, time_ms: -1, onset_ms, response_ms: window_end_ms },
        }
    }
}
