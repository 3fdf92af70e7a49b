//! Stimulus presentation state machine.
//!
//! ```text
//! IDLE --INITIALIZE--> INIT --(show window)--> IDLE
//! IDLE --SETUP-------> SETUP --(apply background)--> IDLE
//! IDLE --PRESENT-----> PRESENT --(stimulus on)--> WAIT
//! WAIT --(response or window elapsed)--> RESPONDED --(stimulus off)--> IDLE
//! IDLE --CLOSE-------> CLOSE --(hide window)--> IDLE
//! ```
//!
//! The [`PresentationController`] lives on the dispatcher side and only ever
//! leaves `Idle`. The [`RenderLoop`] runs on its own thread, owns the
//! [`Renderer`] and performs every other transition.

mod controller;
mod renderer;
mod state;

pub use controller::{PresentationController, RenderLoop, RenderThread, handshake};
pub use renderer::{HeadlessRenderer, Renderer, ResponseButton};
pub use state::{BackgroundSpec, Fixation, Instruction, ObserverResponse, Outcome, PresentationState, Stimulus};
