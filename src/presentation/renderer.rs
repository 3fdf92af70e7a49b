//! Rendering collaborator

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use super::state::{BackgroundSpec, ObserverResponse, Stimulus};
use crate::Result;
use crate::types::monotonic_ms;

/// Graphics back end driven by the render loop.
///
/// Only the render thread ever calls into a renderer, once per frame at most.
pub trait Renderer: Send {
    /// Open the stimulus window.
    fn show(&mut self) -> Result<()>;

    /// Close the stimulus window.
    fn hide(&mut self) -> Result<()>;

    fn set_background(&mut self, background: &BackgroundSpec) -> Result<()>;

    fn present_stimulus(&mut self, stimulus: &Stimulus) -> Result<()>;

    fn clear_stimulus(&mut self) -> Result<()>;

    /// Take a pending observer response, if the observer pressed since the last poll.
    fn poll_response(&mut self) -> Option<ObserverResponse>;
}

/// Handle for pressing the response button of a [`HeadlessRenderer`].
#[derive(Debug, Clone, Default)]
pub struct ResponseButton {
    pressed: Arc<AtomicBool>,
}

impl ResponseButton {
    pub fn press(&self) {
        self.pressed.store(true, Ordering::Release);
    }

    pub(crate) fn take(&self) -> bool {
        self.pressed.swap(false, Ordering::AcqRel)
    }
}

/// Renderer without a display: logs every call and reports responses from a
/// [`ResponseButton`] or a simulated observer.
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    visible: bool,
    button: ResponseButton,
    /// Simulated observer reaction time, `None` never responds on its own
    reaction: Option<Duration>,
    stimulus_onset: Option<Instant>,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an observer who responds `reaction` after each stimulus onset.
    pub fn with_simulated_observer(mut self, reaction: Duration) -> Self {
        self.reaction = Some(reaction);
        self
    }

    /// Button that makes the next poll report a response.
    pub fn button(&self) -> ResponseButton {
        self.button.clone()
    }
}

impl Renderer for HeadlessRenderer {
    fn show(&mut self) -> Result<()> {
        info!("Stimulus window shown");
        self.visible = true;
        Ok(())
    }

    fn hide(&mut self) -> Result<()> {
        info!("Stimulus window hidden");
        self.visible = false;
        self.stimulus_onset = None;
        Ok(())
    }

    fn set_background(&mut self, background: &BackgroundSpec) -> Result<()> {
        debug!(
            luminance = background.luminance,
            fixation = %background.fixation.shape,
            "Background applied"
        );
        Ok(())
    }

    fn present_stimulus(&mut self, stimulus: &Stimulus) -> Result<()> {
        debug!(
            x = stimulus.x,
            y = stimulus.y,
            luminance = stimulus.luminance,
            shape = %stimulus.shape,
            "Stimulus on"
        );
        self.stimulus_onset = Some(Instant::now());
        Ok(())
    }

    fn clear_stimulus(&mut self) -> Result<()> {
        trace!("Stimulus off");
        Ok(())
    }

    fn poll_response(&mut self) -> Option<ObserverResponse> {
        if self.button.take() {
            return Some(ObserverResponse { at_ms: monotonic_ms() });
        }
        let (Some(onset), Some(reaction)) = (self.stimulus_onset, self.reaction) else {
            return None;
        };
        if onset.elapsed() >= reaction {
            self.stimulus_onset = None;
            return Some(ObserverResponse { at_ms: monotonic_ms() });
        }
        None
    }
}
