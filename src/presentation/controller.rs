//! Controller/render-loop handshake over a watch channel

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::renderer::Renderer;
use super::state::{Instruction, ObserverResponse, Outcome, PresentationState, Stimulus};
use crate::types::monotonic_ms;
use crate::{MonitorError, Result};

/// State shared by both sides of the handshake.
///
/// `state` has two writers that never overlap: the controller only writes
/// while the state is `Idle`, the render loop only while it is not.
struct Shared {
    state: watch::Sender<PresentationState>,
    instruction: Mutex<Option<Instruction>>,
    completion: Mutex<Option<Result<Option<Outcome>>>>,
}

/// Dispatcher-side handle: submits one instruction at a time and awaits it.
#[derive(Clone)]
pub struct PresentationController {
    shared: Arc<Shared>,
}

/// Render-side state machine, polled once per frame.
pub struct RenderLoop {
    shared: Arc<Shared>,
    renderer: Box<dyn Renderer>,
    window_open: bool,
    active: Option<ActiveStimulus>,
}

struct ActiveStimulus {
    stimulus: Stimulus,
    started: Instant,
    onset_ms: i64,
    visible: bool,
    response: Option<ObserverResponse>,
}

/// Create a connected controller and render loop around `renderer`.
pub fn handshake(renderer: Box<dyn Renderer>) -> (PresentationController, RenderLoop) {
    let (state, _) = watch::channel(PresentationState::Idle);
    let shared = Arc::new(Shared { state, instruction: Mutex::new(None), completion: Mutex::new(None) });
    let controller = PresentationController { shared: Arc::clone(&shared) };
    let render = RenderLoop { shared, renderer, window_open: false, active: None };
    (controller, render)
}

impl PresentationController {
    /// Current state.
    pub fn state(&self) -> PresentationState {
        *self.shared.state.borrow()
    }

    /// Hand `instruction` to the render loop and wait until it is back to `Idle`.
    ///
    /// Fails without side effects when another instruction is in flight. Returns
    /// the presentation outcome for `Present`, `None` otherwise.
    pub async fn submit(&self, instruction: Instruction, timeout: Duration) -> Result<Option<Outcome>> {
        let target = instruction.state();
        let mut idle = self.shared.state.subscribe();

        {
            let mut slot = self.shared.instruction.lock();
            let current = *self.shared.state.borrow();
            if current != PresentationState::Idle {
                return Err(MonitorError::device(format!(
                    "presentation busy in state {current}, cannot start {target}"
                )));
            }
            *slot = Some(instruction);
            self.shared.completion.lock().take();
            self.shared.state.send_replace(target);
        }
        debug!(state = %target, "Instruction submitted");

        match tokio::time::timeout(timeout, idle.wait_for(|state| *state == PresentationState::Idle)).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) => return Err(MonitorError::device("render loop is gone")),
            Err(_) => {
                return Err(MonitorError::Timeout { operation: format!("{target} instruction"), duration: timeout });
            }
        }

        self.shared.completion.lock().take().unwrap_or(Ok(None))
    }

    /// Present `stimulus` and wait for its outcome.
    pub async fn present(&self, stimulus: Stimulus, timeout: Duration) -> Result<Outcome> {
        self.submit(Instruction::Present(stimulus), timeout)
            .await?
            .ok_or_else(|| MonitorError::device("presentation finished without an outcome"))
    }
}

impl RenderLoop {
    /// Current state.
    pub fn state(&self) -> PresentationState {
        *self.shared.state.borrow()
    }

    /// Whether the stimulus window is open.
    pub fn window_open(&self) -> bool {
        self.window_open
    }

    /// Advance the state machine by at most one transition.
    pub fn poll(&mut self) {
        let state = self.state();
        match state {
            PresentationState::Idle => {
                // Presses outside a presentation window are discarded
                if self.window_open {
                    self.renderer.poll_response();
                }
            }
            PresentationState::Init => {
                self.take_instruction();
                let result = self.renderer.show();
                self.window_open |= result.is_ok();
                self.finish(result.map(|_| None));
            }
            PresentationState::Setup => {
                let result = match self.take_instruction() {
                    Some(Instruction::Setup(background)) => self.renderer.set_background(&background),
                    other => Err(unexpected(state, other)),
                };
                self.finish(result.map(|_| None));
            }
            PresentationState::Present => match self.take_instruction() {
                Some(Instruction::Present(stimulus)) => self.start(stimulus),
                other => self.finish(Err(unexpected(state, other))),
            },
            PresentationState::Wait => self.wait(),
            PresentationState::Responded => self.respond(),
            PresentationState::Close => {
                self.take_instruction();
                let result = self.close_window();
                self.finish(result.map(|_| None));
            }
        }
    }

    fn start(&mut self, stimulus: Stimulus) {
        if let Err(e) = self.renderer.present_stimulus(&stimulus) {
            self.finish(Err(e));
            return;
        }
        // Discard a press left over from before onset
        self.renderer.poll_response();
        let onset_ms = monotonic_ms();
        trace!(onset_ms, "Stimulus onset");
        self.active = Some(ActiveStimulus { stimulus, started: Instant::now(), onset_ms, visible: true, response: None });
        self.shared.state.send_replace(PresentationState::Wait);
    }

    fn wait(&mut self) {
        let Some(active) = self.active.as_mut() else {
            self.finish(Err(MonitorError::device("waiting without an active stimulus")));
            return;
        };

        let elapsed = active.started.elapsed();
        if let Some(response) = self.renderer.poll_response() {
            active.response = Some(response);
        } else if elapsed < Duration::from_millis(active.stimulus.window_ms) {
            if active.visible && elapsed >= Duration::from_millis(active.stimulus.duration_ms) {
                active.visible = false;
                if let Err(e) = self.renderer.clear_stimulus() {
                    warn!("Failed to clear stimulus: {}", e);
                }
            }
            return;
        }
        self.shared.state.send_replace(PresentationState::Responded);
    }

    fn respond(&mut self) {
        let Some(active) = self.active.take() else {
            self.finish(Err(MonitorError::device("response without an active stimulus")));
            return;
        };
        if active.visible {
            if let Err(e) = self.renderer.clear_stimulus() {
                warn!("Failed to clear stimulus: {}", e);
            }
        }
        let outcome = Outcome::new(active.onset_ms, active.response, monotonic_ms());
        debug!(seen = outcome.seen, time_ms = outcome.time_ms, "Presentation finished");
        self.finish(Ok(Some(outcome)));
    }

    fn close_window(&mut self) -> Result<()> {
        if let Some(active) = self.active.take() {
            if active.visible {
                self.renderer.clear_stimulus()?;
            }
        }
        if self.window_open {
            self.renderer.hide()?;
            self.window_open = false;
        }
        Ok(())
    }

    fn take_instruction(&self) -> Option<Instruction> {
        self.shared.instruction.lock().take()
    }

    fn finish(&mut self, completion: Result<Option<Outcome>>) {
        if let Err(e) = &completion {
            warn!("Presentation instruction failed: {}", e);
        }
        *self.shared.completion.lock() = Some(completion);
        self.shared.state.send_replace(PresentationState::Idle);
    }

    /// Close the window and return to `Idle`, abandoning any instruction in flight.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.close_window() {
            warn!("Failed to close stimulus window: {}", e);
        }
        if self.state() != PresentationState::Idle {
            self.take_instruction();
            self.finish(Err(MonitorError::device("render loop stopped")));
        }
    }
}

fn unexpected(state: PresentationState, instruction: Option<Instruction>) -> MonitorError {
    MonitorError::device(format!("state {state} received instruction {instruction:?}"))
}

/// Handle to the render thread.
///
/// The thread owns the [`RenderLoop`] and polls it once per frame. Dropping
/// the handle stops the thread, which closes the window on its way out.
pub struct RenderThread {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl RenderThread {
    /// Spawn a render thread around `renderer`, polling every `frame_interval`.
    pub fn spawn(renderer: Box<dyn Renderer>, frame_interval: Duration) -> Result<(Self, PresentationController)> {
        let (controller, mut render) = handshake(renderer);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = std::thread::Builder::new()
            .name("perimon-render".to_string())
            .spawn(move || {
                info!("Render thread started");
                while !token.is_cancelled() {
                    render.poll();
                    std::thread::sleep(frame_interval);
                }
                render.shutdown();
                info!("Render thread stopped");
            })
            .map_err(|e| MonitorError::device_with_source("spawn render thread", e))?;

        Ok((Self { cancel, handle: Some(handle) }, controller))
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Render thread panicked");
            }
        }
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presentation::renderer::HeadlessRenderer;
    use crate::presentation::state::BackgroundSpec;
    use crate::test_utils::{RenderCall, RecordingRenderer, stimulus};

    const TIMEOUT: Duration = Duration::from_secs(2);

    /// Poll `render` from a plain thread until `done` is cancelled.
    fn drive(mut render: RenderLoop, done: CancellationToken) -> std::thread::JoinHandle<RenderLoop> {
        std::thread::spawn(move || {
            while !done.is_cancelled() {
                render.poll();
                std::thread::sleep(Duration::from_millis(1));
            }
            render
        })
    }

    #[test]
    fn poll_walks_present_through_wait_and_back_to_idle() {
        let (renderer, calls) = RecordingRenderer::new();
        let button = renderer.button();
        let (controller, mut render) = handshake(Box::new(renderer));

        render.shared.instruction.lock().replace(Instruction::Present(stimulus(50)));
        render.shared.state.send_replace(PresentationState::Present);

        render.poll();
        assert_eq!(controller.state(), PresentationState::Wait);
        render.poll();
        assert_eq!(controller.state(), PresentationState::Wait);

        button.press();
        render.poll();
        assert_eq!(controller.state(), PresentationState::Responded);
        render.poll();
        assert_eq!(controller.state(), PresentationState::Idle);

        let outcome = render.shared.completion.lock().take().unwrap().unwrap().unwrap();
        assert!(outcome.seen);
        assert_eq!(calls.lock().as_slice(), &[RenderCall::Present, RenderCall::Clear]);
    }

    #[tokio::test]
    async fn submit_round_trips_through_the_render_loop() {
        let (controller, render) = handshake(Box::new(HeadlessRenderer::new()));
        let done = CancellationToken::new();
        let thread = drive(render, done.clone());

        assert_eq!(controller.submit(Instruction::Init, TIMEOUT).await.unwrap(), None);
        controller.submit(Instruction::Setup(BackgroundSpec::default()), TIMEOUT).await.unwrap();

        let outcome = controller.present(stimulus(20), TIMEOUT).await.unwrap();
        assert!(!outcome.seen);
        assert_eq!(outcome.time_ms, -1);
        assert!(outcome.response_ms >= outcome.onset_ms + 20);

        controller.submit(Instruction::Close, TIMEOUT).await.unwrap();
        assert_eq!(controller.state(), PresentationState::Idle);

        done.cancel();
        let render = thread.join().unwrap();
        assert!(!render.window_open());
    }

    #[tokio::test]
    async fn simulated_observer_sees_the_stimulus() {
        let renderer = HeadlessRenderer::new().with_simulated_observer(Duration::from_millis(5));
        let (mut thread, controller) = RenderThread::spawn(Box::new(renderer), Duration::from_millis(1)).unwrap();

        controller.submit(Instruction::Init, TIMEOUT).await.unwrap();
        let outcome = controller.present(stimulus(1_000), TIMEOUT).await.unwrap();
        assert!(outcome.seen);
        assert!(outcome.time_ms >= 0);

        thread.stop();
        assert!(!thread.is_running());
    }

    #[tokio::test]
    async fn second_submit_is_rejected_while_busy() {
        // No render loop is polling, so the first instruction never completes
        let (controller, _render) = handshake(Box::new(HeadlessRenderer::new()));

        let first = controller.submit(Instruction::Init, Duration::from_millis(20)).await;
        assert!(matches!(first, Err(MonitorError::Timeout { .. })));
        assert_eq!(controller.state(), PresentationState::Init);

        let second = controller.submit(Instruction::Close, TIMEOUT).await;
        assert!(matches!(second, Err(MonitorError::Device { .. })));
    }

    #[test]
    fn shutdown_closes_the_window_and_returns_to_idle() {
        let (renderer, calls) = RecordingRenderer::new();
        let (controller, mut render) = handshake(Box::new(renderer));

        render.shared.state.send_replace(PresentationState::Init);
        render.poll();
        assert!(render.window_open());

        render.shared.instruction.lock().replace(Instruction::Present(stimulus(100)));
        render.shared.state.send_replace(PresentationState::Present);
        render.poll();

        render.shutdown();
        assert_eq!(controller.state(), PresentationState::Idle);
        assert!(!render.window_open());
        assert_eq!(
            calls.lock().as_slice(),
            &[RenderCall::Show, RenderCall::Present, RenderCall::Clear, RenderCall::Hide]
        );
    }
}
