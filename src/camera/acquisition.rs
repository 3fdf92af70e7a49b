//! Camera acquisition thread

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::pipeline::PupilPipeline;
use super::source::FrameSource;
use super::store::FrameStore;
use super::stream::FrameSink;
use crate::types::{Eye, FrameInfo};
use crate::{MonitorError, Result};

/// Handle to a running acquisition thread.
///
/// Each tick the thread grabs one frame per eye, services at most one pupil
/// request, forwards the newest frames to an attached viewer, then sleeps.
/// Dropping the handle stops and joins the thread.
pub struct Acquisition {
    cancel: CancellationToken,
    handle: Option<JoinHandle<u64>>,
}

impl Acquisition {
    /// Spawn the acquisition thread.
    pub fn spawn(
        store: Arc<FrameStore>,
        source: Box<dyn FrameSource>,
        pipeline: PupilPipeline,
        viewer: Option<FrameSink>,
        interval: Duration,
    ) -> Result<Self> {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = std::thread::Builder::new()
            .name("perimon-acquisition".to_string())
            .spawn(move || Self::run(store, source, pipeline, viewer, interval, token))
            .map_err(|e| MonitorError::device_with_source("spawn acquisition thread", e))?;

        Ok(Self { cancel, handle: Some(handle) })
    }

    fn run(
        store: Arc<FrameStore>,
        mut source: Box<dyn FrameSource>,
        mut pipeline: PupilPipeline,
        viewer: Option<FrameSink>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> u64 {
        info!(interval_ms = interval.as_millis() as u64, "Acquisition thread started");
        let mut ticks = 0u64;
        let mut failed_ticks = 0u32;
        let mut scratch = FrameInfo::default();

        while !cancel.is_cancelled() {
            ticks += 1;

            let grabbed = Eye::BOTH.into_iter().filter(|&eye| store.grab(eye, source.as_mut())).count();
            if grabbed == 0 {
                failed_ticks += 1;
                if failed_ticks.is_power_of_two() {
                    warn!("No frames captured for {} consecutive ticks", failed_ticks);
                }
            } else {
                failed_ticks = 0;
            }

            pipeline.service_next();

            if let Some(sink) = viewer.as_ref().filter(|sink| sink.is_attached()) {
                for eye in Eye::BOTH {
                    if store.newest(eye, &mut scratch) && scratch.is_valid() {
                        sink.offer(eye, &scratch.pixels);
                    }
                }
            }

            std::thread::sleep(interval);
        }

        info!("Acquisition thread stopped after {} ticks", ticks);
        ticks
    }

    /// Whether the thread is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(ticks) => debug!("Acquisition joined after {} ticks", ticks),
                Err(_) => warn!("Acquisition thread panicked"),
            }
        }
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        self.stop();
    }
}
