//! Pupil request/response correlation
//!
//! Consumers ask "where was the pupil of this eye at time T" through a
//! [`PupilClient`]. The [`PupilPipeline`] half, driven by the acquisition
//! thread, answers each request from the [`FrameStore`] history:
//!
//! 1. search for a frame within 1 ms of T, doubling the tolerance while it stays below 500 ms
//! 2. run the detector on the matched frame
//! 3. on success emit a response; on failure re-queue the request at the front
//!    until it has been tried 10 times, then emit a not-found response
//!
//! Both channels hold at most [`CHANNEL_CAPACITY`] entries. A full channel drops
//! the sample rather than blocking the acquisition thread.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

use super::pupil::PupilDetector;
use super::store::FrameStore;
use crate::types::{Eye, FrameInfo};
use crate::{MonitorError, Result};

/// Capacity of the request queue and of the response channel.
pub const CHANNEL_CAPACITY: usize = 10;

/// Number of detection attempts before a request is answered as not found.
pub const MAX_TRIES: u32 = 10;

/// Tolerance widening stops once the window reaches this many milliseconds.
pub const MAX_TOLERANCE_MS: i64 = 500;

/// Diameter reported when no pupil was found.
pub const NOT_FOUND: f64 = -1.0;

/// A pending pupil query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PupilRequest {
    pub request_timestamp: i64,
    pub eye: Eye,
    pub tries: u32,
}

impl PupilRequest {
    pub fn new(eye: Eye, request_timestamp: i64) -> Self {
        Self { request_timestamp, eye, tries: 0 }
    }
}

/// Answer to one [`PupilRequest`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PupilResponse {
    pub request_timestamp: i64,
    /// Timestamp of the frame the answer came from, `-1` if none matched
    pub acquisition_timestamp: i64,
    pub x: f64,
    pub y: f64,
    /// Pupil diameter in pixels, [`NOT_FOUND`] when detection failed
    pub diameter: f64,
}

impl PupilResponse {
    fn not_found(request_timestamp: i64, acquisition_timestamp: i64) -> Self {
        Self { request_timestamp, acquisition_timestamp, x: NOT_FOUND, y: NOT_FOUND, diameter: NOT_FOUND }
    }

    /// Whether a pupil was detected.
    pub fn is_found(&self) -> bool {
        self.diameter >= 0.0
    }
}

/// Bounded double-ended request queue.
///
/// New requests join the back; failed requests are pushed back to the front
/// so the most recent failure is retried first.
#[derive(Debug)]
pub struct RequestQueue {
    items: Mutex<VecDeque<PupilRequest>>,
    capacity: usize,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self { items: Mutex::new(VecDeque::with_capacity(capacity)), capacity }
    }

    /// Enqueue a new request at the back.
    pub fn try_push(&self, request: PupilRequest) -> Result<()> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(MonitorError::PipelineOverflow { channel: "requests" });
        }
        items.push_back(request);
        Ok(())
    }

    /// Put a request taken by [`pop`](Self::pop) back at the front.
    ///
    /// Never fails: the request already held a slot, which clients may have
    /// refilled since it was popped.
    pub fn requeue(&self, request: PupilRequest) {
        self.items.lock().push_front(request);
    }

    /// Take the request at the front, if any.
    pub fn pop(&self) -> Option<PupilRequest> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What happened to a serviced request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Serviced {
    /// A response was produced (and sent unless the channel was full)
    Answered(PupilResponse),
    /// Detection failed, the request went back to the front of the queue
    Requeued(PupilRequest),
}

/// Acquisition-side half: services requests against the frame store.
pub struct PupilPipeline {
    store: Arc<FrameStore>,
    requests: Arc<RequestQueue>,
    responses: mpsc::Sender<PupilResponse>,
    detector: Box<dyn PupilDetector>,
    scratch: FrameInfo,
}

/// Consumer-side half: submits requests and collects responses.
pub struct PupilClient {
    requests: Arc<RequestQueue>,
    responses: mpsc::Receiver<PupilResponse>,
}

/// Create a connected pipeline/client pair over `store`.
pub fn channel(store: Arc<FrameStore>, detector: Box<dyn PupilDetector>) -> (PupilPipeline, PupilClient) {
    let requests = Arc::new(RequestQueue::new(CHANNEL_CAPACITY));
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    let pipeline = PupilPipeline {
        store,
        requests: Arc::clone(&requests),
        responses: tx,
        detector,
        scratch: FrameInfo::default(),
    };
    (pipeline, PupilClient { requests, responses: rx })
}

impl PupilPipeline {
    /// Service the request at the front of the queue, if there is one.
    pub fn service_next(&mut self) -> Option<Serviced> {
        let request = self.requests.pop()?;
        Some(self.service(request))
    }

    /// Run the correlation algorithm for one request.
    pub fn service(&mut self, mut request: PupilRequest) -> Serviced {
        let matched = self.find_frame(request.eye, request.request_timestamp);
        let fix = if matched { self.detector.detect(&self.scratch) } else { None };

        if let Some(fix) = fix {
            let response = PupilResponse {
                request_timestamp: request.request_timestamp,
                acquisition_timestamp: self.scratch.timestamp_ms,
                x: fix.x,
                y: fix.y,
                diameter: fix.diameter,
            };
            trace!(?request, ?response, "pupil found");
            self.emit(response);
            return Serviced::Answered(response);
        }

        request.tries += 1;
        if request.tries < MAX_TRIES {
            self.requests.requeue(request);
            return Serviced::Requeued(request);
        }

        debug!(?request, "pupil not found after {} tries", request.tries);
        let acquisition = if matched { self.scratch.timestamp_ms } else { -1 };
        let response = PupilResponse::not_found(request.request_timestamp, acquisition);
        self.emit(response);
        Serviced::Answered(response)
    }

    /// Widen the tolerance window (1, 2, 4, ... ms) until a frame matches.
    fn find_frame(&mut self, eye: Eye, timestamp: i64) -> bool {
        let mut tolerance = 1;
        while tolerance < MAX_TOLERANCE_MS {
            if self.store.closest_to(eye, timestamp, tolerance, &mut self.scratch) {
                return true;
            }
            tolerance *= 2;
        }
        false
    }

    fn emit(&self, response: PupilResponse) {
        match self.responses.try_send(response) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("{}", MonitorError::PipelineOverflow { channel: "responses" });
            }
            Err(TrySendError::Closed(_)) => {
                debug!("pupil client gone, response discarded");
            }
        }
    }

    /// Number of requests waiting.
    pub fn pending(&self) -> usize {
        self.requests.len()
    }
}

impl PupilClient {
    /// Ask for the pupil position of `eye` at `timestamp`.
    ///
    /// Fails with `PipelineOverflow` when the request queue is full.
    pub fn request(&self, eye: Eye, timestamp: i64) -> Result<()> {
        self.requests.try_push(PupilRequest::new(eye, timestamp))
    }

    /// Wait up to `timeout` for the next response.
    pub async fn next_response(&mut self, timeout: Duration) -> Option<PupilResponse> {
        tokio::time::timeout(timeout, self.responses.recv()).await.ok().flatten()
    }

    /// Collect the responses to the requests made at `timestamps`.
    ///
    /// Repeated timestamps are waited for once. Responses to other requests
    /// are discarded. Returns whatever arrived before `timeout` expired.
    pub async fn collect(&mut self, timestamps: &[i64], timeout: Duration) -> HashMap<i64, PupilResponse> {
        let pending: HashSet<i64> = timestamps.iter().copied().collect();
        let mut found = HashMap::with_capacity(pending.len());
        let deadline = tokio::time::Instant::now() + timeout;

        while found.len() < pending.len() {
            let response = match tokio::time::timeout_at(deadline, self.responses.recv()).await {
                Ok(Some(response)) => response,
                Ok(None) | Err(_) => break,
            };
            if pending.contains(&response.request_timestamp) {
                found.insert(response.request_timestamp, response);
            } else {
                trace!(?response, "discarding stale pupil response");
            }
        }
        found
    }

    /// Discard queued requests and unread responses.
    pub fn drain(&mut self) {
        while self.requests.pop().is_some() {}
        while self.responses.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::pupil::PupilFix;
    use proptest::prelude::*;

    fn filled_store(timestamps: &[i64]) -> Arc<FrameStore> {
        let store = FrameStore::new(30, 2, 2).unwrap();
        for &ts in timestamps {
            for eye in Eye::BOTH {
                let mut source = |_: Eye, frame: &mut FrameInfo| -> crate::Result<()> {
                    frame.timestamp_ms = ts;
                    Ok(())
                };
                store.grab(eye, &mut source);
            }
        }
        Arc::new(store)
    }

    /// Fails `failures` times, then reports a fixed pupil.
    fn flaky_detector(failures: u32) -> Box<dyn PupilDetector> {
        let mut calls = 0u32;
        Box::new(move |_: &FrameInfo| {
            calls += 1;
            (calls > failures).then_some(PupilFix { x: 1.0, y: 2.0, diameter: 3.0 })
        })
    }

    fn drain_responses(client: &mut PupilClient) -> Vec<PupilResponse> {
        let mut out = Vec::new();
        while let Ok(response) = client.responses.try_recv() {
            out.push(response);
        }
        out
    }

    #[test]
    fn tolerance_widens_to_reach_distant_frames() {
        let store = filled_store(&[1_000]);
        let (mut pipeline, mut client) = channel(store, flaky_detector(0));

        client.request(Eye::Right, 1_200).unwrap();
        let serviced = pipeline.service_next().unwrap();
        let Serviced::Answered(response) = serviced else { panic!("expected answer: {serviced:?}") };
        assert_eq!(response.acquisition_timestamp, 1_000);
        assert!(response.is_found());
        assert_eq!(drain_responses(&mut client), vec![response]);
    }

    #[test]
    fn frames_beyond_the_widest_window_are_not_found() {
        let store = filled_store(&[0]);
        let (mut pipeline, mut client) = channel(store, flaky_detector(0));

        client.request(Eye::Left, 600).unwrap();
        for _ in 0..MAX_TRIES {
            pipeline.service_next();
        }
        let responses = drain_responses(&mut client);
        assert_eq!(responses.len(), 1);
        assert!(!responses[0].is_found());
        assert_eq!(responses[0].acquisition_timestamp, -1);
        assert!(pipeline.service_next().is_none());
    }

    #[test]
    fn retries_go_to_the_front() {
        let store = filled_store(&[100, 200]);
        let (mut pipeline, client) = channel(store, flaky_detector(1));

        client.request(Eye::Left, 100).unwrap();
        client.request(Eye::Left, 200).unwrap();

        let first = pipeline.service_next().unwrap();
        assert!(matches!(first, Serviced::Requeued(r) if r.request_timestamp == 100 && r.tries == 1));

        // The failed request is retried before the one queued after it
        let second = pipeline.service_next().unwrap();
        assert!(matches!(second, Serviced::Answered(r) if r.request_timestamp == 100));
    }

    #[test]
    fn full_request_queue_overflows() {
        let store = filled_store(&[]);
        let (_pipeline, client) = channel(store, flaky_detector(0));
        for i in 0..CHANNEL_CAPACITY {
            client.request(Eye::Left, i as i64).unwrap();
        }
        let err = client.request(Eye::Left, 99).unwrap_err();
        assert!(matches!(err, MonitorError::PipelineOverflow { channel: "requests" }));
    }

    #[test]
    fn full_response_channel_drops_without_blocking() {
        let store = filled_store(&[50]);
        let (mut pipeline, mut client) = channel(store, flaky_detector(0));

        for _ in 0..CHANNEL_CAPACITY + 3 {
            pipeline.service(PupilRequest::new(Eye::Left, 50));
        }
        assert_eq!(drain_responses(&mut client).len(), CHANNEL_CAPACITY);
    }

    #[test]
    fn retry_survives_a_queue_refilled_after_pop() {
        let store = filled_store(&[100]);
        let (mut pipeline, mut client) = channel(store, flaky_detector(u32::MAX));

        client.request(Eye::Left, 100).unwrap();
        let popped = pipeline.requests.pop().unwrap();
        for i in 0..CHANNEL_CAPACITY {
            client.request(Eye::Left, 1_000 + i as i64).unwrap();
        }

        let serviced = pipeline.service(popped);
        assert!(matches!(serviced, Serviced::Requeued(r) if r.request_timestamp == 100 && r.tries == 1));
        assert_eq!(pipeline.pending(), CHANNEL_CAPACITY + 1);

        // The retried request stays first in line until it is answered
        for _ in 1..MAX_TRIES {
            pipeline.service_next();
        }
        let answered = drain_responses(&mut client);
        assert_eq!(answered.len(), 1);
        assert_eq!(answered[0].request_timestamp, 100);
        assert!(!answered[0].is_found());
    }

    #[tokio::test]
    async fn collect_waits_once_for_repeated_timestamps() {
        let store = filled_store(&[100]);
        let (mut pipeline, mut client) = channel(store, flaky_detector(0));

        client.request(Eye::Left, 100).unwrap();
        client.request(Eye::Left, 100).unwrap();
        while pipeline.service_next().is_some() {}

        let started = std::time::Instant::now();
        let found = client.collect(&[100, 100], Duration::from_secs(5)).await;
        assert_eq!(found.len(), 1);
        assert!(found[&100].is_found());
        assert!(started.elapsed() < Duration::from_secs(1), "collect waited out its timeout");
    }

    #[tokio::test]
    async fn collect_matches_by_request_timestamp() {
        let store = filled_store(&[10, 20, 30]);
        let (mut pipeline, mut client) = channel(store, flaky_detector(0));

        for ts in [10, 20, 30] {
            client.request(Eye::Left, ts).unwrap();
        }
        while pipeline.service_next().is_some() {}

        let found = client.collect(&[30, 10], Duration::from_millis(50)).await;
        assert_eq!(found.len(), 2);
        assert_eq!(found[&10].acquisition_timestamp, 10);
        assert_eq!(found[&30].acquisition_timestamp, 30);
        assert!(client.next_response(Duration::from_millis(10)).await.is_none());
    }

    proptest! {
        #[test]
        fn exactly_one_response_per_request(failures in 0u32..15) {
            let store = filled_store(&[500]);
            let (mut pipeline, mut client) = channel(store, flaky_detector(failures));
            client.request(Eye::Left, 500).unwrap();

            let mut requeues = 0;
            while let Some(serviced) = pipeline.service_next() {
                if let Serviced::Requeued(_) = serviced {
                    requeues += 1;
                }
            }

            let responses = drain_responses(&mut client);
            prop_assert_eq!(responses.len(), 1);
            if failures < MAX_TRIES {
                prop_assert_eq!(requeues, failures);
                prop_assert!(responses[0].is_found());
            } else {
                prop_assert_eq!(requeues, MAX_TRIES - 1);
                prop_assert!(!responses[0].is_found());
                prop_assert_eq!(responses[0].acquisition_timestamp, 500);
            }
        }
    }
}
