//! Camera frame pipeline.
//!
//! ```text
//!  FrameSource ──grab──▶ FrameStore (ring buffer per eye)
//!                           ▲           │
//!              closest_to   │           │ newest
//!                           │           ▼
//!  PupilClient ◀─responses─ PupilPipeline    FrameSink ──▶ viewer socket
//!       └──────requests────────▲
//! ```
//!
//! The [`Acquisition`] thread owns the source and the pipeline half. Consumers
//! keep the [`PupilClient`] half and never touch frames directly.

pub mod acquisition;
pub mod pipeline;
pub mod pupil;
pub mod source;
pub mod store;
pub mod stream;

pub use acquisition::Acquisition;
pub use pipeline::{PupilClient, PupilPipeline, PupilRequest, PupilResponse, RequestQueue, Serviced};
pub use pupil::{DarkBlobDetector, PupilDetector, PupilFix};
pub use source::{FrameSource, SyntheticCamera};
pub use store::FrameStore;
pub use stream::{CameraFrameCodec, CameraStream, FrameSink, StreamFrame};
