//! Secondary camera stream for frame viewers
//!
//! Each frame is written as `[eye code: u8][length: u32 BE][pixels]`. One
//! viewer is served at a time. The acquisition thread offers frames through a
//! [`FrameSink`] and never waits on the viewer: when the viewer falls behind,
//! frames are dropped.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Buf, BufMut, BytesMut};
use futures::SinkExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::types::Eye;
use crate::{MonitorError, Result};

/// Bytes before the payload: eye code plus length.
pub const HEADER_LEN: usize = 5;

/// Frames buffered for the viewer before new ones are dropped.
const SINK_CAPACITY: usize = 4;

/// Largest payload a decoder accepts.
const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// One encoded camera frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub eye: Eye,
    pub pixels: Vec<u8>,
}

/// Codec for the camera stream wire format.
#[derive(Debug, Default, Clone, Copy)]
pub struct CameraFrameCodec;

impl Encoder<StreamFrame> for CameraFrameCodec {
    type Error = MonitorError;

    fn encode(&mut self, frame: StreamFrame, dst: &mut BytesMut) -> Result<()> {
        let len = u32::try_from(frame.pixels.len())
            .map_err(|_| MonitorError::Buffer { context: "camera frame larger than 4 GiB".to_string() })?;
        dst.reserve(HEADER_LEN + frame.pixels.len());
        dst.put_u8(frame.eye.wire_code());
        dst.put_u32(len);
        dst.extend_from_slice(&frame.pixels);
        Ok(())
    }
}

impl Decoder for CameraFrameCodec {
    type Item = StreamFrame;
    type Error = MonitorError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<StreamFrame>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let code = src[0];
        let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        let eye = Eye::from_wire_code(code).ok_or_else(|| MonitorError::Buffer {
            context: format!("unknown eye code {code} on camera stream"),
        })?;
        if len > MAX_PAYLOAD {
            return Err(MonitorError::Buffer { context: format!("camera frame of {len} bytes exceeds limit") });
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let pixels = src.split_to(len).to_vec();
        Ok(Some(StreamFrame { eye, pixels }))
    }
}

/// Acquisition-side handle for offering frames to the viewer.
#[derive(Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<StreamFrame>,
    attached: Arc<AtomicBool>,
}

impl FrameSink {
    /// Whether a viewer is currently connected.
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Offer a frame; dropped when the viewer is absent or behind.
    pub fn offer(&self, eye: Eye, pixels: &[u8]) -> bool {
        if !self.is_attached() {
            return false;
        }
        match self.tx.try_send(StreamFrame { eye, pixels: pixels.to_vec() }) {
            Ok(()) => true,
            Err(_) => {
                trace!(?eye, "viewer behind, camera frame dropped");
                false
            }
        }
    }
}

/// Running camera stream server.
pub struct CameraStream {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl CameraStream {
    /// Bind the viewer port and start serving.
    pub async fn bind(addr: SocketAddr) -> Result<(Self, FrameSink)> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MonitorError::transport(format!("bind camera stream on {addr}"), e))?;
        let local_addr = listener.local_addr()?;

        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        let attached = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(Self::serve(listener, rx, Arc::clone(&attached), cancel.clone()));
        info!("Camera stream listening on {}", local_addr);

        Ok((Self { local_addr, cancel, task }, FrameSink { tx, attached }))
    }

    async fn serve(
        listener: TcpListener,
        mut frames: mpsc::Receiver<StreamFrame>,
        attached: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) {
        loop {
            let (socket, peer) = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Camera viewer accept failed: {}", e);
                        continue;
                    }
                },
            };

            info!("Camera viewer connected from {}", peer);
            while frames.try_recv().is_ok() {}
            attached.store(true, Ordering::Release);

            let mut writer = FramedWrite::new(socket, CameraFrameCodec);
            let mut sent = 0u64;
            loop {
                let frame = tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = frames.recv() => match frame {
                        Some(frame) => frame,
                        None => break,
                    },
                };
                if let Err(e) = writer.send(frame).await {
                    debug!("Camera viewer write failed: {}", e);
                    break;
                }
                sent += 1;
            }

            attached.store(false, Ordering::Release);
            info!("Camera viewer {} detached after {} frames", peer, sent);
        }
        debug!("Camera stream stopped");
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop serving and disconnect any viewer.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}
