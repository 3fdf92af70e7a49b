//! One client connection

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::MonitorError;
use crate::dispatch::Dispatcher;
use crate::types::Packet;

/// Longest request line accepted.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// A packet with `close: true` was sent
    Closed,
    /// The client hung up
    Disconnected,
    /// Reading or writing the socket failed
    TransportFailure,
    /// The server is shutting down
    Cancelled,
}

/// Summary returned when a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub requests: u64,
    pub end: SessionEnd,
}

/// A client connection: one Json request per line, one Json response per line.
pub struct Session {
    peer: SocketAddr,
    lines: Framed<TcpStream, LinesCodec>,
    dispatcher: Dispatcher,
}

impl Session {
    pub fn new(stream: TcpStream, peer: SocketAddr, dispatcher: Dispatcher) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for {}: {}", peer, e);
        }
        let lines = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LEN));
        Self { peer, lines, dispatcher }
    }

    /// Serve requests until the client leaves, a closing packet is sent, or
    /// `cancel` fires. Any machine still open is closed before returning.
    pub async fn run(mut self, cancel: CancellationToken) -> SessionSummary {
        info!(peer = %self.peer, "Session started");
        let mut requests = 0u64;

        let end = loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break SessionEnd::Cancelled,
                next = self.lines.next() => next,
            };

            let line = match next {
                None => break SessionEnd::Disconnected,
                Some(Ok(line)) => line,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    // The codec discards the rest of the line and carries on
                    let error = MonitorError::MalformedMessage {
                        input: "request".to_string(),
                        details: format!("line longer than {MAX_LINE_LEN} bytes"),
                    };
                    if self.write(Packet::from(error)).await.is_err() {
                        break SessionEnd::TransportFailure;
                    }
                    continue;
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    let error = MonitorError::transport("read request", e);
                    error!(peer = %self.peer, "{}", error);
                    // Best effort, the socket is probably gone
                    let _ = self.write(Packet::from(&error)).await;
                    break SessionEnd::TransportFailure;
                }
            };

            if line.trim().is_empty() {
                continue;
            }
            requests += 1;

            let packet = self.dispatcher.handle_line(&line).await;
            let closing = packet.should_close;
            if let Err(e) = self.write(packet).await {
                error!(peer = %self.peer, "{}", e);
                break SessionEnd::TransportFailure;
            }
            if closing {
                break SessionEnd::Closed;
            }
        };

        self.dispatcher.shutdown().await;
        if let Err(e) = SinkExt::<String>::close(&mut self.lines).await {
            debug!(peer = %self.peer, "Socket close failed: {}", e);
        }

        match end {
            SessionEnd::Closed | SessionEnd::Disconnected => {
                info!(peer = %self.peer, requests, ?end, "Session ended");
            }
            SessionEnd::TransportFailure | SessionEnd::Cancelled => {
                warn!(peer = %self.peer, requests, ?end, "Session aborted");
            }
        }
        SessionSummary { requests, end }
    }

    async fn write(&mut self, packet: Packet) -> crate::Result<()> {
        self.lines.send(packet.to_line()).await.map_err(|e| match e {
            LinesCodecError::Io(e) => MonitorError::transport("write response", e),
            other => MonitorError::transport("write response", other),
        })
    }
}
