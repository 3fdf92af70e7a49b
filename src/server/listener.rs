//! Command port listener

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session::Session;
use crate::config::MonitorConfig;
use crate::dispatch::Dispatcher;
use crate::drivers::DriverRegistry;
use crate::{MonitorError, Result};

/// Longest single wait for a connection, so a stop request is noticed promptly.
pub const ACCEPT_SLICE: Duration = Duration::from_millis(100);

/// Bound command port serving one session at a time.
pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<DriverRegistry>,
    config: Arc<MonitorConfig>,
}

impl Listener {
    /// Bind the command port from `config` with a backlog of one.
    pub async fn bind(config: MonitorConfig, registry: DriverRegistry) -> Result<Self> {
        let addr = config.listen_addr();
        let bind_error = |e: std::io::Error| MonitorError::transport(format!("bind command port {addr}"), e);

        let socket = if addr.is_ipv4() { TcpSocket::new_v4() } else { TcpSocket::new_v6() }.map_err(bind_error)?;
        socket.set_reuseaddr(true).map_err(bind_error)?;
        socket.bind(addr).map_err(bind_error)?;
        let listener = socket.listen(1).map_err(bind_error)?;
        let local_addr = listener.local_addr()?;

        info!("Listening for commands on {}", local_addr);
        Ok(Self { listener, local_addr, registry: Arc::new(registry), config: Arc::new(config) })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept and serve sessions one after another until `cancel` fires.
    ///
    /// Returns the number of sessions served.
    pub async fn run(self, cancel: CancellationToken) -> Result<u64> {
        let mut sessions = 0u64;

        while !cancel.is_cancelled() {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = tokio::time::timeout(ACCEPT_SLICE, self.listener.accept()) => accepted,
            };

            let (stream, peer) = match accepted {
                Err(_) => continue,
                Ok(Ok(accepted)) => accepted,
                Ok(Err(e)) => {
                    warn!("Accept failed: {}", e);
                    continue;
                }
            };

            sessions += 1;
            let dispatcher = Dispatcher::new(Arc::clone(&self.registry), Arc::clone(&self.config));
            let summary = Session::new(stream, peer, dispatcher).run(cancel.clone()).await;
            debug!(session = sessions, ?summary, "Ready for the next session");
        }

        info!("Listener on {} stopped after {} sessions", self.local_addr, sessions);
        Ok(sessions)
    }

    /// Run on the tokio runtime, returning a handle to stop it.
    pub fn spawn(self) -> ServerHandle {
        let cancel = CancellationToken::new();
        let local_addr = self.local_addr;
        let task = tokio::spawn(self.run(cancel.clone()));
        ServerHandle { local_addr, cancel, task }
    }
}

/// Handle to a spawned [`Listener`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<Result<u64>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Token that stops the listener when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop accepting, end the current session and wait for the listener.
    pub async fn shutdown(self) -> Result<u64> {
        self.cancel.cancel();
        self.task.await.map_err(|e| MonitorError::device_with_source("listener task failed", e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_config;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    async fn request(stream: &mut BufReader<TcpStream>, line: &str) -> serde_json::Value {
        stream.get_mut().write_all(format!("{line}\n").as_bytes()).await.unwrap();
        let mut reply = String::new();
        stream.read_line(&mut reply).await.unwrap();
        serde_json::from_str(&reply).unwrap()
    }

    #[tokio::test]
    async fn sessions_are_served_one_after_another() {
        let listener = Listener::bind(test_config(), DriverRegistry::with_builtin()).await.unwrap();
        let server = listener.spawn();

        for _ in 0..2 {
            let mut client = BufReader::new(TcpStream::connect(server.local_addr()).await.unwrap());
            let reply = request(&mut client, r#"{"command": "CHOOSE", "machine": "Echo"}"#).await;
            assert_eq!(reply["error"], 0);
            let reply = request(&mut client, r#"{"command": "CLOSE"}"#).await;
            assert_eq!(reply["close"], true);

            let mut rest = String::new();
            assert_eq!(client.read_line(&mut rest).await.unwrap(), 0, "server closes the socket");
        }

        assert_eq!(server.shutdown().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn shutdown_ends_an_open_session() {
        let listener = Listener::bind(test_config(), DriverRegistry::with_builtin()).await.unwrap();
        let server = listener.spawn();

        let mut client = BufReader::new(TcpStream::connect(server.local_addr()).await.unwrap());
        let reply = request(&mut client, r#"{"command": "CHOOSE", "machine": "Display"}"#).await;
        assert_eq!(reply["error"], 0);

        assert_eq!(server.shutdown().await.unwrap(), 1);
        let mut rest = String::new();
        assert_eq!(client.read_line(&mut rest).await.unwrap(), 0);
    }
}
