//! Legacy perimeter reached over a line-based text bridge
//!
//! Each capability sends one text sub-command and reads one reply line:
//!
//! | Command    | Sent                              | Reply            |
//! |------------|-----------------------------------|------------------|
//! | INITIALIZE | `HELLO`                           | device banner    |
//! | QUERY      | `QUERY`                           | device status    |
//! | SETUP      | `SETUP <bgLum> <fixShape>`        | `OK`             |
//! | PRESENT    | `PRESENT <x> <y> <lum> <t> <w>`   | `<seen> <time>`  |
//! | CLOSE      | `BYE`                             | anything         |
//!
//! A reply starting with `ERR` is a device failure.

use std::sync::LazyLock;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use crate::config::{BridgeConfig, MonitorConfig};
use crate::driver::{Driver, MachineState};
use crate::schema::{Arguments, CommandTable, EnumKind, ParameterSpec, ReturnSpec};
use crate::types::{Command, Packet};
use crate::{MonitorError, Result};

/// Longest reply line accepted from the device.
const MAX_REPLY_LEN: usize = 4096;

static COMMANDS: LazyLock<Result<CommandTable>> = LazyLock::new(|| {
    CommandTable::builder(Bridge::NAME)
        .command(
            Command::Initialize,
            vec![
                ParameterSpec::text("ip").describe("device address"),
                ParameterSpec::integer("port", 1, 65_535).describe("device port"),
            ],
            vec![ReturnSpec::new("banner", "device identification")],
        )
        .command(Command::Query, vec![], vec![ReturnSpec::new("status", "device status line")])
        .command(
            Command::Setup,
            vec![
                ParameterSpec::number("bgLum", 0.0, 3183.1).or_default(json!(10)),
                ParameterSpec::symbol("fixShape", EnumKind::Shape).or_default(json!("CROSS")),
            ],
            vec![],
        )
        .command(
            Command::Present,
            vec![
                ParameterSpec::number("x", -90.0, 90.0),
                ParameterSpec::number("y", -90.0, 90.0),
                ParameterSpec::number("lum", 0.0, 3183.1),
                ParameterSpec::number("t", 0.0, 10_000.0).or_default(json!(200)),
                ParameterSpec::number("w", 0.0, 20_000.0).or_default(json!(1500)),
            ],
            vec![
                ReturnSpec::new("seen", "whether the observer responded"),
                ReturnSpec::new("time", "reaction time in ms"),
            ],
        )
        .build()
});

/// Driver for devices speaking the text bridge protocol.
pub struct Bridge {
    state: MachineState,
    commands: &'static CommandTable,
    timeouts: BridgeConfig,
    link: Option<Framed<TcpStream, LinesCodec>>,
}

impl Bridge {
    pub const NAME: &'static str = "Bridge";

    pub fn new(config: &MonitorConfig) -> Result<Box<dyn Driver>> {
        let commands = COMMANDS.as_ref().map_err(|e| MonitorError::DriverConstructionFailed {
            name: Self::NAME.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(Self { state: MachineState::default(), commands, timeouts: config.bridge.clone(), link: None }))
    }

    /// Send one sub-command and wait for its reply line.
    async fn exchange(&mut self, request: String) -> Result<String> {
        let timeout = Duration::from_millis(self.timeouts.reply_timeout_ms);
        let link = self.link.as_mut().ok_or_else(|| MonitorError::device("bridge is not connected"))?;

        debug!(request = %request, "Bridge send");
        link.send(request).await.map_err(|e| MonitorError::device_with_source("bridge write", e))?;

        let reply = match tokio::time::timeout(timeout, link.next()).await {
            Ok(Some(Ok(line))) => line,
            Ok(Some(Err(e))) => return Err(MonitorError::device_with_source("bridge read", e)),
            Ok(None) => return Err(MonitorError::device("bridge closed the connection")),
            Err(_) => {
                return Err(MonitorError::Timeout { operation: "bridge reply".to_string(), duration: timeout });
            }
        };
        debug!(reply = %reply, "Bridge reply");

        if let Some(reason) = reply.strip_prefix("ERR") {
            return Err(MonitorError::device(format!("bridge reported:{reason}")));
        }
        Ok(reply)
    }
}

/// Parse a PRESENT reply `<seen> <time>`.
fn parse_presentation(reply: &str) -> Result<(bool, i64)> {
    let mut fields = reply.split_whitespace();
    let (Some(seen), Some(time), None) = (fields.next(), fields.next(), fields.next()) else {
        return Err(MonitorError::device(format!("unexpected PRESENT reply '{reply}'")));
    };
    let seen = match seen {
        "1" => true,
        "0" => false,
        other => return Err(MonitorError::device(format!("unexpected seen flag '{other}'"))),
    };
    let time = time.parse().map_err(|_| MonitorError::device(format!("unexpected response time '{time}'")))?;
    Ok((seen, time))
}

#[async_trait::async_trait]
impl Driver for Bridge {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn commands(&self) -> &'static CommandTable {
        self.commands
    }

    async fn initialize(&mut self, args: &Arguments) -> Result<Packet> {
        let ip = args.text("ip")?;
        let port = u16::try_from(args.integer("port")?)
            .map_err(|e| MonitorError::device_with_source("bridge port out of range", e))?;
        let address = format!("{ip}:{port}");

        // Reconnecting: say goodbye on the old link first
        if self.link.is_some() {
            if let Err(e) = self.exchange("BYE".to_string()).await {
                warn!("Bridge goodbye before reconnect failed: {}", e);
            }
            self.link = None;
            self.state.mark_closed();
        }
        let timeout = Duration::from_millis(self.timeouts.connect_timeout_ms);

        let stream = match tokio::time::timeout(timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(MonitorError::device_with_source(format!("connect to {address}"), e)),
            Err(_) => {
                return Err(MonitorError::Timeout { operation: format!("connect to {address}"), duration: timeout });
            }
        };
        stream.set_nodelay(true).map_err(|e| MonitorError::device_with_source("configure bridge socket", e))?;
        self.link = Some(Framed::new(stream, LinesCodec::new_with_max_length(MAX_REPLY_LEN)));

        let banner = self.exchange("HELLO".to_string()).await?;
        self.state.mark_initialized();
        info!(address = %address, banner = %banner, "Bridge connected");
        Ok(Packet::object(json!({"banner": banner})))
    }

    async fn query(&mut self, _args: &Arguments) -> Result<Packet> {
        let mut metadata = self.commands.to_json();
        if self.state.is_initialized() {
            let status = self.exchange("QUERY".to_string()).await?;
            metadata["status"] = Value::String(status);
        }
        Ok(Packet::object(metadata))
    }

    async fn setup(&mut self, args: &Arguments) -> Result<Packet> {
        self.state.require_initialized(Self::NAME)?;
        let request = format!("SETUP {} {}", args.number("bgLum")?, args.symbol("fixShape")?);
        let reply = self.exchange(request).await?;
        Ok(Packet::text(reply))
    }

    async fn present(&mut self, args: &Arguments) -> Result<Packet> {
        self.state.require_initialized(Self::NAME)?;
        let request = format!(
            "PRESENT {} {} {} {} {}",
            args.number("x")?,
            args.number("y")?,
            args.number("lum")?,
            args.number("t")?,
            args.number("w")?
        );
        let reply = self.exchange(request).await?;
        let (seen, time) = parse_presentation(&reply)?;
        self.state.next_presentation();
        Ok(Packet::object(json!({"seen": seen, "time": time})))
    }

    async fn close(&mut self, _args: &Arguments) -> Result<Packet> {
        let result = if self.link.is_some() { self.exchange("BYE".to_string()).await.map(|_| ()) } else { Ok(()) };
        self.link = None;
        self.state.mark_closed();
        result?;
        Ok(Packet::text(format!("{} closed", Self::NAME)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::invoke;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Fake device answering each line through `reply`; returns its port.
    async fn fake_device(reply: fn(&str) -> String) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let answer = reply(&line);
                write.write_all(format!("{answer}\n").as_bytes()).await.unwrap();
            }
        });
        port
    }

    async fn run(driver: &mut Box<dyn Driver>, command: Command, request: Value) -> Result<Packet> {
        let args = driver.commands().validate(command, request.as_object().unwrap())?;
        invoke(driver.as_mut(), &args).await
    }

    fn device(line: &str) -> String {
        match line.split_whitespace().next() {
            Some("HELLO") => "FAKE-PERIMETER 1.0".to_string(),
            Some("QUERY") => "READY".to_string(),
            Some("SETUP") => "OK".to_string(),
            Some("PRESENT") => "1 412".to_string(),
            _ => "BYE".to_string(),
        }
    }

    #[tokio::test]
    async fn full_session_over_the_bridge() {
        let port = fake_device(device).await;
        let mut bridge = Bridge::new(&MonitorConfig::default()).unwrap();

        let init = run(&mut bridge, Command::Initialize, json!({"ip": "127.0.0.1", "port": port})).await.unwrap();
        assert_eq!(init.payload, crate::types::Payload::Object(json!({"banner": "FAKE-PERIMETER 1.0"})));

        let query = run(&mut bridge, Command::Query, json!({})).await.unwrap();
        let query: Value = serde_json::from_str(&query.to_line()).unwrap();
        assert_eq!(query["msg"]["status"], json!("READY"));
        assert_eq!(query["msg"]["machine"], json!("Bridge"));

        let setup = run(&mut bridge, Command::Setup, json!({"fixShape": "square"})).await.unwrap();
        assert_eq!(setup.message(), Some("OK"));

        let present = run(&mut bridge, Command::Present, json!({"x": 1, "y": 2, "lum": 30})).await.unwrap();
        assert_eq!(present.payload, crate::types::Payload::Object(json!({"seen": true, "time": 412})));

        let close = run(&mut bridge, Command::Close, json!({})).await.unwrap();
        assert!(!close.is_error);
    }

    #[tokio::test]
    async fn device_errors_are_reported() {
        let port = fake_device(|line| if line == "HELLO" { "HI".into() } else { "ERR lamp failure".into() }).await;
        let mut bridge = Bridge::new(&MonitorConfig::default()).unwrap();
        run(&mut bridge, Command::Initialize, json!({"ip": "127.0.0.1", "port": port})).await.unwrap();

        let err = run(&mut bridge, Command::Present, json!({"x": 0, "y": 0, "lum": 1})).await.unwrap_err();
        assert!(err.to_string().contains("lamp failure"), "{err}");
    }

    #[tokio::test]
    async fn unreachable_device_fails_initialize() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut bridge = Bridge::new(&MonitorConfig::default()).unwrap();
        let result = run(&mut bridge, Command::Initialize, json!({"ip": "127.0.0.1", "port": port})).await;
        assert!(matches!(result, Err(MonitorError::Device { .. } | MonitorError::Timeout { .. })));
    }

    #[tokio::test]
    async fn fractional_ports_are_rejected() {
        let mut bridge = Bridge::new(&MonitorConfig::default()).unwrap();
        let err = run(&mut bridge, Command::Initialize, json!({"ip": "127.0.0.1", "port": 8080.7}))
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::TypeMismatch { .. }), "{err}");
    }

    #[tokio::test]
    async fn reinitialize_says_goodbye_on_the_old_link() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen_tx, mut seen) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            for connection in 0..2 {
                let (socket, _) = listener.accept().await.unwrap();
                let seen_tx = seen_tx.clone();
                tokio::spawn(async move {
                    let (read, mut write) = socket.into_split();
                    let mut lines = BufReader::new(read).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let answer = device(&line);
                        seen_tx.send((connection, line)).unwrap();
                        write.write_all(format!("{answer}\n").as_bytes()).await.unwrap();
                    }
                });
            }
        });

        let mut bridge = Bridge::new(&MonitorConfig::default()).unwrap();
        let request = json!({"ip": "127.0.0.1", "port": port});
        run(&mut bridge, Command::Initialize, request.clone()).await.unwrap();
        run(&mut bridge, Command::Initialize, request).await.unwrap();

        let mut lines = Vec::new();
        for _ in 0..3 {
            lines.push(seen.recv().await.unwrap());
        }
        assert_eq!(
            lines,
            vec![(0, "HELLO".to_string()), (0, "BYE".to_string()), (1, "HELLO".to_string())]
        );
    }

    #[test]
    fn presentation_replies_are_strict() {
        assert_eq!(parse_presentation("0 -1").unwrap(), (false, -1));
        assert!(parse_presentation("yes 10").is_err());
        assert!(parse_presentation("1").is_err());
        assert!(parse_presentation("1 2 3").is_err());
    }
}
