//! Client sessions against a spawned listener over real sockets.

use perimon::{DriverRegistry, Listener, MonitorConfig, ServerHandle};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const CONFIG: &str = r#"
port: 0
camera:
  enabled: false
  stream_port: null
display:
  frame_interval_ms: 1
  instruction_timeout_ms: 1000
  simulated_reaction_ms: 5
"#;

async fn start() -> ServerHandle {
    // RUST_LOG=perimon=debug shows the server side of a failing test
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let config = MonitorConfig::from_yaml_str(CONFIG).expect("test configuration is valid");
    Listener::bind(config, DriverRegistry::with_builtin()).await.expect("bind").spawn()
}

struct Client {
    stream: BufReader<TcpStream>,
}

impl Client {
    async fn connect(server: &ServerHandle) -> Self {
        Self { stream: BufReader::new(TcpStream::connect(server.local_addr()).await.unwrap()) }
    }

    async fn send(&mut self, line: &str) -> Value {
        self.stream.get_mut().write_all(format!("{line}\n").as_bytes()).await.unwrap();
        let mut reply = String::new();
        self.stream.read_line(&mut reply).await.unwrap();
        serde_json::from_str(&reply).unwrap()
    }

    async fn at_eof(&mut self) -> bool {
        let mut rest = String::new();
        self.stream.read_line(&mut rest).await.unwrap() == 0
    }
}

#[tokio::test]
async fn echo_session_from_choose_to_close() {
    let server = start().await;
    let mut client = Client::connect(&server).await;

    let chosen = client.send(r#"{"command": "CHOOSE", "machine": "Echo"}"#).await;
    assert_eq!(chosen, json!({"error": 0, "close": false, "msg": "Echo chosen"}));

    let presented = client.send(r#"{"command": "PRESENT", "x": 0, "y": 0}"#).await;
    assert_eq!(presented["error"], 0);
    assert_eq!(presented["close"], false);
    assert_eq!(presented["msg"]["x"], json!(0));
    assert_eq!(presented["msg"]["y"], json!(0));

    let closed = client.send(r#"{"command": "CLOSE"}"#).await;
    assert_eq!(closed["error"], 0);
    assert_eq!(closed["close"], true);
    assert!(client.at_eof().await);

    assert_eq!(server.shutdown().await.unwrap(), 1);
}

#[tokio::test]
async fn bad_requests_keep_the_session_open() {
    let server = start().await;
    let mut client = Client::connect(&server).await;

    let malformed = client.send("{not json").await;
    assert_eq!(malformed["error"], 1);
    assert_eq!(malformed["close"], false);
    assert!(malformed["msg"].as_str().unwrap().contains("not a valid Json object"));

    let missing = client.send(r#"{"machine": "Echo"}"#).await;
    assert_eq!(missing["error"], 1);
    assert!(missing["msg"].as_str().unwrap().contains("'command'"));

    let unknown = client.send(r#"{"command": "DANCE"}"#).await;
    assert_eq!(unknown["error"], 1);
    assert!(unknown["msg"].as_str().unwrap().contains("DANCE"));

    let early = client.send(r#"{"command": "PRESENT", "x": 0, "y": 0}"#).await;
    assert_eq!(early["error"], 1);
    assert!(early["msg"].as_str().unwrap().contains("CHOOSE"));

    let no_machine = client.send(r#"{"command": "CHOOSE", "machine": "Octopus"}"#).await;
    assert_eq!(no_machine["error"], 1);
    assert!(no_machine["msg"].as_str().unwrap().contains("Echo"));

    // Still usable after every failure
    let chosen = client.send(r#"{"command": "CHOOSE", "machine": "echo"}"#).await;
    assert_eq!(chosen["error"], 0);
    let out_of_range = client.send(r#"{"command": "PRESENT", "x": 400, "y": 0}"#).await;
    assert_eq!(out_of_range["error"], 1);
    assert_eq!(out_of_range["close"], false);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn display_session_with_a_simulated_observer() {
    let server = start().await;
    let mut client = Client::connect(&server).await;

    assert_eq!(client.send(r#"{"command": "CHOOSE", "machine": "Display"}"#).await["error"], 0);

    let query = client.send(r#"{"command": "QUERY"}"#).await;
    assert_eq!(query["error"], 0);
    assert!(query["msg"].is_object());

    assert_eq!(client.send(r#"{"command": "INITIALIZE", "tracking": 0}"#).await["error"], 0);
    assert_eq!(client.send(r#"{"command": "SETUP", "bgLum": 10}"#).await["error"], 0);

    let refused = client.send(r#"{"command": "CHOOSE", "machine": "Echo"}"#).await;
    assert_eq!(refused["error"], 1);

    let presented = client.send(r#"{"command": "PRESENT", "x": 3, "y": -3, "lum": 100, "t": 50, "w": 500}"#).await;
    assert_eq!(presented["error"], 0, "{presented}");
    assert_eq!(presented["msg"]["seen"], json!(true));
    assert!(presented["msg"]["time"].as_i64().unwrap() >= 0);

    let closed = client.send(r#"{"command": "CLOSE"}"#).await;
    assert_eq!(closed["close"], true);
    assert!(client.at_eof().await);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn a_dropped_client_frees_the_listener() {
    let server = start().await;

    let mut first = Client::connect(&server).await;
    assert_eq!(first.send(r#"{"command": "CHOOSE", "machine": "Echo"}"#).await["error"], 0);
    drop(first);

    let mut second = Client::connect(&server).await;
    let chosen = second.send(r#"{"command": "CHOOSE", "machine": "Echo"}"#).await;
    assert_eq!(chosen["error"], 0);
    drop(second);

    server.shutdown().await.unwrap();
}
