//! Response packets written back to clients

use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::Value;

use crate::MonitorError;

/// Packet payload: either a plain message or a structured object.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Object(Value),
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Payload::Text(text) => serializer.serialize_str(text),
            Payload::Object(value) => value.serialize(serializer),
        }
    }
}

/// One response to one request.
///
/// Serializes as `{"error": 0|1, "close": bool, "msg": ...}`. A packet with
/// `should_close` set ends the session once it has been written.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub is_error: bool,
    pub should_close: bool,
    pub payload: Payload,
}

impl Packet {
    /// Successful packet with a text message.
    pub fn text(msg: impl Into<String>) -> Self {
        Self { is_error: false, should_close: false, payload: Payload::Text(msg.into()) }
    }

    /// Successful packet with a structured payload.
    pub fn object(value: Value) -> Self {
        Self { is_error: false, should_close: false, payload: Payload::Object(value) }
    }

    /// Error packet with a text message.
    pub fn error(msg: impl Into<String>) -> Self {
        Self { is_error: true, should_close: false, payload: Payload::Text(msg.into()) }
    }

    /// Mark the packet as the last one of its session.
    pub fn closing(mut self) -> Self {
        self.should_close = true;
        self
    }

    /// Message text, if the payload is text.
    pub fn message(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text),
            Payload::Object(_) => None,
        }
    }

    /// Serialize to a single line of Json (without the trailing newline).
    pub fn to_line(&self) -> String {
        match serde_json::to_string(self) {
            Ok(line) => line,
            // Payloads are built from `Value`, which always serializes
            Err(_) => r#"{"error":1,"close":false,"msg":"unserializable response"}"#.to_string(),
        }
    }
}

impl Serialize for Packet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Packet", 3)?;
        state.serialize_field("error", &u8::from(self.is_error))?;
        state.serialize_field("close", &self.should_close)?;
        state.serialize_field("msg", &self.payload)?;
        state.end()
    }
}

/// Error packet for `error`, closing the session when the error ends it.
impl From<&MonitorError> for Packet {
    fn from(error: &MonitorError) -> Self {
        let packet = Packet::error(error.to_string());
        if error.terminates_session() { packet.closing() } else { packet }
    }
}

impl From<MonitorError> for Packet {
    fn from(error: MonitorError) -> Self {
        Packet::from(&error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_uses_numeric_error_flag() {
        let line = Packet::text("ok").to_line();
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, json!({"error": 0, "close": false, "msg": "ok"}));

        let line = Packet::error("bad").closing().to_line();
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, json!({"error": 1, "close": true, "msg": "bad"}));
    }

    #[test]
    fn object_payload_is_inlined() {
        let packet = Packet::object(json!({"seen": true, "time": 412}));
        let parsed: Value = serde_json::from_str(&packet.to_line()).unwrap();
        assert_eq!(parsed["msg"]["seen"], json!(true));
        assert_eq!(parsed["msg"]["time"], json!(412));
        assert!(packet.message().is_none());
    }

    #[test]
    fn errors_become_open_error_packets() {
        let packet = Packet::from(MonitorError::NoActiveDriver);
        assert!(packet.is_error);
        assert!(!packet.should_close);
        assert!(packet.message().unwrap().contains("CHOOSE"));
    }

    #[test]
    fn transport_errors_become_closing_packets() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let packet = Packet::from(MonitorError::transport("read request", io_err));
        assert!(packet.is_error);
        assert!(packet.should_close);
    }
}
