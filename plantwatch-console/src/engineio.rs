//! Minimal Engine.IO v4 / Socket.IO v5 text codec
//!
//! Only what a websocket-only client needs: no polling transport, no binary
//! attachments.
//!
//! ```text
//! engine frame : <type digit><payload>         0 open, 2 ping, 3 pong, 4 message ...
//! socket packet: <type digit>[/nsp,][ack id][json]   carried inside a "4" frame
//! ```

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,
    #[error("unknown packet type {0:?}")]
    UnknownType(char),
    #[error("invalid handshake: {0}")]
    Handshake(String),
    #[error("invalid packet payload: {0}")]
    Payload(String),
    #[error("binary attachments are not supported")]
    Binary,
}

/// Payload of the engine `open` frame
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl Handshake {
    /// How long the server may stay silent before the link is considered dead
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_interval + self.ping_timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let payload = chars.as_str();
        Ok(match kind {
            '0' => EnginePacket::Open(
                serde_json::from_str(payload).map_err(|e| ProtocolError::Handshake(e.to_string()))?,
            ),
            '1' => EnginePacket::Close,
            '2' => EnginePacket::Ping(payload.to_string()),
            '3' => EnginePacket::Pong(payload.to_string()),
            '4' => EnginePacket::Message(payload.to_string()),
            '5' => EnginePacket::Upgrade,
            '6' => EnginePacket::Noop,
            other => return Err(ProtocolError::UnknownType(other)),
        })
    }

    /// Client-side encoding (the client never sends `open`)
    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(_) => "0".to_string(),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{data}"),
            EnginePacket::Pong(data) => format!("3{data}"),
            EnginePacket::Message(data) => format!("4{data}"),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect { namespace: String, data: Option<Value> },
    Disconnect { namespace: String },
    Event { namespace: String, id: Option<u64>, name: String, args: Vec<Value> },
    Ack { namespace: String, id: u64, args: Vec<Value> },
    ConnectError { namespace: String, message: String },
}

impl SocketPacket {
    pub fn connect(namespace: &str) -> Self {
        SocketPacket::Connect { namespace: namespace.to_string(), data: None }
    }

    pub fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::Ack { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. } => namespace,
        }
    }

    /// Decode the payload of an engine `message` frame
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let mut rest = chars.as_str();

        if matches!(kind, '5' | '6') {
            return Err(ProtocolError::Binary);
        }

        let namespace = if rest.starts_with('/') {
            let (nsp, tail) = match rest.find(',') {
                Some(at) => (&rest[..at], &rest[at + 1..]),
                None => (rest, ""),
            };
            rest = tail;
            nsp.to_string()
        } else {
            "/".to_string()
        };

        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        let id = if digits > 0 {
            let parsed = rest[..digits]
                .parse::<u64>()
                .map_err(|e| ProtocolError::Payload(e.to_string()))?;
            rest = &rest[digits..];
            Some(parsed)
        } else {
            None
        };

        let json = || -> Result<Option<Value>, ProtocolError> {
            if rest.trim().is_empty() {
                Ok(None)
            } else {
                serde_json::from_str(rest).map(Some).map_err(|e| ProtocolError::Payload(e.to_string()))
            }
        };

        Ok(match kind {
            '0' => SocketPacket::Connect { namespace, data: json()? },
            '1' => SocketPacket::Disconnect { namespace },
            '2' => {
                let Some(Value::Array(mut items)) = json()? else {
                    return Err(ProtocolError::Payload("event payload must be an array".into()));
                };
                if items.is_empty() {
                    return Err(ProtocolError::Payload("event without a name".into()));
                }
                let name = match items.remove(0) {
                    Value::String(name) => name,
                    other => return Err(ProtocolError::Payload(format!("event name must be a string, got {other}"))),
                };
                SocketPacket::Event { namespace, id, name, args: items }
            }
            '3' => {
                let id = id.ok_or_else(|| ProtocolError::Payload("ack without id".into()))?;
                let args = match json()? {
                    Some(Value::Array(items)) => items,
                    _ => return Err(ProtocolError::Payload("ack payload must be an array".into())),
                };
                SocketPacket::Ack { namespace, id, args }
            }
            '4' => {
                let message = match json()? {
                    Some(Value::String(message)) => message,
                    Some(value) => value
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_owned)
                        .unwrap_or_else(|| value.to_string()),
                    None => String::new(),
                };
                SocketPacket::ConnectError { namespace, message }
            }
            other => return Err(ProtocolError::UnknownType(other)),
        })
    }

    /// Encode as socket packet text (without the engine `4` prefix)
    pub fn encode(&self) -> String {
        fn prefix(kind: char, namespace: &str) -> String {
            if namespace == "/" {
                kind.to_string()
            } else {
                format!("{kind}{namespace},")
            }
        }

        match self {
            SocketPacket::Connect { namespace, data } => {
                let mut out = prefix('0', namespace);
                if let Some(data) = data {
                    out.push_str(&data.to_string());
                }
                out
            }
            SocketPacket::Disconnect { namespace } => prefix('1', namespace),
            SocketPacket::Event { namespace, id, name, args } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                let id = id.map(|id| id.to_string()).unwrap_or_default();
                format!("{}{}{}", prefix('2', namespace), id, Value::Array(items))
            }
            SocketPacket::Ack { namespace, id, args } => {
                format!("{}{}{}", prefix('3', namespace), id, Value::Array(args.clone()))
            }
            SocketPacket::ConnectError { namespace, message } => {
                format!("{}{}", prefix('4', namespace), serde_json::json!({ "message": message }))
            }
        }
    }

    /// Full engine frame carrying this packet
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_open_handshake() {
        let packet = EnginePacket::decode(
            r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .unwrap();
        let EnginePacket::Open(handshake) = packet else { panic!("expected open") };
        assert_eq!(handshake.sid, "lv_VI97HAXpY6yYWAAAC");
        assert_eq!(handshake.liveness_timeout(), Duration::from_secs(45));
    }

    #[test]
    fn test_ping_is_answered_with_pong() {
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping(String::new()));
        assert_eq!(EnginePacket::Pong(String::new()).encode(), "3");
        assert!(matches!(EnginePacket::decode("9"), Err(ProtocolError::UnknownType('9'))));
        assert!(matches!(EnginePacket::decode(""), Err(ProtocolError::Empty)));
    }

    #[test]
    fn test_connect_frames() {
        assert_eq!(SocketPacket::connect("/").to_frame(), "40");
        assert_eq!(
            SocketPacket::decode(r#"0{"sid":"abc"}"#).unwrap(),
            SocketPacket::Connect { namespace: "/".into(), data: Some(json!({ "sid": "abc" })) }
        );
        assert_eq!(SocketPacket::connect("/monitoring").encode(), "0/monitoring,");
    }

    #[test]
    fn test_event_with_text_and_object_args() {
        let text = SocketPacket::decode(r#"2["new_metric","{\"device_id\":1}"]"#).unwrap();
        let SocketPacket::Event { name, args, .. } = text else { panic!("expected event") };
        assert_eq!(name, "new_metric");
        assert_eq!(args, vec![json!("{\"device_id\":1}")]);

        let object = SocketPacket::decode(r#"2/admin,12["weather_update",{"temperature":3}]"#).unwrap();
        assert_eq!(
            object,
            SocketPacket::Event {
                namespace: "/admin".into(),
                id: Some(12),
                name: "weather_update".into(),
                args: vec![json!({ "temperature": 3 })],
            }
        );
    }

    #[test]
    fn test_event_encoding_matches_decoding() {
        let packet = SocketPacket::Event {
            namespace: "/".into(),
            id: None,
            name: "new_metric".into(),
            args: vec![json!({ "device_id": "temp-01" })],
        };
        assert_eq!(packet.to_frame(), r#"42["new_metric",{"device_id":"temp-01"}]"#);
        assert_eq!(SocketPacket::decode(&packet.encode()).unwrap(), packet);
    }

    #[test]
    fn test_malformed_packets() {
        assert!(SocketPacket::decode("2{}").is_err());
        assert!(SocketPacket::decode("2[]").is_err());
        assert!(SocketPacket::decode("2[3]").is_err());
        assert!(matches!(SocketPacket::decode("51-[]"), Err(ProtocolError::Binary)));
        assert_eq!(
            SocketPacket::decode(r#"4{"message":"Not authorized"}"#).unwrap(),
            SocketPacket::ConnectError { namespace: "/".into(), message: "Not authorized".into() }
        );
    }
}
