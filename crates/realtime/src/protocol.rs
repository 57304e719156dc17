//! JSON hub protocol framing.
//!
//! Every record is a JSON object terminated by the ASCII record separator
//! (`0x1E`). A text frame may carry several records. The connection opens
//! with a handshake record; the server answers `{}` or `{"error": "..."}`.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{RealtimeError, RealtimeResult};

pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Hub method and event names.
pub mod methods {
    pub const JOIN_CONVERSATION: &str = "JoinConversation";
    pub const LEAVE_CONVERSATION: &str = "LeaveConversation";
    pub const SEND_MESSAGE: &str = "SendMessage";
    pub const ADD_MEMBER_TO_CONVERSATION: &str = "AddMemberToConversation";
    pub const SEND_READ_RECEIPT: &str = "SendReadReceipt";

    pub const RECEIVE_MESSAGE: &str = "ReceiveMessage";
    pub const MESSAGE_SENT: &str = "MessageSent";
    /// Spelled as the server spells it.
    pub const RECEIVE_READ_RECEIPT: &str = "ReceiveReadReciept";
    pub const RECEIVE_READ_SENT: &str = "ReceiveReadSent";
    pub const RECEIVE_TYPING_STATUS: &str = "ReceiveTypingStatus";
}

const INVOCATION: u8 = 1;
const COMPLETION: u8 = 3;
const PING: u8 = 6;
const CLOSE: u8 = 7;

#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    Ping,
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// Streaming and cancellation records; the client never starts streams.
    Unsupported(u8),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    invocation_id: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: bool,
}

#[derive(Deserialize)]
struct HandshakeResponse {
    #[serde(default)]
    error: Option<String>,
}

pub fn handshake_request() -> String {
    frame(&json!({ "protocol": "json", "version": 1 }))
}

pub fn parse_handshake_response(record: &str) -> RealtimeResult<()> {
    let response: HandshakeResponse = serde_json::from_str(record)?;
    match response.error {
        Some(error) => Err(RealtimeError::Connection(format!(
            "handshake rejected: {error}"
        ))),
        None => Ok(()),
    }
}

/// Non-empty records of a text frame, separators stripped.
pub fn split_records(frame: &str) -> impl Iterator<Item = &str> {
    frame
        .split(RECORD_SEPARATOR)
        .map(str::trim)
        .filter(|record| !record.is_empty())
}

pub fn decode(record: &str) -> RealtimeResult<HubMessage> {
    let raw: RawRecord = serde_json::from_str(record)?;
    Ok(match raw.kind {
        INVOCATION => HubMessage::Invocation {
            invocation_id: raw.invocation_id,
            target: raw
                .target
                .ok_or_else(|| RealtimeError::Protocol("invocation without target".into()))?,
            arguments: raw.arguments,
        },
        COMPLETION => HubMessage::Completion {
            invocation_id: raw
                .invocation_id
                .ok_or_else(|| RealtimeError::Protocol("completion without id".into()))?,
            result: raw.result,
            error: raw.error,
        },
        PING => HubMessage::Ping,
        CLOSE => HubMessage::Close {
            error: raw.error,
            allow_reconnect: raw.allow_reconnect,
        },
        other => HubMessage::Unsupported(other),
    })
}

pub fn encode(message: &HubMessage) -> String {
    let value = match message {
        HubMessage::Invocation {
            invocation_id,
            target,
            arguments,
        } => {
            let mut value = json!({
                "type": INVOCATION,
                "target": target,
                "arguments": arguments,
            });
            if let Some(id) = invocation_id {
                value["invocationId"] = json!(id);
            }
            value
        }
        HubMessage::Completion {
            invocation_id,
            result,
            error,
        } => {
            let mut value = json!({ "type": COMPLETION, "invocationId": invocation_id });
            if let Some(error) = error {
                value["error"] = json!(error);
            } else if let Some(result) = result {
                value["result"] = result.clone();
            }
            value
        }
        HubMessage::Ping => json!({ "type": PING }),
        HubMessage::Close {
            error,
            allow_reconnect,
        } => {
            let mut value = json!({ "type": CLOSE });
            if let Some(error) = error {
                value["error"] = json!(error);
            }
            if *allow_reconnect {
                value["allowReconnect"] = json!(true);
            }
            value
        }
        HubMessage::Unsupported(kind) => json!({ "type": kind }),
    };
    frame(&value)
}

fn frame(value: &Value) -> String {
    let mut text = value.to_string();
    text.push(RECORD_SEPARATOR);
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_request_is_terminated() {
        let request = handshake_request();
        assert!(request.ends_with(RECORD_SEPARATOR));
        let record = split_records(&request).next().unwrap();
        let value: Value = serde_json::from_str(record).unwrap();
        assert_eq!(value, json!({ "protocol": "json", "version": 1 }));
    }

    #[test]
    fn test_handshake_response() {
        assert!(parse_handshake_response("{}").is_ok());
        assert!(matches!(
            parse_handshake_response(r#"{"error":"unsupported protocol"}"#),
            Err(RealtimeError::Connection(_))
        ));
    }

    #[test]
    fn test_frame_with_several_records() {
        let frame = "{}\u{1e}{\"type\":6}\u{1e}{\"type\":1,\"target\":\"ReceiveMessage\",\"arguments\":[{\"id\":7}]}\u{1e}";
        let records: Vec<_> = split_records(frame).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(decode(records[1]).unwrap(), HubMessage::Ping);
        match decode(records[2]).unwrap() {
            HubMessage::Invocation {
                target, arguments, ..
            } => {
                assert_eq!(target, "ReceiveMessage");
                assert_eq!(arguments[0]["id"], json!(7));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_invocation_encoding() {
        let encoded = encode(&HubMessage::Invocation {
            invocation_id: Some("4".into()),
            target: methods::JOIN_CONVERSATION.into(),
            arguments: vec![json!(42)],
        });
        let value: Value = serde_json::from_str(encoded.trim_end_matches(RECORD_SEPARATOR)).unwrap();
        assert_eq!(value["type"], json!(1));
        assert_eq!(value["invocationId"], json!("4"));
        assert_eq!(value["arguments"], json!([42]));

        let fire_and_forget = encode(&HubMessage::Invocation {
            invocation_id: None,
            target: methods::SEND_MESSAGE.into(),
            arguments: vec![],
        });
        assert!(!fire_and_forget.contains("invocationId"));
    }

    #[test]
    fn test_completion_and_close_decoding() {
        assert_eq!(
            decode(r#"{"type":3,"invocationId":"1","error":"no such group"}"#).unwrap(),
            HubMessage::Completion {
                invocation_id: "1".into(),
                result: None,
                error: Some("no such group".into()),
            }
        );
        assert_eq!(
            decode(r#"{"type":7,"allowReconnect":true}"#).unwrap(),
            HubMessage::Close {
                error: None,
                allow_reconnect: true,
            }
        );
        assert_eq!(decode(r#"{"type":2}"#).unwrap(), HubMessage::Unsupported(2));
        assert!(decode(r#"{"type":1}"#).is_err());
        assert!(decode("not json").is_err());
    }
}
