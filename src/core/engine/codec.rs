use crate::core::errors::EngineError;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

/// Outbound control frame. Constructed, encoded, sent and discarded per
/// call; nothing here is retained by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Auth {
        api_key: String,
        expires: i64,
        signature: String,
    },
    Subscribe {
        req_id: String,
        topics: Vec<String>,
    },
    Unsubscribe {
        req_id: String,
        topics: Vec<String>,
    },
    Ping,
}

impl OutboundFrame {
    /// Encode into the `{op, args}` wire form.
    pub fn to_message(&self) -> Result<Message, EngineError> {
        let value = match self {
            Self::Auth {
                api_key,
                expires,
                signature,
            } => json!({
                "op": "auth",
                "args": [api_key, expires, signature],
            }),
            Self::Subscribe { req_id, topics } => json!({
                "op": "subscribe",
                "req_id": req_id,
                "args": topics,
            }),
            Self::Unsubscribe { req_id, topics } => json!({
                "op": "unsubscribe",
                "req_id": req_id,
                "args": topics,
            }),
            Self::Ping => json!({ "op": "ping" }),
        };

        let text = serde_json::to_string(&value)?;
        Ok(Message::Text(text))
    }
}

/// Server acknowledgement of an auth/subscribe/unsubscribe request, or a
/// heartbeat reply.
#[derive(Debug, Clone)]
pub struct AckFrame {
    pub op: String,
    pub req_id: Option<String>,
    pub success: Option<bool>,
    pub ret_msg: Option<String>,
}

/// Data frame routed by topic. `frame` keeps the full JSON body so the
/// registered decoder sees everything the server sent.
#[derive(Debug, Clone)]
pub struct DataFrame {
    pub topic: String,
    pub frame: Value,
}

/// One parsed inbound frame.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Ack(AckFrame),
    Data(DataFrame),
    Unknown(Value),
}

/// Parse the discriminator of one inbound text frame without decoding any
/// payload: frames carrying an `op` are acks, frames carrying a `topic` are
/// data, anything else is unknown and left to the caller to drop.
pub fn parse_inbound(text: &str) -> Result<InboundFrame, EngineError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| EngineError::ProtocolError(format!("malformed frame: {}", e)))?;

    if let Some(op) = value.get("op").and_then(Value::as_str) {
        return Ok(InboundFrame::Ack(AckFrame {
            op: op.to_string(),
            req_id: value
                .get("req_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            success: value.get("success").and_then(Value::as_bool),
            ret_msg: value
                .get("ret_msg")
                .and_then(Value::as_str)
                .map(str::to_string),
        }));
    }

    if let Some(topic) = value.get("topic").and_then(Value::as_str) {
        let topic = topic.to_string();
        return Ok(InboundFrame::Data(DataFrame { topic, frame: value }));
    }

    Ok(InboundFrame::Unknown(value))
}
