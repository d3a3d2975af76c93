//! Wire frames exchanged over the realtime connection.
//!
//! Every frame is a JSON object discriminated by its `type` field. User ids
//! travel as strings, message and group ids as numbers.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// A frame received from a client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Direct message to another user.
    Message {
        #[serde(deserialize_with = "deserialize_id")]
        receiver_id: i64,
        #[serde(default)]
        content: String,
    },
    GroupMessage {
        #[serde(deserialize_with = "deserialize_id")]
        group_id: i64,
        #[serde(default)]
        content: String,
    },
    Typing {
        #[serde(deserialize_with = "deserialize_id")]
        receiver_id: i64,
    },
    StopTyping {
        #[serde(deserialize_with = "deserialize_id")]
        receiver_id: i64,
    },
    /// Ask for an immediate presence snapshot.
    UserListRequest,
}

/// Why an inbound text frame could not be classified.
#[derive(Debug)]
pub enum FrameError {
    /// The `type` tag is not one the router handles.
    UnknownType(String),
    /// Not JSON, no `type` tag, or fields of the wrong shape.
    Malformed(serde_json::Error),
}

const KNOWN_TYPES: [&str; 5] = [
    "message",
    "group_message",
    "typing",
    "stop_typing",
    "user_list_request",
];

impl ClientFrame {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text).map_err(FrameError::Malformed)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| FrameError::Malformed(serde_json::Error::custom("missing `type`")))?;
        if !KNOWN_TYPES.contains(&kind) {
            return Err(FrameError::UnknownType(kind.to_string()));
        }
        serde_json::from_value(value).map_err(FrameError::Malformed)
    }
}

/// Accepts an id as a JSON number or as a numeric string.
fn deserialize_id<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Int(i64),
        Str(String),
    }

    match Repr::deserialize(d)? {
        Repr::Int(id) => Ok(id),
        Repr::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid id `{s}`"))),
    }
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

fn serialize_id_as_string<S: Serializer>(id: &i64, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(id)
}

/// A persisted direct message as delivered to the receiver and echoed to the sender.
#[derive(Debug, Clone, Serialize)]
pub struct DirectMessageFrame {
    pub id: i64,
    pub content: String,
    #[serde(serialize_with = "serialize_id_as_string")]
    pub sender_id: i64,
    pub sender_name: String,
    #[serde(serialize_with = "serialize_id_as_string")]
    pub receiver_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupMessageFrame {
    pub id: i64,
    pub group_id: i64,
    pub content: String,
    #[serde(serialize_with = "serialize_id_as_string")]
    pub sender_id: i64,
    pub sender_name: String,
}

/// Typing indicator relayed to its receiver.
#[derive(Debug, Clone, Serialize)]
pub struct TypingFrame {
    #[serde(serialize_with = "serialize_id_as_string")]
    pub sender_id: i64,
    pub sender_name: String,
    #[serde(serialize_with = "serialize_id_as_string")]
    pub receiver_id: i64,
}

/// One user inside a `user_list` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub id: String,
    pub nickname: String,
    pub avatar: String,
    pub is_online: bool,
}

/// A frame sent from the server to a client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Message(DirectMessageFrame),
    /// Badge hint accompanying a delivered direct message.
    NewMessageNotification {
        #[serde(serialize_with = "serialize_id_as_string")]
        sender_id: i64,
        sender_name: String,
        content: String,
    },
    GroupMessage(GroupMessageFrame),
    Typing(TypingFrame),
    StopTyping(TypingFrame),
    /// Full presence snapshot; `content` is the JSON-encoded list of
    /// [`PresenceEntry`]. Replaces whatever snapshot the client holds.
    UserList { content: String },
    /// Authorization failure, sent only to the offending sender.
    Error { content: String },
    /// Realtime copy of a persisted notification. `id` is `None` when the
    /// durable write failed.
    Notification {
        id: Option<i64>,
        notification_type: String,
        data: Value,
    },
}

impl ServerFrame {
    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: content.into(),
        }
    }

    /// True for the high-frequency, low-value frames the outbound pump may throttle.
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Typing(_) | Self::StopTyping(_))
    }
}
