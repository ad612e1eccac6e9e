//! JSON wire protocol spoken over the realtime transport.
//!
//! Frames are JSON objects of the form `{"event": <name>, "data": <payload>}`.
//! The server's payloads are not shape-stable: a user id may arrive as a JSON
//! number or a string, under `userId` or `ref_id` depending on the event.
//! This module is the single normalization point for those quirks; handlers
//! past this boundary only ever see [`types`](crate::types) values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{
    ConversationId, ConversationKind, Message, MessageKind, MessagePayload, MessageStatus, Role,
    SenderRef, UserId,
};

// ---------------------------------------------------------------------------
// Id normalization
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrStr {
    Num(i64),
    Str(String),
}

/// Accept a numeric id serialized as either a JSON number or a string.
fn flexible_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumOrStr::deserialize(deserializer)? {
        NumOrStr::Num(n) => Ok(n),
        NumOrStr::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("non-numeric id: {s:?}"))),
    }
}

fn opt_flexible_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumOrStr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumOrStr::Num(n)) => Ok(Some(n)),
        Some(NumOrStr::Str(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("non-numeric id: {s:?}"))),
    }
}

/// Accept an opaque id serialized as either a JSON number or a string,
/// normalized to its string form.
fn flexible_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match NumOrStr::deserialize(deserializer)? {
        NumOrStr::Num(n) => Ok(n.to_string()),
        NumOrStr::Str(s) => Ok(s),
    }
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

/// Payload of the `online` / `offline` events. The subject's id may arrive
/// under either field, as a number or a string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresencePayload {
    #[serde(
        rename = "userId",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "opt_flexible_id"
    )]
    pub user_id: Option<i64>,
    #[serde(
        rename = "ref_id",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "opt_flexible_id"
    )]
    pub ref_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl PresencePayload {
    /// The subject user id, whichever field it arrived under.
    pub fn subject(&self) -> Option<UserId> {
        self.user_id.or(self.ref_id).map(UserId)
    }

    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id.as_i64()),
            ref_id: None,
            role: None,
        }
    }
}

/// Sender block embedded in message events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireSender {
    #[serde(deserialize_with = "flexible_id")]
    pub id: i64,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A message record as carried by `recieve-message`, `message-sent`, and the
/// REST history endpoint (the backend serves the same shape in both places).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireMessage {
    #[serde(deserialize_with = "flexible_string")]
    pub id: String,
    #[serde(rename = "refId", deserialize_with = "flexible_string")]
    pub ref_id: String,
    #[serde(rename = "msgType")]
    pub msg_type: MessageKind,
    #[serde(rename = "msgParams")]
    pub msg_params: serde_json::Value,
    #[serde(rename = "sent_by")]
    pub sent_by: WireSender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

impl WireMessage {
    /// Convert into the domain model, interpreting `msgParams` per `msgType`.
    pub fn into_message(self) -> crate::Result<Message> {
        let payload = MessagePayload::from_wire(self.msg_type, self.msg_params)?;
        Ok(Message {
            id: self.id,
            conversation_id: ConversationId(self.ref_id),
            sender: SenderRef {
                id: UserId(self.sent_by.id),
                role: self.sent_by.role,
                display_name: self.sent_by.name,
            },
            kind: self.msg_type,
            payload,
            status: self.status.unwrap_or(MessageStatus::Sent),
            created_at: self.created,
            modified_at: self.modified.unwrap_or(self.created),
        })
    }
}

/// Payload of the `message-delivered` / `message-read` receipt events,
/// also emitted by the client when acking receipt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReceiptPayload {
    #[serde(rename = "refId", deserialize_with = "flexible_string")]
    pub ref_id: String,
    #[serde(deserialize_with = "flexible_string")]
    pub id: String,
}

/// Payload of the out-of-band `notification` event. `ref_id` is the
/// conversation reference, numeric on this event and string elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPayload {
    #[serde(deserialize_with = "flexible_string")]
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub description: String,
    pub time: DateTime<Utc>,
    #[serde(rename = "ref_id", deserialize_with = "flexible_string")]
    pub ref_id: String,
}

// ---------------------------------------------------------------------------
// Event frames
// ---------------------------------------------------------------------------

/// Every event the server pushes over the realtime transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Handshake acknowledgment; the connection is authenticated and live.
    #[serde(rename = "connect")]
    Connect,

    #[serde(rename = "online")]
    Online(PresencePayload),

    #[serde(rename = "offline")]
    Offline(PresencePayload),

    // The event name is misspelled upstream; it is matched literally.
    #[serde(rename = "recieve-message")]
    RecieveMessage(WireMessage),

    /// Confirmation echo of a message this client sent.
    #[serde(rename = "message-sent")]
    MessageSent(WireMessage),

    #[serde(rename = "message-delivered")]
    MessageDelivered(ReceiptPayload),

    #[serde(rename = "message-read")]
    MessageRead(ReceiptPayload),

    #[serde(rename = "notification")]
    Notification(NotificationPayload),

    /// Server-initiated teardown with a reason string.
    #[serde(rename = "disconnect")]
    Disconnect(String),
}

impl ServerEvent {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Envelope of an outgoing message send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageEnvelope {
    #[serde(rename = "refId")]
    pub ref_id: String,
    #[serde(rename = "msgType")]
    pub msg_type: MessageKind,
    #[serde(rename = "msgParams")]
    pub msg_params: MessagePayload,
    #[serde(rename = "type")]
    pub conversation_type: ConversationKind,
}

/// Every event the client emits over the realtime transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Fire-and-forget presence query; the answer arrives asynchronously as
    /// an `online` / `offline` event.
    #[serde(rename = "check-online")]
    CheckOnline {
        #[serde(rename = "userId")]
        user_id: i64,
    },

    #[serde(rename = "message")]
    Message(MessageEnvelope),

    /// Receipt ack for an inbound message in the open conversation.
    #[serde(rename = "message-delivered")]
    Delivered(ReceiptPayload),
}

impl ClientEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
