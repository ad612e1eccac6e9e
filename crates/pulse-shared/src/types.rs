//! Domain model for conversations, messages, and counterpart users.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the embedding UI layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::PLACEHOLDER_ID_PREFIX;

// User ids are numeric on the backend, but individual wire events serialize
// them inconsistently (sometimes as JSON numbers, sometimes as strings).
// Normalization happens once, in the protocol layer; everything past that
// boundary works with this newtype.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

impl UserId {
    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque conversation identifier. The same identifier space covers personal
/// (1:1) and group chats; a conversation's kind is derived from its metadata,
/// not from the id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Role of a user in the business application.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Client,
    Sales,
    Manager,
}

/// Kind discriminator for message payloads, as spelled on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    File,
    Quote,
    Agreement,
}

/// Delivery status of a message, observed by its sender from the
/// recipient's acks. The derived `Ord` encodes the only legal progression:
/// `Sent < Delivered < Read`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Sent => 0,
            Self::Delivered => 1,
            Self::Read => 2,
        }
    }
}

/// Whether a conversation is a 1:1 or a group chat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Personal,
    Group,
}

/// Identity of a message sender.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SenderRef {
    pub id: UserId,
    pub role: Role,
    /// Display name, when the server includes one.
    pub display_name: Option<String>,
}

/// Parameters of a plain text message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextPayload {
    pub text: String,
}

/// Parameters of a file attachment message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilePayload {
    pub url: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Parameters of a price quote message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuotePayload {
    pub title: String,
    pub amount: f64,
    pub currency: String,
}

/// Parameters of an agreement message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgreementPayload {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Kind-specific message parameters. Serializes as the bare parameter object
/// (`msgParams` on the wire carries no discriminator; the sibling `msgType`
/// field does). Ingress deserialization is driven by the kind via
/// [`MessagePayload::from_wire`]; the untagged fallback order below only
/// matters when no kind is available.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessagePayload {
    Text(TextPayload),
    File(FilePayload),
    Quote(QuotePayload),
    Agreement(AgreementPayload),
}

impl MessagePayload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::File(_) => MessageKind::File,
            Self::Quote(_) => MessageKind::Quote,
            Self::Agreement(_) => MessageKind::Agreement,
        }
    }

    /// Interpret a raw `msgParams` value according to the wire `msgType`.
    pub fn from_wire(
        kind: MessageKind,
        params: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            MessageKind::Text => Self::Text(serde_json::from_value(params)?),
            MessageKind::File => Self::File(serde_json::from_value(params)?),
            MessageKind::Quote => Self::Quote(serde_json::from_value(params)?),
            MessageKind::Agreement => Self::Agreement(serde_json::from_value(params)?),
        })
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(TextPayload { text: text.into() })
    }
}

/// A single chat message. Immutable once created except for `status`
/// (and the id swap when a placeholder is confirmed by the server).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Server-assigned id, or a client-generated placeholder id until the
    /// send is confirmed.
    pub id: String,
    pub conversation_id: ConversationId,
    pub sender: SenderRef,
    pub kind: MessageKind,
    pub payload: MessagePayload,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Message {
    /// Build the optimistic local entry for an outgoing message.
    pub fn placeholder(
        conversation_id: ConversationId,
        sender: SenderRef,
        payload: MessagePayload,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("{}{}", PLACEHOLDER_ID_PREFIX, Uuid::new_v4()),
            conversation_id,
            kind: payload.kind(),
            sender,
            payload,
            status: MessageStatus::Sent,
            created_at: now,
            modified_at: now,
        }
    }

    /// Whether this message still carries a client-generated id.
    pub fn is_placeholder(&self) -> bool {
        self.id.starts_with(PLACEHOLDER_ID_PREFIX)
    }
}

/// A participant of a conversation, as reported by the REST conversation
/// list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub user_id: UserId,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// When the participant last opened the conversation, if known. Seeds
    /// the "last seen" label before any live presence event arrives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_viewed: Option<DateTime<Utc>>,
}

/// Cached metadata for one conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMeta {
    pub id: ConversationId,
    /// Present only for group conversations; its presence is what makes a
    /// conversation a group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    pub participants: Vec<Participant>,
}

impl ConversationMeta {
    /// Derived kind: a conversation is a group iff the group field is set.
    pub fn kind(&self) -> ConversationKind {
        if self.group_name.is_some() {
            ConversationKind::Group
        } else {
            ConversationKind::Personal
        }
    }

    /// Every participant except the local user.
    pub fn counterparts(&self, self_id: UserId) -> impl Iterator<Item = &Participant> {
        self.participants
            .iter()
            .filter(move |p| p.user_id != self_id)
    }
}

/// Connectivity state of the session transport.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// An in-app notification scoped to the conversation it references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: String,
    pub conversation_id: ConversationId,
    pub text: String,
    pub description: String,
    pub time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_progression_order() {
        assert!(MessageStatus::Sent < MessageStatus::Delivered);
        assert!(MessageStatus::Delivered < MessageStatus::Read);
        assert_eq!(MessageStatus::Read.ordinal(), 2);
    }

    #[test]
    fn test_placeholder_id_prefix() {
        let msg = Message::placeholder(
            ConversationId::from("17"),
            SenderRef {
                id: UserId(3),
                role: Role::Sales,
                display_name: None,
            },
            MessagePayload::text("hello"),
        );
        assert!(msg.is_placeholder());
        assert_eq!(msg.status, MessageStatus::Sent);
        assert_eq!(msg.kind, MessageKind::Text);
    }

    #[test]
    fn test_conversation_kind_derived_from_group_field() {
        let mut meta = ConversationMeta {
            id: ConversationId::from("42"),
            group_name: None,
            participants: vec![],
        };
        assert_eq!(meta.kind(), ConversationKind::Personal);

        meta.group_name = Some("Project Alpha".to_string());
        assert_eq!(meta.kind(), ConversationKind::Group);
    }

    #[test]
    fn test_counterparts_excludes_self() {
        let meta = ConversationMeta {
            id: ConversationId::from("42"),
            group_name: None,
            participants: vec![
                Participant {
                    user_id: UserId(1),
                    role: Role::Sales,
                    display_name: None,
                    last_viewed: None,
                },
                Participant {
                    user_id: UserId(2),
                    role: Role::Client,
                    display_name: None,
                    last_viewed: None,
                },
            ],
        };

        let others: Vec<_> = meta.counterparts(UserId(1)).collect();
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].user_id, UserId(2));
    }
}
