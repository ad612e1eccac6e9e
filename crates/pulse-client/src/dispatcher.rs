//! Outbound message construction.
//!
//! Builds the optimistic local placeholder and the wire envelope for an
//! outgoing send. The envelope's `type` discriminator is derived from the
//! conversation's cached metadata (the presence of a group field), not from
//! a separate lookup call.

use pulse_shared::protocol::MessageEnvelope;
use pulse_shared::types::{ConversationId, ConversationKind, Message, MessagePayload, SenderRef};

/// Construct the placeholder message and wire envelope for one send.
///
/// The placeholder carries a client-generated id and `Sent` status; it is
/// handed to the reconciler for optimistic display and later adopts the
/// server id when the confirmation echo arrives.
pub fn compose(
    conversation_id: ConversationId,
    conversation_kind: ConversationKind,
    sender: SenderRef,
    payload: MessagePayload,
) -> (Message, MessageEnvelope) {
    let envelope = MessageEnvelope {
        ref_id: conversation_id.as_str().to_string(),
        msg_type: payload.kind(),
        msg_params: payload.clone(),
        conversation_type: conversation_kind,
    };
    let placeholder = Message::placeholder(conversation_id, sender, payload);
    (placeholder, envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_shared::types::{FilePayload, MessageKind, MessageStatus, Role, UserId};

    fn sender() -> SenderRef {
        SenderRef {
            id: UserId(3),
            role: Role::Sales,
            display_name: Some("Ann".to_string()),
        }
    }

    #[test]
    fn test_compose_text_for_personal_conversation() {
        let (placeholder, envelope) = compose(
            ConversationId::from("17"),
            ConversationKind::Personal,
            sender(),
            MessagePayload::text("hi"),
        );

        assert!(placeholder.is_placeholder());
        assert_eq!(placeholder.status, MessageStatus::Sent);
        assert_eq!(placeholder.kind, MessageKind::Text);
        assert_eq!(placeholder.sender.id, UserId(3));

        assert_eq!(envelope.ref_id, "17");
        assert_eq!(envelope.msg_type, MessageKind::Text);
        assert_eq!(envelope.conversation_type, ConversationKind::Personal);
        assert_eq!(envelope.msg_params, placeholder.payload);
    }

    #[test]
    fn test_compose_file_for_group_conversation() {
        let payload = MessagePayload::File(FilePayload {
            url: "https://files.example/contract.pdf".to_string(),
            name: "contract.pdf".to_string(),
            size: Some(18_231),
        });

        let (placeholder, envelope) = compose(
            ConversationId::from("42"),
            ConversationKind::Group,
            sender(),
            payload,
        );

        assert_eq!(placeholder.kind, MessageKind::File);
        assert_eq!(envelope.msg_type, MessageKind::File);
        assert_eq!(envelope.conversation_type, ConversationKind::Group);
    }
}
