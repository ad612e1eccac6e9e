//! Routing of out-of-band notification events.
//!
//! Notifications are ephemeral and scoped to whichever conversation is
//! currently open: events referencing the open conversation are appended to
//! an in-memory list, everything else is dropped. The list is discarded on
//! navigation away.

use tracing::debug;

use pulse_shared::protocol::NotificationPayload;
use pulse_shared::types::{ConversationId, Notification};

/// Attributes inbound notification events to the active conversation.
#[derive(Debug, Default)]
pub struct NotificationRouter {
    active: Option<ConversationId>,
    items: Vec<Notification>,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a conversation as the active one. Switching discards anything
    /// collected for the previous conversation.
    pub fn open(&mut self, conversation_id: ConversationId) {
        if self.active.as_ref() != Some(&conversation_id) {
            self.items.clear();
        }
        self.active = Some(conversation_id);
    }

    /// Navigation away: drop the active conversation and its notifications.
    pub fn close(&mut self) {
        self.active = None;
        self.items.clear();
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn active(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    /// Route one inbound event. The event's conversation reference is
    /// already string-normalized at the protocol boundary (it arrives
    /// numeric on this event, string elsewhere), so a plain string
    /// comparison suffices here. Returns the stored notification when it
    /// matched the active conversation, `None` when it was dropped.
    pub fn on_notification(&mut self, payload: NotificationPayload) -> Option<&Notification> {
        let Some(active) = &self.active else {
            debug!(id = %payload.id, "Dropping notification, no open conversation");
            return None;
        };
        if payload.ref_id != active.as_str() {
            debug!(
                id = %payload.id,
                conversation = %payload.ref_id,
                active = %active,
                "Dropping notification for another conversation"
            );
            return None;
        }

        self.items.push(Notification {
            id: payload.id,
            conversation_id: active.clone(),
            text: payload.text,
            description: payload.description,
            time: payload.time,
        });
        self.items.last()
    }

    pub fn items(&self) -> &[Notification] {
        &self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn payload(id: &str, ref_id: &str) -> NotificationPayload {
        NotificationPayload {
            id: id.to_string(),
            text: "Payment received".to_string(),
            description: "Invoice #12 was paid".to_string(),
            time: Utc::now(),
            ref_id: ref_id.to_string(),
        }
    }

    #[test]
    fn test_routes_to_active_conversation() {
        let mut router = NotificationRouter::new();
        router.open(ConversationId::from("17"));

        assert!(router.on_notification(payload("n1", "17")).is_some());
        assert!(router.on_notification(payload("n2", "99")).is_none());

        assert_eq!(router.items().len(), 1);
        assert_eq!(router.items()[0].id, "n1");
    }

    #[test]
    fn test_numeric_reference_matches_after_normalization() {
        let mut router = NotificationRouter::new();
        router.open(ConversationId::from("17"));

        // The wire event carries ref_id as a JSON number; by the time it
        // reaches the router it is the normalized string form.
        let raw = r#"{"id": 5, "text": "t", "time": "2025-03-01T10:00:00Z", "ref_id": 17}"#;
        let payload: NotificationPayload = serde_json::from_str(raw).unwrap();
        assert!(router.on_notification(payload).is_some());
    }

    #[test]
    fn test_dropped_without_open_conversation() {
        let mut router = NotificationRouter::new();
        assert!(router.on_notification(payload("n1", "17")).is_none());
        assert!(router.items().is_empty());
    }

    #[test]
    fn test_close_discards_items() {
        let mut router = NotificationRouter::new();
        router.open(ConversationId::from("17"));
        router.on_notification(payload("n1", "17"));

        router.close();
        assert!(router.items().is_empty());
        assert!(router.active().is_none());
    }

    #[test]
    fn test_switching_conversations_resets_list() {
        let mut router = NotificationRouter::new();
        router.open(ConversationId::from("17"));
        router.on_notification(payload("n1", "17"));

        router.open(ConversationId::from("99"));
        assert!(router.items().is_empty());
        assert!(router.on_notification(payload("n2", "99")).is_some());
    }
}
