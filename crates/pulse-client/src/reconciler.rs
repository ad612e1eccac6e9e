//! Message stream reconciliation.
//!
//! Produces one ordered, de-duplicated message list per conversation from
//! two independent sources (REST history pages and the live event stream)
//! and tracks delivery status transitions. Both sources feed the same merge
//! path, so the history polling fallback and push events can never produce
//! inconsistent state, and events re-delivered across a reconnect are
//! absorbed idempotently.

use std::collections::HashMap;

use tracing::{debug, warn};

use pulse_shared::types::{ConversationId, Message, MessageStatus};

/// Outcome of merging one message into a conversation log.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// The message was new and inserted in order.
    Inserted,
    /// An entry with this id existed; its status was refreshed.
    StatusChanged(MessageStatus),
    /// An entry with this id existed and nothing changed.
    Unchanged,
}

/// Outcome of applying a receipt-driven status transition.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusOutcome {
    Applied,
    /// The transition would regress the status; discarded.
    Stale,
    /// No message with that id is known (receipts can outrun the message
    /// across a reconnect).
    Unknown,
}

/// Outcome of processing a send confirmation.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    /// A placeholder matched and adopted the server id.
    Confirmed {
        placeholder_id: String,
        server_id: String,
    },
    /// No placeholder matched; the record was merged as a regular message.
    Merged(MergeOutcome),
}

struct Entry {
    message: Message,
    /// Arrival sequence, the tie-breaker for equal timestamps.
    seq: u64,
}

#[derive(Default)]
struct ConversationLog {
    /// Kept sorted by `(created_at, seq)` ascending.
    entries: Vec<Entry>,
    /// Message id to position in `entries`.
    index: HashMap<String, usize>,
    next_seq: u64,
}

impl ConversationLog {
    fn insert(&mut self, message: Message) {
        let pos = self
            .entries
            .partition_point(|e| e.message.created_at <= message.created_at);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(pos, Entry { message, seq });
        self.reindex_from(pos);
    }

    fn reindex_from(&mut self, pos: usize) {
        for (i, entry) in self.entries.iter().enumerate().skip(pos) {
            self.index.insert(entry.message.id.clone(), i);
        }
    }
}

/// Merges history pages and live events into consistent per-conversation
/// message views.
#[derive(Default)]
pub struct Reconciler {
    logs: HashMap<ConversationId, ConversationLog>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a single message, from either source. De-duplication key is the
    /// message id: for a known id only the mutable `status` field is
    /// refreshed (last write wins), everything else is left untouched.
    pub fn merge(&mut self, message: Message) -> MergeOutcome {
        let log = self.logs.entry(message.conversation_id.clone()).or_default();

        if let Some(&pos) = log.index.get(&message.id) {
            let existing = &mut log.entries[pos].message;
            if existing.status != message.status {
                debug!(
                    id = %message.id,
                    from = ?existing.status,
                    to = ?message.status,
                    "Refreshing status of known message"
                );
                existing.status = message.status;
                existing.modified_at = message.modified_at;
                return MergeOutcome::StatusChanged(message.status);
            }
            return MergeOutcome::Unchanged;
        }

        log.insert(message);
        MergeOutcome::Inserted
    }

    /// Merge a freshly fetched history page. Additive: a refetch never drops
    /// messages learned only from the live stream. Returns how many entries
    /// were new.
    pub fn merge_history(
        &mut self,
        conversation_id: &ConversationId,
        messages: Vec<Message>,
    ) -> usize {
        let mut inserted = 0;
        for message in messages {
            debug_assert_eq!(&message.conversation_id, conversation_id);
            if self.merge(message) == MergeOutcome::Inserted {
                inserted += 1;
            }
        }
        debug!(conversation = %conversation_id, inserted, "Merged history page");
        inserted
    }

    /// Match a send confirmation to its optimistic placeholder.
    ///
    /// The protocol carries no client correlation id, so matching is by
    /// recency and field equality: the most recent placeholder in the
    /// conversation with the same sender, kind, and payload, still in
    /// `Sent` status, adopts the server id. Two rapid sends of identical
    /// content can therefore confirm in either order. When no placeholder
    /// matches (late confirmation after the view discarded it, or an echo
    /// of another device's send), the record merges as a regular message.
    pub fn on_send_confirmation(&mut self, confirmed: Message) -> ConfirmOutcome {
        let log = self
            .logs
            .entry(confirmed.conversation_id.clone())
            .or_default();

        let candidate = log
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.message.is_placeholder()
                    && e.message.status == MessageStatus::Sent
                    && e.message.sender.id == confirmed.sender.id
                    && e.message.kind == confirmed.kind
                    && e.message.payload == confirmed.payload
            })
            .max_by_key(|(_, e)| (e.message.created_at, e.seq))
            .map(|(pos, _)| pos);

        match candidate {
            Some(pos) => {
                let placeholder_id = log.entries[pos].message.id.clone();
                let server_id = confirmed.id.clone();

                // Only the id (and modified stamp) change; the optimistic
                // entry keeps its local timestamp and `Sent` status.
                log.index.remove(&placeholder_id);
                let entry = &mut log.entries[pos];
                entry.message.id = server_id.clone();
                entry.message.modified_at = confirmed.modified_at;
                log.index.insert(server_id.clone(), pos);

                debug!(
                    placeholder = %placeholder_id,
                    id = %server_id,
                    "Send confirmed"
                );
                ConfirmOutcome::Confirmed {
                    placeholder_id,
                    server_id,
                }
            }
            None => {
                debug!(id = %confirmed.id, "Confirmation without matching placeholder");
                ConfirmOutcome::Merged(self.merge(confirmed))
            }
        }
    }

    /// Apply a receipt-driven status transition. Forward-only: a transition
    /// that would regress the status is discarded and logged as an anomaly.
    pub fn apply_status(
        &mut self,
        conversation_id: &ConversationId,
        id: &str,
        status: MessageStatus,
    ) -> StatusOutcome {
        let Some(log) = self.logs.get_mut(conversation_id) else {
            debug!(conversation = %conversation_id, id, "Receipt for unknown conversation");
            return StatusOutcome::Unknown;
        };
        let Some(&pos) = log.index.get(id) else {
            debug!(conversation = %conversation_id, id, "Receipt for unknown message");
            return StatusOutcome::Unknown;
        };

        let message = &mut log.entries[pos].message;
        if status <= message.status {
            warn!(
                id,
                current = ?message.status,
                incoming = ?status,
                "Discarding stale status update"
            );
            return StatusOutcome::Stale;
        }

        message.status = status;
        StatusOutcome::Applied
    }

    /// The reconciled view: ascending by `created_at`, ties broken by
    /// arrival order. The order is maintained on insert, not re-sorted per
    /// call.
    pub fn ordered(&self, conversation_id: &ConversationId) -> impl Iterator<Item = &Message> {
        self.logs
            .get(conversation_id)
            .into_iter()
            .flat_map(|log| log.entries.iter().map(|e| &e.message))
    }

    /// Cloned snapshot of the reconciled view, for handing to consumers.
    pub fn snapshot(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.ordered(conversation_id).cloned().collect()
    }

    /// Placeholders that never received a confirmation. Surfaced so the
    /// consuming layer can apply its own timeout policy; this core keeps
    /// them indefinitely, since a late confirmation may still arrive after
    /// a reconnect.
    pub fn unresolved_placeholders(&self, conversation_id: &ConversationId) -> Vec<&Message> {
        self.ordered(conversation_id)
            .filter(|m| m.is_placeholder())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pulse_shared::types::{
        ConversationId, Message, MessagePayload, MessageStatus, Role, SenderRef, UserId,
    };

    fn conv() -> ConversationId {
        ConversationId::from("17")
    }

    fn sender(id: i64) -> SenderRef {
        SenderRef {
            id: UserId(id),
            role: Role::Client,
            display_name: None,
        }
    }

    fn message(id: &str, minute: u32, text: &str) -> Message {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 10, minute, 0).unwrap();
        Message {
            id: id.to_string(),
            conversation_id: conv(),
            sender: sender(42),
            kind: MessagePayload::text(text).kind(),
            payload: MessagePayload::text(text),
            status: MessageStatus::Sent,
            created_at: at,
            modified_at: at,
        }
    }

    fn ids(reconciler: &Reconciler) -> Vec<String> {
        reconciler
            .ordered(&conv())
            .map(|m| m.id.clone())
            .collect()
    }

    #[test]
    fn test_live_event_sorts_into_fetched_history() {
        let mut reconciler = Reconciler::new();
        reconciler.merge_history(&conv(), vec![message("1", 1, "a"), message("2", 2, "b")]);
        reconciler.merge(message("3", 0, "c"));

        assert_eq!(ids(&reconciler), ["3", "1", "2"]);
    }

    #[test]
    fn test_overlapping_refetch_does_not_duplicate() {
        let mut reconciler = Reconciler::new();
        let page = vec![message("1", 1, "a"), message("2", 2, "b")];

        assert_eq!(reconciler.merge_history(&conv(), page.clone()), 2);
        assert_eq!(reconciler.merge_history(&conv(), page), 0);
        assert_eq!(ids(&reconciler), ["1", "2"]);
    }

    #[test]
    fn test_refetch_keeps_messages_known_only_from_live_stream() {
        let mut reconciler = Reconciler::new();
        reconciler.merge(message("9", 3, "live"));

        // A history page captured before "9" existed must not drop it.
        reconciler.merge_history(&conv(), vec![message("1", 1, "a")]);
        assert_eq!(ids(&reconciler), ["1", "9"]);
    }

    #[test]
    fn test_equal_timestamps_keep_arrival_order() {
        let mut reconciler = Reconciler::new();
        reconciler.merge(message("a", 5, "1"));
        reconciler.merge(message("b", 5, "2"));
        reconciler.merge(message("c", 5, "3"));

        assert_eq!(ids(&reconciler), ["a", "b", "c"]);
    }

    #[test]
    fn test_status_never_regresses() {
        let mut reconciler = Reconciler::new();
        reconciler.merge(message("5", 1, "a"));

        assert_eq!(
            reconciler.apply_status(&conv(), "5", MessageStatus::Delivered),
            StatusOutcome::Applied
        );
        // A late `sent` receipt is discarded.
        assert_eq!(
            reconciler.apply_status(&conv(), "5", MessageStatus::Sent),
            StatusOutcome::Stale
        );
        assert_eq!(
            reconciler.ordered(&conv()).next().unwrap().status,
            MessageStatus::Delivered
        );

        assert_eq!(
            reconciler.apply_status(&conv(), "5", MessageStatus::Read),
            StatusOutcome::Applied
        );
        assert_eq!(
            reconciler.apply_status(&conv(), "5", MessageStatus::Delivered),
            StatusOutcome::Stale
        );
    }

    #[test]
    fn test_receipt_for_unknown_message() {
        let mut reconciler = Reconciler::new();
        assert_eq!(
            reconciler.apply_status(&conv(), "ghost", MessageStatus::Read),
            StatusOutcome::Unknown
        );
    }

    #[test]
    fn test_duplicate_inbound_refreshes_status_only() {
        let mut reconciler = Reconciler::new();
        let original = message("5", 1, "a");
        reconciler.merge(original.clone());

        let mut echo = message("5", 1, "a");
        echo.status = MessageStatus::Read;
        echo.payload = MessagePayload::text("tampered");

        assert_eq!(
            reconciler.merge(echo),
            MergeOutcome::StatusChanged(MessageStatus::Read)
        );

        let merged = reconciler.ordered(&conv()).next().unwrap();
        assert_eq!(merged.status, MessageStatus::Read);
        // Immutable fields are left untouched.
        assert_eq!(merged.payload, original.payload);
    }

    #[test]
    fn test_confirmation_adopts_server_id_and_keeps_status() {
        let mut reconciler = Reconciler::new();
        let placeholder = Message::placeholder(conv(), sender(1), MessagePayload::text("hi"));
        let placeholder_id = placeholder.id.clone();
        reconciler.merge(placeholder);

        let mut confirmed = message("981", 2, "hi");
        confirmed.sender = sender(1);

        assert_eq!(
            reconciler.on_send_confirmation(confirmed),
            ConfirmOutcome::Confirmed {
                placeholder_id,
                server_id: "981".to_string(),
            }
        );

        let entry = reconciler.ordered(&conv()).next().unwrap();
        assert_eq!(entry.id, "981");
        assert!(!entry.is_placeholder());
        assert_eq!(entry.status, MessageStatus::Sent);
        assert!(reconciler.unresolved_placeholders(&conv()).is_empty());
    }

    #[test]
    fn test_confirmation_matches_most_recent_placeholder() {
        let mut reconciler = Reconciler::new();
        let first = Message::placeholder(conv(), sender(1), MessagePayload::text("hi"));
        let second = Message::placeholder(conv(), sender(1), MessagePayload::text("hi"));
        let second_id = second.id.clone();
        reconciler.merge(first.clone());
        reconciler.merge(second);

        let mut confirmed = message("981", 2, "hi");
        confirmed.sender = sender(1);

        let ConfirmOutcome::Confirmed { placeholder_id, .. } =
            reconciler.on_send_confirmation(confirmed)
        else {
            panic!("expected a confirmed placeholder");
        };
        assert_eq!(placeholder_id, second_id);

        // The earlier duplicate send is still awaiting its confirmation.
        let pending = reconciler.unresolved_placeholders(&conv());
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, first.id);
    }

    #[test]
    fn test_confirmation_without_placeholder_merges_as_message() {
        let mut reconciler = Reconciler::new();
        let mut confirmed = message("981", 2, "hi");
        confirmed.sender = sender(1);

        assert_eq!(
            reconciler.on_send_confirmation(confirmed),
            ConfirmOutcome::Merged(MergeOutcome::Inserted)
        );
        assert_eq!(ids(&reconciler), ["981"]);
    }

    #[test]
    fn test_payload_mismatch_does_not_confirm() {
        let mut reconciler = Reconciler::new();
        let placeholder = Message::placeholder(conv(), sender(1), MessagePayload::text("hi"));
        reconciler.merge(placeholder);

        let mut confirmed = message("981", 2, "different");
        confirmed.sender = sender(1);

        assert_eq!(
            reconciler.on_send_confirmation(confirmed),
            ConfirmOutcome::Merged(MergeOutcome::Inserted)
        );
        assert_eq!(reconciler.unresolved_placeholders(&conv()).len(), 1);
    }
}
