//! Counterpart presence tracking.
//!
//! Maintains an in-memory map of counterpart users and derives a
//! human-readable presence label from three signal sources: explicit
//! `online`/`offline` events, message-activity inference, and the
//! `last_viewed` timestamps the REST conversation list reports.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use pulse_shared::types::UserId;

/// Presence state of one counterpart user.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub is_online: bool,
    /// Meaningful only while offline. While the user is online the last
    /// known value is preserved, not overwritten; it is refreshed on the
    /// online-to-offline transition.
    pub last_seen: Option<DateTime<Utc>>,
}

/// Tracks presence for every counterpart observed in view.
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    records: HashMap<UserId, PresenceRecord>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record from conversation metadata. Never downgrades state
    /// already learned from live events.
    pub fn observe(&mut self, user_id: UserId, last_viewed: Option<DateTime<Utc>>) {
        let record = self.records.entry(user_id).or_insert(PresenceRecord {
            user_id,
            is_online: false,
            last_seen: None,
        });
        if record.last_seen.is_none() {
            record.last_seen = last_viewed;
        }
    }

    /// Apply an explicit `online` event.
    pub fn set_online(&mut self, user_id: UserId) {
        debug!(user = %user_id, "Counterpart online");
        let record = self.entry(user_id);
        record.is_online = true;
    }

    /// Apply an explicit `offline` event. `last_seen` is written only here,
    /// on the online-to-offline transition (or for a first observation).
    pub fn set_offline(&mut self, user_id: UserId, at: DateTime<Utc>) {
        debug!(user = %user_id, "Counterpart offline");
        let record = self.entry(user_id);
        if record.is_online || record.last_seen.is_none() {
            record.last_seen = Some(at);
        }
        record.is_online = false;
    }

    /// Inbound traffic attributed to a counterpart implies liveness even
    /// without an explicit presence event. This is a heuristic inference,
    /// not a server guarantee; a later explicit `offline` event overrides
    /// it.
    pub fn on_activity(&mut self, user_id: UserId) {
        let record = self.entry(user_id);
        if !record.is_online {
            debug!(user = %user_id, "Marking counterpart online from activity");
            record.is_online = true;
        }
    }

    pub fn record(&self, user_id: UserId) -> Option<&PresenceRecord> {
        self.records.get(&user_id)
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.records.get(&user_id).is_some_and(|r| r.is_online)
    }

    /// Human-readable presence label. Pure derivation, no side effects.
    pub fn label(&self, user_id: UserId) -> String {
        self.label_at(user_id, Utc::now())
    }

    pub fn label_at(&self, user_id: UserId, now: DateTime<Utc>) -> String {
        match self.records.get(&user_id) {
            Some(record) if record.is_online => "online".to_string(),
            Some(PresenceRecord {
                last_seen: Some(at),
                ..
            }) => format!("last seen {}", relative_time(*at, now)),
            _ => "Never".to_string(),
        }
    }

    fn entry(&mut self, user_id: UserId) -> &mut PresenceRecord {
        self.records.entry(user_id).or_insert(PresenceRecord {
            user_id,
            is_online: false,
            last_seen: None,
        })
    }
}

/// Coarse relative-time rendering for "last seen" labels.
fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    if secs < 60 {
        "just now".to_string()
    } else if secs < 3_600 {
        let minutes = secs / 60;
        format!("{minutes} minute{} ago", plural(minutes))
    } else if secs < 86_400 {
        let hours = secs / 3_600;
        format!("{hours} hour{} ago", plural(hours))
    } else {
        let days = secs / 86_400;
        format!("{days} day{} ago", plural(days))
    }
}

fn plural(n: i64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const USER: UserId = UserId(42);

    #[test]
    fn test_never_seen_without_any_signal() {
        let mut tracker = PresenceTracker::new();
        assert_eq!(tracker.label(USER), "Never");

        tracker.observe(USER, None);
        assert_eq!(tracker.label(USER), "Never");
    }

    #[test]
    fn test_online_offline_transition_sets_last_seen() {
        let mut tracker = PresenceTracker::new();
        let now = Utc::now();

        tracker.set_online(USER);
        assert!(tracker.is_online(USER));
        assert_eq!(tracker.label_at(USER, now), "online");

        tracker.set_offline(USER, now);
        assert!(!tracker.is_online(USER));
        assert_eq!(tracker.record(USER).unwrap().last_seen, Some(now));
    }

    #[test]
    fn test_last_seen_not_overwritten_while_online() {
        let mut tracker = PresenceTracker::new();
        let first = Utc::now() - Duration::hours(2);

        tracker.set_online(USER);
        tracker.set_offline(USER, first);
        tracker.set_online(USER);

        // Going online again keeps the last known offline timestamp around.
        assert_eq!(tracker.record(USER).unwrap().last_seen, Some(first));

        // A repeated offline event without an intervening online transition
        // does not move the timestamp either.
        tracker.set_offline(USER, first + Duration::hours(1));
        tracker.set_offline(USER, first + Duration::hours(2));
        assert_eq!(
            tracker.record(USER).unwrap().last_seen,
            Some(first + Duration::hours(1))
        );
    }

    #[test]
    fn test_activity_implies_online_until_explicit_offline() {
        let mut tracker = PresenceTracker::new();
        let now = Utc::now();

        tracker.set_online(USER);
        tracker.set_offline(USER, now - Duration::minutes(10));
        assert!(!tracker.is_online(USER));

        // A message from the counterpart flips the record online.
        tracker.on_activity(USER);
        assert!(tracker.is_online(USER));

        // An explicit offline event correctly overrides the inference.
        tracker.set_offline(USER, now);
        assert!(!tracker.is_online(USER));
        assert_eq!(tracker.record(USER).unwrap().last_seen, Some(now));
    }

    #[test]
    fn test_observe_seeds_last_viewed() {
        let mut tracker = PresenceTracker::new();
        let viewed = Utc::now() - Duration::minutes(5);

        tracker.observe(USER, Some(viewed));
        assert_eq!(tracker.label_at(USER, viewed + Duration::minutes(5)), "last seen 5 minutes ago");

        // Seeding again never clobbers what is already known.
        tracker.observe(USER, Some(viewed - Duration::hours(1)));
        assert_eq!(tracker.record(USER).unwrap().last_seen, Some(viewed));
    }

    #[test]
    fn test_relative_time_buckets() {
        let now = Utc::now();
        assert_eq!(relative_time(now - Duration::seconds(30), now), "just now");
        assert_eq!(relative_time(now - Duration::minutes(1), now), "1 minute ago");
        assert_eq!(relative_time(now - Duration::minutes(45), now), "45 minutes ago");
        assert_eq!(relative_time(now - Duration::hours(3), now), "3 hours ago");
        assert_eq!(relative_time(now - Duration::days(2), now), "2 days ago");
    }
}
