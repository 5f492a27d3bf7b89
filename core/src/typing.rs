/// Typing indicators with TTL expiry
use crate::chat_types::{ConversationId, UserId};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingSignal {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

impl TypingSignal {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug)]
pub struct TypingTracker {
    ttl: Duration,
    signals: HashMap<(ConversationId, UserId), TypingSignal>,
}

impl TypingTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            signals: HashMap::new(),
        }
    }

    /// Start or refresh a signal
    pub fn start(&mut self, conversation_id: ConversationId, user_id: UserId, now: DateTime<Utc>) {
        let signal = TypingSignal {
            conversation_id: conversation_id.clone(),
            user_id: user_id.clone(),
            expires_at: now
                .checked_add_signed(self.ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.signals.insert((conversation_id, user_id), signal);
    }

    pub fn stop(&mut self, conversation_id: &ConversationId, user_id: &UserId) -> bool {
        self.signals
            .remove(&(conversation_id.clone(), user_id.clone()))
            .is_some()
    }

    /// Users typing in a conversation right now, sorted by id
    pub fn active_users(&self, conversation_id: &ConversationId, now: DateTime<Utc>) -> Vec<UserId> {
        let mut users: Vec<_> = self
            .signals
            .values()
            .filter(|s| &s.conversation_id == conversation_id && s.is_active(now))
            .map(|s| s.user_id.clone())
            .collect();
        users.sort();
        users
    }

    /// Drop expired signals, returning how many went away
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.signals.len();
        self.signals.retain(|_, s| s.is_active(now));
        before - self.signals.len()
    }

    /// Cancel every timer of a conversation that stopped being active
    pub fn clear_conversation(&mut self, conversation_id: &ConversationId) {
        self.signals
            .retain(|(conv, _), _| conv != conversation_id);
    }
}

/// "Bob is typing...", "Bob and Carol are typing...", "3 people are typing..."
pub fn typing_text(names: &[String]) -> Option<String> {
    match names {
        [] => None,
        [one] => Some(format!("{} is typing...", one)),
        [a, b] => Some(format!("{} and {} are typing...", a, b)),
        many => Some(format!("{} people are typing...", many.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_signal_expires_at_ttl() {
        let mut tracker = TypingTracker::new(Duration::seconds(5));
        let conv = ConversationId::from("c1");
        let bob = UserId::from("2");
        tracker.start(conv.clone(), bob.clone(), t0());

        assert!(tracker.active_users(&conv, t0() + Duration::milliseconds(4999)).contains(&bob));
        assert!(!tracker.active_users(&conv, t0() + Duration::seconds(5)).contains(&bob));
        assert!(!tracker.active_users(&conv, t0() + Duration::seconds(60)).contains(&bob));
    }

    #[test]
    fn test_refresh_extends_signal() {
        let mut tracker = TypingTracker::new(Duration::seconds(5));
        let conv = ConversationId::from("c1");
        let bob = UserId::from("2");
        tracker.start(conv.clone(), bob.clone(), t0());
        tracker.start(conv.clone(), bob.clone(), t0() + Duration::seconds(4));
        assert!(tracker.active_users(&conv, t0() + Duration::seconds(8)).contains(&bob));
    }

    #[test]
    fn test_stop_clears_immediately() {
        let mut tracker = TypingTracker::new(Duration::seconds(5));
        let conv = ConversationId::from("c1");
        let bob = UserId::from("2");
        tracker.start(conv.clone(), bob.clone(), t0());
        assert!(tracker.stop(&conv, &bob));
        assert!(!tracker.active_users(&conv, t0()).contains(&bob));
        assert!(!tracker.stop(&conv, &bob));
    }

    #[test]
    fn test_prune_and_clear_conversation() {
        let mut tracker = TypingTracker::new(Duration::seconds(5));
        let a = ConversationId::from("a");
        let b = ConversationId::from("b");
        tracker.start(a.clone(), UserId::from("2"), t0());
        tracker.start(a.clone(), UserId::from("3"), t0() + Duration::seconds(3));
        tracker.start(b.clone(), UserId::from("2"), t0() + Duration::seconds(3));

        assert_eq!(tracker.prune(t0() + Duration::seconds(5)), 1);
        assert_eq!(tracker.active_users(&a, t0() + Duration::seconds(5)), vec![UserId::from("3")]);

        tracker.clear_conversation(&a);
        let later = t0() + Duration::seconds(6);
        assert!(tracker.active_users(&a, later).is_empty());
        assert_eq!(tracker.active_users(&b, later), vec![UserId::from("2")]);
    }

    #[test]
    fn test_huge_ttl_does_not_overflow() {
        let mut tracker = TypingTracker::new(Duration::days(365 * 400_000));
        let conv = ConversationId::from("c1");
        let bob = UserId::from("2");
        tracker.start(conv.clone(), bob.clone(), t0());
        assert!(tracker.active_users(&conv, t0() + Duration::days(1)).contains(&bob));
    }

    #[test]
    fn test_typing_text() {
        assert_eq!(typing_text(&[]), None);
        assert_eq!(typing_text(&["Bob".into()]).unwrap(), "Bob is typing...");
        assert_eq!(
            typing_text(&["Bob".into(), "Carol".into()]).unwrap(),
            "Bob and Carol are typing..."
        );
        assert_eq!(
            typing_text(&["A".into(), "B".into(), "C".into()]).unwrap(),
            "3 people are typing..."
        );
    }
}
