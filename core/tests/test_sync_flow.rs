/// Controller-level scenarios: switching, dedupe, unread, typing, scroll
extern crate chatsync_core;

use chatsync_core::chat_types::{
    Conversation, ConversationId, DeliveryState, Message, MessageId, UserRef,
};
use chatsync_core::clock::ManualClock;
use chatsync_core::message_store::{AppendOutcome, MessageStore};
use chatsync_core::projection::{Phase, SyncSnapshot};
use chatsync_core::push::{ChannelTransport, ConnectionState, InboundEvent, OutboundEvent};
use chatsync_core::scroll::Viewport;
use chatsync_core::sync::{Effect, Notice, SyncController, SyncEvent, SyncState};
use chatsync_core::SyncConfig;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;

fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, minute, 0).unwrap()
}

fn alice() -> UserRef {
    UserRef::new("1", "Alice")
}

fn bob() -> UserRef {
    UserRef::new("2", "Bob")
}

fn carol() -> UserRef {
    UserRef::new("3", "Carol")
}

fn msg(id: &str, conv: &str, sender: UserRef, ts: DateTime<Utc>) -> Message {
    Message {
        id: MessageId::from(id),
        conversation_id: ConversationId::from(conv),
        sender,
        body: format!("body of {}", id),
        created_at: ts,
        updated_at: ts,
        delivery_state: DeliveryState::Sent,
    }
}

struct Harness {
    ctl: SyncController,
    clock: ManualClock,
    outbound: mpsc::Receiver<OutboundEvent>,
}

impl Harness {
    fn new(viewer: UserRef) -> Self {
        let clock = ManualClock::new(at(0));
        let (tx, outbound) = mpsc::channel(64);
        let mut ctl = SyncController::new(
            viewer,
            SyncConfig::default(),
            Arc::new(clock.clone()),
            Box::new(ChannelTransport::new(tx)),
        );
        for (id, other) in [("a", bob()), ("b", carol())] {
            ctl.handle(SyncEvent::UpsertConversation {
                conversation: Conversation::direct(id, alice(), other, at(0)),
            });
        }
        Self {
            ctl,
            clock,
            outbound,
        }
    }

    fn open(&mut self, conv: &str) -> u64 {
        let effects = self.ctl.handle(SyncEvent::OpenConversation {
            conversation_id: ConversationId::from(conv),
        });
        match effects.as_slice() {
            [Effect::FetchHistory { request, .. }] => *request,
            other => panic!("expected one fetch, got {:?}", other),
        }
    }

    fn load(&mut self, conv: &str, request: u64, messages: Vec<Message>) {
        self.ctl.handle(SyncEvent::HistoryLoaded {
            conversation_id: ConversationId::from(conv),
            request,
            messages,
        });
    }

    fn live(&mut self, message: Message) {
        self.ctl.handle(SyncEvent::Inbound {
            event: InboundEvent::MessageReceived { message },
        });
    }

    fn ids(&self) -> Vec<String> {
        self.ctl
            .messages()
            .messages()
            .iter()
            .map(|m| m.id.to_string())
            .collect()
    }

    fn drain_outbound(&mut self) -> Vec<OutboundEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.outbound.try_recv() {
            out.push(ev);
        }
        out
    }
}

#[test]
fn test_switch_discards_late_history_of_previous_conversation() {
    let mut h = Harness::new(alice());
    let req_a = h.open("a");
    let req_b = h.open("b");

    // A's fetch lands after the user already moved to B
    h.load("a", req_a, vec![msg("a1", "a", bob(), at(1))]);
    assert_eq!(h.ctl.state().pending(), Some(&ConversationId::from("b")));
    assert!(h.ctl.messages().is_empty());

    h.load("b", req_b, vec![msg("b1", "b", carol(), at(2))]);
    assert_eq!(h.ctl.state().active(), Some(&ConversationId::from("b")));
    assert_eq!(h.ids(), vec!["b1"]);
}

#[test]
fn test_switch_discards_history_arriving_after_new_one() {
    let mut h = Harness::new(alice());
    let req_a = h.open("a");
    let req_b = h.open("b");

    h.load("b", req_b, vec![msg("b1", "b", carol(), at(2))]);
    h.load("a", req_a, vec![msg("a1", "a", bob(), at(1))]);

    assert_eq!(h.ctl.state().active(), Some(&ConversationId::from("b")));
    assert_eq!(h.ids(), vec!["b1"]);
}

#[test]
fn test_reopening_same_conversation_ignores_older_request() {
    let mut h = Harness::new(alice());
    let first = h.open("a");
    h.open("b");
    let second = h.open("a");
    assert_ne!(first, second);

    h.load("a", first, vec![msg("old", "a", bob(), at(1))]);
    assert_eq!(h.ctl.state().pending(), Some(&ConversationId::from("a")));

    h.load("a", second, vec![msg("new", "a", bob(), at(2))]);
    assert_eq!(h.ids(), vec!["new"]);
}

#[test]
fn test_open_while_loading_same_conversation_is_coalesced() {
    let mut h = Harness::new(alice());
    h.open("a");
    let effects = h.ctl.handle(SyncEvent::OpenConversation {
        conversation_id: ConversationId::from("a"),
    });
    assert!(effects.is_empty());
}

#[test]
fn test_live_message_racing_history_is_kept_once() {
    let mut h = Harness::new(alice());
    let req = h.open("a");

    // Push delivers m2 before the REST response that also contains it
    h.live(msg("m2", "a", bob(), at(2)));
    h.load(
        "a",
        req,
        vec![msg("m1", "a", bob(), at(1)), msg("m2", "a", bob(), at(2))],
    );
    h.live(msg("m2", "a", bob(), at(2)));

    assert_eq!(h.ids(), vec!["m1", "m2"]);
}

#[test]
fn test_late_live_message_is_inserted_in_order() {
    let mut h = Harness::new(alice());
    let req = h.open("a");
    h.load(
        "a",
        req,
        vec![msg("m1", "a", bob(), at(0)), msg("m3", "a", bob(), at(2))],
    );
    h.live(msg("m2", "a", bob(), at(1)));

    assert_eq!(h.ids(), vec!["m1", "m2", "m3"]);
}

#[test]
fn test_interleaved_duplicates_never_appear_twice() {
    let mut h = Harness::new(alice());
    let req = h.open("a");
    let history: Vec<Message> = (0..5)
        .map(|i| msg(&format!("m{}", i), "a", bob(), at(i)))
        .collect();

    h.live(history[4].clone());
    h.live(history[3].clone());
    h.load("a", req, history.clone());
    for m in history.iter().rev() {
        h.live(m.clone());
    }

    assert_eq!(h.ids(), vec!["m0", "m1", "m2", "m3", "m4"]);
}

/// Every ordering of `items`
fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head.clone());
            out.push(tail);
        }
    }
    out
}

#[test]
fn test_append_order_and_duplicates_do_not_matter() {
    let conv = ConversationId::from("a");
    // m2 and m3 share a timestamp; the id breaks the tie
    let unique = vec![
        msg("m1", "a", bob(), at(1)),
        msg("m3", "a", carol(), at(2)),
        msg("m2", "a", bob(), at(2)),
        msg("m0", "a", carol(), at(0)),
    ];
    let mut deliveries = unique.clone();
    deliveries.push(unique[1].clone());
    deliveries.push(unique[3].clone());

    let orders = permutations(&deliveries);
    assert_eq!(orders.len(), 720);

    for order in orders {
        let mut store = MessageStore::new();
        store.declare_active(conv.clone());
        let inserted = order
            .into_iter()
            .filter(|m| store.append_live(m.clone()) == AppendOutcome::Inserted)
            .count();
        assert_eq!(inserted, 4);

        let ids: Vec<_> = store.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m0", "m1", "m2", "m3"]);
        assert!(store
            .messages()
            .windows(2)
            .all(|w| (w[0].created_at, &w[0].id) < (w[1].created_at, &w[1].id)));
    }
}

#[test]
fn test_held_back_message_counts_as_unread_after_switching_away() {
    let mut h = Harness::new(alice());
    h.open("b");
    h.live(msg("b1", "b", carol(), at(1)));
    h.open("a");

    let b = ConversationId::from("b");
    assert_eq!(h.ctl.conversations().unread(&b), 1);

    // The same push replayed later is not counted twice
    h.live(msg("b1", "b", carol(), at(1)));
    assert_eq!(h.ctl.conversations().unread(&b), 1);
}

#[test]
fn test_held_back_message_counts_as_unread_after_failed_load() {
    let mut h = Harness::new(alice());
    let req = h.open("b");
    h.live(msg("b1", "b", carol(), at(1)));
    h.live(msg("b2", "b", alice(), at(2)));
    h.ctl.handle(SyncEvent::HistoryFailed {
        conversation_id: ConversationId::from("b"),
        request: req,
        error: "timeout".to_string(),
    });

    let b = ConversationId::from("b");
    assert_eq!(h.ctl.state(), &SyncState::Idle);
    // Own message from another device is not unread
    assert_eq!(h.ctl.conversations().unread(&b), 1);
    assert_eq!(h.ctl.conversations().get(&b).unwrap().last_activity_at, at(2));
}

#[test]
fn test_held_back_message_counts_as_unread_after_close() {
    let mut h = Harness::new(alice());
    h.open("b");
    h.live(msg("b1", "b", carol(), at(1)));
    h.ctl.handle(SyncEvent::CloseConversation);

    assert_eq!(h.ctl.conversations().unread(&ConversationId::from("b")), 1);
    assert_eq!(SyncSnapshot::capture(&h.ctl).total_unread, 1);
}

#[test]
fn test_unread_counts_distinct_messages_for_other_conversations() {
    let mut h = Harness::new(alice());
    let req = h.open("a");
    h.load("a", req, Vec::new());

    h.live(msg("b1", "b", carol(), at(1)));
    h.live(msg("b2", "b", carol(), at(2)));
    h.live(msg("b2", "b", carol(), at(2)));
    h.live(msg("b3", "b", carol(), at(3)));

    let b = ConversationId::from("b");
    assert_eq!(h.ctl.conversations().unread(&b), 3);
    assert_eq!(h.ctl.conversations().unread(&ConversationId::from("a")), 0);

    let snap = SyncSnapshot::capture(&h.ctl);
    assert_eq!(snap.total_unread, 3);
    assert_eq!(snap.unread.len(), 1);

    // Opening the conversation clears its counter once history is in
    let req = h.open("b");
    assert_eq!(h.ctl.conversations().unread(&b), 3);
    h.load("b", req, Vec::new());
    assert_eq!(h.ctl.conversations().unread(&b), 0);
}

#[test]
fn test_own_message_from_other_device_is_not_unread() {
    let mut h = Harness::new(alice());
    let req = h.open("a");
    h.load("a", req, Vec::new());

    h.live(msg("b1", "b", alice(), at(4)));

    let b = ConversationId::from("b");
    assert_eq!(h.ctl.conversations().unread(&b), 0);
    assert_eq!(h.ctl.conversations().get(&b).unwrap().last_activity_at, at(4));
}

#[test]
fn test_typing_expires_after_ttl_and_refresh_extends_it() {
    let mut h = Harness::new(alice());
    let req = h.open("a");
    h.load("a", req, Vec::new());

    let typing = || SyncEvent::Inbound {
        event: InboundEvent::TypingStarted {
            conversation_id: ConversationId::from("a"),
            user_id: bob().id,
        },
    };

    h.ctl.handle(typing());
    assert_eq!(h.ctl.typing_text().as_deref(), Some("Bob is typing..."));
    assert_eq!(h.ctl.header_status().as_deref(), Some("typing..."));

    h.clock.advance(Duration::seconds(4));
    h.ctl.handle(typing());
    h.clock.advance(Duration::seconds(4));
    h.ctl.handle(SyncEvent::Tick);
    assert_eq!(h.ctl.typing_users(), vec![bob().id]);

    h.clock.advance(Duration::milliseconds(1_001));
    h.ctl.handle(SyncEvent::Tick);
    assert!(h.ctl.typing_users().is_empty());
    assert_eq!(h.ctl.typing_text(), None);
}

#[test]
fn test_typing_for_other_conversation_or_self_is_ignored() {
    let mut h = Harness::new(alice());
    let req = h.open("a");
    h.load("a", req, Vec::new());

    h.ctl.handle(SyncEvent::Inbound {
        event: InboundEvent::TypingStarted {
            conversation_id: ConversationId::from("b"),
            user_id: carol().id,
        },
    });
    h.ctl.handle(SyncEvent::Inbound {
        event: InboundEvent::TypingStarted {
            conversation_id: ConversationId::from("a"),
            user_id: alice().id,
        },
    });

    assert!(h.ctl.typing_users().is_empty());
}

#[test]
fn test_scroll_flags_follow_viewport() {
    let mut h = Harness::new(alice());
    let req = h.open("a");
    h.load("a", req, Vec::new());
    let after_open = h.ctl.scroll().scroll_requests();

    // Scrolled up far from the bottom
    h.ctl.handle(SyncEvent::ViewportChanged {
        viewport: Viewport::new(0.0, 400.0, 2_000.0),
    });
    h.live(msg("m1", "a", bob(), at(1)));
    assert!(h.ctl.scroll().new_content_available());
    assert_eq!(h.ctl.scroll().scroll_requests(), after_open);

    // User scrolls back down
    h.ctl.handle(SyncEvent::ViewportChanged {
        viewport: Viewport::new(1_590.0, 400.0, 2_000.0),
    });
    assert!(!h.ctl.scroll().new_content_available());

    h.live(msg("m2", "a", bob(), at(2)));
    assert_eq!(h.ctl.scroll().scroll_requests(), after_open + 1);

    // Own send always jumps, even when scrolled up
    h.ctl.handle(SyncEvent::ViewportChanged {
        viewport: Viewport::new(0.0, 400.0, 2_000.0),
    });
    h.ctl.handle(SyncEvent::SendMessage {
        body: "hey".to_string(),
    });
    assert_eq!(h.ctl.scroll().scroll_requests(), after_open + 2);
    assert!(!h.ctl.scroll().new_content_available());
}

#[test]
fn test_direct_chat_title_is_other_participant() {
    let h = Harness::new(alice());
    let title = h
        .ctl
        .conversations()
        .display_name_or_placeholder(&ConversationId::from("a"), &alice().id);
    assert_eq!(title, "Bob");

    let seen_by_bob = h
        .ctl
        .conversations()
        .display_name_or_placeholder(&ConversationId::from("a"), &bob().id);
    assert_eq!(seen_by_bob, "Alice");

    let outsider = h
        .ctl
        .conversations()
        .display_name_or_placeholder(&ConversationId::from("a"), &carol().id);
    assert_eq!(outsider, "Unknown chat");
}

#[test]
fn test_join_waits_for_open_connection() {
    let mut h = Harness::new(alice());
    let req = h.open("a");
    h.load("a", req, Vec::new());
    assert!(h.drain_outbound().is_empty());

    h.ctl.handle(SyncEvent::ConnectionChanged {
        state: ConnectionState::Open,
    });
    let sent = h.drain_outbound();
    assert_eq!(
        sent,
        vec![OutboundEvent::JoinConversation {
            conversation_id: ConversationId::from("a"),
        }]
    );

    // Switching joins only the new scope once its history is in
    let req = h.open("b");
    assert!(h.drain_outbound().is_empty());
    h.load("b", req, Vec::new());
    assert_eq!(
        h.drain_outbound(),
        vec![OutboundEvent::JoinConversation {
            conversation_id: ConversationId::from("b"),
        }]
    );
}

#[test]
fn test_reconnect_refetches_and_merges_missed_messages() {
    let mut h = Harness::new(alice());
    h.ctl.handle(SyncEvent::ConnectionChanged {
        state: ConnectionState::Open,
    });
    let req = h.open("a");
    h.load("a", req, vec![msg("m1", "a", bob(), at(1))]);

    let effects = h.ctl.handle(SyncEvent::ConnectionChanged {
        state: ConnectionState::Reconnecting,
    });
    assert_eq!(
        effects,
        vec![Effect::Notice {
            notice: Notice::Offline
        }]
    );
    assert_eq!(
        h.ctl.header_status().as_deref(),
        Some("last seen recently")
    );

    let effects = h.ctl.handle(SyncEvent::ConnectionChanged {
        state: ConnectionState::Open,
    });
    let resync = effects
        .iter()
        .find_map(|e| match e {
            Effect::FetchHistory { request, .. } => Some(*request),
            _ => None,
        })
        .expect("refetch after reconnect");

    h.live(msg("m3", "a", bob(), at(3)));
    h.load(
        "a",
        resync,
        vec![msg("m1", "a", bob(), at(1)), msg("m2", "a", bob(), at(2))],
    );

    assert_eq!(h.ids(), vec!["m1", "m2", "m3"]);
    assert!(matches!(
        h.ctl.state(),
        SyncState::Active { resync: None, .. }
    ));
}

#[test]
fn test_history_failure_returns_to_idle_with_notice() {
    let mut h = Harness::new(alice());
    let req = h.open("a");
    let effects = h.ctl.handle(SyncEvent::HistoryFailed {
        conversation_id: ConversationId::from("a"),
        request: req,
        error: "503".to_string(),
    });

    assert_eq!(effects.len(), 1);
    assert_eq!(h.ctl.state(), &SyncState::Idle);
    let snap = SyncSnapshot::capture(&h.ctl);
    assert_eq!(snap.phase, Phase::Idle);
    assert_eq!(
        snap.notice.map(|n| n.text()).as_deref(),
        Some("Message loading failed")
    );

    // Retry is just another open
    h.open("a");
    assert_eq!(h.ctl.state().pending(), Some(&ConversationId::from("a")));
}

#[test]
fn test_read_receipt_marks_own_messages() {
    let mut h = Harness::new(alice());
    let req = h.open("a");
    h.load(
        "a",
        req,
        vec![
            msg("m1", "a", alice(), at(1)),
            msg("m2", "a", bob(), at(2)),
            msg("m3", "a", alice(), at(3)),
            msg("m4", "a", alice(), at(4)),
        ],
    );

    h.ctl.handle(SyncEvent::Inbound {
        event: InboundEvent::MessagesRead {
            conversation_id: ConversationId::from("a"),
            reader_id: bob().id,
            up_to: MessageId::from("m3"),
        },
    });

    let states: Vec<DeliveryState> = h
        .ctl
        .messages()
        .messages()
        .iter()
        .map(|m| m.delivery_state)
        .collect();
    assert_eq!(
        states,
        vec![
            DeliveryState::Read,
            DeliveryState::Sent,
            DeliveryState::Read,
            DeliveryState::Sent
        ]
    );
}
