// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::manual_let_else,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for sending and receiving messages end to end.
//!
//! Verifies:
//! 1. A message goes `sending -> sent -> delivered` once the receiver acks.
//! 2. The store holds exactly one entry per accepted message.
//! 3. Sequential sends from one connection arrive in submission order.
//! 4. Resubmitting a temp id is answered without a second persist.
//! 5. Messages sent before the receiver joins arrive through history.
//! 6. A message of the maximum size is accepted; a frame the server refuses
//!    marks the message failed.

use std::sync::Arc;
use std::time::Duration;

use claimchat::client::{ChatClient, ChatTransport, ConnectOptions};
use claimchat::session::{ChatSession, SessionEvent, TempIdGenerator};
use claimchat_proto::event::{ClientEvent, ErrorCode};
use claimchat_proto::message::{
    MAX_CONTENT_SIZE, MessageId, MessageStatus, OutgoingMessage, RoomId, TempId, Timestamp,
    UserId,
};
use claimchat_server::claims::{InMemoryClaimDirectory, Participants};
use claimchat_server::server::{ChatState, ServerSettings, start_server_with_state};
use claimchat_server::store::{InMemoryMessageStore, MessageStore};

const TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Starts a server with claim "42" between alice and bob.
async fn start_server() -> (String, Arc<ChatState>) {
    start_server_with(ServerSettings {
        presence_grace: Duration::ZERO,
        ..ServerSettings::default()
    })
    .await
}

async fn start_server_with(settings: ServerSettings) -> (String, Arc<ChatState>) {
    let claims = InMemoryClaimDirectory::new();
    claims
        .insert(
            RoomId::new("42"),
            Participants::new(UserId::new("alice"), UserId::new("bob")).unwrap(),
        )
        .await;
    let state = Arc::new(ChatState::with_settings(
        InMemoryMessageStore::starting_at(7001),
        claims,
        settings,
    ));
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (format!("ws://{addr}/ws"), state)
}

fn room() -> RoomId {
    RoomId::new("42")
}

/// Connects `user`, joins room "42" and waits for its history.
async fn joined_session(url: &str, user: &str, first_temp_id: u64) -> ChatSession<ChatClient> {
    let client = ChatClient::connect(url, UserId::new(user), &ConnectOptions::default())
        .await
        .unwrap();
    let (session, _typing_rx) = ChatSession::new(UserId::new(user), client, Duration::from_millis(1500));
    let session = session.with_temp_ids(TempIdGenerator::starting_at(first_temp_id));
    session.join(&room()).await.unwrap();
    wait_for(&session, |e| matches!(e, SessionEvent::HistoryLoaded { .. })).await;
    session
}

/// Drives the session until an event matches `pred`.
async fn wait_for(
    session: &ChatSession<ChatClient>,
    mut pred: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            let event = session.next_event().await.expect("connection closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn found_wallet_message_is_sent_then_delivered() {
    let (url, state) = start_server().await;
    let alice = joined_session(&url, "alice", 1001).await;
    let bob = joined_session(&url, "bob", 1).await;
    let before = Timestamp::now();

    let temp_id = alice.send_message(&room(), "found your wallet").await.unwrap();
    assert_eq!(temp_id, TempId::new(1001));
    assert_eq!(alice.status_of(&room(), temp_id), Some(MessageStatus::Sending));

    // Alice gets the enriched message back as the direct response.
    let sent = wait_for(&alice, |e| matches!(e, SessionEvent::StatusChanged { .. })).await;
    assert_eq!(
        sent,
        SessionEvent::StatusChanged {
            room_id: room(),
            temp_id,
            status: MessageStatus::Sent
        }
    );
    let view = alice.view(&room()).unwrap();
    assert_eq!(view.len(), 1);
    assert_eq!(view.entries()[0].id, Some(MessageId::new(7001)));

    // Bob receives the broadcast and acks it automatically.
    let SessionEvent::MessageReceived(received) =
        wait_for(&bob, |e| matches!(e, SessionEvent::MessageReceived(_))).await
    else {
        unreachable!();
    };
    assert_eq!(received.id, MessageId::new(7001));
    assert_eq!(received.temp_id, Some(temp_id));
    assert_eq!(received.content, "found your wallet");

    let delivered = wait_for(&alice, |e| matches!(e, SessionEvent::StatusChanged { .. })).await;
    assert_eq!(
        delivered,
        SessionEvent::StatusChanged {
            room_id: room(),
            temp_id,
            status: MessageStatus::Delivered
        }
    );

    let stored = state.store.list_by_room(&room()).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, MessageId::new(7001));
    assert!(stored[0].created_at >= before);
}

#[tokio::test]
async fn sequential_sends_arrive_in_order() {
    let (url, _state) = start_server().await;
    let alice = joined_session(&url, "alice", 1).await;
    let bob = joined_session(&url, "bob", 1).await;

    for content in ["first", "second", "third"] {
        alice.send_message(&room(), content).await.unwrap();
    }

    let mut received = Vec::new();
    while received.len() < 3 {
        if let SessionEvent::MessageReceived(msg) =
            wait_for(&bob, |e| matches!(e, SessionEvent::MessageReceived(_))).await
        {
            received.push(msg.content);
        }
    }
    assert_eq!(received, vec!["first", "second", "third"]);

    let contents: Vec<String> = bob
        .view(&room())
        .unwrap()
        .entries()
        .iter()
        .map(|e| e.content.clone())
        .collect();
    assert_eq!(contents, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn resubmitted_temp_id_is_not_persisted_twice() {
    let (url, state) = start_server().await;
    let alice = joined_session(&url, "alice", 1001).await;
    let _bob = joined_session(&url, "bob", 1).await;

    let outgoing = OutgoingMessage {
        room_id: room(),
        sender_id: UserId::new("alice"),
        receiver_id: UserId::new("bob"),
        content: "found your wallet".into(),
        temp_id: TempId::new(55),
    };
    let transport = alice.transport();
    transport
        .send(&ClientEvent::SendMessage(outgoing.clone()))
        .await
        .unwrap();
    transport
        .send(&ClientEvent::SendMessage(outgoing))
        .await
        .unwrap();

    // Both submissions are answered with the same enriched message.
    let mut ids = Vec::new();
    while ids.len() < 2 {
        let event = tokio::time::timeout(TIMEOUT, transport.recv())
            .await
            .unwrap()
            .unwrap();
        if let claimchat_proto::event::ServerEvent::MessageSent(msg) = event {
            ids.push(msg.id);
        }
    }
    assert_eq!(ids[0], ids[1]);
    assert_eq!(state.store.list_by_room(&room()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn messages_sent_before_join_arrive_as_history() {
    let (url, _state) = start_server().await;
    let alice = joined_session(&url, "alice", 1).await;
    alice.send_message(&room(), "found your wallet").await.unwrap();
    alice.send_message(&room(), "it has your id inside").await.unwrap();
    wait_for(&alice, |e| {
        matches!(
            e,
            SessionEvent::StatusChanged {
                temp_id,
                status: MessageStatus::Sent,
                ..
            } if *temp_id == TempId::new(2)
        )
    })
    .await;

    let bob = joined_session(&url, "bob", 1).await;

    let view = bob.view(&room()).unwrap();
    let contents: Vec<&str> = view.entries().iter().map(|e| e.content.as_str()).collect();
    assert_eq!(contents, vec!["found your wallet", "it has your id inside"]);
    assert!(view.entries().iter().all(|e| e.status.is_none()));
}

#[tokio::test]
async fn largest_valid_message_is_sent() {
    let (url, state) = start_server().await;
    let alice = joined_session(&url, "alice", 1001).await;

    let temp_id = alice
        .send_message(&room(), &"a".repeat(MAX_CONTENT_SIZE))
        .await
        .unwrap();

    wait_for(&alice, |e| {
        matches!(
            e,
            SessionEvent::StatusChanged {
                status: MessageStatus::Sent,
                ..
            }
        )
    })
    .await;
    assert_eq!(alice.status_of(&room(), temp_id), Some(MessageStatus::Sent));
    assert_eq!(state.store.list_by_room(&room()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn refused_frame_marks_message_failed() {
    let (url, state) = start_server_with(ServerSettings {
        presence_grace: Duration::ZERO,
        max_frame_size: 1024,
        ..ServerSettings::default()
    })
    .await;
    let alice = joined_session(&url, "alice", 1001).await;

    let temp_id = alice
        .send_message(&room(), &"a".repeat(2048))
        .await
        .unwrap();

    let failed = wait_for(&alice, |e| matches!(e, SessionEvent::Failed { .. })).await;
    assert!(matches!(
        failed,
        SessionEvent::Failed {
            code: ErrorCode::Validation,
            temp_id: Some(id),
            ..
        } if id == temp_id
    ));
    assert!(matches!(
        alice.status_of(&room(), temp_id),
        Some(MessageStatus::Failed(_))
    ));
    assert!(state.store.list_by_room(&room()).await.unwrap().is_empty());
}
