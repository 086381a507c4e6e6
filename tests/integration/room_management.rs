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

//! Integration tests for room membership and message deletion.
//!
//! Verifies:
//! 1. Only the claim's two participants can join its room.
//! 2. Unknown rooms are reported as not found.
//! 3. Leaving a room stops local sends and server delivery.
//! 4. Only the sender can delete a message; deletion reaches every view.
//! 5. A user's second device sees their own messages without acking them.

use std::sync::Arc;
use std::time::Duration;

use claimchat::client::{ChatClient, ClientError, ConnectOptions};
use claimchat::session::{ChatSession, SessionEvent, TempIdGenerator};
use claimchat_proto::event::ErrorCode;
use claimchat_proto::message::{MessageId, MessageStatus, RoomId, UserId};
use claimchat_server::claims::{InMemoryClaimDirectory, Participants};
use claimchat_server::server::{ChatState, ServerSettings, start_server_with_state};
use claimchat_server::store::{InMemoryMessageStore, MessageStore};

const TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn start_server() -> (String, Arc<ChatState>) {
    let claims = InMemoryClaimDirectory::new();
    claims
        .insert(
            RoomId::new("42"),
            Participants::new(UserId::new("alice"), UserId::new("bob")).unwrap(),
        )
        .await;
    let settings = ServerSettings {
        presence_grace: Duration::ZERO,
        ..ServerSettings::default()
    };
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

async fn session(url: &str, user: &str) -> ChatSession<ChatClient> {
    let client = ChatClient::connect(url, UserId::new(user), &ConnectOptions::default())
        .await
        .unwrap();
    let (session, _typing_rx) = ChatSession::new(UserId::new(user), client, Duration::from_millis(1500));
    session.with_temp_ids(TempIdGenerator::starting_at(1))
}

async fn joined_session(url: &str, user: &str) -> ChatSession<ChatClient> {
    let session = session(url, user).await;
    session.join(&room()).await.unwrap();
    wait_for(&session, |e| matches!(e, SessionEvent::HistoryLoaded { .. })).await;
    session
}

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

fn failed_code(event: &SessionEvent) -> Option<ErrorCode> {
    match event {
        SessionEvent::Failed { code, .. } => Some(*code),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn participants_join_with_room_details() {
    let (url, _state) = start_server().await;
    let _alice = joined_session(&url, "alice").await;
    let bob = session(&url, "bob").await;

    bob.join(&room()).await.unwrap();
    let joined = wait_for(&bob, |e| matches!(e, SessionEvent::Joined { .. })).await;

    let SessionEvent::Joined {
        room_id,
        participants,
        online,
    } = joined
    else {
        unreachable!();
    };
    assert_eq!(room_id, room());
    assert_eq!(participants.len(), 2);
    assert!(participants.contains(&UserId::new("alice")));
    assert!(online.contains(&UserId::new("alice")));
    assert!(online.contains(&UserId::new("bob")));
    assert_eq!(bob.joined_rooms(), vec![room()]);
    assert!(bob.is_online(&UserId::new("alice")));
}

#[tokio::test]
async fn non_participant_cannot_join() {
    let (url, state) = start_server().await;
    let alice = joined_session(&url, "alice").await;
    let mallory = session(&url, "mallory").await;

    mallory.join(&room()).await.unwrap();
    let event = wait_for(&mallory, |e| failed_code(e).is_some()).await;

    assert_eq!(failed_code(&event), Some(ErrorCode::Unauthorized));
    assert!(mallory.joined_rooms().is_empty());
    // Only alice's connection is subscribed.
    assert_eq!(state.rooms.connections(&room()).len(), 1);

    // Mallory cannot send into the room either.
    let result = mallory.send_message(&room(), "give me the wallet").await;
    assert!(matches!(result, Err(ClientError::NotJoined(_))));
    drop(alice);
}

#[tokio::test]
async fn unknown_room_is_not_found() {
    let (url, _state) = start_server().await;
    let alice = session(&url, "alice").await;

    alice.join(&RoomId::new("999")).await.unwrap();
    let event = wait_for(&alice, |e| failed_code(e).is_some()).await;

    assert_eq!(failed_code(&event), Some(ErrorCode::NotFound));
}

#[tokio::test]
async fn leaving_a_room_stops_sends() {
    let (url, state) = start_server().await;
    let alice = joined_session(&url, "alice").await;

    alice.leave(&room()).await.unwrap();
    let left = wait_for(&alice, |e| matches!(e, SessionEvent::Left { .. })).await;

    assert_eq!(left, SessionEvent::Left { room_id: room() });
    assert!(state.rooms.connections(&room()).is_empty());
    let result = alice.send_message(&room(), "hello?").await;
    assert!(matches!(result, Err(ClientError::NotJoined(_))));
}

#[tokio::test]
async fn only_the_sender_can_delete() {
    let (url, state) = start_server().await;
    let alice = joined_session(&url, "alice").await;
    let bob = joined_session(&url, "bob").await;

    alice.send_message(&room(), "found your wallet").await.unwrap();
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
    wait_for(&bob, |e| matches!(e, SessionEvent::MessageReceived(_))).await;
    let message_id = MessageId::new(7001);

    // Bob is not the sender.
    bob.delete_message(message_id).await.unwrap();
    let event = wait_for(&bob, |e| failed_code(e).is_some()).await;
    assert_eq!(failed_code(&event), Some(ErrorCode::Forbidden));
    assert!(state.store.find(message_id).await.unwrap().is_some());

    // Alice is.
    alice.delete_message(message_id).await.unwrap();
    let deleted = SessionEvent::MessageDeleted {
        room_id: room(),
        message_id,
    };
    assert_eq!(
        wait_for(&alice, |e| matches!(e, SessionEvent::MessageDeleted { .. })).await,
        deleted
    );
    assert_eq!(
        wait_for(&bob, |e| matches!(e, SessionEvent::MessageDeleted { .. })).await,
        deleted
    );
    assert!(alice.view(&room()).unwrap().is_empty());
    assert!(bob.view(&room()).unwrap().is_empty());
    assert!(state.store.find(message_id).await.unwrap().is_none());
}

#[tokio::test]
async fn deleting_a_missing_message_is_not_found() {
    let (url, _state) = start_server().await;
    let alice = joined_session(&url, "alice").await;

    alice.delete_message(MessageId::new(1)).await.unwrap();
    let event = wait_for(&alice, |e| failed_code(e).is_some()).await;

    assert_eq!(failed_code(&event), Some(ErrorCode::NotFound));
}

#[tokio::test]
async fn second_device_sees_own_message_as_sent() {
    let (url, _state) = start_server().await;
    let laptop = joined_session(&url, "alice").await;
    let phone = joined_session(&url, "alice").await;

    laptop.send_message(&room(), "found your wallet").await.unwrap();

    let SessionEvent::MessageReceived(msg) =
        wait_for(&phone, |e| matches!(e, SessionEvent::MessageReceived(_))).await
    else {
        unreachable!();
    };
    assert_eq!(msg.sender_id, UserId::new("alice"));
    let temp_id = msg.temp_id.unwrap();
    assert_eq!(phone.status_of(&room(), temp_id), Some(MessageStatus::Sent));
    assert_eq!(laptop.status_of(&room(), temp_id), Some(MessageStatus::Sending));
}
