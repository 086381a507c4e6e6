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

//! Integration tests for losing and restoring the server connection.
//!
//! Verifies:
//! 1. A closed connection surfaces as `ConnectionClosed`.
//! 2. `reconnect` rejoins rooms and fetches messages missed meanwhile.
//! 3. A message that failed while offline can be retried afterwards.

use std::sync::Arc;
use std::time::Duration;

use claimchat::client::{ChatClient, ChatTransport, ClientError, ConnectOptions};
use claimchat::session::{ChatSession, SessionEvent, TempIdGenerator};
use claimchat_proto::message::{MessageStatus, RoomId, UserId};
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

async fn connect(url: &str, user: &str) -> ChatClient {
    ChatClient::connect(url, UserId::new(user), &ConnectOptions::default())
        .await
        .unwrap()
}

async fn joined_session(url: &str, user: &str) -> ChatSession<ChatClient> {
    let (session, _typing_rx) =
        ChatSession::new(UserId::new(user), connect(url, user).await, Duration::from_millis(1500));
    let session = session.with_temp_ids(TempIdGenerator::starting_at(1));
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

/// Drains events until the transport reports the connection closed.
async fn wait_for_disconnect(session: &ChatSession<ChatClient>) {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            match session.next_event().await {
                Ok(_) => {}
                Err(ClientError::ConnectionClosed) => return,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    })
    .await
    .expect("connection was not closed");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconnect_restores_room_and_missed_messages() {
    let (url, state) = start_server().await;
    let alice = joined_session(&url, "alice").await;

    state.close_all_connections();
    wait_for_disconnect(&alice).await;
    assert!(!alice.is_connected());

    // Bob writes while alice is away.
    let bob = joined_session(&url, "bob").await;
    bob.send_message(&room(), "are you still there?").await.unwrap();
    wait_for(&bob, |e| {
        matches!(
            e,
            SessionEvent::StatusChanged {
                status: MessageStatus::Sent,
                ..
            }
        )
    })
    .await;

    alice.reconnect(connect(&url, "alice").await).await.unwrap();

    assert!(matches!(
        wait_for(&alice, |e| matches!(e, SessionEvent::Joined { .. })).await,
        SessionEvent::Joined { room_id, .. } if room_id == room()
    ));
    assert_eq!(
        wait_for(&alice, |e| matches!(e, SessionEvent::HistoryLoaded { .. })).await,
        SessionEvent::HistoryLoaded {
            room_id: room(),
            added: 1
        }
    );
    let view = alice.view(&room()).unwrap();
    assert_eq!(view.entries()[0].content, "are you still there?");
    assert!(alice.is_connected());
}

#[tokio::test]
async fn failed_send_while_offline_can_be_retried() {
    let (url, state) = start_server().await;
    let alice = joined_session(&url, "alice").await;

    state.close_all_connections();
    wait_for_disconnect(&alice).await;

    let result = alice.send_message(&room(), "found your wallet").await;
    assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    let temp_id = alice.view(&room()).unwrap().entries()[0].temp_id.unwrap();
    assert!(matches!(
        alice.status_of(&room(), temp_id),
        Some(MessageStatus::Failed(_))
    ));

    alice.reconnect(connect(&url, "alice").await).await.unwrap();
    alice.retry(&room(), temp_id).await.unwrap();

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
async fn old_transport_is_replaced() {
    let (url, state) = start_server().await;
    let alice = joined_session(&url, "alice").await;
    let old = alice.transport();

    state.close_all_connections();
    wait_for_disconnect(&alice).await;
    alice.reconnect(connect(&url, "alice").await).await.unwrap();

    assert!(!old.is_connected());
    assert!(alice.transport().is_connected());
    assert!(!Arc::ptr_eq(&old, &alice.transport()));
}
