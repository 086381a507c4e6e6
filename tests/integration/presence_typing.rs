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

//! Integration tests for presence transitions and typing indicators.
//!
//! Verifies:
//! 1. Presence is announced only on the first and last connection.
//! 2. Typing signals reach the other participant, never the typist.
//! 3. A typing flag clears by expiry when the typist disconnects.
//! 4. Debounced keystrokes produce one typing signal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use claimchat::client::{ChatClient, ConnectOptions};
use claimchat::session::{ChatSession, SessionEvent};
use claimchat::typing::{TypingDebouncer, TypingEvent};
use claimchat_proto::message::{RoomId, UserId};
use claimchat_proto::presence::PresenceStatus;
use claimchat_proto::typing::{TYPING_DEBOUNCE, TYPING_EXPIRY};
use claimchat_server::claims::{InMemoryClaimDirectory, Participants};
use claimchat_server::server::{ChatState, ServerSettings, start_server_with_state};
use claimchat_server::store::InMemoryMessageStore;

use tokio::sync::mpsc;

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
        InMemoryMessageStore::new(),
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

async fn joined_session(
    url: &str,
    user: &str,
) -> (
    Arc<ChatSession<ChatClient>>,
    mpsc::UnboundedReceiver<TypingEvent>,
) {
    let client = ChatClient::connect(url, UserId::new(user), &ConnectOptions::default())
        .await
        .unwrap();
    let (session, typing_rx) = ChatSession::new(UserId::new(user), client, TYPING_EXPIRY);
    session.join(&room()).await.unwrap();
    wait_for(&session, |e| matches!(e, SessionEvent::HistoryLoaded { .. })).await;
    (Arc::new(session), typing_rx)
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

/// Keeps applying server events in the background until the connection ends.
fn drive(session: &Arc<ChatSession<ChatClient>>) -> tokio::task::JoinHandle<()> {
    let session = Arc::clone(session);
    tokio::spawn(async move { while session.next_event().await.is_ok() {} })
}

async fn next_typing(rx: &mut mpsc::UnboundedReceiver<TypingEvent>) -> TypingEvent {
    tokio::time::timeout(TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for typing event")
        .expect("typing channel closed")
}

async fn close(session: Arc<ChatSession<ChatClient>>) {
    session.transport().close().await;
    drop(session);
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn presence_flips_only_on_first_and_last_connection() {
    let (url, state) = start_server().await;
    let (bob, _bob_typing) = joined_session(&url, "bob").await;
    let alice = UserId::new("alice");

    let (laptop, _t1) = joined_session(&url, "alice").await;
    let online = wait_for(&bob, |e| matches!(e, SessionEvent::PresenceChanged { .. })).await;
    assert_eq!(
        online,
        SessionEvent::PresenceChanged {
            user_id: alice.clone(),
            status: PresenceStatus::Online
        }
    );

    // A second device neither announces online nor, on leaving, offline.
    let (phone, _t2) = joined_session(&url, "alice").await;
    assert_eq!(state.presence.connection_count(&alice), 2);
    close(phone).await;
    tokio::time::timeout(TIMEOUT, async {
        while state.presence.connection_count(&alice) != 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    close(laptop).await;
    let offline = wait_for(&bob, |e| matches!(e, SessionEvent::PresenceChanged { .. })).await;
    assert_eq!(
        offline,
        SessionEvent::PresenceChanged {
            user_id: alice.clone(),
            status: PresenceStatus::Offline
        }
    );
    assert!(!bob.is_online(&alice));
}

// ---------------------------------------------------------------------------
// Typing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn typing_reaches_the_other_participant_only() {
    let (url, _state) = start_server().await;
    let (alice, mut alice_typing) = joined_session(&url, "alice").await;
    let (bob, mut bob_typing) = joined_session(&url, "bob").await;
    let _alice_driver = drive(&alice);
    let _bob_driver = drive(&bob);

    alice.notify_typing(&room()).await.unwrap();

    assert_eq!(
        next_typing(&mut bob_typing).await,
        TypingEvent::Started {
            room_id: room(),
            user_id: UserId::new("alice")
        }
    );
    assert!(bob.is_typing(&room(), &UserId::new("alice")));
    assert!(alice_typing.try_recv().is_err());
    assert!(alice.typing_in(&room()).is_empty());
}

#[tokio::test]
async fn typing_flag_expires_after_typist_disconnects() {
    let (url, _state) = start_server().await;
    let (alice, _alice_typing) = joined_session(&url, "alice").await;
    let (bob, mut bob_typing) = joined_session(&url, "bob").await;
    let _bob_driver = drive(&bob);

    alice.notify_typing(&room()).await.unwrap();
    assert!(matches!(
        next_typing(&mut bob_typing).await,
        TypingEvent::Started { .. }
    ));
    let started = Instant::now();

    close(alice).await;

    assert_eq!(
        next_typing(&mut bob_typing).await,
        TypingEvent::Stopped {
            room_id: room(),
            user_id: UserId::new("alice")
        }
    );
    assert!(started.elapsed() >= TYPING_EXPIRY - Duration::from_millis(100));
    assert!(!bob.is_typing(&room(), &UserId::new("alice")));
}

#[tokio::test]
async fn debounced_keystrokes_send_one_signal() {
    let (url, _state) = start_server().await;
    let (alice, _alice_typing) = joined_session(&url, "alice").await;
    let (bob, mut bob_typing) = joined_session(&url, "bob").await;
    let _bob_driver = drive(&bob);
    let (debouncer, mut debounced) = TypingDebouncer::new(TYPING_DEBOUNCE);

    for _ in 0..4 {
        debouncer.keystroke(&room());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let room_id = tokio::time::timeout(TIMEOUT, debounced.recv())
        .await
        .unwrap()
        .unwrap();
    alice.notify_typing(&room_id).await.unwrap();

    assert!(matches!(
        next_typing(&mut bob_typing).await,
        TypingEvent::Started { .. }
    ));
    assert!(debounced.try_recv().is_err());
}
