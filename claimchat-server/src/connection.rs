//! Connection lifecycle: authentication handshake, frame dispatch and
//! disconnect cleanup.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use claimchat_proto::codec;
use claimchat_proto::event::{ClientEvent, ServerEvent};
use claimchat_proto::message::{RoomId, TempId, UserId, ValidationError};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::claims::ClaimDirectory;
use crate::delivery;
use crate::error::ChatError;
use crate::outbound::{ConnectionId, encode_frame};
use crate::presence;
use crate::server::ChatState;
use crate::store::MessageStore;
use crate::typing;

/// Per-connection state owned by the connection task.
#[derive(Debug)]
struct Session {
    conn: ConnectionId,
    user_id: UserId,
    /// Rooms this connection has joined; the input to disconnect cleanup.
    joined: HashSet<RoomId>,
}

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Wait for an `Authenticate` event.
/// 2. Register the connection, reply `Authenticated`, mark the user online.
/// 3. Dispatch client events until the socket closes.
/// 4. Leave every joined room and release presence after the grace period.
pub async fn handle_socket<S: MessageStore, D: ClaimDirectory>(
    socket: WebSocket,
    state: Arc<ChatState<S, D>>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let user_id = match wait_for_authenticate(&mut ws_receiver).await {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::warn!(error = %e, "connection closed before authentication");
            reject(&mut ws_sender, &e).await;
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn = state.outbound.register(tx);
    state.outbound.bind_user(conn, user_id.clone());
    state.outbound.send(
        conn,
        &ServerEvent::Authenticated {
            user_id: user_id.clone(),
        },
    );
    tracing::info!(conn = %conn, user_id = %user_id, "connection authenticated");
    go_online(&state, &user_id, conn);

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn = %conn, "WebSocket write failed");
                break;
            }
        }
    });

    let mut session = Session {
        conn,
        user_id,
        joined: HashSet::new(),
    };

    read_loop(&mut ws_receiver, &mut session, &state, &mut write_task).await;
    write_task.abort();

    on_disconnect(&state, session);
}

/// Waits for the first frame, expecting an `Authenticate` event.
///
/// # Errors
///
/// [`ChatError::NotAuthenticated`] if the connection closes or the first
/// frame is any other event, a validation error for an empty user id, and a
/// protocol error for an undecodable frame.
async fn wait_for_authenticate(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Result<UserId, ChatError> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => {
                return match codec::decode_client(&data) {
                    Ok(ClientEvent::Authenticate { user_id }) if !user_id.is_empty() => {
                        Ok(user_id)
                    }
                    Ok(ClientEvent::Authenticate { .. }) => {
                        Err(ValidationError::EmptyId("user id").into())
                    }
                    Ok(other) => {
                        tracing::warn!(event = ?other, "expected Authenticate, got different event");
                        Err(ChatError::NotAuthenticated)
                    }
                    Err(e) => Err(ChatError::Protocol(e.to_string())),
                };
            }
            Message::Close(_) => break,
            _ => {
                // Skip ping/pong and text frames during the handshake.
            }
        }
    }
    Err(ChatError::NotAuthenticated)
}

/// Tells an unauthenticated peer why it is being dropped, then closes.
async fn reject(sender: &mut SplitSink<WebSocket, Message>, error: &ChatError) {
    let event = ServerEvent::Error {
        code: error.code(),
        reason: error.to_string(),
        temp_id: None,
    };
    if let Some(frame) = encode_frame(&event)
        && sender.send(Message::Binary(frame)).await.is_ok()
    {
        let _ = sender.send(Message::Close(None)).await;
    }
}

/// Registers the connection with the presence tracker, announcing the user
/// if this is their first live connection.
fn go_online<S: MessageStore, D: ClaimDirectory>(
    state: &ChatState<S, D>,
    user_id: &UserId,
    conn: ConnectionId,
) {
    state.presence.mark_online_with(user_id, conn, |status| {
        presence::announce(&state.rooms, &state.outbound, user_id, status);
    });
}

/// Reads frames until the peer closes or the writer task ends.
///
/// Only the wait for the next frame races the writer. A frame that is being
/// handled always runs to completion, so submissions from this connection
/// reach the room in order and are never cut off halfway.
async fn read_loop<S: MessageStore, D: ClaimDirectory>(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    session: &mut Session,
    state: &Arc<ChatState<S, D>>,
    writer: &mut JoinHandle<()>,
) {
    loop {
        let next = tokio::select! {
            next = receiver.next() => next,
            _ = &mut *writer => {
                tracing::debug!(conn = %session.conn, "writer ended");
                return;
            }
        };
        let Some(Ok(msg)) = next else {
            return;
        };
        match msg {
            Message::Binary(data) => handle_frame(state, session, &data).await,
            Message::Close(_) => {
                tracing::info!(conn = %session.conn, "received close frame");
                return;
            }
            _ => {}
        }
    }
}

/// Decodes one frame and reports any failure back to the connection.
async fn handle_frame<S: MessageStore, D: ClaimDirectory>(
    state: &Arc<ChatState<S, D>>,
    session: &mut Session,
    data: &[u8],
) {
    let max = state.settings.max_frame_size;
    if data.len() > max {
        tracing::warn!(conn = %session.conn, size = data.len(), max, "frame exceeds size limit");
        let error = ChatError::FrameTooLarge {
            size: data.len(),
            max,
        };
        send_error(state, session.conn, &error, oversized_temp_id(data));
        return;
    }

    let event = match codec::decode_client(data) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(conn = %session.conn, error = %e, "failed to decode client event");
            send_error(state, session.conn, &ChatError::Protocol(e.to_string()), None);
            return;
        }
    };

    let temp_id = match &event {
        ClientEvent::SendMessage(msg) => Some(msg.temp_id),
        _ => None,
    };
    if let Err(e) = dispatch(state, session, event).await {
        tracing::warn!(
            conn = %session.conn,
            user_id = %session.user_id,
            error = %e,
            "request failed"
        );
        send_error(state, session.conn, &e, temp_id);
    }
}

/// Temp id of an oversized frame that still decodes as a submission, so the
/// sender can mark that message failed.
fn oversized_temp_id(data: &[u8]) -> Option<TempId> {
    match codec::decode_client(data) {
        Ok(ClientEvent::SendMessage(msg)) => Some(msg.temp_id),
        _ => None,
    }
}

async fn dispatch<S: MessageStore, D: ClaimDirectory>(
    state: &Arc<ChatState<S, D>>,
    session: &mut Session,
    event: ClientEvent,
) -> Result<(), ChatError> {
    let conn = session.conn;
    match event {
        ClientEvent::Authenticate { .. } => Err(ChatError::Protocol(
            "connection is already authenticated".into(),
        )),
        ClientEvent::JoinRoom { room_id } => join_room(state, session, room_id).await,
        ClientEvent::LeaveRoom { room_id } => {
            state.rooms.leave(&room_id, conn);
            session.joined.remove(&room_id);
            tracing::info!(conn = %conn, room_id = %room_id, "left room");
            state.outbound.send(conn, &ServerEvent::Left { room_id });
            Ok(())
        }
        ClientEvent::FetchHistory { room_id } => delivery::history(state, conn, &room_id).await,
        ClientEvent::SendMessage(msg) => {
            delivery::submit_detached(Arc::clone(state), conn, session.user_id.clone(), msg)
                .await?;
            Ok(())
        }
        ClientEvent::AckDelivered { room_id, temp_id } => {
            delivery::acknowledge(state, conn, &session.user_id, &room_id, temp_id)?;
            Ok(())
        }
        ClientEvent::DeleteMessage { message_id } => {
            delivery::delete(state, conn, &session.user_id, message_id).await
        }
        ClientEvent::Typing { room_id } => {
            typing::relay(state, conn, &session.user_id, &room_id)?;
            Ok(())
        }
    }
}

async fn join_room<S: MessageStore, D: ClaimDirectory>(
    state: &ChatState<S, D>,
    session: &mut Session,
    room_id: RoomId,
) -> Result<(), ChatError> {
    if room_id.is_empty() {
        return Err(ValidationError::EmptyId("room id").into());
    }
    let outcome = state
        .rooms
        .join(&state.claims, &room_id, session.conn, &session.user_id)
        .await?;
    session.joined.insert(room_id.clone());

    tracing::info!(
        conn = %session.conn,
        user_id = %session.user_id,
        room_id = %room_id,
        rejoin = !outcome.newly_joined,
        "joined room"
    );
    let online = state.presence.online_among(outcome.participants.iter());
    state.outbound.send(
        session.conn,
        &ServerEvent::Joined {
            room_id,
            participants: outcome.participants.to_vec(),
            online,
        },
    );
    Ok(())
}

/// Reports a failed request to the connection that issued it.
fn send_error<S: MessageStore, D: ClaimDirectory>(
    state: &ChatState<S, D>,
    conn: ConnectionId,
    error: &ChatError,
    temp_id: Option<TempId>,
) {
    state.outbound.send(
        conn,
        &ServerEvent::Error {
            code: error.code(),
            reason: error.to_string(),
            temp_id,
        },
    );
}

/// Removes the connection from its rooms and schedules the presence release.
fn on_disconnect<S: MessageStore, D: ClaimDirectory>(state: &Arc<ChatState<S, D>>, session: Session) {
    let Session {
        conn,
        user_id,
        joined,
    } = session;
    state.rooms.remove_connection(conn, &joined);
    state.outbound.unregister(conn);
    tracing::info!(conn = %conn, user_id = %user_id, rooms = joined.len(), "connection closed");

    let grace = state.settings.presence_grace;
    if grace.is_zero() {
        release_presence(state, &user_id, conn);
        return;
    }
    let state = Arc::clone(state);
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        release_presence(&state, &user_id, conn);
    });
}

fn release_presence<S: MessageStore, D: ClaimDirectory>(
    state: &ChatState<S, D>,
    user_id: &UserId,
    conn: ConnectionId,
) {
    state.presence.mark_offline_with(user_id, conn, |status| {
        presence::announce(&state.rooms, &state.outbound, user_id, status);
    });
}
