//! WebSocket client for the `ClaimChat` server.
//!
//! [`ChatClient::connect`] opens the socket, authenticates, and spawns a
//! background reader that decodes every incoming frame into a
//! [`ServerEvent`]. [`ChatTransport`] is the seam the session talks
//! through, so session logic can be driven without a socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use claimchat_proto::codec::{self, CodecError};
use claimchat_proto::event::{ClientEvent, ErrorCode, ServerEvent};
use claimchat_proto::message::{RoomId, UserId, ValidationError};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Errors that can occur while talking to the server.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connecting or authenticating took too long.
    #[error("operation timed out")]
    Timeout,

    /// The server could not be reached.
    #[error("server {0} is unreachable")]
    Unreachable(String),

    /// The connection is gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server answered with an error.
    #[error("server rejected the request ({code}): {reason}")]
    Rejected {
        /// Error class reported by the server.
        code: ErrorCode,
        /// Server-provided description.
        reason: String,
    },

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A message failed local validation before it was sent.
    #[error("invalid message: {0}")]
    Invalid(#[from] ValidationError),

    /// The room has not been joined in this session.
    #[error("room {0} has not been joined")]
    NotJoined(RoomId),

    /// An underlying I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Carries client events to the server and server events back.
pub trait ChatTransport: Send + Sync + 'static {
    /// Sends one event to the server.
    fn send(
        &self,
        event: &ClientEvent,
    ) -> impl std::future::Future<Output = Result<(), ClientError>> + Send;

    /// Receives the next event from the server.
    ///
    /// Returns [`ClientError::ConnectionClosed`] once the connection is gone.
    fn recv(&self) -> impl std::future::Future<Output = Result<ServerEvent, ClientError>> + Send;

    /// Whether the connection is believed to be alive.
    fn is_connected(&self) -> bool;
}

/// Timeouts and buffer sizes for [`ChatClient::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Timeout for the `Authenticated` reply.
    pub auth_timeout: Duration,
    /// Capacity of the incoming event channel.
    pub channel_capacity: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(5),
            channel_capacity: 256,
        }
    }
}

/// An authenticated WebSocket connection to the server.
pub struct ChatClient {
    /// The user this connection acts as.
    user_id: UserId,
    /// The server URL (ws:// or wss://).
    server_url: String,
    /// Write half of the WebSocket connection (shared for concurrent sends).
    ws_sender: Mutex<WsSender>,
    /// Events decoded by the background reader task.
    incoming: Mutex<mpsc::Receiver<ServerEvent>>,
    /// Whether the WebSocket connection is active.
    connected: Arc<AtomicBool>,
    /// Background reader task; aborted on drop so the socket closes.
    reader_handle: tokio::task::JoinHandle<()>,
}

impl ChatClient {
    /// Connect to the server and authenticate as `user_id`.
    ///
    /// Performs the following steps:
    /// 1. Establishes a WebSocket connection to `server_url`
    /// 2. Sends `Authenticate` with the user id
    /// 3. Waits for `Authenticated`
    /// 4. Spawns a background task to read incoming events
    ///
    /// # Errors
    ///
    /// - [`ClientError::Timeout`] if the handshake or authentication times out.
    /// - [`ClientError::Unreachable`] if the server refuses the connection.
    /// - [`ClientError::Rejected`] if the server answers with an error.
    /// - [`ClientError::ConnectionClosed`] if the server hangs up instead.
    pub async fn connect(
        server_url: &str,
        user_id: UserId,
        options: &ConnectOptions,
    ) -> Result<Self, ClientError> {
        let (ws_stream, _response) =
            tokio::time::timeout(options.connect_timeout, connect_async(server_url))
                .await
                .map_err(|_| {
                    tracing::warn!(url = server_url, "WebSocket connect timed out");
                    ClientError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url = server_url, err = %e, "WebSocket connect failed");
                    map_ws_connect_error(server_url, e)
                })?;

        let (mut ws_sender, mut ws_reader) = ws_stream.split();

        let hello = codec::encode_client(&ClientEvent::Authenticate {
            user_id: user_id.clone(),
        })?;
        ws_sender
            .send(Message::Binary(hello.into()))
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "failed to send Authenticate");
                ClientError::ConnectionClosed
            })?;

        let reply = tokio::time::timeout(options.auth_timeout, ws_reader.next())
            .await
            .map_err(|_| {
                tracing::warn!(url = server_url, "authentication reply timed out");
                ClientError::Timeout
            })?;

        match reply {
            Some(Ok(Message::Binary(data))) => match codec::decode_server(&data)? {
                ServerEvent::Authenticated { user_id: bound } if bound == user_id => {
                    tracing::info!(user_id = %bound, url = server_url, "authenticated");
                }
                ServerEvent::Error { code, reason, .. } => {
                    tracing::warn!(code = %code, reason = %reason, "authentication rejected");
                    return Err(ClientError::Rejected { code, reason });
                }
                other => {
                    tracing::warn!(?other, "unexpected reply during authentication");
                    return Err(ClientError::Rejected {
                        code: ErrorCode::Protocol,
                        reason: "unexpected reply during authentication".into(),
                    });
                }
            },
            Some(Ok(_) | Err(_)) | None => {
                tracing::warn!("connection closed during authentication");
                return Err(ClientError::ConnectionClosed);
            }
        }

        let (tx, rx) = mpsc::channel(options.channel_capacity);
        let connected = Arc::new(AtomicBool::new(true));
        let reader_handle = tokio::spawn(reader_loop(ws_reader, tx, Arc::clone(&connected)));

        Ok(Self {
            user_id,
            server_url: server_url.to_string(),
            ws_sender: Mutex::new(ws_sender),
            incoming: Mutex::new(rx),
            connected,
            reader_handle,
        })
    }

    /// The user this connection is authenticated as.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// The server URL this client is connected to.
    #[must_use]
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Sends a Close frame. Incoming events already queued stay readable.
    pub async fn close(&self) {
        let mut sender = self.ws_sender.lock().await;
        let _ = sender.send(Message::Close(None)).await;
        self.connected.store(false, Ordering::Relaxed);
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

impl ChatTransport for ChatClient {
    async fn send(&self, event: &ClientEvent) -> Result<(), ClientError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(ClientError::ConnectionClosed);
        }
        let bytes = codec::encode_client(event)?;

        let mut sender = self.ws_sender.lock().await;
        sender
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "send failed");
                self.connected.store(false, Ordering::Relaxed);
                ClientError::ConnectionClosed
            })
    }

    async fn recv(&self) -> Result<ServerEvent, ClientError> {
        let mut rx = self.incoming.lock().await;
        rx.recv().await.ok_or(ClientError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

/// Background task that reads WebSocket frames and forwards decoded events.
///
/// Malformed frames are logged and skipped; the task does not disconnect on
/// bad data. Sets `connected` to `false` when the WebSocket closes.
async fn reader_loop(
    mut ws_reader: WsReader,
    tx: mpsc::Sender<ServerEvent>,
    connected: Arc<AtomicBool>,
) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Binary(data)) => match codec::decode_server(&data) {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        // Receiver dropped with the client.
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed server frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("WebSocket closed by server");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_)) => {}
            Err(e) => {
                tracing::warn!(err = %e, "WebSocket read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    tracing::info!("reader task exiting");
}

/// Map a `tokio_tungstenite` connection error to a [`ClientError`].
fn map_ws_connect_error(url: &str, err: tokio_tungstenite::tungstenite::Error) -> ClientError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                ClientError::Unreachable(url.to_string())
            } else {
                ClientError::Io(io_err)
            }
        }
        WsError::Http(response) => ClientError::Io(std::io::Error::other(format!(
            "server HTTP error: status {}",
            response.status()
        ))),
        other => ClientError::Io(std::io::Error::other(format!(
            "connection error: {other}"
        ))),
    }
}
