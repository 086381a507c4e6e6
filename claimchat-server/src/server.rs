//! Shared server state and the axum WebSocket endpoint.
//!
//! [`ChatState`] owns every registry of the messaging core plus the two
//! external collaborators. One instance is shared by all connection tasks
//! behind an [`Arc`].

use std::sync::Arc;
use std::time::Duration;

use claimchat_proto::message::MAX_CONTENT_SIZE;

use crate::claims::{ClaimDirectory, InMemoryClaimDirectory};
use crate::connection;
use crate::delivery::DeliveryLedger;
use crate::outbound::OutboundRegistry;
use crate::presence::PresenceTracker;
use crate::rooms::RoomRegistry;
use crate::store::{InMemoryMessageStore, MessageStore};

/// Room for the event tag, ids and length prefixes around a message body.
pub const FRAME_HEADROOM: usize = 4 * 1024;

/// Default maximum accepted frame size: the largest valid message plus headroom.
pub const DEFAULT_MAX_FRAME_SIZE: usize = MAX_CONTENT_SIZE + FRAME_HEADROOM;

/// Default delay before a disconnected user's last connection is released.
pub const DEFAULT_PRESENCE_GRACE: Duration = Duration::from_millis(1000);

/// Default window in which a resubmitted temp id is answered from the ledger.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Lower bound on how often the delivery ledger is swept.
const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// Tunables resolved from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Frames larger than this are rejected with a validation error.
    pub max_frame_size: usize,
    /// How long a closed connection still counts towards presence.
    pub presence_grace: Duration,
    /// How long accepted temp ids are remembered for de-duplication.
    pub dedup_window: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            presence_grace: DEFAULT_PRESENCE_GRACE,
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }
}

/// Shared state of the messaging core.
pub struct ChatState<S = InMemoryMessageStore, D = InMemoryClaimDirectory> {
    /// Writer channels of live connections.
    pub outbound: OutboundRegistry,
    /// Room subscriptions and cached participants.
    pub rooms: RoomRegistry,
    /// Per-user connection sets.
    pub presence: PresenceTracker,
    /// Recently accepted messages, for temp id de-duplication.
    pub ledger: DeliveryLedger,
    /// Durable message storage.
    pub store: S,
    /// Room participant lookup.
    pub claims: D,
    /// Resolved tunables.
    pub settings: ServerSettings,
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new(InMemoryMessageStore::new(), InMemoryClaimDirectory::new())
    }
}

impl<S: MessageStore, D: ClaimDirectory> ChatState<S, D> {
    /// Creates a state around the given collaborators with default settings.
    #[must_use]
    pub fn new(store: S, claims: D) -> Self {
        Self::with_settings(store, claims, ServerSettings::default())
    }

    /// Creates a state around the given collaborators and settings.
    #[must_use]
    pub fn with_settings(store: S, claims: D, settings: ServerSettings) -> Self {
        Self {
            outbound: OutboundRegistry::new(),
            rooms: RoomRegistry::new(),
            presence: PresenceTracker::new(),
            ledger: DeliveryLedger::new(settings.dedup_window),
            store,
            claims,
            settings,
        }
    }

    /// Send a WebSocket Close frame to every live connection.
    ///
    /// Each writer forwards the frame and the clients observe the
    /// disconnect. Used for graceful shutdown and in tests.
    pub fn close_all_connections(&self) {
        self.outbound.close_all();
    }
}

/// Starts the server and returns the bound address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state<S: MessageStore, D: ClaimDirectory>(
    addr: &str,
    state: Arc<ChatState<S, D>>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler::<S, D>))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let sweeper = spawn_ledger_sweep(Arc::clone(&state));
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "chat server error");
        }
        sweeper.abort();
    });

    Ok((bound_addr, handle))
}

/// Periodically drops expired de-duplication entries, so pairs that went
/// quiet do not keep their last window of messages forever.
fn spawn_ledger_sweep<S: MessageStore, D: ClaimDirectory>(
    state: Arc<ChatState<S, D>>,
) -> tokio::task::JoinHandle<()> {
    let period = state.ledger.window().max(MIN_SWEEP_PERIOD);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            state.ledger.sweep();
            tracing::debug!(pairs = state.ledger.tracked_pairs(), "swept delivery ledger");
        }
    })
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler<S: MessageStore, D: ClaimDirectory>(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<ChatState<S, D>>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state))
}
