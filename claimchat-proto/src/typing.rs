//! Typing indicator timing shared by senders and receivers.
//!
//! The server relays typing signals blindly; both timers below run on the
//! client.

use std::time::Duration;

/// Quiet period a sender waits after the last keystroke before emitting.
pub const TYPING_DEBOUNCE: Duration = Duration::from_millis(500);

/// How long a receiver shows "typing" after the last relayed signal.
pub const TYPING_EXPIRY: Duration = Duration::from_millis(1500);
