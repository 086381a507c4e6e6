//! Error taxonomy of the messaging core.

use claimchat_proto::event::ErrorCode;
use claimchat_proto::message::{MessageId, RoomId, ValidationError};

use crate::claims::ClaimError;
use crate::store::StoreError;

/// Errors surfaced to the connection that issued a request.
///
/// None of these close the connection; they are reported as a
/// `ServerEvent::Error` and the client decides what to do next.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The request was malformed.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The user is not a participant of the room.
    #[error("user is not a participant of room {0}")]
    NotParticipant(RoomId),

    /// The connection has not joined the room it is acting in.
    #[error("connection has not joined room {0}")]
    NotJoined(RoomId),

    /// The sender id does not match the authenticated user.
    #[error("sender does not match the authenticated user")]
    SenderMismatch,

    /// The user may not delete this message.
    #[error("only the sender may delete message {0}")]
    Forbidden(MessageId),

    /// The message does not exist.
    #[error("message {0} not found")]
    MessageNotFound(MessageId),

    /// The claim directory rejected or could not resolve the room.
    #[error(transparent)]
    Claim(#[from] ClaimError),

    /// The message store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The connection sent something other than `Authenticate` first.
    #[error("connection is not authenticated")]
    NotAuthenticated,

    /// The task handling a submission died before answering.
    #[error("submission interrupted: {0}")]
    Interrupted(String),

    /// The frame exceeds the configured size limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Actual frame size in bytes.
        size: usize,
        /// Configured limit in bytes.
        max: usize,
    },

    /// The frame was not a valid client event.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ChatError {
    /// Maps the error onto the wire error class.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) | Self::FrameTooLarge { .. } => ErrorCode::Validation,
            Self::NotParticipant(_)
            | Self::NotJoined(_)
            | Self::SenderMismatch
            | Self::Claim(ClaimError::Unauthorized(_)) => ErrorCode::Unauthorized,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::MessageNotFound(_) | Self::Claim(ClaimError::NotFound(_)) => ErrorCode::NotFound,
            Self::Claim(ClaimError::Unavailable(_)) | Self::Store(_) | Self::Interrupted(_) => {
                ErrorCode::StoreUnavailable
            }
            Self::NotAuthenticated => ErrorCode::NotAuthenticated,
            Self::Protocol(_) => ErrorCode::Protocol,
        }
    }
}
