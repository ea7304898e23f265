//! Call-related error types.

use thiserror::Error;

use super::media::{MediaError, NegotiationError};
use super::router::LinkError;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("another call is already in progress")]
    Busy,

    #[error("media denied: {0}")]
    MediaDenied(#[from] MediaError),

    #[error("invalid call state transition: {0}")]
    InvalidState(#[from] super::state::InvalidTransition),

    #[error("not connected to the relay")]
    NotConnected,

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error("signaling failed: {0}")]
    Signaling(#[from] LinkError),
}
