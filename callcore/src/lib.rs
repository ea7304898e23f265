//! Runtime-agnostic building blocks for the call signaling client:
//! participant and call types, the relay wire format and the transport seam.

pub mod net;
pub mod signaling;
pub mod types;

pub use signaling::{
    IceCandidate, MalformedMessage, RelayMessage, SessionDescription, SignalingMessage,
    SignalingPayload, SignalingType,
};
pub use types::call::{CallRole, CallStatus, EndCause, MediaKind, ParticipantId};
