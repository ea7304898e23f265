//! Two-party call signaling.
//!
//! # Architecture
//!
//! - [`CallSession`] & [`CallTransition`]: the session record and its edge table
//! - [`CallManager`]: owns the session, performs side effects around transitions
//! - [`SignalingLink`]: outbound messages stamped with our relay identity
//! - [`SignalingRouter`]: validates relay frames and peer callbacks, dispatches them
//! - [`MediaCapture`] & [`PeerConnector`]: collaborator seams for media and the
//!   peer-to-peer session
//!
//! # Protocol Overview
//!
//! The caller sends `call-request`; the callee answers with `call-accept` or
//! `call-reject`. After an accept the caller offers, the callee answers, and
//! both sides trickle ICE candidates. Either side may send `call-end`.

mod candidates;
mod error;
mod manager;
mod media;
mod negotiation;
mod router;
mod state;


pub use candidates::{CandidateBuffer, DEFAULT_CANDIDATE_BUFFER_LIMIT};
pub use error::CallError;
pub use manager::{CallManager, CallManagerConfig};
pub use media::{
    MediaCapture, MediaError, MediaHandle, NegotiationError, PeerConfig, PeerConnector,
    PeerEvent, PeerEventSender, PeerSessionHandle, TrackKind,
};
pub use negotiation::{CandidateRoute, Negotiation};
pub use router::{LinkError, SignalingLink, SignalingRouter};
pub use state::{CallSession, CallTransition, InvalidTransition};
