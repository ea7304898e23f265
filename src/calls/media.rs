//! Collaborator seams: media capture and the peer-to-peer session.
//!
//! The call core never touches camera frames or ICE internals. It holds
//! opaque handles and asks these traits to act on them.

use async_trait::async_trait;
use callcore::{IceCandidate, MediaKind, SessionDescription};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Opaque reference to a captured or received media stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaHandle(u64);

impl MediaHandle {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "media#{}", self.0)
    }
}

/// Opaque reference to one peer-to-peer negotiation object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerSessionHandle(u64);

impl PeerSessionHandle {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerSessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("media permission denied: {0}")]
    PermissionDenied(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("negotiation failed: {0}")]
pub struct NegotiationError(pub String);

impl NegotiationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Camera/microphone access.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn acquire(&self, kind: MediaKind) -> Result<MediaHandle, MediaError>;

    /// Must be idempotent.
    async fn release(&self, handle: MediaHandle);

    /// Enable or disable one track of a captured stream.
    async fn set_track_enabled(&self, handle: MediaHandle, track: TrackKind, enabled: bool);
}

/// Settings handed to the peer session on creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerConfig {
    pub ice_servers: Vec<String>,
}

/// Callbacks from a peer session, delivered through a channel so they never
/// re-enter the state machine while a transition is in progress.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    LocalCandidate {
        session: PeerSessionHandle,
        candidate: IceCandidate,
    },
    RemoteTrack {
        session: PeerSessionHandle,
        media: MediaHandle,
    },
    FatalError {
        session: PeerSessionHandle,
        error: NegotiationError,
    },
}

impl PeerEvent {
    pub fn session(&self) -> PeerSessionHandle {
        match self {
            Self::LocalCandidate { session, .. }
            | Self::RemoteTrack { session, .. }
            | Self::FatalError { session, .. } => *session,
        }
    }
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

/// The peer-to-peer media transport.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Create a peer session that reports its callbacks on `events`.
    async fn create(
        &self,
        config: &PeerConfig,
        events: PeerEventSender,
    ) -> Result<PeerSessionHandle, NegotiationError>;

    async fn create_offer(
        &self,
        session: PeerSessionHandle,
    ) -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(
        &self,
        session: PeerSessionHandle,
        remote: &SessionDescription,
    ) -> Result<SessionDescription, NegotiationError>;

    async fn set_remote_description(
        &self,
        session: PeerSessionHandle,
        description: &SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn add_remote_candidate(
        &self,
        session: PeerSessionHandle,
        candidate: &IceCandidate,
    ) -> Result<(), NegotiationError>;

    /// Must be idempotent and release all network resources.
    async fn destroy(&self, session: PeerSessionHandle);
}
