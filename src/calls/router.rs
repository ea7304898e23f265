//! Signaling message router.
//!
//! [`SignalingLink`] is the outbound half: it knows our relay-assigned
//! identity and the live transport, and turns payloads into wire messages.
//! [`SignalingRouter`] is the inbound half: it parses relay frames, drops
//! anything malformed or misaddressed, and dispatches the rest to the
//! [`CallManager`]. Peer-session callbacks come through here as well so
//! both directions share one ordering point.

use callcore::net::Transport;
use callcore::{ParticipantId, RelayMessage, SignalingMessage, SignalingPayload};
use log::{debug, info, warn};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use super::manager::CallManager;
use super::media::PeerEvent;
use crate::types::events::{CallEvent, EventBus};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("local identity not assigned by the relay yet")]
    NotIdentified,

    #[error("no relay connection")]
    NotConnected,

    #[error("no current call session for outbound {0}")]
    NoSession(&'static str),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Outbound side of the relay connection.
pub struct SignalingLink {
    local_id: RwLock<Option<ParticipantId>>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    events: Arc<EventBus>,
}

impl SignalingLink {
    pub fn new(events: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self {
            local_id: RwLock::new(None),
            transport: Mutex::new(None),
            events,
        })
    }

    pub async fn attach(&self, transport: Arc<dyn Transport>) {
        *self.transport.lock().await = Some(transport);
    }

    /// Forget the transport. The identity survives for the next connection.
    pub async fn detach(&self) -> Option<Arc<dyn Transport>> {
        self.transport.lock().await.take()
    }

    /// Returns `true` if the identity changed.
    pub async fn assign_identity(&self, id: ParticipantId) -> bool {
        let mut local = self.local_id.write().await;
        if local.as_ref() == Some(&id) {
            return false;
        }
        if let Some(previous) = local.as_ref() {
            info!("Relay reassigned identity {} -> {}", previous, id);
        }
        *local = Some(id);
        true
    }

    pub async fn local_id(&self) -> Option<ParticipantId> {
        self.local_id.read().await.clone()
    }

    /// Identity known and a transport attached.
    pub async fn is_ready(&self) -> bool {
        self.local_id.read().await.is_some() && self.transport.lock().await.is_some()
    }

    /// Emit exactly one message to `to`. Never queued, never retried.
    pub async fn send(&self, to: &ParticipantId, payload: SignalingPayload) -> Result<(), LinkError> {
        let from = self.local_id().await.ok_or(LinkError::NotIdentified)?;
        let transport = self
            .transport
            .lock()
            .await
            .clone()
            .ok_or(LinkError::NotConnected)?;

        let message = SignalingMessage::new(from, to.clone(), payload);
        let data = message.encode()?;
        debug!("--> {} to {} ({} bytes)", message.signaling_type(), to, data.len());
        transport
            .send(&data)
            .await
            .map_err(|e| LinkError::Transport(e.to_string()))
    }

    /// Log an emission failure and surface it to subscribers.
    pub fn report(&self, error: &LinkError) {
        warn!(target: "Signaling", "Outbound signaling failed: {}", error);
        self.events
            .dispatch(CallEvent::SignalingError(error.to_string()));
    }
}

/// Inbound dispatch from the relay and from the peer session.
pub struct SignalingRouter {
    manager: Arc<CallManager>,
    link: Arc<SignalingLink>,
}

impl SignalingRouter {
    pub fn new(manager: Arc<CallManager>, link: Arc<SignalingLink>) -> Self {
        Self { manager, link }
    }

    /// Handle one raw relay frame. Malformed input is logged and dropped.
    pub async fn handle_frame(&self, data: &[u8]) {
        match RelayMessage::parse(data) {
            Ok(message) => self.dispatch(message).await,
            Err(e) => warn!(target: "Signaling", "Dropping malformed relay message: {}", e),
        }
    }

    pub async fn dispatch(&self, message: RelayMessage) {
        match message {
            RelayMessage::IdentityAssigned(id) => self.manager.assign_identity(id).await,
            RelayMessage::Signal(message) => self.dispatch_signal(message).await,
        }
    }

    async fn dispatch_signal(&self, message: SignalingMessage) {
        let Some(local) = self.link.local_id().await else {
            warn!(
                target: "Signaling",
                "Dropping {} from {}: identity not assigned yet",
                message.signaling_type(),
                message.from
            );
            return;
        };
        if message.to != local {
            warn!(
                target: "Signaling",
                "Dropping {} addressed to {} (we are {})",
                message.signaling_type(),
                message.to,
                local
            );
            return;
        }
        if message.from == local {
            warn!(target: "Signaling", "Dropping {} echoed from ourselves", message.signaling_type());
            return;
        }

        debug!("<-- {} from {}", message.signaling_type(), message.from);

        let SignalingMessage { from, payload, .. } = message;
        match payload {
            SignalingPayload::CallRequest { media_kind } => {
                self.manager.handle_call_request(from, media_kind).await;
            }
            SignalingPayload::CallAccept => self.manager.handle_remote_accept(&from).await,
            SignalingPayload::CallReject => self.manager.handle_remote_reject(&from).await,
            SignalingPayload::CallEnd => self.manager.handle_remote_end(&from).await,
            SignalingPayload::SdpOffer(offer) => self.manager.apply_remote_offer(&from, offer).await,
            SignalingPayload::SdpAnswer(answer) => {
                self.manager.apply_remote_answer(&from, answer).await;
            }
            SignalingPayload::IceCandidate(candidate) => {
                self.manager.apply_remote_candidate(&from, candidate).await;
            }
        }
    }

    pub async fn handle_peer_event(&self, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate { session, candidate } => {
                self.manager.emit_local_candidate(session, candidate).await;
            }
            PeerEvent::RemoteTrack { session, media } => {
                self.manager.handle_remote_track(session, media).await;
            }
            PeerEvent::FatalError { session, error } => {
                self.manager.peer_failed(session, error).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingTransport;
    use callcore::{MediaKind, SignalingType};

    #[tokio::test]
    async fn test_send_requires_identity() {
        let link = SignalingLink::new(Arc::new(EventBus::default()));
        link.attach(Arc::new(RecordingTransport::default())).await;

        let err = link
            .send(&"u2".into(), SignalingPayload::CallEnd)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::NotIdentified));
    }

    #[tokio::test]
    async fn test_send_requires_transport() {
        let link = SignalingLink::new(Arc::new(EventBus::default()));
        link.assign_identity("u1".into()).await;
        assert!(!link.is_ready().await);

        let err = link
            .send(&"u2".into(), SignalingPayload::CallEnd)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::NotConnected));
    }

    #[tokio::test]
    async fn test_send_stamps_local_identity() {
        let link = SignalingLink::new(Arc::new(EventBus::default()));
        let transport = Arc::new(RecordingTransport::default());
        link.attach(transport.clone()).await;
        link.assign_identity("u1".into()).await;

        link.send(
            &"u2".into(),
            SignalingPayload::CallRequest {
                media_kind: MediaKind::Audio,
            },
        )
        .await
        .unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from.as_str(), "u1");
        assert_eq!(sent[0].to.as_str(), "u2");
        assert_eq!(sent[0].signaling_type(), SignalingType::CallRequest);
    }

    #[tokio::test]
    async fn test_reassignment_is_reported() {
        let link = SignalingLink::new(Arc::new(EventBus::default()));
        assert!(link.assign_identity("u1".into()).await);
        assert!(!link.assign_identity("u1".into()).await);
        assert!(link.assign_identity("u7".into()).await);
        assert_eq!(link.local_id().await, Some("u7".into()));
    }

    #[tokio::test]
    async fn test_report_surfaces_error_event() {
        let events = Arc::new(EventBus::default());
        let mut rx = events.subscribe();
        let link = SignalingLink::new(events);

        link.report(&LinkError::NoSession("ice-candidate"));

        match rx.try_recv().unwrap() {
            CallEvent::SignalingError(msg) => assert!(msg.contains("ice-candidate")),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
