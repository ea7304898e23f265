//! Fakes for the collaborator seams and an in-memory relay.

use async_trait::async_trait;
use bytes::Bytes;
use callcore::net::{Transport, TransportEvent, TransportFactory};
use callcore::{
    CallStatus, IceCandidate, MediaKind, ParticipantId, RelayMessage, SessionDescription,
    SignalingMessage, SignalingPayload, SignalingType,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use crate::calls::{
    CallManager, CallManagerConfig, CallSession, MediaCapture, MediaError, MediaHandle,
    NegotiationError, PeerConfig, PeerConnector, PeerEvent, PeerEventSender, PeerSessionHandle,
    SignalingLink, SignalingRouter, TrackKind,
};
use crate::types::events::{CallEvent, EventBus};

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport that records everything sent through it.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Vec<u8>>>,
    fail: AtomicBool,
}

impl RecordingTransport {
    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Signaling messages sent so far, in order.
    pub fn sent(&self) -> Vec<SignalingMessage> {
        self.sent
            .lock()
            .expect("sent log poisoned")
            .iter()
            .filter_map(|data| match RelayMessage::parse(data) {
                Ok(RelayMessage::Signal(message)) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn sent_types(&self) -> Vec<SignalingType> {
        self.sent().iter().map(|m| m.signaling_type()).collect()
    }

    pub fn clear(&self) {
        self.sent.lock().expect("sent log poisoned").clear();
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, data: &[u8]) -> Result<(), anyhow::Error> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("send refused"));
        }
        self.sent.lock().expect("sent log poisoned").push(data.to_vec());
        Ok(())
    }

    async fn disconnect(&self) {}
}

/// Media capture that hands out numbered handles, or refuses when denied.
#[derive(Default)]
pub struct FakeMedia {
    next_id: AtomicU64,
    deny: AtomicBool,
    acquired: Mutex<Vec<(MediaHandle, MediaKind)>>,
    released: Mutex<Vec<MediaHandle>>,
    toggles: Mutex<Vec<(MediaHandle, TrackKind, bool)>>,
}

impl FakeMedia {
    pub fn deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    pub fn acquired(&self) -> Vec<(MediaHandle, MediaKind)> {
        self.acquired.lock().expect("media log poisoned").clone()
    }

    pub fn released(&self) -> Vec<MediaHandle> {
        self.released.lock().expect("media log poisoned").clone()
    }

    pub fn toggles(&self) -> Vec<(MediaHandle, TrackKind, bool)> {
        self.toggles.lock().expect("media log poisoned").clone()
    }
}

#[async_trait]
impl MediaCapture for FakeMedia {
    async fn acquire(&self, kind: MediaKind) -> Result<MediaHandle, MediaError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied(format!("{kind} capture blocked")));
        }
        let handle = MediaHandle::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.acquired
            .lock()
            .expect("media log poisoned")
            .push((handle, kind));
        Ok(handle)
    }

    async fn release(&self, handle: MediaHandle) {
        self.released.lock().expect("media log poisoned").push(handle);
    }

    async fn set_track_enabled(&self, handle: MediaHandle, track: TrackKind, enabled: bool) {
        self.toggles
            .lock()
            .expect("media log poisoned")
            .push((handle, track, enabled));
    }
}

/// One recorded call into [`FakePeers`].
#[derive(Debug, Clone, PartialEq)]
pub enum PeerCall {
    Create(PeerConfig),
    CreateOffer(PeerSessionHandle),
    CreateAnswer(PeerSessionHandle),
    SetRemoteDescription(PeerSessionHandle, SessionDescription),
    AddRemoteCandidate(PeerSessionHandle, IceCandidate),
    Destroy(PeerSessionHandle),
}

/// Peer connector that records every call and lets tests raise callbacks.
#[derive(Default)]
pub struct FakePeers {
    next_id: AtomicU64,
    calls: Mutex<Vec<PeerCall>>,
    senders: Mutex<HashMap<PeerSessionHandle, PeerEventSender>>,
    fail_create: AtomicBool,
    fail_remote_description: AtomicBool,
}

impl FakePeers {
    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_remote_description(&self, fail: bool) {
        self.fail_remote_description.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<PeerCall> {
        self.calls.lock().expect("peer log poisoned").clone()
    }

    pub fn created(&self) -> Vec<PeerSessionHandle> {
        (1..=self.next_id.load(Ordering::SeqCst))
            .map(PeerSessionHandle::new)
            .collect()
    }

    pub fn last_session(&self) -> Option<PeerSessionHandle> {
        match self.next_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(PeerSessionHandle::new(id)),
        }
    }

    pub fn destroyed(&self) -> Vec<PeerSessionHandle> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PeerCall::Destroy(session) => Some(session),
                _ => None,
            })
            .collect()
    }

    pub fn applied_candidates(&self, session: PeerSessionHandle) -> Vec<IceCandidate> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PeerCall::AddRemoteCandidate(s, candidate) if s == session => Some(candidate),
                _ => None,
            })
            .collect()
    }

    pub fn remote_descriptions(&self, session: PeerSessionHandle) -> Vec<SessionDescription> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PeerCall::SetRemoteDescription(s, description) if s == session => Some(description),
                _ => None,
            })
            .collect()
    }

    /// Raise a callback as the peer session would.
    pub fn emit(&self, event: PeerEvent) {
        let sender = self
            .senders
            .lock()
            .expect("peer senders poisoned")
            .get(&event.session())
            .cloned();
        if let Some(sender) = sender {
            let _ = sender.send(event);
        }
    }

    pub fn emit_remote_track(&self, session: PeerSessionHandle, media: MediaHandle) {
        self.emit(PeerEvent::RemoteTrack { session, media });
    }

    pub fn emit_local_candidate(&self, session: PeerSessionHandle, candidate: IceCandidate) {
        self.emit(PeerEvent::LocalCandidate { session, candidate });
    }

    fn record(&self, call: PeerCall) {
        self.calls.lock().expect("peer log poisoned").push(call);
    }
}

#[async_trait]
impl PeerConnector for FakePeers {
    async fn create(
        &self,
        config: &PeerConfig,
        events: PeerEventSender,
    ) -> Result<PeerSessionHandle, NegotiationError> {
        self.record(PeerCall::Create(config.clone()));
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(NegotiationError::new("peer session unavailable"));
        }
        let session = PeerSessionHandle::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.senders
            .lock()
            .expect("peer senders poisoned")
            .insert(session, events);
        Ok(session)
    }

    async fn create_offer(
        &self,
        session: PeerSessionHandle,
    ) -> Result<SessionDescription, NegotiationError> {
        self.record(PeerCall::CreateOffer(session));
        Ok(sdp("offer", session))
    }

    async fn create_answer(
        &self,
        session: PeerSessionHandle,
        _remote: &SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        self.record(PeerCall::CreateAnswer(session));
        Ok(sdp("answer", session))
    }

    async fn set_remote_description(
        &self,
        session: PeerSessionHandle,
        description: &SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.record(PeerCall::SetRemoteDescription(session, description.clone()));
        if self.fail_remote_description.load(Ordering::SeqCst) {
            return Err(NegotiationError::new("malformed session description"));
        }
        Ok(())
    }

    async fn add_remote_candidate(
        &self,
        session: PeerSessionHandle,
        candidate: &IceCandidate,
    ) -> Result<(), NegotiationError> {
        self.record(PeerCall::AddRemoteCandidate(session, candidate.clone()));
        Ok(())
    }

    async fn destroy(&self, session: PeerSessionHandle) {
        self.record(PeerCall::Destroy(session));
        self.senders
            .lock()
            .expect("peer senders poisoned")
            .remove(&session);
    }
}

pub fn sdp(kind: &str, session: PeerSessionHandle) -> SessionDescription {
    SessionDescription::new(json!({ "type": kind, "sdp": format!("v=0 {kind} {session}") }))
}

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate::new(json!({
        "candidate": format!("candidate:{n} 1 udp 2122260223 192.0.2.{n} 5000{n} typ host"),
        "sdpMid": "0",
        "sdpMLineIndex": 0,
    }))
}

/// One call manager wired to fakes, driven directly through its router.
pub struct TestHarness {
    pub manager: Arc<CallManager>,
    pub router: SignalingRouter,
    pub link: Arc<SignalingLink>,
    pub transport: Arc<RecordingTransport>,
    pub media: Arc<FakeMedia>,
    pub peers: Arc<FakePeers>,
    pub events: broadcast::Receiver<CallEvent>,
    peer_events: mpsc::UnboundedReceiver<PeerEvent>,
}

impl TestHarness {
    pub async fn new(local: &str) -> Self {
        Self::with_config(local, CallManagerConfig::default()).await
    }

    pub async fn with_config(local: &str, config: CallManagerConfig) -> Self {
        let bus = Arc::new(EventBus::default());
        let events = bus.subscribe();
        let link = SignalingLink::new(bus.clone());
        let transport = Arc::new(RecordingTransport::default());
        let media = Arc::new(FakeMedia::default());
        let peers = Arc::new(FakePeers::default());

        let (manager, peer_events) =
            CallManager::new(config, media.clone(), peers.clone(), link.clone(), bus);
        let router = SignalingRouter::new(manager.clone(), link.clone());

        link.attach(transport.clone()).await;
        router
            .dispatch(RelayMessage::IdentityAssigned(local.into()))
            .await;

        Self {
            manager,
            router,
            link,
            transport,
            media,
            peers,
            events,
            peer_events,
        }
    }

    /// Deliver a message from `from` as it would arrive from the relay.
    pub async fn deliver(&self, from: &str, payload: SignalingPayload) {
        let local = self
            .link
            .local_id()
            .await
            .expect("harness identity assigned");
        let data = SignalingMessage::new(from.into(), local, payload)
            .encode()
            .expect("encode test message");
        self.router.handle_frame(&data).await;
    }

    /// Route every queued peer-session callback.
    pub async fn pump_peer_events(&mut self) {
        while let Ok(event) = self.peer_events.try_recv() {
            self.router.handle_peer_event(event).await;
        }
    }

    /// Every event published since the last drain, in order.
    pub fn drain_events(&mut self) -> Vec<CallEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Statuses published since the last drain, in order.
    pub fn statuses(&mut self) -> Vec<CallStatus> {
        self.drain_events()
            .into_iter()
            .filter_map(|event| match event {
                CallEvent::StatusChanged(session) => Some(session.status),
                _ => None,
            })
            .collect()
    }
}

/// Relay that assigns `peer-N` identities and forwards messages by `to`.
#[derive(Default)]
pub struct InMemoryRelay {
    next_id: AtomicU64,
    clients: Mutex<HashMap<ParticipantId, mpsc::Sender<TransportEvent>>>,
}

impl InMemoryRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn factory(self: &Arc<Self>) -> Arc<dyn TransportFactory> {
        Arc::new(RelayConnector {
            relay: self.clone(),
        })
    }

    pub fn connected(&self) -> usize {
        self.clients.lock().expect("relay clients poisoned").len()
    }

    /// Cut one client off as if the relay connection dropped.
    pub fn drop_client(&self, id: &ParticipantId) {
        let sender = self
            .clients
            .lock()
            .expect("relay clients poisoned")
            .remove(id);
        if let Some(sender) = sender {
            let _ = sender.try_send(TransportEvent::Disconnected);
        }
    }

    fn route(&self, data: &[u8]) {
        let Ok(RelayMessage::Signal(message)) = RelayMessage::parse(data) else {
            return;
        };
        let recipient = self
            .clients
            .lock()
            .expect("relay clients poisoned")
            .get(&message.to)
            .cloned();
        if let Some(recipient) = recipient {
            let _ = recipient.try_send(TransportEvent::DataReceived(Bytes::copy_from_slice(data)));
        }
    }
}

struct RelayConnector {
    relay: Arc<InMemoryRelay>,
}

#[async_trait]
impl TransportFactory for RelayConnector {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        let id = ParticipantId::new(format!(
            "peer-{}",
            self.relay.next_id.fetch_add(1, Ordering::SeqCst) + 1
        ));
        let (tx, rx) = mpsc::channel(256);
        tx.send(TransportEvent::Connected).await?;
        let hello = json!({ "type": "id", "payload": { "id": id.as_str() } }).to_string();
        tx.send(TransportEvent::DataReceived(Bytes::from(hello)))
            .await?;
        self.relay
            .clients
            .lock()
            .expect("relay clients poisoned")
            .insert(id.clone(), tx);

        let transport = RelayTransport {
            relay: self.relay.clone(),
            id,
        };
        Ok((Arc::new(transport), rx))
    }
}

struct RelayTransport {
    relay: Arc<InMemoryRelay>,
    id: ParticipantId,
}

#[async_trait]
impl Transport for RelayTransport {
    async fn send(&self, data: &[u8]) -> Result<(), anyhow::Error> {
        self.relay.route(data);
        Ok(())
    }

    async fn disconnect(&self) {
        self.relay.drop_client(&self.id);
    }
}

pub async fn wait_for_identity(events: &mut broadcast::Receiver<CallEvent>) -> ParticipantId {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(CallEvent::IdentityAssigned(id)) => return id,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
                _ => {}
            }
        }
    })
    .await
    .expect("identity was not assigned in time")
}

pub async fn wait_for_status(
    events: &mut broadcast::Receiver<CallEvent>,
    status: CallStatus,
) -> CallSession {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(CallEvent::StatusChanged(session)) if session.status == status => {
                    return *session;
                }
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
                _ => {}
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("status {status} not reached in time"))
}
