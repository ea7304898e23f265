//! Call manager: the state machine that owns the current call session.
//!
//! Every transition and its side effects run while holding the session
//! lock, so a side effect ("create peer session", "send call-accept") is
//! complete before any other event can observe the session. Nothing else
//! writes the session status.

use callcore::{
    CallStatus, EndCause, IceCandidate, MediaKind, ParticipantId, SessionDescription,
    SignalingPayload,
};
use log::{debug, info, warn};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

use super::candidates::DEFAULT_CANDIDATE_BUFFER_LIMIT;
use super::error::CallError;
use super::media::{
    MediaCapture, MediaHandle, NegotiationError, PeerConfig, PeerConnector, PeerEvent,
    PeerEventSender, PeerSessionHandle, TrackKind,
};
use super::negotiation::{CandidateRoute, Negotiation};
use super::router::{LinkError, SignalingLink};
use super::state::{CallSession, CallTransition, InvalidTransition};
use crate::types::events::{CallEvent, EventBus};

/// Configuration for the call manager.
#[derive(Debug, Clone)]
pub struct CallManagerConfig {
    /// Give up on an unanswered request/ring after this long. `None` rings forever.
    pub ring_timeout: Option<Duration>,
    /// Remote candidates held while waiting for the remote description.
    pub candidate_buffer_limit: usize,
    pub peer: PeerConfig,
}

impl Default for CallManagerConfig {
    fn default() -> Self {
        Self {
            ring_timeout: None,
            candidate_buffer_limit: DEFAULT_CANDIDATE_BUFFER_LIMIT,
            peer: PeerConfig::default(),
        }
    }
}

/// Owns the current [`CallSession`] and drives it through its transitions.
pub struct CallManager {
    config: CallManagerConfig,
    media: Arc<dyn MediaCapture>,
    peers: Arc<dyn PeerConnector>,
    link: Arc<SignalingLink>,
    events: Arc<EventBus>,
    peer_events: PeerEventSender,
    session: Mutex<CallSession>,
    weak_self: Weak<CallManager>,
}

impl CallManager {
    /// Create a new call manager, along with the stream of peer-session
    /// callbacks that must be fed back through the router.
    pub fn new(
        config: CallManagerConfig,
        media: Arc<dyn MediaCapture>,
        peers: Arc<dyn PeerConnector>,
        link: Arc<SignalingLink>,
        events: Arc<EventBus>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PeerEvent>) {
        let (peer_events, peer_rx) = mpsc::unbounded_channel();
        let manager = Arc::new_cyclic(|weak_self| Self {
            config,
            media,
            peers,
            link,
            events,
            peer_events,
            session: Mutex::new(CallSession::default()),
            weak_self: weak_self.clone(),
        });
        (manager, peer_rx)
    }

    /// Copy of the current session for rendering.
    pub async fn snapshot(&self) -> CallSession {
        self.session.lock().await.clone()
    }

    pub async fn status(&self) -> CallStatus {
        self.session.lock().await.status
    }

    // ==================== Local intents ====================

    /// Start an outgoing call.
    pub async fn initiate(&self, remote: ParticipantId, media_kind: MediaKind) -> Result<(), CallError> {
        let mut session = self.session.lock().await;
        if !session.status.is_idle() {
            warn!(
                "Refusing call to {}: already {} with {:?}",
                remote, session.status, session.remote_participant_id
            );
            return Err(CallError::Busy);
        }
        if !self.link.is_ready().await {
            return Err(CallError::NotConnected);
        }

        info!("Calling {} ({})", remote, media_kind);
        self.transition(
            &mut session,
            CallTransition::Initiate {
                remote: remote.clone(),
                media_kind,
            },
        )?;

        match self.media.acquire(media_kind).await {
            Ok(handle) => session.local_media = Some(handle),
            Err(e) => {
                warn!("Local media for call to {} refused: {}", remote, e);
                self.finish(&mut session, CallTransition::Failed {
                    cause: EndCause::MediaDenied,
                })
                .await;
                return Err(e.into());
            }
        }

        if let Err(e) = self
            .link
            .send(&remote, SignalingPayload::CallRequest { media_kind })
            .await
        {
            self.link.report(&e);
            self.finish(&mut session, CallTransition::Failed {
                cause: EndCause::ChannelLost,
            })
            .await;
            return Err(e.into());
        }

        self.arm_ring_timeout(session.epoch);
        Ok(())
    }

    /// Accept the ringing incoming call.
    pub async fn accept(&self) -> Result<(), CallError> {
        let mut session = self.session.lock().await;
        let remote = match (session.status, session.remote_participant_id.clone()) {
            (CallStatus::Ringing, Some(remote)) => remote,
            (status, _) => return Err(invalid(status, "accept")),
        };
        let media_kind = session.media_kind.unwrap_or_default();

        let local_media = match self.media.acquire(media_kind).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Local media for call from {} refused: {}", remote, e);
                self.send_best_effort(&remote, SignalingPayload::CallReject).await;
                self.finish(&mut session, CallTransition::Failed {
                    cause: EndCause::MediaDenied,
                })
                .await;
                return Err(e.into());
            }
        };
        session.local_media = Some(local_media);

        let peer = match self.create_peer_session().await {
            Ok(peer) => peer,
            Err(e) => {
                self.send_best_effort(&remote, SignalingPayload::CallReject).await;
                self.finish(&mut session, CallTransition::Failed {
                    cause: EndCause::Negotiation,
                })
                .await;
                return Err(e.into());
            }
        };
        session.peer_session = Some(peer);
        session.negotiation = Some(Negotiation::new(peer, self.config.candidate_buffer_limit));
        self.transition(&mut session, CallTransition::LocalAccepted)?;

        // The peer session exists before the caller can learn about the accept.
        if let Err(e) = self.link.send(&remote, SignalingPayload::CallAccept).await {
            self.link.report(&e);
            self.finish(&mut session, CallTransition::Failed {
                cause: EndCause::ChannelLost,
            })
            .await;
            return Err(e.into());
        }
        info!("Accepted call from {}", remote);
        Ok(())
    }

    /// Decline the ringing call, or withdraw our own outgoing request.
    /// A no-op when there is no call.
    ///
    /// Once the call is Connecting or Active this returns `InvalidState` and
    /// leaves the call untouched; hang up with [`CallManager::end`].
    pub async fn reject(&self) -> Result<(), CallError> {
        let mut session = self.session.lock().await;
        match session.status {
            CallStatus::Idle => Ok(()),
            CallStatus::Ringing => {
                self.decline_locked(&mut session, EndCause::Declined).await;
                Ok(())
            }
            CallStatus::Requesting => {
                self.cancel_locked(&mut session, EndCause::Cancelled).await;
                Ok(())
            }
            status => Err(invalid(status, "reject")),
        }
    }

    /// Withdraw an outgoing request that has not been answered yet.
    pub async fn cancel(&self) -> Result<(), CallError> {
        let mut session = self.session.lock().await;
        match session.status {
            CallStatus::Idle => Ok(()),
            CallStatus::Requesting => {
                self.cancel_locked(&mut session, EndCause::Cancelled).await;
                Ok(())
            }
            status => Err(invalid(status, "cancel")),
        }
    }

    /// Hang up. From Requesting this cancels and from Ringing it declines;
    /// a no-op when there is no call.
    pub async fn end(&self) -> Result<(), CallError> {
        let mut session = self.session.lock().await;
        match session.status {
            CallStatus::Idle => {}
            CallStatus::Requesting => self.cancel_locked(&mut session, EndCause::Cancelled).await,
            CallStatus::Ringing => self.decline_locked(&mut session, EndCause::Declined).await,
            CallStatus::Connecting | CallStatus::Active => {
                let remote = session.remote_participant_id.clone();
                self.finish(&mut session, CallTransition::Terminated {
                    cause: EndCause::LocalHangup,
                })
                .await;
                if let Some(remote) = remote {
                    self.send_best_effort(&remote, SignalingPayload::CallEnd).await;
                }
            }
            // Terminal statuses never outlive the lock.
            status => return Err(invalid(status, "end")),
        }
        Ok(())
    }

    pub async fn set_microphone(&self, on: bool) -> Result<(), CallError> {
        self.set_track(TrackKind::Audio, on).await
    }

    pub async fn set_camera(&self, on: bool) -> Result<(), CallError> {
        self.set_track(TrackKind::Video, on).await
    }

    async fn set_track(&self, track: TrackKind, on: bool) -> Result<(), CallError> {
        let mut session = self.session.lock().await;
        let Some(handle) = session.local_media else {
            return Err(invalid(session.status, "toggle track"));
        };
        if track == TrackKind::Video && session.media_kind != Some(MediaKind::Video) {
            return Err(invalid(session.status, "toggle camera on audio call"));
        }
        self.media.set_track_enabled(handle, track, on).await;
        match track {
            TrackKind::Audio => session.microphone_on = on,
            TrackKind::Video => session.camera_on = on,
        }
        self.publish(&session);
        Ok(())
    }

    // ==================== Relay events ====================

    pub async fn assign_identity(&self, id: ParticipantId) {
        if !self.link.assign_identity(id.clone()).await {
            return;
        }
        info!("Relay assigned identity {}", id);
        self.session.lock().await.local_participant_id = Some(id.clone());
        self.events.dispatch(CallEvent::IdentityAssigned(id));
    }

    pub async fn handle_call_request(&self, from: ParticipantId, media_kind: MediaKind) {
        let mut session = self.session.lock().await;
        if !session.status.is_idle() {
            info!(
                "Busy ({} with {:?}); declining {} call from {}",
                session.status, session.remote_participant_id, media_kind, from
            );
            drop(session);
            self.send_best_effort(&from, SignalingPayload::CallReject).await;
            return;
        }

        info!("Incoming {} call from {}", media_kind, from);
        if self
            .transition(
                &mut session,
                CallTransition::RequestReceived {
                    remote: from,
                    media_kind,
                },
            )
            .is_ok()
        {
            self.arm_ring_timeout(session.epoch);
        }
    }

    pub async fn handle_remote_accept(&self, from: &ParticipantId) {
        let mut session = self.session.lock().await;
        if session.status != CallStatus::Requesting || !session.is_with(from) {
            debug!("Ignoring call-accept from {} while {}", from, session.status);
            return;
        }

        let peer = match self.create_peer_session().await {
            Ok(peer) => peer,
            Err(e) => {
                self.fail_locked(&mut session, &e).await;
                return;
            }
        };
        session.peer_session = Some(peer);
        session.negotiation = Some(Negotiation::new(peer, self.config.candidate_buffer_limit));
        if self
            .transition(&mut session, CallTransition::RemoteAccepted)
            .is_err()
        {
            return;
        }
        info!("{} accepted our call", from);

        let offer = match self.peers.create_offer(peer).await {
            Ok(offer) => offer,
            Err(e) => {
                self.fail_locked(&mut session, &e).await;
                return;
            }
        };
        if let Some(negotiation) = session.negotiation.as_mut() {
            negotiation.mark_offer_sent();
        }
        if let Err(e) = self.link.send(from, SignalingPayload::SdpOffer(offer)).await {
            self.link.report(&e);
            self.finish(&mut session, CallTransition::Failed {
                cause: EndCause::ChannelLost,
            })
            .await;
        }
    }

    pub async fn handle_remote_reject(&self, from: &ParticipantId) {
        let mut session = self.session.lock().await;
        if session.status != CallStatus::Requesting || !session.is_with(from) {
            debug!("Ignoring call-reject from {} while {}", from, session.status);
            return;
        }
        info!("{} declined our call", from);
        self.finish(&mut session, CallTransition::RemoteRejected).await;
    }

    pub async fn handle_remote_end(&self, from: &ParticipantId) {
        let mut session = self.session.lock().await;
        if session.status.is_idle() || !session.is_with(from) {
            debug!("Ignoring call-end from {} while {}", from, session.status);
            return;
        }
        info!("{} ended the call", from);
        self.finish(&mut session, CallTransition::Terminated {
            cause: EndCause::RemoteHangup,
        })
        .await;
    }

    /// The relay connection is gone: whatever call exists cannot continue.
    pub async fn channel_lost(&self) {
        let mut session = self.session.lock().await;
        if session.status.is_idle() {
            return;
        }
        warn!(
            "Signaling channel lost while {}; ending call with {:?}",
            session.status, session.remote_participant_id
        );
        self.finish(&mut session, CallTransition::Terminated {
            cause: EndCause::ChannelLost,
        })
        .await;
    }

    // ==================== Negotiation ====================

    pub async fn apply_remote_offer(&self, from: &ParticipantId, offer: SessionDescription) {
        let mut session = self.session.lock().await;
        if !session.is_with(from) {
            debug!("Dropping sdp-offer from {}: no call with them", from);
            return;
        }
        match session.status {
            CallStatus::Connecting => {}
            CallStatus::Requesting | CallStatus::Ringing => {
                warn!(
                    "sdp-offer from {} arrived before the call was accepted ({})",
                    from, session.status
                );
                let error = NegotiationError::new("offer received before call-accept");
                self.fail_locked(&mut session, &error).await;
                return;
            }
            status => {
                debug!("Dropping sdp-offer from {} while {}", from, status);
                return;
            }
        }
        let Some(peer) = self.current_negotiation(&session, |n| n.accepts_offer()) else {
            warn!("Dropping sdp-offer from {}: not expecting an offer", from);
            return;
        };

        if let Err(e) = self.apply_remote_description(&mut session, peer, &offer).await {
            self.fail_locked(&mut session, &e).await;
            return;
        }
        let answer = match self.peers.create_answer(peer, &offer).await {
            Ok(answer) => answer,
            Err(e) => {
                self.fail_locked(&mut session, &e).await;
                return;
            }
        };
        if let Err(e) = self.link.send(from, SignalingPayload::SdpAnswer(answer)).await {
            self.link.report(&e);
            self.finish(&mut session, CallTransition::Failed {
                cause: EndCause::ChannelLost,
            })
            .await;
        }
    }

    pub async fn apply_remote_answer(&self, from: &ParticipantId, answer: SessionDescription) {
        let mut session = self.session.lock().await;
        if !session.is_with(from) || !session.status.has_peer_session() {
            debug!("Dropping sdp-answer from {} while {}", from, session.status);
            return;
        }
        let Some(peer) = self.current_negotiation(&session, |n| n.accepts_answer()) else {
            debug!("Dropping sdp-answer from {}: no offer outstanding", from);
            return;
        };
        if let Err(e) = self.apply_remote_description(&mut session, peer, &answer).await {
            self.fail_locked(&mut session, &e).await;
        }
    }

    pub async fn apply_remote_candidate(&self, from: &ParticipantId, candidate: IceCandidate) {
        let mut session = self.session.lock().await;
        if !session.is_with(from) || !session.status.has_peer_session() {
            debug!("Dropping ice-candidate from {} while {}", from, session.status);
            return;
        }
        let Some(negotiation) = session.negotiation.as_mut() else {
            return;
        };
        let peer = negotiation.session();
        match negotiation.route_candidate(candidate) {
            CandidateRoute::Apply(candidate) => {
                if let Err(e) = self.peers.add_remote_candidate(peer, &candidate).await {
                    self.fail_locked(&mut session, &e).await;
                }
            }
            CandidateRoute::Buffered => {
                debug!(
                    "Buffered ice-candidate from {} until remote description is set",
                    from
                );
            }
            CandidateRoute::Overflow => {
                warn!(
                    "Candidate buffer full ({}), dropping ice-candidate from {} ({} dropped so far)",
                    self.config.candidate_buffer_limit,
                    from,
                    negotiation.overflowed()
                );
            }
        }
    }

    pub async fn emit_local_candidate(&self, peer: PeerSessionHandle, candidate: IceCandidate) {
        let session = self.session.lock().await;
        let remote = match (&session.remote_participant_id, session.peer_session) {
            (Some(remote), Some(current)) if current == peer => remote.clone(),
            _ => {
                self.link.report(&LinkError::NoSession("ice-candidate"));
                return;
            }
        };
        if let Err(e) = self
            .link
            .send(&remote, SignalingPayload::IceCandidate(candidate))
            .await
        {
            self.link.report(&e);
        }
    }

    // ==================== Peer session events ====================

    pub async fn handle_remote_track(&self, peer: PeerSessionHandle, media: MediaHandle) {
        let mut session = self.session.lock().await;
        if session.peer_session != Some(peer) {
            debug!("Ignoring remote track from stale {}", peer);
            return;
        }
        if !session.remote_media.contains(&media) {
            session.remote_media.push(media);
        }
        match session.status {
            CallStatus::Connecting => {
                if self.transition(&mut session, CallTransition::RemoteTrack).is_ok() {
                    info!("Call with {:?} is active", session.remote_participant_id);
                }
            }
            _ => self.publish(&session),
        }
    }

    pub async fn peer_failed(&self, peer: PeerSessionHandle, error: NegotiationError) {
        let mut session = self.session.lock().await;
        if session.peer_session != Some(peer) {
            debug!("Ignoring failure of stale {}: {}", peer, error);
            return;
        }
        self.fail_locked(&mut session, &error).await;
    }

    // ==================== Internals ====================

    fn transition(
        &self,
        session: &mut CallSession,
        transition: CallTransition,
    ) -> Result<(), InvalidTransition> {
        session.apply_transition(transition).inspect_err(|e| {
            warn!("Rejected transition: {}", e);
        })?;
        debug_assert!(
            session.invariants_hold(),
            "session invariants broken in {:?}",
            session.status
        );
        self.publish(session);
        Ok(())
    }

    fn publish(&self, session: &CallSession) {
        self.events
            .dispatch(CallEvent::StatusChanged(Box::new(session.clone())));
    }

    /// Release everything the session holds, publish the terminal status and
    /// reset to Idle.
    async fn finish(&self, session: &mut CallSession, terminal: CallTransition) {
        self.release_resources(session).await;
        if self.transition(session, terminal).is_ok() && session.status.is_terminal() {
            let _ = self.transition(session, CallTransition::Reset);
        }
    }

    async fn release_resources(&self, session: &mut CallSession) {
        let held = session.take_resources();
        if let Some(peer) = held.peer_session {
            self.peers.destroy(peer).await;
        }
        if let Some(media) = held.local_media {
            self.media.release(media).await;
        }
        for media in held.remote_media {
            self.media.release(media).await;
        }
    }

    async fn cancel_locked(&self, session: &mut CallSession, cause: EndCause) {
        let remote = session.remote_participant_id.clone();
        self.release_resources(session).await;
        if let Some(remote) = remote {
            self.send_best_effort(&remote, SignalingPayload::CallEnd).await;
        }
        let _ = self.transition(session, CallTransition::Cancelled { cause });
    }

    async fn decline_locked(&self, session: &mut CallSession, cause: EndCause) {
        if let Some(remote) = session.remote_participant_id.clone() {
            self.send_best_effort(&remote, SignalingPayload::CallReject).await;
        }
        self.finish(session, CallTransition::LocalRejected { cause }).await;
    }

    /// Negotiation broke: tell the remote side and fail the call.
    async fn fail_locked(&self, session: &mut CallSession, error: &NegotiationError) {
        warn!(
            "Call with {:?} failed: {}",
            session.remote_participant_id, error
        );
        if let Some(remote) = session.remote_participant_id.clone() {
            self.send_best_effort(&remote, SignalingPayload::CallEnd).await;
        }
        self.finish(session, CallTransition::Failed {
            cause: EndCause::Negotiation,
        })
        .await;
    }

    async fn send_best_effort(&self, to: &ParticipantId, payload: SignalingPayload) {
        if let Err(e) = self.link.send(to, payload).await {
            self.link.report(&e);
        }
    }

    async fn create_peer_session(&self) -> Result<PeerSessionHandle, NegotiationError> {
        let peer = self
            .peers
            .create(&self.config.peer, self.peer_events.clone())
            .await?;
        debug!("Created {}", peer);
        Ok(peer)
    }

    fn current_negotiation(
        &self,
        session: &CallSession,
        ready: impl Fn(&Negotiation) -> bool,
    ) -> Option<PeerSessionHandle> {
        session
            .negotiation
            .as_ref()
            .filter(|n| Some(n.session()) == session.peer_session && ready(*n))
            .map(Negotiation::session)
    }

    /// Set the remote description, then replay candidates that raced it.
    async fn apply_remote_description(
        &self,
        session: &mut CallSession,
        peer: PeerSessionHandle,
        description: &SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.peers.set_remote_description(peer, description).await?;
        let pending = session
            .negotiation
            .as_mut()
            .map(Negotiation::remote_description_applied)
            .unwrap_or_default();
        if !pending.is_empty() {
            debug!("Applying {} buffered ice-candidates", pending.len());
        }
        for candidate in &pending {
            self.peers.add_remote_candidate(peer, candidate).await?;
        }
        Ok(())
    }

    fn arm_ring_timeout(&self, epoch: u64) {
        let Some(timeout) = self.config.ring_timeout else {
            return;
        };
        let manager = self.weak_self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(manager) = manager.upgrade() {
                manager.ring_timed_out(epoch).await;
            }
        });
    }

    async fn ring_timed_out(&self, epoch: u64) {
        let mut session = self.session.lock().await;
        if session.epoch != epoch {
            return;
        }
        match session.status {
            CallStatus::Requesting => {
                info!("No answer from {:?}; giving up", session.remote_participant_id);
                self.cancel_locked(&mut session, EndCause::Timeout).await;
            }
            CallStatus::Ringing => {
                info!("Call from {:?} was not answered", session.remote_participant_id);
                self.decline_locked(&mut session, EndCause::Timeout).await;
            }
            _ => {}
        }
    }
}

fn invalid(status: CallStatus, attempted: &'static str) -> CallError {
    CallError::InvalidState(InvalidTransition {
        current_state: status,
        attempted,
    })
}
