//! Call session record and its transition table.
//!
//! `apply_transition` only validates edges and updates the record; every
//! side effect (media, peer session, relay messages) is performed by
//! [`CallManager`](super::manager::CallManager) around it.

use callcore::{CallRole, CallStatus, EndCause, MediaKind, ParticipantId};
use chrono::{DateTime, Utc};

use super::media::{MediaHandle, PeerSessionHandle};
use super::negotiation::Negotiation;

/// State transitions for the current session.
#[derive(Debug, Clone)]
pub enum CallTransition {
    Initiate {
        remote: ParticipantId,
        media_kind: MediaKind,
    },
    RequestReceived {
        remote: ParticipantId,
        media_kind: MediaKind,
    },
    RemoteAccepted,
    LocalAccepted,
    RemoteRejected,
    LocalRejected { cause: EndCause },
    /// Outgoing request withdrawn before an answer; goes straight to Idle.
    Cancelled { cause: EndCause },
    RemoteTrack,
    Terminated { cause: EndCause },
    Failed { cause: EndCause },
    /// Terminal status published, back to Idle.
    Reset,
}

impl CallTransition {
    fn name(&self) -> &'static str {
        match self {
            Self::Initiate { .. } => "Initiate",
            Self::RequestReceived { .. } => "RequestReceived",
            Self::RemoteAccepted => "RemoteAccepted",
            Self::LocalAccepted => "LocalAccepted",
            Self::RemoteRejected => "RemoteRejected",
            Self::LocalRejected { .. } => "LocalRejected",
            Self::Cancelled { .. } => "Cancelled",
            Self::RemoteTrack => "RemoteTrack",
            Self::Terminated { .. } => "Terminated",
            Self::Failed { .. } => "Failed",
            Self::Reset => "Reset",
        }
    }
}

/// The single current call session of this client.
#[derive(Debug, Clone, Default)]
pub struct CallSession {
    /// Increments for every new call attempt; stale timers and peer
    /// callbacks compare against it.
    pub epoch: u64,
    pub local_participant_id: Option<ParticipantId>,
    pub remote_participant_id: Option<ParticipantId>,
    pub status: CallStatus,
    pub media_kind: Option<MediaKind>,
    pub role: Option<CallRole>,
    pub local_media: Option<MediaHandle>,
    /// Every distinct remote track reported for the current peer session.
    pub remote_media: Vec<MediaHandle>,
    pub peer_session: Option<PeerSessionHandle>,
    pub microphone_on: bool,
    pub camera_on: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    /// Cause of the most recent exit from a call; kept after reset to Idle.
    pub end_cause: Option<EndCause>,
    pub(crate) negotiation: Option<Negotiation>,
}

/// Resources a session holds that must be handed back on teardown.
#[derive(Debug, Default)]
pub(crate) struct HeldResources {
    pub local_media: Option<MediaHandle>,
    pub remote_media: Vec<MediaHandle>,
    pub peer_session: Option<PeerSessionHandle>,
}

impl CallSession {
    pub fn is_caller(&self) -> bool {
        self.role == Some(CallRole::Caller)
    }

    /// Whether `id` is the party this session is talking to.
    pub fn is_with(&self, id: &ParticipantId) -> bool {
        self.remote_participant_id.as_ref() == Some(id)
    }

    /// Structural invariants between status and held handles.
    pub fn invariants_hold(&self) -> bool {
        let remote_ok = self.remote_participant_id.is_some()
            == !matches!(self.status, CallStatus::Idle | CallStatus::Ended);
        let peer_ok = self.peer_session.is_some() == self.status.has_peer_session();
        remote_ok && peer_ok
    }

    pub(crate) fn take_resources(&mut self) -> HeldResources {
        self.negotiation = None;
        HeldResources {
            local_media: self.local_media.take(),
            remote_media: std::mem::take(&mut self.remote_media),
            peer_session: self.peer_session.take(),
        }
    }

    /// Apply a state transition. Returns error if transition is invalid.
    pub fn apply_transition(&mut self, transition: CallTransition) -> Result<(), InvalidTransition> {
        use CallStatus::*;

        let next = match (self.status, &transition) {
            (Idle, CallTransition::Initiate { .. }) => Requesting,
            (Idle, CallTransition::RequestReceived { .. }) => Ringing,
            (Requesting, CallTransition::RemoteAccepted) => Connecting,
            (Requesting, CallTransition::RemoteRejected) => Rejected,
            (Requesting, CallTransition::Cancelled { .. }) => Idle,
            (Ringing, CallTransition::LocalAccepted) => Connecting,
            (Ringing, CallTransition::LocalRejected { .. }) => Rejected,
            (Connecting, CallTransition::RemoteTrack) => Active,
            (
                Requesting | Ringing | Connecting | Active,
                CallTransition::Terminated { .. },
            ) => Ended,
            (Requesting | Ringing | Connecting | Active, CallTransition::Failed { .. }) => Failed,
            (Ended | Rejected | Failed, CallTransition::Reset) => Idle,
            (current, attempted) => {
                return Err(InvalidTransition {
                    current_state: current,
                    attempted: attempted.name(),
                });
            }
        };

        match transition {
            CallTransition::Initiate { remote, media_kind } => {
                self.begin(remote, media_kind, CallRole::Caller);
            }
            CallTransition::RequestReceived { remote, media_kind } => {
                self.begin(remote, media_kind, CallRole::Callee);
            }
            CallTransition::RemoteTrack => {
                self.connected_at = Some(Utc::now());
            }
            CallTransition::RemoteRejected => {
                self.end_cause = Some(EndCause::RemoteDeclined);
            }
            CallTransition::LocalRejected { cause }
            | CallTransition::Failed { cause } => {
                self.end_cause = Some(cause);
            }
            CallTransition::Terminated { cause } => {
                self.end_cause = Some(cause);
                self.remote_participant_id = None;
            }
            CallTransition::Cancelled { cause } => {
                self.end_cause = Some(cause);
                self.clear();
            }
            CallTransition::Reset => self.clear(),
            CallTransition::RemoteAccepted | CallTransition::LocalAccepted => {}
        }

        self.status = next;
        Ok(())
    }

    fn begin(&mut self, remote: ParticipantId, media_kind: MediaKind, role: CallRole) {
        self.epoch += 1;
        self.remote_participant_id = Some(remote);
        self.media_kind = Some(media_kind);
        self.role = Some(role);
        self.microphone_on = true;
        self.camera_on = media_kind.has_video();
        self.started_at = Some(Utc::now());
        self.connected_at = None;
        self.end_cause = None;
    }

    fn clear(&mut self) {
        self.remote_participant_id = None;
        self.media_kind = None;
        self.role = None;
        self.local_media = None;
        self.remote_media.clear();
        self.peer_session = None;
        self.negotiation = None;
        self.started_at = None;
        self.connected_at = None;
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: CallStatus,
    pub attempted: &'static str,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

#[cfg(test)]
mod tests {
    use super::*;

    fn outgoing() -> CallSession {
        let mut session = CallSession::default();
        session
            .apply_transition(CallTransition::Initiate {
                remote: "u2".into(),
                media_kind: MediaKind::Video,
            })
            .unwrap();
        session
    }

    fn incoming() -> CallSession {
        let mut session = CallSession::default();
        session
            .apply_transition(CallTransition::RequestReceived {
                remote: "u1".into(),
                media_kind: MediaKind::Audio,
            })
            .unwrap();
        session
    }

    /// Flow: Idle → Requesting → Connecting → Active → Ended → Idle
    #[test]
    fn test_outgoing_call_flow() {
        let mut session = outgoing();
        assert_eq!(session.status, CallStatus::Requesting);
        assert!(session.is_caller());
        assert_eq!(session.epoch, 1);

        session.apply_transition(CallTransition::RemoteAccepted).unwrap();
        assert_eq!(session.status, CallStatus::Connecting);

        session.apply_transition(CallTransition::RemoteTrack).unwrap();
        assert_eq!(session.status, CallStatus::Active);
        assert!(session.connected_at.is_some());

        session
            .apply_transition(CallTransition::Terminated {
                cause: EndCause::LocalHangup,
            })
            .unwrap();
        assert_eq!(session.status, CallStatus::Ended);
        assert!(session.remote_participant_id.is_none());

        session.apply_transition(CallTransition::Reset).unwrap();
        assert_eq!(session.status, CallStatus::Idle);
        assert_eq!(session.end_cause, Some(EndCause::LocalHangup));
    }

    #[test]
    fn test_incoming_call_flow() {
        let mut session = incoming();
        assert_eq!(session.status, CallStatus::Ringing);
        assert!(!session.is_caller());
        assert!(!session.camera_on);

        session.apply_transition(CallTransition::LocalAccepted).unwrap();
        assert_eq!(session.status, CallStatus::Connecting);
    }

    #[test]
    fn test_rejected_keeps_remote_until_reset() {
        let mut session = incoming();
        session
            .apply_transition(CallTransition::LocalRejected {
                cause: EndCause::Declined,
            })
            .unwrap();
        assert_eq!(session.status, CallStatus::Rejected);
        assert!(session.invariants_hold());

        session.apply_transition(CallTransition::Reset).unwrap();
        assert!(session.remote_participant_id.is_none());
        assert!(session.invariants_hold());
    }

    #[test]
    fn test_cancel_goes_straight_to_idle() {
        let mut session = outgoing();
        session
            .apply_transition(CallTransition::Cancelled {
                cause: EndCause::Cancelled,
            })
            .unwrap();
        assert_eq!(session.status, CallStatus::Idle);
        assert_eq!(session.end_cause, Some(EndCause::Cancelled));
        assert!(session.invariants_hold());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut session = CallSession::default();
        assert!(session.apply_transition(CallTransition::RemoteAccepted).is_err());
        assert!(session.apply_transition(CallTransition::RemoteTrack).is_err());
        assert!(session.apply_transition(CallTransition::Reset).is_err());

        let mut ringing = incoming();
        let err = ringing
            .apply_transition(CallTransition::Initiate {
                remote: "u3".into(),
                media_kind: MediaKind::Audio,
            })
            .unwrap_err();
        assert_eq!(err.current_state, CallStatus::Ringing);
        assert_eq!(err.attempted, "Initiate");
        assert_eq!(ringing.status, CallStatus::Ringing);
        assert!(ringing.is_with(&"u1".into()));
    }

    #[test]
    fn test_terminal_states_only_reset() {
        let mut session = outgoing();
        session.apply_transition(CallTransition::RemoteRejected).unwrap();
        assert_eq!(session.end_cause, Some(EndCause::RemoteDeclined));

        assert!(session.apply_transition(CallTransition::RemoteAccepted).is_err());
        assert!(
            session
                .apply_transition(CallTransition::Terminated {
                    cause: EndCause::RemoteHangup
                })
                .is_err()
        );
        session.apply_transition(CallTransition::Reset).unwrap();
        assert_eq!(session.status, CallStatus::Idle);
    }

    #[test]
    fn test_epoch_advances_per_attempt() {
        let mut session = outgoing();
        session
            .apply_transition(CallTransition::Cancelled {
                cause: EndCause::Cancelled,
            })
            .unwrap();
        session
            .apply_transition(CallTransition::RequestReceived {
                remote: "u9".into(),
                media_kind: MediaKind::Audio,
            })
            .unwrap();
        assert_eq!(session.epoch, 2);
        assert!(session.end_cause.is_none());
    }
}
