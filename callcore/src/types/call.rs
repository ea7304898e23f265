use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a participant as assigned by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ParticipantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Audio,
    Video,
}

impl MediaKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    pub fn has_video(&self) -> bool {
        matches!(self, Self::Video)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            other => Err(format!("unknown media kind: {other}")),
        }
    }
}

/// Status of the local participant's call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum CallStatus {
    #[default]
    Idle,
    /// Outgoing: call-request sent, waiting for the callee.
    Requesting,
    /// Incoming: call-request received, waiting for the local user.
    Ringing,
    /// Accepted, peer session negotiating.
    Connecting,
    /// Remote media is flowing.
    Active,
    Ended,
    Rejected,
    Failed,
}

impl CallStatus {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Rejected | Self::Failed)
    }

    /// Statuses in which a peer session exists and negotiation messages apply.
    pub fn has_peer_session(&self) -> bool {
        matches!(self, Self::Connecting | Self::Active)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Requesting => "requesting",
            Self::Ringing => "ringing",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Ended => "ended",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Which side started the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallRole {
    Caller,
    Callee,
}

/// Why a session left the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EndCause {
    /// Local user hung up.
    LocalHangup,
    /// Remote party sent call-end.
    RemoteHangup,
    /// Local user withdrew an outgoing request.
    Cancelled,
    /// Local user declined an incoming request.
    Declined,
    /// Remote party declined our request.
    RemoteDeclined,
    MediaDenied,
    Negotiation,
    ChannelLost,
    /// Ring timeout elapsed.
    Timeout,
}

impl fmt::Display for EndCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LocalHangup => "local hangup",
            Self::RemoteHangup => "remote hangup",
            Self::Cancelled => "cancelled",
            Self::Declined => "declined",
            Self::RemoteDeclined => "declined by remote",
            Self::MediaDenied => "media denied",
            Self::Negotiation => "negotiation failed",
            Self::ChannelLost => "signaling channel lost",
            Self::Timeout => "ring timeout",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(CallStatus::Ended.is_terminal());
        assert!(CallStatus::Rejected.is_terminal());
        assert!(CallStatus::Failed.is_terminal());
        assert!(!CallStatus::Active.is_terminal());
        assert!(!CallStatus::Idle.is_terminal());
    }

    #[test]
    fn test_peer_session_window() {
        assert!(CallStatus::Connecting.has_peer_session());
        assert!(CallStatus::Active.has_peer_session());
        assert!(!CallStatus::Ringing.has_peer_session());
        assert!(!CallStatus::Requesting.has_peer_session());
    }

    #[test]
    fn test_media_kind_parse() {
        assert_eq!("video".parse::<MediaKind>().unwrap(), MediaKind::Video);
        assert_eq!("audio".parse::<MediaKind>().unwrap(), MediaKind::Audio);
        assert!("screen".parse::<MediaKind>().is_err());
    }

    #[test]
    fn test_participant_id_serializes_as_string() {
        let id = ParticipantId::new("u1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"u1\"");
    }
}
