//! Relay wire format.
//!
//! Every message is a JSON object `{ "type", "from", "to", "payload" }`.
//! Parsing goes through a loose envelope first so each rejection carries a
//! precise reason, then the payload is decoded into a closed tagged union.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use thiserror::Error;

use crate::types::call::{MediaKind, ParticipantId};

/// Message types exchanged between two participants through the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalingType {
    CallRequest,
    CallAccept,
    CallReject,
    CallEnd,
    SdpOffer,
    SdpAnswer,
    IceCandidate,
}

impl SignalingType {
    pub const ALL: [SignalingType; 7] = [
        Self::CallRequest,
        Self::CallAccept,
        Self::CallReject,
        Self::CallEnd,
        Self::SdpOffer,
        Self::SdpAnswer,
        Self::IceCandidate,
    ];

    /// The `type` tag used on the wire.
    pub const fn tag_name(&self) -> &'static str {
        match self {
            Self::CallRequest => "call-request",
            Self::CallAccept => "call-accept",
            Self::CallReject => "call-reject",
            Self::CallEnd => "call-end",
            Self::SdpOffer => "sdp-offer",
            Self::SdpAnswer => "sdp-answer",
            Self::IceCandidate => "ice-candidate",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag_name() == tag)
    }
}

impl fmt::Display for SignalingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag_name())
    }
}

/// Opaque session description, handed to the peer session untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionDescription(Value);

impl SessionDescription {
    pub fn new(blob: Value) -> Self {
        Self(blob)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// Opaque ICE candidate, handed to the peer session untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IceCandidate(Value);

impl IceCandidate {
    pub fn new(blob: Value) -> Self {
        Self(blob)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalingPayload {
    CallRequest { media_kind: MediaKind },
    CallAccept,
    CallReject,
    CallEnd,
    SdpOffer(SessionDescription),
    SdpAnswer(SessionDescription),
    IceCandidate(IceCandidate),
}

impl SignalingPayload {
    pub fn signaling_type(&self) -> SignalingType {
        match self {
            Self::CallRequest { .. } => SignalingType::CallRequest,
            Self::CallAccept => SignalingType::CallAccept,
            Self::CallReject => SignalingType::CallReject,
            Self::CallEnd => SignalingType::CallEnd,
            Self::SdpOffer(_) => SignalingType::SdpOffer,
            Self::SdpAnswer(_) => SignalingType::SdpAnswer,
            Self::IceCandidate(_) => SignalingType::IceCandidate,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::CallRequest { media_kind } => json!({ "mediaKind": media_kind }),
            Self::CallAccept | Self::CallReject | Self::CallEnd => json!({}),
            Self::SdpOffer(sdp) | Self::SdpAnswer(sdp) => sdp.as_value().clone(),
            Self::IceCandidate(candidate) => candidate.as_value().clone(),
        }
    }

    fn decode(kind: SignalingType, payload: Value) -> Result<Self, MalformedMessage> {
        match kind {
            SignalingType::CallRequest => {
                let body: CallRequestBody =
                    serde_json::from_value(payload).map_err(|e| MalformedMessage::InvalidPayload {
                        kind: kind.tag_name(),
                        reason: e.to_string(),
                    })?;
                Ok(Self::CallRequest {
                    media_kind: body.media_kind,
                })
            }
            SignalingType::CallAccept | SignalingType::CallReject | SignalingType::CallEnd => {
                if !(payload.is_null() || payload.is_object()) {
                    return Err(MalformedMessage::InvalidPayload {
                        kind: kind.tag_name(),
                        reason: "expected an object".to_string(),
                    });
                }
                Ok(match kind {
                    SignalingType::CallAccept => Self::CallAccept,
                    SignalingType::CallReject => Self::CallReject,
                    _ => Self::CallEnd,
                })
            }
            SignalingType::SdpOffer | SignalingType::SdpAnswer | SignalingType::IceCandidate => {
                if payload.is_null() {
                    return Err(MalformedMessage::MissingField("payload"));
                }
                Ok(match kind {
                    SignalingType::SdpOffer => Self::SdpOffer(SessionDescription(payload)),
                    SignalingType::SdpAnswer => Self::SdpAnswer(SessionDescription(payload)),
                    _ => Self::IceCandidate(IceCandidate(payload)),
                })
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallRequestBody {
    media_kind: MediaKind,
}

#[derive(Debug, Deserialize)]
struct IdentityBody {
    id: String,
}

/// Loosely typed envelope used as the first parsing stage.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    payload: Value,
}

#[derive(Serialize)]
struct WireEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    from: &'a ParticipantId,
    to: &'a ParticipantId,
    payload: Value,
}

/// A message between two participants.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalingMessage {
    pub from: ParticipantId,
    pub to: ParticipantId,
    pub payload: SignalingPayload,
}

impl SignalingMessage {
    pub fn new(from: ParticipantId, to: ParticipantId, payload: SignalingPayload) -> Self {
        Self { from, to, payload }
    }

    pub fn signaling_type(&self) -> SignalingType {
        self.payload.signaling_type()
    }

    /// Serialize into the JSON envelope.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&WireEnvelope {
            kind: self.signaling_type().tag_name(),
            from: &self.from,
            to: &self.to,
            payload: self.payload.to_value(),
        })
    }

    fn from_envelope(kind: SignalingType, raw: RawEnvelope) -> Result<Self, MalformedMessage> {
        let from = non_empty(raw.from, "from")?;
        let to = non_empty(raw.to, "to")?;
        let payload = SignalingPayload::decode(kind, raw.payload)?;
        Ok(Self { from, to, payload })
    }
}

fn non_empty(value: Option<String>, field: &'static str) -> Result<ParticipantId, MalformedMessage> {
    match value {
        Some(v) if !v.is_empty() => Ok(ParticipantId::from(v)),
        _ => Err(MalformedMessage::MissingField(field)),
    }
}

/// Anything the relay can deliver to this client.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// `{"type":"id","payload":{"id":...}}`: the relay assigned our identity.
    IdentityAssigned(ParticipantId),
    Signal(SignalingMessage),
}

impl RelayMessage {
    pub const IDENTITY_TAG: &'static str = "id";

    pub fn parse(data: &[u8]) -> Result<Self, MalformedMessage> {
        let raw: RawEnvelope = serde_json::from_slice(data)?;

        if raw.kind == Self::IDENTITY_TAG {
            let body: IdentityBody =
                serde_json::from_value(raw.payload).map_err(|e| MalformedMessage::InvalidPayload {
                    kind: Self::IDENTITY_TAG,
                    reason: e.to_string(),
                })?;
            if body.id.is_empty() {
                return Err(MalformedMessage::MissingField("id"));
            }
            return Ok(Self::IdentityAssigned(ParticipantId::from(body.id)));
        }

        let kind = SignalingType::from_tag(&raw.kind)
            .ok_or_else(|| MalformedMessage::UnknownType(raw.kind.clone()))?;
        SignalingMessage::from_envelope(kind, raw).map(Self::Signal)
    }
}

#[derive(Debug, Error)]
pub enum MalformedMessage {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_signal(json: &str) -> SignalingMessage {
        match RelayMessage::parse(json.as_bytes()).unwrap() {
            RelayMessage::Signal(msg) => msg,
            other => panic!("expected signal, got {:?}", other),
        }
    }

    #[test]
    fn test_tag_names_round_trip() {
        for kind in SignalingType::ALL {
            assert_eq!(SignalingType::from_tag(kind.tag_name()), Some(kind));
        }
        assert_eq!(SignalingType::from_tag("offer"), None);
    }

    #[test]
    fn test_parse_call_request() {
        let msg = parse_signal(
            r#"{"type":"call-request","from":"u1","to":"u2","payload":{"mediaKind":"audio"}}"#,
        );
        assert_eq!(msg.from.as_str(), "u1");
        assert_eq!(msg.to.as_str(), "u2");
        assert_eq!(
            msg.payload,
            SignalingPayload::CallRequest {
                media_kind: MediaKind::Audio
            }
        );
    }

    #[test]
    fn test_call_accept_without_payload() {
        let msg = parse_signal(r#"{"type":"call-accept","from":"u2","to":"u1"}"#);
        assert_eq!(msg.payload, SignalingPayload::CallAccept);
    }

    #[test]
    fn test_sdp_blob_is_passed_through() {
        let msg = parse_signal(
            r#"{"type":"sdp-offer","from":"u1","to":"u2","payload":{"type":"offer","sdp":"v=0\r\n"}}"#,
        );
        let SignalingPayload::SdpOffer(sdp) = msg.payload else {
            panic!("expected offer");
        };
        assert_eq!(sdp.as_value()["sdp"], "v=0\r\n");
        assert_eq!(sdp.as_value()["type"], "offer");
    }

    #[test]
    fn test_encode_call_request_envelope() {
        let msg = SignalingMessage::new(
            "u1".into(),
            "u2".into(),
            SignalingPayload::CallRequest {
                media_kind: MediaKind::Video,
            },
        );
        let value: Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type":"call-request","from":"u1","to":"u2","payload":{"mediaKind":"video"}})
        );
    }

    #[test]
    fn test_encode_control_has_empty_payload() {
        let msg = SignalingMessage::new("u2".into(), "u1".into(), SignalingPayload::CallReject);
        let value: Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "call-reject");
        assert_eq!(value["payload"], json!({}));
    }

    #[test]
    fn test_identity_assignment() {
        let msg = RelayMessage::parse(br#"{"type":"id","payload":{"id":"signal-1"}}"#).unwrap();
        assert_eq!(msg, RelayMessage::IdentityAssigned("signal-1".into()));
    }

    #[test]
    fn test_malformed_inputs() {
        assert!(matches!(
            RelayMessage::parse(b"not json"),
            Err(MalformedMessage::Json(_))
        ));
        assert!(matches!(
            RelayMessage::parse(br#"{"type":"offer","from":"a","to":"b","payload":{}}"#),
            Err(MalformedMessage::UnknownType(t)) if t == "offer"
        ));
        assert!(matches!(
            RelayMessage::parse(br#"{"type":"call-end","to":"b"}"#),
            Err(MalformedMessage::MissingField("from"))
        ));
        assert!(matches!(
            RelayMessage::parse(
                br#"{"type":"call-request","from":"a","to":"b","payload":{"mediaKind":"fax"}}"#
            ),
            Err(MalformedMessage::InvalidPayload { .. })
        ));
        assert!(matches!(
            RelayMessage::parse(br#"{"type":"ice-candidate","from":"a","to":"b"}"#),
            Err(MalformedMessage::MissingField("payload"))
        ));
        assert!(matches!(
            RelayMessage::parse(br#"{"type":"id","payload":{"id":""}}"#),
            Err(MalformedMessage::MissingField("id"))
        ));
    }
}
