//! Offer/answer bookkeeping for one peer session.

use callcore::IceCandidate;

use super::candidates::CandidateBuffer;
use super::media::PeerSessionHandle;

/// What to do with a remote candidate right now.
#[derive(Debug, PartialEq)]
pub enum CandidateRoute {
    Apply(IceCandidate),
    Buffered,
    /// Buffer full; the candidate was discarded.
    Overflow,
}

#[derive(Debug, Clone)]
pub struct Negotiation {
    session: PeerSessionHandle,
    offer_outstanding: bool,
    remote_description_set: bool,
    candidates: CandidateBuffer,
}

impl Negotiation {
    pub fn new(session: PeerSessionHandle, candidate_limit: usize) -> Self {
        Self {
            session,
            offer_outstanding: false,
            remote_description_set: false,
            candidates: CandidateBuffer::new(candidate_limit),
        }
    }

    pub fn session(&self) -> PeerSessionHandle {
        self.session
    }

    pub fn mark_offer_sent(&mut self) {
        self.offer_outstanding = true;
    }

    pub fn offer_outstanding(&self) -> bool {
        self.offer_outstanding
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    /// An answer is only meaningful while our offer is unanswered.
    pub fn accepts_answer(&self) -> bool {
        self.offer_outstanding && !self.remote_description_set
    }

    /// An offer is only meaningful before any remote description and when we
    /// have not offered ourselves.
    pub fn accepts_offer(&self) -> bool {
        !self.offer_outstanding && !self.remote_description_set
    }

    /// Record that the remote description was applied and hand back the
    /// candidates that were waiting for it.
    pub fn remote_description_applied(&mut self) -> Vec<IceCandidate> {
        self.remote_description_set = true;
        self.offer_outstanding = false;
        self.candidates.drain()
    }

    pub fn route_candidate(&mut self, candidate: IceCandidate) -> CandidateRoute {
        if self.remote_description_set {
            CandidateRoute::Apply(candidate)
        } else if self.candidates.push(candidate) {
            CandidateRoute::Buffered
        } else {
            CandidateRoute::Overflow
        }
    }

    pub fn buffered(&self) -> usize {
        self.candidates.len()
    }

    /// Remote candidates discarded because the buffer was full.
    pub fn overflowed(&self) -> usize {
        self.candidates.overflowed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate::new(json!({ "candidate": format!("candidate:{n}") }))
    }

    #[test]
    fn test_candidates_wait_for_remote_description() {
        let mut negotiation = Negotiation::new(PeerSessionHandle::new(1), 16);
        assert_eq!(negotiation.route_candidate(candidate(1)), CandidateRoute::Buffered);
        assert_eq!(negotiation.route_candidate(candidate(2)), CandidateRoute::Buffered);
        assert_eq!(negotiation.buffered(), 2);

        let flushed = negotiation.remote_description_applied();
        assert_eq!(flushed, vec![candidate(1), candidate(2)]);
        assert_eq!(
            negotiation.route_candidate(candidate(3)),
            CandidateRoute::Apply(candidate(3))
        );
    }

    #[test]
    fn test_answer_requires_outstanding_offer() {
        let mut negotiation = Negotiation::new(PeerSessionHandle::new(7), 4);
        assert!(!negotiation.accepts_answer());
        assert!(negotiation.accepts_offer());

        negotiation.mark_offer_sent();
        assert!(negotiation.accepts_answer());
        assert!(!negotiation.accepts_offer());

        negotiation.remote_description_applied();
        assert!(!negotiation.accepts_answer());
        assert!(!negotiation.offer_outstanding());
        assert!(negotiation.remote_description_set());
    }

    #[test]
    fn test_full_buffer_overflows() {
        let mut negotiation = Negotiation::new(PeerSessionHandle::new(2), 1);
        assert_eq!(negotiation.route_candidate(candidate(1)), CandidateRoute::Buffered);
        assert_eq!(negotiation.route_candidate(candidate(2)), CandidateRoute::Overflow);
        assert_eq!(negotiation.route_candidate(candidate(3)), CandidateRoute::Overflow);
        assert_eq!(negotiation.buffered(), 1);
        assert_eq!(negotiation.overflowed(), 2);
    }
}
