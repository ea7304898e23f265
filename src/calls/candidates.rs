//! Holding area for remote ICE candidates that arrive before the remote
//! description. Gathering on the far side routinely outruns signaling, so
//! these are kept in arrival order and replayed once the description lands.

use callcore::IceCandidate;
use std::collections::VecDeque;

pub const DEFAULT_CANDIDATE_BUFFER_LIMIT: usize = 64;

#[derive(Debug, Clone)]
pub struct CandidateBuffer {
    limit: usize,
    pending: VecDeque<IceCandidate>,
    overflowed: usize,
}

impl CandidateBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            pending: VecDeque::new(),
            overflowed: 0,
        }
    }

    /// Queue a candidate. Returns `false` once the buffer is full; the
    /// candidate is then discarded and counted.
    pub fn push(&mut self, candidate: IceCandidate) -> bool {
        if self.pending.len() >= self.limit {
            self.overflowed += 1;
            return false;
        }
        self.pending.push_back(candidate);
        true
    }

    /// Take everything queued so far, oldest first.
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.pending.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.overflowed = 0;
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn overflowed(&self) -> usize {
        self.overflowed
    }
}

impl Default for CandidateBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CANDIDATE_BUFFER_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate::new(json!({ "candidate": format!("candidate:{n}"), "sdpMLineIndex": 0 }))
    }

    #[test]
    fn test_drain_preserves_arrival_order() {
        let mut buffer = CandidateBuffer::new(8);
        for n in 0..5 {
            assert!(buffer.push(candidate(n)));
        }
        let drained = buffer.drain();
        assert_eq!(drained.len(), 5);
        assert_eq!(drained[0], candidate(0));
        assert_eq!(drained[4], candidate(4));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_overflow_is_bounded_and_counted() {
        let mut buffer = CandidateBuffer::new(2);
        assert!(buffer.push(candidate(1)));
        assert!(buffer.push(candidate(2)));
        assert!(!buffer.push(candidate(3)));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.overflowed(), 1);

        buffer.clear();
        assert_eq!(buffer.overflowed(), 0);
        assert!(buffer.is_empty());
    }
}
