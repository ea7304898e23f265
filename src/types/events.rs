use crate::calls::CallSession;
use callcore::ParticipantId;
use log::trace;
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
pub const CHANNEL_CAPACITY: usize = 100;

/// Everything the UI layer can observe about the call core.
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Published synchronously with every status change, terminal statuses
    /// included, followed by the reset to Idle.
    StatusChanged(Box<CallSession>),
    /// The relay assigned this client's identity.
    IdentityAssigned(ParticipantId),
    /// An outbound message could not be emitted.
    SignalingError(String),
}

/// Broadcast fan-out of [`CallEvent`]s to any number of subscribers.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<CallEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity.max(1)).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.sender.subscribe()
    }

    pub fn dispatch(&self, event: CallEvent) {
        // Fails only when nobody is subscribed.
        if self.sender.send(event).is_err() {
            trace!(target: "EventBus", "No subscribers for call event");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_reaches_every_subscriber() {
        let bus = EventBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.dispatch(CallEvent::IdentityAssigned("u1".into()));

        for rx in [&mut first, &mut second] {
            match rx.try_recv().unwrap() {
                CallEvent::IdentityAssigned(id) => assert_eq!(id.as_str(), "u1"),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn test_dispatch_without_subscribers_is_harmless() {
        let bus = EventBus::new(4);
        bus.dispatch(CallEvent::SignalingError("nobody listening".into()));
    }
}
