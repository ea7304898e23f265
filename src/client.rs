//! Connection driver: owns the relay transport and feeds relay frames and
//! peer-session callbacks into the router from a single loop.

use anyhow::Result;
use callcore::ParticipantId;
use callcore::net::{TransportEvent, TransportFactory};
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex, Notify, broadcast, mpsc};

use crate::calls::{
    CallManager, MediaCapture, PeerConnector, PeerEvent, SignalingLink, SignalingRouter,
};
use crate::config::ClientConfig;
use crate::types::events::{CallEvent, EventBus};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is already running")]
    AlreadyRunning,
    #[error("relay connection lost")]
    ConnectionLost,
}

pub struct Client {
    config: ClientConfig,
    events: Arc<EventBus>,
    link: Arc<SignalingLink>,
    manager: Arc<CallManager>,
    router: SignalingRouter,
    transport_factory: Arc<dyn TransportFactory>,
    peer_events: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,

    is_running: AtomicBool,
    expected_disconnect: AtomicBool,
    shutdown_notifier: Notify,
}

impl Client {
    pub fn new(
        config: ClientConfig,
        transport_factory: Arc<dyn TransportFactory>,
        media: Arc<dyn MediaCapture>,
        peers: Arc<dyn PeerConnector>,
    ) -> Arc<Self> {
        let events = Arc::new(EventBus::new(config.event_capacity));
        let link = SignalingLink::new(events.clone());
        let (manager, peer_events) = CallManager::new(
            config.manager_config(),
            media,
            peers,
            link.clone(),
            events.clone(),
        );
        let router = SignalingRouter::new(manager.clone(), link.clone());

        Arc::new(Self {
            config,
            events,
            link,
            manager,
            router,
            transport_factory,
            peer_events: Mutex::new(Some(peer_events)),
            is_running: AtomicBool::new(false),
            expected_disconnect: AtomicBool::new(false),
            shutdown_notifier: Notify::new(),
        })
    }

    /// Local intents (initiate, accept, end...) go through the manager.
    pub fn manager(&self) -> &Arc<CallManager> {
        &self.manager
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    pub async fn local_id(&self) -> Option<ParticipantId> {
        self.link.local_id().await
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Connect to the relay and process events until the connection closes.
    ///
    /// Returns `Ok` after [`Client::disconnect`], and an error if the relay
    /// went away on its own.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyRunning.into());
        }
        self.expected_disconnect.store(false, Ordering::Relaxed);

        let connected = self.transport_factory.create_transport().await;
        let (transport, mut transport_events) = match connected {
            Ok(connection) => connection,
            Err(e) => {
                self.is_running.store(false, Ordering::Relaxed);
                return Err(e.context("failed to connect to the relay"));
            }
        };
        self.link.attach(transport).await;

        let mut peer_events = match self.peer_events.lock().await.take() {
            Some(rx) => rx,
            None => {
                self.is_running.store(false, Ordering::Relaxed);
                return Err(ClientError::AlreadyRunning.into());
            }
        };

        let result = self.event_loop(&mut transport_events, &mut peer_events).await;

        *self.peer_events.lock().await = Some(peer_events);
        self.is_running.store(false, Ordering::Relaxed);
        result
    }

    async fn event_loop(
        &self,
        transport_events: &mut mpsc::Receiver<TransportEvent>,
        peer_events: &mut mpsc::UnboundedReceiver<PeerEvent>,
    ) -> Result<()> {
        info!(target: "Client", "Starting relay event loop for {}", self.config.relay_url);
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_notifier.notified() => {
                    info!(target: "Client", "Shutdown signaled. Exiting event loop.");
                    self.link.detach().await;
                    return Ok(());
                }
                Some(event) = peer_events.recv() => {
                    self.router.handle_peer_event(event).await;
                }
                event = transport_events.recv() => match event {
                    Some(TransportEvent::DataReceived(data)) => {
                        self.router.handle_frame(&data).await;
                    }
                    Some(TransportEvent::Connected) => {
                        debug!(target: "Client", "Transport connected event received");
                    }
                    Some(TransportEvent::Disconnected) | None => {
                        self.link.detach().await;
                        self.manager.channel_lost().await;
                        if self.expected_disconnect.load(Ordering::Relaxed) {
                            info!("Transport disconnected as expected.");
                            return Ok(());
                        }
                        warn!("Transport disconnected unexpectedly.");
                        return Err(ClientError::ConnectionLost.into());
                    }
                },
            }
        }
    }

    /// Hang up any call and close the relay connection.
    pub async fn disconnect(&self) {
        info!("Disconnecting client intentionally.");
        self.expected_disconnect.store(true, Ordering::Relaxed);
        if let Err(e) = self.manager.end().await {
            debug!("Nothing to hang up on disconnect: {}", e);
        }
        if let Some(transport) = self.link.detach().await {
            transport.disconnect().await;
        }
        self.shutdown_notifier.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeMedia, FakePeers, InMemoryRelay, wait_for_identity};
    use callcore::{CallStatus, MediaKind};

    fn client(relay: &Arc<InMemoryRelay>) -> Arc<Client> {
        Client::new(
            ClientConfig::default(),
            relay.factory(),
            Arc::new(FakeMedia::default()),
            Arc::new(FakePeers::default()),
        )
    }

    #[tokio::test]
    async fn test_run_assigns_identity_and_stops_on_disconnect() {
        let relay = InMemoryRelay::new();
        let client = client(&relay);
        let mut events = client.subscribe();

        let runner = tokio::spawn({
            let client = client.clone();
            async move { client.run().await }
        });

        let id = wait_for_identity(&mut events).await;
        assert_eq!(client.local_id().await, Some(id));
        assert!(client.is_running());

        client.disconnect().await;
        runner.await.unwrap().unwrap();
        assert!(!client.is_running());
    }

    #[tokio::test]
    async fn test_relay_loss_ends_call_and_reports_error() {
        let relay = InMemoryRelay::new();
        let client = client(&relay);
        let mut events = client.subscribe();

        let runner = tokio::spawn({
            let client = client.clone();
            async move { client.run().await }
        });
        let id = wait_for_identity(&mut events).await;

        client
            .manager()
            .initiate("nobody".into(), MediaKind::Audio)
            .await
            .unwrap();
        assert_eq!(client.manager().status().await, CallStatus::Requesting);

        relay.drop_client(&id);
        let result = runner.await.unwrap();
        assert!(result.is_err());

        let session = client.manager().snapshot().await;
        assert_eq!(session.status, CallStatus::Idle);
        assert_eq!(session.end_cause, Some(callcore::EndCause::ChannelLost));
    }

    #[tokio::test]
    async fn test_initiate_before_connect_is_refused() {
        let relay = InMemoryRelay::new();
        let client = client(&relay);
        let err = client
            .manager()
            .initiate("u2".into(), MediaKind::Audio)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::calls::CallError::NotConnected));
    }
}
