use async_trait::async_trait;
use callcore::{IceCandidate, MediaKind, ParticipantId, SessionDescription};
use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use peercall::calls::{
    MediaCapture, MediaError, MediaHandle, NegotiationError, PeerConfig, PeerConnector, PeerEvent,
    PeerEventSender, PeerSessionHandle, TrackKind,
};
use peercall::types::events::CallEvent;
use peercall::{Client, ClientConfig};
use peercall_tokio_transport::TokioWebSocketTransportFactory;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// A signaling-only call client, useful for exercising a relay.
//
// Usage:
//   cargo run                                   # wait for calls
//   cargo run -- --auto-answer                  # accept every incoming call
//   cargo run -- --call peer-2 --video          # place a video call
//   cargo run -- --url ws://relay:8081/ws --ring-timeout 30

#[derive(Parser, Debug)]
#[command(name = "peercall", about = "Two-party call signaling client")]
struct Args {
    /// Relay WebSocket URL
    #[arg(long, default_value = peercall::config::DEFAULT_RELAY_URL)]
    url: String,

    /// Call this participant once the relay has assigned our identity
    #[arg(long, value_name = "ID")]
    call: Option<String>,

    /// Place a video call instead of audio
    #[arg(long)]
    video: bool,

    /// Accept incoming calls automatically
    #[arg(long)]
    auto_answer: bool,

    /// Give up on unanswered calls after this many seconds
    #[arg(long, value_name = "SECS")]
    ring_timeout: Option<u64>,

    /// ICE server URL (repeatable)
    #[arg(long = "stun", value_name = "URL")]
    stun: Vec<String>,
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {}", e);
            return;
        }
    };

    rt.block_on(async {
        let config = ClientConfig::default()
            .with_relay_url(args.url.clone())
            .with_ice_servers(args.stun.clone())
            .with_ring_timeout(args.ring_timeout.map(Duration::from_secs));
        let factory = TokioWebSocketTransportFactory::new(config.relay_url.clone());

        let client = Client::new(
            config,
            Arc::new(factory),
            Arc::new(SignalingOnlyMedia::default()),
            Arc::new(SignalingOnlyPeers::default()),
        );

        let media_kind = if args.video {
            MediaKind::Video
        } else {
            MediaKind::Audio
        };
        let callee = args.call.clone().map(ParticipantId::from);
        tokio::spawn(watch_events(client.clone(), callee, media_kind, args.auto_answer));

        let runner = tokio::spawn({
            let client = client.clone();
            async move { client.run().await }
        });

        tokio::select! {
            result = runner => match result {
                Ok(Ok(())) => info!("Client stopped."),
                Ok(Err(e)) => error!("Client stopped: {:#}", e),
                Err(e) => error!("Client task failed: {}", e),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, hanging up.");
                client.disconnect().await;
            }
        }
    });
}

async fn watch_events(
    client: Arc<Client>,
    callee: Option<ParticipantId>,
    media_kind: MediaKind,
    auto_answer: bool,
) {
    let mut events = client.subscribe();
    let mut callee = callee;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!("Event watcher lagged, skipped {} events", n);
                continue;
            }
            Err(_) => return,
        };
        match event {
            CallEvent::IdentityAssigned(id) => {
                info!("Connected to the relay as {}", id);
                if let Some(remote) = callee.take() {
                    if let Err(e) = client.manager().initiate(remote, media_kind).await {
                        error!("Failed to place call: {}", e);
                    }
                }
            }
            CallEvent::StatusChanged(session) => {
                info!(
                    "Call status: {} (remote: {:?}, cause: {:?})",
                    session.status, session.remote_participant_id, session.end_cause
                );
                if auto_answer && session.status == callcore::CallStatus::Ringing {
                    if let Err(e) = client.manager().accept().await {
                        error!("Failed to accept call: {}", e);
                    }
                }
            }
            CallEvent::SignalingError(e) => warn!("Signaling error: {}", e),
        }
    }
}

/// Hands out placeholder handles; there is no capture device behind them.
#[derive(Default)]
struct SignalingOnlyMedia {
    next_id: AtomicU64,
}

#[async_trait]
impl MediaCapture for SignalingOnlyMedia {
    async fn acquire(&self, kind: MediaKind) -> Result<MediaHandle, MediaError> {
        let handle = MediaHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        info!("Pretending to capture {} as {}", kind, handle);
        Ok(handle)
    }

    async fn release(&self, handle: MediaHandle) {
        info!("Released {}", handle);
    }

    async fn set_track_enabled(&self, handle: MediaHandle, track: TrackKind, enabled: bool) {
        info!("{:?} track of {} enabled={}", track, handle, enabled);
    }
}

/// Peer sessions that exchange placeholder descriptions and report a remote
/// track as soon as the remote description is applied.
#[derive(Default)]
struct SignalingOnlyPeers {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<PeerSessionHandle, PeerEventSender>>,
}

impl SignalingOnlyPeers {
    fn description(kind: &str, session: PeerSessionHandle) -> SessionDescription {
        SessionDescription::new(json!({ "type": kind, "sdp": format!("v=0 {session}") }))
    }

    fn sender(&self, session: PeerSessionHandle) -> Result<PeerEventSender, NegotiationError> {
        self.sessions
            .lock()
            .map_err(|_| NegotiationError::new("session table poisoned"))?
            .get(&session)
            .cloned()
            .ok_or_else(|| NegotiationError::new(format!("unknown {session}")))
    }
}

#[async_trait]
impl PeerConnector for SignalingOnlyPeers {
    async fn create(
        &self,
        config: &PeerConfig,
        events: PeerEventSender,
    ) -> Result<PeerSessionHandle, NegotiationError> {
        let session = PeerSessionHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        info!("Opening {} with ICE servers {:?}", session, config.ice_servers);
        let candidate = IceCandidate::new(json!({
            "candidate": "candidate:0 1 udp 2122260223 127.0.0.1 9 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0,
        }));
        let _ = events.send(PeerEvent::LocalCandidate { session, candidate });
        self.sessions
            .lock()
            .map_err(|_| NegotiationError::new("session table poisoned"))?
            .insert(session, events);
        Ok(session)
    }

    async fn create_offer(
        &self,
        session: PeerSessionHandle,
    ) -> Result<SessionDescription, NegotiationError> {
        Ok(Self::description("offer", session))
    }

    async fn create_answer(
        &self,
        session: PeerSessionHandle,
        _remote: &SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        Ok(Self::description("answer", session))
    }

    async fn set_remote_description(
        &self,
        session: PeerSessionHandle,
        _description: &SessionDescription,
    ) -> Result<(), NegotiationError> {
        let media = MediaHandle::new(1_000 + session.id());
        let _ = self
            .sender(session)?
            .send(PeerEvent::RemoteTrack { session, media });
        Ok(())
    }

    async fn add_remote_candidate(
        &self,
        session: PeerSessionHandle,
        candidate: &IceCandidate,
    ) -> Result<(), NegotiationError> {
        info!("{} got remote candidate {}", session, candidate.as_value());
        Ok(())
    }

    async fn destroy(&self, session: PeerSessionHandle) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&session);
        }
        info!("Closed {}", session);
    }
}
