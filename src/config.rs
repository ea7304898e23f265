use crate::calls::{CallManagerConfig, DEFAULT_CANDIDATE_BUFFER_LIMIT, PeerConfig};
use crate::types::events::CHANNEL_CAPACITY;
use std::time::Duration;

pub const DEFAULT_RELAY_URL: &str = "ws://localhost:8081/ws";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub relay_url: String,
    pub ice_servers: Vec<String>,
    /// Unanswered calls are withdrawn after this long. `None` disables it.
    pub ring_timeout: Option<Duration>,
    pub candidate_buffer_limit: usize,
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            ring_timeout: None,
            candidate_buffer_limit: DEFAULT_CANDIDATE_BUFFER_LIMIT,
            event_capacity: CHANNEL_CAPACITY,
        }
    }
}

impl ClientConfig {
    pub fn with_relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = url.into();
        self
    }

    /// Replace the ICE server list. An empty list keeps the defaults.
    pub fn with_ice_servers(mut self, servers: Vec<String>) -> Self {
        if !servers.is_empty() {
            self.ice_servers = servers;
        }
        self
    }

    pub fn with_ring_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ring_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn with_candidate_buffer_limit(mut self, limit: usize) -> Self {
        self.candidate_buffer_limit = limit;
        self
    }

    pub fn peer_config(&self) -> PeerConfig {
        PeerConfig {
            ice_servers: self.ice_servers.clone(),
        }
    }

    pub fn manager_config(&self) -> CallManagerConfig {
        CallManagerConfig {
            ring_timeout: self.ring_timeout,
            candidate_buffer_limit: self.candidate_buffer_limit,
            peer: self.peer_config(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.relay_url, DEFAULT_RELAY_URL);
        assert_eq!(config.ice_servers, vec![DEFAULT_STUN_SERVER.to_string()]);
        assert!(config.ring_timeout.is_none());
        assert_eq!(config.candidate_buffer_limit, 64);
    }

    #[test]
    fn test_builder_overrides_flow_into_manager_config() {
        let config = ClientConfig::default()
            .with_relay_url("ws://relay.test/ws")
            .with_ice_servers(vec!["stun:stun.test:3478".into()])
            .with_ring_timeout(Some(Duration::from_secs(30)))
            .with_candidate_buffer_limit(8);

        let manager = config.manager_config();
        assert_eq!(manager.ring_timeout, Some(Duration::from_secs(30)));
        assert_eq!(manager.candidate_buffer_limit, 8);
        assert_eq!(manager.peer.ice_servers, vec!["stun:stun.test:3478".to_string()]);
        assert_eq!(config.relay_url, "ws://relay.test/ws");
    }

    #[test]
    fn test_zero_timeout_and_empty_servers_keep_defaults() {
        let config = ClientConfig::default()
            .with_ring_timeout(Some(Duration::ZERO))
            .with_ice_servers(Vec::new());
        assert!(config.ring_timeout.is_none());
        assert_eq!(config.ice_servers.len(), 1);
    }
}
