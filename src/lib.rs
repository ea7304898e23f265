// Re-export the runtime-agnostic core
pub use callcore::{net, signaling};

pub mod types {
    pub use callcore::types::*;
    pub mod events;
}

pub mod calls;
pub mod client;
pub mod config;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use client::{Client, ClientError};
pub use config::ClientConfig;
