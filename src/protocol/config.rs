use std::{net::SocketAddr, time::Duration};

use thiserror::Error;

pub const DEFAULT_PORT: u16 = 6666;
pub const DEFAULT_WORKERS: usize = 64;
pub const DEFAULT_BUFFER_SIZE: usize = 10 * 1024;

/// Settings for a [`QueueServer`](super::QueueServer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to listen on.
    pub address: SocketAddr,
    /// Connections served at once. Further connections are answered with
    /// SERVER_ERR and closed.
    pub workers: usize,
    /// Size of each worker's payload copy buffer.
    pub buffer_size: usize,
    /// Idle limit while waiting on a peer; `None` waits forever.
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one worker is required")]
    NoWorkers,
    #[error("payload copy buffer must hold at least one byte")]
    EmptyBuffer,
}

impl ServerConfig {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::EmptyBuffer);
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            workers: DEFAULT_WORKERS,
            buffer_size: DEFAULT_BUFFER_SIZE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
