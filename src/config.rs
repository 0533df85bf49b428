use std::env;
use std::time::Duration;

use crate::types::{ReceiverError, DEFAULT_MAX_PAYLOAD_LEN};

/// Environment variable holding the interface to listen on.
pub const HOST_ENV: &str = "NODE_HOST";
/// Environment variable holding the TCP port to listen on.
pub const PORT_ENV: &str = "NODE_PORT";

/// Configuration for the receiver's listening socket.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Interface address or host name to bind.
    pub host: String,
    /// TCP port to bind; 0 picks an ephemeral port on every (re)bind.
    pub port: u16,
    /// Listen backlog.
    pub backlog: u32,
    /// Pause between a failed listener and the next attempt.
    pub retry_delay: Duration,
    /// Size of each socket read handed to the decoder.
    pub read_buffer_size: usize,
    /// Largest payload length a frame header may declare.
    pub max_payload_len: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4458,
            backlog: 5,
            retry_delay: Duration::from_secs(1),
            read_buffer_size: 4096,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}

impl ReceiverConfig {
    /// Defaults overridden by `NODE_HOST` and `NODE_PORT` when set.
    pub fn from_env() -> Result<Self, ReceiverError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ReceiverError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(host) = lookup(HOST_ENV).filter(|h| !h.trim().is_empty()) {
            config.host = host.trim().to_string();
        }
        if let Some(port) = lookup(PORT_ENV) {
            config.port = port.trim().parse().map_err(|e| {
                ReceiverError::Config(format!("{} must be a TCP port, got {:?}: {}", PORT_ENV, port, e))
            })?;
        }
        Ok(config)
    }

    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}
