//! Server and client configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tessera_halo::ConfigError;

/// Smallest usable frame limit: room for any fixed-size request.
const MIN_FRAME_LEN: usize = 64;

// ── ServerConfig ───────────────────────────────────────────────────

/// Configuration for a [`PartitionServer`](crate::PartitionServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to listen on. Port 0 picks a free port. Default:
    /// `127.0.0.1:0`.
    pub bind_addr: SocketAddr,
    /// Largest accepted request body in bytes. Default: 64 MiB.
    pub max_frame_len: usize,
    /// Write timeout for responses. Default: 30000.
    pub io_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            max_frame_len: 64 << 20,
            io_timeout_ms: 30_000,
        }
    }
}

impl ServerConfig {
    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame_len < MIN_FRAME_LEN {
            return Err(ConfigError::InvalidLimit {
                name: "max_frame_len",
                value: self.max_frame_len,
            });
        }
        if self.io_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout {
                name: "io_timeout_ms",
            });
        }
        Ok(())
    }

    /// [`io_timeout_ms`](Self::io_timeout_ms) as a `Duration`.
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

// ── ClientConfig ───────────────────────────────────────────────────

/// Configuration for a [`TcpPeer`](crate::TcpPeer).
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Connection establishment timeout. Default: 5000.
    pub connect_timeout_ms: u64,
    /// Read and write timeout per call. A `lock()` call blocks until the
    /// peer reaches a quiescent point, so this bounds that wait too.
    /// Default: 30000.
    pub io_timeout_ms: u64,
    /// Largest accepted response body in bytes. Default: 64 MiB.
    pub max_frame_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            io_timeout_ms: 30_000,
            max_frame_len: 64 << 20,
        }
    }
}

impl ClientConfig {
    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("io_timeout_ms", self.io_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidTimeout { name });
            }
        }
        if self.max_frame_len < MIN_FRAME_LEN {
            return Err(ConfigError::InvalidLimit {
                name: "max_frame_len",
                value: self.max_frame_len,
            });
        }
        Ok(())
    }

    /// [`connect_timeout_ms`](Self::connect_timeout_ms) as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// [`io_timeout_ms`](Self::io_timeout_ms) as a `Duration`.
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}
