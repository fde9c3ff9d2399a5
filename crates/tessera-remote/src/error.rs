//! Error types for framing and serving.

use std::fmt;
use std::io;

use tessera_core::{GridError, Pid};
use tessera_halo::ConfigError;

/// Errors raised while reading or writing protocol frames.
#[derive(Debug)]
pub enum CodecError {
    /// The underlying stream failed.
    Io(io::Error),
    /// A frame header announced more bytes than the configured limit.
    FrameTooLarge {
        /// Announced body length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
    /// A frame body ended before the named field was complete.
    Truncated {
        /// The field being read.
        what: &'static str,
        /// Bytes the field needs.
        needed: usize,
        /// Bytes left in the body.
        remaining: usize,
    },
    /// A frame body could not be decoded (corrupt data).
    Malformed {
        /// Human-readable description of what went wrong.
        detail: String,
    },
    /// A request opcode is not recognized.
    UnknownOpcode {
        /// The unrecognized opcode.
        tag: u8,
    },
}

impl CodecError {
    /// Shorthand for [`CodecError::Malformed`].
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::Malformed {
            detail: detail.into(),
        }
    }

    /// Report this failure as a communication fault with `pid`.
    pub fn into_grid(self, pid: Pid) -> GridError {
        GridError::communication(pid, self.to_string())
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::FrameTooLarge { len, max } => {
                write!(f, "frame of {len} bytes exceeds limit of {max}")
            }
            Self::Truncated {
                what,
                needed,
                remaining,
            } => write!(
                f,
                "truncated {what}: needs {needed} bytes, {remaining} left in frame"
            ),
            Self::Malformed { detail } => write!(f, "malformed frame: {detail}"),
            Self::UnknownOpcode { tag } => write!(f, "unknown opcode {tag}"),
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Errors raised while starting a [`PartitionServer`](crate::PartitionServer).
#[derive(Debug)]
pub enum ServerError {
    /// The configuration is invalid.
    Config(ConfigError),
    /// Binding the listener or spawning a thread failed.
    Io(io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "invalid server config: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Io(e) => Some(e),
        }
    }
}

impl From<ConfigError> for ServerError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
