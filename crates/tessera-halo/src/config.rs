//! Halo engine configuration and construction errors.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use tessera_core::GridError;

// ── HaloConfig ─────────────────────────────────────────────────────

/// Configuration for a [`HaloEngine`](crate::HaloEngine) and the halo
/// exchange transport it drives.
#[derive(Clone, Debug)]
pub struct HaloConfig {
    /// How long one neighbor receive may block during
    /// `synchronize_halo()` before the exchange is declared failed.
    /// Default: 5000.
    pub exchange_timeout_ms: u64,
    /// Whether reads of halo cells fail after an incomplete exchange.
    /// Disabling this lets a driver inspect the last good halo while it
    /// decides to retry or abort. Default: true.
    pub reject_corrupt_halo_reads: bool,
}

impl Default for HaloConfig {
    fn default() -> Self {
        Self {
            exchange_timeout_ms: 5000,
            reject_corrupt_halo_reads: true,
        }
    }
}

impl HaloConfig {
    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exchange_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout {
                name: "exchange_timeout_ms",
            });
        }
        Ok(())
    }

    /// [`exchange_timeout_ms`](Self::exchange_timeout_ms) as a `Duration`.
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }
}

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected while validating configuration or building an engine.
#[derive(Debug, PartialEq)]
pub enum ConfigError {
    /// A timeout is zero.
    InvalidTimeout {
        /// Name of the offending setting.
        name: &'static str,
    },
    /// A size limit is zero or too small to be usable.
    InvalidLimit {
        /// Name of the offending setting.
        name: &'static str,
        /// The configured value.
        value: usize,
    },
    /// The engine's pid is not part of the topology.
    UnknownPid {
        /// The pid that was requested.
        pid: u32,
        /// Number of partitions in the topology.
        processor_count: usize,
    },
    /// The topology's geometry is unusable for this engine.
    Geometry(GridError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTimeout { name } => write!(f, "{name} must be positive"),
            Self::InvalidLimit { name, value } => {
                write!(f, "{name} = {value} is not a usable limit")
            }
            Self::UnknownPid {
                pid,
                processor_count,
            } => write!(
                f,
                "pid {pid} is not in a topology of {processor_count} partitions"
            ),
            Self::Geometry(e) => write!(f, "geometry: {e}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Geometry(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GridError> for ConfigError {
    fn from(e: GridError) -> Self {
        Self::Geometry(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(HaloConfig::default().validate().is_ok());
        assert_eq!(
            HaloConfig::default().exchange_timeout(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let cfg = HaloConfig {
            exchange_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::InvalidTimeout {
                name: "exchange_timeout_ms"
            })
        );
    }

    #[test]
    fn geometry_error_is_source() {
        let err = ConfigError::from(GridError::InvalidRegion {
            reason: "empty".into(),
        });
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "geometry: invalid region: empty");
    }
}
