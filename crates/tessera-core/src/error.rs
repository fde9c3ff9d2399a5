//! Error types for distributed grid operations.
//!
//! Every fallible operation in the workspace returns [`GridError`]. The
//! variants group into four categories (see [`ErrorCategory`]): geometry,
//! serialization, communication and protocol. All of them are fatal to
//! the operation that raised them; nothing here is retried internally.

use std::error::Error;
use std::fmt;

use crate::element::ElementKind;
use crate::id::{FieldId, Pid, Point, StorageId};

/// Broad classification of a [`GridError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A coordinate or region does not fit the declared geometry.
    Geometry,
    /// A buffer disagrees with the region it is applied to.
    Serialization,
    /// A peer could not be reached or the transport failed.
    Communication,
    /// The caller broke the access protocol.
    Protocol,
}

/// Errors from grid storage, halo engine, facade and remote access.
#[derive(Clone, Debug, PartialEq)]
pub enum GridError {
    /// A point lies outside the rectangle it was checked against.
    OutOfBounds {
        /// The offending point.
        point: Point,
        /// Human-readable description of the valid range.
        bounds: String,
    },
    /// No partition owns the point.
    NoOwner {
        /// The unowned point.
        point: Point,
    },
    /// A point or rectangle has the wrong number of dimensions.
    DimensionMismatch {
        /// Dimensionality the operation expected.
        expected: usize,
        /// Dimensionality that was supplied.
        found: usize,
    },
    /// A region descriptor is invalid for the storage it targets.
    InvalidRegion {
        /// What went wrong.
        reason: String,
    },
    /// An unpack buffer holds a different element count than its region.
    ///
    /// Both counts are in bytes, so a buffer that ends part-way through
    /// an element is reported exactly.
    SerializationMismatch {
        /// Bytes the region requires.
        expected: usize,
        /// Bytes the buffer carries.
        actual: usize,
    },
    /// A wire value or snapshot carries the wrong element kind.
    ElementKindMismatch {
        /// Kind the receiver expected.
        expected: ElementKind,
        /// Raw tag found on the wire.
        found: u8,
    },
    /// A peer could not be reached or the transport failed.
    Communication {
        /// The peer involved, if known.
        pid: Option<Pid>,
        /// Description of the failure.
        detail: String,
    },
    /// The most recent halo exchange did not complete; halo cells are not
    /// usable until the next successful synchronization.
    HaloCorrupt {
        /// Neighbors whose buffers were missing or malformed.
        failed: Vec<Pid>,
    },
    /// The caller broke the access protocol (e.g. snapshot without lock).
    ProtocolViolation {
        /// Description of the violation.
        detail: String,
    },
    /// A request named a field that is not registered.
    UnknownField {
        /// The unregistered field.
        field: FieldId,
    },
    /// A request named a storage that is not registered.
    UnknownStorage {
        /// The unregistered storage.
        storage: StorageId,
    },
}

impl GridError {
    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::OutOfBounds { .. }
            | Self::NoOwner { .. }
            | Self::DimensionMismatch { .. }
            | Self::InvalidRegion { .. } => ErrorCategory::Geometry,
            Self::SerializationMismatch { .. } | Self::ElementKindMismatch { .. } => {
                ErrorCategory::Serialization
            }
            Self::Communication { .. } => ErrorCategory::Communication,
            Self::HaloCorrupt { .. }
            | Self::ProtocolViolation { .. }
            | Self::UnknownField { .. }
            | Self::UnknownStorage { .. } => ErrorCategory::Protocol,
        }
    }

    /// Shorthand for a [`GridError::Communication`] with a known peer.
    pub fn communication(pid: Pid, detail: impl Into<String>) -> Self {
        Self::Communication {
            pid: Some(pid),
            detail: detail.into(),
        }
    }

    /// Shorthand for a [`GridError::ProtocolViolation`].
    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds { point, bounds } => {
                write!(f, "point {point:?} out of bounds: {bounds}")
            }
            Self::NoOwner { point } => write!(f, "no partition owns point {point:?}"),
            Self::DimensionMismatch { expected, found } => {
                write!(f, "expected {expected}-d geometry, got {found}-d")
            }
            Self::InvalidRegion { reason } => write!(f, "invalid region: {reason}"),
            Self::SerializationMismatch { expected, actual } => {
                write!(
                    f,
                    "buffer holds {actual} bytes but region requires {expected}"
                )
            }
            Self::ElementKindMismatch { expected, found } => {
                write!(f, "expected {expected} element, found wire tag {found}")
            }
            Self::Communication { pid, detail } => match pid {
                Some(pid) => write!(f, "communication with partition {pid} failed: {detail}"),
                None => write!(f, "communication failed: {detail}"),
            },
            Self::HaloCorrupt { failed } => {
                write!(f, "halo exchange incomplete (failed neighbors: {failed:?})")
            }
            Self::ProtocolViolation { detail } => write!(f, "protocol violation: {detail}"),
            Self::UnknownField { field } => write!(f, "unknown field {field}"),
            Self::UnknownStorage { storage } => write!(f, "unknown storage {storage}"),
        }
    }
}

impl Error for GridError {}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn categories() {
        let geo = GridError::NoOwner {
            point: smallvec![1, 2],
        };
        assert_eq!(geo.category(), ErrorCategory::Geometry);
        let ser = GridError::SerializationMismatch {
            expected: 4,
            actual: 3,
        };
        assert_eq!(ser.category(), ErrorCategory::Serialization);
        assert_eq!(
            GridError::communication(Pid(2), "refused").category(),
            ErrorCategory::Communication
        );
        assert_eq!(
            GridError::protocol("unlock").category(),
            ErrorCategory::Protocol
        );
    }

    #[test]
    fn display_mentions_pid() {
        let err = GridError::communication(Pid(3), "connection reset");
        assert_eq!(
            err.to_string(),
            "communication with partition 3 failed: connection reset"
        );
    }
}
