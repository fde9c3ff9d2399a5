//! Strongly-typed identifiers and the [`Point`] type alias.

use smallvec::SmallVec;
use std::fmt;

/// Identifies a partition (and the process that owns it).
///
/// Pids are densely numbered from 0 to `processor_count - 1`. The mapping
/// between pids and partitions is bijective for a given topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub u32);

impl Pid {
    /// The pid as a `usize` index into per-partition tables.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Pid {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifies a distributed field registered with a partition server.
///
/// Every process registers its fields in the same order, so `FieldId(n)`
/// names the same logical field on every partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub u32);

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for FieldId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifies a storage exposed to external observers for snapshotting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageId(pub u32);

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for StorageId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// An n-d integer coordinate in global (or storage-local) space.
///
/// Uses `SmallVec<[i32; 4]>` to avoid heap allocation for domains up to
/// 4 dimensions. Higher-dimensional domains spill to the heap
/// transparently. APIs accept `&[i32]` so callers can pass arrays.
pub type Point = SmallVec<[i32; 4]>;
