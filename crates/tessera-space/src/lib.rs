//! Partition topologies for Tessera distributed grids.
//!
//! The halo engine consumes geometry through the
//! [`Topology`](tessera_core::Topology) trait and never mutates it. This
//! crate provides the reference implementation:
//!
//! - [`BlockPartition`]: a regular n-d block decomposition of a
//!   rectangular world into a grid of near-equal partitions. Tag a
//!   rebuilt decomposition with [`BlockPartition::with_revision`] so
//!   engines refreshing their geometry between steps notice the change.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod block;

#[cfg(test)]
pub(crate) mod compliance;

pub use block::BlockPartition;
