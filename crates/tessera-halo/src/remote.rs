//! Client-side interfaces for reaching other partitions.
//!
//! The halo engine depends only on these traits. `tessera-remote`
//! provides the TCP transport; tests wire partitions together in-process
//! through [`CellService`](crate::CellService).

use std::sync::Arc;

use tessera_core::{Element, GridError, Pid};

/// Single-cell operations on a peer partition.
///
/// Every call is synchronous: it returns once the peer has applied the
/// operation (or failed). Implementations must not retry on their own;
/// transport failures surface as [`GridError::Communication`].
pub trait RemoteCells<E: Element>: Send + Sync {
    /// Read the cell at a global point owned by the peer.
    fn read_cell(&self, point: &[i32]) -> Result<E, GridError>;

    /// Overwrite the cell at a global point owned by the peer.
    fn write_cell(&self, point: &[i32], value: E) -> Result<(), GridError>;

    /// Reset `from` and write `value` at `to`, both owned by the peer, in
    /// one round trip.
    fn move_cell(&self, from: &[i32], to: &[i32], value: E) -> Result<(), GridError>;
}

/// Resolves pids to peer handles.
///
/// Injected into each engine at construction; there is no process-wide
/// registry.
pub trait Directory<E: Element>: Send + Sync {
    /// Handle for the partition `pid`.
    fn peer(&self, pid: Pid) -> Result<Arc<dyn RemoteCells<E>>, GridError>;
}
