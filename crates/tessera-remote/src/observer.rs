//! Observer-side interface to a running partition.

use tessera_core::{GridError, Rect, StorageId};
use tessera_storage::StorageSnapshot;

/// What an external observer (visualizer, monitor) can ask a partition.
///
/// Every call may fail with [`GridError::Communication`]; none has a
/// partial-success outcome.
pub trait Observer {
    /// Hold the partition at its next quiescent point. Blocks until no
    /// step is in flight.
    fn lock(&self) -> Result<(), GridError>;

    /// Release a lock held by this observer. Returns `false` (and does
    /// nothing) if no lock was held.
    fn unlock(&self) -> Result<bool, GridError>;

    /// Owned bounds of the partition, excluding its halo.
    fn bounds(&self) -> Result<Rect, GridError>;

    /// Bounds of the whole world.
    fn world_bounds(&self) -> Result<Rect, GridError>;

    /// Deep copy of a registered storage. Only served while this observer
    /// holds the lock; otherwise [`GridError::ProtocolViolation`].
    fn snapshot(&self, storage: StorageId) -> Result<StorageSnapshot, GridError>;

    /// Completed simulation steps.
    fn steps(&self) -> Result<u64, GridError>;

    /// Current simulation time.
    fn time(&self) -> Result<f64, GridError>;

    /// Number of partitions; pids run from 0.
    fn processor_count(&self) -> Result<usize, GridError>;

    /// Owned bounds of every partition, indexed by pid.
    fn all_local_bounds(&self) -> Result<Vec<Rect>, GridError>;

    /// Lock, snapshot, unlock. The lock is released even if the snapshot
    /// fails.
    fn locked_snapshot(&self, storage: StorageId) -> Result<StorageSnapshot, GridError> {
        self.lock()?;
        let snapshot = self.snapshot(storage);
        let released = self.unlock();
        let snapshot = snapshot?;
        released?;
        Ok(snapshot)
    }
}
