//! External collaborator traits: partition topology and scheduler.
//!
//! The core consumes both through these interfaces and never mutates
//! them. Concrete topologies live in `tessera-space`; schedulers belong
//! to the driving simulation.

use std::fmt;
use std::sync::Arc;

use crate::error::GridError;
use crate::geometry::Rect;
use crate::id::Pid;

/// Partitioning of a global n-d domain across processes.
///
/// # Contract
///
/// - Pids are dense: `0..processor_count()`.
/// - The bounds of all partitions tile [`world_bounds`](Self::world_bounds)
///   without overlap, so every point of the world has exactly one owner.
/// - [`neighbors`](Self::neighbors) of `p` are exactly the other
///   partitions whose bounds intersect `p`'s bounds expanded by
///   [`margin`](Self::margin), in ascending pid order.
/// - Two calls with the same [`revision`](Self::revision) return the
///   same geometry.
///
/// `Sync` is required because halo engines and partition servers share
/// one topology across threads.
pub trait Topology: Send + Sync {
    /// Number of spatial dimensions.
    fn ndim(&self) -> usize;

    /// Number of partitions (and processes).
    fn processor_count(&self) -> usize;

    /// Owned bounds of partition `pid`, excluding any halo.
    fn bounds(&self, pid: Pid) -> Option<Rect>;

    /// Bounds of the whole (non-periodic) domain.
    fn world_bounds(&self) -> Rect;

    /// Partitions whose bounds intersect `pid`'s halo region.
    fn neighbors(&self, pid: Pid) -> Vec<Pid>;

    /// Owner of a global point, or `None` if the point is outside the
    /// world.
    fn pid_of(&self, point: &[i32]) -> Option<Pid>;

    /// Halo width per axis (the area of influence).
    fn margin(&self) -> &[i32];

    /// Monotonic geometry revision. Changes whenever the partitioning
    /// changes, so engines know when to re-query.
    fn revision(&self) -> u64 {
        0
    }

    /// Owned bounds of every partition, indexed by pid.
    fn all_bounds(&self) -> Vec<Rect> {
        (0..self.processor_count() as u32)
            .filter_map(|p| self.bounds(Pid(p)))
            .collect()
    }
}

/// An opaque unit of work the simulation wants scheduled.
///
/// The core never calls into units; it only hands them to the
/// [`Scheduler`]. The label exists for diagnostics.
pub trait Schedulable: Send + Sync {
    /// Short diagnostic label.
    fn label(&self) -> &str {
        "unit"
    }
}

/// Shared handle to a schedulable unit.
pub type Unit = Arc<dyn Schedulable>;

impl fmt::Debug for dyn Schedulable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unit({})", self.label())
    }
}

/// Registration API of the driving simulation's scheduler.
///
/// Grid facades forward units here when agents are added or moved; the
/// core implements no scheduling itself. `steps()` and `time()` are read
/// under the scheduler's own synchronization and are safe to call from
/// service threads without holding the quiescence lock.
pub trait Scheduler: Send + Sync {
    /// Schedule `unit` at `point` on this process.
    fn schedule(
        &self,
        point: &[i32],
        unit: Unit,
        ordering: i32,
        time: f64,
    ) -> Result<(), GridError>;

    /// Hand `unit` over to the process owning `pid`, to be scheduled
    /// there at `point`.
    fn schedule_remote(
        &self,
        pid: Pid,
        point: &[i32],
        unit: Unit,
        ordering: i32,
        time: f64,
    ) -> Result<(), GridError>;

    /// Stop and forget `unit`, previously scheduled at `point`.
    fn unschedule(&self, point: &[i32], unit: &Unit) -> Result<(), GridError>;

    /// Number of completed steps. Monotonically nondecreasing.
    fn steps(&self) -> u64;

    /// Current simulation time. Monotonically nondecreasing.
    fn time(&self) -> f64;
}
