//! Typed distributed grid facade.
//!
//! [`DistributedGrid`] is the API simulation code programs against. One
//! generic type serves every element kind; `DistributedGrid<f64>` and
//! `DistributedGrid<i32>` are monomorphized separately and share no
//! dynamic dispatch on the element path.
//!
//! Accesses route by ownership:
//!
//! | Operation | owned | halo | elsewhere |
//! |-----------|-------|------|-----------|
//! | `get`     | local | local (may be stale) | remote read |
//! | `add`     | local | remote write | remote write |
//! | `remove`  | local | remote write | remote write |
//!
//! The grid is dense: every point of the world always has a value, and
//! "removing" a value resets the cell to the init value.

use std::sync::Arc;

use tessera_core::{Element, GridError, Pid, Rect, Scheduler, Unit};
use tessera_storage::{GridStorage, StorageSnapshot};

use crate::engine::HaloEngine;
use crate::service::CellService;

/// A dense field of `E` spread across partitions.
pub struct DistributedGrid<E: Element> {
    engine: HaloEngine<E>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl<E: Element> DistributedGrid<E> {
    /// Wrap an engine. Agent operations fail until a scheduler is
    /// attached with [`with_scheduler`](Self::with_scheduler).
    pub fn new(engine: HaloEngine<E>) -> Self {
        Self {
            engine,
            scheduler: None,
        }
    }

    /// Attach the simulation scheduler agent operations register with.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// The underlying engine.
    pub fn engine(&self) -> &HaloEngine<E> {
        &self.engine
    }

    /// Mutable access to the underlying engine.
    pub fn engine_mut(&mut self) -> &mut HaloEngine<E> {
        &mut self.engine
    }

    /// This partition's pid.
    pub fn pid(&self) -> Pid {
        self.engine.pid()
    }

    /// Owned bounds, excluding the halo.
    pub fn bounds(&self) -> &Rect {
        self.engine.bounds()
    }

    /// Value of an empty cell.
    pub fn init_value(&self) -> E {
        self.engine.init_value()
    }

    /// Handle serving this partition's cells to peers.
    pub fn service(&self) -> CellService<E> {
        self.engine.service()
    }

    // ── routed access ──────────────────────────────────────────────

    /// Value at `point`.
    ///
    /// Owned and halo cells are read locally; halo values are as of the
    /// last synchronization. Anything else is fetched from its owner.
    pub fn get(&self, point: &[i32]) -> Result<E, GridError> {
        if self.engine.is_local_or_halo(point) {
            self.engine.read_local(point)
        } else {
            self.engine.read_remote(point)
        }
    }

    /// Store `value` at `point`, at its owner.
    pub fn add(&self, point: &[i32], value: E) -> Result<(), GridError> {
        if self.engine.is_local(point) {
            self.engine.write_local(point, value)
        } else {
            self.engine.write_remote(point, value)
        }
    }

    /// Reset `point` to the init value.
    pub fn remove(&self, point: &[i32]) -> Result<(), GridError> {
        self.engine.clear(point)
    }

    /// Reset `point` to the init value. `value` is ignored: a dense cell
    /// holds one value, so there is nothing to match against.
    pub fn remove_value(&self, point: &[i32], value: E) -> Result<(), GridError> {
        let _ = value;
        self.remove(point)
    }

    /// Move `value` from `from` to `to`.
    ///
    /// When both cells belong to the same other partition this is one
    /// remote call. Otherwise it is a remove followed by an add; a
    /// failure in between leaves `from` cleared and `to` untouched.
    pub fn move_value(&self, from: &[i32], to: &[i32], value: E) -> Result<(), GridError> {
        let from_owner = self.engine.owner_of(from)?;
        let to_owner = self.engine.owner_of(to)?;
        if from_owner == to_owner && from_owner != self.engine.pid() {
            return self.engine.move_remote(from_owner, from, to, value);
        }
        self.remove(from)?;
        self.add(to, value)
    }

    /// Multiply every owned cell by `factor`. Halo cells catch up at the
    /// next synchronization.
    pub fn scale(&self, factor: f64) -> Result<(), GridError> {
        self.engine.scale(factor)
    }

    // ── owned-only access ──────────────────────────────────────────

    /// Value of an owned cell. Fails for halo and remote points.
    pub fn get_local(&self, point: &[i32]) -> Result<E, GridError> {
        self.engine.layout().require_local(point)?;
        self.engine.read_local(point)
    }

    /// Store `value` in an owned cell.
    pub fn add_local(&self, point: &[i32], value: E) -> Result<(), GridError> {
        self.engine.write_local(point, value)
    }

    /// Reset an owned cell to the init value.
    pub fn remove_local(&self, point: &[i32]) -> Result<(), GridError> {
        self.engine.write_local(point, self.engine.init_value())
    }

    /// Move `value` between two owned cells.
    pub fn move_local(&self, from: &[i32], to: &[i32], value: E) -> Result<(), GridError> {
        let layout = self.engine.layout();
        layout.require_local(from)?;
        layout.require_local(to)?;
        self.remove_local(from)?;
        self.add_local(to, value)
    }

    // ── agents ─────────────────────────────────────────────────────

    fn scheduler(&self) -> Result<&Arc<dyn Scheduler>, GridError> {
        self.scheduler
            .as_ref()
            .ok_or_else(|| GridError::protocol("agent operation on a grid without a scheduler"))
    }

    fn schedule_at(
        &self,
        point: &[i32],
        unit: Unit,
        ordering: i32,
        time: f64,
    ) -> Result<(), GridError> {
        let scheduler = self.scheduler()?;
        let owner = self.engine.owner_of(point)?;
        if owner == self.engine.pid() {
            scheduler.schedule(point, unit, ordering, time)
        } else {
            tracing::debug!(
                pid = %self.engine.pid(),
                owner = %owner,
                point = ?point,
                unit = unit.label(),
                "handing agent to owner"
            );
            scheduler.schedule_remote(owner, point, unit, ordering, time)
        }
    }

    /// Store `value` at `point` and schedule `unit` there.
    ///
    /// If another partition owns `point` the unit is handed to that
    /// partition's scheduler.
    pub fn add_agent(
        &self,
        point: &[i32],
        value: E,
        unit: Unit,
        ordering: i32,
        time: f64,
    ) -> Result<(), GridError> {
        self.scheduler()?;
        self.add(point, value)?;
        self.schedule_at(point, unit, ordering, time)
    }

    /// Move an agent's value and schedule from `from` to `to`.
    ///
    /// `from` must be owned here; agents only move from the partition
    /// running them.
    pub fn move_agent(
        &self,
        from: &[i32],
        to: &[i32],
        value: E,
        unit: Unit,
        ordering: i32,
        time: f64,
    ) -> Result<(), GridError> {
        let scheduler = self.scheduler()?;
        self.engine.layout().require_local(from)?;
        self.move_value(from, to, value)?;
        scheduler.unschedule(from, &unit)?;
        self.schedule_at(to, unit, ordering, time)
    }

    /// Clear `point` and stop `unit`.
    pub fn remove_agent(&self, point: &[i32], unit: &Unit) -> Result<(), GridError> {
        let scheduler = self.scheduler()?;
        self.remove(point)?;
        scheduler.unschedule(point, unit)
    }

    // ── step boundary and inspection ───────────────────────────────

    /// Refresh the halo from all neighbors. Collective.
    pub fn synchronize_halo(&mut self) -> Result<(), GridError> {
        self.engine.synchronize_halo()
    }

    /// Run `f` with read access to the raw storage.
    pub fn with_storage<R>(&self, f: impl FnOnce(&GridStorage<E>) -> R) -> Result<R, GridError> {
        self.engine.with_storage(f)
    }

    /// Run `f` with write access to the raw storage.
    pub fn with_storage_mut<R>(
        &self,
        f: impl FnOnce(&mut GridStorage<E>) -> R,
    ) -> Result<R, GridError> {
        self.engine.with_storage_mut(f)
    }

    /// Deep copy of the storage, halo included.
    pub fn snapshot(&self) -> Result<StorageSnapshot, GridError> {
        self.engine.snapshot()
    }

    /// Text rendering of the storage, one row per line for 2-D grids.
    pub fn dump(&self) -> Result<String, GridError> {
        self.engine.with_storage(|s| s.to_string())
    }
}
