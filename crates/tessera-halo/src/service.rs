//! Serving peer requests against a partition's own cells.

use std::sync::{Arc, Mutex};

use tessera_core::{Element, GridError, Pid, Rect};
use tessera_storage::StorageSnapshot;

use crate::layout::{lock_state, LocalState};
use crate::remote::RemoteCells;

/// The receiving side of [`RemoteCells`] for one partition.
///
/// Shares storage with the partition's [`HaloEngine`](crate::HaloEngine)
/// and applies peer operations to owned cells only: a peer that routes a
/// request here for a point this partition does not own gets
/// [`GridError::OutOfBounds`], never a write into the halo.
pub struct CellService<E: Element> {
    state: Arc<Mutex<LocalState<E>>>,
    init: E,
}

impl<E: Element> Clone for CellService<E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            init: self.init,
        }
    }
}

impl<E: Element> CellService<E> {
    pub(crate) fn new(state: Arc<Mutex<LocalState<E>>>, init: E) -> Self {
        Self { state, init }
    }

    /// The partition this service answers for.
    pub fn pid(&self) -> Result<Pid, GridError> {
        Ok(lock_state(&self.state)?.layout.pid())
    }

    /// Owned bounds at the time of the call.
    pub fn bounds(&self) -> Result<Rect, GridError> {
        Ok(lock_state(&self.state)?.layout.bounds().clone())
    }

    /// Value cells are reset to when an occupant moves away.
    pub fn init_value(&self) -> E {
        self.init
    }

    /// Deep copy of the whole storage, halo included.
    pub fn snapshot(&self) -> Result<StorageSnapshot, GridError> {
        Ok(lock_state(&self.state)?.storage.to_snapshot())
    }
}

impl<E: Element> RemoteCells<E> for CellService<E> {
    fn read_cell(&self, point: &[i32]) -> Result<E, GridError> {
        let state = lock_state(&self.state)?;
        state.layout.require_local(point)?;
        state.get(point)
    }

    fn write_cell(&self, point: &[i32], value: E) -> Result<(), GridError> {
        let mut state = lock_state(&self.state)?;
        state.layout.require_local(point)?;
        state.set(point, value)
    }

    fn move_cell(&self, from: &[i32], to: &[i32], value: E) -> Result<(), GridError> {
        let mut state = lock_state(&self.state)?;
        state.layout.require_local(from)?;
        state.layout.require_local(to)?;
        state.set(from, self.init)?;
        state.set(to, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;

    fn service() -> CellService<f64> {
        let layout = Layout::new(Pid(0), Rect::new(&[0, 0], &[4, 4]).unwrap(), &[1, 1]);
        let state = LocalState::new(layout, 0.0).unwrap();
        CellService::new(Arc::new(Mutex::new(state)), 0.0)
    }

    #[test]
    fn write_then_read_owned_cell() {
        let svc = service();
        svc.write_cell(&[3, 3], 2.5).unwrap();
        assert_eq!(svc.read_cell(&[3, 3]).unwrap(), 2.5);
    }

    #[test]
    fn halo_cells_are_not_served() {
        let svc = service();
        assert!(matches!(
            svc.read_cell(&[4, 0]),
            Err(GridError::OutOfBounds { .. })
        ));
        assert!(svc.write_cell(&[-1, 0], 1.0).is_err());
    }

    #[test]
    fn move_resets_source() {
        let svc = service();
        svc.write_cell(&[0, 0], 7.0).unwrap();
        svc.move_cell(&[0, 0], &[1, 2], 7.0).unwrap();
        assert_eq!(svc.read_cell(&[0, 0]).unwrap(), 0.0);
        assert_eq!(svc.read_cell(&[1, 2]).unwrap(), 7.0);
    }

    #[test]
    fn move_to_foreign_cell_writes_nothing() {
        let svc = service();
        svc.write_cell(&[0, 0], 7.0).unwrap();
        assert!(svc.move_cell(&[0, 0], &[9, 9], 7.0).is_err());
        assert_eq!(svc.read_cell(&[0, 0]).unwrap(), 7.0);
    }

    #[test]
    fn snapshot_covers_halo() {
        let svc = service();
        let snap = svc.snapshot().unwrap();
        assert_eq!(snap.shape().size(), &[6, 6]);
        assert_eq!(svc.pid().unwrap(), Pid(0));
    }
}
