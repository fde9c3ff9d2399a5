//! Coordinate translation between global space and halo storage.

use std::sync::{Mutex, MutexGuard};

use tessera_core::{Element, GridError, Pid, Point, Rect, Topology};
use tessera_storage::GridStorage;

/// Where one partition's storage sits in global space.
///
/// Storage covers `halo`: the partition's owned `bounds` grown by the
/// margin on every side. Storage-local coordinates are global
/// coordinates minus `halo.origin()`.
#[derive(Clone, Debug, PartialEq)]
pub struct Layout {
    pid: Pid,
    bounds: Rect,
    halo: Rect,
}

impl Layout {
    /// Derive the layout of partition `pid` from a topology.
    pub fn from_topology(pid: Pid, topology: &dyn Topology) -> Result<Self, GridError> {
        let bounds = topology.bounds(pid).ok_or_else(|| {
            GridError::protocol(format!(
                "partition {pid} not in topology of {} partitions",
                topology.processor_count()
            ))
        })?;
        let margin = topology.margin();
        if margin.len() != bounds.ndim() {
            return Err(GridError::DimensionMismatch {
                expected: bounds.ndim(),
                found: margin.len(),
            });
        }
        Ok(Self::new(pid, bounds, margin))
    }

    /// Layout of partition `pid` owning `bounds` with halo width `margin`.
    pub fn new(pid: Pid, bounds: Rect, margin: &[i32]) -> Self {
        let halo = bounds.expand(margin);
        Self { pid, bounds, halo }
    }

    /// The partition this layout belongs to.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Owned bounds, excluding the halo.
    pub fn bounds(&self) -> &Rect {
        &self.bounds
    }

    /// Owned bounds plus the halo margin; the extent of storage.
    pub fn halo_bounds(&self) -> &Rect {
        &self.halo
    }

    /// Shape of the backing storage.
    pub fn storage_shape(&self) -> &[i32] {
        self.halo.size()
    }

    /// Whether this partition owns `point`.
    pub fn is_local(&self, point: &[i32]) -> bool {
        self.bounds.contains(point)
    }

    /// Whether `point` is owned here or cached in the halo.
    pub fn is_local_or_halo(&self, point: &[i32]) -> bool {
        self.halo.contains(point)
    }

    /// Storage-local coordinate of a global point.
    ///
    /// Only points within bounds plus margin have a storage slot.
    pub fn to_local(&self, point: &[i32]) -> Result<Point, GridError> {
        if point.len() != self.halo.ndim() {
            return Err(GridError::DimensionMismatch {
                expected: self.halo.ndim(),
                found: point.len(),
            });
        }
        if !self.halo.contains(point) {
            return Err(GridError::OutOfBounds {
                point: Point::from_slice(point),
                bounds: format!("partition {} storage {}", self.pid, self.halo),
            });
        }
        Ok(point
            .iter()
            .zip(self.halo.origin())
            .map(|(p, o)| p - o)
            .collect())
    }

    /// Translate a global rectangle into storage-local coordinates.
    pub fn rect_to_local(&self, rect: &Rect) -> Rect {
        rect.relative_to(self.halo.origin())
    }

    /// Fail unless this partition owns `point`.
    pub fn require_local(&self, point: &[i32]) -> Result<(), GridError> {
        if self.is_local(point) {
            Ok(())
        } else {
            Err(GridError::OutOfBounds {
                point: Point::from_slice(point),
                bounds: format!("partition {} owns {}", self.pid, self.bounds),
            })
        }
    }
}

// ── LocalState ─────────────────────────────────────────────────────

/// One partition's storage together with the layout that addresses it.
///
/// Shared behind a mutex between the partition's engine and the
/// [`CellService`](crate::CellService) answering its peers. Both halves
/// are replaced together when the topology changes.
#[derive(Clone, Debug)]
pub struct LocalState<E: Element> {
    /// Dense storage covering the halo bounds.
    pub storage: GridStorage<E>,
    /// Translation from global points to storage offsets.
    pub layout: Layout,
}

impl<E: Element> LocalState<E> {
    /// Allocate storage for `layout`, filled with `init`.
    pub fn new(layout: Layout, init: E) -> Result<Self, GridError> {
        let storage = GridStorage::filled(layout.storage_shape(), init)?;
        Ok(Self { storage, layout })
    }

    /// Read a cell owned here or cached in the halo.
    pub fn get(&self, point: &[i32]) -> Result<E, GridError> {
        let local = self.layout.to_local(point)?;
        self.storage.get(&local)
    }

    /// Overwrite a cell owned here or cached in the halo.
    pub fn set(&mut self, point: &[i32], value: E) -> Result<(), GridError> {
        let local = self.layout.to_local(point)?;
        self.storage.set(&local, value)
    }
}

/// Lock shared partition state, mapping poison to a protocol error.
pub(crate) fn lock_state<E: Element>(
    state: &Mutex<LocalState<E>>,
) -> Result<MutexGuard<'_, LocalState<E>>, GridError> {
    state
        .lock()
        .map_err(|_| GridError::protocol("partition state poisoned by a panicked writer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn layout() -> Layout {
        Layout::new(Pid(1), Rect::new(&[0, 5], &[5, 5]).unwrap(), &[1, 1])
    }

    #[test]
    fn halo_grows_bounds_by_margin() {
        let l = layout();
        assert_eq!(l.halo_bounds(), &Rect::new(&[-1, 4], &[7, 7]).unwrap());
        assert_eq!(l.storage_shape(), &[7, 7]);
    }

    #[test]
    fn membership() {
        let l = layout();
        assert!(l.is_local(&[0, 5]));
        assert!(!l.is_local(&[0, 4]));
        assert!(l.is_local_or_halo(&[0, 4]));
        assert!(l.is_local_or_halo(&[5, 10]));
        assert!(!l.is_local_or_halo(&[6, 10]));
    }

    #[test]
    fn to_local_subtracts_halo_origin() {
        let l = layout();
        assert_eq!(l.to_local(&[-1, 4]).unwrap().as_slice(), &[0, 0]);
        assert_eq!(l.to_local(&[2, 7]).unwrap().as_slice(), &[3, 3]);
        assert!(matches!(
            l.to_local(&[9, 9]),
            Err(GridError::OutOfBounds { .. })
        ));
        assert!(matches!(
            l.to_local(&[1]),
            Err(GridError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn require_local_rejects_halo_points() {
        let l = layout();
        assert!(l.require_local(&[4, 9]).is_ok());
        assert!(l.require_local(&[5, 9]).is_err());
    }

    #[test]
    fn local_state_addresses_halo_storage() {
        let mut state = LocalState::new(layout(), -1i32).unwrap();
        assert_eq!(state.storage.len(), 49);
        state.set(&[5, 10], 8).unwrap();
        assert_eq!(state.get(&[5, 10]).unwrap(), 8);
        assert_eq!(state.storage.as_slice()[48], 8);
        assert_eq!(state.get(&[0, 5]).unwrap(), -1);
        assert!(state.set(&[7, 7], 1).is_err());
    }

    proptest! {
        #[test]
        fn to_local_maps_halo_onto_storage(
            ox in -20i32..20, oy in -20i32..20,
            w in 1i32..10, h in 1i32..10,
            mx in 0i32..3, my in 0i32..3,
            px in -35i32..35, py in -35i32..35,
        ) {
            let l = Layout::new(Pid(0), Rect::new(&[ox, oy], &[w, h]).unwrap(), &[mx, my]);
            let shape = l.storage_shape().to_vec();
            match l.to_local(&[px, py]) {
                Ok(local) => {
                    prop_assert!(l.is_local_or_halo(&[px, py]));
                    prop_assert_eq!(local.as_slice(), &[px - ox + mx, py - oy + my]);
                    prop_assert!(local.iter().zip(&shape).all(|(c, s)| (0..*s).contains(c)));
                }
                Err(e) => {
                    prop_assert!(!l.is_local_or_halo(&[px, py]));
                    let is_out_of_bounds = matches!(e, GridError::OutOfBounds { .. });
                    prop_assert!(is_out_of_bounds);
                }
            }
        }
    }
}
