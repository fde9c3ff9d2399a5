//! Per-partition halo engine.
//!
//! [`HaloEngine`] owns one partition's storage (bounds plus margin),
//! answers membership questions, routes single-cell accesses to the
//! owning peer, and refreshes the halo from every neighbor at step
//! boundaries with [`synchronize_halo()`](HaloEngine::synchronize_halo).
//!
//! # Exchange protocol
//!
//! For each neighbor `q` (in ascending pid order) the engine precomputes
//! two regions in storage-local coordinates:
//!
//! - `send`: my bounds ∩ `q`'s halo rect, the cells `q` caches from me;
//! - `recv`: `q`'s bounds ∩ my halo rect, the cells I cache from `q`.
//!
//! Both sides derive the same rectangles from the shared topology, so a
//! buffer needs no header. A synchronization packs every `send` region,
//! sends all buffers, then receives and validates every buffer before
//! unpacking any of them. If any neighbor fails, no halo cell is touched
//! and the halo is marked [`HaloState::Corrupt`].
//!
//! # Ownership model
//!
//! `HaloEngine` is [`Send`] but mutating operations take `&mut self`;
//! the storage itself sits behind a mutex shared with the partition's
//! [`CellService`], which serves peer requests from other threads.

use std::fmt;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use tessera_core::{Element, GridError, Pid, Point, Rect, RectPoints, Topology};
use tessera_storage::{GridStorage, Region, StorageSnapshot};

use crate::config::{ConfigError, HaloConfig};
use crate::exchange::HaloExchange;
use crate::layout::{lock_state, Layout, LocalState};
use crate::remote::Directory;
use crate::service::CellService;

// Compile-time assertion: HaloEngine is Send for every element kind.
const _: () = {
    #[allow(dead_code)]
    fn assert_send<T: Send>() {}
    #[allow(dead_code)]
    fn check() {
        assert_send::<HaloEngine<f64>>();
        assert_send::<HaloEngine<i32>>();
    }
};

// ── HaloState ──────────────────────────────────────────────────────

/// Freshness of the halo cells.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HaloState {
    /// No exchange has run since allocation or the last topology refresh;
    /// halo cells hold the init value.
    Fresh,
    /// The last exchange completed.
    Synchronized {
        /// Number of completed exchanges at that point.
        generation: u64,
    },
    /// The last exchange failed; halo cells hold whatever the last
    /// successful exchange left there.
    Corrupt {
        /// Neighbors whose buffers were missing or malformed.
        failed: Vec<Pid>,
    },
}

impl fmt::Display for HaloState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fresh => write!(f, "fresh"),
            Self::Synchronized { generation } => write!(f, "synchronized@{generation}"),
            Self::Corrupt { failed } => write!(f, "corrupt (failed: {failed:?})"),
        }
    }
}

// ── NeighborLink ───────────────────────────────────────────────────

/// Precomputed exchange regions for one neighbor.
#[derive(Clone, Debug)]
struct NeighborLink {
    send: Region,
    recv: Region,
}

fn build_links(
    pid: Pid,
    topology: &dyn Topology,
    layout: &Layout,
) -> Result<IndexMap<Pid, NeighborLink>, GridError> {
    let storage_shape = Rect::from_shape(layout.storage_shape())?;
    let margin = topology.margin();
    let mut neighbors = topology.neighbors(pid);
    neighbors.sort_unstable();
    let mut links = IndexMap::with_capacity(neighbors.len());
    for q in neighbors {
        if q == pid {
            continue;
        }
        let q_bounds = topology.bounds(q).ok_or_else(|| {
            GridError::protocol(format!("neighbor {q} of partition {pid} has no bounds"))
        })?;
        let q_halo = q_bounds.expand(margin);
        let send = layout.bounds().intersect(&q_halo);
        let recv = q_bounds.intersect(layout.halo_bounds());
        match (send, recv) {
            (Some(send), Some(recv)) => {
                let send = Region::within(layout.rect_to_local(&send), &storage_shape)?;
                let recv = Region::within(layout.rect_to_local(&recv), &storage_shape)?;
                links.insert(q, NeighborLink { send, recv });
            }
            _ => {
                tracing::debug!(pid = %pid, neighbor = %q, "neighbor shares no halo cells");
            }
        }
    }
    Ok(links)
}

// ── HaloEngine ─────────────────────────────────────────────────────

/// Storage, routing and halo exchange for one partition.
pub struct HaloEngine<E: Element> {
    pid: Pid,
    topology: Arc<dyn Topology>,
    directory: Arc<dyn Directory<E>>,
    exchange: Box<dyn HaloExchange>,
    layout: Layout,
    world: Rect,
    shared: Arc<Mutex<LocalState<E>>>,
    links: IndexMap<Pid, NeighborLink>,
    init: E,
    halo_state: HaloState,
    generation: u64,
    round: u64,
    config: HaloConfig,
}

impl<E: Element> HaloEngine<E> {
    /// Build the engine for partition `pid`.
    ///
    /// Allocates storage for bounds plus margin, filled with `init`, and
    /// precomputes the exchange regions for every neighbor.
    pub fn new(
        pid: Pid,
        topology: Arc<dyn Topology>,
        directory: Arc<dyn Directory<E>>,
        exchange: Box<dyn HaloExchange>,
        init: E,
        config: HaloConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if pid.index() >= topology.processor_count() {
            return Err(ConfigError::UnknownPid {
                pid: pid.0,
                processor_count: topology.processor_count(),
            });
        }
        let layout = Layout::from_topology(pid, topology.as_ref())?;
        let links = build_links(pid, topology.as_ref(), &layout)?;
        let state = LocalState::new(layout.clone(), init)?;
        let world = topology.world_bounds();

        tracing::debug!(
            pid = %pid,
            bounds = %layout.bounds(),
            halo = %layout.halo_bounds(),
            neighbors = links.len(),
            "halo engine ready"
        );

        Ok(Self {
            pid,
            topology,
            directory,
            exchange,
            world,
            layout,
            shared: Arc::new(Mutex::new(state)),
            links,
            init,
            halo_state: HaloState::Fresh,
            generation: 0,
            round: 0,
            config,
        })
    }

    // ── accessors ──────────────────────────────────────────────────

    /// This partition's pid.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The topology the engine was built (or last refreshed) from.
    pub fn topology(&self) -> &Arc<dyn Topology> {
        &self.topology
    }

    /// Current storage layout.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Owned bounds, excluding the halo.
    pub fn bounds(&self) -> &Rect {
        self.layout.bounds()
    }

    /// Value cleared cells are reset to.
    pub fn init_value(&self) -> E {
        self.init
    }

    /// Active configuration.
    pub fn config(&self) -> &HaloConfig {
        &self.config
    }

    /// Freshness of the halo.
    pub fn halo_state(&self) -> &HaloState {
        &self.halo_state
    }

    /// Number of completed halo exchanges.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Neighbors that take part in halo exchange, in ascending pid order.
    pub fn exchange_partners(&self) -> Vec<Pid> {
        self.links.keys().copied().collect()
    }

    /// Handle serving this partition's owned cells to peers.
    pub fn service(&self) -> CellService<E> {
        CellService::new(Arc::clone(&self.shared), self.init)
    }

    // ── membership ─────────────────────────────────────────────────

    /// Storage-local coordinate of a global point within bounds plus
    /// margin.
    pub fn to_local_offset(&self, point: &[i32]) -> Result<Point, GridError> {
        self.layout.to_local(point)
    }

    /// Whether this partition owns `point`.
    pub fn is_local(&self, point: &[i32]) -> bool {
        self.layout.is_local(point)
    }

    /// Whether `point` is owned or cached in the halo. Halo cells that
    /// fall outside the world are never cached.
    pub fn is_local_or_halo(&self, point: &[i32]) -> bool {
        self.layout.is_local_or_halo(point) && self.world.contains(point)
    }

    /// Partition owning a global point.
    pub fn owner_of(&self, point: &[i32]) -> Result<Pid, GridError> {
        if point.len() != self.topology.ndim() {
            return Err(GridError::DimensionMismatch {
                expected: self.topology.ndim(),
                found: point.len(),
            });
        }
        self.topology.pid_of(point).ok_or_else(|| GridError::NoOwner {
            point: Point::from_slice(point),
        })
    }

    /// Owned points in row-major order.
    pub fn owned_points(&self) -> RectPoints<'_> {
        self.layout.bounds().points()
    }

    // ── local access ───────────────────────────────────────────────

    /// Read an owned or halo cell from local storage.
    ///
    /// Halo reads fail with [`GridError::HaloCorrupt`] after an
    /// incomplete exchange unless
    /// [`reject_corrupt_halo_reads`](HaloConfig::reject_corrupt_halo_reads)
    /// is off.
    pub fn read_local(&self, point: &[i32]) -> Result<E, GridError> {
        let local = self.layout.to_local(point)?;
        if !self.layout.is_local(point) {
            if !self.world.contains(point) {
                return Err(GridError::NoOwner {
                    point: Point::from_slice(point),
                });
            }
            self.check_halo_readable()?;
        }
        lock_state(&self.shared)?.storage.get(&local)
    }

    /// Overwrite an owned cell. Halo cells are never written locally.
    pub fn write_local(&self, point: &[i32], value: E) -> Result<(), GridError> {
        self.layout.require_local(point)?;
        let local = self.layout.to_local(point)?;
        lock_state(&self.shared)?.storage.set(&local, value)
    }

    fn check_halo_readable(&self) -> Result<(), GridError> {
        match &self.halo_state {
            HaloState::Corrupt { failed } if self.config.reject_corrupt_halo_reads => {
                Err(GridError::HaloCorrupt {
                    failed: failed.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    // ── remote access ──────────────────────────────────────────────

    /// Read a cell from its owner.
    ///
    /// Served from local storage when this partition is the owner.
    pub fn read_remote(&self, point: &[i32]) -> Result<E, GridError> {
        let owner = self.owner_of(point)?;
        if owner == self.pid {
            return self.read_local(point);
        }
        tracing::debug!(pid = %self.pid, owner = %owner, point = ?point, "remote read");
        self.directory.peer(owner)?.read_cell(point)
    }

    /// Write a cell at its owner.
    ///
    /// Completes when the owner has applied the write; the local halo copy,
    /// if any, stays stale until the next exchange.
    pub fn write_remote(&self, point: &[i32], value: E) -> Result<(), GridError> {
        let owner = self.owner_of(point)?;
        if owner == self.pid {
            return self.write_local(point, value);
        }
        tracing::debug!(pid = %self.pid, owner = %owner, point = ?point, "remote write");
        self.directory.peer(owner)?.write_cell(point, value)
    }

    /// Ask `owner` to reset `from` and write `value` at `to` in one call.
    ///
    /// Both points must be owned by `owner`.
    pub fn move_remote(
        &self,
        owner: Pid,
        from: &[i32],
        to: &[i32],
        value: E,
    ) -> Result<(), GridError> {
        tracing::debug!(
            pid = %self.pid,
            owner = %owner,
            from = ?from,
            to = ?to,
            "remote move"
        );
        self.directory.peer(owner)?.move_cell(from, to, value)
    }

    /// Reset a cell to the init value, wherever it is owned.
    pub fn clear(&self, point: &[i32]) -> Result<(), GridError> {
        if self.is_local(point) {
            self.write_local(point, self.init)
        } else {
            self.write_remote(point, self.init)
        }
    }

    // ── bulk access ────────────────────────────────────────────────

    /// Replace every owned cell `v` with `f(v)`. Halo cells are left alone.
    pub fn map_owned(&self, f: impl Fn(E) -> E) -> Result<(), GridError> {
        let mut state = lock_state(&self.shared)?;
        let owned = self.layout.rect_to_local(self.layout.bounds());
        for local in owned.points() {
            let v = state.storage.get(&local)?;
            state.storage.set(&local, f(v))?;
        }
        Ok(())
    }

    /// Multiply every owned cell by `factor`.
    pub fn scale(&self, factor: f64) -> Result<(), GridError> {
        if factor == 1.0 {
            return Ok(());
        }
        self.map_owned(|v| v.scaled(factor))
    }

    /// Run `f` with read access to the whole storage, halo included.
    pub fn with_storage<R>(&self, f: impl FnOnce(&GridStorage<E>) -> R) -> Result<R, GridError> {
        let state = lock_state(&self.shared)?;
        Ok(f(&state.storage))
    }

    /// Run `f` with write access to the whole storage, halo included.
    ///
    /// Halo cells written here are overwritten by the next exchange.
    pub fn with_storage_mut<R>(
        &self,
        f: impl FnOnce(&mut GridStorage<E>) -> R,
    ) -> Result<R, GridError> {
        let mut state = lock_state(&self.shared)?;
        Ok(f(&mut state.storage))
    }

    /// Deep copy of the whole storage.
    pub fn snapshot(&self) -> Result<StorageSnapshot, GridError> {
        Ok(lock_state(&self.shared)?.storage.to_snapshot())
    }

    // ── halo exchange ──────────────────────────────────────────────

    /// Refresh the halo from every neighbor.
    ///
    /// Collective: every partition must call this at the same step
    /// boundary. Blocks until all neighbor buffers have arrived or the
    /// exchange has failed. On failure the halo is left as it was, marked
    /// corrupt, and [`GridError::HaloCorrupt`] names the neighbors that
    /// failed.
    pub fn synchronize_halo(&mut self) -> Result<(), GridError> {
        let round = self.round;
        self.round += 1;

        let outgoing: Vec<(Pid, Vec<u8>)> = {
            let state = lock_state(&self.shared)?;
            self.links
                .iter()
                .map(|(&q, link)| state.storage.pack(&link.send).map(|buf| (q, buf)))
                .collect::<Result<_, _>>()?
        };

        let mut failed = Vec::new();
        for (q, buf) in outgoing {
            if let Err(e) = self.exchange.send(q, round, buf) {
                tracing::warn!(pid = %self.pid, neighbor = %q, round, error = %e, "halo send failed");
                failed.push(q);
            }
        }

        let mut incoming = Vec::with_capacity(self.links.len());
        for (&q, link) in &self.links {
            match self.exchange.recv(q, round) {
                Ok(buf) if buf.len() == link.recv.len() * E::WIDTH => incoming.push((q, buf)),
                Ok(buf) => {
                    let e = GridError::SerializationMismatch {
                        expected: link.recv.len() * E::WIDTH,
                        actual: buf.len(),
                    };
                    tracing::warn!(pid = %self.pid, neighbor = %q, round, error = %e, "halo buffer rejected");
                    failed.push(q);
                }
                Err(e) => {
                    tracing::warn!(pid = %self.pid, neighbor = %q, round, error = %e, "halo receive failed");
                    failed.push(q);
                }
            }
        }

        if !failed.is_empty() {
            failed.sort_unstable();
            failed.dedup();
            self.halo_state = HaloState::Corrupt {
                failed: failed.clone(),
            };
            return Err(GridError::HaloCorrupt { failed });
        }

        {
            let mut state = lock_state(&self.shared)?;
            for (q, buf) in &incoming {
                state.storage.unpack(&self.links[q].recv, buf)?;
            }
        }
        self.generation += 1;
        self.halo_state = HaloState::Synchronized {
            generation: self.generation,
        };
        tracing::trace!(pid = %self.pid, round, generation = self.generation, "halo synchronized");
        Ok(())
    }

    // ── topology refresh ───────────────────────────────────────────

    /// Re-query geometry from `topology`.
    ///
    /// Call between steps, on every partition at once. If this
    /// partition's layout or neighbor set changed, storage is rebuilt:
    /// cells that stay owned keep their values, everything else starts at
    /// the init value and the halo returns to [`HaloState::Fresh`].
    /// Returns whether the storage was rebuilt.
    pub fn refresh_topology(&mut self, topology: Arc<dyn Topology>) -> Result<bool, ConfigError> {
        if self.pid.index() >= topology.processor_count() {
            return Err(ConfigError::UnknownPid {
                pid: self.pid.0,
                processor_count: topology.processor_count(),
            });
        }
        let layout = Layout::from_topology(self.pid, topology.as_ref())?;
        let links = build_links(self.pid, topology.as_ref(), &layout)?;
        let same_links = links.len() == self.links.len()
            && links.iter().zip(&self.links).all(|((a, la), (b, lb))| {
                a == b && la.send == lb.send && la.recv == lb.recv
            });
        if layout == self.layout && same_links {
            self.world = topology.world_bounds();
            self.topology = topology;
            return Ok(false);
        }

        let rebuilt = {
            let mut state = lock_state(&self.shared)?;
            let mut next = LocalState {
                storage: state
                    .storage
                    .new_of_shape(layout.storage_shape(), self.init)?,
                layout: layout.clone(),
            };
            if let Some(kept) = self.layout.bounds().intersect(layout.bounds()) {
                for p in kept.points() {
                    next.set(&p, state.get(&p)?)?;
                }
            }
            *state = next;
            true
        };

        tracing::info!(
            pid = %self.pid,
            revision = topology.revision(),
            bounds = %layout.bounds(),
            neighbors = links.len(),
            "topology refreshed"
        );
        self.layout = layout;
        self.links = links;
        self.world = topology.world_bounds();
        self.topology = topology;
        self.halo_state = HaloState::Fresh;
        Ok(rebuilt)
    }
}

impl<E: Element> fmt::Debug for HaloEngine<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HaloEngine")
            .field("pid", &self.pid)
            .field("kind", &E::KIND)
            .field("bounds", self.layout.bounds())
            .field("halo", self.layout.halo_bounds())
            .field("neighbors", &self.exchange_partners())
            .field("halo_state", &self.halo_state)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ChannelMesh;
    use crate::remote::RemoteCells;
    use std::time::Duration;
    use tessera_space::BlockPartition;

    /// Directory over the services of an in-process cluster, filled in
    /// after the engines exist.
    #[derive(Default)]
    struct LocalDirectory {
        peers: Mutex<Vec<Arc<dyn RemoteCells<f64>>>>,
    }

    impl Directory<f64> for LocalDirectory {
        fn peer(&self, pid: Pid) -> Result<Arc<dyn RemoteCells<f64>>, GridError> {
            self.peers
                .lock()
                .unwrap()
                .get(pid.index())
                .cloned()
                .ok_or_else(|| GridError::communication(pid, "not registered"))
        }
    }

    fn topology(shape: &[i32], grid: &[i32], margin: &[i32]) -> Arc<dyn Topology> {
        let world = Rect::from_shape(shape).unwrap();
        Arc::new(BlockPartition::new(world, grid, margin).unwrap())
    }

    fn cluster(topo: Arc<dyn Topology>, timeout_ms: u64) -> Vec<HaloEngine<f64>> {
        let n = topo.processor_count();
        let dir = Arc::new(LocalDirectory::default());
        let mesh = ChannelMesh::build(n, Duration::from_millis(timeout_ms));
        let config = HaloConfig {
            exchange_timeout_ms: timeout_ms,
            ..Default::default()
        };
        let engines: Vec<HaloEngine<f64>> = mesh
            .into_iter()
            .map(|ep| {
                let pid = ep.pid();
                HaloEngine::new(
                    pid,
                    Arc::clone(&topo),
                    dir.clone(),
                    Box::new(ep),
                    0.0,
                    config.clone(),
                )
                .unwrap()
            })
            .collect();
        let mut peers = dir.peers.lock().unwrap();
        for e in &engines {
            peers.push(Arc::new(e.service()));
        }
        drop(peers);
        engines
    }

    fn sync_all(engines: Vec<HaloEngine<f64>>) -> Vec<HaloEngine<f64>> {
        let handles: Vec<_> = engines
            .into_iter()
            .map(|mut e| {
                std::thread::spawn(move || {
                    e.synchronize_halo().unwrap();
                    e
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn links_mirror_each_other() {
        let topo = topology(&[10, 10], &[2, 2], &[1, 1]);
        let engines = cluster(topo, 500);
        // pid 0 sends its bottom-right corner cell to pid 3 and receives
        // pid 3's top-left corner cell.
        let link = &engines[0].links[&Pid(3)];
        assert_eq!(link.send.rect(), &Rect::new(&[5, 5], &[1, 1]).unwrap());
        assert_eq!(link.recv.rect(), &Rect::new(&[6, 6], &[1, 1]).unwrap());
        let back = &engines[3].links[&Pid(0)];
        assert_eq!(back.send.len(), link.recv.len());
        assert_eq!(engines[0].exchange_partners(), vec![Pid(1), Pid(2), Pid(3)]);
    }

    #[test]
    fn unknown_pid_is_rejected() {
        let topo = topology(&[4, 4], &[1, 1], &[0, 0]);
        let mut mesh = ChannelMesh::build(2, Duration::from_millis(10));
        let err = HaloEngine::<f64>::new(
            Pid(1),
            topo,
            Arc::new(LocalDirectory::default()),
            Box::new(mesh.remove(1)),
            0.0,
            HaloConfig::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownPid {
                pid: 1,
                processor_count: 1
            }
        );
    }

    #[test]
    fn halo_reflects_neighbor_after_sync() {
        let topo = topology(&[10, 10], &[2, 2], &[1, 1]);
        let engines = cluster(topo, 2000);
        engines[0].write_local(&[4, 4], 5.0).unwrap();
        assert_eq!(engines[1].read_local(&[4, 4]).unwrap(), 0.0);
        let engines = sync_all(engines);
        assert_eq!(engines[1].read_local(&[4, 4]).unwrap(), 5.0);
        assert_eq!(engines[3].read_local(&[4, 4]).unwrap(), 5.0);
        assert_eq!(engines[1].generation(), 1);
        assert_eq!(
            engines[1].halo_state(),
            &HaloState::Synchronized { generation: 1 }
        );
    }

    #[test]
    fn remote_routing_reaches_owner() {
        let topo = topology(&[10, 10], &[2, 2], &[1, 1]);
        let engines = cluster(topo, 500);
        engines[0].write_remote(&[9, 9], 3.5).unwrap();
        assert_eq!(engines[3].read_local(&[9, 9]).unwrap(), 3.5);
        assert_eq!(engines[1].read_remote(&[9, 9]).unwrap(), 3.5);
        engines[2].clear(&[9, 9]).unwrap();
        assert_eq!(engines[0].read_remote(&[9, 9]).unwrap(), 0.0);
    }

    #[test]
    fn unowned_point_has_no_owner() {
        let topo = topology(&[10, 10], &[2, 2], &[1, 1]);
        let engines = cluster(topo, 500);
        assert!(matches!(
            engines[0].read_remote(&[-1, 0]),
            Err(GridError::NoOwner { .. })
        ));
        assert!(matches!(
            engines[0].read_remote(&[1, 1, 1]),
            Err(GridError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn halo_outside_world_is_not_readable() {
        let topo = topology(&[10, 10], &[2, 2], &[1, 1]);
        let engines = cluster(topo, 500);
        assert!(!engines[0].is_local_or_halo(&[-1, 0]));
        assert!(engines[0].is_local_or_halo(&[5, 0]));
        assert!(matches!(
            engines[0].read_local(&[-1, 0]),
            Err(GridError::NoOwner { .. })
        ));
        assert!(matches!(
            engines[3].read_local(&[10, 10]),
            Err(GridError::NoOwner { .. })
        ));
    }

    #[test]
    fn write_local_refuses_halo() {
        let topo = topology(&[10, 10], &[2, 2], &[1, 1]);
        let engines = cluster(topo, 500);
        assert!(engines[0].write_local(&[5, 5], 1.0).is_err());
        assert!(engines[0].read_local(&[5, 5]).is_ok());
        assert!(engines[0].read_local(&[7, 7]).is_err());
    }

    #[test]
    fn failed_exchange_marks_halo_corrupt() {
        let topo = topology(&[4], &[2], &[1]);
        let mut engines = cluster(topo, 50);
        engines[1].write_local(&[2], 9.0).unwrap();
        // Only pid 0 synchronizes; pid 1 never sends.
        let err = engines[0].synchronize_halo().unwrap_err();
        assert_eq!(
            err,
            GridError::HaloCorrupt {
                failed: vec![Pid(1)]
            }
        );
        assert!(matches!(
            engines[0].read_local(&[2]),
            Err(GridError::HaloCorrupt { .. })
        ));
        // Owned cells stay readable.
        assert_eq!(engines[0].read_local(&[1]).unwrap(), 0.0);
    }

    #[test]
    fn recovery_after_failed_round() {
        let topo = topology(&[4], &[2], &[1]);
        let mut engines = cluster(topo, 50);
        assert!(engines[0].synchronize_halo().is_err());
        // pid 1 catches up on round 0 alone (pid 0's stale buffer is
        // there), then both run round 1 together.
        engines[1].synchronize_halo().unwrap();
        engines[1].write_local(&[2], 4.0).unwrap();
        let mut b = engines.pop().unwrap();
        let mut a = engines.pop().unwrap();
        let h = std::thread::spawn(move || {
            b.synchronize_halo().unwrap();
            b
        });
        a.synchronize_halo().unwrap();
        let b = h.join().unwrap();
        assert_eq!(a.read_local(&[2]).unwrap(), 4.0);
        assert_eq!(a.generation(), 1);
        assert_eq!(b.generation(), 2);
    }

    #[test]
    fn lenient_config_allows_corrupt_halo_reads() {
        let topo = topology(&[4], &[2], &[1]);
        let mesh = ChannelMesh::build(2, Duration::from_millis(20));
        let mut e = HaloEngine::<f64>::new(
            Pid(0),
            topo,
            Arc::new(LocalDirectory::default()),
            Box::new(mesh.into_iter().next().unwrap()),
            0.0,
            HaloConfig {
                exchange_timeout_ms: 20,
                reject_corrupt_halo_reads: false,
            },
        )
        .unwrap();
        assert!(e.synchronize_halo().is_err());
        assert!(matches!(e.halo_state(), HaloState::Corrupt { .. }));
        assert_eq!(e.read_local(&[2]).unwrap(), 0.0);
    }

    #[test]
    fn scale_touches_owned_cells_only() {
        let topo = topology(&[4], &[2], &[1]);
        let engines = cluster(topo, 500);
        let e = &engines[0];
        e.with_storage_mut(|s| s.fill(2.0)).unwrap();
        e.scale(1.5).unwrap();
        let cells = e.with_storage(|s| s.as_slice().to_vec()).unwrap();
        // storage covers [-1, 3): halo, owned, owned, halo
        assert_eq!(cells, vec![2.0, 3.0, 3.0, 2.0]);
        e.scale(1.0).unwrap();
        assert_eq!(e.read_local(&[0]).unwrap(), 3.0);
    }

    #[test]
    fn refresh_keeps_cells_that_stay_owned() {
        let topo = topology(&[8], &[2], &[1]);
        let mut engines = cluster(topo, 500);
        engines[0].write_local(&[1], 1.0).unwrap();
        engines[0].write_local(&[3], 3.0).unwrap();
        let world = Rect::from_shape(&[8]).unwrap();
        let narrower: Arc<dyn Topology> =
            Arc::new(BlockPartition::new(world, &[4], &[1]).unwrap().with_revision(1));
        assert!(engines[0].refresh_topology(narrower.clone()).unwrap());
        assert_eq!(engines[0].bounds(), &Rect::new(&[0], &[2]).unwrap());
        assert_eq!(engines[0].read_local(&[1]).unwrap(), 1.0);
        assert_eq!(engines[0].halo_state(), &HaloState::Fresh);
        assert!(!engines[0].refresh_topology(narrower).unwrap());
    }

    #[test]
    fn snapshot_is_detached() {
        let topo = topology(&[4], &[1], &[0]);
        let engines = cluster(topo, 500);
        engines[0].write_local(&[2], 8.0).unwrap();
        let snap = engines[0].snapshot().unwrap();
        engines[0].write_local(&[2], 0.0).unwrap();
        let copy = snap.decode::<f64>().unwrap();
        assert_eq!(copy.get(&[2]).unwrap(), 8.0);
    }
}
