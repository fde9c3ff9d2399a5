//! In-process cluster fixture.
//!
//! [`LocalCluster`] builds one [`DistributedGrid`] per partition of a
//! [`BlockPartition`], wires them through a [`ChannelMesh`] for halo
//! exchange and an [`InProcessDirectory`] for cell access, and wraps
//! every peer handle in a [`CountingPeer`] so tests can assert how many
//! remote calls an operation made.

use std::sync::Arc;
use std::thread;

use tessera_core::{Element, GridError, Pid, Rect, Scheduler, Topology};
use tessera_halo::{ChannelMesh, DistributedGrid, HaloConfig, HaloEngine};
use tessera_space::BlockPartition;

use crate::{CountingPeer, InProcessDirectory};

/// Every partition of a topology, running in this process.
pub struct LocalCluster<E: Element> {
    pub topology: Arc<dyn Topology>,
    pub directory: Arc<InProcessDirectory<E>>,
    /// Counting handles, indexed by pid.
    pub peers: Vec<Arc<CountingPeer<E>>>,
    /// Grids, indexed by pid.
    pub grids: Vec<DistributedGrid<E>>,
}

impl<E: Element> LocalCluster<E> {
    /// Block-decompose a world of `shape` into `grid` blocks with halo
    /// `margin`, every cell starting at `init`.
    pub fn block(shape: &[i32], grid: &[i32], margin: &[i32], init: E) -> Self {
        let world = Rect::from_shape(shape).unwrap();
        let topology = Arc::new(BlockPartition::new(world, grid, margin).unwrap());
        Self::with_topology(topology, init, HaloConfig::default(), None)
    }

    /// Build a cluster over any topology.
    pub fn with_topology(
        topology: Arc<dyn Topology>,
        init: E,
        config: HaloConfig,
        scheduler: Option<Arc<dyn Scheduler>>,
    ) -> Self {
        let n = topology.processor_count();
        let directory = Arc::new(InProcessDirectory::new());
        let mesh = ChannelMesh::build(n, config.exchange_timeout());
        let mut peers = Vec::with_capacity(n);
        let mut grids = Vec::with_capacity(n);
        for endpoint in mesh {
            let pid = endpoint.pid();
            let engine = HaloEngine::new(
                pid,
                Arc::clone(&topology),
                directory.clone(),
                Box::new(endpoint),
                init,
                config.clone(),
            )
            .unwrap();
            let peer = Arc::new(CountingPeer::new(Arc::new(engine.service())));
            directory.register(pid, peer.clone());
            peers.push(peer);
            let grid = DistributedGrid::new(engine);
            grids.push(match &scheduler {
                Some(s) => grid.with_scheduler(Arc::clone(s)),
                None => grid,
            });
        }
        Self {
            topology,
            directory,
            peers,
            grids,
        }
    }

    /// The grid of partition `pid`.
    pub fn grid(&self, pid: u32) -> &DistributedGrid<E> {
        &self.grids[pid as usize]
    }

    /// Counting handle of partition `pid`.
    pub fn peer(&self, pid: u32) -> &CountingPeer<E> {
        &self.peers[pid as usize]
    }

    /// Remote calls received by all partitions.
    pub fn remote_calls(&self) -> usize {
        self.peers.iter().map(|p| p.total()).sum()
    }

    /// Owner of `point` according to the topology.
    pub fn owner(&self, point: &[i32]) -> Option<Pid> {
        self.topology.pid_of(point)
    }

    /// Run one collective halo exchange, each partition on its own thread.
    ///
    /// Returns each partition's result, indexed by pid.
    pub fn synchronize(&mut self) -> Vec<Result<(), GridError>> {
        let grids = std::mem::take(&mut self.grids);
        let handles: Vec<_> = grids
            .into_iter()
            .map(|mut g| {
                thread::spawn(move || {
                    let r = g.synchronize_halo();
                    (g, r)
                })
            })
            .collect();
        let mut results = Vec::with_capacity(handles.len());
        for h in handles {
            let (g, r) = h.join().unwrap();
            self.grids.push(g);
            results.push(r);
        }
        results
    }

    /// Synchronize and panic if any partition failed.
    pub fn synchronize_ok(&mut self) {
        for (pid, r) in self.synchronize().into_iter().enumerate() {
            if let Err(e) = r {
                panic!("partition {pid} failed to synchronize: {e}");
            }
        }
    }
}
