//! Tessera: partitioned n-dimensional grid fields for distributed
//! simulations.
//!
//! This is the top-level facade crate that re-exports the public API from
//! all Tessera sub-crates. For most users, adding `tessera` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use tessera::prelude::*;
//!
//! // One partition covering a 4x4 world, no halo.
//! let world = Rect::from_shape(&[4, 4]).unwrap();
//! let topology: Arc<dyn Topology> =
//!     Arc::new(BlockPartition::new(world, &[1, 1], &[0, 0]).unwrap());
//! let config = HaloConfig::default();
//! let mut mesh = ChannelMesh::build(1, config.exchange_timeout());
//! let directory = Arc::new(TcpDirectory::<f64>::new(FieldId(0), ClientConfig::default()));
//!
//! let engine = HaloEngine::new(
//!     Pid(0),
//!     topology,
//!     directory,
//!     Box::new(mesh.remove(0)),
//!     0.0,
//!     config,
//! )
//! .unwrap();
//! let mut grid = DistributedGrid::new(engine);
//!
//! grid.add(&[1, 2], 3.0).unwrap();
//! grid.scale(2.0).unwrap();
//! grid.synchronize_halo().unwrap();
//! assert_eq!(grid.get(&[1, 2]).unwrap(), 6.0);
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in the prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `tessera-core` | IDs, geometry, element kinds, errors, collaborator traits |
//! | [`storage`] | `tessera-storage` | Dense storage, regions, pack/unpack, snapshots |
//! | [`space`] | `tessera-space` | Block decomposition topology |
//! | [`halo`] | `tessera-halo` | Halo engine and the typed grid facade |
//! | [`remote`] | `tessera-remote` | TCP peer access and the observer protocol |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types, traits, and IDs (`tessera-core`).
pub use tessera_core as types;

/// Dense storage and region serialization (`tessera-storage`).
///
/// [`storage::GridStorage`] packs and unpacks rectangular
/// [`storage::Region`]s into flat byte buffers.
pub use tessera_storage as storage;

/// Partition topologies (`tessera-space`).
pub use tessera_space as space;

/// Halo engine and grid facade (`tessera-halo`).
///
/// [`halo::DistributedGrid`] is the main entry point; it routes every
/// access to local storage, the halo, or the owning peer.
pub use tessera_halo as halo;

/// TCP transport and observer protocol (`tessera-remote`).
pub use tessera_remote as remote;

/// Common imports for typical Tessera usage.
///
/// ```rust
/// use tessera::prelude::*;
/// ```
pub mod prelude {
    // Core types and traits
    pub use tessera_core::{
        Element, ElementKind, FieldId, Pid, Point, Rect, Scheduler, StorageId, Topology, Unit,
    };

    // Errors
    pub use tessera_core::{ErrorCategory, GridError};

    // Storage
    pub use tessera_storage::{GridStorage, Region, StorageSnapshot};

    // Space
    pub use tessera_space::BlockPartition;

    // Halo engine and facade
    pub use tessera_halo::{
        ChannelMesh, Directory, DistributedGrid, HaloConfig, HaloEngine, RemoteCells,
    };

    // Remote access
    pub use tessera_remote::{
        ClientConfig, Observer, PartitionServer, QuiescenceGate, ServerConfig, TcpDirectory,
        TcpPeer,
    };
}
