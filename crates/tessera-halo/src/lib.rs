//! Halo engine and typed distributed grid facade.
//!
//! A [`HaloEngine`] owns one partition's dense storage, sized to the
//! partition's bounds plus the halo margin on every side. It translates
//! global coordinates to storage offsets, decides whether an access is
//! local or must go to the owning peer, and refreshes the halo from its
//! neighbors at step boundaries.
//!
//! [`DistributedGrid`] layers the user-facing get/add/remove/move/scale
//! semantics on top, generic over the element kind so that `f64` and
//! `i32` grids share one implementation without boxing.
//!
//! # Architecture
//!
//! ```text
//! DistributedGrid<E>
//!     |
//!     v
//! HaloEngine<E> ----------------------> Directory<E> -> RemoteCells<E> (peer)
//!     |   \
//!     |    \--synchronize_halo()-----> HaloExchange (ChannelMesh, ...)
//!     v
//! Arc<Mutex<LocalState<E>>>  <-------- CellService<E> (serves peers)
//!     (GridStorage<E> + Layout)
//! ```
//!
//! The storage is shared with the partition's [`CellService`], which
//! applies reads and writes that peers route to this partition. The
//! storage layer itself is unsynchronized; the mutex is owned here.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod engine;
pub mod exchange;
pub mod grid;
pub mod layout;
pub mod remote;
pub mod service;

pub use config::{ConfigError, HaloConfig};
pub use engine::{HaloEngine, HaloState};
pub use exchange::{ChannelMesh, HaloExchange, MeshEndpoint};
pub use grid::DistributedGrid;
pub use layout::{Layout, LocalState};
pub use remote::{Directory, RemoteCells};
pub use service::CellService;
