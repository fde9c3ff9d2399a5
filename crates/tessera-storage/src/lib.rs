//! Flat grid storage with sub-rectangle pack/unpack.
//!
//! A [`GridStorage`] is a dense, row-major array of one element kind over
//! an n-d shape anchored at the origin. It knows nothing about partitions
//! or halos: the halo engine decides which [`Region`]s to pack and where
//! to unpack them.
//!
//! # Wire format
//!
//! [`GridStorage::pack`] produces the region's elements in row-major order,
//! each encoded fixed-width little-endian ([`Element::encode`]). There is
//! no shape or length header; sender and receiver must agree on the
//! region out-of-band.
//!
//! [`Element::encode`]: tessera_core::Element::encode

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod region;
pub mod snapshot;
pub mod storage;

pub use region::Region;
pub use snapshot::StorageSnapshot;
pub use storage::GridStorage;
