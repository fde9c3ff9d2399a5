//! Core types and traits for Tessera distributed grid fields.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the vocabulary shared by every other crate in the workspace:
//! partition and field identifiers, n-d points and rectangles, the
//! [`Element`] capability that lets grids stay unboxed per element kind,
//! the [`GridError`] taxonomy, and the external collaborator traits
//! ([`Topology`], [`Scheduler`]) that the core consumes but never owns.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod element;
pub mod error;
pub mod geometry;
pub mod id;
pub mod traits;

pub use element::{Element, ElementKind};
pub use error::{ErrorCategory, GridError};
pub use geometry::{Rect, RectPoints};
pub use id::{FieldId, Pid, Point, StorageId};
pub use traits::{Schedulable, Scheduler, Topology, Unit};
