//! TCP transport for peer cell access and observer snapshots.
//!
//! Every partition runs a [`PartitionServer`] that answers two kinds of
//! caller:
//!
//! - **Peers**, reading, writing and moving single cells they routed to
//!   this partition ([`RemoteField`] / [`TcpDirectory`] on their side).
//! - **Observers**, which lock the partition at a quiescent point, pull
//!   a deep [`StorageSnapshot`](tessera_storage::StorageSnapshot), and
//!   unlock ([`TcpPeer`] implements [`Observer`]).
//!
//! The stepping process brackets each step with the server's
//! [`QuiescenceGate`]; a snapshot is only served to the connection that
//! holds the lock.
//!
//! # Wire format
//!
//! Every message is a `u32` little-endian length followed by that many
//! body bytes. A request body is an opcode byte and its payload; a
//! response body is a status byte, a payload-kind byte and the payload.
//! See [`protocol`] for the opcode table.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod gate;
pub mod observer;
pub mod protocol;
pub mod server;

pub use client::{RemoteField, TcpDirectory, TcpPeer};
pub use codec::WireValue;
pub use config::{ClientConfig, ServerConfig};
pub use error::{CodecError, ServerError};
pub use gate::{HolderId, QuiescenceGate, StepGuard};
pub use observer::Observer;
pub use protocol::{Request, Response};
pub use server::{PartitionServer, ServerHandle, SnapshotSource};

// Compile-time assertions: handles cross thread boundaries.
const _: () = {
    fn _assert_send_sync<T: Send + Sync>() {}
    fn _check() {
        _assert_send_sync::<TcpPeer>();
        _assert_send_sync::<QuiescenceGate>();
        _assert_send_sync::<ServerHandle>();
    }
};
