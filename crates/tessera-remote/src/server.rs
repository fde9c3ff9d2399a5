//! Partition server: answers peer cell calls and observer requests.
//!
//! # Threading
//!
//! One named acceptor thread per server and one named handler thread per
//! connection. Each connection carries one request at a time, so a
//! handler reads a frame, dispatches it, writes the response, and loops.
//! A connection is also the unit of lock ownership: a handler that exits
//! while its connection holds the quiescence lock releases it.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use indexmap::IndexMap;
use tessera_core::{Element, ElementKind, FieldId, GridError, Pid, Scheduler, StorageId, Topology};
use tessera_halo::{CellService, DistributedGrid, RemoteCells};
use tessera_storage::StorageSnapshot;

use crate::codec::{read_frame, write_frame, WireValue};
use crate::config::ServerConfig;
use crate::error::{CodecError, ServerError};
use crate::gate::{HolderId, QuiescenceGate};
use crate::protocol::{Request, Response};

// ── Registered endpoints ───────────────────────────────────────────

/// Source of deep storage copies for observers.
pub trait SnapshotSource: Send + Sync {
    /// Deep copy of the storage.
    fn snapshot(&self) -> Result<StorageSnapshot, GridError>;
}

impl<E: Element> SnapshotSource for CellService<E> {
    fn snapshot(&self) -> Result<StorageSnapshot, GridError> {
        CellService::snapshot(self)
    }
}

/// Kind-erased view of one registered field.
trait FieldEndpoint: Send + Sync {
    fn kind(&self) -> ElementKind;
    fn read(&self, point: &[i32]) -> Result<WireValue, GridError>;
    fn write(&self, point: &[i32], value: &WireValue) -> Result<(), GridError>;
    fn move_cell(&self, from: &[i32], to: &[i32], value: &WireValue) -> Result<(), GridError>;
}

struct TypedField<E: Element> {
    cells: Arc<dyn RemoteCells<E>>,
}

impl<E: Element> FieldEndpoint for TypedField<E> {
    fn kind(&self) -> ElementKind {
        E::KIND
    }

    fn read(&self, point: &[i32]) -> Result<WireValue, GridError> {
        self.cells.read_cell(point).map(WireValue::from_element)
    }

    fn write(&self, point: &[i32], value: &WireValue) -> Result<(), GridError> {
        self.cells.write_cell(point, value.to_element()?)
    }

    fn move_cell(&self, from: &[i32], to: &[i32], value: &WireValue) -> Result<(), GridError> {
        self.cells.move_cell(from, to, value.to_element()?)
    }
}

// ── PartitionServer ────────────────────────────────────────────────

/// Builder for a partition's TCP endpoint.
///
/// Register fields and storages, then [`start`](Self::start) to bind the
/// listener and spawn the acceptor.
pub struct PartitionServer {
    pid: Pid,
    topology: Arc<dyn Topology>,
    scheduler: Option<Arc<dyn Scheduler>>,
    gate: Arc<QuiescenceGate>,
    fields: IndexMap<FieldId, Arc<dyn FieldEndpoint>>,
    storages: IndexMap<StorageId, Arc<dyn SnapshotSource>>,
    config: ServerConfig,
}

impl PartitionServer {
    /// Server for partition `pid` of `topology`.
    pub fn new(pid: Pid, topology: Arc<dyn Topology>, config: ServerConfig) -> Self {
        Self {
            pid,
            topology,
            scheduler: None,
            gate: Arc::new(QuiescenceGate::new()),
            fields: IndexMap::new(),
            storages: IndexMap::new(),
            config,
        }
    }

    /// Scheduler answering `steps` and `time`.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Use an existing gate instead of a fresh one.
    pub fn with_gate(mut self, gate: Arc<QuiescenceGate>) -> Self {
        self.gate = gate;
        self
    }

    /// The gate the stepping process must bracket its steps with.
    pub fn gate(&self) -> Arc<QuiescenceGate> {
        Arc::clone(&self.gate)
    }

    /// Serve cell calls for `field` from `cells`. Replaces any earlier
    /// registration of the same id.
    pub fn register_field<E: Element>(
        &mut self,
        field: FieldId,
        cells: Arc<dyn RemoteCells<E>>,
    ) -> &mut Self {
        self.fields.insert(field, Arc::new(TypedField { cells }));
        self
    }

    /// Serve snapshots of `storage` from `source`.
    pub fn register_storage(
        &mut self,
        storage: StorageId,
        source: Arc<dyn SnapshotSource>,
    ) -> &mut Self {
        self.storages.insert(storage, source);
        self
    }

    /// Serve a grid's cells as `field` and its storage as `storage`.
    pub fn register_grid<E: Element>(
        &mut self,
        field: FieldId,
        storage: StorageId,
        grid: &DistributedGrid<E>,
    ) -> &mut Self {
        let service = Arc::new(grid.service());
        self.register_field::<E>(field, service.clone());
        self.register_storage(storage, service)
    }

    /// Bind the listener and start accepting connections.
    pub fn start(self) -> Result<ServerHandle, ServerError> {
        self.config.validate()?;
        let listener = TcpListener::bind(self.config.bind_addr)?;
        let addr = listener.local_addr()?;
        let pid = self.pid;

        tracing::info!(
            pid = %pid,
            addr = %addr,
            fields = self.fields.len(),
            storages = self.storages.len(),
            "partition server listening"
        );

        let shared = Arc::new(Shared {
            pid,
            topology: self.topology,
            scheduler: self.scheduler,
            gate: self.gate,
            fields: self.fields,
            storages: self.storages,
            config: self.config,
            shutdown: AtomicBool::new(false),
            next_conn: AtomicU64::new(1),
            connections: Mutex::new(HashMap::new()),
            handlers: Mutex::new(Vec::new()),
        });

        let accept_shared = Arc::clone(&shared);
        let acceptor = thread::Builder::new()
            .name(format!("tessera-accept-{pid}"))
            .spawn(move || accept_loop(listener, accept_shared))?;

        Ok(ServerHandle {
            addr,
            shared,
            acceptor: Some(acceptor),
        })
    }
}

// ── Shared server state ────────────────────────────────────────────

struct Shared {
    pid: Pid,
    topology: Arc<dyn Topology>,
    scheduler: Option<Arc<dyn Scheduler>>,
    gate: Arc<QuiescenceGate>,
    fields: IndexMap<FieldId, Arc<dyn FieldEndpoint>>,
    storages: IndexMap<StorageId, Arc<dyn SnapshotSource>>,
    config: ServerConfig,
    shutdown: AtomicBool,
    next_conn: AtomicU64,
    /// Clones of live connection streams, for shutdown.
    connections: Mutex<HashMap<HolderId, TcpStream>>,
    handlers: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn field(&self, field: FieldId) -> Result<&Arc<dyn FieldEndpoint>, GridError> {
        self.fields
            .get(&field)
            .ok_or(GridError::UnknownField { field })
    }

    fn scheduler(&self) -> Result<&Arc<dyn Scheduler>, GridError> {
        self.scheduler
            .as_ref()
            .ok_or_else(|| GridError::protocol("partition server has no scheduler"))
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    for stream in listener.incoming() {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(pid = %shared.pid, error = %e, "accept failed");
                continue;
            }
        };
        let conn = shared.next_conn.fetch_add(1, Ordering::Relaxed);
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".into());
        tracing::debug!(pid = %shared.pid, conn, peer = %peer, "connection accepted");

        match stream.try_clone() {
            Ok(clone) => {
                if let Ok(mut conns) = shared.connections.lock() {
                    conns.insert(conn, clone);
                }
            }
            Err(e) => {
                tracing::warn!(pid = %shared.pid, conn, error = %e, "cannot track connection");
            }
        }

        let handler_shared = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name(format!("tessera-conn-{}-{conn}", shared.pid))
            .spawn(move || handle_connection(handler_shared, conn, stream));
        match spawned {
            Ok(handle) => {
                if let Ok(mut handlers) = shared.handlers.lock() {
                    handlers.retain(|h| !h.is_finished());
                    handlers.push(handle);
                }
            }
            Err(e) => {
                tracing::warn!(pid = %shared.pid, conn, error = %e, "cannot spawn handler");
                if let Ok(mut conns) = shared.connections.lock() {
                    conns.remove(&conn);
                }
            }
        }
    }
    tracing::debug!(pid = %shared.pid, "acceptor stopped");
}

/// Apply per-connection socket options. Failures are logged and the
/// connection is served anyway.
fn tune_stream(pid: Pid, conn: HolderId, stream: &TcpStream, write_timeout: Duration) {
    if let Err(e) = stream.set_write_timeout(Some(write_timeout)) {
        tracing::warn!(pid = %pid, conn, error = %e, "cannot set write timeout");
    }
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(pid = %pid, conn, error = %e, "cannot set nodelay");
    }
}

fn handle_connection(shared: Arc<Shared>, conn: HolderId, mut stream: TcpStream) {
    tune_stream(shared.pid, conn, &stream, shared.config.io_timeout());

    loop {
        let body = match read_frame(&mut stream, shared.config.max_frame_len) {
            Ok(body) => body,
            Err(CodecError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                tracing::debug!(pid = %shared.pid, conn, "connection closed by peer");
                break;
            }
            Err(e @ CodecError::FrameTooLarge { .. }) => {
                // The oversized body is still in the stream; the
                // connection cannot be resynchronized.
                tracing::warn!(pid = %shared.pid, conn, error = %e, "dropping connection");
                let resp = Response::Error(GridError::protocol(e.to_string()));
                if let Ok(body) = resp.encode() {
                    let _ = write_frame(&mut stream, &body);
                }
                break;
            }
            Err(e) => {
                tracing::debug!(pid = %shared.pid, conn, error = %e, "connection read failed");
                break;
            }
        };

        let resp = match Request::decode(&body) {
            Ok(req) => {
                tracing::trace!(pid = %shared.pid, conn, op = req.name(), "request");
                match dispatch(&shared, conn, req) {
                    Ok(resp) => resp,
                    Err(e) => Response::Error(e),
                }
            }
            Err(e) => {
                tracing::warn!(pid = %shared.pid, conn, error = %e, "undecodable request");
                Response::Error(GridError::protocol(e.to_string()))
            }
        };

        let written = resp
            .encode()
            .and_then(|body| write_frame(&mut stream, &body));
        if let Err(e) = written {
            tracing::debug!(pid = %shared.pid, conn, error = %e, "response write failed");
            break;
        }
    }

    if shared.gate.unlock(conn) {
        tracing::warn!(pid = %shared.pid, conn, "connection dropped while holding the lock; released");
    }
    if let Ok(mut conns) = shared.connections.lock() {
        conns.remove(&conn);
    }
}

fn dispatch(shared: &Shared, conn: HolderId, req: Request) -> Result<Response, GridError> {
    match req {
        Request::ReadCell { field, point } => {
            Ok(Response::Value(shared.field(field)?.read(&point)?))
        }
        Request::WriteCell {
            field,
            point,
            value,
        } => {
            let endpoint = shared.field(field)?;
            check_kind(endpoint.kind(), &value)?;
            endpoint.write(&point, &value)?;
            Ok(Response::Unit)
        }
        Request::MoveCell {
            field,
            from,
            to,
            value,
        } => {
            let endpoint = shared.field(field)?;
            check_kind(endpoint.kind(), &value)?;
            endpoint.move_cell(&from, &to, &value)?;
            Ok(Response::Unit)
        }
        Request::Lock => {
            if shared
                .gate
                .lock_timeout(conn, shared.config.io_timeout())
            {
                tracing::debug!(pid = %shared.pid, conn, "observer lock acquired");
                Ok(Response::Unit)
            } else {
                Err(GridError::communication(
                    shared.pid,
                    "timed out waiting for a quiescent point",
                ))
            }
        }
        Request::Unlock => Ok(Response::Flag(shared.gate.unlock(conn))),
        Request::Bounds => shared
            .topology
            .bounds(shared.pid)
            .map(Response::Rect)
            .ok_or_else(|| GridError::protocol(format!("{} has no bounds", shared.pid))),
        Request::WorldBounds => Ok(Response::Rect(shared.topology.world_bounds())),
        Request::Snapshot { storage } => {
            if !shared.gate.is_held_by(conn) {
                tracing::warn!(pid = %shared.pid, conn, storage = %storage, "snapshot without lock");
                return Err(GridError::protocol(
                    "snapshot requires holding the lock on this connection",
                ));
            }
            let source = shared
                .storages
                .get(&storage)
                .ok_or(GridError::UnknownStorage { storage })?;
            Ok(Response::Snapshot(source.snapshot()?))
        }
        Request::Steps => Ok(Response::U64(shared.scheduler()?.steps())),
        Request::Time => Ok(Response::F64(shared.scheduler()?.time())),
        Request::ProcessorCount => Ok(Response::U64(shared.topology.processor_count() as u64)),
        Request::AllLocalBounds => Ok(Response::Rects(shared.topology.all_bounds())),
    }
}

fn check_kind(expected: ElementKind, value: &WireValue) -> Result<(), GridError> {
    if value.kind() == expected {
        Ok(())
    } else {
        Err(GridError::ElementKindMismatch {
            expected,
            found: value.kind().tag(),
        })
    }
}

// ── ServerHandle ───────────────────────────────────────────────────

/// A running partition server. Dropping it shuts the server down.
pub struct ServerHandle {
    addr: SocketAddr,
    shared: Arc<Shared>,
    acceptor: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// The bound address (with the real port when bound to port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// The partition this server answers for.
    pub fn pid(&self) -> Pid {
        self.shared.pid
    }

    /// The gate the stepping process must bracket its steps with.
    pub fn gate(&self) -> Arc<QuiescenceGate> {
        Arc::clone(&self.shared.gate)
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Stop accepting, close every connection and join all threads.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(acceptor) = self.acceptor.take() else {
            return;
        };
        self.shared.shutdown.store(true, Ordering::Release);
        // Wake the acceptor out of its blocking accept().
        let _ = TcpStream::connect(self.addr);
        if acceptor.join().is_err() {
            tracing::warn!(pid = %self.shared.pid, "acceptor thread panicked");
        }
        if let Ok(conns) = self.shared.connections.lock() {
            for stream in conns.values() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
        let handlers = self
            .shared
            .handlers
            .lock()
            .map(|mut h| std::mem::take(&mut *h))
            .unwrap_or_default();
        for h in handlers {
            if h.join().is_err() {
                tracing::warn!(pid = %self.shared.pid, "connection handler panicked");
            }
        }
        tracing::info!(pid = %self.shared.pid, addr = %self.addr, "partition server stopped");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
