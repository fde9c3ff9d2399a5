//! TCP client side: peer connections, typed field handles, and a
//! [`Directory`] over an address table.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex, RwLock};

use tessera_core::{Element, FieldId, GridError, Pid, Rect, StorageId};
use tessera_halo::{Directory, RemoteCells};
use tessera_storage::StorageSnapshot;

use crate::codec::{read_frame, write_frame, WireValue};
use crate::config::ClientConfig;
use crate::error::CodecError;
use crate::observer::Observer;
use crate::protocol::{Request, Response};

// ── TcpPeer ────────────────────────────────────────────────────────

/// One connection to a partition server.
///
/// Calls are serialized over the connection. A transport failure drops
/// the connection; the next call reconnects. Calls are never retried,
/// and a lock held over a dropped connection is released by the server.
pub struct TcpPeer {
    pid: Pid,
    addr: SocketAddr,
    config: ClientConfig,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpPeer {
    /// Connect to the server for `pid` at `addr`.
    pub fn connect(pid: Pid, addr: SocketAddr, config: ClientConfig) -> Result<Self, GridError> {
        config
            .validate()
            .map_err(|e| GridError::communication(pid, e.to_string()))?;
        let stream = open(pid, addr, &config)?;
        tracing::debug!(pid = %pid, addr = %addr, "connected to peer");
        Ok(Self {
            pid,
            addr,
            config,
            stream: Mutex::new(Some(stream)),
        })
    }

    /// The partition this peer serves.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Typed handle for one field served by this peer.
    pub fn field<E: Element>(self: &Arc<Self>, field: FieldId) -> RemoteField<E> {
        RemoteField {
            peer: Arc::clone(self),
            field,
            _kind: PhantomData,
        }
    }

    /// Send one request and wait for its response. A server-side error
    /// comes back as `Err` with the server's [`GridError`].
    pub fn call(&self, req: &Request) -> Result<Response, GridError> {
        let mut slot = self
            .stream
            .lock()
            .map_err(|_| GridError::protocol("peer connection lock poisoned"))?;
        let mut stream = match slot.take() {
            Some(s) => s,
            None => open(self.pid, self.addr, &self.config)?,
        };

        tracing::trace!(pid = %self.pid, op = req.name(), "call");
        match exchange(&mut stream, req, self.config.max_frame_len) {
            Ok(resp) => {
                *slot = Some(stream);
                resp.into_result()
            }
            Err(e) => {
                tracing::debug!(pid = %self.pid, op = req.name(), error = %e, "call failed");
                Err(e.into_grid(self.pid))
            }
        }
    }

    fn unexpected(&self, req: &Request, resp: &Response) -> GridError {
        GridError::protocol(format!(
            "{} answered {} with {resp:?}",
            self.pid,
            req.name()
        ))
    }
}

impl fmt::Debug for TcpPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpPeer")
            .field("pid", &self.pid)
            .field("addr", &self.addr)
            .finish()
    }
}

fn open(pid: Pid, addr: SocketAddr, config: &ClientConfig) -> Result<TcpStream, GridError> {
    let comm = |e: std::io::Error| GridError::communication(pid, format!("{addr}: {e}"));
    let stream = TcpStream::connect_timeout(&addr, config.connect_timeout()).map_err(comm)?;
    stream
        .set_read_timeout(Some(config.io_timeout()))
        .map_err(comm)?;
    stream
        .set_write_timeout(Some(config.io_timeout()))
        .map_err(comm)?;
    stream.set_nodelay(true).map_err(comm)?;
    Ok(stream)
}

fn exchange(
    stream: &mut TcpStream,
    req: &Request,
    max_frame_len: usize,
) -> Result<Response, CodecError> {
    write_frame(stream, &req.encode()?)?;
    let body = read_frame(stream, max_frame_len)?;
    Response::decode(&body)
}

impl Observer for TcpPeer {
    fn lock(&self) -> Result<(), GridError> {
        match self.call(&Request::Lock)? {
            Response::Unit => Ok(()),
            other => Err(self.unexpected(&Request::Lock, &other)),
        }
    }

    fn unlock(&self) -> Result<bool, GridError> {
        match self.call(&Request::Unlock)? {
            Response::Flag(released) => Ok(released),
            other => Err(self.unexpected(&Request::Unlock, &other)),
        }
    }

    fn bounds(&self) -> Result<Rect, GridError> {
        match self.call(&Request::Bounds)? {
            Response::Rect(r) => Ok(r),
            other => Err(self.unexpected(&Request::Bounds, &other)),
        }
    }

    fn world_bounds(&self) -> Result<Rect, GridError> {
        match self.call(&Request::WorldBounds)? {
            Response::Rect(r) => Ok(r),
            other => Err(self.unexpected(&Request::WorldBounds, &other)),
        }
    }

    fn snapshot(&self, storage: StorageId) -> Result<StorageSnapshot, GridError> {
        let req = Request::Snapshot { storage };
        match self.call(&req)? {
            Response::Snapshot(s) => Ok(s),
            other => Err(self.unexpected(&req, &other)),
        }
    }

    fn steps(&self) -> Result<u64, GridError> {
        match self.call(&Request::Steps)? {
            Response::U64(n) => Ok(n),
            other => Err(self.unexpected(&Request::Steps, &other)),
        }
    }

    fn time(&self) -> Result<f64, GridError> {
        match self.call(&Request::Time)? {
            Response::F64(t) => Ok(t),
            other => Err(self.unexpected(&Request::Time, &other)),
        }
    }

    fn processor_count(&self) -> Result<usize, GridError> {
        match self.call(&Request::ProcessorCount)? {
            Response::U64(n) => usize::try_from(n)
                .map_err(|_| GridError::protocol(format!("processor count {n} out of range"))),
            other => Err(self.unexpected(&Request::ProcessorCount, &other)),
        }
    }

    fn all_local_bounds(&self) -> Result<Vec<Rect>, GridError> {
        match self.call(&Request::AllLocalBounds)? {
            Response::Rects(rects) => Ok(rects),
            other => Err(self.unexpected(&Request::AllLocalBounds, &other)),
        }
    }
}

// ── RemoteField ────────────────────────────────────────────────────

/// [`RemoteCells`] for one field on one peer.
pub struct RemoteField<E> {
    peer: Arc<TcpPeer>,
    field: FieldId,
    _kind: PhantomData<fn() -> E>,
}

impl<E> RemoteField<E> {
    /// The field this handle addresses.
    pub fn field(&self) -> FieldId {
        self.field
    }

    /// The underlying connection.
    pub fn peer(&self) -> &Arc<TcpPeer> {
        &self.peer
    }

    fn expect_unit(&self, req: &Request) -> Result<(), GridError> {
        match self.peer.call(req)? {
            Response::Unit => Ok(()),
            other => Err(self.peer.unexpected(req, &other)),
        }
    }
}

impl<E: Element> RemoteCells<E> for RemoteField<E> {
    fn read_cell(&self, point: &[i32]) -> Result<E, GridError> {
        let req = Request::ReadCell {
            field: self.field,
            point: point.into(),
        };
        match self.peer.call(&req)? {
            Response::Value(v) => v.to_element(),
            other => Err(self.peer.unexpected(&req, &other)),
        }
    }

    fn write_cell(&self, point: &[i32], value: E) -> Result<(), GridError> {
        self.expect_unit(&Request::WriteCell {
            field: self.field,
            point: point.into(),
            value: WireValue::from_element(value),
        })
    }

    fn move_cell(&self, from: &[i32], to: &[i32], value: E) -> Result<(), GridError> {
        self.expect_unit(&Request::MoveCell {
            field: self.field,
            from: from.into(),
            to: to.into(),
            value: WireValue::from_element(value),
        })
    }
}

// ── TcpDirectory ───────────────────────────────────────────────────

/// [`Directory`] over TCP, resolving pids through an address table.
///
/// Addresses may be filled in after construction, so engines can be
/// built before their peers' servers are bound. Connections open on
/// first use and are reused afterwards.
pub struct TcpDirectory<E> {
    field: FieldId,
    config: ClientConfig,
    addrs: RwLock<HashMap<Pid, SocketAddr>>,
    peers: Mutex<HashMap<Pid, Arc<RemoteField<E>>>>,
}

impl<E: Element> TcpDirectory<E> {
    /// Directory addressing `field` on every partition, with an empty
    /// address table.
    pub fn new(field: FieldId, config: ClientConfig) -> Self {
        Self {
            field,
            config,
            addrs: RwLock::new(HashMap::new()),
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Directory where pid `i` is served at `addrs[i]`.
    pub fn with_addrs(field: FieldId, addrs: &[SocketAddr], config: ClientConfig) -> Self {
        let dir = Self::new(field, config);
        for (i, addr) in addrs.iter().enumerate() {
            dir.set_addr(Pid(i as u32), *addr);
        }
        dir
    }

    /// Record (or replace) the server address of `pid`. An open
    /// connection to the old address is dropped.
    pub fn set_addr(&self, pid: Pid, addr: SocketAddr) {
        if let Ok(mut addrs) = self.addrs.write() {
            addrs.insert(pid, addr);
        }
        if let Ok(mut peers) = self.peers.lock() {
            peers.remove(&pid);
        }
    }

    /// The server address of `pid`, if known.
    pub fn addr(&self, pid: Pid) -> Option<SocketAddr> {
        self.addrs.read().ok()?.get(&pid).copied()
    }
}

impl<E: Element> Directory<E> for TcpDirectory<E> {
    fn peer(&self, pid: Pid) -> Result<Arc<dyn RemoteCells<E>>, GridError> {
        let mut peers = self
            .peers
            .lock()
            .map_err(|_| GridError::protocol("directory lock poisoned"))?;
        if let Some(field) = peers.get(&pid) {
            return Ok(field.clone());
        }
        let addr = self
            .addr(pid)
            .ok_or_else(|| GridError::communication(pid, "no address for partition"))?;
        let peer = Arc::new(TcpPeer::connect(pid, addr, self.config.clone())?);
        let field = Arc::new(peer.field::<E>(self.field));
        peers.insert(pid, Arc::clone(&field));
        Ok(field)
    }
}
