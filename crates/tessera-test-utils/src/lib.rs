//! Test utilities and mock types for Tessera development.
//!
//! Provides mock implementations of the collaborator traits
//! ([`Scheduler`], [`Directory`], [`RemoteCells`]) and a
//! [`LocalCluster`] fixture that runs every partition of a topology in
//! one process.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

pub use fixtures::LocalCluster;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tessera_core::{Element, GridError, Pid, Point, Schedulable, Scheduler, Unit};
use tessera_halo::{Directory, RemoteCells};

// ── RecordingScheduler ─────────────────────────────────────────────

/// One call received by a [`RecordingScheduler`].
#[derive(Clone, Debug, PartialEq)]
pub enum ScheduleCall {
    Schedule {
        point: Point,
        label: String,
        ordering: i32,
        time: f64,
    },
    ScheduleRemote {
        pid: Pid,
        point: Point,
        label: String,
        ordering: i32,
        time: f64,
    },
    Unschedule {
        point: Point,
        label: String,
    },
}

/// Scheduler that records every call and reports settable step/time.
#[derive(Default)]
pub struct RecordingScheduler {
    calls: Mutex<Vec<ScheduleCall>>,
    clock: Mutex<(u64, f64)>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<ScheduleCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Advance the reported step counter and clock.
    pub fn advance(&self, steps: u64, dt: f64) {
        let mut clock = self.clock.lock().unwrap();
        clock.0 += steps;
        clock.1 += dt;
    }

    fn record(&self, call: ScheduleCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Scheduler for RecordingScheduler {
    fn schedule(
        &self,
        point: &[i32],
        unit: Unit,
        ordering: i32,
        time: f64,
    ) -> Result<(), GridError> {
        self.record(ScheduleCall::Schedule {
            point: Point::from_slice(point),
            label: unit.label().to_string(),
            ordering,
            time,
        });
        Ok(())
    }

    fn schedule_remote(
        &self,
        pid: Pid,
        point: &[i32],
        unit: Unit,
        ordering: i32,
        time: f64,
    ) -> Result<(), GridError> {
        self.record(ScheduleCall::ScheduleRemote {
            pid,
            point: Point::from_slice(point),
            label: unit.label().to_string(),
            ordering,
            time,
        });
        Ok(())
    }

    fn unschedule(&self, point: &[i32], unit: &Unit) -> Result<(), GridError> {
        self.record(ScheduleCall::Unschedule {
            point: Point::from_slice(point),
            label: unit.label().to_string(),
        });
        Ok(())
    }

    fn steps(&self) -> u64 {
        self.clock.lock().unwrap().0
    }

    fn time(&self) -> f64 {
        self.clock.lock().unwrap().1
    }
}

/// A schedulable unit that only carries a label.
pub struct LabeledUnit(pub String);

impl LabeledUnit {
    /// Shared unit handle labeled `label`.
    pub fn unit(label: impl Into<String>) -> Unit {
        Arc::new(Self(label.into()))
    }
}

impl Schedulable for LabeledUnit {
    fn label(&self) -> &str {
        &self.0
    }
}

// ── InProcessDirectory ─────────────────────────────────────────────

/// Directory backed by a map of registered peer handles.
///
/// Peers are registered after construction, so engines can be built
/// first and their services wired in afterwards.
pub struct InProcessDirectory<E: Element> {
    peers: RwLock<HashMap<Pid, Arc<dyn RemoteCells<E>>>>,
}

impl<E: Element> Default for InProcessDirectory<E> {
    fn default() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }
}

impl<E: Element> InProcessDirectory<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handle for `pid`.
    pub fn register(&self, pid: Pid, peer: Arc<dyn RemoteCells<E>>) {
        self.peers.write().unwrap().insert(pid, peer);
    }

    /// Forget `pid`; later lookups fail with a communication error.
    pub fn unregister(&self, pid: Pid) {
        self.peers.write().unwrap().remove(&pid);
    }
}

impl<E: Element> Directory<E> for InProcessDirectory<E> {
    fn peer(&self, pid: Pid) -> Result<Arc<dyn RemoteCells<E>>, GridError> {
        self.peers
            .read()
            .map_err(|_| GridError::protocol("directory poisoned"))?
            .get(&pid)
            .cloned()
            .ok_or_else(|| GridError::communication(pid, "no such peer registered"))
    }
}

// ── CountingPeer ───────────────────────────────────────────────────

/// Wraps a peer handle and counts the calls made through it.
pub struct CountingPeer<E: Element> {
    inner: Arc<dyn RemoteCells<E>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    moves: AtomicUsize,
}

impl<E: Element> CountingPeer<E> {
    pub fn new(inner: Arc<dyn RemoteCells<E>>) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            moves: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn moves(&self) -> usize {
        self.moves.load(Ordering::SeqCst)
    }

    /// Total calls of any kind.
    pub fn total(&self) -> usize {
        self.reads() + self.writes() + self.moves()
    }

    pub fn reset(&self) {
        self.reads.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
        self.moves.store(0, Ordering::SeqCst);
    }
}

impl<E: Element> RemoteCells<E> for CountingPeer<E> {
    fn read_cell(&self, point: &[i32]) -> Result<E, GridError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_cell(point)
    }

    fn write_cell(&self, point: &[i32], value: E) -> Result<(), GridError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write_cell(point, value)
    }

    fn move_cell(&self, from: &[i32], to: &[i32], value: E) -> Result<(), GridError> {
        self.moves.fetch_add(1, Ordering::SeqCst);
        self.inner.move_cell(from, to, value)
    }
}

/// A peer that is never reachable.
pub struct UnreachablePeer;

impl<E: Element> RemoteCells<E> for UnreachablePeer {
    fn read_cell(&self, _: &[i32]) -> Result<E, GridError> {
        Err(GridError::Communication {
            pid: None,
            detail: "peer unreachable".into(),
        })
    }

    fn write_cell(&self, _: &[i32], _: E) -> Result<(), GridError> {
        Err(GridError::Communication {
            pid: None,
            detail: "peer unreachable".into(),
        })
    }

    fn move_cell(&self, _: &[i32], _: &[i32], _: E) -> Result<(), GridError> {
        Err(GridError::Communication {
            pid: None,
            detail: "peer unreachable".into(),
        })
    }
}
