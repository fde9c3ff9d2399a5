//! Quiescence gate between the stepping process and external observers.
//!
//! The gate is a two-state machine:
//!
//! ```text
//!            lock() (waits for step end)
//!   RUNNING ─────────────────────────────▶ LOCKED
//!      ▲                                      │
//!      └──────────────── unlock() ────────────┘
//! ```
//!
//! The process brackets every step with [`QuiescenceGate::enter_step`];
//! while LOCKED no step may start, so an observer holding the lock sees
//! storage at a quiescent point. A pending `lock()` also blocks new steps
//! from starting, so a process that steps back to back cannot starve an
//! observer.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Identity of a lock holder (one per server connection).
pub type HolderId = u64;

#[derive(Debug, Default)]
struct GateState {
    step_active: bool,
    holder: Option<HolderId>,
    pending: usize,
}

/// Mutual exclusion between simulation steps and observer snapshots.
#[derive(Debug, Default)]
pub struct QuiescenceGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

/// Marks a step in flight; the step ends when the guard drops.
#[must_use = "the step ends as soon as the guard is dropped"]
pub struct StepGuard<'a> {
    gate: &'a QuiescenceGate,
}

impl Drop for StepGuard<'_> {
    fn drop(&mut self) {
        self.gate.end_step();
    }
}

impl QuiescenceGate {
    /// A gate in the RUNNING state.
    pub fn new() -> Self {
        Self::default()
    }

    // Poison is ignored: no critical section leaves the flags half-updated.
    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, GateState>) -> MutexGuard<'a, GateState> {
        self.changed.wait(guard).unwrap_or_else(|e| e.into_inner())
    }

    /// Mark the start of a step, blocking while an observer holds or
    /// waits for the lock.
    pub fn begin_step(&self) {
        let mut s = self.state();
        while s.holder.is_some() || s.pending > 0 || s.step_active {
            s = self.wait(s);
        }
        s.step_active = true;
    }

    /// Mark the end of the step started by [`begin_step`](Self::begin_step).
    pub fn end_step(&self) {
        let mut s = self.state();
        s.step_active = false;
        drop(s);
        self.changed.notify_all();
    }

    /// [`begin_step`](Self::begin_step) with the end tied to a guard.
    pub fn enter_step(&self) -> StepGuard<'_> {
        self.begin_step();
        StepGuard { gate: self }
    }

    /// Acquire the lock for `holder`, waiting for any step in flight to
    /// finish and for other holders to unlock. Re-locking by the current
    /// holder returns immediately.
    pub fn lock(&self, holder: HolderId) {
        let mut s = self.state();
        if s.holder == Some(holder) {
            return;
        }
        s.pending += 1;
        while s.step_active || s.holder.is_some() {
            s = self.wait(s);
        }
        s.pending -= 1;
        s.holder = Some(holder);
    }

    /// Like [`lock`](Self::lock) but gives up after `timeout`. Returns
    /// whether the lock was acquired.
    pub fn lock_timeout(&self, holder: HolderId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut s = self.state();
        if s.holder == Some(holder) {
            return true;
        }
        s.pending += 1;
        while s.step_active || s.holder.is_some() {
            let now = Instant::now();
            if now >= deadline {
                s.pending -= 1;
                drop(s);
                // Steps may have been waiting on our pending count.
                self.changed.notify_all();
                return false;
            }
            s = self
                .changed
                .wait_timeout(s, deadline - now)
                .map(|(g, _)| g)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        s.pending -= 1;
        s.holder = Some(holder);
        true
    }

    /// Release the lock if `holder` holds it. Returns whether anything
    /// was released; unlocking without holding the lock is a no-op.
    pub fn unlock(&self, holder: HolderId) -> bool {
        let mut s = self.state();
        if s.holder != Some(holder) {
            return false;
        }
        s.holder = None;
        drop(s);
        self.changed.notify_all();
        true
    }

    /// Whether `holder` currently holds the lock.
    pub fn is_held_by(&self, holder: HolderId) -> bool {
        self.state().holder == Some(holder)
    }

    /// Whether any holder has the lock.
    pub fn is_locked(&self) -> bool {
        self.state().holder.is_some()
    }

    /// Whether a step is in flight.
    pub fn step_in_flight(&self) -> bool {
        self.state().step_active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn unlock_without_lock_is_noop() {
        let gate = QuiescenceGate::new();
        assert!(!gate.unlock(1));
        assert!(!gate.is_locked());
    }

    #[test]
    fn only_holder_can_unlock() {
        let gate = QuiescenceGate::new();
        gate.lock(1);
        assert!(!gate.unlock(2));
        assert!(gate.is_held_by(1));
        assert!(gate.unlock(1));
    }

    #[test]
    fn relock_by_holder_does_not_block() {
        let gate = QuiescenceGate::new();
        gate.lock(5);
        gate.lock(5);
        assert!(gate.unlock(5));
        assert!(!gate.is_locked());
    }

    #[test]
    fn lock_waits_for_step_end() {
        let gate = Arc::new(QuiescenceGate::new());
        let step = gate.enter_step();
        let g = Arc::clone(&gate);
        let locked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&locked);
        let h = thread::spawn(move || {
            g.lock(1);
            flag.store(true, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(50));
        assert!(!locked.load(Ordering::SeqCst));
        drop(step);
        h.join().unwrap();
        assert!(locked.load(Ordering::SeqCst));
        assert!(gate.is_held_by(1));
    }

    #[test]
    fn steps_wait_while_locked() {
        let gate = Arc::new(QuiescenceGate::new());
        gate.lock(1);
        let g = Arc::clone(&gate);
        let stepped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stepped);
        let h = thread::spawn(move || {
            let _step = g.enter_step();
            flag.store(true, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(50));
        assert!(!stepped.load(Ordering::SeqCst));
        gate.unlock(1);
        h.join().unwrap();
        assert!(stepped.load(Ordering::SeqCst));
    }

    #[test]
    fn concurrent_locks_serialize() {
        let gate = Arc::new(QuiescenceGate::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4u64)
            .map(|id| {
                let gate = Arc::clone(&gate);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..20 {
                        gate.lock(id);
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        assert!(gate.unlock(id));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(!gate.is_locked());
    }

    #[test]
    fn busy_stepper_cannot_starve_observer() {
        let gate = Arc::new(QuiescenceGate::new());
        let stop = Arc::new(AtomicBool::new(false));
        let g = Arc::clone(&gate);
        let s = Arc::clone(&stop);
        let stepper = thread::spawn(move || {
            while !s.load(Ordering::SeqCst) {
                let _step = g.enter_step();
                thread::sleep(Duration::from_millis(1));
            }
        });
        for id in 0..5 {
            assert!(gate.lock_timeout(id, Duration::from_secs(5)));
            assert!(!gate.step_in_flight());
            gate.unlock(id);
        }
        stop.store(true, Ordering::SeqCst);
        stepper.join().unwrap();
    }

    #[test]
    fn lock_timeout_gives_up() {
        let gate = QuiescenceGate::new();
        gate.lock(1);
        assert!(!gate.lock_timeout(2, Duration::from_millis(20)));
        assert!(gate.is_held_by(1));
        // The abandoned wait leaves no pending count behind.
        gate.unlock(1);
        let _step = gate.enter_step();
        assert!(gate.step_in_flight());
    }
}
