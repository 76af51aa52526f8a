//! RESOURCEINPUT: the thread-safe work-range supplier a rank's worker
//! threads pull from. One instance is shared by every worker thread in
//! a rank; the rank's walker thread pushes ranges in and calls
//! `term()` once no more ranges will arrive.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{MarfsError, MarfsResult};

/// One unit of walkable work: a reference-dir leaf (or a sub-range of
/// one, when a leaf is split further for load balancing) within a
/// namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkRange {
    pub ns_id: String,
    pub leaf_path: String,
}

#[derive(Default)]
struct Inner {
    logpath: Option<PathBuf>,
    queue: VecDeque<WorkRange>,
    clientcount: u32,
    terminated: bool,
    purged: bool,
}

/// Supplies `WorkRange`s to `clientcount` registered worker threads.
/// `waitforupdate` blocks until either a range is available or the
/// supplier has terminated with an empty queue; `waitforcomp` blocks
/// until every registered client has reported completion via `purge`.
pub struct ResourceInput {
    inner: Mutex<Inner>,
    has_work: Condvar,
    all_done: Condvar,
}

impl ResourceInput {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()), has_work: Condvar::new(), all_done: Condvar::new() }
    }

    pub fn setlogpath(&self, path: PathBuf) {
        self.inner.lock().logpath = Some(path);
    }

    pub fn logpath(&self) -> Option<PathBuf> {
        self.inner.lock().logpath.clone()
    }

    /// Register `n` worker threads expected to each eventually call
    /// `purge` once before the supplier can be considered drained.
    pub fn setrange(&self, ranges: impl IntoIterator<Item = WorkRange>, clientcount: u32) {
        let mut inner = self.inner.lock();
        inner.queue.extend(ranges);
        inner.clientcount = clientcount;
        self.has_work.notify_all();
    }

    /// Block until a range is available, the supplier terminates with
    /// nothing left, or `timeout` elapses.
    pub fn waitforupdate(&self, timeout: Duration) -> MarfsResult<Option<WorkRange>> {
        let mut inner = self.inner.lock();
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(range) = inner.queue.pop_front() {
                return Ok(Some(range));
            }
            if inner.terminated {
                return Ok(None);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(MarfsError::Timeout(timeout.as_secs()));
            }
            let result = self.has_work.wait_for(&mut inner, remaining);
            if result.timed_out() && inner.queue.is_empty() && !inner.terminated {
                return Err(MarfsError::Timeout(timeout.as_secs()));
            }
        }
    }

    /// A worker thread reports it has consumed one unit of range and
    /// has no further work pending from it this round.
    pub fn purge(&self) {
        let mut inner = self.inner.lock();
        if inner.clientcount > 0 {
            inner.clientcount -= 1;
        }
        inner.purged = true;
        if inner.clientcount == 0 {
            self.all_done.notify_all();
        }
    }

    /// Block until every registered client has called `purge`.
    pub fn waitforcomp(&self, timeout: Duration) -> MarfsResult<()> {
        let mut inner = self.inner.lock();
        let deadline = Instant::now() + timeout;
        while inner.clientcount > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(MarfsError::Timeout(timeout.as_secs()));
            }
            self.all_done.wait_for(&mut inner, remaining);
        }
        Ok(())
    }

    /// Mark no further ranges will be pushed; wakes any blocked
    /// `waitforupdate` callers once the queue drains.
    pub fn term(&self) {
        let mut inner = self.inner.lock();
        inner.terminated = true;
        self.has_work.notify_all();
    }

    /// Block until `term` has been called and acknowledged by all
    /// waiters draining the queue. Two-phase quiescence handshake:
    /// `clientcount` is decremented on entry to the wait (the
    /// "prepare" phase, letting the master observe every client has
    /// parked here) and incremented back on exit (the "exit" phase,
    /// once termination has actually been observed).
    pub fn waitforterm(&self, timeout: Duration) -> MarfsResult<()> {
        let mut inner = self.inner.lock();
        if inner.clientcount > 0 {
            inner.clientcount -= 1;
        }
        self.all_done.notify_all();

        let deadline = Instant::now() + timeout;
        while !(inner.terminated && inner.queue.is_empty()) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                inner.clientcount += 1;
                self.all_done.notify_all();
                return Err(MarfsError::Timeout(timeout.as_secs()));
            }
            self.has_work.wait_for(&mut inner, remaining);
        }

        inner.clientcount += 1;
        self.all_done.notify_all();
        Ok(())
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.lock().terminated
    }

    pub fn remaining(&self) -> usize {
        self.inner.lock().queue.len()
    }
}

impl Default for ResourceInput {
    fn default() -> Self {
        Self::new()
    }
}
