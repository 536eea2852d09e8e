//! Per-host state store.
//!
//! Every monitored host owns one [`Host`] slot holding the current and the
//! previous [`Snapshot`], the sampled log counters and the status of its
//! session. The slot is written by exactly one session thread and read by
//! the renderer; each slot has its own mutex so hosts never contend with
//! each other, and readers always get an owned copy ([`HostView`]).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::metrics::Snapshot;

/// Two most recent samples of a cumulative log line count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LogCounter {
    pub current: Option<u64>,
    pub previous: Option<u64>,
}

impl LogCounter {
    fn record(&mut self, count: u64) {
        self.previous = self.current;
        self.current = Some(count);
    }

    /// New lines between the last two samples. Unknown until two samples
    /// were seen; a shrinking count (rotated log) reports 0.
    pub fn delta(&self) -> Option<u64> {
        Some(self.current?.saturating_sub(self.previous?))
    }
}

/// Connection state of a host's session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SessionStatus {
    /// Opening the transport
    #[default]
    Connecting,
    /// Transport open, cycles are flowing
    Streaming,
    /// Last attempt failed; waiting for the backoff to elapse
    Retrying { attempts: u32, last_error: String },
}

/// Owned copy of one host slot, safe to use without holding any lock.
#[derive(Clone, Debug)]
pub struct HostView {
    pub name: String,
    pub current: Snapshot,
    pub previous: Snapshot,
    pub errors: LogCounter,
    pub warnings: LogCounter,
    pub status: SessionStatus,
    /// Cycles applied since startup, across reconnects
    pub cycles: u64,
}

#[derive(Debug, Default)]
struct HostState {
    current: Snapshot,
    previous: Snapshot,
    errors: LogCounter,
    warnings: LogCounter,
    status: SessionStatus,
    cycles: u64,
}

/// One monitored host.
#[derive(Debug)]
pub struct Host {
    name: String,
    state: Mutex<HostState>,
}

impl Host {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(HostState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // A session that panicked mid-update must not take the renderer down.
    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a freshly decoded snapshot.
    ///
    /// The current snapshot moves to `previous` only when it carried a
    /// remote timestamp. After a cycle without `__DATE__` the last good
    /// snapshot therefore stays in `previous`, and the next good cycle
    /// computes its rates against it.
    pub fn apply_snapshot(&self, snapshot: Snapshot) {
        let mut state = self.lock();
        if let Some(count) = snapshot.error_count {
            state.errors.record(count);
        }
        if let Some(count) = snapshot.warn_count {
            state.warnings.record(count);
        }
        if state.current.is_authoritative() {
            state.previous = std::mem::replace(&mut state.current, snapshot);
        } else {
            state.current = snapshot;
        }
        state.cycles += 1;
    }

    /// Copy the slot out.
    pub fn read_snapshot(&self) -> HostView {
        let state = self.lock();
        HostView {
            name: self.name.clone(),
            current: state.current.clone(),
            previous: state.previous.clone(),
            errors: state.errors,
            warnings: state.warnings,
            status: state.status.clone(),
            cycles: state.cycles,
        }
    }

    pub fn set_status(&self, status: SessionStatus) {
        self.lock().status = status;
    }
}

/// All hosts, in configuration order.
#[derive(Debug, Default)]
pub struct HostStore {
    hosts: Vec<Arc<Host>>,
}

impl HostStore {
    /// Create one slot per host name. Duplicates are kept once.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut hosts: Vec<Arc<Host>> = Vec::new();
        for name in names {
            let name = name.into();
            if hosts.iter().all(|h| h.name() != name) {
                hosts.push(Arc::new(Host::new(name)));
            }
        }
        Self { hosts }
    }

    pub fn hosts(&self) -> &[Arc<Host>] {
        &self.hosts
    }

    /// Copy every slot, one lock at a time.
    pub fn read_all(&self) -> Vec<HostView> {
        self.hosts.iter().map(|h| h.read_snapshot()).collect()
    }
}
