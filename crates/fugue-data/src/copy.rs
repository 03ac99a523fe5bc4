//! In-flight copy tracking

use crate::DataLocation;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

static NEXT_COPY_ID: AtomicU64 = AtomicU64::new(1);

/// Counts outstanding operations and wakes waiters once all of them ended
#[derive(Debug, Default)]
pub struct CopyBarrier {
    pending: Mutex<usize>,
    cv: Condvar,
}

impl CopyBarrier {
    /// Create a barrier with no pending operation
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// One more operation to wait for
    pub fn add_operation(&self) {
        *self.pending.lock() += 1;
    }

    /// One operation ended
    pub fn operation_done(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.cv.notify_all();
        }
    }

    /// Operations still pending
    pub fn pending(&self) -> usize {
        *self.pending.lock()
    }

    /// Block until no operation is pending or the timeout elapses
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut pending = self.pending.lock();
        if *pending > 0 {
            self.cv.wait_for(&mut pending, timeout);
        }
        *pending == 0
    }
}

#[derive(Debug, Default)]
struct CopyState {
    finished: bool,
    listeners: Vec<Arc<CopyBarrier>>,
}

/// A transfer of a value towards a target location
#[derive(Debug)]
pub struct DataCopy {
    id: u64,
    source: String,
    target: DataLocation,
    state: Mutex<CopyState>,
}

impl DataCopy {
    /// Start describing a copy of `source` into `target`
    pub fn new(source: impl Into<String>, target: DataLocation) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_COPY_ID.fetch_add(1, Ordering::Relaxed),
            source: source.into(),
            target,
            state: Mutex::new(CopyState::default()),
        })
    }

    /// Unique copy identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the data being copied
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Destination
    pub fn target(&self) -> &DataLocation {
        &self.target
    }

    /// Whether the transfer ended
    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Notify `barrier` when the transfer ends (immediately if it already did)
    pub fn add_listener(&self, barrier: Arc<CopyBarrier>) {
        let mut state = self.state.lock();
        if state.finished {
            drop(state);
            barrier.operation_done();
        } else {
            state.listeners.push(barrier);
        }
    }

    /// Mark the transfer as ended and notify listeners
    pub fn finish(&self) {
        let listeners = {
            let mut state = self.state.lock();
            state.finished = true;
            std::mem::take(&mut state.listeners)
        };
        for barrier in listeners {
            barrier.operation_done();
        }
    }
}
