//! Bookkeeping of submitted tasks

use crate::task::TaskState;
use fugue_data::{DataAccessId, DataRegistry};
use fugue_types::{ActionId, TaskId};
use parking_lot::{Condvar, Mutex};

/// Parameter of a task once its data accesses are registered
#[derive(Clone, Debug)]
pub(crate) enum Slot {
    Object(DataAccessId),
    File {
        access: DataAccessId,
        original_name: String,
    },
    Scalar(String),
}

impl Slot {
    pub(crate) fn access(&self) -> Option<&DataAccessId> {
        match self {
            Slot::Object(access) | Slot::File { access, .. } => Some(access),
            Slot::Scalar(_) => None,
        }
    }
}

#[derive(Debug)]
struct Progress {
    state: TaskState,
    worker: Option<String>,
    attempts: u32,
}

/// Everything the runtime remembers about a task
#[derive(Debug)]
pub(crate) struct TaskRecord {
    pub(crate) id: TaskId,
    pub(crate) action: ActionId,
    pub(crate) signature: String,
    pub(crate) slots: Vec<Slot>,
    pub(crate) target: Option<DataAccessId>,
    pub(crate) result: Option<DataAccessId>,
    progress: Mutex<Progress>,
    finished: Condvar,
}

impl TaskRecord {
    pub(crate) fn new(
        id: TaskId,
        action: ActionId,
        signature: String,
        slots: Vec<Slot>,
        target: Option<DataAccessId>,
        result: Option<DataAccessId>,
    ) -> Self {
        Self {
            id,
            action,
            signature,
            slots,
            target,
            result,
            progress: Mutex::new(Progress {
                state: TaskState::Pending,
                worker: None,
                attempts: 0,
            }),
            finished: Condvar::new(),
        }
    }

    /// Every data access of the task: parameters, target, then result
    pub(crate) fn accesses(&self) -> impl Iterator<Item = &DataAccessId> {
        self.slots
            .iter()
            .filter_map(Slot::access)
            .chain(self.target.iter())
            .chain(self.result.iter())
    }

    pub(crate) fn state(&self) -> TaskState {
        self.progress.lock().state.clone()
    }

    pub(crate) fn worker(&self) -> Option<String> {
        self.progress.lock().worker.clone()
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.progress.lock().attempts
    }

    /// A job for the task was handed to `worker`. False if the task already
    /// reached a final state.
    pub(crate) fn start_attempt(&self, worker: &str) -> bool {
        let mut p = self.progress.lock();
        if p.state.is_finished() {
            return false;
        }
        p.state = TaskState::Running;
        p.worker = Some(worker.to_string());
        p.attempts += 1;
        true
    }

    pub(crate) fn back_to_pending(&self) {
        let mut p = self.progress.lock();
        if !p.state.is_finished() {
            p.state = TaskState::Pending;
        }
    }

    /// Enter a final state and wake every waiter. Returns false if the task
    /// had already finished.
    pub(crate) fn finish(&self, state: TaskState) -> bool {
        let mut p = self.progress.lock();
        if p.state.is_finished() {
            return false;
        }
        p.state = state;
        self.finished.notify_all();
        true
    }

    /// Block until the task reaches a final state
    pub(crate) fn wait(&self) -> TaskState {
        let mut p = self.progress.lock();
        while !p.state.is_finished() {
            self.finished.wait(&mut p);
        }
        p.state.clone()
    }
}

/// Data accesses registered for a task being submitted.
///
/// Accesses still held when the batch is dropped without
/// [`AccessBatch::commit`] are cancelled.
pub(crate) struct AccessBatch<'a> {
    registry: &'a DataRegistry,
    registered: Vec<DataAccessId>,
    committed: bool,
}

impl<'a> AccessBatch<'a> {
    pub(crate) fn new(registry: &'a DataRegistry) -> Self {
        Self {
            registry,
            registered: Vec::new(),
            committed: false,
        }
    }

    pub(crate) fn push(&mut self, access: DataAccessId) -> DataAccessId {
        self.registered.push(access.clone());
        access
    }

    pub(crate) fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for AccessBatch<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for access in self.registered.drain(..).rev() {
            if let Err(e) = self.registry.cancel_access(&access) {
                tracing::warn!("Could not roll back access to {}: {}", access.data_id(), e);
            }
        }
    }
}
