//! Trace event markers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Opaque marker emitted by the runtime around interesting operations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraceEvent {
    /// A scheduled action is handed to the executor
    TaskDispatch,
    /// Implementation body runs
    TaskExecution,
    /// Job sandbox directory is created
    SandboxCreate,
    /// Job sandbox directory is removed
    SandboxRemove,
    /// File parameters are linked under their original names
    BindOriginalFiles,
    /// File parameters are moved back to their renamed slots
    UnbindOriginalFiles,
    /// Written-back values are stored in the data tracker
    StoreFinalValues,
    /// A value is fetched from the storage backend
    StorageGet,
    /// An action migrates between workers
    Donation,
    /// A worker timeline is rebuilt
    LocalOptimization,
}

impl TraceEvent {
    /// Every marker, in identifier order
    pub const ALL: [TraceEvent; 10] = [
        TraceEvent::TaskDispatch,
        TraceEvent::TaskExecution,
        TraceEvent::SandboxCreate,
        TraceEvent::SandboxRemove,
        TraceEvent::BindOriginalFiles,
        TraceEvent::UnbindOriginalFiles,
        TraceEvent::StoreFinalValues,
        TraceEvent::StorageGet,
        TraceEvent::Donation,
        TraceEvent::LocalOptimization,
    ];

    /// Numeric identifier understood by external trace viewers
    pub fn id(&self) -> u32 {
        match self {
            TraceEvent::TaskDispatch => 1,
            TraceEvent::TaskExecution => 2,
            TraceEvent::SandboxCreate => 3,
            TraceEvent::SandboxRemove => 4,
            TraceEvent::BindOriginalFiles => 5,
            TraceEvent::UnbindOriginalFiles => 6,
            TraceEvent::StoreFinalValues => 7,
            TraceEvent::StorageGet => 8,
            TraceEvent::Donation => 9,
            TraceEvent::LocalOptimization => 10,
        }
    }

    /// Stable metric name
    pub fn name(&self) -> &'static str {
        match self {
            TraceEvent::TaskDispatch => "task_dispatch",
            TraceEvent::TaskExecution => "task_execution",
            TraceEvent::SandboxCreate => "sandbox_create",
            TraceEvent::SandboxRemove => "sandbox_remove",
            TraceEvent::BindOriginalFiles => "bind_original_files",
            TraceEvent::UnbindOriginalFiles => "unbind_original_files",
            TraceEvent::StoreFinalValues => "store_final_values",
            TraceEvent::StorageGet => "storage_get",
            TraceEvent::Donation => "donation",
            TraceEvent::LocalOptimization => "local_optimization",
        }
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a marker opens or closes an operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventPhase {
    /// Operation starts
    Begin,
    /// Operation ends
    End,
}

/// Receiver of trace markers
pub trait EventSink: Send + Sync {
    /// Record a marker
    fn emit(&self, event: TraceEvent, phase: EventPhase);
}

/// Sink that drops every marker
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: TraceEvent, _phase: EventPhase) {}
}

/// Emits `Begin` on creation and `End` when dropped
pub struct EventSpan {
    sink: Arc<dyn EventSink>,
    event: TraceEvent,
}

impl EventSpan {
    /// Open a span on the given sink
    pub fn enter(sink: &Arc<dyn EventSink>, event: TraceEvent) -> Self {
        sink.emit(event, EventPhase::Begin);
        Self {
            sink: Arc::clone(sink),
            event,
        }
    }
}

impl Drop for EventSpan {
    fn drop(&mut self) {
        self.sink.emit(self.event, EventPhase::End);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(TraceEvent, EventPhase)>>);

    impl EventSink for Recorder {
        fn emit(&self, event: TraceEvent, phase: EventPhase) {
            self.0.lock().push((event, phase));
        }
    }

    #[test]
    fn test_span_emits_begin_and_end() {
        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn EventSink> = recorder.clone();
        {
            let _span = EventSpan::enter(&sink, TraceEvent::SandboxCreate);
        }
        let events = recorder.0.lock().clone();
        assert_eq!(
            events,
            vec![
                (TraceEvent::SandboxCreate, EventPhase::Begin),
                (TraceEvent::SandboxCreate, EventPhase::End)
            ]
        );
    }

    #[test]
    fn test_event_ids_are_unique() {
        let mut ids: Vec<u32> = TraceEvent::ALL.iter().map(|e| e.id()).collect();
        ids.dedup();
        assert_eq!(ids.len(), TraceEvent::ALL.len());
    }
}
