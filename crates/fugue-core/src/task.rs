//! Task descriptions submitted to the runtime

use fugue_types::{CoreId, DataId, Direction, Implementation, OnFailure, TaskId};

/// One declared parameter of a task
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskParam {
    /// Tracked in-memory object
    Object {
        /// Datum accessed
        data: DataId,
        /// Access direction
        direction: Direction,
    },
    /// Tracked file, exposed to the task under `original_name`
    File {
        /// Datum accessed
        data: DataId,
        /// Access direction
        direction: Direction,
        /// Name the implementation opens inside its sandbox
        original_name: String,
    },
    /// Basic value passed verbatim
    Scalar(String),
}

impl TaskParam {
    /// Object parameter
    pub fn object(data: DataId, direction: Direction) -> Self {
        TaskParam::Object { data, direction }
    }

    /// File parameter
    pub fn file(data: DataId, direction: Direction, original_name: impl Into<String>) -> Self {
        TaskParam::File {
            data,
            direction,
            original_name: original_name.into(),
        }
    }

    /// Scalar parameter
    pub fn scalar(value: impl ToString) -> Self {
        TaskParam::Scalar(value.to_string())
    }

    /// Datum and direction of a tracked parameter
    pub fn access(&self) -> Option<(DataId, Direction)> {
        match self {
            TaskParam::Object { data, direction } | TaskParam::File { data, direction, .. } => {
                Some((*data, *direction))
            }
            TaskParam::Scalar(_) => None,
        }
    }
}

/// A method invocation to run asynchronously
#[derive(Clone, Debug)]
pub struct TaskDescription {
    /// Core element invoked
    pub core: CoreId,
    /// Candidate implementations
    pub implementations: Vec<Implementation>,
    /// Declared parameters
    pub params: Vec<TaskParam>,
    /// Object the method is invoked on; read and updated by the task
    pub target: Option<DataId>,
    /// Whether the method returns a value
    pub has_result: bool,
    /// Scheduled ahead of non-priority tasks
    pub priority: bool,
    /// Reaction to a failure
    pub on_failure: OnFailure,
}

impl TaskDescription {
    /// Task invoking `core` with any of `implementations`
    pub fn new(core: CoreId, implementations: Vec<Implementation>) -> Self {
        Self {
            core,
            implementations,
            params: Vec::new(),
            target: None,
            has_result: false,
            priority: false,
            on_failure: OnFailure::default(),
        }
    }

    /// Append a parameter
    pub fn with_param(mut self, param: TaskParam) -> Self {
        self.params.push(param);
        self
    }

    /// Invoke the method on `target`
    pub fn with_target(mut self, target: DataId) -> Self {
        self.target = Some(target);
        self
    }

    /// The method returns a value, tracked as a new datum
    pub fn returning(mut self) -> Self {
        self.has_result = true;
        self
    }

    /// Mark the task as high priority
    pub fn with_priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    /// Set the failure policy
    pub fn with_on_failure(mut self, on_failure: OnFailure) -> Self {
        self.on_failure = on_failure;
        self
    }

    /// Signature shown in errors
    pub fn signature(&self) -> String {
        self.implementations
            .first()
            .map(|i| i.signature.clone())
            .unwrap_or_else(|| self.core.to_string())
    }
}

/// What [`crate::Runtime::submit_task`] hands back
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskHandle {
    /// Task identifier
    pub task: TaskId,
    /// Datum receiving the return value, if the method returns one
    pub result: Option<DataId>,
}

/// Lifecycle of a submitted task
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for its predecessors or a worker
    Pending,
    /// A job is running it
    Running,
    /// Finished successfully
    Completed,
    /// Failed; successors were handled by the failure policy
    Failed(String),
    /// Cancelled because a predecessor failed
    Cancelled,
}

impl TaskState {
    /// Whether the task reached a final state
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed(_) | TaskState::Cancelled)
    }
}
