//! Job descriptions handed to the executor

use fugue_data::{DataInstance, DataValue};
use fugue_types::{Direction, Implementation, OnFailure, TaskId};
use std::path::{Path, PathBuf};

/// File parameter: the renamed backing file plus the name the task expects
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileParam {
    /// Name the implementation opens
    pub original_name: String,
    /// Location of the versioned backing file
    pub renamed: PathBuf,
    pub(crate) bound: Option<PathBuf>,
}

impl FileParam {
    /// Path the implementation must use: the in-sandbox name while bound,
    /// the renamed file otherwise
    pub fn path(&self) -> &Path {
        self.bound.as_deref().unwrap_or(&self.renamed)
    }

    /// Whether the file is currently exposed under its original name
    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }
}

/// In-memory object parameter
#[derive(Clone, Debug)]
pub struct ObjectParam {
    /// Version the final value is written to
    pub instance: Option<DataInstance>,
    /// Current value
    pub value: Option<DataValue>,
    was_persistent: bool,
}

impl ObjectParam {
    /// Whether the value was already a persistent object before the job ran
    pub fn was_persistent(&self) -> bool {
        self.was_persistent
    }

    /// Whether running the job turned a plain object into a persistent one
    pub fn became_persistent(&self) -> bool {
        !self.was_persistent
            && self
                .value
                .as_ref()
                .map_or(false, |v| v.persistent_id().is_some())
    }
}

/// Value carried by a parameter
#[derive(Clone, Debug)]
pub enum ParamValue {
    /// Renamed file
    File(FileParam),
    /// In-memory object
    Object(ObjectParam),
    /// Basic value passed verbatim
    Scalar(String),
    /// Nested parameters
    Collection(Vec<InvocationParam>),
}

/// One parameter of a job
#[derive(Clone, Debug)]
pub struct InvocationParam {
    /// Formal parameter name
    pub name: String,
    /// Access direction
    pub direction: Direction,
    /// Value
    pub value: ParamValue,
    /// The value produced by the job must be written back to the data tracker
    pub write_final_value: bool,
    /// Use the renamed file directly instead of binding the original name
    pub keep_rename: bool,
}

impl InvocationParam {
    /// File parameter
    pub fn file(
        name: impl Into<String>,
        direction: Direction,
        original_name: impl Into<String>,
        renamed: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            value: ParamValue::File(FileParam {
                original_name: original_name.into(),
                renamed: renamed.into(),
                bound: None,
            }),
            write_final_value: direction.writes(),
            keep_rename: false,
        }
    }

    /// Object parameter. `instance` is the version receiving the final value.
    pub fn object(
        name: impl Into<String>,
        direction: Direction,
        instance: Option<DataInstance>,
        value: Option<DataValue>,
    ) -> Self {
        let was_persistent = value.as_ref().map_or(false, |v| v.persistent_id().is_some());
        Self {
            name: name.into(),
            direction,
            value: ParamValue::Object(ObjectParam {
                instance,
                value,
                was_persistent,
            }),
            write_final_value: direction.writes(),
            keep_rename: false,
        }
    }

    /// Basic value
    pub fn scalar(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::In,
            value: ParamValue::Scalar(value.into()),
            write_final_value: false,
            keep_rename: false,
        }
    }

    /// Collection of parameters
    pub fn collection(name: impl Into<String>, direction: Direction, elements: Vec<InvocationParam>) -> Self {
        Self {
            name: name.into(),
            direction,
            value: ParamValue::Collection(elements),
            write_final_value: false,
            keep_rename: false,
        }
    }

    /// Keep the renamed file name inside the job
    pub fn with_keep_rename(mut self) -> Self {
        self.keep_rename = true;
        self
    }

    /// Override whether the final value is written back
    pub fn with_write_final_value(mut self, write: bool) -> Self {
        self.write_final_value = write;
        self
    }

    /// File view of the parameter
    pub fn as_file(&self) -> Option<&FileParam> {
        match &self.value {
            ParamValue::File(f) => Some(f),
            _ => None,
        }
    }

    /// Object view of the parameter
    pub fn as_object(&self) -> Option<&ObjectParam> {
        match &self.value {
            ParamValue::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Current object value, if this is an object parameter holding one
    pub fn object_value(&self) -> Option<&DataValue> {
        self.as_object().and_then(|o| o.value.as_ref())
    }

    /// Replace the object value. Returns false for non-object parameters.
    pub fn set_object_value(&mut self, value: DataValue) -> bool {
        match &mut self.value {
            ParamValue::Object(o) => {
                o.value = Some(value);
                true
            }
            _ => false,
        }
    }

    /// Command-line rendering used by external executables
    pub fn command_arg(&self) -> Option<String> {
        match &self.value {
            ParamValue::File(f) => Some(f.path().display().to_string()),
            ParamValue::Scalar(s) => Some(s.clone()),
            ParamValue::Object(_) => None,
            ParamValue::Collection(elements) => Some(
                elements
                    .iter()
                    .filter_map(|e| e.command_arg())
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
        }
    }

    /// Visit this parameter and every nested one, depth first
    pub(crate) fn for_each_leaf<'a>(&'a self, f: &mut impl FnMut(&'a InvocationParam)) {
        match &self.value {
            ParamValue::Collection(elements) => elements.iter().for_each(|e| e.for_each_leaf(f)),
            _ => f(self),
        }
    }

    pub(crate) fn for_each_leaf_mut(&mut self, f: &mut impl FnMut(&mut InvocationParam)) {
        match &mut self.value {
            ParamValue::Collection(elements) => elements.iter_mut().for_each(|e| e.for_each_leaf_mut(f)),
            _ => f(self),
        }
    }
}

/// Everything the executor needs to run one task attempt
#[derive(Clone, Debug)]
pub struct Invocation {
    /// Job identifier, unique per attempt
    pub job_id: u64,
    /// Task this job runs
    pub task_id: TaskId,
    /// Implementation chosen by the scheduler
    pub implementation: Implementation,
    /// Declared parameters
    pub params: Vec<InvocationParam>,
    /// Object the method is invoked on
    pub target: Option<InvocationParam>,
    /// Return values
    pub results: Vec<InvocationParam>,
    /// Failure policy of the task
    pub on_failure: OnFailure,
    /// Additional hosts assigned to a multi-node job
    pub slave_hosts: Vec<String>,
}

impl Invocation {
    /// Create a job with no parameters
    pub fn new(job_id: u64, task_id: TaskId, implementation: Implementation) -> Self {
        Self {
            job_id,
            task_id,
            implementation,
            params: Vec::new(),
            target: None,
            results: Vec::new(),
            on_failure: OnFailure::default(),
            slave_hosts: Vec::new(),
        }
    }

    /// Set the parameters
    pub fn with_params(mut self, params: Vec<InvocationParam>) -> Self {
        self.params = params;
        self
    }

    /// Set the target object
    pub fn with_target(mut self, target: InvocationParam) -> Self {
        self.target = Some(target);
        self
    }

    /// Set the return values
    pub fn with_results(mut self, results: Vec<InvocationParam>) -> Self {
        self.results = results;
        self
    }

    /// Set the failure policy
    pub fn with_on_failure(mut self, on_failure: OnFailure) -> Self {
        self.on_failure = on_failure;
        self
    }

    /// Set the extra hosts of a multi-node job
    pub fn with_slave_hosts(mut self, hosts: Vec<String>) -> Self {
        self.slave_hosts = hosts;
        self
    }

    /// Parameters, then target, then results
    pub fn all_params(&self) -> impl Iterator<Item = &InvocationParam> {
        self.params
            .iter()
            .chain(self.target.iter())
            .chain(self.results.iter())
    }

    /// Mutable counterpart of [`Invocation::all_params`]
    pub fn all_params_mut(&mut self) -> impl Iterator<Item = &mut InvocationParam> {
        self.params
            .iter_mut()
            .chain(self.target.iter_mut())
            .chain(self.results.iter_mut())
    }

    /// Leaf parameters (collections flattened), in declaration order
    pub fn leaf_params(&self) -> Vec<&InvocationParam> {
        let mut leaves = Vec::new();
        for p in self.all_params() {
            p.for_each_leaf(&mut |leaf| leaves.push(leaf));
        }
        leaves
    }

    /// First return value
    pub fn result_mut(&mut self) -> Option<&mut InvocationParam> {
        self.results.first_mut()
    }
}
