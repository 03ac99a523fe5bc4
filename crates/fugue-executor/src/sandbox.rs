//! Per-job working directories
//!
//! Every job runs inside a sandbox directory. File parameters live under
//! versioned names (`d3v2`) in the shared working directory; before the job
//! starts they are exposed inside the sandbox under the names the
//! implementation expects, and afterwards the results are moved back.
//!
//! - IN/INOUT files whose backing file exists get a symbolic link.
//! - OUT files are expected to be created by the job under the original
//!   name; they are moved into the renamed slot once the job ends.
//! - A sandbox configured by the implementation (specific working dir) is
//!   shared between jobs and never removed. When two jobs bind the same
//!   name there, the link to the newest version wins.

use crate::error::{ExecutionError, ExecutionResult};
use crate::invocation::{Invocation, InvocationParam, ParamValue};
use fugue_metrics::{EventSink, EventSpan, TraceEvent};
use fugue_types::OnFailure;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Working directory of one job
pub struct TaskSandbox {
    dir: PathBuf,
    specific: bool,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for TaskSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSandbox")
            .field("dir", &self.dir)
            .field("specific", &self.specific)
            .finish()
    }
}

impl TaskSandbox {
    /// Create the sandbox of `invocation` under `base`
    pub fn create(base: &Path, invocation: &Invocation, sink: &Arc<dyn EventSink>) -> ExecutionResult<Self> {
        let _span = EventSpan::enter(sink, TraceEvent::SandboxCreate);
        let specific_dir = invocation
            .implementation
            .specific_working_dir()
            .filter(|dir| !dir.as_os_str().is_empty());

        let sandbox = match specific_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                Self {
                    dir: dir.to_path_buf(),
                    specific: true,
                    sink: Arc::clone(sink),
                }
            }
            None => {
                let dir = base.join("sandbox").join(format!("job_{}", invocation.job_id));
                if dir.exists() {
                    tracing::debug!("Deleting stale sandbox {}", dir.display());
                    if let Err(e) = fs::remove_dir_all(&dir) {
                        tracing::warn!("Cannot delete stale sandbox {}: {}", dir.display(), e);
                    }
                }
                fs::create_dir_all(&dir)?;
                Self {
                    dir,
                    specific: false,
                    sink: Arc::clone(sink),
                }
            }
        };
        tracing::debug!("Job {} runs in {}", invocation.job_id, sandbox.dir.display());
        Ok(sandbox)
    }

    /// Sandbox directory
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Whether the directory was configured by the implementation
    pub fn is_specific(&self) -> bool {
        self.specific
    }

    /// Expose every file parameter under its original name
    pub fn bind_original_files(&self, invocation: &mut Invocation) -> ExecutionResult<()> {
        let _span = EventSpan::enter(&self.sink, TraceEvent::BindOriginalFiles);
        for param in invocation.all_params_mut() {
            if param.keep_rename {
                tracing::debug!("Parameter {} keeps its rename", param.name);
                continue;
            }
            let mut result = Ok(());
            param.for_each_leaf_mut(&mut |leaf| {
                if result.is_ok() {
                    result = self.bind_param(leaf);
                }
            });
            result?;
        }
        Ok(())
    }

    fn bind_param(&self, param: &mut InvocationParam) -> io::Result<()> {
        if param.keep_rename {
            return Ok(());
        }
        let file = match &mut param.value {
            ParamValue::File(f) => f,
            _ => return Ok(()),
        };
        let renamed_name = file_name(&file.renamed);
        if renamed_name == file.original_name {
            return Ok(());
        }

        let in_sandbox = self.dir.join(&file.original_name);
        file.bound = Some(in_sandbox.clone());
        if !file.renamed.exists() {
            return Ok(());
        }
        match fs::symlink_metadata(&in_sandbox) {
            Err(_) => {
                tracing::debug!("Linking {} to {}", in_sandbox.display(), file.renamed.display());
                symlink(&file.renamed, &in_sandbox)?;
            }
            Ok(meta) if meta.file_type().is_symlink() => {
                let previous = fs::read_link(&in_sandbox)?;
                if is_major_version(&renamed_name, &file_name(&previous)) {
                    tracing::debug!(
                        "Replacing link {} to {} with {}",
                        in_sandbox.display(),
                        previous.display(),
                        file.renamed.display()
                    );
                    fs::remove_file(&in_sandbox)?;
                    symlink(&file.renamed, &in_sandbox)?;
                }
            }
            Ok(_) => {}
        }
        Ok(())
    }

    /// Undo [`TaskSandbox::bind_original_files`]: drop links and move produced
    /// files to their renamed slots. When the job `already_failed`, problems
    /// are only logged.
    pub fn unbind_original_files(&self, invocation: &mut Invocation, already_failed: bool) -> ExecutionResult<()> {
        let _span = EventSpan::enter(&self.sink, TraceEvent::UnbindOriginalFiles);
        let on_failure = invocation.on_failure;
        let guaranteed = invocation.implementation.guarantees_output();
        let signature = invocation.implementation.signature.clone();

        let mut errors: Vec<ExecutionError> = Vec::new();
        for param in invocation.all_params_mut() {
            if param.keep_rename {
                continue;
            }
            param.for_each_leaf_mut(&mut |leaf| {
                if let Err(e) = unbind_param(leaf, on_failure, guaranteed, &signature) {
                    errors.push(e);
                }
            });
        }

        if errors.is_empty() {
            return Ok(());
        }
        if already_failed {
            for e in &errors {
                tracing::warn!("Job {} after failure: {}", invocation.job_id, e);
            }
            return Ok(());
        }
        if errors.len() == 1 {
            return Err(errors.remove(0));
        }
        Err(ExecutionError::JobExecution(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        ))
    }

    /// Remove the sandbox unless it is a specific working directory
    pub fn clean(self) {
        if self.specific || !self.dir.is_dir() {
            return;
        }
        let _span = EventSpan::enter(&self.sink, TraceEvent::SandboxRemove);
        tracing::debug!("Deleting sandbox {}", self.dir.display());
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            tracing::warn!("Error deleting sandbox {}: {}", self.dir.display(), e);
        }
    }
}

fn unbind_param(
    param: &mut InvocationParam,
    on_failure: OnFailure,
    guaranteed: bool,
    signature: &str,
) -> ExecutionResult<()> {
    let writes = param.direction.writes();
    let file = match &mut param.value {
        ParamValue::File(f) => f,
        _ => return Ok(()),
    };
    let in_sandbox = match file.bound.take() {
        Some(path) if path != file.renamed => path,
        _ => return Ok(()),
    };
    let entry = fs::symlink_metadata(&in_sandbox).ok();

    if file.renamed.exists() {
        match entry {
            Some(meta) if meta.file_type().is_symlink() => {
                tracing::debug!("Deleting link {}", in_sandbox.display());
                fs::remove_file(&in_sandbox)?;
            }
            Some(_) => {
                tracing::debug!("Moving {} to {}", in_sandbox.display(), file.renamed.display());
                fs::remove_file(&file.renamed)?;
                move_file(&in_sandbox, &file.renamed)?;
            }
            None => tracing::debug!("Repeated data for {}", in_sandbox.display()),
        }
        return Ok(());
    }

    match entry {
        Some(meta) if meta.file_type().is_symlink() => {
            tracing::error!(
                "{} is a link but its target {} does not exist",
                in_sandbox.display(),
                file.renamed.display()
            );
            Err(ExecutionError::JobExecution(format!(
                "unexpected link {} to missing file {}",
                in_sandbox.display(),
                file.renamed.display()
            )))
        }
        Some(_) => {
            move_file(&in_sandbox, &file.renamed)?;
            Ok(())
        }
        None if !writes => {
            tracing::warn!("Input file {} vanished during the job", file.renamed.display());
            Ok(())
        }
        None => {
            if on_failure != OnFailure::Retry {
                tracing::debug!("Creating empty {} for failure management", file.renamed.display());
                fs::File::create(&file.renamed)?;
            }
            if guaranteed {
                Err(ExecutionError::MissingOutput {
                    path: in_sandbox,
                    signature: signature.to_string(),
                })
            } else {
                tracing::debug!("Output {} not created, implementation does not guarantee it", in_sandbox.display());
                Ok(())
            }
        }
    }
}

/// Fail if a file parameter of the job is missing after execution
pub fn check_job_files(invocation: &Invocation) -> ExecutionResult<()> {
    let mut missing: Vec<PathBuf> = Vec::new();
    for param in invocation.params.iter().chain(invocation.results.iter()) {
        param.for_each_leaf(&mut |leaf| {
            if let Some(file) = leaf.as_file() {
                if !file.path().exists() {
                    tracing::error!(
                        "File '{}' not generated by task with signature {}",
                        file.path().display(),
                        invocation.implementation.signature
                    );
                    missing.push(file.path().to_path_buf());
                }
            }
        });
    }
    match missing.into_iter().next() {
        Some(path) if invocation.implementation.guarantees_output() => Err(ExecutionError::MissingOutput {
            path,
            signature: invocation.implementation.signature.clone(),
        }),
        _ => Ok(()),
    }
}

/// Create empty files for every written file parameter the job left missing
pub fn create_empty_outputs(invocation: &Invocation) {
    for param in &invocation.params {
        param.for_each_leaf(&mut |leaf| {
            let file = match leaf.as_file() {
                Some(f) if leaf.direction.writes() => f,
                _ => return,
            };
            if !file.path().exists() {
                tracing::debug!("Creating blank file {}", file.path().display());
                if let Err(e) = fs::File::create(file.path()) {
                    tracing::error!("Cannot create blank file {}: {}", file.path().display(), e);
                }
            }
        });
    }
}

/// True when `newer` names a strictly higher version than `older`.
/// Names that do not follow the `d<id>v<version>` pattern never compare higher.
pub fn is_major_version(newer: &str, older: &str) -> bool {
    fn version(name: &str) -> Option<u64> {
        name.split('_').next()?.split('v').nth(1)?.parse().ok()
    }
    match (version(newer), version(older)) {
        (Some(a), Some(b)) => a > b,
        _ => false,
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Err(e) = fs::rename(from, to) {
        tracing::warn!("Rename of {} failed ({}), copying instead", from.display(), e);
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}
