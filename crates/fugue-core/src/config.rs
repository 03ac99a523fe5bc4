//! Runtime configuration

use crate::error::{RuntimeError, RuntimeResult};
use fugue_scheduler::{OptimizerConfig, SchedulerConfig};
use fugue_types::ResourceDescription;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Background schedule optimizer
    #[serde(default)]
    pub optimizer: OptimizerSection,
    /// Executors of the local worker
    #[serde(default)]
    pub executor: ExecutorSection,
    /// Scheduling tunables
    #[serde(default)]
    pub scheduler: SchedulerSection,
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> RuntimeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| RuntimeError::Config(format!("{}: {}", path.display(), e)))
    }
}

/// Optimizer pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerSection {
    /// Whether [`crate::Runtime::start_optimizer`] spawns the loop
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Milliseconds between optimization rounds
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    /// Milliseconds before the first round
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_period_ms() -> u64 {
    5000
}

fn default_initial_delay_ms() -> u64 {
    500
}

impl Default for OptimizerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            period_ms: default_period_ms(),
            initial_delay_ms: default_initial_delay_ms(),
        }
    }
}

impl OptimizerSection {
    /// Pacing handed to the optimizer loop
    pub fn to_optimizer_config(&self) -> OptimizerConfig {
        OptimizerConfig {
            period: Duration::from_millis(self.period_ms),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
        }
    }
}

/// Executors and resources of the local worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSection {
    /// Executor threads per worker
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Base directory for sandboxes and renamed files
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    /// CPU computing units
    #[serde(default = "default_cpu_units")]
    pub cpu_units: u32,
    /// GPU computing units
    #[serde(default)]
    pub gpu_units: u32,
    /// FPGA computing units
    #[serde(default)]
    pub fpga_units: u32,
    /// Memory in megabytes
    #[serde(default)]
    pub memory_mb: u64,
}

fn default_threads() -> usize {
    4
}

fn default_working_dir() -> PathBuf {
    std::env::temp_dir().join("fugue")
}

fn default_cpu_units() -> u32 {
    4
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            working_dir: default_working_dir(),
            cpu_units: default_cpu_units(),
            gpu_units: 0,
            fpga_units: 0,
            memory_mb: 0,
        }
    }
}

impl ExecutorSection {
    /// Resources offered by the local worker
    pub fn resources(&self) -> ResourceDescription {
        ResourceDescription::new(self.cpu_units, self.gpu_units, self.fpga_units, self.memory_mb)
    }
}

/// Scheduling tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// Score penalty (ms) per parameter to transfer
    #[serde(default = "default_data_transfer_delay")]
    pub data_transfer_delay: u64,
    /// Retries granted to tasks with the retry policy
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_data_transfer_delay() -> u64 {
    200
}

fn default_max_retries() -> u32 {
    3
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            data_transfer_delay: default_data_transfer_delay(),
            max_retries: default_max_retries(),
        }
    }
}

impl SchedulerSection {
    /// Tunables handed to the task scheduler
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            data_transfer_delay: self.data_transfer_delay,
            max_retries: self.max_retries,
        }
    }
}

/// Log output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert!(config.optimizer.enabled);
        assert_eq!(config.optimizer.period_ms, 5000);
        assert_eq!(config.optimizer.initial_delay_ms, 500);
        assert_eq!(config.executor.threads, 4);
        assert_eq!(config.scheduler.data_transfer_delay, 200);
        assert_eq!(config.scheduler.max_retries, 3);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"executor": {"cpu_units": 8, "gpu_units": 2}, "logging": {"json": true}}"#)
                .unwrap();
        assert_eq!(config.executor.resources(), ResourceDescription::new(8, 2, 0, 0));
        assert_eq!(config.executor.threads, 4);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.scheduler.max_retries, 3);
    }

    #[test]
    fn test_conversions() {
        let config = RuntimeConfig::default();
        let optimizer = config.optimizer.to_optimizer_config();
        assert_eq!(optimizer.period, Duration::from_millis(5000));
        assert_eq!(optimizer.initial_delay, Duration::from_millis(500));
        assert_eq!(config.scheduler.to_scheduler_config().max_retries, 3);
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"scheduler": {{"max_retries": 7}}}}"#).unwrap();
        let config = RuntimeConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.scheduler.max_retries, 7);

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        write!(broken, "{{not json").unwrap();
        assert!(matches!(
            RuntimeConfig::from_json_file(broken.path()),
            Err(RuntimeError::Config(_))
        ));
    }
}
