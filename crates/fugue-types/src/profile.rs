//! Historical execution profile of an implementation on a worker

use serde::{Deserialize, Serialize};

/// Execution time statistics, in milliseconds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    executions: u64,
    min_time: u64,
    average_time: u64,
    max_time: u64,
}

impl Profile {
    /// Average assumed for implementations that never ran
    pub const DEFAULT_EXECUTION_TIME: u64 = 100;

    /// Create an empty profile with the default average
    pub fn new() -> Self {
        Self::with_average(Self::DEFAULT_EXECUTION_TIME)
    }

    /// Create an empty profile expecting the given average runtime
    pub fn with_average(average_ms: u64) -> Self {
        Self {
            executions: 0,
            min_time: u64::MAX,
            average_time: average_ms,
            max_time: 0,
        }
    }

    /// Account a measured execution
    pub fn accumulate(&mut self, elapsed_ms: u64) {
        let total = self.average_time as u128 * self.executions as u128 + elapsed_ms as u128;
        self.executions += 1;
        self.average_time = (total / self.executions as u128) as u64;
        self.min_time = self.min_time.min(elapsed_ms);
        self.max_time = self.max_time.max(elapsed_ms);
    }

    /// Number of measured executions
    pub fn execution_count(&self) -> u64 {
        self.executions
    }

    /// Average execution time
    pub fn average_execution_time(&self) -> u64 {
        self.average_time
    }

    /// Fastest measured execution, if any
    pub fn min_execution_time(&self) -> Option<u64> {
        (self.executions > 0).then_some(self.min_time)
    }

    /// Slowest measured execution, if any
    pub fn max_execution_time(&self) -> Option<u64> {
        (self.executions > 0).then_some(self.max_time)
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile() {
        let p = Profile::new();
        assert_eq!(p.execution_count(), 0);
        assert_eq!(p.average_execution_time(), Profile::DEFAULT_EXECUTION_TIME);
        assert_eq!(p.min_execution_time(), None);
    }

    #[test]
    fn test_accumulate_replaces_declared_average() {
        let mut p = Profile::with_average(1_000);
        p.accumulate(200);
        assert_eq!(p.average_execution_time(), 200);
        p.accumulate(400);
        assert_eq!(p.average_execution_time(), 300);
        assert_eq!(p.min_execution_time(), Some(200));
        assert_eq!(p.max_execution_time(), Some(400));
    }
}
