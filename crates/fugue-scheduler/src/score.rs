//! Lexicographic scores of scheduling candidates

use crate::action::Action;
use std::cmp::Ordering;

/// Data placement knowledge used by the resource score
pub trait LocalityOracle: Send + Sync {
    /// Parameters of `action` already on `worker` and parameters that must be transferred
    fn parameter_locality(&self, action: &Action, worker: &str) -> (u32, u32);
}

/// Oracle that knows nothing about data placement
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocality;

impl LocalityOracle for NoLocality {
    fn parameter_locality(&self, _action: &Action, _worker: &str) -> (u32, u32) {
        (0, 0)
    }
}

/// Score of running an action with some implementation on some worker.
///
/// Dimensions are compared in declaration order; the first that differs
/// decides. A greater score is a better candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Score {
    /// Action priority (higher is better)
    pub priority: i32,
    /// Group priority (lower is better)
    pub group_priority: i64,
    /// Data locality reward minus transfer penalty (higher is better)
    pub resource: i64,
    /// Time at which data and resources are available (lower is better)
    pub waiting: u64,
    /// Expected completion with this implementation (lower is better)
    pub implementation: u64,
}

impl Score {
    /// Resource score: `present * delay - missing * delay`
    pub fn resource_score(present: u32, missing: u32, transfer_delay: u64) -> i64 {
        let delay = transfer_delay as i64;
        present as i64 * delay - missing as i64 * delay
    }

    /// Whether `self` beats `other`
    pub fn is_better(&self, other: &Score) -> bool {
        self.cmp(other) == Ordering::Greater
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.group_priority.cmp(&self.group_priority))
            .then_with(|| self.resource.cmp(&other.resource))
            .then_with(|| other.waiting.cmp(&self.waiting))
            .then_with(|| other.implementation.cmp(&self.implementation))
    }
}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(resource: i64, waiting: u64, implementation: u64) -> Score {
        Score {
            priority: 0,
            group_priority: 0,
            resource,
            waiting,
            implementation,
        }
    }

    #[test]
    fn test_first_differing_dimension_wins() {
        // Better locality beats a much earlier start.
        assert!(score(200, 10_000, 10_000).is_better(&score(0, 0, 0)));
        assert!(score(0, 0, 500).is_better(&score(0, 100, 0)));
        assert!(score(0, 0, 100).is_better(&score(0, 0, 200)));
        assert!(!score(0, 0, 100).is_better(&score(0, 0, 100)));
    }

    #[test]
    fn test_priorities() {
        let mut high = score(0, 0, 0);
        high.priority = 1;
        assert!(high.is_better(&score(1000, 0, 0)));

        let mut late_group = score(0, 0, 0);
        late_group.group_priority = 3;
        assert!(score(0, 0, 0).is_better(&late_group));
    }

    #[test]
    fn test_resource_score() {
        assert_eq!(Score::resource_score(2, 1, 200), 200);
        assert_eq!(Score::resource_score(0, 3, 200), -600);
    }
}
