//! Orderings used by scheduling and optimization

use fugue_types::{ActionId, WorkerId};
use std::cmp::Ordering;

/// Fields the orderings look at
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActionKey {
    /// Action
    pub id: ActionId,
    /// Priority (higher first)
    pub priority: i32,
    /// Expected start (ms)
    pub expected_start: u64,
    /// Expected end (ms)
    pub expected_end: u64,
}

/// Which action to start first: priority descending, then id ascending
pub fn selection(a: &ActionKey, b: &ActionKey) -> Ordering {
    b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id))
}

/// Which action to donate first: expected end descending, then id ascending
pub fn donation(a: &ActionKey, b: &ActionKey) -> Ordering {
    b.expected_end
        .cmp(&a.expected_end)
        .then_with(|| a.id.cmp(&b.id))
}

/// Scan order of a worker's actions: expected start descending, then id descending
pub fn scan(a: &ActionKey, b: &ActionKey) -> Ordering {
    b.expected_start
        .cmp(&a.expected_start)
        .then_with(|| b.id.cmp(&a.id))
}

/// Launch order of freed actions: expected start ascending, then id ascending
pub fn ready(a: &ActionKey, b: &ActionKey) -> Ordering {
    a.expected_start
        .cmp(&b.expected_start)
        .then_with(|| a.id.cmp(&b.id))
}

/// Receivers of donations: indicator ascending, then worker ascending
pub fn reception(a: &(u64, WorkerId), b: &(u64, WorkerId)) -> Ordering {
    a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1))
}
