//! Gaps and per-worker gap timelines

use fugue_types::{ActionId, ResourceDescription};
use std::fmt;

/// Unbounded end of a gap
pub const OPEN_END: u64 = u64::MAX;

/// Free resources from `initial_time` on, released by `origin`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Gap {
    initial_time: u64,
    end_time: u64,
    origin: Option<ActionId>,
    resources: ResourceDescription,
    capacity: u32,
}

impl Gap {
    /// Create a gap
    pub fn new(initial_time: u64, origin: Option<ActionId>, resources: ResourceDescription) -> Self {
        Self {
            initial_time,
            end_time: OPEN_END,
            origin,
            resources,
            capacity: resources.cpus + resources.gpus + resources.fpgas,
        }
    }

    /// Permanent background gap of a worker
    pub fn background(initial_time: u64, total: ResourceDescription) -> Self {
        Self::new(initial_time, None, total)
    }

    /// Time from which the resources are free
    pub fn initial_time(&self) -> u64 {
        self.initial_time
    }

    /// Time at which the resources stop being free
    pub fn end_time(&self) -> u64 {
        self.end_time
    }

    /// Action whose completion frees the resources
    pub fn origin(&self) -> Option<ActionId> {
        self.origin
    }

    /// Resources still free in this gap
    pub fn resources(&self) -> &ResourceDescription {
        &self.resources
    }

    /// Computing units the gap freed when it was created
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

impl fmt::Display for Gap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = self
            .origin
            .map(|o| o.to_string())
            .unwrap_or_else(|| "-".into());
        write!(
            f,
            "<{}, {}> from {} {} (capacity {})",
            self.initial_time,
            if self.end_time == OPEN_END { "inf".to_string() } else { self.end_time.to_string() },
            origin,
            self.resources,
            self.capacity
        )
    }
}

/// Gaps of one worker ordered by initial time
#[derive(Clone, Debug, Default)]
pub struct Timeline {
    gaps: Vec<Gap>,
}

impl Timeline {
    /// Timeline whose only gap holds the whole worker from `start`
    pub fn new(start: u64, total: ResourceDescription) -> Self {
        Self {
            gaps: vec![Gap::background(start, total)],
        }
    }

    /// Gaps, oldest first
    pub fn gaps(&self) -> &[Gap] {
        &self.gaps
    }

    /// Insert keeping the initial time order (after gaps with the same time)
    pub fn add_gap(&mut self, gap: Gap) {
        if gap.resources.is_dynamic_useless() {
            return;
        }
        let at = self
            .gaps
            .partition_point(|g| g.initial_time <= gap.initial_time);
        self.gaps.insert(at, gap);
    }

    /// Drop gaps with nothing left to offer
    pub fn remove_useless_gaps(&mut self) {
        self.gaps.retain(|g| !g.resources.is_dynamic_useless());
    }

    /// Take `requirements` out of the gaps.
    ///
    /// Gaps starting at or before `pivot` are visited latest first, then the
    /// later ones earliest first. Returns the origins of every gap something
    /// was taken from, in visiting order, and what could not be covered.
    pub fn reserve(
        &mut self,
        pivot: u64,
        requirements: &ResourceDescription,
    ) -> (Vec<Option<ActionId>>, ResourceDescription) {
        self.reserve_where(pivot, requirements, |_| true)
    }

    /// Like [`reserve`](Timeline::reserve), skipping gaps whose origin is not accepted
    pub fn reserve_where(
        &mut self,
        pivot: u64,
        requirements: &ResourceDescription,
        accept: impl Fn(Option<ActionId>) -> bool,
    ) -> (Vec<Option<ActionId>>, ResourceDescription) {
        let mut constraints = *requirements;
        let mut origins = Vec::new();
        let split = self.gaps.partition_point(|g| g.initial_time <= pivot);
        let order = (0..split).rev().chain(split..self.gaps.len());
        for idx in order {
            if constraints.is_dynamic_useless() {
                break;
            }
            let gap = &mut self.gaps[idx];
            if !accept(gap.origin) {
                continue;
            }
            let common = ResourceDescription::reduce_common_dynamics(&mut gap.resources, &mut constraints);
            if !common.is_dynamic_useless() {
                origins.push(gap.origin);
            }
        }
        self.remove_useless_gaps();
        (origins, constraints)
    }

    /// Resources free at or before `time`
    pub fn free_at(&self, time: u64) -> ResourceDescription {
        let mut free = ResourceDescription::EMPTY;
        for gap in self.gaps.iter().take_while(|g| g.initial_time <= time) {
            free.increase_dynamic(&gap.resources);
        }
        free
    }

    /// Earliest time at which `requirements` fit, if ever
    pub fn earliest_fit(&self, requirements: &ResourceDescription) -> Option<u64> {
        let mut free = ResourceDescription::EMPTY;
        if free.can_host_dynamic(requirements) {
            return Some(self.gaps.first().map(|g| g.initial_time).unwrap_or(0));
        }
        for gap in &self.gaps {
            free.increase_dynamic(&gap.resources);
            if free.can_host_dynamic(requirements) {
                return Some(gap.initial_time);
            }
        }
        None
    }

    /// Sum of every gap
    pub fn total(&self) -> ResourceDescription {
        self.free_at(OPEN_END)
    }

    /// Initial time of the latest gap
    pub fn last_gap_start(&self) -> u64 {
        self.gaps.last().map(|g| g.initial_time).unwrap_or(0)
    }

    /// Number of gaps
    pub fn len(&self) -> usize {
        self.gaps.len()
    }

    /// True when no resource is free at any time
    pub fn is_empty(&self) -> bool {
        self.gaps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_consumes_latest_gap_first() {
        let mut t = Timeline::new(0, ResourceDescription::cpus(2));
        t.add_gap(Gap::new(50, Some(ActionId::new(1)), ResourceDescription::cpus(2)));
        t.add_gap(Gap::new(80, Some(ActionId::new(2)), ResourceDescription::cpus(2)));

        let (origins, missing) = t.reserve(60, &ResourceDescription::cpus(3));
        assert!(missing.is_dynamic_useless());
        assert_eq!(origins, vec![Some(ActionId::new(1)), None]);
        assert_eq!(t.total(), ResourceDescription::cpus(3));
        assert_eq!(t.gaps()[0].resources().cpus, 1);
    }

    #[test]
    fn test_reserve_walks_forward_when_needed() {
        let mut t = Timeline::new(0, ResourceDescription::cpus(1));
        t.add_gap(Gap::new(100, Some(ActionId::new(7)), ResourceDescription::cpus(3)));

        let (origins, _) = t.reserve(0, &ResourceDescription::cpus(4));
        assert_eq!(origins, vec![None, Some(ActionId::new(7))]);
        assert!(t.is_empty());
    }

    #[test]
    fn test_reserve_where_skips_rejected_origins() {
        let mut t = Timeline::new(0, ResourceDescription::cpus(1));
        t.add_gap(Gap::new(0, Some(ActionId::new(5)), ResourceDescription::cpus(1)));

        let (origins, missing) =
            t.reserve_where(0, &ResourceDescription::cpus(1), |o| o != Some(ActionId::new(5)));
        assert!(missing.is_dynamic_useless());
        assert_eq!(origins, vec![None]);
        assert_eq!(t.gaps()[0].origin(), Some(ActionId::new(5)));
    }

    #[test]
    fn test_earliest_fit_and_free_at() {
        let mut t = Timeline::new(0, ResourceDescription::cpus(1));
        t.add_gap(Gap::new(100, Some(ActionId::new(1)), ResourceDescription::cpus(3)));
        assert_eq!(t.earliest_fit(&ResourceDescription::cpus(1)), Some(0));
        assert_eq!(t.earliest_fit(&ResourceDescription::cpus(4)), Some(100));
        assert_eq!(t.earliest_fit(&ResourceDescription::cpus(5)), None);
        assert_eq!(t.free_at(99), ResourceDescription::cpus(1));
        assert_eq!(t.last_gap_start(), 100);
    }

    #[test]
    fn test_useless_gap_not_added() {
        let mut t = Timeline::new(0, ResourceDescription::cpus(1));
        t.add_gap(Gap::new(10, Some(ActionId::new(1)), ResourceDescription::EMPTY));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_gap_display() {
        let gap = Gap::background(0, ResourceDescription::cpus(4));
        assert_eq!(gap.capacity(), 4);
        assert!(gap.to_string().contains("inf"));
    }
}
