//! Metrics store

use crate::{EventPhase, EventSink, Histogram, TraceEvent};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Thread-safe metrics storage
///
/// Counters and gauges are created lazily on first use. As an [`EventSink`]
/// every `Begin` marker bumps the counter named after the event and the
/// `<event>.active` gauge, and every `End` marker decrements that gauge.
pub struct Metrics {
    histograms: RwLock<HashMap<String, Arc<Histogram>>>,
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,
    gauges: RwLock<HashMap<String, Arc<AtomicI64>>>,
}

impl Metrics {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            histograms: RwLock::new(HashMap::new()),
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
        }
    }

    fn histogram_entry(&self, name: &str) -> Arc<Histogram> {
        if let Some(h) = self.histograms.read().get(name) {
            return Arc::clone(h);
        }
        let mut histograms = self.histograms.write();
        Arc::clone(
            histograms
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Histogram::new())),
        )
    }

    fn counter_entry(&self, name: &str) -> Arc<AtomicU64> {
        if let Some(c) = self.counters.read().get(name) {
            return Arc::clone(c);
        }
        let mut counters = self.counters.write();
        Arc::clone(
            counters
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AtomicU64::new(0))),
        )
    }

    fn gauge_entry(&self, name: &str) -> Arc<AtomicI64> {
        if let Some(g) = self.gauges.read().get(name) {
            return Arc::clone(g);
        }
        let mut gauges = self.gauges.write();
        Arc::clone(
            gauges
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AtomicI64::new(0))),
        )
    }

    /// Record a duration in milliseconds
    pub fn histogram(&self, name: &str, value_ms: u64) {
        self.histogram_entry(name).observe(value_ms);
    }

    /// Increment a counter
    pub fn counter(&self, name: &str, delta: u64) {
        self.counter_entry(name).fetch_add(delta, Ordering::Relaxed);
    }

    /// Set a gauge
    pub fn gauge(&self, name: &str, value: i64) {
        self.gauge_entry(name).store(value, Ordering::Relaxed);
    }

    /// Add a (possibly negative) delta to a gauge
    pub fn gauge_add(&self, name: &str, delta: i64) {
        self.gauge_entry(name).fetch_add(delta, Ordering::Relaxed);
    }

    /// Histogram mean, if the histogram exists
    pub fn get_histogram_mean(&self, name: &str) -> Option<f64> {
        self.histograms.read().get(name).map(|h| h.mean())
    }

    /// Counter value, if the counter exists
    pub fn get_counter(&self, name: &str) -> Option<u64> {
        self.counters
            .read()
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
    }

    /// Gauge value, if the gauge exists
    pub fn get_gauge(&self, name: &str) -> Option<i64> {
        self.gauges
            .read()
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
    }

    /// All counters
    pub fn all_counters(&self) -> Vec<(String, u64)> {
        self.counters
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect()
    }

    /// All gauges
    pub fn all_gauges(&self) -> Vec<(String, i64)> {
        self.gauges
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect()
    }

    /// All histograms as (name, mean, count, max)
    pub fn all_histograms(&self) -> Vec<(String, f64, u64, u64)> {
        self.histograms
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.mean(), v.total_count(), v.max()))
            .collect()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for Metrics {
    fn emit(&self, event: TraceEvent, phase: EventPhase) {
        tracing::trace!(event = event.name(), id = event.id(), ?phase, "trace marker");
        let active = format!("{}.active", event.name());
        match phase {
            EventPhase::Begin => {
                self.counter(event.name(), 1);
                self.gauge_add(&active, 1);
            }
            EventPhase::End => self.gauge_add(&active, -1),
        }
    }
}

/// Owner of the process-wide metrics store
pub struct MetricsCollector {
    metrics: Arc<Metrics>,
}

impl MetricsCollector {
    /// Create a collector with an empty store
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Borrow the store
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Share the store
    pub fn shared(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// The store as a trace event sink
    pub fn sink(&self) -> Arc<dyn EventSink> {
        self.metrics.clone()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
