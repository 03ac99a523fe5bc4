//! Metrics snapshot and JSON export

use crate::Metrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Point-in-time copy of every metric
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Counter values
    pub counters: BTreeMap<String, u64>,
    /// Gauge values
    pub gauges: BTreeMap<String, i64>,
    /// Histogram summaries
    pub histograms: BTreeMap<String, HistogramSummary>,
}

/// Summary of a duration histogram
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramSummary {
    /// Mean duration in milliseconds
    pub mean_ms: f64,
    /// Number of observations
    pub count: u64,
    /// Largest observation in milliseconds
    pub max_ms: u64,
}

impl MetricsSnapshot {
    /// Capture the current state of a store
    pub fn from_metrics(metrics: &Metrics) -> Self {
        Self {
            counters: metrics.all_counters().into_iter().collect(),
            gauges: metrics.all_gauges().into_iter().collect(),
            histograms: metrics
                .all_histograms()
                .into_iter()
                .map(|(name, mean_ms, count, max_ms)| {
                    (
                        name,
                        HistogramSummary {
                            mean_ms,
                            count,
                            max_ms,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Compact JSON
    pub fn to_json_compact(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
