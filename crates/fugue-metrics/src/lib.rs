//! # fugue-metrics
//!
//! Observability for the Fugue runtime.
//!
//! The core subsystems never depend on a concrete tracing backend: they emit
//! opaque [`TraceEvent`] markers to an [`EventSink`]. This crate provides:
//! - The event marker vocabulary and the sink trait
//! - An RAII span that emits begin/end markers
//! - A [`Metrics`] store (counters, gauges, duration histograms) that is itself a sink
//! - JSON export through [`MetricsSnapshot`]

#![warn(missing_docs)]
#![warn(clippy::all)]

mod collector;
mod events;
mod export;
mod histogram;

pub use collector::{Metrics, MetricsCollector};
pub use events::{EventPhase, EventSink, EventSpan, NullSink, TraceEvent};
pub use export::{HistogramSummary, MetricsSnapshot};
pub use histogram::Histogram;
