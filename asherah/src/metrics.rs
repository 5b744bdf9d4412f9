//! Metrics for the asherah library
//!
//! Metrics are an optional injected sink: nothing is recorded until a
//! [`MetricsSink`] is installed, and with no sink every helper is a no-op.
//! [`RecorderSink`] forwards to the `metrics` crate macros for hosts that
//! already run a metrics recorder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Sink for metrics emitted by the library
pub trait MetricsSink: Send + Sync {
    /// Records a counter increment
    fn increment_counter(&self, name: &'static str, value: u64);

    /// Records a duration for a named timer
    fn record_timer(&self, name: &'static str, duration: Duration);
}

/// A sink that forwards to the `metrics` crate macros
#[derive(Debug, Default)]
pub struct RecorderSink;

impl RecorderSink {
    /// Create a new recorder-backed sink
    pub fn new() -> Self {
        Self
    }

    /// Create a boxed instance
    pub fn boxed() -> Box<dyn MetricsSink> {
        Box::new(Self::new())
    }
}

impl MetricsSink for RecorderSink {
    fn increment_counter(&self, name: &'static str, value: u64) {
        metrics::counter!(name, value);
    }

    fn record_timer(&self, name: &'static str, duration: Duration) {
        metrics::histogram!(name, duration);
    }
}

static METRICS_ENABLED: AtomicBool = AtomicBool::new(false);
static METRICS_SINK: RwLock<Option<Box<dyn MetricsSink>>> = RwLock::new(None);

/// Installs a metrics sink and enables metrics collection
pub fn set_metrics_sink(sink: Box<dyn MetricsSink>) {
    let mut global = METRICS_SINK.write().unwrap_or_else(|e| e.into_inner());
    *global = Some(sink);
    METRICS_ENABLED.store(true, Ordering::SeqCst);
}

/// Disables metrics collection and removes the sink
pub fn disable_metrics() {
    let mut global = METRICS_SINK.write().unwrap_or_else(|e| e.into_inner());
    *global = None;
    METRICS_ENABLED.store(false, Ordering::SeqCst);
}

/// Returns true if a sink is installed
pub fn metrics_enabled() -> bool {
    METRICS_ENABLED.load(Ordering::SeqCst)
}

/// Increments a counter by one on the installed sink, if any
pub fn increment_counter(name: &'static str) {
    if metrics_enabled() {
        if let Some(sink) = METRICS_SINK.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            sink.increment_counter(name, 1);
        }
    }
}

/// Records a duration on the installed sink, if any
pub fn record_timer(name: &'static str, duration: Duration) {
    if metrics_enabled() {
        if let Some(sink) = METRICS_SINK.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            sink.record_timer(name, duration);
        }
    }
}

/// Times a scope; the elapsed duration is recorded when the guard drops
#[derive(Debug)]
pub struct Timer {
    name: &'static str,
    started: Instant,
}

impl Timer {
    /// Starts a timer for the named metric
    pub fn start(name: &'static str) -> Self {
        Self {
            name,
            started: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        record_timer(self.name, self.started.elapsed());
    }
}
