//! Prometheus metrics for the crawl scheduler
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all scheduler metrics
struct SchedulerMetrics {
    task_outcomes: CounterVec,
    task_errors: CounterVec,
    ticks: CounterVec,
    session_failures: CounterVec,
    admission_size: GaugeVec,
    fetch_duration: HistogramVec,
}

/// Global storage for scheduler metrics
static SCHEDULER_METRICS: OnceLock<SchedulerMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers anything.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = harvester::metrics::init_metrics() {
///     tracing::warn!("Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = SchedulerMetrics {
        task_outcomes: register_counter_vec!(
            "harvester_task_outcomes_total",
            "Per-task results of scheduler steps",
            &["family", "outcome"]
        )?,
        task_errors: register_counter_vec!(
            "harvester_task_errors_total",
            "Scheduler steps that failed, by error category",
            &["family", "category"]
        )?,
        ticks: register_counter_vec!(
            "harvester_ticks_total",
            "Scheduler ticks by family and result",
            &["family", "result"]
        )?,
        session_failures: register_counter_vec!(
            "harvester_session_failures_total",
            "Sessions revoked or throttled by the remote service",
            &["kind"]
        )?,
        admission_size: register_gauge_vec!(
            "harvester_admission_size",
            "Members of the admission set at tick start",
            &["family"]
        )?,
        fetch_duration: register_histogram_vec!(
            "harvester_fetch_duration_seconds",
            "Remote page fetch duration in seconds",
            &["family"],
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0]
        )?,
    };

    SCHEDULER_METRICS
        .set(metrics)
        .map_err(|_| "Scheduler metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    SCHEDULER_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record what happened to one task in a tick
pub fn record_task_outcome(family: &str, outcome: &str) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.task_outcomes.with_label_values(&[family, outcome]).inc();
    }
}

/// Record a failed scheduler step under its error category
pub fn record_task_error(family: &str, category: &str) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.task_errors.with_label_values(&[family, category]).inc();
    }
}

/// Record a finished tick
pub fn record_tick(family: &str, result: &str) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.ticks.with_label_values(&[family, result]).inc();
    }
}

/// Record a session failure (`revoked`, `rate_limited` or `blocked`)
pub fn record_session_failure(kind: &str) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.session_failures.with_label_values(&[kind]).inc();
    }
}

/// Publish the admission set size seen at tick start
pub fn set_admission_size(family: &str, size: usize) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.admission_size
            .with_label_values(&[family])
            .set(size as f64);
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a fetch timer for a family
pub fn start_fetch_timer(family: &str) -> MetricsTimer {
    match SCHEDULER_METRICS.get() {
        Some(m) => MetricsTimer::new(m.fetch_duration.with_label_values(&[family]).start_timer()),
        None => MetricsTimer::noop(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ensure_metrics_initialized() {
        let _ = init_metrics();
    }

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(metrics_initialized());
    }

    #[test]
    fn test_encode_metrics() {
        ensure_metrics_initialized();
        record_tick("posts", "ok");
        let text = encode_metrics().unwrap();
        assert!(text.contains("harvester_ticks_total"));
    }

    #[test]
    fn test_recorders_do_not_panic() {
        ensure_metrics_initialized();
        record_task_outcome("replies", "advanced");
        record_task_error("replies", "storage");
        record_session_failure("rate_limited");
        set_admission_size("posts", 20);
        let _timer = start_fetch_timer("posts");
    }
}
