//! Prometheus metrics for VIRTA
//!
//! A single process-global [`Metrics`] instance, initialized once and read
//! through [`Metrics::get`]. Call sites never fail on missing metrics: they
//! guard with `if let Some(metrics) = Metrics::get()` so the pipeline works
//! identically in tests that never initialize the registry.

use crate::error::{GatewayError, Result};
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;
use virta_core::RecordType;

/// Global metrics instance
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// All VIRTA pipeline metrics
pub struct Metrics {
    // ─────────────────────────────────────────────────────────────────────
    // Task outcomes
    // ─────────────────────────────────────────────────────────────────────
    /// Records that completed every scheduled stage (by pipeline, type)
    pub records_handled: CounterVec,

    /// Records dropped by a failing stage (by pipeline, type, stage)
    pub records_dropped: CounterVec,

    /// Records skipped as empty (by pipeline, type, stage)
    pub records_skipped: CounterVec,

    // ─────────────────────────────────────────────────────────────────────
    // Admission control
    // ─────────────────────────────────────────────────────────────────────
    /// Precheck rejections (by processor, status code)
    pub precheck_rejected: CounterVec,

    // ─────────────────────────────────────────────────────────────────────
    // Build & reload
    // ─────────────────────────────────────────────────────────────────────
    /// Pipeline build attempts (by pipeline, type, status)
    pub pipelines_built: CounterVec,

    /// Manager reload attempts (by status)
    pub reloads: CounterVec,

    // ─────────────────────────────────────────────────────────────────────
    // Durations
    // ─────────────────────────────────────────────────────────────────────
    /// Seconds spent executing all scheduled stages of one task
    pub handled_duration_seconds: HistogramVec,

    /// Seconds spent in a single processor invocation
    pub stage_duration_seconds: HistogramVec,
}

impl Metrics {
    /// Initialize the global metrics instance, registering every collector
    /// with the default prometheus registry. Safe to call more than once -
    /// later calls return the existing instance.
    pub fn init() -> Result<&'static Metrics> {
        // Serialize creation: collectors register with the global registry,
        // and a raced second registration would fail spuriously.
        static INIT: std::sync::Mutex<()> = std::sync::Mutex::new(());

        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }
        let _guard = INIT.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }
        let metrics = Metrics::create()?;
        Ok(METRICS.get_or_init(|| metrics))
    }

    /// The global metrics instance, if one was initialized.
    pub fn get() -> Option<&'static Metrics> {
        METRICS.get()
    }

    fn create() -> Result<Metrics> {
        let err = |e: prometheus::Error| GatewayError::Metrics(e.to_string());

        Ok(Metrics {
            records_handled: register_counter_vec!(
                "virta_records_handled_total",
                "Records that completed every scheduled stage",
                &["pipeline", "record_type"]
            )
            .map_err(err)?,
            records_dropped: register_counter_vec!(
                "virta_records_dropped_total",
                "Records dropped by a failing stage",
                &["pipeline", "record_type", "stage"]
            )
            .map_err(err)?,
            records_skipped: register_counter_vec!(
                "virta_records_skipped_total",
                "Records skipped as empty mid-pipeline",
                &["pipeline", "record_type", "stage"]
            )
            .map_err(err)?,
            precheck_rejected: register_counter_vec!(
                "virta_precheck_rejected_total",
                "Records rejected by a precheck stage",
                &["processor", "code"]
            )
            .map_err(err)?,
            pipelines_built: register_counter_vec!(
                "virta_pipelines_built_total",
                "Pipeline build attempts by outcome",
                &["pipeline", "record_type", "status"]
            )
            .map_err(err)?,
            reloads: register_counter_vec!(
                "virta_reloads_total",
                "Manager reload attempts by outcome",
                &["status"]
            )
            .map_err(err)?,
            handled_duration_seconds: register_histogram_vec!(
                "virta_handled_duration_seconds",
                "Seconds spent executing all scheduled stages of one task",
                &["pipeline", "record_type"]
            )
            .map_err(err)?,
            stage_duration_seconds: register_histogram_vec!(
                "virta_stage_duration_seconds",
                "Seconds spent in a single processor invocation",
                &["processor"]
            )
            .map_err(err)?,
        })
    }

    /// Record a successfully handled task.
    pub fn record_handled(&self, pipeline: &str, rtype: RecordType) {
        self.records_handled
            .with_label_values(&[pipeline, rtype.as_str()])
            .inc();
    }

    /// Record a task dropped at `stage`.
    pub fn record_dropped(&self, pipeline: &str, rtype: RecordType, stage: &str) {
        self.records_dropped
            .with_label_values(&[pipeline, rtype.as_str(), stage])
            .inc();
    }

    /// Record a task skipped as empty at `stage`.
    pub fn record_skipped(&self, pipeline: &str, rtype: RecordType, stage: &str) {
        self.records_skipped
            .with_label_values(&[pipeline, rtype.as_str(), stage])
            .inc();
    }

    /// Record a precheck rejection.
    pub fn record_precheck_rejected(&self, processor: &str, code: &str) {
        self.precheck_rejected
            .with_label_values(&[processor, code])
            .inc();
    }

    /// Record one pipeline build attempt.
    pub fn record_pipeline_built(&self, pipeline: &str, rtype: &str, ok: bool) {
        let status = if ok { "success" } else { "failed" };
        self.pipelines_built
            .with_label_values(&[pipeline, rtype, status])
            .inc();
    }

    /// Record one manager reload attempt.
    pub fn record_reload(&self, ok: bool) {
        let status = if ok { "success" } else { "failed" };
        self.reloads.with_label_values(&[status]).inc();
    }

    /// Observe the wall time of a fully executed task.
    pub fn observe_handled(&self, pipeline: &str, rtype: RecordType, elapsed: Duration) {
        self.handled_duration_seconds
            .with_label_values(&[pipeline, rtype.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    /// Observe the wall time of one processor invocation.
    pub fn observe_stage(&self, processor: &str, elapsed: Duration) {
        self.stage_duration_seconds
            .with_label_values(&[processor])
            .observe(elapsed.as_secs_f64());
    }

    /// Encode the default registry in Prometheus text format.
    pub fn export() -> Result<String> {
        let encoder = TextEncoder::new();
        let families = prometheus::gather();
        let mut buf = Vec::new();
        encoder
            .encode(&families, &mut buf)
            .map_err(|e| GatewayError::Metrics(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| GatewayError::Metrics(e.to_string()))
    }
}
