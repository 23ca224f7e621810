//! Trace-to-metric derivation processor (scheduled, derivation-capable)
//!
//! Computes per-record summary metrics from a traces payload and forks them
//! as a `metrics.derived` record. The derived record re-enters pipeline
//! resolution under its own record type; the dispatcher routes it onto the
//! derived task queue.

use super::{CommonConfig, Processor, ProcessorKind, StageResult};
use crate::config::SubConfigProcessor;
use crate::error::Result;
use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;
use virta_core::{Record, RecordData, RecordType, RequestType, StageError};

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct DeriveOperation {
    /// Name of the derived metric, e.g. `"trace_span_count"`.
    #[serde(default)]
    pub metric_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct MetricsDeriverConfig {
    #[serde(default)]
    pub operations: Vec<DeriveOperation>,
}

/// Trace-to-metric derivation processor.
pub struct MetricsDeriver {
    common: CommonConfig,
    config: RwLock<MetricsDeriverConfig>,
}

/// Factory for `metrics_deriver/*` instances.
pub(crate) fn create(
    main: serde_yaml::Value,
    subs: Vec<SubConfigProcessor>,
) -> Result<Arc<dyn Processor>> {
    let config: MetricsDeriverConfig = serde_yaml::from_value(main.clone())?;
    Ok(Arc::new(MetricsDeriver {
        common: CommonConfig::new(main, subs),
        config: RwLock::new(config),
    }))
}

impl Processor for MetricsDeriver {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::MetricsDeriver
    }

    fn process(&self, record: &mut Record) -> StageResult {
        if record.data.is_empty() {
            return Err(StageError::SkipEmptyRecord);
        }

        let config = self.config.read().clone();
        if config.operations.is_empty() {
            return Ok(None);
        }

        // Span count is the one summary every payload shape supports: a
        // JSON array derives its length, anything else counts as one.
        let span_count = record
            .data
            .as_json()
            .and_then(serde_json::Value::as_array)
            .map(Vec::len)
            .unwrap_or(1);

        let samples: Vec<serde_json::Value> = config
            .operations
            .iter()
            .filter(|op| !op.metric_name.is_empty())
            .map(|op| {
                serde_json::json!({
                    "metric_name": op.metric_name,
                    "value": span_count,
                    "dimension": {
                        "app_name": record.token.app_name,
                    },
                })
            })
            .collect();
        if samples.is_empty() {
            return Ok(None);
        }

        let mut derived = Record::new(
            RecordType::MetricsDerived,
            RequestType::Derived,
            record.token.clone(),
            RecordData::Json(serde_json::Value::Array(samples)),
        );
        derived.metadata = record.metadata.clone();
        Ok(Some(derived))
    }

    fn reload(&self, main: &serde_yaml::Value, subs: &[SubConfigProcessor]) {
        match serde_yaml::from_value::<MetricsDeriverConfig>(main.clone()) {
            Ok(config) => {
                *self.config.write() = config;
                self.common.swap(main.clone(), subs.to_vec());
            }
            Err(err) => warn!(error = %err, "metrics_deriver reload skipped: bad config"),
        }
    }

    fn main_config(&self) -> serde_yaml::Value {
        self.common.main()
    }

    fn sub_configs(&self) -> Vec<SubConfigProcessor> {
        self.common.subs()
    }
}
