//! Proxy payload validation precheck processor
//!
//! Proxied custom reporting ships JSON envelopes of the shape
//! `{data_id, access_token, data: [...]}`. This stage checks the envelope
//! against the record's resolved token and rejects stale or malformed
//! payloads before a task is created. Failures map to `BadRequest`.

use super::{CommonConfig, Processor, ProcessorKind, StageResult};
use crate::config::SubConfigProcessor;
use crate::error::Result;
use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;
use virta_core::{Record, RecordData, StageError};

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ProxyValidatorConfig {
    #[serde(rename = "type", default)]
    pub format: String,
    /// Seconds a reported timestamp may sit in the future.
    #[serde(default = "default_time_offset")]
    pub max_future_time_offset: i64,
}

fn default_time_offset() -> i64 {
    3600
}

impl Default for ProxyValidatorConfig {
    fn default() -> Self {
        Self {
            format: String::new(),
            max_future_time_offset: default_time_offset(),
        }
    }
}

/// Proxy payload validation precheck processor.
pub struct ProxyValidator {
    common: CommonConfig,
    config: RwLock<ProxyValidatorConfig>,
}

/// Factory for `proxy_validator/*` instances.
pub(crate) fn create(
    main: serde_yaml::Value,
    subs: Vec<SubConfigProcessor>,
) -> Result<Arc<dyn Processor>> {
    let config: ProxyValidatorConfig = serde_yaml::from_value(main.clone())?;
    Ok(Arc::new(ProxyValidator {
        common: CommonConfig::new(main, subs),
        config: RwLock::new(config),
    }))
}

impl ProxyValidator {
    fn validate_envelope(
        &self,
        record: &Record,
        payload: &serde_json::Value,
    ) -> std::result::Result<(), StageError> {
        let data_id = payload
            .get("data_id")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| StageError::failed("proxy payload missing data_id"))?;
        if data_id != i64::from(record.token.proxy_data_id) {
            return Err(StageError::failed(format!(
                "proxy data_id mismatch: got {data_id}, token has {}",
                record.token.proxy_data_id
            )));
        }

        let access_token = payload
            .get("access_token")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("");
        if access_token != record.token.original {
            return Err(StageError::failed("proxy access_token mismatch"));
        }

        let items = payload
            .get("data")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| StageError::failed("proxy payload missing data list"))?;
        if items.is_empty() {
            return Err(StageError::SkipEmptyRecord);
        }

        let horizon = chrono::Utc::now().timestamp() + self.config.read().max_future_time_offset;
        for item in items {
            if !item.is_object() {
                return Err(StageError::failed("proxy data item is not an object"));
            }
            if let Some(ts) = item.get("timestamp").and_then(serde_json::Value::as_i64) {
                if ts > horizon {
                    return Err(StageError::failed(format!(
                        "proxy timestamp {ts} too far in the future"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Processor for ProxyValidator {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::ProxyValidator
    }

    fn process(&self, record: &mut Record) -> StageResult {
        match &record.data {
            RecordData::Json(payload) => {
                let payload = payload.clone();
                self.validate_envelope(record, &payload)?;
                Ok(None)
            }
            RecordData::Empty => Err(StageError::SkipEmptyRecord),
            RecordData::Bytes(_) => Err(StageError::failed("proxy payload is not decoded JSON")),
        }
    }

    fn reload(&self, main: &serde_yaml::Value, subs: &[SubConfigProcessor]) {
        match serde_yaml::from_value::<ProxyValidatorConfig>(main.clone()) {
            Ok(config) => {
                *self.config.write() = config;
                self.common.swap(main.clone(), subs.to_vec());
            }
            Err(err) => warn!(error = %err, "proxy_validator reload skipped: bad config"),
        }
    }

    fn main_config(&self) -> serde_yaml::Value {
        self.common.main()
    }

    fn sub_configs(&self) -> Vec<SubConfigProcessor> {
        self.common.subs()
    }
}
