//! Precheck validator
//!
//! Runs one record through its pipeline's precheck stage - admission
//! control before a task is ever created. Fail-fast: the first failing
//! stage short-circuits the rest and maps, by its capability tag, to a
//! transport-level status code the calling receiver surfaces to its
//! client.
//!
//! Successful precheck stages may mutate the record's token in place
//! (token resolution canonicalizes identity); the record is passed by
//! mutable reference so the caller observes it.

use crate::metrics::Metrics;
use crate::pipeline::Manager;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use virta_core::{Record, StageError, StatusCode};

/// A rejected precheck: which stage said no, and what the receiver should
/// answer.
#[derive(Error, Debug)]
#[error("precheck '{processor}' rejected: {source}")]
pub struct PreCheckError {
    /// Transport-level outcome code.
    pub code: StatusCode,
    /// Name of the failing stage; empty when no pipeline exists at all.
    pub processor: String,
    /// The stage outcome that caused the rejection.
    #[source]
    pub source: StageError,
}

/// Executes precheck stages against incoming records.
#[derive(Clone)]
pub struct Validator {
    manager: Arc<Manager>,
}

impl Validator {
    /// A validator resolving pipelines and processors from `manager`.
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }

    /// Run the record's precheck stage. `Ok(())` admits the record; any
    /// failure carries the status code and failing stage name.
    ///
    /// A record type with no live pipeline is rejected immediately as a
    /// bad request - fail closed, matching the build-time invariant that
    /// a broken pipeline never serves traffic.
    pub fn validate(&self, record: &mut Record) -> Result<(), PreCheckError> {
        let Some(pipeline) = self.manager.get_pipeline(record.record_type) else {
            return Err(PreCheckError {
                code: StatusCode::BadRequest,
                processor: String::new(),
                source: StageError::failed(format!(
                    "unknown pipeline for record type '{}'",
                    record.record_type
                )),
            });
        };

        for name in pipeline.pre_check_processors() {
            // Stage instances resolve through the manager map so reloads
            // take effect mid-stream.
            let Some(instance) = self.manager.get_processor(&name) else {
                debug!(processor = %name, "precheck stage missing from manager, skipping");
                continue;
            };

            if let Err(source) = instance.process(record) {
                let code = instance.kind().reject_status();
                if let Some(metrics) = Metrics::get() {
                    metrics.record_precheck_rejected(&name, code.as_str());
                }
                debug!(
                    processor = %name,
                    code = code.as_str(),
                    token = %record.token,
                    "precheck rejected record"
                );
                return Err(PreCheckError {
                    code,
                    processor: name,
                    source,
                });
            }
            // Derived records from precheck stages are not acted upon;
            // derivation belongs to scheduled execution.
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Document;
    use crate::processor::default_factories;
    use virta_core::{RecordData, RecordType, RequestType, Token};

    fn manager() -> Arc<Manager> {
        let main = Document::from_content(
            r#"
processor:
  - name: "token_checker/fixed"
    config:
      type: fixed
      traces_dataid: 11000
      metrics_dataid: 11001
      biz_id: 2
      app_name: checkout
  - name: "rate_limiter/token_bucket"
    config:
      type: token_bucket
      qps: 0
      burst: 2
  - name: "sampler/random"
    config:
      sampling_percentage: 100

pipeline:
  - name: "traces_pipeline/common"
    type: "traces"
    processors:
      - "token_checker/fixed"
      - "rate_limiter/token_bucket"
      - "sampler/random"
"#,
        )
        .unwrap();
        Arc::new(Manager::build(&main, &[], default_factories()).unwrap())
    }

    fn traces_record(token: &str) -> Record {
        Record::new(
            RecordType::Traces,
            RequestType::Http,
            Token::from_original(token),
            RecordData::Json(serde_json::json!([{"span": 1}])),
        )
    }

    #[test]
    fn test_admitted_record_has_resolved_token() {
        let validator = Validator::new(manager());
        let mut record = traces_record("tenant-1");

        validator.validate(&mut record).unwrap();

        // Token mutation is visible to the caller
        assert_eq!(record.token.traces_data_id, 11000);
        assert_eq!(record.token.biz_app(), "2-checkout");
    }

    #[test]
    fn test_rate_limit_maps_to_too_many_requests() {
        let validator = Validator::new(manager());

        // Burst of 2, then rejected
        assert!(validator.validate(&mut traces_record("t")).is_ok());
        assert!(validator.validate(&mut traces_record("t")).is_ok());

        let err = validator.validate(&mut traces_record("t")).unwrap_err();
        assert_eq!(err.code, StatusCode::TooManyRequests);
        assert_eq!(err.processor, "rate_limiter/token_bucket");
    }

    #[test]
    fn test_unknown_pipeline_is_bad_request() {
        let validator = Validator::new(manager());
        let mut record = traces_record("t");
        record.record_type = RecordType::Logs;

        let err = validator.validate(&mut record).unwrap_err();
        assert_eq!(err.code, StatusCode::BadRequest);
        assert!(err.processor.is_empty());
    }

    #[test]
    fn test_scheduled_stages_do_not_run_in_precheck() {
        // The sampler would empty the record at 0%; as a scheduled stage it
        // must not run during validation.
        let main = Document::from_content(
            r#"
processor:
  - name: "token_checker/fixed"
    config:
      type: fixed
  - name: "sampler/random"
    config:
      sampling_percentage: 0
pipeline:
  - name: "traces_pipeline/common"
    type: "traces"
    processors:
      - "token_checker/fixed"
      - "sampler/random"
"#,
        )
        .unwrap();
        let manager = Arc::new(Manager::build(&main, &[], default_factories()).unwrap());
        let validator = Validator::new(manager);

        let mut record = traces_record("t");
        validator.validate(&mut record).unwrap();
        assert!(!record.data.is_empty());
    }

    #[test]
    fn test_token_failure_maps_to_unauthorized() {
        let main = Document::from_content(
            r#"
processor:
  - name: "token_checker/proxy"
    config:
      type: proxy
      proxy_dataid: 1100001
      proxy_token: "1100001_accesstoken"
pipeline:
  - name: "proxy_pipeline/common"
    type: "proxy"
    processors:
      - "token_checker/proxy"
"#,
        )
        .unwrap();
        let manager = Arc::new(Manager::build(&main, &[], default_factories()).unwrap());
        let validator = Validator::new(manager);

        let mut record = Record::new(
            RecordType::Proxy,
            RequestType::Http,
            Token::from_original("wrong-token"),
            RecordData::Json(serde_json::json!({})),
        );
        let err = validator.validate(&mut record).unwrap_err();
        assert_eq!(err.code, StatusCode::Unauthorized);
        assert_eq!(err.processor, "token_checker/proxy");
    }
}
