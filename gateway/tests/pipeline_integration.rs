//! Pipeline integration tests
//!
//! Exercises the full path a receiver takes: build a manager from YAML
//! documents, run precheck validation, dispatch admitted records through
//! their scheduled stages, and observe what reaches the exporter - plus
//! hot-reload behavior while the dispatcher is live.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;
use virta_gateway::processor::default_factories;
use virta_gateway::{
    Dispatcher, DispatcherConfig, Document, Exporter, Manager, Record, RecordData, RecordType,
    RequestType, StatusCode, Token, Validator,
};

// ============================================================================
// Shared fixtures
// ============================================================================

const MAIN_YAML: &str = r#"
processor:
  - name: "token_checker/fixed"
    config:
      type: fixed
      traces_dataid: 11000
      metrics_dataid: 11001
      logs_dataid: 11002
      biz_id: 2
      app_name: checkout
  - name: "rate_limiter/token_bucket"
    config:
      type: token_bucket
      qps: 0
      burst: 100
  - name: "attribute_filter/common"
    config:
      insert:
        - key: env
          value: prod
  - name: "metrics_deriver/span_count"
    config:
      operations:
        - metric_name: trace_span_count
  - name: "sampler/random"
    config:
      type: random
      sampling_percentage: 100

pipeline:
  - name: "traces_pipeline/common"
    type: "traces"
    processors:
      - "token_checker/fixed"
      - "rate_limiter/token_bucket"
      - "attribute_filter/common"
      - "metrics_deriver/span_count"
      - "sampler/random"
  - name: "metrics_derived_pipeline/common"
    type: "metrics.derived"
    processors:
      - "sampler/random"
"#;

/// Exporter that captures emitted records for later inspection
struct CaptureExporter {
    records: parking_lot::Mutex<Vec<Record>>,
}

impl CaptureExporter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            records: parking_lot::Mutex::new(Vec::new()),
        })
    }

    fn count(&self) -> usize {
        self.records.lock().len()
    }

    fn take_all(&self) -> Vec<Record> {
        self.records.lock().clone()
    }
}

#[async_trait::async_trait]
impl Exporter for CaptureExporter {
    fn name(&self) -> &'static str {
        "capture"
    }

    async fn publish(&self, record: Record) {
        self.records.lock().push(record);
    }
}

fn build_manager() -> Arc<Manager> {
    let main = Document::from_content(MAIN_YAML).unwrap();
    Arc::new(Manager::build(&main, &[], default_factories()).unwrap())
}

fn traces_record(token: &str) -> Record {
    Record::new(
        RecordType::Traces,
        RequestType::Grpc,
        Token::from_original(token),
        RecordData::Json(serde_json::json!([{"span": 1}, {"span": 2}])),
    )
}

async fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ============================================================================
// Receiver path: precheck then dispatch
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn admitted_records_reach_export_with_derived_metrics() {
    let manager = build_manager();
    let validator = Validator::new(Arc::clone(&manager));
    let exporter = CaptureExporter::new();
    let dispatcher = Dispatcher::new(
        Arc::clone(&manager),
        exporter.clone(),
        DispatcherConfig {
            workers: 2,
            queue_amplification: 8,
        },
    );

    dispatcher.start().await;
    let sender = dispatcher.record_sender();

    // The receiver contract: validate first, publish only admitted records
    for _ in 0..3 {
        let mut record = traces_record("tenant-1");
        validator.validate(&mut record).unwrap();
        assert_eq!(record.token.traces_data_id, 11000, "token resolved in place");
        sender.send(record).await;
    }

    // 3 originals + 3 derived metric records
    wait_for(|| exporter.count() == 6).await;
    dispatcher.stop().await;

    let records = exporter.take_all();
    assert_eq!(records.len(), 6);

    let originals: Vec<_> = records
        .iter()
        .filter(|r| r.record_type == RecordType::Traces)
        .collect();
    let derived: Vec<_> = records
        .iter()
        .filter(|r| r.record_type == RecordType::Metrics)
        .collect();
    assert_eq!(originals.len(), 3);
    assert_eq!(derived.len(), 3, "derived records unwrapped to base type");

    // Scheduled-stage mutations visible at export
    assert!(originals
        .iter()
        .all(|r| r.metadata().get("env") == Some(&"prod".to_string())));
    // Derived records carry the parent's resolved token
    assert!(derived.iter().all(|r| r.token.metrics_data_id == 11001));
    assert!(derived
        .iter()
        .all(|r| r.request_type == RequestType::Derived));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn precheck_rejections_map_to_status_codes() {
    let main = Document::from_content(
        r#"
processor:
  - name: "token_checker/fixed"
    config:
      type: fixed
  - name: "rate_limiter/token_bucket"
    config:
      type: token_bucket
      qps: 0
      burst: 1
pipeline:
  - name: "metrics_pipeline/common"
    type: "metrics"
    processors:
      - "token_checker/fixed"
      - "rate_limiter/token_bucket"
"#,
    )
    .unwrap();
    let manager = Arc::new(Manager::build(&main, &[], default_factories()).unwrap());
    let validator = Validator::new(manager);

    let mut record = Record::new(
        RecordType::Metrics,
        RequestType::Http,
        Token::from_original("t"),
        RecordData::Json(serde_json::json!({"m": 1})),
    );
    validator.validate(&mut record).unwrap();

    // Burst exhausted: second record is rate limited
    let mut record = Record::new(
        RecordType::Metrics,
        RequestType::Http,
        Token::from_original("t"),
        RecordData::Json(serde_json::json!({"m": 1})),
    );
    let err = validator.validate(&mut record).unwrap_err();
    assert_eq!(err.code, StatusCode::TooManyRequests);
    assert_eq!(err.code.as_u16(), 429);
    assert_eq!(err.processor, "rate_limiter/token_bucket");

    // A type without a pipeline is rejected outright
    let mut record = traces_record("t");
    record.record_type = RecordType::Logs;
    let err = validator.validate(&mut record).unwrap_err();
    assert_eq!(err.code, StatusCode::BadRequest);
}

// ============================================================================
// Hot reload under a live dispatcher
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reload_keeps_identity_and_redirects_traffic() {
    let manager = build_manager();
    let exporter = CaptureExporter::new();
    let dispatcher = Dispatcher::new(
        Arc::clone(&manager),
        exporter.clone(),
        DispatcherConfig {
            workers: 2,
            queue_amplification: 8,
        },
    );
    dispatcher.start().await;
    let sender = dispatcher.record_sender();

    sender.send(traces_record("t")).await;
    wait_for(|| exporter.count() >= 1).await;

    let sampler_before = manager.get_processor("sampler/random").unwrap();

    // New generation: traces pipeline becomes sampler-only, logs appears
    let new_main = Document::from_content(
        r#"
processor:
  - name: "sampler/random"
    config:
      type: random
      sampling_percentage: 100
  - name: "attribute_filter/common"
    config:
      insert:
        - key: generation
          value: second
pipeline:
  - name: "traces_pipeline/v2"
    type: "traces"
    processors:
      - "attribute_filter/common"
  - name: "logs_pipeline/v2"
    type: "logs"
    processors:
      - "sampler/random"
"#,
    )
    .unwrap();
    manager
        .reload(&new_main, &[], default_factories())
        .unwrap();

    // Identity preserved for carried-over processors
    let sampler_after = manager.get_processor("sampler/random").unwrap();
    assert!(sampler_before.same_processor(&sampler_after));

    // Pipelines map swapped wholesale: derived pipeline is gone, logs serves
    assert!(manager.get_pipeline(RecordType::MetricsDerived).is_none());
    assert!(manager.get_pipeline(RecordType::Logs).is_some());

    // Traffic after the reload takes the new traces pipeline
    let before = exporter.count();
    sender.send(traces_record("t")).await;
    wait_for(|| exporter.count() > before).await;
    dispatcher.stop().await;

    let records = exporter.take_all();
    let second_gen = records
        .iter()
        .find(|r| r.metadata().get("generation") == Some(&"second".to_string()));
    assert!(
        second_gen.is_some(),
        "post-reload record went through the new pipeline"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_reload_leaves_traffic_unaffected() {
    let manager = build_manager();
    let exporter = CaptureExporter::new();
    let dispatcher = Dispatcher::new(
        Arc::clone(&manager),
        exporter.clone(),
        DispatcherConfig {
            workers: 2,
            queue_amplification: 8,
        },
    );
    dispatcher.start().await;

    let broken = Document::from_content("just a scalar").unwrap();
    assert!(manager.reload(&broken, &[], default_factories()).is_err());

    // The previous generation still serves
    dispatcher.record_sender().send(traces_record("t")).await;
    wait_for(|| exporter.count() >= 1).await;
    dispatcher.stop().await;

    assert!(exporter.count() >= 1);
}

// ============================================================================
// Tenant overrides end to end
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tenant_sampling_override_drops_that_tenant_only() {
    let main = Document::from_content(
        r#"
processor:
  - name: "sampler/random"
    config:
      type: random
      sampling_percentage: 100
pipeline:
  - name: "traces_pipeline/common"
    type: "traces"
    processors:
      - "sampler/random"
"#,
    )
    .unwrap();
    // Tenant "muted" samples at 0% via its default-tier override
    let sub = Document::from_content(
        r#"
type: subconfig
token: muted
default:
  processor:
    - name: "sampler/random"
      config:
        sampling_percentage: 0
"#,
    )
    .unwrap();
    let manager = Arc::new(Manager::build(&main, &[sub], default_factories()).unwrap());
    let exporter = CaptureExporter::new();
    let dispatcher = Dispatcher::new(
        manager,
        exporter.clone(),
        DispatcherConfig {
            workers: 2,
            queue_amplification: 8,
        },
    );
    dispatcher.start().await;
    let sender = dispatcher.record_sender();

    for _ in 0..3 {
        sender.send(traces_record("muted")).await;
        sender.send(traces_record("chatty")).await;
    }

    wait_for(|| exporter.count() == 3).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    dispatcher.stop().await;

    let records = exporter.take_all();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.token.original == "chatty"));
}
