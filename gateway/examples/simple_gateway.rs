//! Minimal VIRTA gateway - build a manager from YAML, validate and
//! dispatch a few records, print what reaches the exporter.
//!
//! ```bash
//! cargo run -p virta-gateway --example simple_gateway
//! ```

use std::sync::Arc;
use virta_gateway::processor::default_factories;
use virta_gateway::{
    Dispatcher, DispatcherConfig, Document, Manager, Record, RecordData, RecordType, RequestType,
    StdoutExporter, Token, Validator,
};

const CONFIG: &str = r#"
processor:
  - name: "token_checker/fixed"
    config:
      type: fixed
      traces_dataid: 11000
      metrics_dataid: 11001
      biz_id: 2
      app_name: demo
  - name: "rate_limiter/token_bucket"
    config:
      type: token_bucket
      qps: 1000
      burst: 1000
  - name: "metrics_deriver/span_count"
    config:
      operations:
        - metric_name: trace_span_count
  - name: "sampler/random"
    config:
      type: random
      sampling_percentage: 100

pipeline:
  - name: "traces_pipeline/demo"
    type: "traces"
    processors:
      - "token_checker/fixed"
      - "rate_limiter/token_bucket"
      - "metrics_deriver/span_count"
      - "sampler/random"
  - name: "metrics_derived_pipeline/demo"
    type: "metrics.derived"
    processors:
      - "sampler/random"
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let main_doc = Document::from_content(CONFIG)?;
    let manager = Arc::new(Manager::build(&main_doc, &[], default_factories())?);
    let validator = Validator::new(Arc::clone(&manager));

    let dispatcher = Dispatcher::new(
        Arc::clone(&manager),
        Arc::new(StdoutExporter::new()),
        DispatcherConfig::default(),
    );
    dispatcher.start().await;
    let sender = dispatcher.record_sender();

    for i in 0..5 {
        let mut record = Record::new(
            RecordType::Traces,
            RequestType::Grpc,
            Token::from_original("demo-tenant"),
            RecordData::Json(serde_json::json!([{"span": i}])),
        );
        match validator.validate(&mut record) {
            Ok(()) => sender.send(record).await,
            Err(err) => eprintln!("rejected ({}): {err}", err.code),
        }
    }

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    dispatcher.stop().await;
    Ok(())
}
