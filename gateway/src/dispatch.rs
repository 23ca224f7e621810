//! Task dispatch engine
//!
//! The concurrent heart of the gateway. Records admitted by the precheck
//! validator arrive on the ingestion queue; each is resolved to its
//! pipeline, wrapped into a [`Task`] carrying the scheduled stage names,
//! and executed transactionally by a pool of workers:
//!
//! ```text
//! records ──► consume_records ──► originalTasks ──► dispatch ──► export
//!                                                     │ derive
//!                                  derivedTasks ◄─────┘
//!                                       │
//!                                       └──► dispatch (no re-derive) ──► export
//! non-sched records ────────────────────────────────────────────────► export
//! ```
//!
//! Stage execution is weakly transactional: a failing stage aborts the
//! remaining stages and the record is never exported past it, but in-place
//! mutations made by earlier stages are not rolled back.

use crate::export::Exporter;
use crate::metrics::Metrics;
use crate::pipeline::Manager;
use crate::queue::{PushMode, Queue};
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use virta_core::{Record, StageError};

/// Ordered scheduled-stage names; inline for the common short pipelines.
pub type Stages = SmallVec<[String; 4]>;

/// A record bound to its pipeline's scheduled stages.
///
/// Created fresh per record once precheck has passed; destroyed on the
/// first terminal stage outcome.
pub struct Task {
    record: Record,
    pipeline_name: Arc<str>,
    stages: Stages,
}

impl Task {
    /// Bind a record to a pipeline name and its scheduled stage list.
    pub fn new(record: Record, pipeline_name: impl Into<Arc<str>>, stages: Vec<String>) -> Self {
        Self {
            record,
            pipeline_name: pipeline_name.into(),
            stages: SmallVec::from_vec(stages),
        }
    }

    /// The record being processed.
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// Mutable access for stage execution.
    pub fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    /// Diagnostic pipeline name.
    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    /// Number of scheduled stages.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Stage name at index `i`.
    pub fn stage_at(&self, i: usize) -> Option<&str> {
        self.stages.get(i).map(String::as_str)
    }
}

/// Dispatcher sizing knobs.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Worker count per loop kind; 0 derives it from available parallelism.
    pub workers: usize,
    /// Queue capacity multiplier: capacity = workers × amplification.
    pub queue_amplification: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_amplification: 8,
        }
    }
}

/// Handle receivers use to push records into the dispatcher.
#[derive(Clone)]
pub struct RecordSender {
    queue: Queue<Record>,
}

impl RecordSender {
    /// Push one record; awaits when the queue is full (guarantee mode).
    pub async fn send(&self, record: Record) {
        self.queue.push(record).await;
    }
}

/// The concurrent task-dispatch engine.
///
/// Owns the ingestion queue, the two task queues (original and derived)
/// and the non-scheduled passthrough queue. [`start`](Dispatcher::start)
/// replicates four consumption loops across the worker count;
/// [`stop`](Dispatcher::stop) signals shutdown, waits for every worker to
/// finish its in-flight task and runs the processors' cleanup hooks.
pub struct Dispatcher {
    manager: Arc<Manager>,
    exporter: Arc<dyn Exporter>,
    records: Queue<Record>,
    non_sched: Queue<Record>,
    original_tasks: Queue<Task>,
    derived_tasks: Queue<Task>,
    workers: usize,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Create a dispatcher over the given manager and export sink.
    pub fn new(
        manager: Arc<Manager>,
        exporter: Arc<dyn Exporter>,
        config: DispatcherConfig,
    ) -> Self {
        let workers = if config.workers > 0 {
            config.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        };
        let capacity = workers * config.queue_amplification.max(1);
        let (shutdown, _) = watch::channel(false);

        Self {
            manager,
            exporter,
            records: Queue::new(capacity, PushMode::Guarantee),
            non_sched: Queue::new(capacity, PushMode::Guarantee),
            original_tasks: Queue::new(capacity, PushMode::Guarantee),
            derived_tasks: Queue::new(capacity, PushMode::Guarantee),
            workers,
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Sender for records coming off the ingestion receivers.
    pub fn record_sender(&self) -> RecordSender {
        RecordSender {
            queue: self.records.clone(),
        }
    }

    /// Sender for pre-resolved records that bypass staged processing and
    /// go straight to export.
    pub fn non_sched_sender(&self) -> RecordSender {
        RecordSender {
            queue: self.non_sched.clone(),
        }
    }

    /// Effective worker count per loop kind.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Spawn the consumption loops. Idempotent: a second call while
    /// running is a no-op.
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            warn!("dispatcher already started");
            return;
        }

        for _ in 0..self.workers {
            handles.push(tokio::spawn(consume_records(
                Arc::clone(&self.manager),
                self.records.clone(),
                self.original_tasks.clone(),
                self.shutdown.subscribe(),
            )));
            handles.push(tokio::spawn(dispatch_tasks(
                Arc::clone(&self.manager),
                Arc::clone(&self.exporter),
                self.original_tasks.clone(),
                Some(self.derived_tasks.clone()),
                self.shutdown.subscribe(),
            )));
            handles.push(tokio::spawn(dispatch_tasks(
                Arc::clone(&self.manager),
                Arc::clone(&self.exporter),
                self.derived_tasks.clone(),
                None,
                self.shutdown.subscribe(),
            )));
            handles.push(tokio::spawn(consume_non_sched(
                Arc::clone(&self.exporter),
                self.non_sched.clone(),
                self.shutdown.subscribe(),
            )));
        }
        info!(workers = self.workers, "dispatcher started");
    }

    /// Signal every loop, wait for workers to finish their in-flight
    /// tasks, then run cleanup hooks on all processors.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);

        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(err) = handle.await {
                warn!(error = %err, "dispatch worker ended abnormally");
            }
        }

        self.manager.clean_all();
        info!("dispatcher stopped");
    }
}

/// Resolve a record's pipeline and queue it as a task. Records of a type
/// with no live pipeline are dropped with an unknown-pipeline warning.
async fn submit_task(manager: &Arc<Manager>, queue: &Queue<Task>, record: Record) {
    match manager.get_pipeline(record.record_type) {
        Some(pipeline) => {
            queue
                .push(Task::new(
                    record,
                    pipeline.name(),
                    pipeline.sched_processors(),
                ))
                .await;
        }
        None => {
            warn!(record_type = %record.record_type, "no pipeline found, record dropped");
            if let Some(metrics) = Metrics::get() {
                metrics.record_dropped("unknown", record.record_type, "resolve");
            }
        }
    }
}

/// Route a derived record: its pipeline resolves by the *derived* record
/// type, then the record is unwrapped to its base type before queueing.
/// No pipeline means silent discard - never a retry.
async fn submit_derived(manager: &Arc<Manager>, queue: &Queue<Task>, mut derived: Record) {
    match manager.get_pipeline(derived.record_type) {
        Some(pipeline) => {
            derived.unwrap_derived();
            queue
                .push(Task::new(
                    derived,
                    pipeline.name(),
                    pipeline.sched_processors(),
                ))
                .await;
        }
        None => {
            debug!(record_type = %derived.record_type, "derived record has no pipeline, discarded");
        }
    }
}

/// Execute one task's scheduled stages in order, stopping at the first
/// terminal outcome. Survivors are published to the exporter.
async fn execute_task(
    manager: &Arc<Manager>,
    exporter: &Arc<dyn Exporter>,
    derived_queue: Option<&Queue<Task>>,
    mut task: Task,
) {
    let start = Instant::now();
    let rtype = task.record.record_type;
    let stage_count = task.stages.len();

    for i in 0..stage_count {
        let stage = task.stages[i].clone();
        let Some(instance) = manager.get_processor(&stage) else {
            error!(stage = %stage, pipeline = %task.pipeline_name, "stage processor missing, task dropped");
            if let Some(metrics) = Metrics::get() {
                metrics.record_dropped(&task.pipeline_name, rtype, &stage);
            }
            return;
        };

        match instance.process(&mut task.record) {
            Err(StageError::SkipEmptyRecord) => {
                warn!(
                    record_type = %rtype,
                    stage = %stage,
                    token = %task.record.token,
                    "skip empty record"
                );
                if let Some(metrics) = Metrics::get() {
                    metrics.record_skipped(&task.pipeline_name, rtype, &stage);
                }
                return;
            }
            Err(StageError::EndOfPipeline) => return,
            Err(err) => {
                error!(stage = %stage, error = %err, "failed to process task");
                if let Some(metrics) = Metrics::get() {
                    metrics.record_dropped(&task.pipeline_name, rtype, &stage);
                }
                return;
            }
            Ok(Some(derived)) => {
                // Only the original pool acts on derivations; the derived
                // pool ignores them so forking cannot recurse.
                if let Some(queue) = derived_queue {
                    submit_derived(manager, queue, derived).await;
                }
            }
            Ok(None) => {}
        }
    }

    if let Some(metrics) = Metrics::get() {
        metrics.observe_handled(&task.pipeline_name, rtype, start.elapsed());
    }

    let pipeline_name = Arc::clone(&task.pipeline_name);
    exporter.publish(task.record).await;

    // Stage-less pipelines export but don't count as handled work.
    if stage_count > 0 {
        if let Some(metrics) = Metrics::get() {
            metrics.record_handled(&pipeline_name, rtype);
        }
    }
}

/// Loop: drain the ingestion queue into original tasks.
async fn consume_records(
    manager: Arc<Manager>,
    records: Queue<Record>,
    original_tasks: Queue<Task>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            maybe = records.pop() => {
                let Some(record) = maybe else { return };
                submit_task(&manager, &original_tasks, record).await;
            }
            _ = shutdown.changed() => return,
        }
    }
}

/// Loop: drain a task queue and execute the stage state machine. The
/// original pool passes the derived queue; the derived pool passes `None`.
async fn dispatch_tasks(
    manager: Arc<Manager>,
    exporter: Arc<dyn Exporter>,
    tasks: Queue<Task>,
    derived_queue: Option<Queue<Task>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            maybe = tasks.pop() => {
                let Some(task) = maybe else { return };
                execute_task(&manager, &exporter, derived_queue.as_ref(), task).await;
            }
            _ = shutdown.changed() => return,
        }
    }
}

/// Loop: forward pre-resolved records straight to export.
async fn consume_non_sched(
    exporter: Arc<dyn Exporter>,
    non_sched: Queue<Record>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            maybe = non_sched.pop() => {
                let Some(record) = maybe else { return };
                exporter.publish(record).await;
            }
            _ = shutdown.changed() => return,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{Document, SubConfigProcessor};
    use crate::processor::{default_factories, Processor, ProcessorFactories, ProcessorKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use virta_core::{RecordData, RecordType, RequestType, Token};

    // ========================================================================
    // Test helpers
    // ========================================================================

    /// Exporter that captures everything it is handed
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

    /// Scheduled stage with a scripted outcome, counting its invocations
    struct Scripted {
        behavior: &'static str,
        calls: Arc<AtomicUsize>,
    }

    impl Processor for Scripted {
        fn kind(&self) -> ProcessorKind {
            ProcessorKind::AttributeFilter
        }

        fn process(&self, record: &mut Record) -> Result<Option<Record>, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                "ok" => Ok(None),
                "skip" => {
                    record.data = RecordData::Empty;
                    Err(StageError::SkipEmptyRecord)
                }
                "end" => Err(StageError::EndOfPipeline),
                _ => Err(StageError::failed("scripted failure")),
            }
        }

        fn reload(&self, _main: &serde_yaml::Value, _subs: &[SubConfigProcessor]) {}

        fn main_config(&self) -> serde_yaml::Value {
            serde_yaml::Value::Null
        }

        fn sub_configs(&self) -> Vec<SubConfigProcessor> {
            Vec::new()
        }
    }

    fn scripted_factories(
        behaviors: &[(&'static str, &'static str)],
    ) -> (ProcessorFactories, Vec<Arc<AtomicUsize>>) {
        let mut factories = ProcessorFactories::new();
        let mut counters = Vec::new();
        for (prefix, behavior) in behaviors {
            let calls = Arc::new(AtomicUsize::new(0));
            counters.push(Arc::clone(&calls));
            let behavior = *behavior;
            let calls_for_factory = Arc::clone(&calls);
            factories.register(*prefix, move |_main, _subs| {
                Ok(Arc::new(Scripted {
                    behavior,
                    calls: Arc::clone(&calls_for_factory),
                }) as Arc<dyn Processor>)
            });
        }
        (factories, counters)
    }

    fn traces_record() -> Record {
        Record::new(
            RecordType::Traces,
            RequestType::Http,
            Token::from_original("t"),
            RecordData::Json(serde_json::json!([{"span": 1}, {"span": 2}])),
        )
    }

    fn dispatcher(manager: Arc<Manager>, exporter: Arc<CaptureExporter>) -> Dispatcher {
        Dispatcher::new(
            manager,
            exporter,
            DispatcherConfig {
                workers: 2,
                queue_amplification: 8,
            },
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

    // ========================================================================
    // End-to-end dispatch
    // ========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn records_flow_through_to_export() {
        let main = Document::from_content(
            r#"
processor:
  - name: "attribute_filter/env"
    config:
      insert:
        - key: env
          value: prod
  - name: "sampler/random"
    config:
      sampling_percentage: 100
pipeline:
  - name: "traces_pipeline/common"
    type: "traces"
    processors:
      - "attribute_filter/env"
      - "sampler/random"
"#,
        )
        .unwrap();
        let manager = Arc::new(Manager::build(&main, &[], default_factories()).unwrap());
        let exporter = CaptureExporter::new();
        let dispatcher = dispatcher(manager, Arc::clone(&exporter));

        dispatcher.start().await;
        let sender = dispatcher.record_sender();
        for _ in 0..5 {
            sender.send(traces_record()).await;
        }

        wait_for(|| exporter.count() == 5).await;
        dispatcher.stop().await;

        let records = exporter.take_all();
        assert_eq!(records.len(), 5);
        // Stage mutations survive into export
        assert!(records
            .iter()
            .all(|r| r.metadata().get("env") == Some(&"prod".to_string())));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn skip_prevents_export_and_later_stages() {
        let metrics = crate::metrics::Metrics::init().unwrap();

        // Stages: A ok, B skip, C ok - C must never run, nothing exported
        let (factories, counters) = scripted_factories(&[
            ("stage_a", "ok"),
            ("stage_b", "skip"),
            ("stage_c", "ok"),
        ]);
        let main = Document::from_content(
            r#"
processor:
  - name: "stage_a/x"
    config:
  - name: "stage_b/x"
    config:
  - name: "stage_c/x"
    config:
pipeline:
  - name: "traces_pipeline/skip_case"
    type: "traces"
    processors:
      - "stage_a/x"
      - "stage_b/x"
      - "stage_c/x"
"#,
        )
        .unwrap();
        let manager = Arc::new(Manager::build(&main, &[], &factories).unwrap());
        let exporter = CaptureExporter::new();
        let dispatcher = dispatcher(manager, Arc::clone(&exporter));

        dispatcher.start().await;
        dispatcher.record_sender().send(traces_record()).await;

        wait_for(|| counters[1].load(Ordering::SeqCst) == 1).await;
        dispatcher.stop().await;

        assert_eq!(counters[0].load(Ordering::SeqCst), 1, "A executed");
        assert_eq!(counters[1].load(Ordering::SeqCst), 1, "B executed");
        assert_eq!(counters[2].load(Ordering::SeqCst), 0, "C never executed");
        assert_eq!(exporter.count(), 0, "skipped record is not exported");

        // Counted as a skip against the skipping stage, never as a drop
        let skipped = metrics
            .records_skipped
            .with_label_values(&["traces_pipeline/skip_case", "traces", "stage_b/x"])
            .get();
        assert_eq!(skipped, 1.0);
        let dropped = metrics
            .records_dropped
            .with_label_values(&["traces_pipeline/skip_case", "traces", "stage_b/x"])
            .get();
        assert_eq!(dropped, 0.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn end_of_pipeline_stops_without_export() {
        let (factories, counters) =
            scripted_factories(&[("stage_a", "end"), ("stage_b", "ok")]);
        let main = Document::from_content(
            r#"
processor:
  - name: "stage_a/x"
    config:
  - name: "stage_b/x"
    config:
pipeline:
  - name: "traces_pipeline/end_case"
    type: "traces"
    processors:
      - "stage_a/x"
      - "stage_b/x"
"#,
        )
        .unwrap();
        let manager = Arc::new(Manager::build(&main, &[], &factories).unwrap());
        let exporter = CaptureExporter::new();
        let dispatcher = dispatcher(manager, Arc::clone(&exporter));

        dispatcher.start().await;
        dispatcher.record_sender().send(traces_record()).await;

        wait_for(|| counters[0].load(Ordering::SeqCst) == 1).await;
        dispatcher.stop().await;

        assert_eq!(counters[1].load(Ordering::SeqCst), 0);
        assert_eq!(exporter.count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failing_stage_drops_task() {
        let (factories, counters) =
            scripted_factories(&[("stage_a", "fail"), ("stage_b", "ok")]);
        let main = Document::from_content(
            r#"
processor:
  - name: "stage_a/x"
    config:
  - name: "stage_b/x"
    config:
pipeline:
  - name: "traces_pipeline/fail_case"
    type: "traces"
    processors:
      - "stage_a/x"
      - "stage_b/x"
"#,
        )
        .unwrap();
        let manager = Arc::new(Manager::build(&main, &[], &factories).unwrap());
        let exporter = CaptureExporter::new();
        let dispatcher = dispatcher(manager, Arc::clone(&exporter));

        dispatcher.start().await;
        dispatcher.record_sender().send(traces_record()).await;

        wait_for(|| counters[0].load(Ordering::SeqCst) == 1).await;
        dispatcher.stop().await;

        assert_eq!(counters[1].load(Ordering::SeqCst), 0);
        assert_eq!(exporter.count(), 0);
    }

    // ========================================================================
    // Derived records
    // ========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn derived_record_routes_through_its_own_pipeline() {
        let main = Document::from_content(
            r#"
processor:
  - name: "metrics_deriver/span_count"
    config:
      operations:
        - metric_name: trace_span_count
  - name: "attribute_filter/tag"
    config:
      insert:
        - key: derived
          value: "true"
pipeline:
  - name: "traces_pipeline/common"
    type: "traces"
    processors:
      - "metrics_deriver/span_count"
  - name: "metrics_derived_pipeline/common"
    type: "metrics.derived"
    processors:
      - "attribute_filter/tag"
"#,
        )
        .unwrap();
        let manager = Arc::new(Manager::build(&main, &[], default_factories()).unwrap());
        let exporter = CaptureExporter::new();
        let dispatcher = dispatcher(manager, Arc::clone(&exporter));

        dispatcher.start().await;
        dispatcher.record_sender().send(traces_record()).await;

        wait_for(|| exporter.count() == 2).await;
        dispatcher.stop().await;

        let records = exporter.take_all();
        assert_eq!(records.len(), 2, "original and derived both exported");

        let derived = records
            .iter()
            .find(|r| r.metadata().get("derived") == Some(&"true".to_string()))
            .expect("derived record exported");
        // Pipeline resolution used metrics.derived; the record itself was
        // unwrapped to the base type before re-entering dispatch
        assert_eq!(derived.record_type, RecordType::Metrics);
        assert_eq!(derived.request_type, RequestType::Derived);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn derived_record_without_pipeline_is_discarded() {
        let main = Document::from_content(
            r#"
processor:
  - name: "metrics_deriver/span_count"
    config:
      operations:
        - metric_name: trace_span_count
pipeline:
  - name: "traces_pipeline/common"
    type: "traces"
    processors:
      - "metrics_deriver/span_count"
"#,
        )
        .unwrap();
        let manager = Arc::new(Manager::build(&main, &[], default_factories()).unwrap());
        let exporter = CaptureExporter::new();
        let dispatcher = dispatcher(manager, Arc::clone(&exporter));

        dispatcher.start().await;
        dispatcher.record_sender().send(traces_record()).await;

        wait_for(|| exporter.count() == 1).await;
        // Give a discarded derived record a chance to show up wrongly
        tokio::time::sleep(Duration::from_millis(30)).await;
        dispatcher.stop().await;

        let records = exporter.take_all();
        assert_eq!(records.len(), 1, "only the original record is exported");
        assert_eq!(records[0].record_type, RecordType::Traces);
    }

    // ========================================================================
    // Resolution & passthrough paths
    // ========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn unknown_pipeline_drops_record() {
        let main = Document::from_content(
            r#"
processor:
  - name: "sampler/random"
    config:
      sampling_percentage: 100
pipeline:
  - name: "traces_pipeline/common"
    type: "traces"
    processors:
      - "sampler/random"
"#,
        )
        .unwrap();
        let manager = Arc::new(Manager::build(&main, &[], default_factories()).unwrap());
        let exporter = CaptureExporter::new();
        let dispatcher = dispatcher(manager, Arc::clone(&exporter));

        dispatcher.start().await;
        let mut record = traces_record();
        record.record_type = RecordType::Logs;
        dispatcher.record_sender().send(record).await;
        dispatcher.record_sender().send(traces_record()).await;

        wait_for(|| exporter.count() == 1).await;
        dispatcher.stop().await;

        let records = exporter.take_all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_type, RecordType::Traces);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn non_sched_records_bypass_stages() {
        // No pipelines at all - the non-sched path must still export
        let main = Document::from_content("processor: []\npipeline: []").unwrap();
        let manager = Arc::new(Manager::build(&main, &[], default_factories()).unwrap());
        let exporter = CaptureExporter::new();
        let dispatcher = dispatcher(manager, Arc::clone(&exporter));

        dispatcher.start().await;
        dispatcher.non_sched_sender().send(traces_record()).await;

        wait_for(|| exporter.count() == 1).await;
        dispatcher.stop().await;

        assert_eq!(exporter.count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_is_clean_with_idle_workers() {
        let main = Document::from_content("processor: []\npipeline: []").unwrap();
        let manager = Arc::new(Manager::build(&main, &[], default_factories()).unwrap());
        let exporter = CaptureExporter::new();
        let dispatcher = dispatcher(manager, Arc::clone(&exporter));

        dispatcher.start().await;
        // Second start is a no-op
        dispatcher.start().await;
        dispatcher.stop().await;
    }
}
