//! Pipeline manager: build, merge, reload
//!
//! The manager turns one main document plus a set of tenant sub-config
//! documents into a generation of processor instances and pipelines.
//! Configuration errors are never fatal to the whole build: the offending
//! unit (one processor, one pipeline, one tenant document) is skipped with
//! a log line. Only an unparseable top-level document aborts - and on
//! reload that leaves the previous generation fully intact.
//!
//! # Reload semantics
//!
//! Reload builds a brand-new generation from scratch, then grafts it onto
//! the live one: processor instances present in both generations are
//! *reloaded in place* (so in-flight tasks holding the old instance observe
//! the new configuration without a pointer swap), brand-new instances are
//! inserted, and the pipelines map is replaced in a single assignment.

use super::Pipeline;
use crate::config::{
    convert_report_v1, select_document, Document, LayerConfig, ReportV1Config, SubConfig,
    SubConfigProcessor, DOC_TYPE_PLATFORM, DOC_TYPE_PRIVILEGED, DOC_TYPE_REPORT_V1,
    DOC_TYPE_REPORT_V2, DOC_TYPE_SUBCONFIG,
};
use crate::error::Result;
use crate::metrics::Metrics;
use crate::processor::{Instance, ProcessorFactories};
use crate::tier::TierKind;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use virta_core::RecordType;

const LAYER_MAIN: &str = "main";
const LAYER_PLATFORM: &str = "platform";
const LAYER_PRIVILEGED: &str = "privileged";

type ProcessorMap = HashMap<String, Instance>;
type PipelineMap = HashMap<RecordType, Arc<Pipeline>>;
type SubConfigMap = HashMap<String, Vec<SubConfigProcessor>>;

/// Holds the current generation's processors and pipelines.
///
/// Read-mostly: dispatch workers resolve processors and pipelines on every
/// record; writes happen only on reload, and the pipelines map is swapped
/// wholesale so no record is ever routed through a half-built set.
pub struct Manager {
    processors: RwLock<ProcessorMap>,
    pipelines: RwLock<PipelineMap>,
}

impl Manager {
    /// Build the first generation from the main document plus tenant
    /// sub-configuration documents.
    pub fn build(
        main: &Document,
        subs: &[Document],
        factories: &ProcessorFactories,
    ) -> Result<Manager> {
        let (processors, pipelines) = build_generation(main, subs, factories)?;
        Ok(Manager {
            processors: RwLock::new(processors),
            pipelines: RwLock::new(pipelines),
        })
    }

    /// Build a fresh generation and graft it onto the live one.
    ///
    /// Processor identity is preserved: an instance named in both
    /// generations is reloaded in place and keeps serving in-flight tasks;
    /// the throwaway new instance has its state released first. The
    /// pipelines map is replaced in one assignment. A parse failure leaves
    /// the live generation untouched.
    pub fn reload(
        &self,
        main: &Document,
        subs: &[Document],
        factories: &ProcessorFactories,
    ) -> Result<()> {
        let (new_processors, new_pipelines) = match build_generation(main, subs, factories) {
            Ok(generation) => generation,
            Err(err) => {
                if let Some(metrics) = Metrics::get() {
                    metrics.record_reload(false);
                }
                error!(error = %err, "manager reload failed, keeping previous generation");
                return Err(err);
            }
        };

        {
            let mut processors = self.processors.write();
            for (name, new_instance) in new_processors {
                match processors.get(&name) {
                    Some(live) => {
                        // The new instance only donates its configuration.
                        new_instance.clean();
                        live.reload(&new_instance.main_config(), &new_instance.sub_configs());
                    }
                    None => {
                        processors.insert(name, new_instance);
                    }
                }
            }
        }

        *self.pipelines.write() = new_pipelines;

        if let Some(metrics) = Metrics::get() {
            metrics.record_reload(true);
        }
        info!("manager reloaded");
        Ok(())
    }

    /// Processor instance by name, if the current generation has one.
    pub fn get_processor(&self, name: &str) -> Option<Instance> {
        self.processors.read().get(name).cloned()
    }

    /// Pipeline for a record type, if the current generation has one.
    pub fn get_pipeline(&self, rtype: RecordType) -> Option<Arc<Pipeline>> {
        self.pipelines.read().get(&rtype).cloned()
    }

    /// Number of live processor instances.
    pub fn processor_count(&self) -> usize {
        self.processors.read().len()
    }

    /// Number of live pipelines.
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.read().len()
    }

    /// Run the cleanup hook on every live processor. Part of the stop
    /// sequence, after all workers have drained.
    pub fn clean_all(&self) {
        for instance in self.processors.read().values() {
            instance.clean();
        }
    }
}

fn build_generation(
    main: &Document,
    subs: &[Document],
    factories: &ProcessorFactories,
) -> Result<(ProcessorMap, PipelineMap)> {
    // An unparseable main document aborts the whole build.
    let main_conf: LayerConfig = main.parse()?;

    let sub_configs = merge_sub_configs(vec![
        parse_sub_config_docs(subs),
        parse_report_v1_docs(subs),
        parse_report_v2_docs(subs),
    ]);

    let mut processors = parse_processors(LAYER_MAIN, &main_conf, &sub_configs, factories);
    let mut pipelines = parse_pipelines(LAYER_MAIN, &main_conf, &processors);

    // Platform overlay: processors and pipelines, replacing same-named units.
    if let Some(platform) = select_document(subs, DOC_TYPE_PLATFORM) {
        let layer: LayerConfig = platform.parse()?;
        if platform.has("processor") {
            let overlay = parse_processors(LAYER_PLATFORM, &layer, &sub_configs, factories);
            merge_processors(&mut processors, overlay);
        }
        if platform.has("pipeline") {
            let overlay = parse_pipelines(LAYER_PLATFORM, &layer, &processors);
            merge_pipelines(&mut pipelines, overlay);
        }
    }

    // Privileged overlay: processors only.
    if let Some(privileged) = select_document(subs, DOC_TYPE_PRIVILEGED) {
        let layer: LayerConfig = privileged.parse()?;
        if privileged.has("processor") {
            let overlay = parse_processors(LAYER_PRIVILEGED, &layer, &sub_configs, factories);
            merge_processors(&mut processors, overlay);
        }
    }

    Ok((processors, pipelines))
}

/// Instantiate every declared processor. Empty names, duplicates, unknown
/// factories and constructor failures skip the entry, never the build.
fn parse_processors(
    layer: &str,
    conf: &LayerConfig,
    sub_configs: &SubConfigMap,
    factories: &ProcessorFactories,
) -> ProcessorMap {
    let mut processors = ProcessorMap::new();
    for entry in &conf.processor {
        if entry.name.is_empty() {
            error!(layer, "empty processor name is illegal");
            continue;
        }
        if processors.contains_key(&entry.name) {
            error!(layer, name = %entry.name, "duplicated processor name");
            continue;
        }
        let Some(create) = factories.get(&entry.name) else {
            error!(layer, name = %entry.name, "unknown processor type");
            continue;
        };

        let overrides = sub_configs.get(&entry.name).cloned().unwrap_or_default();
        match create.as_ref()(entry.config.clone(), overrides) {
            Ok(processor) => {
                processors.insert(entry.name.clone(), Instance::new(entry.name.as_str(), processor));
            }
            Err(err) => {
                error!(layer, name = %entry.name, error = %err, "failed to create processor instance");
            }
        }
    }
    processors
}

/// Assemble every declared pipeline. A pipeline with an unresolved record
/// type, a missing processor reference or a failed ordering invariant is
/// dropped entirely - fail closed, never partially built.
fn parse_pipelines(layer: &str, conf: &LayerConfig, processors: &ProcessorMap) -> PipelineMap {
    let mut pipelines = PipelineMap::new();
    for entry in &conf.pipeline {
        if entry.name.is_empty() {
            error!(layer, "empty pipeline name is illegal");
            continue;
        }

        let (rtype, derived) = RecordType::parse(&entry.record_type);
        if rtype == RecordType::Undefined {
            error!(layer, name = %entry.name, rtype = %entry.record_type, "unknown record type");
            record_built(&entry.name, &entry.record_type, false);
            continue;
        }
        // Each record type binds at most one pipeline per layer.
        if pipelines.contains_key(&rtype) {
            error!(layer, name = %entry.name, rtype = %rtype, "duplicated pipeline type");
            continue;
        }

        let mut instances = Vec::with_capacity(entry.processors.len());
        for name in &entry.processors {
            let Some(instance) = processors.get(name) else {
                error!(layer, pipeline = %entry.name, processor = %name, "unknown processor");
                break;
            };
            // Re-derivation from a derived pipeline risks unbounded forking;
            // warn only, the dispatcher ignores derivations from that pool.
            if derived && instance.derives() {
                warn!(
                    pipeline = %entry.name,
                    processor = %name,
                    "derived record type should not carry a derivation-capable processor"
                );
            }
            instances.push(instance.clone());
        }

        // Any unresolved stage fails the whole pipeline.
        if instances.len() != entry.processors.len() {
            record_built(&entry.name, &entry.record_type, false);
            error!(layer, name = %entry.name, "build pipeline failed");
            continue;
        }

        let pipeline = Pipeline::new(entry.name.as_str(), rtype, instances);
        if !pipeline.validate() {
            record_built(&entry.name, &entry.record_type, false);
            error!(layer, name = %entry.name, "validate pipeline failed: precheck stages must precede scheduled stages");
            continue;
        }

        record_built(&entry.name, &entry.record_type, true);
        info!(layer, %pipeline, "build pipeline");
        pipelines.insert(rtype, Arc::new(pipeline));
    }
    pipelines
}

fn record_built(name: &str, rtype: &str, ok: bool) {
    if let Some(metrics) = Metrics::get() {
        metrics.record_pipeline_built(name, rtype, ok);
    }
}

fn push_group(
    out: &mut SubConfigMap,
    token: &str,
    tier: TierKind,
    id: &str,
    group: &[crate::config::ProcessorConfig],
) {
    for processor in group {
        out.entry(processor.name.clone())
            .or_default()
            .push(SubConfigProcessor {
                token: token.to_string(),
                tier,
                id: id.to_string(),
                config: processor.clone(),
            });
    }
}

fn collect_sub_config(out: &mut SubConfigMap, sub: &SubConfig) {
    push_group(out, &sub.token, TierKind::Default, "", &sub.default.processor);
    for service in &sub.service {
        push_group(out, &sub.token, TierKind::Service, &service.id, &service.processor);
    }
    for instance in &sub.instance {
        push_group(
            out,
            &sub.token,
            TierKind::Instance,
            &instance.id,
            &instance.processor,
        );
    }
}

/// Parse native (`type: subconfig`) tenant documents into per-processor
/// override lists across all three tiers.
fn parse_sub_config_docs(docs: &[Document]) -> SubConfigMap {
    let mut out = SubConfigMap::new();
    for doc in docs {
        if doc.doc_type() != DOC_TYPE_SUBCONFIG {
            continue;
        }
        let sub: SubConfig = match doc.parse() {
            Ok(sub) => sub,
            Err(err) => {
                error!(error = %err, "failed to parse subconfig document");
                continue;
            }
        };
        if sub.token.is_empty() {
            warn!("ignore empty token in subconfig");
            continue;
        }
        collect_sub_config(&mut out, &sub);
    }
    out
}

/// Parse `report_v2` documents: same shape as native sub-configs but
/// default tier only.
fn parse_report_v2_docs(docs: &[Document]) -> SubConfigMap {
    let mut out = SubConfigMap::new();
    for doc in docs {
        if doc.doc_type() != DOC_TYPE_REPORT_V2 {
            continue;
        }
        let sub: SubConfig = match doc.parse() {
            Ok(sub) => sub,
            Err(err) => {
                error!(error = %err, "failed to parse report_v2 document");
                continue;
            }
        };
        if sub.token.is_empty() {
            warn!("ignore empty token in report_v2 config");
            continue;
        }
        push_group(&mut out, &sub.token, TierKind::Default, "", &sub.default.processor);
    }
    out
}

/// Parse legacy `report_v1` documents by translating each into v2 shape
/// first; the expanded documents merge exactly like native v2 ones.
fn parse_report_v1_docs(docs: &[Document]) -> SubConfigMap {
    let mut out = SubConfigMap::new();
    for doc in docs {
        if doc.doc_type() != DOC_TYPE_REPORT_V1 {
            continue;
        }
        let v1: ReportV1Config = match doc.parse() {
            Ok(v1) => v1,
            Err(err) => {
                error!(error = %err, "failed to parse report_v1 document");
                continue;
            }
        };
        for sub in convert_report_v1(&v1) {
            push_group(&mut out, &sub.token, TierKind::Default, "", &sub.default.processor);
        }
    }
    out
}

fn merge_sub_configs(items: Vec<SubConfigMap>) -> SubConfigMap {
    let mut dst = SubConfigMap::new();
    for item in items {
        for (name, mut overrides) in item {
            dst.entry(name).or_default().append(&mut overrides);
        }
    }
    dst
}

/// Overlay processors, releasing the state of any replaced instance first.
fn merge_processors(main: &mut ProcessorMap, overlay: ProcessorMap) {
    for (name, instance) in overlay {
        if let Some(replaced) = main.get(&name) {
            info!(name = %name, "merge overlay processor");
            replaced.clean();
        }
        main.insert(name, instance);
    }
}

/// Overlay pipelines, replacing same-typed entries.
fn merge_pipelines(main: &mut PipelineMap, overlay: PipelineMap) {
    for (rtype, pipeline) in overlay {
        main.insert(rtype, pipeline);
    }
}
