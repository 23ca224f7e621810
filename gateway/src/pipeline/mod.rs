//! Pipeline entity and manager
//!
//! A [`Pipeline`] is the built, immutable-per-generation artifact: an
//! ordered processor list bound to one record type, with derived
//! precheck/scheduled sub-views. The [`Manager`] builds pipelines from
//! declarative documents and hot-reloads them.

mod manager;

pub use manager::Manager;

use crate::processor::Instance;
use std::fmt;
use std::sync::Arc;
use virta_core::RecordType;

/// An ordered, validated processor sequence bound to one record type.
///
/// Immutable once built; reload replaces whole pipelines rather than
/// mutating them.
#[derive(Clone)]
pub struct Pipeline {
    name: Arc<str>,
    record_type: RecordType,
    processors: Vec<Instance>,
}

impl Pipeline {
    /// Assemble a pipeline. Run [`validate`](Pipeline::validate) before
    /// putting it live.
    pub fn new(
        name: impl Into<Arc<str>>,
        record_type: RecordType,
        processors: Vec<Instance>,
    ) -> Self {
        Self {
            name: name.into(),
            record_type,
            processors,
        }
    }

    /// Diagnostic pipeline name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The record type this pipeline serves.
    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    /// Full ordered stage names, for introspection and diagnostics.
    pub fn all_processors(&self) -> Vec<String> {
        self.processors
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Ordered names of the precheck-classified stages.
    pub fn pre_check_processors(&self) -> Vec<String> {
        self.processors
            .iter()
            .filter(|p| p.is_precheck())
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Ordered names of the scheduled (non-precheck) stages.
    pub fn sched_processors(&self) -> Vec<String> {
        self.processors
            .iter()
            .filter(|p| !p.is_precheck())
            .map(|p| p.name().to_string())
            .collect()
    }

    /// The underlying instances, in declared order.
    pub fn instances(&self) -> &[Instance] {
        &self.processors
    }

    /// Ordering invariant: every precheck stage must occupy an index
    /// strictly below every scheduled stage. Checked by index comparison -
    /// declaration order may interleave the classes arbitrarily before
    /// validation runs.
    pub fn validate(&self) -> bool {
        let last_precheck = self
            .processors
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_precheck())
            .map(|(i, _)| i)
            .max();
        let first_sched = self
            .processors
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_precheck())
            .map(|(i, _)| i)
            .min();

        match (last_precheck, first_sched) {
            (Some(pre), Some(sched)) => pre < sched,
            // Only one class present (or none): trivially ordered
            _ => true,
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pipeline={}; type={}; processors={:?}",
            self.name,
            self.record_type,
            self.all_processors()
        )
    }
}
