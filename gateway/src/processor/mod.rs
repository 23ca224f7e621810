//! Processor system for VIRTA
//!
//! Processors are the pipeline stages. Each one is a named, stateful unit
//! built from declarative configuration plus tier-scoped tenant overrides,
//! classified as either a *precheck* stage (admission control, run by the
//! validator before a task exists) or a *scheduled* stage (run inside the
//! dispatcher's transactional task execution).
//!
//! # Stage contract
//!
//! ```text
//! process(&mut Record) -> Ok(None)              continue
//!                         Ok(Some(derived))     continue + fork derived record
//!                         Err(SkipEmptyRecord)  stop, skip (not an error)
//!                         Err(EndOfPipeline)    stop, intentional
//!                         Err(Failed(..))       stop, drop the task
//! ```
//!
//! Classification lives on [`ProcessorKind`], a capability tag - never on
//! the instance name, which is diagnostic only.

use crate::config::SubConfigProcessor;
use crate::metrics::Metrics;
use crate::tier::TierStore;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;
use virta_core::{metadata_keys, Record, StageError, StatusCode};

pub mod factory;

mod attribute_filter;
mod license_checker;
mod metrics_deriver;
mod proxy_validator;
mod rate_limiter;
mod sampler;
mod token_bucket;
mod token_checker;

pub use attribute_filter::AttributeFilter;
pub use factory::{default_factories, ProcessorFactories};
pub use license_checker::LicenseChecker;
pub use metrics_deriver::MetricsDeriver;
pub use proxy_validator::ProxyValidator;
pub use rate_limiter::RateLimiter;
pub use sampler::Sampler;
pub use token_checker::TokenChecker;

/// Capability tag for a processor.
///
/// The tag, not the name string, decides how the pipeline treats a stage:
/// whether it runs in precheck or scheduled position, whether it may fork
/// derived records, and which status code its precheck failures map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorKind {
    /// Resolves/canonicalizes the tenant token (precheck).
    TokenChecker,
    /// Per-tenant rate limiting (precheck).
    RateLimiter,
    /// Proxy payload schema validation (precheck).
    ProxyValidator,
    /// License/quota gate (precheck).
    LicenseChecker,
    /// Probabilistic sampling (scheduled).
    Sampler,
    /// Metadata rewriting (scheduled).
    AttributeFilter,
    /// Derives metric records from traces (scheduled, derivation-capable).
    MetricsDeriver,
}

impl ProcessorKind {
    /// Whether stages of this kind run in the precheck position.
    pub fn is_precheck(self) -> bool {
        matches!(
            self,
            ProcessorKind::TokenChecker
                | ProcessorKind::RateLimiter
                | ProcessorKind::ProxyValidator
                | ProcessorKind::LicenseChecker
        )
    }

    /// Whether stages of this kind may fork derived records.
    pub fn derives(self) -> bool {
        matches!(self, ProcessorKind::MetricsDeriver)
    }

    /// Status code a precheck failure of this kind maps to.
    pub fn reject_status(self) -> StatusCode {
        match self {
            ProcessorKind::TokenChecker => StatusCode::Unauthorized,
            ProcessorKind::RateLimiter => StatusCode::TooManyRequests,
            ProcessorKind::ProxyValidator | ProcessorKind::LicenseChecker => {
                StatusCode::BadRequest
            }
            _ => StatusCode::Internal,
        }
    }

    /// The factory prefix instances of this kind register under.
    pub fn prefix(self) -> &'static str {
        match self {
            ProcessorKind::TokenChecker => "token_checker",
            ProcessorKind::RateLimiter => "rate_limiter",
            ProcessorKind::ProxyValidator => "proxy_validator",
            ProcessorKind::LicenseChecker => "license_checker",
            ProcessorKind::Sampler => "sampler",
            ProcessorKind::AttributeFilter => "attribute_filter",
            ProcessorKind::MetricsDeriver => "metrics_deriver",
        }
    }
}

/// Outcome of one stage invocation: `Ok(Some(_))` carries a derived
/// record forked from the one being processed.
pub type StageResult = std::result::Result<Option<Record>, StageError>;

/// A pipeline stage.
///
/// Implementations are stateful and must tolerate `reload` concurrently
/// with `process`: configuration lives behind an interior-mutability
/// snapshot (see [`CommonConfig`]) that `reload` swaps while in-flight
/// invocations keep reading the previous one.
pub trait Processor: Send + Sync {
    /// The capability tag.
    fn kind(&self) -> ProcessorKind;

    /// Run the stage against one record.
    fn process(&self, record: &mut Record) -> StageResult;

    /// Swap configuration in place.
    fn reload(&self, main: &serde_yaml::Value, subs: &[SubConfigProcessor]);

    /// Release held state (rate-limit buckets, accumulators, ...).
    fn clean(&self) {}

    /// The raw main configuration this instance was built with.
    fn main_config(&self) -> serde_yaml::Value;

    /// The raw tenant overrides this instance was built with.
    fn sub_configs(&self) -> Vec<SubConfigProcessor>;
}

/// Raw configuration snapshot every processor carries.
///
/// Holds the untyped main config and tenant overrides so the manager can
/// carry them across generations on reload. Typed, parsed views live in the
/// concrete processors.
pub struct CommonConfig {
    main: RwLock<serde_yaml::Value>,
    subs: RwLock<Vec<SubConfigProcessor>>,
}

impl CommonConfig {
    /// Snapshot the given raw configuration.
    pub fn new(main: serde_yaml::Value, subs: Vec<SubConfigProcessor>) -> Self {
        Self {
            main: RwLock::new(main),
            subs: RwLock::new(subs),
        }
    }

    /// Replace both snapshots.
    pub fn swap(&self, main: serde_yaml::Value, subs: Vec<SubConfigProcessor>) {
        *self.main.write() = main;
        *self.subs.write() = subs;
    }

    /// Clone of the raw main configuration.
    pub fn main(&self) -> serde_yaml::Value {
        self.main.read().clone()
    }

    /// Clone of the raw tenant overrides.
    pub fn subs(&self) -> Vec<SubConfigProcessor> {
        self.subs.read().clone()
    }
}

/// Parse tier-scoped overrides into a typed [`TierStore`].
///
/// Overrides that fail to parse are skipped with a warning - one broken
/// tenant entry must not poison the rest.
pub(crate) fn build_override_store<C>(subs: &[SubConfigProcessor]) -> TierStore<C>
where
    C: DeserializeOwned + Clone,
{
    let store = TierStore::new();
    for sub in subs {
        match serde_yaml::from_value::<C>(sub.config.config.clone()) {
            Ok(cfg) => store.set(&sub.token, sub.tier, &sub.id, cfg),
            Err(err) => warn!(
                processor = %sub.config.name,
                token = %sub.token,
                tier = sub.tier.as_str(),
                error = %err,
                "skipping unparseable tenant override"
            ),
        }
    }
    store
}

/// The service/instance identifiers a receiver stamped onto a record,
/// used to address tier-scoped overrides.
pub(crate) fn scope_ids(record: &Record) -> (String, String) {
    let meta = record.metadata();
    (
        meta.get(metadata_keys::SERVICE_ID).cloned().unwrap_or_default(),
        meta.get(metadata_keys::INSTANCE_ID).cloned().unwrap_or_default(),
    )
}

/// A named processor handle.
///
/// Thin `Arc` wrapper pairing a processor with its instance name and
/// recording per-stage timing around `process`. Cloning shares the
/// underlying processor, which is what reload identity-preservation is
/// measured against.
#[derive(Clone)]
pub struct Instance {
    name: Arc<str>,
    inner: Arc<dyn Processor>,
}

impl Instance {
    /// Wrap a processor under its instance name.
    pub fn new(name: impl Into<Arc<str>>, inner: Arc<dyn Processor>) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }

    /// The diagnostic instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The capability tag.
    pub fn kind(&self) -> ProcessorKind {
        self.inner.kind()
    }

    /// Whether this instance runs in the precheck position.
    pub fn is_precheck(&self) -> bool {
        self.inner.kind().is_precheck()
    }

    /// Whether this instance may fork derived records.
    pub fn derives(&self) -> bool {
        self.inner.kind().derives()
    }

    /// Run the stage, recording its duration.
    pub fn process(&self, record: &mut Record) -> StageResult {
        let start = Instant::now();
        let out = self.inner.process(record);
        if let Some(metrics) = Metrics::get() {
            metrics.observe_stage(&self.name, start.elapsed());
        }
        out
    }

    /// Swap configuration in place; in-flight callers keep working.
    pub fn reload(&self, main: &serde_yaml::Value, subs: &[SubConfigProcessor]) {
        self.inner.reload(main, subs);
    }

    /// Release held state.
    pub fn clean(&self) {
        self.inner.clean();
    }

    /// The raw main configuration.
    pub fn main_config(&self) -> serde_yaml::Value {
        self.inner.main_config()
    }

    /// The raw tenant overrides.
    pub fn sub_configs(&self) -> Vec<SubConfigProcessor> {
        self.inner.sub_configs()
    }

    /// Whether two handles share the same underlying processor. Reload
    /// keeps this true for instances present in both generations.
    pub fn same_processor(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .finish()
    }
}
