//! Processor factory registry
//!
//! Maps a kind prefix (the part of an instance name before `/`) to a
//! constructor. The registry is an explicitly constructed object handed to
//! the manager at build time; a process-global instance carrying the
//! built-in factories is exposed behind [`default_factories`] for call
//! sites that cannot thread one through.

use super::{
    attribute_filter, license_checker, metrics_deriver, proxy_validator, rate_limiter, sampler,
    token_checker, Processor,
};
use crate::config::SubConfigProcessor;
use crate::error::Result;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::info;

/// Constructor signature: raw main config plus the tenant overrides
/// addressed to the instance.
pub type CreateFn = Arc<
    dyn Fn(serde_yaml::Value, Vec<SubConfigProcessor>) -> Result<Arc<dyn Processor>>
        + Send
        + Sync,
>;

/// Name-prefix → constructor table.
pub struct ProcessorFactories {
    creators: HashMap<String, CreateFn>,
}

impl ProcessorFactories {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            creators: HashMap::new(),
        }
    }

    /// Create a registry with every built-in processor registered.
    pub fn with_builtins() -> Self {
        let mut factories = Self::new();
        factories.register("token_checker", token_checker::create);
        factories.register("rate_limiter", rate_limiter::create);
        factories.register("proxy_validator", proxy_validator::create);
        factories.register("license_checker", license_checker::create);
        factories.register("sampler", sampler::create);
        factories.register("attribute_filter", attribute_filter::create);
        factories.register("metrics_deriver", metrics_deriver::create);
        factories
    }

    /// Register a constructor under a kind prefix, replacing any previous
    /// registration for the same prefix.
    pub fn register<F>(&mut self, prefix: impl Into<String>, create: F)
    where
        F: Fn(serde_yaml::Value, Vec<SubConfigProcessor>) -> Result<Arc<dyn Processor>>
            + Send
            + Sync
            + 'static,
    {
        let prefix = prefix.into();
        info!(prefix = %prefix, "registered processor factory");
        self.creators.insert(prefix, Arc::new(create));
    }

    /// Look up the constructor for an instance name. The lookup key is the
    /// part of the name before the first `/`.
    pub fn get(&self, name: &str) -> Option<CreateFn> {
        let prefix = name.split('/').next().unwrap_or(name);
        self.creators.get(prefix).cloned()
    }

    /// Number of registered factories.
    pub fn len(&self) -> usize {
        self.creators.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.creators.is_empty()
    }
}

impl Default for ProcessorFactories {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Process-global registry carrying the built-in factories.
pub fn default_factories() -> &'static ProcessorFactories {
    static FACTORIES: OnceLock<ProcessorFactories> = OnceLock::new();
    FACTORIES.get_or_init(ProcessorFactories::with_builtins)
}
