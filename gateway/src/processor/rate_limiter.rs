//! Per-tenant rate-limiting precheck processor
//!
//! One lock-free token bucket per tenant token. The bucket parameters come
//! from the main configuration, overridable per tenant through the tiered
//! sub-configuration (a tenant's own qps at the default tier, or narrower
//! service/instance scopes).
//!
//! Rejections map to `TooManyRequests` at the validator.

use super::token_bucket::TokenBucket;
use super::{build_override_store, scope_ids, CommonConfig, Processor, ProcessorKind, StageResult};
use crate::config::SubConfigProcessor;
use crate::error::{GatewayError, Result};
use crate::tier::TierStore;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use virta_core::{Record, StageError};

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub(crate) struct RateLimiterConfig {
    #[serde(rename = "type", default)]
    pub strategy: String,
    #[serde(default)]
    pub qps: u64,
    #[serde(default)]
    pub burst: u64,
}

const STRATEGY_TOKEN_BUCKET: &str = "token_bucket";

/// Per-tenant rate-limiting precheck processor.
pub struct RateLimiter {
    common: CommonConfig,
    config: RwLock<RateLimiterConfig>,
    overrides: RwLock<TierStore<RateLimiterConfig>>,
    buckets: RwLock<HashMap<String, Arc<TokenBucket>>>,
}

/// Factory for `rate_limiter/*` instances.
pub(crate) fn create(
    main: serde_yaml::Value,
    subs: Vec<SubConfigProcessor>,
) -> Result<Arc<dyn Processor>> {
    let config: RateLimiterConfig = serde_yaml::from_value(main.clone())?;
    if !config.strategy.is_empty() && config.strategy != STRATEGY_TOKEN_BUCKET {
        return Err(GatewayError::build(
            "rate_limiter",
            format!("unknown strategy '{}'", config.strategy),
        ));
    }
    let overrides = build_override_store(&subs);
    Ok(Arc::new(RateLimiter {
        common: CommonConfig::new(main, subs),
        config: RwLock::new(config),
        overrides: RwLock::new(overrides),
        buckets: RwLock::new(HashMap::new()),
    }))
}

impl RateLimiter {
    fn bucket_for(&self, record: &Record) -> Arc<TokenBucket> {
        let token = record.token.original.clone();
        if let Some(bucket) = self.buckets.read().get(&token) {
            return Arc::clone(bucket);
        }

        let (service_id, instance_id) = scope_ids(record);
        let config = self
            .overrides
            .read()
            .resolve(&token, &service_id, &instance_id)
            .unwrap_or_else(|| self.config.read().clone());
        debug!(token = %token, qps = config.qps, burst = config.burst, "new rate-limit bucket");

        let bucket = Arc::new(TokenBucket::new(config.qps, config.burst));
        self.buckets
            .write()
            .entry(token)
            .or_insert_with(|| Arc::clone(&bucket))
            .clone()
    }
}

impl Processor for RateLimiter {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::RateLimiter
    }

    fn process(&self, record: &mut Record) -> StageResult {
        if self.bucket_for(record).try_acquire() {
            Ok(None)
        } else {
            Err(StageError::failed(format!(
                "rate limited for token '{}'",
                record.token.original
            )))
        }
    }

    fn reload(&self, main: &serde_yaml::Value, subs: &[SubConfigProcessor]) {
        match serde_yaml::from_value::<RateLimiterConfig>(main.clone()) {
            Ok(config) => {
                *self.config.write() = config;
                *self.overrides.write() = build_override_store(subs);
                self.buckets.write().clear();
                self.common.swap(main.clone(), subs.to_vec());
            }
            Err(err) => warn!(error = %err, "rate_limiter reload skipped: bad config"),
        }
    }

    fn clean(&self) {
        self.buckets.write().clear();
    }

    fn main_config(&self) -> serde_yaml::Value {
        self.common.main()
    }

    fn sub_configs(&self) -> Vec<SubConfigProcessor> {
        self.common.subs()
    }
}
