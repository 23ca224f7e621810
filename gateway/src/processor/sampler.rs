//! Probabilistic sampler processor (scheduled)
//!
//! Keeps a configurable percentage of records. Sampled-out records are
//! emptied and reported as `SkipEmptyRecord`, so they count as skipped, not
//! dropped, and never reach the exporter.
//!
//! Uses an atomic xorshift64 PRNG - lock-free, no allocations on the hot
//! path.

use super::{build_override_store, scope_ids, CommonConfig, Processor, ProcessorKind, StageResult};
use crate::config::SubConfigProcessor;
use crate::error::Result;
use crate::tier::TierStore;
use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;
use virta_core::{Record, RecordData, StageError};

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub(crate) struct SamplerConfig {
    #[serde(rename = "type", default)]
    pub strategy: String,
    /// Percentage of records to keep, 0.0 to 100.0.
    #[serde(default = "default_percentage")]
    pub sampling_percentage: f64,
}

fn default_percentage() -> f64 {
    100.0
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            strategy: String::new(),
            sampling_percentage: default_percentage(),
        }
    }
}

fn threshold_for(percentage: f64) -> u64 {
    let rate = (percentage / 100.0).clamp(0.0, 1.0);
    if rate >= 1.0 {
        u64::MAX
    } else if rate <= 0.0 {
        0
    } else {
        (rate * u64::MAX as f64) as u64
    }
}

/// Probabilistic sampler processor.
pub struct Sampler {
    common: CommonConfig,
    config: RwLock<SamplerConfig>,
    overrides: RwLock<TierStore<SamplerConfig>>,
    /// PRNG state, seeded from the clock (tests reseed deterministically).
    state: AtomicU64,
}

/// Factory for `sampler/*` instances.
pub(crate) fn create(
    main: serde_yaml::Value,
    subs: Vec<SubConfigProcessor>,
) -> Result<Arc<dyn Processor>> {
    let config: SamplerConfig = serde_yaml::from_value(main.clone())?;
    let seed = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64;
    let overrides = build_override_store(&subs);
    Ok(Arc::new(Sampler {
        common: CommonConfig::new(main, subs),
        config: RwLock::new(config),
        overrides: RwLock::new(overrides),
        state: AtomicU64::new(seed | 1),
    }))
}

impl Sampler {
    #[cfg(test)]
    fn reseed(&self, seed: u64) {
        self.state.store(seed | 1, Ordering::Release);
    }

    /// Next xorshift64 value via a CAS loop; lock-free under contention.
    fn next_random(&self) -> u64 {
        loop {
            let old = self.state.load(Ordering::Acquire);
            let mut x = old;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            if self
                .state
                .compare_exchange_weak(old, x, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return x;
            }
        }
    }

    fn should_keep(&self, record: &Record) -> bool {
        let (service_id, instance_id) = scope_ids(record);
        let percentage = self
            .overrides
            .read()
            .resolve(&record.token.original, &service_id, &instance_id)
            .map(|c| c.sampling_percentage)
            .unwrap_or_else(|| self.config.read().sampling_percentage);
        self.next_random() <= threshold_for(percentage)
    }
}

impl Processor for Sampler {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Sampler
    }

    fn process(&self, record: &mut Record) -> StageResult {
        if self.should_keep(record) {
            Ok(None)
        } else {
            record.data = RecordData::Empty;
            Err(StageError::SkipEmptyRecord)
        }
    }

    fn reload(&self, main: &serde_yaml::Value, subs: &[SubConfigProcessor]) {
        match serde_yaml::from_value::<SamplerConfig>(main.clone()) {
            Ok(config) => {
                *self.config.write() = config;
                *self.overrides.write() = build_override_store(subs);
                self.common.swap(main.clone(), subs.to_vec());
            }
            Err(err) => warn!(error = %err, "sampler reload skipped: bad config"),
        }
    }

    fn main_config(&self) -> serde_yaml::Value {
        self.common.main()
    }

    fn sub_configs(&self) -> Vec<SubConfigProcessor> {
        self.common.subs()
    }
}
