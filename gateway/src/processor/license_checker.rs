//! License gate precheck processor
//!
//! Rejects records once the configured license has expired or the number of
//! distinct reporting instances exceeds the licensed node count. Failures
//! map to `BadRequest`.

use super::{scope_ids, CommonConfig, Processor, ProcessorKind, StageResult};
use crate::config::SubConfigProcessor;
use crate::error::Result;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;
use virta_core::{Record, StageError};

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct LicenseCheckerConfig {
    /// Unix timestamp after which records are rejected. 0 disables the check.
    #[serde(default)]
    pub expire_at: i64,
    /// Maximum number of distinct reporting instances. 0 disables the check.
    #[serde(default)]
    pub max_nodes: usize,
}

/// License gate precheck processor.
pub struct LicenseChecker {
    common: CommonConfig,
    config: RwLock<LicenseCheckerConfig>,
    nodes: RwLock<HashSet<String>>,
}

/// Factory for `license_checker/*` instances.
pub(crate) fn create(
    main: serde_yaml::Value,
    subs: Vec<SubConfigProcessor>,
) -> Result<Arc<dyn Processor>> {
    let config: LicenseCheckerConfig = serde_yaml::from_value(main.clone())?;
    Ok(Arc::new(LicenseChecker {
        common: CommonConfig::new(main, subs),
        config: RwLock::new(config),
        nodes: RwLock::new(HashSet::new()),
    }))
}

impl Processor for LicenseChecker {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::LicenseChecker
    }

    fn process(&self, record: &mut Record) -> StageResult {
        let config = self.config.read().clone();

        if config.expire_at > 0 && chrono::Utc::now().timestamp() > config.expire_at {
            return Err(StageError::failed("license expired"));
        }

        if config.max_nodes > 0 {
            let (_, instance_id) = scope_ids(record);
            if !instance_id.is_empty() {
                let mut nodes = self.nodes.write();
                if !nodes.contains(&instance_id) && nodes.len() >= config.max_nodes {
                    return Err(StageError::failed(format!(
                        "licensed node count {} exceeded",
                        config.max_nodes
                    )));
                }
                nodes.insert(instance_id);
            }
        }

        Ok(None)
    }

    fn reload(&self, main: &serde_yaml::Value, subs: &[SubConfigProcessor]) {
        match serde_yaml::from_value::<LicenseCheckerConfig>(main.clone()) {
            Ok(config) => {
                *self.config.write() = config;
                self.common.swap(main.clone(), subs.to_vec());
            }
            Err(err) => warn!(error = %err, "license_checker reload skipped: bad config"),
        }
    }

    fn clean(&self) {
        self.nodes.write().clear();
    }

    fn main_config(&self) -> serde_yaml::Value {
        self.common.main()
    }

    fn sub_configs(&self) -> Vec<SubConfigProcessor> {
        self.common.subs()
    }
}
