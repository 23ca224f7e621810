//! Metadata rewriting processor (scheduled)
//!
//! Inserts and deletes record metadata entries from declarative rules.
//! Receivers stamp raw protocol attributes onto records; this stage
//! normalizes them before export.

use super::{CommonConfig, Processor, ProcessorKind, StageResult};
use crate::config::SubConfigProcessor;
use crate::error::Result;
use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;
use virta_core::{Record, StageError};

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct InsertRule {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct AttributeFilterConfig {
    /// Metadata entries to insert (existing keys are overwritten).
    #[serde(default)]
    pub insert: Vec<InsertRule>,
    /// Metadata keys to delete.
    #[serde(default)]
    pub delete: Vec<String>,
}

/// Metadata rewriting processor.
pub struct AttributeFilter {
    common: CommonConfig,
    config: RwLock<AttributeFilterConfig>,
}

/// Factory for `attribute_filter/*` instances.
pub(crate) fn create(
    main: serde_yaml::Value,
    subs: Vec<SubConfigProcessor>,
) -> Result<Arc<dyn Processor>> {
    let config: AttributeFilterConfig = serde_yaml::from_value(main.clone())?;
    Ok(Arc::new(AttributeFilter {
        common: CommonConfig::new(main, subs),
        config: RwLock::new(config),
    }))
}

impl Processor for AttributeFilter {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::AttributeFilter
    }

    fn process(&self, record: &mut Record) -> StageResult {
        let config = self.config.read().clone();
        if config.insert.is_empty() && config.delete.is_empty() {
            return Ok(None);
        }

        let meta = record.metadata_mut();
        for rule in &config.insert {
            if !rule.key.is_empty() {
                meta.insert(rule.key.clone(), rule.value.clone());
            }
        }
        for key in &config.delete {
            meta.remove(key);
        }
        Ok(None)
    }

    fn reload(&self, main: &serde_yaml::Value, subs: &[SubConfigProcessor]) {
        match serde_yaml::from_value::<AttributeFilterConfig>(main.clone()) {
            Ok(config) => {
                *self.config.write() = config;
                self.common.swap(main.clone(), subs.to_vec());
            }
            Err(err) => warn!(error = %err, "attribute_filter reload skipped: bad config"),
        }
    }

    fn main_config(&self) -> serde_yaml::Value {
        self.common.main()
    }

    fn sub_configs(&self) -> Vec<SubConfigProcessor> {
        self.common.subs()
    }
}
