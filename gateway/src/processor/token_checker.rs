//! Token-resolution precheck processor
//!
//! Decodes the credential a record arrived with into a full [`Token`] -
//! data ids per record type plus business unit and application name. Two
//! decoders ship:
//!
//! - `fixed`: a statically configured mapping, for single-tenant
//!   deployments and tests.
//! - `proxy`: matches the credential against a configured proxy data id /
//!   access token pair (the shape report-format tenants use).
//!
//! Failures map to `Unauthorized` at the validator.

use super::{CommonConfig, Processor, ProcessorKind, StageResult};
use crate::config::SubConfigProcessor;
use crate::error::{GatewayError, Result};
use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;
use virta_core::{Record, StageError, Token};

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct TokenCheckerConfig {
    #[serde(rename = "type", default)]
    pub decoder: String,
    // fixed decoder
    #[serde(default)]
    pub fixed_token: String,
    #[serde(default)]
    pub traces_dataid: i32,
    #[serde(default)]
    pub metrics_dataid: i32,
    #[serde(default)]
    pub logs_dataid: i32,
    #[serde(default)]
    pub profiles_dataid: i32,
    #[serde(default)]
    pub biz_id: i32,
    #[serde(default)]
    pub app_name: String,
    // proxy decoder
    #[serde(default)]
    pub proxy_dataid: i32,
    #[serde(default)]
    pub proxy_token: String,
}

const DECODER_FIXED: &str = "fixed";
const DECODER_PROXY: &str = "proxy";

/// Token-resolution precheck processor.
pub struct TokenChecker {
    common: CommonConfig,
    config: RwLock<TokenCheckerConfig>,
}

/// Factory for `token_checker/*` instances.
pub(crate) fn create(
    main: serde_yaml::Value,
    subs: Vec<SubConfigProcessor>,
) -> Result<Arc<dyn Processor>> {
    let config: TokenCheckerConfig = serde_yaml::from_value(main.clone())?;
    match config.decoder.as_str() {
        DECODER_FIXED | DECODER_PROXY => {}
        other => {
            return Err(GatewayError::build(
                "token_checker",
                format!("unknown decoder '{other}'"),
            ))
        }
    }
    Ok(Arc::new(TokenChecker {
        common: CommonConfig::new(main, subs),
        config: RwLock::new(config),
    }))
}

impl TokenChecker {
    fn decode_fixed(&self, record: &mut Record, config: &TokenCheckerConfig) -> StageResult {
        let original = if record.token.original.is_empty() {
            config.fixed_token.clone()
        } else {
            record.token.original.clone()
        };
        record.token = Token {
            original,
            traces_data_id: config.traces_dataid,
            metrics_data_id: config.metrics_dataid,
            logs_data_id: config.logs_dataid,
            profiles_data_id: config.profiles_dataid,
            proxy_data_id: record.token.proxy_data_id,
            biz_id: config.biz_id,
            app_name: config.app_name.clone(),
        };
        Ok(None)
    }

    fn decode_proxy(&self, record: &mut Record, config: &TokenCheckerConfig) -> StageResult {
        if record.token.original != config.proxy_token {
            return Err(StageError::failed(format!(
                "reject invalid proxy token '{}'",
                record.token.original
            )));
        }
        record.token.proxy_data_id = config.proxy_dataid;
        Ok(None)
    }
}

impl Processor for TokenChecker {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::TokenChecker
    }

    fn process(&self, record: &mut Record) -> StageResult {
        let config = self.config.read().clone();
        match config.decoder.as_str() {
            DECODER_FIXED => self.decode_fixed(record, &config),
            DECODER_PROXY => self.decode_proxy(record, &config),
            other => Err(StageError::failed(format!("unknown decoder '{other}'"))),
        }
    }

    fn reload(&self, main: &serde_yaml::Value, subs: &[SubConfigProcessor]) {
        match serde_yaml::from_value::<TokenCheckerConfig>(main.clone()) {
            Ok(config) => {
                *self.config.write() = config;
                self.common.swap(main.clone(), subs.to_vec());
            }
            Err(err) => warn!(error = %err, "token_checker reload skipped: bad config"),
        }
    }

    fn main_config(&self) -> serde_yaml::Value {
        self.common.main()
    }

    fn sub_configs(&self) -> Vec<SubConfigProcessor> {
        self.common.subs()
    }
}
