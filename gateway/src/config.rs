//! Configuration documents for VIRTA
//!
//! Everything the manager consumes is a YAML document. The main document
//! carries `processor` and `pipeline` sections; tenant sub-configuration
//! documents carry a `type` discriminator and a three-tier
//! (`default` / `service` / `instance`) override shape keyed by token.
//!
//! Two legacy shapes are also accepted: a flat "report v1" format and the
//! normalized "report v2" format. V1 is rewritten into v2 documents via a
//! fixed three-processor template before the merge - a pure data-to-data
//! mapping, no text templating.

use crate::error::Result;
use crate::tier::TierKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Document type: native tenant sub-configuration.
pub const DOC_TYPE_SUBCONFIG: &str = "subconfig";
/// Document type: legacy flat report format.
pub const DOC_TYPE_REPORT_V1: &str = "report_v1";
/// Document type: normalized report format (default tier only).
pub const DOC_TYPE_REPORT_V2: &str = "report_v2";
/// Document type: platform overlay (processors + pipelines).
pub const DOC_TYPE_PLATFORM: &str = "platform";
/// Document type: privileged overlay (processors only).
pub const DOC_TYPE_PRIVILEGED: &str = "privileged";

/// One `{name, config}` processor entry in a document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessorConfig {
    /// Instance name, e.g. `"rate_limiter/token_bucket"`. The part before
    /// `/` selects the factory.
    #[serde(default)]
    pub name: String,
    /// Opaque per-processor configuration, interpreted by the factory.
    #[serde(default)]
    pub config: serde_yaml::Value,
}

/// One `{name, type, processors}` pipeline entry in a document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    /// Diagnostic pipeline name, e.g. `"traces_pipeline/common"`.
    #[serde(default)]
    pub name: String,
    /// Record type string this pipeline is bound to.
    #[serde(rename = "type", default)]
    pub record_type: String,
    /// Ordered processor instance names.
    #[serde(default)]
    pub processors: Vec<String>,
}

/// The `processor` + `pipeline` sections of one configuration layer
/// (main, platform or privileged).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LayerConfig {
    /// Declared processor instances.
    #[serde(default)]
    pub processor: Vec<ProcessorConfig>,
    /// Declared pipelines.
    #[serde(default)]
    pub pipeline: Vec<PipelineConfig>,
}

/// Processors declared at one tier scope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessorGroup {
    /// Processor overrides at this scope.
    #[serde(default)]
    pub processor: Vec<ProcessorConfig>,
}

/// Processors declared for one service or instance id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScopedProcessorGroup {
    /// Service or instance identifier.
    #[serde(default)]
    pub id: String,
    /// Processor overrides for that id.
    #[serde(default)]
    pub processor: Vec<ProcessorConfig>,
}

/// Native tenant sub-configuration document (`type: subconfig`), also the
/// shape `report_v2` documents take (default tier only).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubConfig {
    /// Document type discriminator.
    #[serde(rename = "type", default)]
    pub doc_type: String,
    /// Tenant token the overrides apply to.
    #[serde(default)]
    pub token: String,
    /// Default-tier overrides.
    #[serde(default)]
    pub default: ProcessorGroup,
    /// Service-tier overrides.
    #[serde(default)]
    pub service: Vec<ScopedProcessorGroup>,
    /// Instance-tier overrides.
    #[serde(default)]
    pub instance: Vec<ScopedProcessorGroup>,
}

/// A tier-tagged processor override produced by sub-config parsing.
///
/// The manager groups these by processor name and hands each processor the
/// overrides addressed to it at construction and reload time.
#[derive(Debug, Clone)]
pub struct SubConfigProcessor {
    /// Tenant token the override applies to.
    pub token: String,
    /// Which tier the override was declared at.
    pub tier: TierKind,
    /// Service/instance id; empty for the default tier.
    pub id: String,
    /// The override itself.
    pub config: ProcessorConfig,
}

// ---------------------------------------------------------------------------
// Legacy report v1
// ---------------------------------------------------------------------------

/// Legacy flat report document (`type: report_v1`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportV1Config {
    /// Document type discriminator.
    #[serde(rename = "type", default)]
    pub doc_type: String,
    /// Flat report entries, one tenant each.
    #[serde(default)]
    pub report: Vec<ReportV1Entry>,
}

/// One legacy report entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportV1Entry {
    /// Proxy data id for the tenant.
    #[serde(default)]
    pub data_id: i64,
    /// Access token; doubles as the tenant token in v2 shape.
    #[serde(default)]
    pub access_token: String,
    /// Allowed request rate; template default applies when absent.
    #[serde(default)]
    pub max_rate: Option<u64>,
    /// Allowed future timestamp drift in seconds.
    #[serde(default)]
    pub max_future_time_offset: Option<i64>,
}

const REPORT_V1_DEFAULT_RATE: u64 = 1000;
const REPORT_V1_DEFAULT_TIME_OFFSET: i64 = 3600;

#[derive(Serialize)]
struct ProxyTokenTemplate {
    #[serde(rename = "type")]
    kind: &'static str,
    proxy_dataid: i64,
    proxy_token: String,
}

#[derive(Serialize)]
struct TokenBucketTemplate {
    #[serde(rename = "type")]
    kind: &'static str,
    qps: u64,
    burst: u64,
}

#[derive(Serialize)]
struct ProxyValidatorTemplate {
    #[serde(rename = "type")]
    kind: &'static str,
    max_future_time_offset: i64,
}

fn template_entry<T: Serialize>(name: &str, template: &T) -> Option<ProcessorConfig> {
    match serde_yaml::to_value(template) {
        Ok(config) => Some(ProcessorConfig {
            name: name.to_string(),
            config,
        }),
        Err(err) => {
            warn!(processor = name, error = %err, "report_v1 template expansion failed");
            None
        }
    }
}

/// Rewrite a legacy v1 report document into v2-shaped documents.
///
/// Each report entry expands to one v2 document carrying the fixed
/// three-processor admission template: token check, rate limit, proxy
/// validation - parameterized by the entry's data id, rate, access token
/// and time offset. Entries without an access token are dropped with a
/// warning, matching the empty-token rule of native sub-configs.
pub fn convert_report_v1(v1: &ReportV1Config) -> Vec<SubConfig> {
    let mut docs = Vec::with_capacity(v1.report.len());
    for entry in &v1.report {
        if entry.access_token.is_empty() {
            warn!(data_id = entry.data_id, "ignore report_v1 entry without access token");
            continue;
        }

        let qps = entry.max_rate.unwrap_or(REPORT_V1_DEFAULT_RATE);
        let offset = entry
            .max_future_time_offset
            .unwrap_or(REPORT_V1_DEFAULT_TIME_OFFSET);

        let processor: Vec<ProcessorConfig> = [
            template_entry(
                "token_checker/proxy",
                &ProxyTokenTemplate {
                    kind: "proxy",
                    proxy_dataid: entry.data_id,
                    proxy_token: entry.access_token.clone(),
                },
            ),
            template_entry(
                "rate_limiter/token_bucket",
                &TokenBucketTemplate {
                    kind: "token_bucket",
                    qps,
                    burst: qps,
                },
            ),
            template_entry(
                "proxy_validator/common",
                &ProxyValidatorTemplate {
                    kind: "json",
                    max_future_time_offset: offset,
                },
            ),
        ]
        .into_iter()
        .flatten()
        .collect();

        docs.push(SubConfig {
            doc_type: DOC_TYPE_REPORT_V2.to_string(),
            token: entry.access_token.clone(),
            default: ProcessorGroup { processor },
            service: Vec::new(),
            instance: Vec::new(),
        });
    }
    docs
}

// ---------------------------------------------------------------------------
// Document wrapper & loading
// ---------------------------------------------------------------------------

/// One parsed-but-untyped YAML document plus its type discriminator.
#[derive(Debug, Clone)]
pub struct Document {
    raw: serde_yaml::Value,
}

impl Document {
    /// Parse a document from YAML text.
    pub fn from_content(content: &str) -> Result<Self> {
        Ok(Self {
            raw: serde_yaml::from_str(content)?,
        })
    }

    /// Read and parse a document from a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_content(&content)
    }

    /// The `type` discriminator, or `""` when absent.
    pub fn doc_type(&self) -> &str {
        self.raw
            .get("type")
            .and_then(serde_yaml::Value::as_str)
            .unwrap_or("")
    }

    /// Whether a top-level field is present.
    pub fn has(&self, field: &str) -> bool {
        self.raw.get(field).is_some()
    }

    /// Deserialize the whole document into a typed shape.
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_yaml::from_value(self.raw.clone())?)
    }
}

/// Load every `.yml`/`.yaml` document under a directory, sorted by file
/// name. Unreadable or unparseable files are skipped with a warning - a
/// broken tenant file must not take down the whole configuration load.
pub fn load_documents(dir: impl AsRef<Path>) -> Result<Vec<Document>> {
    let mut paths: Vec<_> = std::fs::read_dir(dir.as_ref())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yml") | Some("yaml")
            )
        })
        .collect();
    paths.sort();

    let mut docs = Vec::with_capacity(paths.len());
    for path in paths {
        match Document::from_path(&path) {
            Ok(doc) => docs.push(doc),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable config document");
            }
        }
    }
    Ok(docs)
}

/// First document of the given type, if any.
pub fn select_document<'a>(docs: &'a [Document], doc_type: &str) -> Option<&'a Document> {
    docs.iter().find(|d| d.doc_type() == doc_type)
}
