//! Tenant identity
//!
//! A [`Token`] describes everything the pipeline needs to know about the
//! tenant a record belongs to: the opaque credential string presented at
//! ingestion plus the numeric data identifiers routing each record type to
//! its storage table. Token-resolution precheck processors decode the
//! credential and fill in the numeric fields.

use crate::record::RecordType;
use std::fmt;

/// Tenant identity attached to every [`Record`](crate::Record).
///
/// Immutable once attached, except that a token-resolution precheck
/// processor may overwrite it wholesale while canonicalizing identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Token {
    /// The opaque credential string as presented at ingestion.
    pub original: String,
    /// Data id for trace records.
    pub traces_data_id: i32,
    /// Data id for metric records.
    pub metrics_data_id: i32,
    /// Data id for log records.
    pub logs_data_id: i32,
    /// Data id for profiling records.
    pub profiles_data_id: i32,
    /// Data id for proxied custom records.
    pub proxy_data_id: i32,
    /// Business unit the tenant belongs to.
    pub biz_id: i32,
    /// Application name within the business unit.
    pub app_name: String,
}

impl Token {
    /// Create a token carrying only the raw credential string.
    pub fn from_original(original: impl Into<String>) -> Self {
        Self {
            original: original.into(),
            ..Self::default()
        }
    }

    /// The numeric data id a record of the given type routes to.
    ///
    /// Derived types share their base type's id; remote-write, pushgateway
    /// and alert events all land in the metrics table. Returns -1 for
    /// undefined types.
    pub fn data_id(&self, rtype: RecordType) -> i32 {
        match rtype {
            RecordType::Traces | RecordType::TracesDerived => self.traces_data_id,
            RecordType::Metrics
            | RecordType::MetricsDerived
            | RecordType::PushGateway
            | RecordType::RemoteWrite
            | RecordType::Fta => self.metrics_data_id,
            RecordType::Logs | RecordType::LogsDerived => self.logs_data_id,
            RecordType::Profiles => self.profiles_data_id,
            RecordType::Proxy => self.proxy_data_id,
            RecordType::Undefined => -1,
        }
    }

    /// `{biz_id}-{app_name}` label used in telemetry.
    pub fn biz_app(&self) -> String {
        format!("{}-{}", self.biz_id, self.app_name)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}
