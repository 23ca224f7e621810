//! Generic Record type for VIRTA
//!
//! The Record is the universal envelope that flows through the pipeline.
//! It is protocol-agnostic: receivers decode a wire format into a Record,
//! processors mutate it in place or derive new Records from it, and the
//! exporter ships whatever survives.
//!
//! # Ownership
//!
//! A Record is owned by exactly one task at a time. It is never shared
//! across concurrent workers without an explicit copy; processors receive
//! `&mut Record` and mutations are visible to the caller.

use crate::token::Token;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;

/// The type of telemetry a record carries.
///
/// The `*Derived` variants tag records synthesized mid-pipeline (e.g. a
/// metric derived from a trace); they resolve to their own pipelines and are
/// rewritten to the base type with [`Record::unwrap_derived`] before
/// re-entering dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    /// Distributed trace spans
    Traces,
    /// Metric samples
    Metrics,
    /// Log entries
    Logs,
    /// Continuous profiling payloads
    Profiles,
    /// Traces synthesized by a pipeline stage
    TracesDerived,
    /// Metrics synthesized by a pipeline stage
    MetricsDerived,
    /// Logs synthesized by a pipeline stage
    LogsDerived,
    /// Prometheus pushgateway payloads
    PushGateway,
    /// Prometheus remote-write payloads
    RemoteWrite,
    /// Proxied custom metric/event payloads
    Proxy,
    /// Fault-tolerance alert events
    Fta,
    /// Anything the gateway does not recognize
    Undefined,
}

impl RecordType {
    /// Parse a wire string into a record type, also reporting whether it
    /// names a derived type. Unknown strings map to [`RecordType::Undefined`].
    pub fn parse(s: &str) -> (RecordType, bool) {
        let t = match s {
            "traces" => RecordType::Traces,
            "metrics" => RecordType::Metrics,
            "logs" => RecordType::Logs,
            "profiles" => RecordType::Profiles,
            "traces.derived" => RecordType::TracesDerived,
            "metrics.derived" => RecordType::MetricsDerived,
            "logs.derived" => RecordType::LogsDerived,
            "pushgateway" => RecordType::PushGateway,
            "remotewrite" => RecordType::RemoteWrite,
            "proxy" => RecordType::Proxy,
            "fta" => RecordType::Fta,
            _ => RecordType::Undefined,
        };
        (t, s.ends_with(".derived"))
    }

    /// The canonical wire string for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Traces => "traces",
            RecordType::Metrics => "metrics",
            RecordType::Logs => "logs",
            RecordType::Profiles => "profiles",
            RecordType::TracesDerived => "traces.derived",
            RecordType::MetricsDerived => "metrics.derived",
            RecordType::LogsDerived => "logs.derived",
            RecordType::PushGateway => "pushgateway",
            RecordType::RemoteWrite => "remotewrite",
            RecordType::Proxy => "proxy",
            RecordType::Fta => "fta",
            RecordType::Undefined => "undefined",
        }
    }

    /// True for the `*.derived` variants.
    pub fn is_derived(&self) -> bool {
        matches!(
            self,
            RecordType::TracesDerived | RecordType::MetricsDerived | RecordType::LogsDerived
        )
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The ingestion protocol a record arrived through. Informational only,
/// kept for telemetry labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    /// Arrived over HTTP
    Http,
    /// Arrived over gRPC
    Grpc,
    /// Arrived over ICMP (ping server)
    Icmp,
    /// Synthesized mid-pipeline
    Derived,
}

impl RequestType {
    /// The canonical string for this request type.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Http => "http",
            RequestType::Grpc => "grpc",
            RequestType::Icmp => "icmp",
            RequestType::Derived => "derived",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque record payload.
///
/// The gateway never interprets this; processors decode whichever variant
/// they expect. Receivers hand over raw [`Bytes`] (zero-copy, refcounted) or
/// an already-decoded JSON value.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordData {
    /// No payload. A stage that empties a record reports
    /// [`StageError::SkipEmptyRecord`](crate::StageError::SkipEmptyRecord).
    Empty,
    /// Raw wire payload, not yet decoded.
    Bytes(Bytes),
    /// Decoded structured payload.
    Json(serde_json::Value),
}

impl RecordData {
    /// True when there is nothing left to process or export.
    pub fn is_empty(&self) -> bool {
        match self {
            RecordData::Empty => true,
            RecordData::Bytes(b) => b.is_empty(),
            RecordData::Json(v) => v.is_null(),
        }
    }

    /// Borrow the decoded JSON payload, if this is one.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            RecordData::Json(v) => Some(v),
            _ => None,
        }
    }
}

impl Default for RecordData {
    fn default() -> Self {
        RecordData::Empty
    }
}

/// Lazily allocated metadata map - `None` when empty to keep the envelope small.
pub type Metadata = Option<Box<HashMap<String, String>>>;

fn metadata_ref(m: &Metadata) -> &HashMap<String, String> {
    static EMPTY: std::sync::OnceLock<HashMap<String, String>> = std::sync::OnceLock::new();
    m.as_ref()
        .map(|b| b.as_ref())
        .unwrap_or_else(|| EMPTY.get_or_init(HashMap::new))
}

/// One unit of telemetry data in flight.
#[derive(Debug, Clone)]
pub struct Record {
    /// What kind of telemetry this is; selects the pipeline.
    pub record_type: RecordType,

    /// How the record arrived. Informational.
    pub request_type: RequestType,

    /// Tenant identity. Precheck stages may overwrite this in place.
    pub token: Token,

    /// Opaque payload, interpreted only by processors.
    pub data: RecordData,

    /// Headers and context propagated through the pipeline.
    ///
    /// Lazily allocated - `None` when empty.
    pub metadata: Metadata,

    /// Unix timestamp in nanoseconds at which the receiver created this record.
    pub received_at: i64,
}

impl Record {
    /// Create a new Record with the current receive timestamp.
    pub fn new(
        record_type: RecordType,
        request_type: RequestType,
        token: Token,
        data: RecordData,
    ) -> Self {
        Self {
            record_type,
            request_type,
            token,
            data,
            metadata: None,
            received_at: chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0),
        }
    }

    /// Add a metadata entry, builder style.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata_mut().insert(key.into(), value.into());
        self
    }

    /// Get metadata reference (returns an empty map if none was allocated).
    #[inline]
    pub fn metadata(&self) -> &HashMap<String, String> {
        metadata_ref(&self.metadata)
    }

    /// Get mutable metadata, allocating on first use.
    #[inline]
    pub fn metadata_mut(&mut self) -> &mut HashMap<String, String> {
        self.metadata
            .get_or_insert_with(|| Box::new(HashMap::new()))
    }

    /// Rewrite a derived record type to its base type.
    ///
    /// Called after a derived record's pipeline has been resolved (by the
    /// derived type) and before the record re-enters dispatch, so downstream
    /// stages and the exporter see the base type.
    pub fn unwrap_derived(&mut self) {
        self.record_type = match self.record_type {
            RecordType::TracesDerived => RecordType::Traces,
            RecordType::MetricsDerived => RecordType::Metrics,
            RecordType::LogsDerived => RecordType::Logs,
            other => other,
        };
    }
}
