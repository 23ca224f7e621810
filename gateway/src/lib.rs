//! VIRTA - telemetry-ingestion pipeline core
//!
//! VIRTA sits between protocol receivers (OTLP, remote-write, proxy, ...)
//! and an export layer. Receivers decode wire payloads into
//! [`Record`](virta_core::Record)s; VIRTA resolves each record's pipeline,
//! runs its precheck stage for admission control, then executes the
//! scheduled stages concurrently and hands survivors to the exporter.
//!
//! ```text
//! Receivers ──► Validator (precheck) ──► Dispatcher ──► Exporter
//!                                          │
//!                    Manager (pipelines, processors, tiered overrides)
//! ```
//!
//! The three load-bearing pieces:
//!
//! - [`Manager`]: builds, merges, validates and hot-reloads the per-tenant
//!   processing graphs from declarative YAML documents.
//! - [`Validator`]: runs a record through its pipeline's precheck stage and
//!   maps failures to transport-level status codes.
//! - [`Dispatcher`]: the concurrent engine - worker pools draining the
//!   original and derived task queues, executing scheduled stages
//!   transactionally and feeding derived records back through resolution.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod export;
pub mod metrics;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod tier;
pub mod validator;

pub use config::{Document, LayerConfig, SubConfigProcessor};
pub use dispatch::{Dispatcher, DispatcherConfig, RecordSender, Task};
pub use error::{GatewayError, Result};
pub use export::{Exporter, StdoutExporter};
pub use metrics::Metrics;
pub use pipeline::{Manager, Pipeline};
pub use processor::{Instance, Processor, ProcessorFactories, ProcessorKind, StageResult};
pub use queue::{PushMode, Queue};
pub use tier::{TierKind, TierStore};
pub use validator::{PreCheckError, Validator};

// Re-export the core types plugins implement against.
pub use virta_core::{Record, RecordData, RecordType, RequestType, StageError, StatusCode, Token};
