//! Exporter trait for VIRTA
//!
//! The export layer is an external collaborator: the dispatcher hands every
//! surviving record to [`Exporter::publish`] and observes nothing back
//! (fire-and-forget). Delivery guarantees, batching and retries live behind
//! the trait, not in the pipeline core.

use async_trait::async_trait;
use tracing::info;
use virta_core::Record;

/// Export sink for records that survive their pipeline.
///
/// # Example
///
/// ```ignore
/// use virta_gateway::{Exporter, Record};
///
/// struct QueueExporter {
///     tx: tokio::sync::mpsc::Sender<Record>,
/// }
///
/// #[async_trait::async_trait]
/// impl Exporter for QueueExporter {
///     fn name(&self) -> &'static str {
///         "queue"
///     }
///
///     async fn publish(&self, record: Record) {
///         let _ = self.tx.send(record).await;
///     }
/// }
/// ```
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Exporter name for logging and metrics.
    fn name(&self) -> &'static str;

    /// Take ownership of a record and ship it. Fire-and-forget: the core
    /// never observes the outcome.
    async fn publish(&self, record: Record);
}

/// Exporter that logs record summaries via `tracing`. Useful for demos and
/// as a stand-in while wiring up a real storage backend.
pub struct StdoutExporter;

impl StdoutExporter {
    /// Create a stdout exporter.
    pub fn new() -> Self {
        Self
    }
}

impl Default for StdoutExporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Exporter for StdoutExporter {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn publish(&self, record: Record) {
        info!(
            record_type = %record.record_type,
            request_type = %record.request_type,
            token = %record.token,
            data_id = record.token.data_id(record.record_type),
            "record exported"
        );
    }
}
