//! virta-core - Core types for the VIRTA telemetry pipeline
//!
//! This crate provides the foundational types that are shared between
//! the VIRTA gateway and external plugins (processors, exporters):
//!
//! - [`Record`] - one unit of telemetry data in flight through the pipeline
//! - [`Token`] - tenant identity attached to every record
//! - [`StageError`] - the outcome taxonomy a pipeline stage can produce
//! - [`StatusCode`] - precheck outcome codes surfaced to protocol receivers
//! - [`metadata_keys`] - reserved metadata key constants
//!
//! # Why this crate exists
//!
//! External processor plugins need to implement the gateway's `Processor`
//! trait against `Record` and `StageError`. Without `virta-core`, they would
//! depend on `virta-gateway`, but the gateway might also want to optionally
//! depend on those plugins, creating a cyclic dependency. Extracting the
//! shared types here breaks the cycle:
//!
//! ```text
//! virta-core ◄── virta-gateway
//!     ▲
//!     └────────── external processors / exporters
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(missing_docs)]

mod error;
/// Reserved metadata key constants for VIRTA records
pub mod metadata_keys;
/// The universal record envelope and its type tags
pub mod record;
mod status;
mod token;

pub use error::StageError;
pub use record::{Record, RecordData, RecordType, RequestType};
pub use status::StatusCode;
pub use token::Token;
