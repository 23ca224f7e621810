//! Reserved metadata keys
//!
//! Records carry a free-form metadata map. A few keys are interpreted by the
//! gateway itself, mostly to address tier-scoped configuration: processors
//! resolve their per-tenant overrides against the service and instance
//! identifiers a receiver stamped onto the record.

/// Service identifier used for service-tier configuration lookup.
pub const SERVICE_ID: &str = "service.id";

/// Instance identifier used for instance-tier configuration lookup.
pub const INSTANCE_ID: &str = "instance.id";
