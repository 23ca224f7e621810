//! Tiered configuration store
//!
//! A four-level keyed lookup table resolving the effective sub-configuration
//! for a (token, service, instance) triple. Specificity wins: an
//! instance-tier entry beats a service-tier entry beats the tenant default
//! beats the single global entry.
//!
//! The store is read-mostly: processors resolve on every record, entries
//! change only at (re)load. A reader/writer lock keeps reads concurrent.

use parking_lot::RwLock;
use std::collections::HashMap;

/// A level of configuration specificity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierKind {
    /// Bound to one service instance.
    Instance,
    /// Bound to one logical service.
    Service,
    /// Tenant-wide default.
    Default,
}

impl TierKind {
    /// Snake-case label, matching the sub-config section names.
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Instance => "instance",
            TierKind::Service => "service",
            TierKind::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TierKey {
    token: String,
    kind: TierKind,
    id: String,
}

impl TierKey {
    fn new(token: &str, kind: TierKind, id: &str) -> Self {
        Self {
            token: token.to_string(),
            kind,
            id: id.to_string(),
        }
    }
}

/// Four-level keyed lookup table.
///
/// At most one value is stored per `(token, tier, id)` key; setting an
/// existing key replaces silently. The global slot is disjoint from the
/// keyed entries.
///
/// # Example
///
/// ```
/// use virta_gateway::tier::{TierKind, TierStore};
///
/// let store = TierStore::new();
/// store.set("t1", TierKind::Default, "", "tenant-wide");
/// store.set("t1", TierKind::Service, "svc1", "svc1-specific");
///
/// assert_eq!(store.resolve("t1", "svc1", ""), Some("svc1-specific"));
/// assert_eq!(store.resolve("t1", "svc2", ""), Some("tenant-wide"));
/// ```
pub struct TierStore<T> {
    entries: RwLock<HashMap<TierKey, T>>,
    global: RwLock<Option<T>>,
}

impl<T: Clone> TierStore<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            global: RwLock::new(None),
        }
    }

    /// Insert or silently replace the value for `(token, kind, id)`.
    pub fn set(&self, token: &str, kind: TierKind, id: &str, value: T) {
        self.entries
            .write()
            .insert(TierKey::new(token, kind, id), value);
    }

    /// Insert or silently replace the global entry.
    pub fn set_global(&self, value: T) {
        *self.global.write() = Some(value);
    }

    /// Remove the value for `(token, kind, id)`; no-op if absent.
    pub fn delete(&self, token: &str, kind: TierKind, id: &str) {
        self.entries.write().remove(&TierKey::new(token, kind, id));
    }

    /// Remove the global entry; no-op if absent.
    pub fn delete_global(&self) {
        *self.global.write() = None;
    }

    /// Resolve the effective value for a (token, service, instance) triple.
    ///
    /// Lookup order, first hit wins: instance tier (when `instance_id` is
    /// non-empty), service tier (when `service_id` is non-empty), tenant
    /// default, global. Returns `None` when no tier matches.
    pub fn resolve(&self, token: &str, service_id: &str, instance_id: &str) -> Option<T> {
        let entries = self.entries.read();
        if !instance_id.is_empty() {
            if let Some(v) = entries.get(&TierKey::new(token, TierKind::Instance, instance_id)) {
                return Some(v.clone());
            }
        }
        if !service_id.is_empty() {
            if let Some(v) = entries.get(&TierKey::new(token, TierKind::Service, service_id)) {
                return Some(v.clone());
            }
        }
        if let Some(v) = entries.get(&TierKey::new(token, TierKind::Default, "")) {
            return Some(v.clone());
        }
        drop(entries);
        self.global.read().clone()
    }

    /// Every stored value, keyed entries plus the global one. Iteration
    /// order is not guaranteed; intended for bulk export only.
    pub fn all(&self) -> Vec<T> {
        let mut values: Vec<T> = self.entries.read().values().cloned().collect();
        if let Some(g) = self.global.read().as_ref() {
            values.push(g.clone());
        }
        values
    }

    /// Number of keyed entries (the global slot not included).
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when no keyed entries exist.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<T: Clone> Default for TierStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
