//! Idempotency key bookkeeping.
//!
//! Every submission carries an idempotency key. The store maps
//! `key → order_id` together with a canonical hash of the order payload,
//! so a replay with the same key and identical payload collapses onto the
//! existing order, while the same key with a *different* payload is a
//! conflict the caller must treat as fatal.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use mbr_core::types::OrderRequest;

// ---------------------------------------------------------------------------
// Canonical payload hash
// ---------------------------------------------------------------------------

/// SHA-256 (hex) over the canonical order payload:
/// `symbol|side|order_type|qty|limit|stop`.
///
/// Fields that do not affect what the broker would execute — metadata,
/// timestamps, strategy name — are deliberately excluded, so a replayed
/// request built at a different wall-clock instant still hashes equal.
pub fn canonical_payload_hash(request: &OrderRequest) -> String {
    let canonical = format!(
        "{}|{}|{}|{}|{}|{}",
        request.symbol,
        request.side,
        request.order_type,
        request.qty_micros,
        request
            .limit_price_micros
            .map_or_else(|| "-".to_string(), |v| v.to_string()),
        request
            .stop_price_micros
            .map_or_else(|| "-".to_string(), |v| v.to_string()),
    );
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// In-memory `key → (order_id, payload_hash)` map.
///
/// `BTreeMap` keeps iteration (and therefore persistence through the
/// state-store port) deterministic.
#[derive(Clone, Debug, Default)]
pub struct IdempotencyStore {
    orders: BTreeMap<String, Uuid>,
    payload_hashes: BTreeMap<String, String>,
}

impl IdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the order registered under `key`.
    pub fn lookup(&self, key: &str) -> Option<Uuid> {
        self.orders.get(key).copied()
    }

    /// The canonical payload hash registered under `key`, if known.
    /// Hashes are absent for keys restored from a state-store snapshot
    /// until the owning record is re-adopted.
    pub fn payload_hash(&self, key: &str) -> Option<&str> {
        self.payload_hashes.get(key).map(String::as_str)
    }

    /// Register a new key. Overwrites nothing: the caller must have
    /// checked `lookup` first.
    pub fn insert(&mut self, key: impl Into<String>, order_id: Uuid, payload_hash: String) {
        let key = key.into();
        debug_assert!(!self.orders.contains_key(&key), "idempotency key reuse");
        self.payload_hashes.insert(key.clone(), payload_hash);
        self.orders.insert(key, order_id);
    }

    /// Register (or refresh) the payload hash for a key restored from a
    /// snapshot, making it replayable again.
    pub fn register_payload_hash(&mut self, key: &str, payload_hash: String) {
        debug_assert!(self.orders.contains_key(key), "unknown key");
        self.payload_hashes.insert(key.to_string(), payload_hash);
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Snapshot for the state-store port.
    pub fn to_map(&self) -> BTreeMap<String, Uuid> {
        self.orders.clone()
    }

    /// Restore from a state-store snapshot. Payload hashes are unknown for
    /// restored keys; a replay against a restored key with any payload is
    /// treated as identical only if the caller re-registers the hash.
    pub fn restore(map: BTreeMap<String, Uuid>) -> Self {
        Self {
            orders: map,
            payload_hashes: BTreeMap::new(),
        }
    }

    /// Whether a payload hash is known for `key` (false after restore).
    pub fn has_payload_hash(&self, key: &str) -> bool {
        self.payload_hashes.contains_key(key)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
