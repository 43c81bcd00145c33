//! Order lifecycle state machine.
//!
//! # Legal transitions
//!
//! ```text
//! Created         → Submitted, Rejected
//! Submitted       → Accepted, Rejected, PartiallyFilled, Filled, Cancelled, Expired
//! Accepted        → PartiallyFilled, Filled, Cancelled, Expired, Rejected
//! PartiallyFilled → PartiallyFilled, Filled, Cancelled, Expired
//! ```
//!
//! Terminal states (`Filled`, `Cancelled`, `Expired`, `Rejected`) are
//! absorbing. Everything else is a [`LifecycleError::IllegalTransition`]
//! — a programmer error that callers MUST treat as fatal for the run.
//!
//! # Idempotency
//!
//! Submission consults the key store. Unknown key → a new record and one
//! `Created → Submitted` transition. Known key with an identical
//! canonical payload → the existing record is returned with no new
//! transition (the replay-safe path). Known key with a different payload
//! → [`LifecycleError::IdempotencyConflict`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use mbr_core::types::{Fill, OrderRecord, OrderRequest, OrderStatus, Transition};

use crate::idempotency::{canonical_payload_hash, IdempotencyStore};

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

/// Returns `true` when `from → to` appears in the legal-transition table.
pub fn transition_allowed(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Created, Submitted)
            | (Created, Rejected)
            | (Submitted, Accepted)
            | (Submitted, Rejected)
            | (Submitted, PartiallyFilled)
            | (Submitted, Filled)
            | (Submitted, Cancelled)
            | (Submitted, Expired)
            | (Accepted, PartiallyFilled)
            | (Accepted, Filled)
            | (Accepted, Cancelled)
            | (Accepted, Expired)
            | (Accepted, Rejected)
            | (PartiallyFilled, PartiallyFilled)
            | (PartiallyFilled, Filled)
            | (PartiallyFilled, Cancelled)
            | (PartiallyFilled, Expired)
    )
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fatal lifecycle violations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleError {
    /// The requested transition is not in the legal table.
    IllegalTransition {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },
    /// The idempotency key is registered with a different canonical payload.
    IdempotencyConflict {
        key: String,
        existing_order_id: Uuid,
    },
    /// An event referenced an order the state machine does not own.
    UnknownOrder { order_id: Uuid },
    /// A fill would push cumulative quantity beyond the requested quantity.
    OverFill {
        order_id: Uuid,
        requested_micros: i64,
        cumulative_micros: i64,
    },
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleError::IllegalTransition { order_id, from, to } => {
                write!(f, "illegal order transition {from} -> {to} for {order_id}")
            }
            LifecycleError::IdempotencyConflict {
                key,
                existing_order_id,
            } => write!(
                f,
                "idempotency conflict: key '{key}' already maps to order {existing_order_id} \
                 with a different payload"
            ),
            LifecycleError::UnknownOrder { order_id } => {
                write!(f, "unknown order {order_id}")
            }
            LifecycleError::OverFill {
                order_id,
                requested_micros,
                cumulative_micros,
            } => write!(
                f,
                "over-fill on {order_id}: cumulative {cumulative_micros} exceeds requested {requested_micros}"
            ),
        }
    }
}

impl std::error::Error for LifecycleError {}

// ---------------------------------------------------------------------------
// Submit outcome
// ---------------------------------------------------------------------------

/// Result of a submission attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A fresh record was created and moved `Created → Submitted`; hand
    /// the snapshot to the broker port.
    New(OrderRecord),
    /// The key was already registered with an identical payload; no new
    /// submission happened.
    Replayed(OrderRecord),
}

impl SubmitOutcome {
    pub fn record(&self) -> &OrderRecord {
        match self {
            SubmitOutcome::New(r) | SubmitOutcome::Replayed(r) => r,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, SubmitOutcome::Replayed(_))
    }
}

// ---------------------------------------------------------------------------
// OrderStateMachine
// ---------------------------------------------------------------------------

/// Single owner of all order records in a run.
#[derive(Debug, Default)]
pub struct OrderStateMachine {
    orders: BTreeMap<Uuid, OrderRecord>,
    idempotency: IdempotencyStore,
}

impl OrderStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a request under its idempotency key.
    pub fn submit(
        &mut self,
        request: &OrderRequest,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, LifecycleError> {
        let key = request.idempotency_key.as_str();
        let payload_hash = canonical_payload_hash(request);

        if let Some(existing_id) = self.idempotency.lookup(key) {
            match self.idempotency.payload_hash(key) {
                Some(known) if known == payload_hash => {
                    let record = self
                        .orders
                        .get(&existing_id)
                        .ok_or(LifecycleError::UnknownOrder {
                            order_id: existing_id,
                        })?;
                    return Ok(SubmitOutcome::Replayed(record.clone()));
                }
                // Restored key whose record was never re-adopted, or a
                // genuine payload mismatch: both are conflicts. A restart
                // must adopt broker-side records before resubmitting.
                _ => {
                    return Err(LifecycleError::IdempotencyConflict {
                        key: key.to_string(),
                        existing_order_id: existing_id,
                    });
                }
            }
        }

        let order_id = derive_order_id(key);
        let mut record = OrderRecord {
            order_id,
            request: request.clone(),
            status: OrderStatus::Created,
            filled_qty_micros: 0,
            venue_order_id: None,
            reject_reason: None,
            transitions: Vec::new(),
        };
        push_transition(&mut record, now, OrderStatus::Submitted, "submit");

        self.idempotency.insert(key, order_id, payload_hash);
        self.orders.insert(order_id, record.clone());
        Ok(SubmitOutcome::New(record))
    }

    /// Adopt an externally known record (restart reconciliation). The
    /// record's key and payload hash are re-registered.
    pub fn adopt_record(&mut self, record: OrderRecord) {
        let key = record.request.idempotency_key.clone();
        let hash = canonical_payload_hash(&record.request);
        if self.idempotency.lookup(&key).is_none() {
            self.idempotency.insert(key, record.order_id, hash);
        } else {
            self.idempotency.register_payload_hash(&key, hash);
        }
        self.orders.insert(record.order_id, record);
    }

    /// Apply a guarded transition and record it on the order.
    pub fn transition(
        &mut self,
        order_id: Uuid,
        to: OrderStatus,
        cause: &str,
        now: DateTime<Utc>,
    ) -> Result<&OrderRecord, LifecycleError> {
        let record = self
            .orders
            .get_mut(&order_id)
            .ok_or(LifecycleError::UnknownOrder { order_id })?;
        if !transition_allowed(record.status, to) {
            return Err(LifecycleError::IllegalTransition {
                order_id,
                from: record.status,
                to,
            });
        }
        push_transition(record, now, to, cause);
        Ok(record)
    }

    /// Record broker acknowledgement (`→ Accepted`) and the venue order id.
    pub fn record_acceptance(
        &mut self,
        order_id: Uuid,
        venue_order_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<&OrderRecord, LifecycleError> {
        self.transition(order_id, OrderStatus::Accepted, "broker_ack", now)?;
        let record = self
            .orders
            .get_mut(&order_id)
            .ok_or(LifecycleError::UnknownOrder { order_id })?;
        if venue_order_id.is_some() {
            record.venue_order_id = venue_order_id;
        }
        Ok(record)
    }

    /// Reconcile one fill: cumulative quantity decides `PartiallyFilled`
    /// vs `Filled`.
    pub fn apply_fill(
        &mut self,
        fill: &Fill,
        now: DateTime<Utc>,
    ) -> Result<&OrderRecord, LifecycleError> {
        let record = self
            .orders
            .get_mut(&fill.order_id)
            .ok_or(LifecycleError::UnknownOrder {
                order_id: fill.order_id,
            })?;

        let cumulative = record.filled_qty_micros + fill.qty_micros;
        if cumulative > record.request.qty_micros {
            return Err(LifecycleError::OverFill {
                order_id: fill.order_id,
                requested_micros: record.request.qty_micros,
                cumulative_micros: cumulative,
            });
        }

        let to = if cumulative < record.request.qty_micros {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::Filled
        };
        if !transition_allowed(record.status, to) {
            return Err(LifecycleError::IllegalTransition {
                order_id: fill.order_id,
                from: record.status,
                to,
            });
        }

        record.filled_qty_micros = cumulative;
        push_transition(record, now, to, &format!("fill {}", fill.fill_id));
        Ok(record)
    }

    /// Terminate an order as `Cancelled`.
    pub fn apply_cancel(
        &mut self,
        order_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<&OrderRecord, LifecycleError> {
        self.transition(order_id, OrderStatus::Cancelled, reason, now)
    }

    /// Terminate an order as `Rejected`. The reason is always recorded.
    pub fn apply_reject(
        &mut self,
        order_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<&OrderRecord, LifecycleError> {
        self.transition(order_id, OrderStatus::Rejected, reason, now)?;
        let record = self
            .orders
            .get_mut(&order_id)
            .ok_or(LifecycleError::UnknownOrder { order_id })?;
        record.reject_reason = Some(reason.to_string());
        Ok(record)
    }

    /// Terminate an order as `Expired`.
    pub fn apply_expire(
        &mut self,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<&OrderRecord, LifecycleError> {
        self.transition(order_id, OrderStatus::Expired, "expired", now)
    }

    pub fn get(&self, order_id: Uuid) -> Option<&OrderRecord> {
        self.orders.get(&order_id)
    }

    /// All non-terminal orders, in `order_id` order.
    pub fn open_orders(&self) -> Vec<&OrderRecord> {
        self.orders.values().filter(|r| !r.is_terminal()).collect()
    }

    /// Order ids still non-terminal; must be empty after `finalize()`.
    pub fn non_terminal_ids(&self) -> Vec<Uuid> {
        self.orders
            .values()
            .filter(|r| !r.is_terminal())
            .map(|r| r.order_id)
            .collect()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// Idempotency snapshot for the state-store port.
    pub fn idempotency_map(&self) -> BTreeMap<String, Uuid> {
        self.idempotency.to_map()
    }

    /// Restore the idempotency map from a state-store snapshot. Records
    /// must be re-adopted via [`OrderStateMachine::adopt_record`] before
    /// their keys become replayable.
    pub fn restore_idempotency(&mut self, map: BTreeMap<String, Uuid>) {
        self.idempotency = IdempotencyStore::restore(map);
    }
}

/// Derive the order id from the idempotency key (first 16 bytes of its
/// SHA-256). Ids are therefore identical across replays and across runs
/// over identical inputs, which keeps artifact streams hash-stable.
pub fn derive_order_id(idempotency_key: &str) -> Uuid {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(idempotency_key.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

fn push_transition(record: &mut OrderRecord, ts: DateTime<Utc>, to: OrderStatus, cause: &str) {
    let from = record.status;
    record.transitions.push(Transition {
        ts,
        from,
        to,
        cause: cause.to_string(),
    });
    record.status = to;
    tracing::trace!(order_id = %record.order_id, %from, %to, cause, "order transition");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
