//! mbr-execution
//!
//! The order lifecycle state machine and its idempotency guarantees.
//!
//! [`OrderStateMachine`] is the single owner of every [`OrderRecord`] in a
//! run: adapters receive request snapshots and return events; the state
//! machine applies them under the legal-transition table. Illegal
//! transitions and idempotency conflicts are programmer errors and abort
//! the run.

mod idempotency;
mod lifecycle;
mod retry;

pub use idempotency::{canonical_payload_hash, IdempotencyStore};
pub use lifecycle::{
    derive_order_id, transition_allowed, LifecycleError, OrderStateMachine, SubmitOutcome,
};
pub use retry::{backoff_with_jitter_ms, retry_delay_ms, Cooldown, MAX_RETRIES, RETRY_BACKOFF_MS};
