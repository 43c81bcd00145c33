//! Adapter-error retry schedule and rate-limit cool-down.
//!
//! The state machine never retries. The engine retries **transient**
//! adapter errors with the *same* idempotency key on a bounded schedule;
//! **semantic** errors terminate the affected order. Rate-limit responses
//! additionally trip a cool-down and surface a `limit_hit` artifact
//! event.
//!
//! Jitter is derived from SHA-256 of the idempotency key and attempt
//! number instead of an RNG: retry timing varies per order, but two runs
//! over identical inputs behave identically (manifest determinism).

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use mbr_core::ports::BrokerError;

/// Backoff schedule in milliseconds, indexed by retries already taken.
pub const RETRY_BACKOFF_MS: [u64; 3] = [250, 500, 1_000];

/// Maximum retries per order after the initial submit.
pub const MAX_RETRIES: u32 = 3;

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Deterministic jitter: up to 25% of the base delay, keyed on
/// `(idempotency_key, attempt)`.
pub fn backoff_with_jitter_ms(idempotency_key: &str, attempt: u32) -> u64 {
    let base = RETRY_BACKOFF_MS[(attempt as usize).min(RETRY_BACKOFF_MS.len() - 1)];
    let mut hasher = Sha256::new();
    hasher.update(idempotency_key.as_bytes());
    hasher.update(attempt.to_be_bytes());
    let digest = hasher.finalize();
    let seed = u64::from_be_bytes(digest[..8].try_into().expect("digest >= 8 bytes"));
    base + seed % (base / 4).max(1)
}

/// Decide whether a failed submit attempt may be retried.
///
/// `attempt` is the 1-based attempt that just failed. Returns the delay
/// before the next attempt, or `None` when the error is semantic or the
/// retry budget is exhausted: attempt 1 → 250 ms, 2 → 500 ms, 3 → 1 s,
/// 4 → give up.
pub fn retry_delay_ms(error: &BrokerError, idempotency_key: &str, attempt: u32) -> Option<u64> {
    if !error.is_transient() {
        return None;
    }
    debug_assert!(attempt >= 1);
    let retries_taken = attempt - 1;
    if retries_taken >= MAX_RETRIES {
        return None;
    }
    Some(backoff_with_jitter_ms(idempotency_key, retries_taken))
}

// ---------------------------------------------------------------------------
// Cool-down
// ---------------------------------------------------------------------------

/// Rate-limit cool-down window.
///
/// While active, the engine must not submit; each trip is also surfaced
/// as a `limit_hit` artifact event by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cooldown {
    duration_secs: i64,
    until: Option<DateTime<Utc>>,
    trips: u64,
}

impl Cooldown {
    pub fn new(duration_secs: i64) -> Self {
        debug_assert!(duration_secs > 0);
        Self {
            duration_secs,
            until: None,
            trips: 0,
        }
    }

    /// Start (or extend) the cool-down from `now`.
    pub fn trip(&mut self, now: DateTime<Utc>) {
        self.trips += 1;
        self.until = Some(now + Duration::seconds(self.duration_secs));
        tracing::warn!(trips = self.trips, "rate limit hit; submissions cooling down");
    }

    /// Whether submissions are currently blocked.
    pub fn active(&self, now: DateTime<Utc>) -> bool {
        self.until.is_some_and(|u| now < u)
    }

    /// Total trips over the run.
    pub fn trips(&self) -> u64 {
        self.trips
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
