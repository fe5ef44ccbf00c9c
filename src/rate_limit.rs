//! Cooldown between successful submissions.
//!
//! One timestamp, stored under [`LAST_SUBMIT_KEY`], is shared by every form
//! that uses the same store. A submission is refused while less than
//! [`COOLDOWN_MS`] has passed since that timestamp. Only successful
//! submissions set it, so a failed attempt can be retried immediately.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::storage::{KeyValueStore, StoreError};

pub const LAST_SUBMIT_KEY: &str = "lastFormSubmit";
pub const COOLDOWN_MS: i64 = 60_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Çok fazla deneme yaptınız. Lütfen bir dakika bekleyin.")]
pub struct RateLimited {
    /// Milliseconds left until submissions are accepted again
    pub retry_after_ms: i64,
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
}

impl RateLimiter {
    /// Create a limiter over `store`.
    ///
    /// # Arguments
    /// * `store` - Where the last-submit timestamp is read and written. Pass a
    ///   scoped store to give each client its own cooldown.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Last successful submission time, if one is recorded and readable.
    pub fn last_submit(&self) -> Option<i64> {
        match self.store.get(LAST_SUBMIT_KEY) {
            Ok(Some(raw)) => match raw.trim().parse() {
                Ok(millis) => Some(millis),
                Err(e) => {
                    warn!(value = %raw, "Ignoring unparsable last submit time: {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Could not read last submit time: {e}");
                None
            }
        }
    }

    /// Allow the submission unless the last successful one was less than
    /// [`COOLDOWN_MS`] before `now`.
    ///
    /// # Arguments
    /// * `now` - Current time in epoch milliseconds
    ///
    /// # Returns
    /// `Err` with the remaining wait while inside the cooldown window
    pub fn check(&self, now: i64) -> Result<(), RateLimited> {
        let Some(last) = self.last_submit() else {
            return Ok(());
        };

        let elapsed = now.saturating_sub(last);
        if elapsed < COOLDOWN_MS {
            debug!(elapsed, "Submission inside cooldown window");
            return Err(RateLimited {
                retry_after_ms: COOLDOWN_MS - elapsed,
            });
        }

        Ok(())
    }

    /// Start a new cooldown window at `now`.
    ///
    /// A failed write is logged and otherwise ignored; the submission it
    /// follows has already succeeded.
    pub fn record(&self, now: i64) {
        if let Err(e) = self.store.set(LAST_SUBMIT_KEY, &now.to_string()) {
            warn!("Could not store last submit time: {e}");
        }
    }
}

/// Remove last-submit timestamps whose cooldown has run out.
///
/// Matches the plain key and every `{scope}:` prefixed copy of it, so one
/// call on the root store cleans up after every client. An expired or
/// unparsable timestamp has the same effect as none, so removing it never
/// changes what [`RateLimiter::check`] answers.
///
/// # Arguments
/// * `store` - Root store shared by all clients
/// * `now` - Current time in epoch milliseconds
///
/// # Returns
/// The number of removed entries
pub fn prune_expired(store: &dyn KeyValueStore, now: i64) -> Result<usize, StoreError> {
    let scoped_suffix = format!(":{LAST_SUBMIT_KEY}");

    let removed = store.retain(&mut |key: &str, value: &str| {
        if key != LAST_SUBMIT_KEY && !key.ends_with(&scoped_suffix) {
            return true;
        }
        match value.trim().parse::<i64>() {
            Ok(last) => now.saturating_sub(last) < COOLDOWN_MS,
            Err(_) => false,
        }
    })?;

    if removed > 0 {
        debug!(removed, "Pruned expired cooldown entries");
    }
    Ok(removed)
}
