//! Fixed-window, per-user admission control.
//!
//! Each user owns a counter and the instant its window closes. The first
//! request after the window closes opens a new one. Requests beyond the limit
//! are rejected without touching the counter, and an admitted request never
//! moves the reset instant.
//!
//! Two backends share the same rule:
//! - [`PersistentRateLimiter`] keeps the counters on the user row in SQLite and
//!   applies the rule in one conditional `UPDATE`, so it is safe across
//!   concurrent requests and across server instances sharing the database.
//! - [`MemoryRateLimiter`] keeps counters in process memory. It is only
//!   correct for a single-process deployment and forgets everything on restart.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::db::Database;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            limit: 20,
            window: Duration::from_secs(60 * 60),
        }
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Admission {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Counter state for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitPolicy {
    pub fn window_millis(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }

    fn window_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(chrono::Duration::milliseconds(self.window_millis()))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Apply the admission rule to `state`.
    ///
    /// Returns the admission and the state to store, or `None` when the state
    /// must stay as it is (rejected request).
    pub fn evaluate(
        &self,
        state: Option<WindowState>,
        now: DateTime<Utc>,
    ) -> (Admission, Option<WindowState>) {
        match state {
            Some(state) if now < state.reset_at => {
                if state.count >= self.limit {
                    let admission = Admission {
                        allowed: false,
                        remaining: 0,
                        reset_at: state.reset_at,
                    };
                    (admission, None)
                } else {
                    let count = state.count + 1;
                    let admission = Admission {
                        allowed: true,
                        remaining: self.limit.saturating_sub(count),
                        reset_at: state.reset_at,
                    };
                    (
                        admission,
                        Some(WindowState {
                            count,
                            reset_at: state.reset_at,
                        }),
                    )
                }
            }
            _ => {
                let reset_at = self.window_end(now);
                let admission = Admission {
                    allowed: self.limit > 0,
                    remaining: self.limit.saturating_sub(1),
                    reset_at,
                };
                if self.limit == 0 {
                    return (admission, None);
                }
                (admission, Some(WindowState { count: 1, reset_at }))
            }
        }
    }
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn admit(&self, user_id: &str, now: DateTime<Utc>) -> Result<Admission>;
}

/// Counters stored on the user row; see [`Database::admit_request`].
pub struct PersistentRateLimiter {
    db: Arc<Database>,
    policy: RateLimitPolicy,
}

impl PersistentRateLimiter {
    pub fn new(db: Arc<Database>, policy: RateLimitPolicy) -> Self {
        Self { db, policy }
    }
}

#[async_trait]
impl RateLimiter for PersistentRateLimiter {
    async fn admit(&self, user_id: &str, now: DateTime<Utc>) -> Result<Admission> {
        self.db.admit_request(user_id, now, &self.policy)
    }
}

/// Process-local counters. Single-process deployments only.
pub struct MemoryRateLimiter {
    policy: RateLimitPolicy,
    windows: DashMap<String, WindowState>,
}

impl MemoryRateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            windows: DashMap::new(),
        }
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn admit(&self, user_id: &str, now: DateTime<Utc>) -> Result<Admission> {
        // The entry guard holds the shard lock for the whole read-modify-write.
        let entry = self.windows.entry(user_id.to_string());
        let admission = match entry {
            Entry::Occupied(mut occupied) => {
                let (admission, next) = self.policy.evaluate(Some(*occupied.get()), now);
                if let Some(next) = next {
                    occupied.insert(next);
                }
                admission
            }
            Entry::Vacant(vacant) => {
                let (admission, next) = self.policy.evaluate(None, now);
                if let Some(next) = next {
                    vacant.insert(next);
                }
                admission
            }
        };
        Ok(admission)
    }
}
