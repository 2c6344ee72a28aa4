//! Sliding-window-log rate limiter over a shared store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, trace, warn};

use crate::store::{StoreError, WindowStore};

use super::decision::{Decision, DecisionCounters, DecisionStats, Evaluation, WindowUsage};
use super::key::ClientKey;
use super::policy::{ConsistencyMode, MalformedRecordPolicy, WindowPolicy};
use super::record::{ClientWindowRecord, RecordError};

/// Errors surfaced by the limiter.
///
/// [`SlidingWindowLimiter::evaluate`] only returns `InvalidInput`; store and
/// record faults are folded into [`Decision::StoreUnavailable`] there.
#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid window policy: {0}")]
    InvalidPolicy(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Result of one read-decide-write pass.
enum Attempt {
    Decided(Evaluation),
    /// A conditional write lost against a concurrent writer.
    Conflict,
}

/// Per-client quota over a rolling window, shared through a [`WindowStore`].
///
/// Each client's history is a short log of buckets, one per `log_interval`,
/// so at most `window_size / log_interval` buckets are kept regardless of
/// traffic. The store is the single source of truth: nothing is cached
/// between calls and idle clients disappear through the store's TTL.
pub struct SlidingWindowLimiter<S: WindowStore> {
    store: Arc<S>,
    policy: WindowPolicy,
    counters: DecisionCounters,
}

impl<S: WindowStore> SlidingWindowLimiter<S> {
    /// Create a limiter over an injected store.
    pub fn new(store: Arc<S>, policy: WindowPolicy) -> Result<Self, LimiterError> {
        policy.validate()?;
        debug!(
            window_secs = policy.window_secs(),
            max_requests = policy.max_requests,
            interval_secs = policy.interval_secs(),
            consistency = ?policy.consistency,
            "Sliding window limiter created"
        );
        Ok(Self {
            store,
            policy,
            counters: DecisionCounters::default(),
        })
    }

    pub fn policy(&self) -> &WindowPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Decisions made so far by this instance.
    pub fn stats(&self) -> DecisionStats {
        self.counters.snapshot()
    }

    /// Decide whether the request of `client_key` at `now` may proceed.
    ///
    /// Admitted requests are logged in the store; denied ones are not.
    pub async fn evaluate(
        &self,
        client_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Decision, LimiterError> {
        Ok(self.check(client_key, now).await?.decision)
    }

    /// Like [`evaluate`](Self::evaluate), also reporting the window usage.
    pub async fn check(
        &self,
        client_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Evaluation, LimiterError> {
        let key = ClientKey::new(client_key)?;

        trace!(client = %key, now = %now, "Evaluating sliding window");

        let evaluation = self.decide(&key, now).await;
        self.counters.record(evaluation.decision);
        Ok(evaluation)
    }

    /// Read-only view of a client's current window.
    pub async fn inspect(
        &self,
        client_key: &str,
        now: DateTime<Utc>,
    ) -> Result<WindowUsage, LimiterError> {
        let key = ClientKey::new(client_key)?;
        let Some(bytes) = self.store.get(key.as_str()).await? else {
            return Ok(WindowUsage::empty(self.policy.max_requests));
        };

        let active = ClientWindowRecord::decode(&bytes)?.retain_after(self.window_start(now));
        Ok(self.usage(&active))
    }

    async fn decide(&self, key: &ClientKey, now: DateTime<Utc>) -> Evaluation {
        let attempts = self.policy.attempts();

        for attempt in 1..=attempts {
            match self.attempt(key, now).await {
                Ok(Attempt::Decided(evaluation)) => return evaluation,
                Ok(Attempt::Conflict) => {
                    self.counters.cas_conflict();
                    debug!(client = %key, attempt, "Conditional write lost to a concurrent update");
                }
                Err(err) => {
                    warn!(client = %key, error = %err, "Shared store unavailable");
                    return Evaluation::unavailable();
                }
            }
        }

        warn!(client = %key, attempts, "Conditional write kept conflicting, giving up");
        Evaluation::unavailable()
    }

    async fn attempt(&self, key: &ClientKey, now: DateTime<Utc>) -> Result<Attempt, LimiterError> {
        let stored = self.store.get(key.as_str()).await?;

        let previous = match stored.as_deref() {
            None => ClientWindowRecord::default(),
            Some(bytes) => match ClientWindowRecord::decode(bytes) {
                Ok(record) => record,
                Err(err) => {
                    self.counters.malformed_record();
                    error!(
                        client = %key,
                        error = %err,
                        fallback = ?self.policy.on_malformed_record,
                        "Stored window record is malformed"
                    );
                    match self.policy.on_malformed_record {
                        MalformedRecordPolicy::Reset => ClientWindowRecord::default(),
                        MalformedRecordPolicy::FailClosed => {
                            return Ok(Attempt::Decided(Evaluation::unavailable()))
                        }
                    }
                }
            },
        };

        let now_secs = now.timestamp();
        let active = previous.retain_after(self.window_start(now));

        // Nothing left in the window: the client starts over.
        let next = if active.is_empty() {
            ClientWindowRecord::fresh(now_secs)
        } else {
            let used = active.total();
            if used >= self.policy.max_requests {
                debug!(
                    client = %key,
                    used,
                    limit = self.policy.max_requests,
                    "Rate limit exceeded"
                );
                return Ok(Attempt::Decided(Evaluation::deny(self.usage(&active))));
            }

            let mut next = active;
            next.record_request(now_secs, now_secs.saturating_sub(self.policy.interval_secs()));
            next
        };

        let encoded = next.encode()?;
        let ttl = self.policy.window_size;

        match self.policy.consistency {
            ConsistencyMode::LastWriterWins => {
                self.store.set(key.as_str(), &encoded, ttl).await?;
            }
            ConsistencyMode::CompareAndSet => {
                let written = self
                    .store
                    .compare_and_set(key.as_str(), stored.as_deref(), &encoded, ttl)
                    .await?;
                if !written {
                    return Ok(Attempt::Conflict);
                }
            }
        }

        trace!(
            client = %key,
            used = next.total(),
            buckets = next.len(),
            "Request admitted"
        );
        Ok(Attempt::Decided(Evaluation::allow(self.usage(&next))))
    }

    fn window_start(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp().saturating_sub(self.policy.window_secs())
    }

    fn usage(&self, record: &ClientWindowRecord) -> WindowUsage {
        WindowUsage {
            used: record.total(),
            limit: self.policy.max_requests,
            buckets: record.len(),
            next_expiry: record.oldest().and_then(|entry| {
                DateTime::from_timestamp(
                    entry
                        .request_time_stamp
                        .saturating_add(self.policy.window_secs()),
                    0,
                )
            }),
        }
    }
}
