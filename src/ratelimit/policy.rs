//! Window policy: the limits and behaviors fixed per deployment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::limiter::LimiterError;

/// Default rolling window.
pub const DEFAULT_WINDOW_SIZE: Duration = Duration::from_secs(24 * 3600);
/// Default number of requests a client may make per window.
pub const DEFAULT_MAX_REQUESTS: u64 = 110;
/// Default granularity at which requests are coalesced into one bucket.
pub const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(3600);
/// Longest window a policy may describe (ten years).
pub const MAX_WINDOW_SIZE: Duration = Duration::from_secs(10 * 365 * 24 * 3600);
/// Default number of extra attempts after a lost conditional write.
pub const DEFAULT_MAX_CAS_RETRIES: u32 = 3;

/// What to do with a stored record that cannot be decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedRecordPolicy {
    /// Discard the record and start the client on a fresh window.
    #[default]
    Reset,
    /// Refuse the request as a store fault until the record expires.
    FailClosed,
}

/// How an admitted request is written back to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyMode {
    /// Plain overwrite. Concurrent requests of one client may lose updates.
    #[default]
    LastWriterWins,
    /// Conditional write against the value read, retried on conflict.
    CompareAndSet,
}

/// Limits applied to every client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowPolicy {
    /// Rolling window over which requests are counted.
    pub window_size: Duration,
    /// Requests are admitted while the window total is below this value.
    pub max_requests: u64,
    /// Requests closer together than this share a log bucket.
    pub log_interval: Duration,
    pub on_malformed_record: MalformedRecordPolicy,
    pub consistency: ConsistencyMode,
    /// Extra attempts after a conflicting conditional write.
    pub max_cas_retries: u32,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            max_requests: DEFAULT_MAX_REQUESTS,
            log_interval: DEFAULT_LOG_INTERVAL,
            on_malformed_record: MalformedRecordPolicy::default(),
            consistency: ConsistencyMode::default(),
            max_cas_retries: DEFAULT_MAX_CAS_RETRIES,
        }
    }
}

impl WindowPolicy {
    /// A policy with the given limits and default behaviors.
    pub fn new(window_size: Duration, max_requests: u64, log_interval: Duration) -> Self {
        Self {
            window_size,
            max_requests,
            log_interval,
            ..Self::default()
        }
    }

    pub fn with_malformed_record_policy(mut self, policy: MalformedRecordPolicy) -> Self {
        self.on_malformed_record = policy;
        self
    }

    pub fn with_consistency(mut self, consistency: ConsistencyMode, max_cas_retries: u32) -> Self {
        self.consistency = consistency;
        self.max_cas_retries = max_cas_retries;
        self
    }

    /// Check the policy is internally consistent.
    ///
    /// Timestamps are stored with one-second resolution, so both durations
    /// must be at least one second long.
    pub fn validate(&self) -> Result<(), LimiterError> {
        if self.window_size.as_secs() == 0 {
            return Err(LimiterError::InvalidPolicy(
                "window size must be at least one second".to_string(),
            ));
        }
        if self.window_size > MAX_WINDOW_SIZE {
            return Err(LimiterError::InvalidPolicy(format!(
                "window size {:?} exceeds the maximum of {:?}",
                self.window_size, MAX_WINDOW_SIZE
            )));
        }
        if self.log_interval.as_secs() == 0 {
            return Err(LimiterError::InvalidPolicy(
                "log interval must be at least one second".to_string(),
            ));
        }
        if self.log_interval > self.window_size {
            return Err(LimiterError::InvalidPolicy(format!(
                "log interval {:?} exceeds window size {:?}",
                self.log_interval, self.window_size
            )));
        }
        if self.max_requests == 0 {
            return Err(LimiterError::InvalidPolicy(
                "max requests per window must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Window size in whole seconds.
    pub fn window_secs(&self) -> i64 {
        i64::try_from(self.window_size.as_secs()).unwrap_or(i64::MAX)
    }

    /// Log interval in whole seconds.
    pub fn interval_secs(&self) -> i64 {
        i64::try_from(self.log_interval.as_secs()).unwrap_or(i64::MAX)
    }

    /// Upper bound on the number of buckets stored per client.
    pub fn max_entries(&self) -> u64 {
        self.window_size
            .as_secs()
            .div_ceil(self.log_interval.as_secs().max(1))
    }

    /// Number of evaluation attempts allowed by the consistency mode.
    pub fn attempts(&self) -> u32 {
        match self.consistency {
            ConsistencyMode::LastWriterWins => 1,
            ConsistencyMode::CompareAndSet => self.max_cas_retries.saturating_add(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_default_policy() {
        let policy = WindowPolicy::default();
        assert_eq!(policy.window_size, 24 * HOUR);
        assert_eq!(policy.max_requests, 110);
        assert_eq!(policy.log_interval, HOUR);
        assert_eq!(policy.on_malformed_record, MalformedRecordPolicy::Reset);
        assert_eq!(policy.consistency, ConsistencyMode::LastWriterWins);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_max_entries_rounds_up() {
        assert_eq!(WindowPolicy::default().max_entries(), 24);

        let policy = WindowPolicy::new(Duration::from_secs(100), 10, Duration::from_secs(30));
        assert_eq!(policy.max_entries(), 4);
    }

    #[test]
    fn test_interval_longer_than_window_rejected() {
        let policy = WindowPolicy::new(HOUR, 10, 2 * HOUR);
        assert!(matches!(policy.validate(), Err(LimiterError::InvalidPolicy(_))));
    }

    #[test]
    fn test_interval_equal_to_window_accepted() {
        let policy = WindowPolicy::new(HOUR, 10, HOUR);
        assert!(policy.validate().is_ok());
        assert_eq!(policy.max_entries(), 1);
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(WindowPolicy::new(Duration::ZERO, 10, Duration::ZERO).validate().is_err());
        assert!(WindowPolicy::new(HOUR, 10, Duration::from_millis(500)).validate().is_err());
        assert!(WindowPolicy::new(HOUR, 0, HOUR).validate().is_err());
    }

    #[test]
    fn test_oversized_window_rejected() {
        assert!(WindowPolicy::new(MAX_WINDOW_SIZE, 10, HOUR).validate().is_ok());

        let policy = WindowPolicy::new(Duration::from_secs(u64::MAX), 10, HOUR);
        assert!(matches!(policy.validate(), Err(LimiterError::InvalidPolicy(_))));
    }

    #[test]
    fn test_attempts_follow_consistency_mode() {
        let policy = WindowPolicy::default();
        assert_eq!(policy.attempts(), 1);

        let policy = policy.with_consistency(ConsistencyMode::CompareAndSet, 3);
        assert_eq!(policy.attempts(), 4);
    }

    #[test]
    fn test_modes_deserialize_from_snake_case() {
        let mode: ConsistencyMode = serde_yaml::from_str("compare_and_set").unwrap();
        assert_eq!(mode, ConsistencyMode::CompareAndSet);

        let policy: MalformedRecordPolicy = serde_yaml::from_str("fail_closed").unwrap();
        assert_eq!(policy, MalformedRecordPolicy::FailClosed);
    }
}
