//! Outcomes of a rate limit evaluation.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

/// The verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    /// The request is within quota and has been logged.
    Allow,
    /// The client has exhausted its quota; nothing was logged.
    Deny,
    /// The shared store could not be consulted. Not a permission.
    StoreUnavailable,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny => "deny",
            Decision::StoreUnavailable => "store_unavailable",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client's consumption of its current window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowUsage {
    /// Requests counted in the window, including the one just admitted.
    pub used: u64,
    /// Configured requests per window.
    pub limit: u64,
    /// Number of live log buckets.
    pub buckets: usize,
    /// When the oldest live bucket leaves the window.
    pub next_expiry: Option<DateTime<Utc>>,
}

impl WindowUsage {
    /// An empty window.
    pub fn empty(limit: u64) -> Self {
        Self {
            used: 0,
            limit,
            buckets: 0,
            next_expiry: None,
        }
    }

    /// Requests still available in the window.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }
}

/// A decision together with the window it was made against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub decision: Decision,
    /// Absent when the store could not be consulted.
    pub usage: Option<WindowUsage>,
}

impl Evaluation {
    pub fn allow(usage: WindowUsage) -> Self {
        Self {
            decision: Decision::Allow,
            usage: Some(usage),
        }
    }

    pub fn deny(usage: WindowUsage) -> Self {
        Self {
            decision: Decision::Deny,
            usage: Some(usage),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            decision: Decision::StoreUnavailable,
            usage: None,
        }
    }
}

/// Snapshot of the decisions a limiter has made since it was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecisionStats {
    pub allowed: u64,
    pub denied: u64,
    pub store_unavailable: u64,
    /// Stored records that failed to decode.
    pub malformed_records: u64,
    /// Conditional writes lost to a concurrent writer.
    pub cas_conflicts: u64,
}

/// Lock-free counters behind [`DecisionStats`].
#[derive(Debug, Default)]
pub(crate) struct DecisionCounters {
    allowed: AtomicU64,
    denied: AtomicU64,
    store_unavailable: AtomicU64,
    malformed_records: AtomicU64,
    cas_conflicts: AtomicU64,
}

impl DecisionCounters {
    pub(crate) fn record(&self, decision: Decision) {
        let counter = match decision {
            Decision::Allow => &self.allowed,
            Decision::Deny => &self.denied,
            Decision::StoreUnavailable => &self.store_unavailable,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn malformed_record(&self) {
        self.malformed_records.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cas_conflict(&self) {
        self.cas_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DecisionStats {
        DecisionStats {
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            store_unavailable: self.store_unavailable.load(Ordering::Relaxed),
            malformed_records: self.malformed_records.load(Ordering::Relaxed),
            cas_conflicts: self.cas_conflicts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_labels() {
        assert_eq!(Decision::Allow.to_string(), "allow");
        assert_eq!(Decision::Deny.to_string(), "deny");
        assert_eq!(Decision::StoreUnavailable.to_string(), "store_unavailable");
        assert!(Decision::Allow.is_allowed());
        assert!(!Decision::StoreUnavailable.is_allowed());
    }

    #[test]
    fn test_remaining_saturates() {
        let usage = WindowUsage {
            used: 12,
            limit: 10,
            buckets: 2,
            next_expiry: None,
        };
        assert_eq!(usage.remaining(), 0);
        assert_eq!(WindowUsage::empty(10).remaining(), 10);
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = DecisionCounters::default();
        counters.record(Decision::Allow);
        counters.record(Decision::Allow);
        counters.record(Decision::Deny);
        counters.record(Decision::StoreUnavailable);
        counters.malformed_record();
        counters.cas_conflict();

        assert_eq!(
            counters.snapshot(),
            DecisionStats {
                allowed: 2,
                denied: 1,
                store_unavailable: 1,
                malformed_records: 1,
                cas_conflicts: 1,
            }
        );
    }
}
