//! Per-client request log and its stored representation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while decoding or encoding a stored window record.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The stored bytes are not a valid request log.
    #[error("malformed window record: {0}")]
    Malformed(String),

    /// The record could not be serialized.
    #[error("failed to encode window record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Requests coalesced into one logging interval.
///
/// Field names are part of the stored format and must stay stable across
/// versions so that mixed deployments can share records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Start of the bucket, in seconds since the Unix epoch.
    pub request_time_stamp: i64,
    /// Number of requests admitted into this bucket.
    pub request_count: u64,
}

impl LogEntry {
    /// A bucket holding a single request.
    pub fn new(request_time_stamp: i64) -> Self {
        Self {
            request_time_stamp,
            request_count: 1,
        }
    }
}

/// The request log of one client, oldest bucket first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientWindowRecord {
    entries: Vec<LogEntry>,
}

impl ClientWindowRecord {
    /// A record for a client seen for the first time at `now`.
    pub fn fresh(now: i64) -> Self {
        Self {
            entries: vec![LogEntry::new(now)],
        }
    }

    /// Decode a record from its stored JSON form.
    ///
    /// Rejects zero counts, buckets out of chronological order and counts
    /// whose sum does not fit in a `u64`, so a successfully decoded record
    /// always upholds the log invariants.
    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        let record: Self =
            serde_json::from_slice(bytes).map_err(|e| RecordError::Malformed(e.to_string()))?;

        if let Some(entry) = record.entries.iter().find(|e| e.request_count == 0) {
            return Err(RecordError::Malformed(format!(
                "bucket at {} has a zero request count",
                entry.request_time_stamp
            )));
        }

        if let Some(pair) = record
            .entries
            .windows(2)
            .find(|pair| pair[1].request_time_stamp < pair[0].request_time_stamp)
        {
            return Err(RecordError::Malformed(format!(
                "bucket at {} follows later bucket at {}",
                pair[1].request_time_stamp, pair[0].request_time_stamp
            )));
        }

        if record
            .entries
            .iter()
            .try_fold(0u64, |total, e| total.checked_add(e.request_count))
            .is_none()
        {
            return Err(RecordError::Malformed(
                "request counts overflow the total".to_string(),
            ));
        }

        Ok(record)
    }

    /// Encode the record into its stored JSON form.
    pub fn encode(&self) -> Result<Vec<u8>, RecordError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Drop every bucket that started at or before `window_start`.
    pub fn retain_after(mut self, window_start: i64) -> Self {
        self.entries.retain(|e| e.request_time_stamp > window_start);
        self
    }

    /// Log one admitted request at `now`.
    ///
    /// The request joins the most recent bucket if that bucket started after
    /// `interval_start`, otherwise it opens a new bucket.
    pub fn record_request(&mut self, now: i64, interval_start: i64) {
        match self.entries.last_mut() {
            Some(last) if last.request_time_stamp > interval_start => {
                last.request_count = last.request_count.saturating_add(1)
            }
            _ => self.entries.push(LogEntry::new(now)),
        }
    }

    /// Total requests across all buckets.
    pub fn total(&self) -> u64 {
        self.entries
            .iter()
            .fold(0u64, |total, e| total.saturating_add(e.request_count))
    }

    /// The buckets, oldest first.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// The oldest bucket, if any.
    pub fn oldest(&self) -> Option<&LogEntry> {
        self.entries.first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
