//! Slidewin - Sliding Window Log Rate Limiting
//!
//! This crate enforces a per-client request quota over a rolling time window.
//! Each client's history is kept as a compact log of coalesced buckets in a
//! shared key-value store, so every instance of an API server sees the same
//! counts without a global lock.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
