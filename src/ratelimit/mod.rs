//! Rate limiting logic and per-client window state.

mod decision;
mod key;
mod limiter;
mod policy;
mod record;

pub use decision::{Decision, DecisionStats, Evaluation, WindowUsage};
pub use key::ClientKey;
pub use limiter::{LimiterError, SlidingWindowLimiter};
pub use policy::{ConsistencyMode, MalformedRecordPolicy, WindowPolicy};
pub use record::{ClientWindowRecord, LogEntry, RecordError};
