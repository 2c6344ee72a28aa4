//! HTTP front: the rate limit middleware and a minimal server around it.

mod middleware;
mod server;

pub use middleware::{rate_limit, LIMIT_EXCEEDED_MESSAGE};
pub use server::{router, HttpServer};
