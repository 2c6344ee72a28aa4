//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::{middleware, Router};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::rate_limit;
use crate::error::{Result, SlidewinError};
use crate::ratelimit::SlidingWindowLimiter;
use crate::store::WindowStore;

/// Build the application router with the rate limit middleware in front.
pub fn router<S: WindowStore + 'static>(limiter: Arc<SlidingWindowLimiter<S>>) -> Router {
    Router::new()
        .route("/", get(welcome))
        .layer(middleware::from_fn_with_state(limiter, rate_limit::<S>))
}

async fn welcome() -> &'static str {
    "Welcome to the Rate Limited API"
}

/// HTTP server fronted by the sliding window limiter.
pub struct HttpServer<S: WindowStore + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    limiter: Arc<SlidingWindowLimiter<S>>,
}

impl<S: WindowStore + 'static> HttpServer<S> {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, limiter: Arc<SlidingWindowLimiter<S>>) -> Self {
        Self { addr, limiter }
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server fails.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            SlidewinError::Io(e)
        })?;

        info!(addr = %listener.local_addr()?, "Starting HTTP server with rate limiting");

        let app = router(self.limiter).into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                SlidewinError::Io(e)
            })
    }
}
