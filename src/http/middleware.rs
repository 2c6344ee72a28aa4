//! Rate limit middleware applied in front of every route.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, instrument, warn};

use crate::ratelimit::{Decision, SlidingWindowLimiter, WindowUsage};
use crate::store::WindowStore;

/// Body message sent with 429 responses.
pub const LIMIT_EXCEEDED_MESSAGE: &str =
    "You have exceeded the maximum number of requests in the allowed time frame.";

/// Consult the limiter before letting a request through.
///
/// `Allow` proceeds, `Deny` answers 429 and `StoreUnavailable` answers 500.
/// Requests whose client cannot be identified are refused with 400.
#[instrument(
    skip_all,
    fields(method = %request.method(), path = %request.uri().path())
)]
pub async fn rate_limit<S: WindowStore + 'static>(
    State(limiter): State<Arc<SlidingWindowLimiter<S>>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_ip(&request)
        .map(|ip| ip.to_string())
        .unwrap_or_default();
    let now = Utc::now();

    let evaluation = match limiter.check(&client, now).await {
        Ok(evaluation) => evaluation,
        Err(err) => {
            warn!(error = %err, "Rejecting request without a usable client identity");
            return error_response(StatusCode::BAD_REQUEST, "Unable to identify client");
        }
    };

    match evaluation.decision {
        Decision::Allow => {
            let mut response = next.run(request).await;
            if let Some(usage) = &evaluation.usage {
                add_rate_limit_headers(&mut response, usage, None);
            }
            response
        }
        Decision::Deny => {
            debug!(client = %client, "Request rejected: rate limit exceeded");
            let mut response = error_response(StatusCode::TOO_MANY_REQUESTS, LIMIT_EXCEEDED_MESSAGE);
            if let Some(usage) = &evaluation.usage {
                add_rate_limit_headers(&mut response, usage, Some(now));
            }
            response
        }
        Decision::StoreUnavailable => {
            error!(client = %client, "Request rejected: rate limit store unavailable");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Attach quota headers; `retry-after` is only set for denied requests.
fn add_rate_limit_headers(response: &mut Response, usage: &WindowUsage, denied_at: Option<DateTime<Utc>>) {
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(usage.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(usage.remaining()));

    if let (Some(now), Some(expiry)) = (denied_at, usage.next_expiry) {
        let retry_after = (expiry - now).num_seconds().max(1);
        headers.insert("retry-after", HeaderValue::from(retry_after));
    }
}

/// Client address: the peer address, else the first proxy hop.
fn client_ip(request: &Request) -> Option<IpAddr> {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return Some(addr.ip());
    }

    if let Some(forwarded_for) = request.headers().get("x-forwarded-for") {
        let first = forwarded_for.to_str().ok()?.split(',').next()?;
        return first.trim().parse().ok();
    }

    request
        .headers()
        .get("x-real-ip")?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::router;
    use crate::ratelimit::WindowPolicy;
    use crate::store::{InMemoryStore, StoreError};
    use async_trait::async_trait;
    use axum::body::Body;
    use std::time::Duration;
    use tower::ServiceExt;

    struct UnreachableStore;

    #[async_trait]
    impl WindowStore for UnreachableStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Err(StoreError::Timeout(Duration::from_secs(1)))
        }

        async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<(), StoreError> {
            Err(StoreError::Timeout(Duration::from_secs(1)))
        }

        async fn compare_and_set(
            &self,
            _key: &str,
            _expected: Option<&[u8]>,
            _value: &[u8],
            _ttl: Duration,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Timeout(Duration::from_secs(1)))
        }
    }

    fn limiter(max_requests: u64) -> Arc<SlidingWindowLimiter<InMemoryStore>> {
        let policy = WindowPolicy::new(
            Duration::from_secs(24 * 3600),
            max_requests,
            Duration::from_secs(3600),
        );
        Arc::new(SlidingWindowLimiter::new(Arc::new(InMemoryStore::new()), policy).unwrap())
    }

    fn request_from(ip: &str) -> Request {
        axum::http::Request::builder()
            .uri("/")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_allowed_request_passes_through() {
        let app = router(limiter(2));

        let response = app.oneshot(request_from("10.0.0.1")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "2");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "1");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"Welcome to the Rate Limited API");
    }

    #[tokio::test]
    async fn test_exhausted_quota_returns_429() {
        let limiter = limiter(2);

        for _ in 0..2 {
            let response = router(limiter.clone())
                .oneshot(request_from("10.0.0.1"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = router(limiter.clone())
            .oneshot(request_from("10.0.0.1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        assert!(response.headers().contains_key("retry-after"));
        assert_eq!(
            body_json(response).await,
            json!({ "error": LIMIT_EXCEEDED_MESSAGE })
        );
        assert_eq!(limiter.stats().denied, 1);
    }

    #[tokio::test]
    async fn test_clients_limited_independently() {
        let limiter = limiter(1);

        let first = router(limiter.clone()).oneshot(request_from("10.0.0.1")).await.unwrap();
        let second = router(limiter.clone()).oneshot(request_from("10.0.0.2")).await.unwrap();
        let again = router(limiter.clone()).oneshot(request_from("10.0.0.1")).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(again.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_store_failure_returns_500() {
        let policy = WindowPolicy::default();
        let limiter = Arc::new(SlidingWindowLimiter::new(Arc::new(UnreachableStore), policy).unwrap());

        let response = router(limiter).oneshot(request_from("10.0.0.1")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Internal Server Error" })
        );
    }

    #[tokio::test]
    async fn test_unidentified_client_rejected() {
        let request = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();

        let response = router(limiter(2)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_client_ip_prefers_peer_address() {
        let mut request = request_from("10.0.0.1");
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 5], 40000))));

        assert_eq!(client_ip(&request), Some(IpAddr::from([192, 168, 1, 5])));
    }

    #[test]
    fn test_client_ip_from_headers() {
        let request = request_from("203.0.113.7, 10.0.0.1");
        assert_eq!(client_ip(&request), Some(IpAddr::from([203, 0, 113, 7])));

        let request = axum::http::Request::builder()
            .uri("/")
            .header("x-real-ip", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), Some(IpAddr::from([198, 51, 100, 2])));

        let request = request_from("not-an-ip");
        assert_eq!(client_ip(&request), None);
    }
}
