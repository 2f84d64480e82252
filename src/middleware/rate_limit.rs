use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::{header, Response, StatusCode},
    middleware::Next,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_governor::{governor::GovernorConfigBuilder, GovernorError, GovernorLayer};

/// Type alias for the IP-keyed governor layers (global and public routes)
pub type IpGovernorLayer = GovernorLayer<
    tower_governor::key_extractor::PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware<governor::clock::QuantaInstant>,
    Body,
>;

/// Create a GovernorLayer for global rate limiting (per IP address)
/// - 1000 requests per minute (one token every 60ms)
/// - Applied before authentication
pub fn create_global_governor() -> IpGovernorLayer {
    ip_governor(60, 1000)
}

/// Per-IP limits for unauthenticated routes (fare estimates, gateway webhook),
/// matching the passenger budget.
pub fn create_public_governor() -> IpGovernorLayer {
    ip_governor(600 * 2, 100)
}

fn ip_governor(per_ms: u64, burst: u32) -> IpGovernorLayer {
    let config = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(per_ms)
            .burst_size(burst)
            .finish()
            .expect("rate limit quota must be non-zero"),
    );

    GovernorLayer::new(config).error_handler(rate_limit_error_handler)
}

/// Render governor rejections in the same JSON shape as `AppError`.
pub fn rate_limit_error_handler(error: GovernorError) -> Response<Body> {
    let (status, kind, message, retry_after) = match error {
        GovernorError::TooManyRequests { wait_time, .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            format!("Too many requests, retry in {}s", wait_time),
            Some(wait_time),
        ),
        GovernorError::UnableToExtractKey => (
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Unable to identify caller for rate limiting".to_string(),
            None,
        ),
        GovernorError::Other { code, msg, .. } => (
            code,
            "rate_limit_error",
            msg.unwrap_or_else(|| "Rate limiting failed".to_string()),
            None,
        ),
    };

    let body = serde_json::json!({ "error": kind, "message": message }).to_string();
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(wait) = retry_after {
        builder = builder.header(header::RETRY_AFTER, wait.to_string());
    }

    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// `TraceLayer` span that records the request path without its query.
pub fn request_span<B>(request: &axum::http::Request<B>) -> tracing::Span {
    tracing::debug_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        version = ?request.version(),
    )
}

/// Middleware to log rate limiting and request details
pub async fn log_request(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> axum::response::Response {
    let method = request.method().clone();
    // Path only: the WebSocket query string carries the bearer token
    let path = request.uri().path().to_owned();

    tracing::debug!(client_ip = %addr.ip(), method = %method, path = %path, "Incoming request");

    let response = next.run(request).await;
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        tracing::warn!(
            client_ip = %addr.ip(),
            method = %method,
            path = %path,
            "RATE LIMITED - Request rejected due to too many requests"
        );
    } else if status.is_client_error() || status.is_server_error() {
        tracing::warn!(
            client_ip = %addr.ip(),
            method = %method,
            path = %path,
            status = %status,
            "Request failed"
        );
    } else {
        tracing::debug!(
            client_ip = %addr.ip(),
            method = %method,
            path = %path,
            status = %status,
            "Request completed"
        );
    }

    response
}
