use crate::adaptive::AdaptiveLimiter;
use crate::config::UpstreamSettings;
use crate::error::{GateError, Result};
use crate::metrics::{self, Timer};
use crate::rate_limit::SlidingWindowLimiter;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Method, Request, Response, StatusCode, Uri},
    response::IntoResponse,
};
use bytes::{Bytes, BytesMut};
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Body returned with every 429
pub const RATE_LIMIT_BODY: &str = "Rate limit exceeded";

/// Gate handler state
#[derive(Clone)]
pub struct GateState {
    /// Cluster-wide window, keyed by the upstream URL
    pub shared: Arc<SlidingWindowLimiter>,
    /// Per-instance adaptive bucket
    pub adaptive: Arc<AdaptiveLimiter>,
    /// Upstream target and shared window resource key
    pub upstream: Arc<str>,
    pub client: reqwest::Client,
    pub max_response_bytes: usize,
}

impl GateState {
    /// Create a new gate state
    pub fn new(
        shared: Arc<SlidingWindowLimiter>,
        adaptive: Arc<AdaptiveLimiter>,
        upstream: impl Into<Arc<str>>,
        settings: &UpstreamSettings,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| GateError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            shared,
            adaptive,
            upstream: upstream.into(),
            client,
            max_response_bytes: settings.max_response_bytes,
        })
    }

    /// Both limiters must admit; the adaptive bucket is only consulted once
    /// the shared window has room
    pub async fn admit(&self) -> bool {
        if !self.shared.allow(&self.upstream).await {
            metrics::record_rate_limit_rejection("shared");
            return false;
        }

        if !self.adaptive.allow() {
            debug!("Adaptive bucket empty");
            metrics::record_rate_limit_rejection("adaptive");
            return false;
        }

        true
    }
}

/// Gate every request, then forward it or answer 429
///
/// The adaptive limiter hears about every request: rejections and forwarding
/// failures count as errors.
pub async fn gate_handler(State(state): State<GateState>, req: Request<Body>) -> Response<Body> {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let timer = Timer::new(method.to_string());

    if !state.admit().await {
        state.adaptive.record_metrics(timer.elapsed(), true);
        timer.record(StatusCode::TOO_MANY_REQUESTS.as_u16(), true);
        warn!(method = %method, uri = %uri, "Rate limit exceeded");
        return (StatusCode::TOO_MANY_REQUESTS, RATE_LIMIT_BODY).into_response();
    }

    match forward(&state, req).await {
        Ok(response) => {
            state.adaptive.record_metrics(timer.elapsed(), false);
            timer.record(response.status().as_u16(), false);
            info!(
                method = %method,
                uri = %uri,
                status = %response.status(),
                latency_ms = timer.elapsed().as_secs_f64() * 1000.0,
                "Request forwarded"
            );
            response
        }
        Err(e) => {
            state.adaptive.record_metrics(timer.elapsed(), true);
            timer.record(e.status_code().as_u16(), true);
            warn!(
                method = %method,
                uri = %uri,
                error = %e,
                latency_ms = timer.elapsed().as_secs_f64() * 1000.0,
                "Forwarding failed"
            );
            e.into_response()
        }
    }
}

async fn forward(state: &GateState, req: Request<Body>) -> Result<Response<Body>> {
    let upstream_url = build_upstream_url(&state.upstream, req.uri())?;
    let method = req.method().clone();
    let headers = req.headers().clone();

    let body_bytes = req
        .into_body()
        .collect()
        .await
        .map_err(|e| GateError::Proxy(format!("Failed to read request body: {}", e)))?
        .to_bytes();

    debug!(upstream_url = %upstream_url, "Forwarding to upstream");

    send_request(
        &state.client,
        method,
        headers,
        body_bytes,
        upstream_url,
        state.max_response_bytes,
    )
    .await
}

/// Upstream URL for an inbound request
///
/// The target is used as-is for `/`; any other path is appended to the
/// target's path, and the inbound query is merged after the target's own.
pub fn build_upstream_url(target: &str, uri: &Uri) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(target)
        .map_err(|e| GateError::Proxy(format!("Invalid upstream URL '{}': {}", target, e)))?;

    let path = uri.path();
    if !path.is_empty() && path != "/" {
        let joined = format!("{}{}", url.path().trim_end_matches('/'), path);
        url.set_path(&joined);
    }

    if let Some(query) = uri.query().filter(|q| !q.is_empty()) {
        let merged = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{}&{}", existing, query),
            _ => query.to_string(),
        };
        url.set_query(Some(&merged));
    }

    Ok(url)
}

/// Send request to the upstream and relay its response
async fn send_request(
    client: &reqwest::Client,
    method: Method,
    headers: HeaderMap,
    body_bytes: Bytes,
    upstream_url: reqwest::Url,
    max_response_bytes: usize,
) -> Result<Response<Body>> {
    let mut upstream_req = client.request(method, upstream_url).body(body_bytes);

    for (name, value) in headers.iter() {
        let name_str = name.as_str();
        if !is_hop_by_hop_header(name_str) && !name_str.eq_ignore_ascii_case("host") {
            upstream_req = upstream_req.header(name, value);
        }
    }

    let upstream_response = upstream_req.send().await.map_err(|e| {
        if e.is_timeout() {
            GateError::Timeout(format!("Upstream request timed out: {}", e))
        } else if e.is_connect() {
            GateError::Upstream(format!("Failed to connect to upstream: {}", e))
        } else {
            GateError::Proxy(format!("Upstream request failed: {}", e))
        }
    })?;

    let status = upstream_response.status();
    let response_headers = upstream_response.headers().clone();
    let (body, truncated) = read_capped(upstream_response, max_response_bytes).await?;

    if truncated {
        warn!(limit = max_response_bytes, "Upstream response truncated");
    }

    let mut response_builder = Response::builder().status(status);
    for (name, value) in response_headers.iter() {
        let name_str = name.as_str();
        if is_hop_by_hop_header(name_str) {
            continue;
        }
        if truncated && name_str.eq_ignore_ascii_case("content-length") {
            continue;
        }
        response_builder = response_builder.header(name, value);
    }

    response_builder
        .body(Body::from(body))
        .map_err(|e| GateError::Internal(format!("Failed to build response: {}", e)))
}

/// Read at most `limit` bytes of the upstream body
async fn read_capped(mut response: reqwest::Response, limit: usize) -> Result<(Bytes, bool)> {
    let mut body = BytesMut::new();

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| GateError::Upstream(format!("Failed to read upstream response: {}", e)))?
    {
        let remaining = limit - body.len();
        if chunk.len() > remaining {
            body.extend_from_slice(&chunk[..remaining]);
            return Ok((body.freeze(), true));
        }
        body.extend_from_slice(&chunk);
    }

    Ok((body.freeze(), false))
}

/// Check if a header is a hop-by-hop header that should not be forwarded
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop_header("Connection"));
        assert!(is_hop_by_hop_header("connection"));
        assert!(is_hop_by_hop_header("Keep-Alive"));
        assert!(is_hop_by_hop_header("Transfer-Encoding"));
        assert!(!is_hop_by_hop_header("Content-Type"));
        assert!(!is_hop_by_hop_header("Authorization"));
    }

    #[test]
    fn test_hop_by_hop_trailer() {
        assert!(is_hop_by_hop_header("Trailer"));
        assert!(!is_hop_by_hop_header("Trailers"));
    }

    #[test]
    fn test_build_upstream_url() {
        let target = "https://api.example.com/v1/items";
        let build = |target: &str, uri: &str| {
            let uri: Uri = uri.parse().unwrap();
            build_upstream_url(target, &uri).unwrap().to_string()
        };

        assert_eq!(build(target, "/"), target);
        assert_eq!(
            build(target, "/?page=2"),
            "https://api.example.com/v1/items?page=2"
        );
        assert_eq!(
            build("https://api.example.com/v1/items/", "/42"),
            "https://api.example.com/v1/items/42"
        );
        assert_eq!(
            build("https://api.example.com/search?a=1", "/?b=2"),
            "https://api.example.com/search?a=1&b=2"
        );
        assert_eq!(build("https://api.example.com", "/42"), "https://api.example.com/42");
    }

    #[test]
    fn test_build_upstream_url_with_target_query() {
        let uri: Uri = "/42?b=2".parse().unwrap();
        let url = build_upstream_url("https://api.example.com/search?a=1", &uri).unwrap();

        assert_eq!(url.as_str(), "https://api.example.com/search/42?a=1&b=2");
        assert_eq!(url.path(), "/search/42");
        assert_eq!(url.query(), Some("a=1&b=2"));

        let uri: Uri = "/42".parse().unwrap();
        let url = build_upstream_url("https://api.example.com/search?a=1", &uri).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/search/42?a=1");
    }

    #[test]
    fn test_build_upstream_url_invalid_target() {
        let uri: Uri = "/".parse().unwrap();
        assert!(matches!(
            build_upstream_url("not a url", &uri),
            Err(GateError::Proxy(_))
        ));
    }
}
