//! Request-id propagation and per-route rate limiting.

use std::sync::Arc;

use axum::extract::State;
use axum::{
    Json,
    body::Body,
    http::{HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use uuid::Uuid;

use lendhub_cache::{LimitClass, RateLimitDecision, RateLimiter};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Tag every request with an id: a proxy-supplied `x-request-id` is kept
/// as-is, anything else gets a fresh UUID. The id rides in the request
/// extensions so the trace span can pick it up, and is echoed on the
/// response.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static(REQUEST_ID_HEADER);

    let id = match req.headers().get(&header_name) {
        Some(incoming) => incoming.clone(),
        None => {
            let generated = Uuid::new_v4();
            HeaderValue::from_str(&generated.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("invalid"))
        }
    };
    req.extensions_mut().insert(id.clone());

    let mut res = next.run(req).await;
    res.headers_mut().insert(header_name, id);
    res
}

/// Authenticated user id, inserted into request extensions by whatever
/// auth layer fronts these routes. Rate limiting keys on it when present.
#[derive(Debug, Clone)]
pub struct UserId(pub String);

/// Maps a request to the identity the limit window is keyed on.
pub type IdentifierFn = Arc<dyn Fn(&Request<Body>) -> String + Send + Sync>;

/// State for one rate-limited route group. The default identity is
/// "authenticated user, else client IP"; routes that need a different
/// key (say, per-API-token) swap it via [`RateLimitState::with_identifier`].
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
    pub class: LimitClass,
    identify: Option<IdentifierFn>,
}

impl RateLimitState {
    pub fn new(limiter: Arc<RateLimiter>, class: LimitClass) -> Self {
        Self {
            limiter,
            class,
            identify: None,
        }
    }

    pub fn with_identifier(mut self, identify: IdentifierFn) -> Self {
        self.identify = Some(identify);
        self
    }
}

/// Axum middleware enforcing a fixed-window limit per client. Wire with
/// `axum::middleware::from_fn_with_state`.
pub async fn rate_limit(
    State(state): State<RateLimitState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let identifier = match &state.identify {
        Some(identify) => identify(&req),
        None => client_identifier(&req),
    };
    let decision = state.limiter.check(&identifier, state.class).await;

    if !decision.allowed {
        tracing::debug!(
            class = %state.class,
            identifier = %identifier,
            "rate limit exceeded"
        );
        return rejection_response(&decision);
    }

    let mut res = next.run(req).await;
    attach_limit_headers(res.headers_mut(), &decision);
    res
}

/// Prefer the authenticated user id; fall back to the client IP as seen
/// through proxy headers.
fn client_identifier(req: &Request<Body>) -> String {
    if let Some(user) = req.extensions().get::<UserId>() {
        return format!("user:{}", user.0);
    }
    let ip = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| {
            req.headers()
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
        })
        .unwrap_or("unknown");
    format!("ip:{ip}")
}

fn attach_limit_headers(headers: &mut axum::http::HeaderMap, decision: &RateLimitDecision) {
    let pairs = [
        ("x-ratelimit-limit", decision.limit.to_string()),
        ("x-ratelimit-remaining", decision.remaining.to_string()),
        ("x-ratelimit-reset", decision.reset_after.as_secs().to_string()),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}

fn rejection_response(decision: &RateLimitDecision) -> Response {
    let retry_after = decision
        .retry_after
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let body = json!({
        "error": "rate_limited",
        "message": decision.message.as_deref().unwrap_or("Too many requests."),
        "retryAfter": retry_after,
    });
    let mut res = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    attach_limit_headers(res.headers_mut(), decision);
    if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
        res.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
    }
    res
}
