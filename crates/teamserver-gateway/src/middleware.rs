use crate::rate_limit::{Client, Decision, RateLimiter};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::warn;

/// Header agents use to identify themselves.
pub const AGENT_ID_HEADER: &str = "x-agent-id";

/// Shared middleware state.
#[derive(Clone)]
pub struct MiddlewareState {
    pub rate_limiter: Arc<RateLimiter>,
}

/// Requests carrying an agent header are agent traffic, everything else is
/// operator traffic.
pub fn client_for(headers: &HeaderMap) -> Client {
    headers
        .get(AGENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map_or(Client::Operator, |id| Client::Agent(id.to_string()))
}

pub async fn rate_limit_middleware(
    State(state): State<Arc<MiddlewareState>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_for(request.headers());

    match state.rate_limiter.check(&client) {
        Decision::Allow => next.run(request).await,
        Decision::Throttle { retry_after } => {
            warn!(
                client_kind = client.kind(),
                client = %client,
                retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                path = %request.uri().path(),
                "Request throttled"
            );
            throttled(retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0))
        }
    }
}

fn throttled(retry_after_secs: u64) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({
            "error": "rate_limited",
            "message": format!("Rate limit exceeded, retry in {retry_after_secs}s"),
        })),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
    response
}
