use crate::api;
use crate::middleware::{rate_limit_middleware, MiddlewareState};
use crate::rate_limit::RateLimiter;
use axum::{middleware as axum_mw, response::IntoResponse, routing::get, Json, Router};
use std::sync::Arc;
use teamserver_orchestrator::Orchestrator;
use tower::ServiceBuilder;

/// The HTTP gateway.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the gateway without rate limiting.
    pub fn build(orchestrator: Arc<Orchestrator>) -> Router {
        Self::build_with_middleware(orchestrator, None)
    }

    /// Build the gateway, optionally rate limiting every route per client.
    pub fn build_with_middleware(
        orchestrator: Arc<Orchestrator>,
        rate_limiter: Option<Arc<RateLimiter>>,
    ) -> Router {
        let app = Router::new()
            .route("/health", get(health_handler))
            .nest("/api/v1", api::routes())
            .with_state(orchestrator);

        match rate_limiter {
            Some(rate_limiter) => {
                let mw_state = Arc::new(MiddlewareState { rate_limiter });
                app.layer(ServiceBuilder::new().layer(axum_mw::from_fn_with_state(
                    mw_state,
                    rate_limit_middleware,
                )))
            }
            None => app,
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "service": "teamserver"}))
}
