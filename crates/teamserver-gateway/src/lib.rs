//! HTTP transport for the teamserver.
//!
//! One concrete encoding of the agent-facing protocol (check-in, result
//! submission) and the operator-facing protocol (agents, tasks, rules,
//! events) as JSON over HTTP, built on axum.

pub mod api;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod rate_limit;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use middleware::AGENT_ID_HEADER;
pub use rate_limit::{Client, Decision, Quota, RateLimiter};
pub use server::GatewayServer;
