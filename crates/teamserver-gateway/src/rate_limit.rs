use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, DefaultKeyedRateLimiter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;
use teamserver_core::{TeamserverError, TeamserverResult};

/// Who is calling the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Client {
    /// An agent identified by the `x-agent-id` header. Each agent has its own
    /// allowance.
    Agent(String),
    /// Operator tooling. All operator requests share one allowance.
    Operator,
}

impl Client {
    pub fn kind(&self) -> &'static str {
        match self {
            Client::Agent(_) => "agent",
            Client::Operator => "operator",
        }
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Client::Agent(id) => write!(f, "agent:{id}"),
            Client::Operator => write!(f, "operator"),
        }
    }
}

/// Sustained request rate plus the burst a quiet client may spend at once.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quota {
    pub requests_per_second: f64,
    pub burst: u32,
}

impl Quota {
    pub fn new(requests_per_second: f64, burst: u32) -> Self {
        Self {
            requests_per_second,
            burst,
        }
    }

    pub fn validate(&self, name: &str) -> TeamserverResult<()> {
        self.to_governor(name).map(|_| ())
    }

    fn to_governor(self, name: &str) -> TeamserverResult<governor::Quota> {
        let invalid_rate = || {
            TeamserverError::Config(format!(
                "{name}.requests_per_second must be a positive number"
            ))
        };
        if !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0 {
            return Err(invalid_rate());
        }
        let period = Duration::try_from_secs_f64(1.0 / self.requests_per_second)
            .map_err(|_| invalid_rate())?;
        let burst = NonZeroU32::new(self.burst)
            .ok_or_else(|| TeamserverError::Config(format!("{name}.burst must be at least 1")))?;
        governor::Quota::with_period(period)
            .map(|quota| quota.allow_burst(burst))
            .ok_or_else(invalid_rate)
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Throttle { retry_after: Duration },
}

/// Gateway request limiter: one allowance per agent, one shared by operators.
pub struct RateLimiter {
    agents: DefaultKeyedRateLimiter<String>,
    operators: DefaultDirectRateLimiter,
}

impl RateLimiter {
    pub fn new(agents: Quota, operators: Quota) -> TeamserverResult<Self> {
        Ok(Self {
            agents: governor::RateLimiter::keyed(agents.to_governor("agents")?),
            operators: governor::RateLimiter::direct(operators.to_governor("operators")?),
        })
    }

    pub fn check(&self, client: &Client) -> Decision {
        let outcome = match client {
            Client::Agent(id) => self.agents.check_key(id),
            Client::Operator => self.operators.check(),
        };
        match outcome {
            Ok(()) => Decision::Allow,
            Err(not_until) => Decision::Throttle {
                retry_after: not_until.wait_time_from(DefaultClock::default().now()),
            },
        }
    }

    /// Forget agents whose allowance is full again. Returns how many were dropped.
    pub fn cleanup(&self) -> usize {
        let before = self.agents.len();
        self.agents.retain_recent();
        self.agents.shrink_to_fit();
        before.saturating_sub(self.agents.len())
    }

    /// Number of agents with a tracked allowance.
    pub fn tracked(&self) -> usize {
        self.agents.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn agent(id: &str) -> Client {
        Client::Agent(id.to_string())
    }

    #[test]
    fn test_burst_then_throttle_with_retry_hint() {
        let limiter = RateLimiter::new(Quota::new(0.1, 2), Quota::new(10.0, 5)).unwrap();
        assert_eq!(limiter.check(&agent("A1")), Decision::Allow);
        assert_eq!(limiter.check(&agent("A1")), Decision::Allow);
        match limiter.check(&agent("A1")) {
            Decision::Throttle { retry_after } => {
                assert!(retry_after > Duration::from_secs(5));
                assert!(retry_after <= Duration::from_secs(10));
            }
            Decision::Allow => panic!("third request should be throttled"),
        }
    }

    #[test]
    fn test_agents_do_not_share_allowance() {
        let limiter = RateLimiter::new(Quota::new(0.1, 1), Quota::new(0.1, 1)).unwrap();
        assert_eq!(limiter.check(&agent("A1")), Decision::Allow);
        assert!(matches!(
            limiter.check(&agent("A1")),
            Decision::Throttle { .. }
        ));
        assert_eq!(limiter.check(&agent("A2")), Decision::Allow);
    }

    #[test]
    fn test_operator_quota_is_separate() {
        let limiter = RateLimiter::new(Quota::new(0.1, 1), Quota::new(0.1, 3)).unwrap();
        for _ in 0..3 {
            assert_eq!(limiter.check(&Client::Operator), Decision::Allow);
        }
        assert!(matches!(
            limiter.check(&Client::Operator),
            Decision::Throttle { .. }
        ));
        assert_eq!(limiter.check(&agent("A1")), Decision::Allow);
        assert_eq!(limiter.tracked(), 1);
    }

    #[test]
    fn test_cleanup_drops_replenished_agents() {
        let limiter = RateLimiter::new(Quota::new(1000.0, 1), Quota::new(1.0, 1)).unwrap();
        limiter.check(&agent("A1"));
        limiter.check(&agent("A2"));
        assert_eq!(limiter.tracked(), 2);

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(limiter.cleanup(), 2);
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn test_invalid_quota_rejected() {
        assert!(RateLimiter::new(Quota::new(0.0, 1), Quota::new(1.0, 1)).is_err());
        assert!(RateLimiter::new(Quota::new(1.0, 1), Quota::new(1.0, 0)).is_err());
        assert!(RateLimiter::new(Quota::new(f64::NAN, 1), Quota::new(1.0, 1)).is_err());
        assert!(Quota::new(5.0, 10).validate("security.agents").is_ok());
    }
}
