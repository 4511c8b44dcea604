//! Restart policy for failed subscriptions
//!
//! Exponential backoff with jitter, an optional attempt cap, and a reset
//! once a connection has proven stable.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

/// How a route's subscription is restarted after a failure
#[derive(Debug, Clone, PartialEq)]
pub struct RestartPolicy {
    /// Delay before the first restart
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor applied after each restart
    pub multiplier: f64,
    /// Consecutive restarts allowed before the route gives up, `None` for no cap
    pub max_restarts: Option<u32>,
    /// Spread delays by ±25%
    pub jitter: bool,
    /// Uptime after which a connection counts as healthy and the backoff resets
    pub stable_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_restarts: None,
            jitter: true,
            stable_after: Duration::from_secs(30),
        }
    }
}

impl RestartPolicy {
    /// Policy with a fixed delay and no jitter, mostly useful in tests
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter: false,
            ..Self::default()
        }
    }

    /// Limit the number of consecutive restarts
    pub fn with_max_restarts(mut self, max: u32) -> Self {
        self.max_restarts = Some(max);
        self
    }
}

/// Backoff state of one route
#[derive(Debug)]
pub struct Backoff {
    policy: RestartPolicy,
    /// Consecutive restarts since the last reset
    attempt: u32,
    current_delay: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(policy: RestartPolicy) -> Self {
        let current_delay = policy.initial_delay;
        Self {
            policy,
            attempt: 0,
            current_delay,
        }
    }

    /// Consecutive restarts since the last reset
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether a connection that stayed up for `uptime` resets the backoff
    #[must_use]
    pub fn is_stable(&self, uptime: Duration) -> bool {
        uptime >= self.policy.stable_after
    }

    /// Forget previous failures
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = self.policy.initial_delay;
    }

    /// Delay to wait before the next restart.
    ///
    /// Returns `None` once `max_restarts` consecutive restarts were used.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.policy.max_restarts {
            if self.attempt >= max {
                warn!(attempts = self.attempt, max, "restart limit reached");
                return None;
            }
        }

        self.attempt += 1;
        let delay = self.current_delay;

        let delay = if self.policy.jitter {
            let millis = delay.as_millis() as f64;
            let range = millis * 0.25;
            // Routes failing together must not reconnect together.
            let offset = rand::thread_rng().gen_range(-range..=range);
            Duration::from_millis((millis + offset).max(1.0) as u64)
        } else {
            delay
        };

        let next = self.current_delay.as_secs_f64() * self.policy.multiplier;
        self.current_delay = Duration::from_secs_f64(next).min(self.policy.max_delay);

        Some(delay)
    }
}
