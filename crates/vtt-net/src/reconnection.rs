//! Opt-in reconnection with exponential backoff.
//!
//! The transport never retries on its own. Callers that want to survive a
//! dropped link run [`reconnect_with_backoff`], which sleeps according to
//! [`ReconnectState`] between attempts.

use std::time::Duration;

use rand::Rng;
use tokio::net::ToSocketAddrs;

use crate::transport::TcpTransport;

/// Backoff schedule.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first attempt. Default: 500 ms.
    pub initial_delay: Duration,
    /// Growth factor per failed attempt. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Upper bound on any delay. Default: 30 s.
    pub max_delay: Duration,
    /// Attempts before giving up. Default: 10.
    pub max_attempts: u32,
    /// Relative jitter in `[0, 1]`, applied as ±jitter. Default: 0.2.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
            jitter: 0.2,
        }
    }
}

/// Attempt counter and current backoff.
#[derive(Debug)]
pub struct ReconnectState {
    config: ReconnectConfig,
    attempts: u32,
    next_base: Duration,
}

impl ReconnectState {
    /// Fresh state for `config`.
    pub fn new(config: ReconnectConfig) -> Self {
        let next_base = config.initial_delay;
        Self {
            config,
            attempts: 0,
            next_base,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.config.max_attempts {
            return None;
        }
        self.attempts += 1;

        let base = self.next_base;
        self.next_base = base
            .mul_f64(self.config.backoff_multiplier)
            .min(self.config.max_delay);

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let delay = if jitter > 0.0 {
            base.mul_f64(rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter)))
        } else {
            base
        };
        Some(delay.min(self.config.max_delay))
    }

    /// Forget previous failures.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next_base = self.config.initial_delay;
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Reconnection gave up.
#[derive(Debug, thiserror::Error)]
pub enum ReconnectError {
    /// Every attempt failed.
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last_error: String,
    },
}

/// Reconnect `transport` to `addr`, backing off between failures.
///
/// Returns the number of attempts it took.
pub async fn reconnect_with_backoff<A>(
    transport: &mut TcpTransport,
    addr: A,
    config: ReconnectConfig,
) -> Result<u32, ReconnectError>
where
    A: ToSocketAddrs + Clone,
{
    let mut state = ReconnectState::new(config);
    let mut last_error = String::from("no attempt made");

    while let Some(delay) = state.next_delay() {
        tracing::info!("Reconnect attempt {} in {delay:?}", state.attempts());
        tokio::time::sleep(delay).await;

        match transport.connect(addr.clone()).await {
            Ok(peer) => {
                tracing::info!("Reconnected to {peer} after {} attempts", state.attempts());
                return Ok(state.attempts());
            }
            Err(e) => {
                tracing::warn!("Reconnect attempt {} failed: {e}", state.attempts());
                last_error = e.to_string();
            }
        }
    }

    Err(ReconnectError::Exhausted {
        attempts: state.attempts(),
        last_error,
    })
}
