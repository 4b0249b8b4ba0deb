//! Reconnection Policy
//!
//! Capped exponential backoff for live stream reconnection:
//!
//! ```text
//! delay(n) = min(max_delay, initial_delay * multiplier^min(n, max_exponent))
//! ```
//!
//! With the defaults this yields 1s, 2s, 4s, 8s, 8s, 8s, ... The attempt
//! counter grows on every scheduled attempt and only resets after a
//! successful open. There is no attempt limit; the stream always retries.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each attempt).
    pub multiplier: f64,
    /// Attempt count after which the delay stops growing.
    pub max_exponent: u32,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            max_exponent: 3,
            jitter_factor: 0.0,
        }
    }
}

impl ReconnectConfig {
    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &crate::WebSocketSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            max_exponent: settings.reconnect_max_exponent,
            jitter_factor: 0.0,
        }
    }

    /// Delay for a given attempt count, before jitter.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.min(self.max_exponent)).unwrap_or(i32::MAX);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent)).round();
        let max_millis = self.max_delay.as_millis();
        let millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                (scaled as u128).min(max_millis)
            }
        } else if scaled > 0.0 {
            max_millis
        } else {
            0
        };

        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

/// Reconnection policy tracking consecutive attempts.
///
/// # Example
///
/// ```rust
/// use signal_sync::infrastructure::feed::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
/// assert_eq!(policy.next_delay(), Duration::from_secs(1));
/// assert_eq!(policy.next_delay(), Duration::from_secs(2));
///
/// // Successful open
/// policy.reset();
/// assert_eq!(policy.next_delay(), Duration::from_secs(1));
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Delay for the next attempt; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.config.delay_for_attempt(self.attempt_count);
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.apply_jitter(delay)
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Apply jitter to a duration.
    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}
