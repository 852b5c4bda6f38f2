//! Exponential backoff between retry rounds

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Fraction of the delay used as the jitter band on either side
const JITTER_FRACTION: f64 = 0.1;

/// Exponential backoff configuration and calculator
///
/// # Formula
/// `delay = min(initial_delay * factor^attempt, max_delay)`, then, when
/// jitter is enabled, a value drawn uniformly from `delay ± 10%`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExponentialBackoff {
    /// Delay before the first retry round (milliseconds)
    ///
    /// Default: 100
    #[serde(default = "defaults::initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound for the un-jittered delay (milliseconds)
    ///
    /// Default: 5000
    #[serde(default = "defaults::max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor applied per attempt
    ///
    /// Default: 2.0
    #[serde(default = "defaults::factor")]
    pub factor: f64,

    /// Randomise delays within ±10% to avoid synchronised retries
    ///
    /// Default: true
    #[serde(default = "defaults::jitter")]
    pub jitter: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay_ms: defaults::initial_delay_ms(),
            max_delay_ms: defaults::max_delay_ms(),
            factor: defaults::factor(),
            jitter: defaults::jitter(),
        }
    }
}

impl ExponentialBackoff {
    /// Delay before retry round `attempt + 1`, using the thread-local RNG
    ///
    /// `attempt` is the zero-based count of failed rounds so far.
    #[must_use]
    pub fn calculate(&self, attempt: u32) -> Duration {
        self.calculate_with(attempt, &mut rand::rng())
    }

    /// Delay before retry round `attempt + 1`, drawing jitter from `rng`
    #[must_use]
    pub fn calculate_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.base_delay_ms(attempt);

        let delay = if self.jitter && delay > 0.0 {
            let jitter = delay * JITTER_FRACTION;
            rng.random_range((delay - jitter)..=(delay + jitter))
        } else {
            delay
        };

        Self::millis_to_duration(delay)
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "The delay is clamped to a non-negative value"
    )]
    fn millis_to_duration(millis: f64) -> Duration {
        Duration::from_nanos((millis.max(0.0) * 1_000_000.0).round() as u64)
    }

    /// The capped, un-jittered delay in milliseconds
    #[allow(clippy::cast_precision_loss, reason = "Delays are far below 2^52 ms")]
    fn base_delay_ms(&self, attempt: u32) -> f64 {
        if self.initial_delay_ms == 0 {
            return 0.0;
        }

        let max = self.max_delay_ms as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = (self.initial_delay_ms as f64) * self.factor.powi(exponent);

        if delay.is_nan() { max } else { delay.min(max) }
    }
}

mod defaults {
    pub const fn initial_delay_ms() -> u64 {
        100
    }

    pub const fn max_delay_ms() -> u64 {
        5000
    }

    pub const fn factor() -> f64 {
        2.0
    }

    pub const fn jitter() -> bool {
        true
    }
}
