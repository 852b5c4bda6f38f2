use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use courier_common::{DeliveryOutcome, Message, outgoing};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::Provider;
use crate::error::ProviderError;

/// Configuration for a [`MockProvider`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockProviderConfig {
    pub name: String,

    /// Probability in `[0, 1]` that a send succeeds
    ///
    /// Default: 0.8
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,

    /// Upper bound of the simulated network latency (milliseconds)
    ///
    /// Default: 1000
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,
}

const fn default_success_rate() -> f64 {
    0.8
}

const fn default_max_latency_ms() -> u64 {
    1000
}

/// Stand-in provider that sleeps for a random latency and then succeeds with
/// a configurable probability
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    /// `f64` bits, so the rate can be changed while deliveries are running
    success_rate: AtomicU64,
    max_latency_ms: u64,
}

impl MockProvider {
    #[must_use]
    pub fn new(name: impl Into<String>, success_rate: f64, max_latency_ms: u64) -> Self {
        Self {
            name: name.into(),
            success_rate: AtomicU64::new(success_rate.clamp(0.0, 1.0).to_bits()),
            max_latency_ms,
        }
    }

    pub fn success_rate(&self) -> f64 {
        f64::from_bits(self.success_rate.load(Ordering::Relaxed))
    }

    /// Change the success probability, clamped to `[0, 1]`
    ///
    /// Setting it to `0.0` forces every send to fail, `1.0` forces success.
    pub fn set_success_rate(&self, success_rate: f64) {
        self.success_rate
            .store(success_rate.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn latency(&self) -> Duration {
        if self.max_latency_ms == 0 {
            return Duration::ZERO;
        }

        Duration::from_millis(rand::rng().random_range(0..self.max_latency_ms))
    }
}

impl From<&MockProviderConfig> for MockProvider {
    fn from(config: &MockProviderConfig) -> Self {
        Self::new(config.name.clone(), config.success_rate, config.max_latency_ms)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &Message) -> Result<DeliveryOutcome, ProviderError> {
        tokio::time::sleep(self.latency()).await;

        // `random::<f64>()` is in [0, 1), so a rate of 1.0 always succeeds
        // and 0.0 always fails
        let delivered = rand::rng().random::<f64>() < self.success_rate();

        outgoing!(
            level = DEBUG,
            provider = %self.name,
            message_id = %message.id(),
            delivered,
            "Mock provider handled message"
        );

        if delivered {
            Ok(DeliveryOutcome::success(
                &self.name,
                format!("Sent via {}", self.name),
            ))
        } else {
            Err(ProviderError::failed(&self.name, "simulated failure"))
        }
    }
}
