//! Per-provider circuit breaker
//!
//! Each provider is guarded by its own breaker so that a provider which keeps
//! failing is skipped without being contacted, while the remaining providers
//! keep serving deliveries.
//!
//! # State Transitions
//!
//! ```text
//! ┌─────────┐  failure_threshold failures  ┌──────┐
//! │ Closed  │ ───────────────────────────> │ Open │ <──────────┐
//! └─────────┘                              └──────┘            │
//!     ^                                        │               │
//!     │                                        │ timeout       │ any failure
//!     │                                        v               │
//!     │  success_threshold   ┌───────────────────┐             │
//!     └───────────────────── │     Half-Open     │ ────────────┘
//!        successes           └───────────────────┘
//! ```
//!
//! # Example
//!
//! ```text
//! Thresholds: 3 failures to open, 2 successes to close
//! Timeout: 30 seconds
//!
//! t=0s:   Closed
//! t=2s:   3rd consecutive failure -> Open
//! t=2s-32s: calls rejected with CircuitOpen, provider not contacted
//! t=32s:  next call -> Half-Open, call goes through
//! t=33s:  2nd success -> Closed
//! ```

use std::time::Duration;

use courier_common::tracing;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::ProviderError;

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of failures required to open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Number of consecutive successes needed to close the circuit from half-open
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// How long the circuit stays open before testing recovery (milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Time window for counting failures (milliseconds)
    ///
    /// When unset, failures count until the next success regardless of age.
    #[serde(default)]
    pub failure_window_ms: Option<u64>,

    /// Per-provider overrides, keyed by provider name
    #[serde(default)]
    pub provider_overrides: ahash::AHashMap<String, ProviderCircuitBreakerConfig>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_ms: default_timeout_ms(),
            failure_window_ms: None,
            provider_overrides: ahash::AHashMap::default(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Resolve the effective settings for `provider`
    #[must_use]
    pub fn for_provider(&self, provider: &str) -> ProviderCircuitBreakerConfig {
        self.provider_overrides
            .get(provider)
            .cloned()
            .unwrap_or(ProviderCircuitBreakerConfig {
                failure_threshold: self.failure_threshold,
                success_threshold: self.success_threshold,
                timeout_ms: self.timeout_ms,
                failure_window_ms: self.failure_window_ms,
            })
    }
}

const fn default_failure_threshold() -> u32 {
    3
}

const fn default_success_threshold() -> u32 {
    2
}

const fn default_timeout_ms() -> u64 {
    30_000 // 30 seconds
}

/// Per-provider circuit breaker configuration override
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// Timeout for this provider (milliseconds)
    pub timeout_ms: u64,
    /// Failure window for this provider (milliseconds)
    #[serde(default)]
    pub failure_window_ms: Option<u64>,
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all calls allowed
    Closed,
    /// Circuit tripped - reject all calls immediately
    Open,
    /// Testing recovery - calls allowed, a single failure reopens
    HalfOpen,
}

#[derive(Debug)]
struct CircuitBreakerData {
    state: CircuitState,
    /// Failures since the last success (or since the window opened)
    failure_count: u32,
    /// Timestamp of first failure in the current window
    first_failure_at: Option<Instant>,
    /// When the circuit may move to half-open
    reopen_at: Option<Instant>,
    /// Consecutive successes in half-open state
    consecutive_successes: u32,
}

impl CircuitBreakerData {
    const fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            first_failure_at: None,
            reopen_at: None,
            consecutive_successes: 0,
        }
    }

    fn is_failure_window_expired(
        &self,
        config: &ProviderCircuitBreakerConfig,
        now: Instant,
    ) -> bool {
        match (config.failure_window_ms, self.first_failure_at) {
            (Some(window), Some(first_failure)) => {
                now.duration_since(first_failure) > Duration::from_millis(window)
            }
            _ => false,
        }
    }

    fn trip(&mut self, config: &ProviderCircuitBreakerConfig, now: Instant) {
        self.state = CircuitState::Open;
        self.reopen_at = Some(now + Duration::from_millis(config.timeout_ms));
        self.consecutive_successes = 0;
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Circuit breaker guarding a single provider
#[derive(Debug)]
pub struct CircuitBreaker {
    provider: String,
    config: ProviderCircuitBreakerConfig,
    data: parking_lot::Mutex<CircuitBreakerData>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(provider: impl Into<String>, config: ProviderCircuitBreakerConfig) -> Self {
        Self {
            provider: provider.into(),
            config,
            data: parking_lot::Mutex::new(CircuitBreakerData::new()),
        }
    }

    /// Build the breaker for `provider` from the shared configuration
    #[must_use]
    pub fn for_provider(provider: &str, config: &CircuitBreakerConfig) -> Self {
        Self::new(provider, config.for_provider(provider))
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Check if a call should be allowed
    ///
    /// An open circuit whose timeout has elapsed moves to half-open here and
    /// lets the call through.
    pub fn should_allow_delivery(&self) -> bool {
        let mut data = self.data.lock();

        let state = data.state;
        match state {
            CircuitState::Open => {
                let now = Instant::now();
                if data.reopen_at.is_some_and(|reopen_at| now >= reopen_at) {
                    data.state = CircuitState::HalfOpen;
                    data.consecutive_successes = 0;
                    drop(data);
                    tracing::info!(
                        provider = %self.provider,
                        "Circuit breaker entering HALF-OPEN state - testing recovery"
                    );
                    true
                } else {
                    false
                }
            }
            CircuitState::Closed | CircuitState::HalfOpen => true,
        }
    }

    /// Record a successful call
    ///
    /// Returns `true` if the circuit transitioned to Closed (recovered)
    pub fn record_success(&self) -> bool {
        let mut data = self.data.lock();

        let state = data.state;
        match state {
            CircuitState::Closed => {
                data.failure_count = 0;
                data.first_failure_at = None;
                false
            }
            CircuitState::HalfOpen => {
                data.consecutive_successes += 1;

                if data.consecutive_successes >= self.config.success_threshold {
                    data.reset();
                    drop(data);
                    tracing::info!(
                        provider = %self.provider,
                        "Circuit breaker CLOSED - normal operation resumed"
                    );
                    true
                } else {
                    false
                }
            }
            CircuitState::Open => {
                drop(data);
                tracing::warn!(
                    provider = %self.provider,
                    "Unexpected success while circuit is open"
                );
                false
            }
        }
    }

    /// Record a failed call
    ///
    /// Returns `true` if the circuit transitioned to Open (tripped)
    pub fn record_failure(&self) -> bool {
        let mut data = self.data.lock();
        let now = Instant::now();

        let state = data.state;
        match state {
            CircuitState::Closed => {
                if data.is_failure_window_expired(&self.config, now) {
                    data.failure_count = 0;
                    data.first_failure_at = None;
                }

                if data.first_failure_at.is_none() {
                    data.first_failure_at = Some(now);
                }
                data.failure_count += 1;

                if data.failure_count >= self.config.failure_threshold {
                    data.trip(&self.config, now);
                    let failure_count = data.failure_count;
                    drop(data);
                    tracing::warn!(
                        provider = %self.provider,
                        failure_count,
                        threshold = self.config.failure_threshold,
                        timeout_ms = self.config.timeout_ms,
                        "Circuit breaker OPENED - rejecting calls to provider"
                    );
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                data.trip(&self.config, now);
                drop(data);
                tracing::warn!(
                    provider = %self.provider,
                    "Circuit breaker test failed - reopening circuit"
                );
                true
            }
            CircuitState::Open => false,
        }
    }

    /// Run `operation` through the breaker
    ///
    /// Rejects with [`ProviderError::CircuitOpen`] without invoking the
    /// operation while the circuit is open. Otherwise the result is recorded
    /// and passed through unchanged.
    ///
    /// # Errors
    ///
    /// Returns the operation's error, or `CircuitOpen` if the call was rejected.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        if !self.should_allow_delivery() {
            tracing::debug!(provider = %self.provider, "Circuit open, skipping provider");
            return Err(ProviderError::CircuitOpen {
                provider: self.provider.clone(),
            });
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                Err(error)
            }
        }
    }

    /// Current circuit state
    ///
    /// Does not perform the lazy Open to Half-Open transition.
    pub fn state(&self) -> CircuitState {
        self.data.lock().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let data = self.data.lock();
        CircuitBreakerStats {
            state: data.state,
            failure_count: data.failure_count,
            consecutive_successes: data.consecutive_successes,
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStats {
    /// Current circuit state
    pub state: CircuitState,
    /// Number of failures counted towards tripping
    pub failure_count: u32,
    /// Number of consecutive successes in half-open state
    pub consecutive_successes: u32,
}
