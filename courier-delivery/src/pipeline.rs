//! Delivery orchestration
//!
//! For each message the pipeline:
//! 1. Returns the recorded outcome if the identity was already processed
//! 2. Waits for rate limiter admission
//! 3. Tries every provider in configured order, each through its own circuit
//!    breaker, until one succeeds
//! 4. After a full failed round, backs off and starts the next round, up to
//!    `max_retries` rounds
//! 5. Records the outcome, synthesizing a failed one if delivery gave up

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use courier_common::{DeliveryOutcome, Message, MessageId, outgoing, tracing};
use futures_util::FutureExt;

use crate::{
    backoff::ExponentialBackoff,
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState},
    error::{DeliveryError, ProviderError},
    idempotency::{DeliveryStats, IdempotencyCache},
    provider::Provider,
    queue::EntryHandler,
    rate_limiter::{RateLimitConfig, RateLimitStats, RateLimiter},
};

/// Rate limiter key shared by every delivery
pub const RATE_LIMIT_KEY: &str = "send-message";

/// Provider name that synthesized failures are attributed to
pub const ALL_PROVIDERS: &str = "All providers";

#[derive(Debug)]
struct GuardedProvider {
    provider: Arc<dyn Provider>,
    breaker: CircuitBreaker,
}

#[derive(Debug)]
pub struct DeliveryPipeline {
    providers: Vec<GuardedProvider>,
    max_retries: u32,
    rate_limiter: RateLimiter,
    backoff: ExponentialBackoff,
    cache: IdempotencyCache,
}

impl DeliveryPipeline {
    /// Build a pipeline over `providers`, tried in the given order
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Configuration`] if `providers` is empty.
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        max_retries: u32,
        rate_limit: RateLimitConfig,
        backoff: ExponentialBackoff,
        circuit_breaker: &CircuitBreakerConfig,
    ) -> Result<Self, DeliveryError> {
        if providers.is_empty() {
            return Err(no_providers());
        }

        let providers = providers
            .into_iter()
            .map(|provider| GuardedProvider {
                breaker: CircuitBreaker::for_provider(provider.name(), circuit_breaker),
                provider,
            })
            .collect();

        Ok(Self {
            providers,
            max_retries,
            rate_limiter: RateLimiter::new(rate_limit),
            backoff,
            cache: IdempotencyCache::new(),
        })
    }

    pub fn provider_names(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(|guarded| guarded.provider.name())
    }

    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Validate `message` and deliver it directly
    ///
    /// Bypasses the queue, the idempotency cache and the rate limiter.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::InvalidMessage`] without contacting any provider
    /// if validation fails, or [`DeliveryError::MaxRetriesExceeded`] once every
    /// round has failed.
    pub async fn send_immediately(
        &self,
        message: &Message,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        message.validate()?;
        self.send_with_retry(message, 0).await
    }

    /// Run provider rounds starting at round `attempt` until one succeeds or
    /// `max_retries` rounds have been used
    ///
    /// A failing provider that is not last in the list hands over to the next
    /// one within the same round. Only a fully failed round counts towards
    /// `max_retries`, and is followed by a backoff delay.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::MaxRetriesExceeded`] carrying the last provider
    /// failure once the rounds are used up.
    pub async fn send_with_retry(
        &self,
        message: &Message,
        attempt: u32,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        if self.providers.is_empty() {
            return Err(no_providers());
        }

        let mut attempt = attempt;
        let mut last_error = None;

        loop {
            if attempt >= self.max_retries {
                tracing::warn!(
                    message_id = %message.id(),
                    max_retries = self.max_retries,
                    "Giving up on message"
                );
                return Err(DeliveryError::MaxRetriesExceeded {
                    max_retries: self.max_retries,
                    last_error,
                });
            }

            match self.attempt_round(message, attempt).await {
                Ok(outcome) => return Ok(outcome),
                Err(DeliveryError::AllProvidersFailed(error)) => {
                    let delay = self.backoff.calculate(attempt);
                    tracing::debug!(
                        message_id = %message.id(),
                        attempt = attempt + 1,
                        ?delay,
                        "All providers failed, waiting before retry"
                    );
                    tokio::time::sleep(delay).await;

                    last_error = Some(error);
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// One pass over the providers in order
    async fn attempt_round(
        &self,
        message: &Message,
        attempt: u32,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let mut last_error: Option<ProviderError> = None;

        for guarded in &self.providers {
            let provider = guarded.provider.name();

            outgoing!(
                level = DEBUG,
                provider,
                message_id = %message.id(),
                attempt = attempt + 1,
                "Attempting delivery"
            );

            match guarded
                .breaker
                .execute(|| guarded.provider.send(message))
                .await
            {
                Ok(outcome) => {
                    tracing::info!(
                        provider,
                        message_id = %message.id(),
                        to = message.to(),
                        attempts = attempt + 1,
                        "Message sent successfully"
                    );
                    return Ok(outcome.with_attempts(attempt + 1));
                }
                Err(error) => {
                    tracing::warn!(
                        provider,
                        message_id = %message.id(),
                        attempt = attempt + 1,
                        error = %error,
                        "Delivery attempt failed"
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.map_or_else(no_providers, DeliveryError::AllProvidersFailed))
    }

    /// Produce the outcome for a dequeued message
    ///
    /// Never fails: any error, including a panicking provider, becomes a
    /// failed outcome attributed to [`ALL_PROVIDERS`]. The outcome is recorded
    /// against the message identity, and later calls for the same identity
    /// return it without contacting any provider.
    pub async fn process_item(&self, message: &Message, attempts: u32) -> DeliveryOutcome {
        let id = message.id();

        if let Some(existing) = self.cache.get(id) {
            tracing::debug!(
                message_id = %id,
                "Message already processed, returning recorded outcome"
            );
            return existing;
        }

        self.rate_limiter.wait_until_allowed(RATE_LIMIT_KEY).await;

        let result = AssertUnwindSafe(self.send_with_retry(message, attempts))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(DeliveryError::Internal(panic_message(&*panic))));

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => {
                let rounds = match &error {
                    DeliveryError::MaxRetriesExceeded { max_retries, .. } => *max_retries,
                    _ => attempts + 1,
                };

                tracing::error!(
                    message_id = %id,
                    attempts = rounds,
                    error = %error,
                    "Failed to deliver message"
                );

                DeliveryOutcome::failure(
                    ALL_PROVIDERS,
                    "All providers failed",
                    Some(error.to_string()),
                    rounds,
                )
            }
        };

        self.cache.record(id.clone(), outcome)
    }

    /// The recorded outcome for `id`, if the message has been processed
    pub fn get_status(&self, id: &MessageId) -> Option<DeliveryOutcome> {
        self.cache.get(id)
    }

    pub fn stats(&self) -> DeliveryStats {
        self.cache.stats(self.provider_names())
    }

    fn breaker(&self, provider: &str) -> Option<&CircuitBreaker> {
        self.providers
            .iter()
            .find(|guarded| guarded.provider.name() == provider)
            .map(|guarded| &guarded.breaker)
    }

    /// Circuit state of the named provider, or `None` for an unknown provider
    pub fn circuit_state(&self, provider: &str) -> Option<CircuitState> {
        self.breaker(provider).map(CircuitBreaker::state)
    }

    pub fn circuit_stats(&self, provider: &str) -> Option<CircuitBreakerStats> {
        self.breaker(provider).map(CircuitBreaker::stats)
    }

    pub fn rate_limit_stats(&self) -> Option<RateLimitStats> {
        self.rate_limiter.stats(RATE_LIMIT_KEY)
    }
}

#[async_trait]
impl EntryHandler for DeliveryPipeline {
    async fn process(
        &self,
        message: Message,
        attempts: u32,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        Ok(self.process_item(&message, attempts).await)
    }
}

fn no_providers() -> DeliveryError {
    DeliveryError::Configuration("At least one delivery provider is required".to_string())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "delivery panicked".to_string())
}
