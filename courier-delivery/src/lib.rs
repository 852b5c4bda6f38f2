//! Delivery pipeline for outbound messages
//!
//! This crate provides:
//! - A serialized delivery queue with pause, resume and clear
//! - Ordered provider fallback with per-provider circuit breakers
//! - Exponential backoff between failed provider rounds
//! - Fixed-window rate limiting of delivery attempts
//! - An idempotency cache keyed by message identity

mod backoff;
mod circuit_breaker;
mod error;
mod idempotency;
mod pipeline;
mod processor;
mod provider;
mod queue;
mod rate_limiter;
mod service;

pub use backoff::ExponentialBackoff;
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
    ProviderCircuitBreakerConfig,
};
pub use error::{DeliveryError, ProviderError};
pub use idempotency::{DeliveryStats, IdempotencyCache};
pub use pipeline::{ALL_PROVIDERS, DeliveryPipeline, RATE_LIMIT_KEY};
pub use processor::DeliveryProcessor;
pub use provider::{MockProvider, MockProviderConfig, Provider};
pub use queue::{DeliveryQueue, EntryHandler, PendingDelivery};
pub use rate_limiter::{RateLimitConfig, RateLimitStats, RateLimiter};
pub use service::DeliveryQueryService;
