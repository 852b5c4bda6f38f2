//! Typed error handling for delivery operations.
//!
//! This module distinguishes between:
//! - Provider failures - recovered locally by falling back or retrying
//! - Validation failures - surfaced to the caller, never retried
//! - Exhaustion and system errors - surfaced or converted into a failed outcome

use courier_common::ValidationError;
use thiserror::Error;

/// Failure of a single provider call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The provider attempted delivery and failed.
    #[error("{provider} failed to send message: {reason}")]
    Failed { provider: String, reason: String },

    /// The provider's circuit breaker rejected the call without contacting it.
    #[error("Circuit breaker is open for {provider}")]
    CircuitOpen { provider: String },
}

impl ProviderError {
    pub fn failed(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Name of the provider the failure belongs to.
    pub fn provider(&self) -> &str {
        match self {
            Self::Failed { provider, .. } | Self::CircuitOpen { provider } => provider.as_str(),
        }
    }

    /// Returns `true` if the call was rejected by an open circuit.
    #[must_use]
    pub const fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

/// Top-level delivery error type.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The message failed validation and was never attempted.
    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] ValidationError),

    /// Every retry round failed.
    #[error("Max retries ({max_retries}) exceeded")]
    MaxRetriesExceeded {
        max_retries: u32,
        #[source]
        last_error: Option<ProviderError>,
    },

    /// One full round through the providers failed; the last failure is attached.
    #[error("All providers failed: {0}")]
    AllProvidersFailed(#[source] ProviderError),

    /// Invalid configuration, such as an empty provider list.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The delivery processor was used before `init()`.
    #[error("Delivery processor not initialized: {0}")]
    NotInitialized(String),

    /// The entry was discarded by a queue clear before it was processed.
    #[error("Message was removed from the queue before processing")]
    QueueCleared,

    /// The queue worker has stopped.
    #[error("Delivery queue is closed")]
    QueueClosed,

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Returns `true` if the message was rejected before any delivery attempt.
    #[must_use]
    pub const fn is_invalid(&self) -> bool {
        matches!(self, Self::InvalidMessage(_))
    }

    /// Returns `true` if delivery gave up after running out of retries.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        matches!(
            self,
            Self::MaxRetriesExceeded { .. } | Self::AllProvidersFailed(_)
        )
    }

    /// Returns `true` if the message never reached the delivery pipeline.
    #[must_use]
    pub const fn is_queue_error(&self) -> bool {
        matches!(self, Self::QueueCleared | Self::QueueClosed)
    }
}
