//! Delivery providers
//!
//! The pipeline only ever talks to providers through [`Provider`]; which
//! implementations are used, and in which order, is decided by configuration.

use std::fmt::Debug;

use async_trait::async_trait;
use courier_common::{DeliveryOutcome, Message};

use crate::error::ProviderError;

mod mock;

pub use mock::{MockProvider, MockProviderConfig};

/// An external service capable of delivering a message
#[async_trait]
pub trait Provider: Send + Sync + Debug {
    /// Stable name used for logging, statistics and circuit breaker overrides
    fn name(&self) -> &str;

    /// Attempt to deliver `message`
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the provider could not deliver the message.
    async fn send(&self, message: &Message) -> Result<DeliveryOutcome, ProviderError>;
}
