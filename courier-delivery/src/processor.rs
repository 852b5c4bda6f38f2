use std::sync::Arc;

use courier_common::{
    DeliveryOutcome, Message, MessageId, SendRequest, Signal, incoming, internal,
};
use serde::Deserialize;

use crate::{
    backoff::ExponentialBackoff,
    circuit_breaker::{CircuitBreakerConfig, CircuitState},
    error::DeliveryError,
    idempotency::DeliveryStats,
    pipeline::DeliveryPipeline,
    provider::Provider,
    queue::{DeliveryQueue, PendingDelivery},
    rate_limiter::RateLimitConfig,
};

/// Configured front door of the delivery pipeline
///
/// Deserialized from configuration, then [`init`](Self::init)ialised with the
/// providers to use and [`serve`](Self::serve)d until shutdown.
#[derive(Debug, Deserialize)]
pub struct DeliveryProcessor {
    /// Provider rounds attempted per message before giving up
    ///
    /// Default: 3
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Throttling of outbound delivery attempts
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Delay between failed provider rounds
    #[serde(default)]
    pub backoff: ExponentialBackoff,

    /// Isolation of failing providers
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(skip)]
    queue: DeliveryQueue,

    /// Built from the configuration in `init()`
    #[serde(skip)]
    pipeline: Option<Arc<DeliveryPipeline>>,
}

const fn default_max_retries() -> u32 {
    3
}

impl Default for DeliveryProcessor {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            rate_limit: RateLimitConfig::default(),
            backoff: ExponentialBackoff::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            queue: DeliveryQueue::new(),
            pipeline: None,
        }
    }
}

impl DeliveryProcessor {
    /// Initialise the processor with the providers to deliver through, in
    /// order of preference
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Configuration`] if `providers` is empty.
    pub fn init(&mut self, providers: Vec<Arc<dyn Provider>>) -> Result<(), DeliveryError> {
        internal!("Initialising Delivery Processor ...");

        let pipeline = DeliveryPipeline::new(
            providers,
            self.max_retries,
            self.rate_limit.clone(),
            self.backoff.clone(),
            &self.circuit_breaker,
        )?;

        internal!(
            level = INFO,
            providers = ?pipeline.provider_names().collect::<Vec<_>>(),
            max_retries = self.max_retries,
            max_requests = self.rate_limit.max_requests,
            window_ms = self.rate_limit.window_ms,
            "Delivery processor initialised"
        );

        self.pipeline = Some(Arc::new(pipeline));
        Ok(())
    }

    fn pipeline(&self) -> Result<&Arc<DeliveryPipeline>, DeliveryError> {
        self.pipeline
            .as_ref()
            .ok_or_else(|| DeliveryError::NotInitialized("call init() first".to_string()))
    }

    /// Process queued messages until a shutdown signal is received
    ///
    /// The message being processed when the signal arrives is finished; any
    /// still waiting resolve with [`DeliveryError::QueueClosed`].
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::NotInitialized`] if `init()` was not called.
    pub async fn serve(
        &self,
        shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), DeliveryError> {
        let pipeline = Arc::clone(self.pipeline()?);

        internal!(level = INFO, "Delivery processor starting");
        self.queue.run(pipeline, shutdown).await;
        internal!(level = INFO, "Delivery processor shutdown complete");

        Ok(())
    }

    /// Validate `message` and queue it for delivery
    ///
    /// Invalid messages are rejected straight away with
    /// [`DeliveryError::InvalidMessage`] and never reach the rate limiter or
    /// any provider.
    pub fn enqueue(&self, message: Message) -> PendingDelivery {
        if let Err(error) = self.pipeline() {
            return PendingDelivery::resolved(Err(error));
        }

        if let Err(error) = message.validate() {
            incoming!(
                level = WARN,
                message_id = %message.id(),
                error = %error,
                "Rejected invalid message"
            );
            return PendingDelivery::resolved(Err(error.into()));
        }

        incoming!(
            level = DEBUG,
            message_id = %message.id(),
            to = message.to(),
            "Message accepted for delivery"
        );
        self.queue.enqueue(message)
    }

    /// Queue a request handed in by a caller
    pub fn submit(&self, request: SendRequest) -> PendingDelivery {
        self.enqueue(Message::from(request))
    }

    /// Deliver `message` straight away, bypassing the queue, the idempotency
    /// cache and the rate limiter
    ///
    /// # Errors
    ///
    /// Fails with [`DeliveryError::InvalidMessage`] for invalid messages and
    /// [`DeliveryError::MaxRetriesExceeded`] when every round failed.
    pub async fn send_immediately(
        &self,
        message: &Message,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        self.pipeline()?.send_immediately(message).await
    }

    pub fn get_status(&self, id: &MessageId) -> Option<DeliveryOutcome> {
        self.pipeline
            .as_ref()
            .and_then(|pipeline| pipeline.get_status(id))
    }

    pub fn get_stats(&self) -> DeliveryStats {
        self.pipeline
            .as_ref()
            .map(|pipeline| pipeline.stats())
            .unwrap_or_default()
    }

    pub fn circuit_state(&self, provider: &str) -> Option<CircuitState> {
        self.pipeline
            .as_ref()
            .and_then(|pipeline| pipeline.circuit_state(provider))
    }

    pub fn pause(&self) {
        self.queue.pause();
    }

    pub fn resume(&self) {
        self.queue.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.queue.is_paused()
    }

    /// Number of messages waiting in the queue
    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    /// Drop every waiting message, returning how many were dropped
    pub fn clear(&self) -> usize {
        self.queue.clear()
    }
}
