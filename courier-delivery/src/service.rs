//! Read-only view of the delivery processor
//!
//! Request handling layers depend on this trait rather than on
//! [`DeliveryProcessor`] directly, so they can be exercised against a stub.

use courier_common::{DeliveryOutcome, MessageId};

use crate::{DeliveryProcessor, DeliveryStats, circuit_breaker::CircuitState};

/// Queries a request handler needs to answer status and statistics requests
///
/// # Example
///
/// ```rust,ignore
/// fn handle_status(service: &dyn DeliveryQueryService, id: &MessageId) -> bool {
///     service.get_status(id).is_some_and(|outcome| outcome.success)
/// }
/// ```
pub trait DeliveryQueryService: Send + Sync {
    /// Number of messages waiting to be processed
    fn queue_len(&self) -> usize;

    /// Recorded outcome of a message, or `None` if it has not been processed
    fn get_status(&self, id: &MessageId) -> Option<DeliveryOutcome>;

    fn get_stats(&self) -> DeliveryStats;

    /// Circuit state of the named provider, or `None` if it is not configured
    fn circuit_state(&self, provider: &str) -> Option<CircuitState>;

    fn is_paused(&self) -> bool;
}

impl DeliveryQueryService for DeliveryProcessor {
    fn queue_len(&self) -> usize {
        self.queue_size()
    }

    fn get_status(&self, id: &MessageId) -> Option<DeliveryOutcome> {
        Self::get_status(self, id)
    }

    fn get_stats(&self) -> DeliveryStats {
        Self::get_stats(self)
    }

    fn circuit_state(&self, provider: &str) -> Option<CircuitState> {
        Self::circuit_state(self, provider)
    }

    fn is_paused(&self) -> bool {
        Self::is_paused(self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{MockProvider, Provider};

    fn queue_summary(service: &dyn DeliveryQueryService) -> (usize, bool, usize) {
        (service.queue_len(), service.is_paused(), service.get_stats().total)
    }

    #[test]
    fn test_processor_as_query_service() {
        let mut processor = DeliveryProcessor::default();
        let providers: Vec<Arc<dyn Provider>> =
            vec![Arc::new(MockProvider::new("primary", 1.0, 0))];
        processor.init(providers).unwrap();
        processor.pause();

        assert_eq!(queue_summary(&processor), (0, true, 0));

        let service: &dyn DeliveryQueryService = &processor;
        assert!(service.get_status(&MessageId::from("missing")).is_none());
        assert_eq!(service.circuit_state("primary"), Some(CircuitState::Closed));
        assert_eq!(service.circuit_state("unknown"), None);
    }
}
