//! Outcome cache keyed by message identity

use std::collections::BTreeMap;

use courier_common::{DeliveryOutcome, MessageId};
use dashmap::DashMap;
use serde::Serialize;

/// Records the final outcome of every message identity the processor has seen
///
/// An identity is recorded at most once; later writes for the same identity
/// leave the original outcome in place.
#[derive(Debug, Default)]
pub struct IdempotencyCache {
    outcomes: DashMap<MessageId, DeliveryOutcome>,
}

impl IdempotencyCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded outcome for `id`, if any
    pub fn get(&self, id: &MessageId) -> Option<DeliveryOutcome> {
        self.outcomes.get(id).map(|entry| entry.value().clone())
    }

    /// Record `outcome` for `id` unless one is already recorded
    ///
    /// Returns the outcome that is now stored for `id`.
    pub fn record(&self, id: MessageId, outcome: DeliveryOutcome) -> DeliveryOutcome {
        self.outcomes.entry(id).or_insert(outcome).value().clone()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Aggregate counts over every recorded outcome
    ///
    /// Per-provider counts cover exactly the names in `providers`, zero-filled.
    /// Synthesized failures are counted in `failure` but under no provider.
    pub fn stats<'a>(&self, providers: impl IntoIterator<Item = &'a str>) -> DeliveryStats {
        let mut per_provider: BTreeMap<String, usize> = providers
            .into_iter()
            .map(|name| (name.to_string(), 0))
            .collect();

        let mut stats = DeliveryStats::default();
        for entry in &self.outcomes {
            let outcome = entry.value();
            stats.total += 1;
            if outcome.success {
                stats.success += 1;
            } else {
                stats.failure += 1;
            }
            if let Some(count) = per_provider.get_mut(&outcome.provider) {
                *count += 1;
            }
        }

        stats.per_provider = per_provider;
        stats
    }
}

/// Aggregate delivery statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub total: usize,
    pub success: usize,
    pub failure: usize,
    /// Outcome count attributed to each configured provider
    pub per_provider: BTreeMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_first_outcome_wins() {
        let cache = IdempotencyCache::new();
        let id = MessageId::from("msg-1");

        let first = cache.record(id.clone(), DeliveryOutcome::success("primary", "sent"));
        let second = cache.record(
            id.clone(),
            DeliveryOutcome::failure("backup", "failed", None, 1),
        );

        assert_eq!(first, second);
        assert_eq!(cache.get(&id), Some(first));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_stats_are_zero_filled() {
        let cache = IdempotencyCache::new();
        cache.record(
            MessageId::from("a"),
            DeliveryOutcome::success("primary", "sent"),
        );
        cache.record(
            MessageId::from("b"),
            DeliveryOutcome::success("primary", "sent"),
        );
        cache.record(
            MessageId::from("c"),
            DeliveryOutcome::failure("All providers", "All providers failed", None, 3),
        );

        let stats = cache.stats(["primary", "backup"]);
        assert_eq!(
            stats,
            DeliveryStats {
                total: 3,
                success: 2,
                failure: 1,
                per_provider: BTreeMap::from([
                    ("backup".to_string(), 0),
                    ("primary".to_string(), 2),
                ]),
            }
        );
    }

    #[test]
    fn test_empty_stats() {
        let cache = IdempotencyCache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.stats(Vec::<&str>::new()).total, 0);
    }
}
