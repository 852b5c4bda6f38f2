use serde::{Deserialize, Serialize};

use crate::unix_millis;

/// Final result of delivering one message
///
/// Produced once per message identity and never changed after it has been
/// recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    /// Name of the provider the outcome is attributed to
    pub provider: String,
    pub success: bool,
    /// Human-readable summary
    pub message: String,
    /// Error detail for failed deliveries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of provider rounds it took to reach this outcome
    pub attempts: u32,
    /// Unix timestamp (milliseconds) when the outcome was produced
    pub completed_at: u64,
}

impl DeliveryOutcome {
    /// A successful delivery through `provider`
    pub fn success(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            success: true,
            message: message.into(),
            error: None,
            attempts: 1,
            completed_at: unix_millis(),
        }
    }

    pub fn failure(
        provider: impl Into<String>,
        message: impl Into<String>,
        error: Option<String>,
        attempts: u32,
    ) -> Self {
        Self {
            provider: provider.into(),
            success: false,
            message: message.into(),
            error,
            attempts,
            completed_at: unix_millis(),
        }
    }

    #[must_use]
    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}
