//! Error types shared by every courier crate.

use thiserror::Error;

/// Reasons a message is not eligible for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required message field is absent or empty.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}
