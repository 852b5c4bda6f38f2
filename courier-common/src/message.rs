//! Outbound message model
//!
//! A [`Message`] is immutable once constructed apart from the builder-style
//! setters used before submission. Its [`MessageId`] is the idempotency key:
//! two submissions carrying the same identity resolve to the same outcome.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{ValidationError, unix_millis};

/// Sender used when the caller does not supply one
pub const DEFAULT_SENDER: &str = "no-reply@example.com";

/// Identity of a message
///
/// Caller-supplied identities are kept verbatim; generated ones are ULIDs,
/// so they sort by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Arc<str>);

impl MessageId {
    /// Generate a new unique identity
    #[must_use]
    pub fn generate() -> Self {
        Self(Arc::from(ulid::Ulid::new().to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

/// A message to be handed to one of the delivery providers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    to: String,
    subject: String,
    body: String,
    from: String,
    id: MessageId,
    /// Unix timestamp (milliseconds) when the message was created
    created_at: u64,
}

impl Message {
    /// Create a message with the default sender and a generated identity
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            from: DEFAULT_SENDER.to_string(),
            id: MessageId::generate(),
            created_at: unix_millis(),
        }
    }

    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    /// Replace the generated identity with a caller-supplied one
    #[must_use]
    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn sender(&self) -> &str {
        &self.from
    }

    pub const fn id(&self) -> &MessageId {
        &self.id
    }

    pub const fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Check the message is eligible for delivery
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingField`] naming the first of `to`,
    /// `subject` or `body` that is empty.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.to.is_empty() {
            Err(ValidationError::MissingField("to"))
        } else if self.subject.is_empty() {
            Err(ValidationError::MissingField("subject"))
        } else if self.body.is_empty() {
            Err(ValidationError::MissingField("body"))
        } else {
            Ok(())
        }
    }
}

/// A send request as accepted at the service boundary
///
/// ```ron
/// (
///     to: "someone@example.com",
///     subject: "Hello",
///     body: "Hi there",
///     id: Some("order-1234"),
/// )
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl From<SendRequest> for Message {
    fn from(request: SendRequest) -> Self {
        let mut message = Self::new(request.to, request.subject, request.body);
        if let Some(from) = request.from {
            message = message.with_from(from);
        }
        if let Some(id) = request.id {
            message = message.with_id(id);
        }
        message
    }
}
