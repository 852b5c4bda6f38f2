pub mod error;
pub mod logging;
pub mod message;
pub mod outcome;

pub use error::ValidationError;
pub use message::{DEFAULT_SENDER, Message, MessageId, SendRequest};
pub use outcome::DeliveryOutcome;
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}

/// Milliseconds since the Unix epoch, saturating to zero for clocks set before 1970
pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}
