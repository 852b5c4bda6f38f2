use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:tt)*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg)*)
    }};
}

/// Log a submission arriving from a caller
#[macro_export]
macro_rules! incoming {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "incoming", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::incoming!(level = TRACE, $($msg)*)
    };
}

/// Log contact with a delivery provider
#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::outgoing!(level = TRACE, $($msg)*)
    };
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:tt)*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg)*)
    };

    ($($msg:tt)*) => {
        $crate::internal!(level = TRACE, $($msg)*)
    };
}

/// Resolve the log level from an optional `LOG_LEVEL` value
fn level_from(value: Option<&str>, default: LevelFilter) -> LevelFilter {
    value.map_or(default, |level| {
        LevelFilter::from_str(level).unwrap_or_else(|_| {
            eprintln!("Invalid log level specified {level}, defaulting to {default}");
            default
        })
    })
}

pub fn init() {
    let default = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    let level = level_from(std::env::var("LOG_LEVEL").ok().as_deref(), default);

    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_ansi(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level)
                .with_filter(FilterFn::new(|metadata| {
                    metadata.target().starts_with("courier")
                })),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parsing() {
        assert_eq!(level_from(None, LevelFilter::INFO), LevelFilter::INFO);
        assert_eq!(level_from(Some("debug"), LevelFilter::INFO), LevelFilter::DEBUG);
        assert_eq!(level_from(Some("WARN"), LevelFilter::INFO), LevelFilter::WARN);
        assert_eq!(
            level_from(Some("loud"), LevelFilter::ERROR),
            LevelFilter::ERROR
        );
    }

    #[test]
    fn macros_expand_without_subscriber() {
        crate::internal!("lifecycle event {}", 1);
        crate::incoming!(level = DEBUG, message_id = "abc", "submission");
        crate::outgoing!(level = INFO, provider = "primary", "provider contact");
    }
}
