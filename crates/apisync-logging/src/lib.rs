//! # apisync-logging
//!
//! Installs the global `tracing` subscriber.
//!
//! `RUST_LOG` takes precedence over the configured level. Output goes to
//! stderr, either as compact human-readable lines or as one JSON object per
//! event (with the span list, for log shippers).

#![deny(unsafe_code)]

use apisync_settings::{LogFormat, LoggingSettings};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Build the filter: `RUST_LOG` if set and valid, otherwise `level`.
///
/// An invalid `level` directive falls back to `info`.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global tracing subscriber.
///
/// Call once at application startup. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str, format: LogFormat) {
    let filter = build_filter(level);
    match format {
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .compact();
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init();
        }
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_span_list(true)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init();
        }
    }
}

/// Initialize from the `logging` section of the settings document.
pub fn init_from_settings(settings: &LoggingSettings) {
    init_subscriber(&settings.level, settings.format);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_accepts_directives() {
        let filter = build_filter("apisync_server=debug,warn");
        assert!(!filter.to_string().is_empty());
    }

    #[test]
    fn garbage_level_still_builds_a_filter() {
        let _filter = build_filter("=[not a directive");
    }

    #[test]
    fn repeated_init_is_a_noop() {
        init_subscriber("warn", LogFormat::Pretty);
        init_subscriber("debug", LogFormat::Json);
        init_from_settings(&LoggingSettings::default());
    }
}
