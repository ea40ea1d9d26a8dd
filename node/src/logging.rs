//! # Structured Logging
//!
//! `tracing` subscriber setup for the fund node: an `EnvFilter` sourced from
//! `RUST_LOG` (falling back to the caller's default directives) feeding
//! either a human-readable or a JSON formatting layer. Everything is written
//! to stderr so stdout stays clean for anything an operator pipes out of the
//! binary.

use std::io;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable output for local operation.
    Pretty,
    /// JSON lines for log aggregation.
    Json,
}

impl LogFormat {
    /// Parses a format name. Anything other than "json" is `Pretty` — a
    /// typo in an env var should not keep the node from starting.
    pub fn from_str_lossy(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Installs the global subscriber. Call once, before the first event;
/// a second call panics.
///
/// `RUST_LOG` overrides `default_directives` when set; directives follow
/// the usual `EnvFilter` syntax, e.g.
/// `coffer_node=debug,coffer_ledger=info,tower_http=debug`.
pub fn init_logging(default_directives: &str, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let base = fmt::layer().with_target(true).with_writer(io::stderr);
    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(base.with_file(true).with_line_number(true))
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(base.json())
                .init();
        }
    }

    tracing::info!(?format, "logging initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parsing_is_lossy() {
        assert_eq!(LogFormat::from_str_lossy("json"), LogFormat::Json);
        assert_eq!(LogFormat::from_str_lossy("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_str_lossy("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str_lossy("garbage"), LogFormat::Pretty);
    }
}
