//! Logging setup.
//!
//! Every component logs through `tracing` with structured fields — stream
//! ids and nonces on the xDS side, snapshot versions from the cursor, object
//! references from the builder — so the subscriber is installed once at
//! startup and stays out of the way afterwards. The default filter keeps the
//! gRPC/HTTP internals (h2, hyper, tower) quieter than the crate itself;
//! `RUST_LOG` replaces the whole filter when set.

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ObservabilityConfig;
use crate::errors::{PylonError, Result};

static INSTALLED: OnceCell<()> = OnceCell::new();

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Install the global subscriber from configuration.
///
/// Later calls are no-ops, so subcommands and tests can share one entry
/// point without fighting over the global default.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_filter(&config.log_level, rust_log.as_deref())?;
    INSTALLED.get_or_try_init(|| install(filter, config.json_logging)).map(|_| ())
}

fn install(filter: EnvFilter, json: bool) -> Result<()> {
    let builder = fmt::Subscriber::builder().with_env_filter(filter).with_target(true);

    // Events carry their context as fields (stream = .., version = ..,
    // object = ..), so the human-readable format stays compact; JSON output
    // flattens those fields for log pipelines.
    let installed = if json {
        builder.json().flatten_event(true).with_current_span(false).try_init()
    } else {
        builder.compact().try_init()
    };

    installed.map_err(|e| PylonError::config(format!("cannot install tracing subscriber: {e}")))
}

/// Build the log filter.
///
/// The configured level governs the whole process, with the transport
/// dependencies capped so a debug-level control plane does not drown in
/// per-frame h2 chatter. A non-empty `RUST_LOG` wins outright.
fn build_filter(level: &str, rust_log: Option<&str>) -> Result<EnvFilter> {
    if let Some(custom) = rust_log {
        if !custom.is_empty() {
            return EnvFilter::try_new(custom)
                .map_err(|e| PylonError::config(format!("invalid RUST_LOG '{custom}': {e}")));
        }
    }

    let level = level.trim().to_ascii_lowercase();
    if !LEVELS.contains(&level.as_str()) {
        return Err(PylonError::validation(format!(
            "unknown log level '{level}', expected one of {}",
            LEVELS.join(", ")
        )));
    }

    let directives = format!("{level},h2=warn,hyper=warn,tower=warn");
    EnvFilter::try_new(directives)
        .map_err(|e| PylonError::config(format!("invalid log filter: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_level_is_accepted() {
        for level in LEVELS {
            assert!(build_filter(level, None).is_ok(), "level {level} should be accepted");
        }
        // Case and whitespace are forgiven.
        assert!(build_filter(" Info ", None).is_ok());
    }

    #[test]
    fn test_unknown_level_lists_the_choices() {
        let err = build_filter("noisy", None).unwrap_err();
        assert!(err.to_string().contains("trace, debug, info, warn, error"));
    }

    #[test]
    fn test_dependencies_are_capped_by_default() {
        let filter = build_filter("debug", None).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("h2=warn"), "got: {rendered}");
        assert!(rendered.contains("hyper=warn"), "got: {rendered}");
    }

    #[test]
    fn test_rust_log_replaces_the_filter() {
        let filter = build_filter("error", Some("pylon::dag=trace")).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("pylon::dag=trace"), "got: {rendered}");
        assert!(!rendered.contains("h2=warn"), "got: {rendered}");

        // An empty override falls back to the configured level.
        assert!(build_filter("info", Some("")).is_ok());
        // A malformed override is rejected rather than silently ignored.
        assert!(build_filter("info", Some("=][=")).is_err());
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = ObservabilityConfig::default();
        let _ = init_logging(&config);
        // A second install attempt must not panic or error the caller.
        let _ = init_logging(&config);
    }
}
