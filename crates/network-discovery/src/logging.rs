//! Tracing subscriber setup.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::StartupConfig;

/// Filter directive for a configured level name. Unknown names fall back to
/// `debug`.
pub fn level_directive(level: &str) -> &'static str {
    match level.to_ascii_uppercase().as_str() {
        "ERROR" => "error",
        "WARN" | "WARNING" => "warn",
        "INFO" => "info",
        _ => "debug",
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init(config: &StartupConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(&config.log_level)));

    let builder = fmt().with_env_filter(filter);
    if config.log_format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}
