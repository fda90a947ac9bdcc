//! Logging setup.
//!
//! The crate logs through `tracing`. With the `tracing-subscriber` feature,
//! [`init`] installs a subscriber controlled by environment variables:
//!
//! - `MONGO_CONTEXT_DEBUG=true|1|yes` enables debug logging
//! - `MONGO_CONTEXT_LOG_LEVEL=trace|debug|info|warn|error` sets the level
//! - `MONGO_CONTEXT_LOG_FORMAT=json|pretty|compact` sets the format (default: json)
//!
//! ```rust,no_run
//! mongo_context_core::logging::init();
//! ```

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

const DEBUG_VAR: &str = "MONGO_CONTEXT_DEBUG";
const LEVEL_VAR: &str = "MONGO_CONTEXT_LOG_LEVEL";
const FORMAT_VAR: &str = "MONGO_CONTEXT_LOG_FORMAT";

/// Check if `MONGO_CONTEXT_DEBUG` is set to "true", "1" or "yes".
#[inline]
pub fn is_debug_enabled() -> bool {
    env::var(DEBUG_VAR)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// Configured log level. Defaults to "debug" when debugging is enabled,
/// otherwise "warn".
pub fn log_level() -> &'static str {
    let fallback = if is_debug_enabled() { "debug" } else { "warn" };
    match env::var(LEVEL_VAR) {
        Ok(level) => match level.to_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" => "warn",
            "error" => "error",
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

/// Configured log format.
pub fn log_format() -> &'static str {
    env::var(FORMAT_VAR)
        .map(|f| match f.to_lowercase().as_str() {
            "pretty" => "pretty",
            "compact" => "compact",
            _ => "json",
        })
        .unwrap_or("json")
}

/// Install the subscriber once. Does nothing unless debugging or a level is
/// requested, or when the `tracing-subscriber` feature is off.
pub fn init() {
    INIT.call_once(|| {
        if !is_debug_enabled() && env::var(LEVEL_VAR).is_err() {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = log_level();
            let filter = EnvFilter::try_new(format!(
                "mongo_context={},mongo_context_core={}",
                level, level
            ))
            .unwrap_or_else(|_| EnvFilter::new("warn"));

            let installed = match log_format() {
                "json" => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json())
                    .try_init(),
                "compact" => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().compact())
                    .try_init(),
                _ => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().pretty())
                    .try_init(),
            };

            if installed.is_ok() {
                tracing::info!(level, format = log_format(), "Logging initialized");
            }
        }
    });
}
