//! Logging bootstrap.
//!
//! The crate emits events through the `tracing` macros: `debug` for opening,
//! closing, preparing and executing, `trace` for steps and bindings, `warn`
//! for failures that cannot be returned (teardown on drop, panicking
//! collations). Nothing is printed unless a subscriber is installed.
//!
//! With the `tracing-subscriber` feature, [`init`] installs one from the
//! environment:
//!
//! - `LITE3_DEBUG=true|1|yes` - enable debug logging
//! - `LITE3_LOG_LEVEL=trace|debug|info|warn|error` - set the level
//! - `LITE3_LOG_FORMAT=json|pretty|compact` - set the output format (default: json)
//!
//! ```rust,no_run
//! lite3_core::logging::init();
//! ```

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

const DEBUG_VAR: &str = "LITE3_DEBUG";
const LEVEL_VAR: &str = "LITE3_LOG_LEVEL";
const FORMAT_VAR: &str = "LITE3_LOG_FORMAT";

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Multi-line, human-readable.
    Pretty,
    /// Single-line, human-readable.
    Compact,
}

impl LogFormat {
    fn parse(value: Option<&str>) -> Self {
        match value.map(str::to_lowercase).as_deref() {
            Some("pretty") => Self::Pretty,
            Some("compact") => Self::Compact,
            _ => Self::Json,
        }
    }
}

fn parse_debug(value: Option<&str>) -> bool {
    value.is_some_and(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

fn parse_level(level: Option<&str>, debug: bool) -> &'static str {
    match level.map(str::to_lowercase).as_deref() {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("info") => "info",
        Some("warn") => "warn",
        Some("error") => "error",
        _ if debug => "debug",
        _ => "warn",
    }
}

/// Check if `LITE3_DEBUG` enables debug logging.
pub fn is_debug_enabled() -> bool {
    parse_debug(env::var(DEBUG_VAR).ok().as_deref())
}

/// Level from `LITE3_LOG_LEVEL`; "debug" when `LITE3_DEBUG` is set,
/// otherwise "warn".
pub fn log_level() -> &'static str {
    parse_level(env::var(LEVEL_VAR).ok().as_deref(), is_debug_enabled())
}

/// Format from `LITE3_LOG_FORMAT`.
pub fn log_format() -> LogFormat {
    LogFormat::parse(env::var(FORMAT_VAR).ok().as_deref())
}

/// Install a subscriber configured from the environment.
///
/// Does nothing unless `LITE3_DEBUG` or `LITE3_LOG_LEVEL` is set. Only the
/// first call has an effect.
pub fn init() {
    if is_debug_enabled() || env::var(LEVEL_VAR).is_ok() {
        install(log_level(), log_format());
    }
}

/// Install a subscriber at `level`, ignoring `LITE3_DEBUG` and
/// `LITE3_LOG_LEVEL`.
pub fn init_with_level(level: &str) {
    install(parse_level(Some(level), false), log_format());
}

/// Install a debug-level subscriber.
pub fn init_debug() {
    install("debug", log_format());
}

fn install(level: &'static str, format: LogFormat) {
    INIT.call_once(|| {
        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let filter = EnvFilter::try_new(format!("lite3={},lite3_core={}", level, level))
                .unwrap_or_else(|_| EnvFilter::new("warn"));
            let registry = tracing_subscriber::registry().with(filter);
            let installed = match format {
                LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
                LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
                LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
            };
            if installed.is_ok() {
                tracing::info!(level = level, format = ?format, "lite3 logging initialized");
            }
        }

        #[cfg(not(feature = "tracing-subscriber"))]
        {
            let _ = (level, format);
        }
    });
}
