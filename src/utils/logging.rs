//! Logging initialization for ZeptoCord.
//!
//! Supports two formats:
//! - `pretty`: compact human-readable text with targets
//! - `json`: structured JSON lines for log aggregators
//!
//! Use the [`log_component!`] macro to tag events with a `component` field
//! (`gateway`, `turn`, `tools`, `store`, `autoplay`).

use crate::config::{LogFormat, LoggingConfig};

/// Initialize the global tracing subscriber from config.
///
/// Call this once at startup before any tracing events are emitted.
/// `RUST_LOG` takes precedence over `cfg.level`. A second call is a no-op.
pub fn init_logging(cfg: &LoggingConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));

    let result = match cfg.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .compact()
            .try_init(),
    };

    if let Err(e) = result {
        eprintln!("logging already initialized: {}", e);
    }
}

/// Emit a component-tagged tracing event.
///
/// ```
/// # use zeptocord::log_component;
/// log_component!(info, "gateway", "connected");
/// log_component!(warn, "turn", "lock lease expired", conversation = "123");
/// ```
#[macro_export]
macro_rules! log_component {
    ($level:ident, $component:expr, $msg:expr) => {
        tracing::$level!(component = $component, $msg)
    };
    ($level:ident, $component:expr, $msg:expr, $($key:ident = $val:expr),+ $(,)?) => {
        tracing::$level!(component = $component, $($key = $val,)+ $msg)
    };
}
