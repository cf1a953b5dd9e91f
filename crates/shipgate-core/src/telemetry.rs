//! Tracing initialisation for shipgate binaries.
//!
//! Call [`init_tracing`] once at program start. Filter directives are
//! taken from `SHIPGATE_LOG` first, then `RUST_LOG`; when neither is set
//! the shipgate crates log at the requested level and everything else is
//! capped at `warn`.
//!
//! Safe to call more than once — subsequent calls are silently ignored
//! (the global subscriber can only be set once per process).

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable consulted for filter directives before the
/// standard `RUST_LOG`.
pub const LOG_ENV_VAR: &str = "SHIPGATE_LOG";

fn default_directives(level: Level) -> String {
    let level = level.as_str().to_lowercase();
    format!("warn,shipgate={level},shipgate_core={level}")
}

/// Initialise the global tracing subscriber.
///
/// * `json` — when `true`, emit newline-delimited JSON log lines
///   (useful for log aggregation pipelines).
/// * `level` — verbosity for the shipgate crates when neither
///   `SHIPGATE_LOG` nor `RUST_LOG` is set; dependencies stay at `warn`.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}
