//! Tracing setup for the `safegate` binary.
//!
//! Filter precedence: `SAFEGATE_LOG`, then `RUST_LOG`, then the level passed
//! by the caller. The audit mirror target stays at `info` under the default
//! filter so every recorded decision also reaches the log stream.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Gateway-specific filter variable, checked before `RUST_LOG`.
pub const LOG_ENV_VAR: &str = "SAFEGATE_LOG";

/// Target used for the per-record audit mirror events.
pub const AUDIT_TARGET: &str = "safegate::audit";

/// Filter directive used when no environment variable is set.
pub fn default_directive(level: Level) -> String {
    format!("{},{AUDIT_TARGET}=info", level.as_str().to_lowercase())
}

fn build_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)))
}

/// Install the global subscriber. Output goes to stderr so stdout stays
/// machine-readable. Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let output = fmt::layer().with_writer(std::io::stderr);
    let output: Box<dyn Layer<Registry> + Send + Sync> = if json {
        output.json().boxed()
    } else {
        output.compact().boxed()
    };

    tracing_subscriber::registry()
        .with(output)
        .with(build_filter(level))
        .try_init()
        .ok();
}
