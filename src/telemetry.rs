//! Logging setup.
//!
//! Filter directives come from `GT_LOG`, then `RUST_LOG`, defaulting to
//! `warn`. Output goes to stderr so stdout stays clean for reports and JSON.
//! `GT_LOG_FORMAT=json` switches to one JSON object per line.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "GT_LOG";
pub const LOG_FORMAT_ENV: &str = "GT_LOG_FORMAT";

const DEFAULT_FILTER: &str = "warn";

fn filter() -> EnvFilter {
    let directives = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var(EnvFilter::DEFAULT_ENV))
        .unwrap_or_default();
    if directives.trim().is_empty() {
        return EnvFilter::new(DEFAULT_FILTER);
    }
    EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn json_requested() -> bool {
    std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"))
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are no-ops.
pub fn init() {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = if json_requested() {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
