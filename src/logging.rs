//! tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Variable holding a filter directive, e.g. `HOSTFORGE_LOG=hostforge=debug`.
pub const LOG_ENV: &str = "HOSTFORGE_LOG";

/// Log to stderr. `-v` and `-vv` override the environment filter.
pub fn init(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    // a second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose > 1)
        .try_init();
}
