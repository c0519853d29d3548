//! tracing-subscriber setup for the binaries

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `default_directive`.
pub fn init(default_directive: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
