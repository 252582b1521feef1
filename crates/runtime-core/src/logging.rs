//! Tracing subscriber setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directives when `RUST_LOG` is unset
pub const DEFAULT_DIRECTIVES: &str = "checkpoint=info,collective=info,storage=info,data_shard=info";

fn env_filter(default_directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directives.into())
}

/// Install the global fmt subscriber. Panics if one is already set.
pub fn init(default_directives: &str) {
    tracing_subscriber::registry()
        .with(env_filter(default_directives))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Like [`init`] but tolerates an existing subscriber (tests, embedding).
/// Returns true if this call installed it.
pub fn try_init(default_directives: &str) -> bool {
    tracing_subscriber::registry()
        .with(env_filter(default_directives))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init()
        .is_ok()
}
