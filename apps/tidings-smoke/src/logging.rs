//! Tracing bootstrap for the smoke binary.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVES: &str = "info,tidings_gateway=debug,tidings_core=debug";

/// Install the global subscriber; directives come from `RUST_LOG`, then
/// `TIDINGS_LOG`, then [`DEFAULT_DIRECTIVES`].
pub fn init() {
    let directives = directives_from(|key| env::var(key).ok());
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|err| {
        eprintln!("ignoring invalid log filter '{directives}': {err}");
        EnvFilter::new(DEFAULT_DIRECTIVES)
    });

    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_names(true)
        .with_env_filter(filter)
        .try_init();
}

fn directives_from(lookup: impl Fn(&str) -> Option<String>) -> String {
    ["RUST_LOG", "TIDINGS_LOG"]
        .into_iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_owned())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_DIRECTIVES.to_owned())
}
