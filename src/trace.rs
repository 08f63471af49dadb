use tracing_subscriber::EnvFilter;

/// Initializes the global subscriber. `MOBYSTASH_LOG` takes precedence over
/// the CLI-derived default level, same shape as `RUST_LOG`.
pub fn init(level: &str) {
    let filter = match std::env::var("MOBYSTASH_LOG") {
        Ok(directives) => EnvFilter::new(directives),
        Err(_) => EnvFilter::new(format!("mobystash={}", level)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
