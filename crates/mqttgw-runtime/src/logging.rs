//! tracing-subscriber setup.

/// Environment variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "MQTTGW_LOG";

/// Filter directive: `MQTTGW_LOG`, then `RUST_LOG`, then the config's debug
/// toggle.
pub fn filter_directive(gateway_log: Option<String>, rust_log: Option<String>, debug: bool) -> String {
    gateway_log
        .filter(|v| !v.trim().is_empty())
        .or_else(|| rust_log.filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| if debug { "debug" } else { "info" }.to_string())
}

/// Install the global fmt subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init(debug: bool) {
    let filter = filter_directive(
        std::env::var(LOG_ENV).ok(),
        std::env::var("RUST_LOG").ok(),
        debug,
    );
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .try_init();
}
