pub mod app;
pub mod auth;
pub mod config;
pub mod conversations;
pub mod db;
pub mod error;
pub mod mail;
pub mod profile;
pub mod state;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

/// Installs the global `tracing` subscriber (`RUST_LOG`, `LOG_FORMAT=json`).
pub fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "lawpal=debug,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}
