pub mod api;
pub mod cli;
pub mod conditions;
pub mod config;
pub mod engine;
pub mod errors;
pub mod facts;
pub mod graph;
pub mod models;
pub mod notify;
pub mod scheduler;
pub mod store;
pub mod triggers;

/// Version string with the build date, plus the git hash when one was available.
pub fn version() -> String {
    let built = env!("BUILD_TIMESTAMP");
    match option_env!("GIT_HASH") {
        Some(hash) => format!("{} ({}, built {})", env!("CARGO_PKG_VERSION"), hash, built),
        None => format!("{} (built {})", env!("CARGO_PKG_VERSION"), built),
    }
}
