//! Logging initialization

/// Initialize the logging system
///
/// Uses env_logger with default filter level of `info`.
/// Override with RUST_LOG environment variable, e.g.
/// `RUST_LOG=terrae::quadtree=debug` to see split/merge decisions.
/// Panics if a logger is already installed.
///
/// # Example
/// ```
/// terrae::core::logging::init();
/// log::info!("Globe started");
/// ```
pub fn init() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).init();
}
