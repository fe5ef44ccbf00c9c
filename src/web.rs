#![cfg(not(tarpaulin_include))]

use leadform::{app, config::Config};
use tracing_subscriber::{EnvFilter, fmt};

/// Main entry point for the form intake service
///
/// Reads its configuration from the environment (see [`Config`]) and serves
/// the quote and application endpoints until interrupted.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load()?;
    app::run(config).await
}
