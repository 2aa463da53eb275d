mod auth;
mod config;
mod db;
mod error;
mod exif;
mod normalize;
#[cfg(test)]
mod testutil;
mod web_server;

use crate::config::AppConfig;
use crate::db::Store;
use anyhow::Result;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::new()?;

    // Initialize env_logger based on config.log_level
    env_logger::Builder::new()
        .filter_level(config.log_level.parse().unwrap_or(log::LevelFilter::Info))
        .init();

    info!("Starting photometa");

    std::fs::create_dir_all(&config.upload_directory)?;

    let store = Store::connect(&config.database_url).await?;

    if let Err(e) = web_server::start_web_server(config, store).await {
        log::error!("Web server error: {}", e);
    }

    info!("photometa finished");

    Ok(())
}
