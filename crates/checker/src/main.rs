//! Entry point of the slot checker.
//! Polls the booking site for the configured theme and announces new openings.

use anyhow::Context;
use booking_scan::MonitorConfig;

mod scan_manager;
use scan_manager::ScanManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    log::info!("🚀 Starting booking slot checker...");

    let config = MonitorConfig::from_env().context("Invalid configuration")?;
    log::info!(
        "🎯 Watching '{}' from {} to {} every {} min",
        config.theme_name,
        config.date_start,
        config.date_end,
        config.check_interval.as_secs() / 60
    );
    if !config.excluded_slots.is_empty() {
        log::info!("🚫 {} slots excluded", config.excluded_slots.len());
    }

    let mut scan_manager = ScanManager::new(config);
    scan_manager
        .start()
        .context("Failed to start scan execution")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    log::info!("🛑 Shutdown requested");
    scan_manager.stop().await;

    Ok(())
}
