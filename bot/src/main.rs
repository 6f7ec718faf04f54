mod scheduler;

use anyhow::Result;
use scheduler::{sell_pass, Scheduler};
use steam::{Config, Exchange};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<()> {
    common::setup_env();

    let config = Config::from_env()?;
    log::info!(
        "Starting bot for {} ({} items tracked, debug: {})",
        config.username,
        config.items_to_sell.len(),
        config.debug
    );
    let exchange = Exchange::from_config(config).await?;

    // first pass right away, the scheduler takes over afterwards
    if let Err(e) = sell_pass(&exchange).await {
        log::error!("Initial sell pass failed: {e:?}");
    }

    let scheduler = Scheduler::new(exchange).await?;
    scheduler.start().await?;
    signal::ctrl_c().await?;
    log::info!("Shutting down");
    scheduler.shutdown().await?;

    Ok(())
}
