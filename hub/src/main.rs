//! Green Guardian Hub - owns rooms and plants and serves them to the gateway.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use green_guardian_hub::{Config, GatewayClient, SimulatedGreenhouse};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load().map_err(|e| {
        format!(
            "Failed to load configuration: {}. \
             Make sure config.toml exists or set HUB__HUB__NAME and HUB__GATEWAY__WS_URL environment variables.",
            e
        )
    })?;
    tracing::info!(
        "Starting hub {} with {} rooms and {} plants",
        config.hub.name,
        config.hub.rooms.len(),
        config.hub.plants.len()
    );

    let greenhouse = Arc::new(SimulatedGreenhouse::new(&config.hub, config.sensors));
    let client = GatewayClient::new(
        config.gateway.clone(),
        config.hub.clone(),
        config.sensors,
        greenhouse.clone(),
        greenhouse,
    );

    tokio::select! {
        _ = client.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
