use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use green_guardian_gateway::{
    app, logging, Config, Gateway, HubConnections, MqttTransport, WsState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    logging::init(&config.logging.level);

    tracing::info!(
        "Starting Green Guardian Gateway {} for thing {}",
        env!("CARGO_PKG_VERSION"),
        config.gateway.thing_name
    );

    let shutdown = CancellationToken::new();

    let transport = Arc::new(MqttTransport::connect(
        &config.mqtt,
        config.gateway.subscription_capacity,
        shutdown.child_token(),
    ));
    let hubs = Arc::new(HubConnections::new());
    let gateway = Arc::new(Gateway::new(
        config.gateway.clone(),
        transport.clone(),
        hubs.clone(),
    ));

    transport
        .wait_connected(Duration::from_secs(config.mqtt.request_timeout_secs))
        .await?;
    gateway.open().await?;

    let state = Arc::new(WsState {
        gateway: gateway.clone(),
        hubs,
        auth_token: config.rpc.auth_token.clone(),
        hello_timeout: Duration::from_secs(config.rpc.hello_timeout_secs),
    });

    // Start server
    let addr = format!("{}:{}", config.rpc.host, config.rpc.port);
    tracing::info!("Listening for hubs on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    let server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            axum::serve(
                listener,
                app(state).into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
        }
    });

    let outcome = tokio::select! {
        result = gateway.wait() => {
            if let Err(e) = &result {
                tracing::error!("Gateway failed: {}", e);
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            Ok(())
        }
    };

    if let Err(e) = gateway.close().await {
        tracing::warn!("Gateway close reported: {}", e);
    }
    transport.shutdown().await;
    shutdown.cancel();

    match server.await {
        Ok(Err(e)) => tracing::error!("Server error: {}", e),
        Err(e) => tracing::error!("Server task panicked: {}", e),
        Ok(Ok(())) => {}
    }

    tracing::info!("Gateway stopped");
    outcome.map_err(Into::into)
}
