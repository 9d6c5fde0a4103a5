pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod routes;
pub mod rpc;
pub mod test_util;
pub mod transport;

pub use config::{Config, GatewayConfig, MqttConfig, RpcConfig, StaleRoutePolicy};
pub use error::{GatewayError, Result};
pub use gateway::{Gateway, Lifecycle, Registry, Topics};
pub use rpc::{CallContext, ConnectedHub, HubConnections, HubHandle, PeerDirectory, RpcError, WsState};
pub use transport::{InboundMessage, MqttTransport, PubSub, Subscription, TransportError};

use std::sync::Arc;

use axum::{middleware, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Full HTTP surface: hub WebSocket endpoint plus health.
pub fn app(state: Arc<WsState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::router(state.clone()))
        .merge(rpc::router(state))
        .layer(middleware::from_fn(logging::request_logger))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
