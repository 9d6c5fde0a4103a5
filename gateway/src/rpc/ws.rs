//! WebSocket handler for hub connections.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

use green_guardian_common::{
    CallReturn, GatewayMessage, GatewayRequest, HubHello, HubMessage, PROTOCOL_VERSION,
};

use crate::gateway::Gateway;

use super::{CallContext, ConnectedHub, HubConnections};

/// Shared state for WebSocket connections.
pub struct WsState {
    pub gateway: Arc<Gateway>,
    pub hubs: Arc<HubConnections>,
    /// Token hubs must present, if any.
    pub auth_token: Option<String>,
    pub hello_timeout: Duration,
}

/// Routes of the RPC fabric.
pub fn router(state: Arc<WsState>) -> Router {
    Router::new()
        .route("/ws/hubs", get(ws_handler))
        .with_state(state)
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WsState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    tracing::info!("Hub connection attempt from {}", addr);
    ws.on_upgrade(move |socket| handle_hub(socket, state, addr))
}

/// Handle an individual hub connection.
async fn handle_hub(socket: WebSocket, state: Arc<WsState>, addr: SocketAddr) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let hello =
        match receive_hello(&mut ws_rx, state.hello_timeout, state.auth_token.as_deref()).await {
            Ok(hello) => hello,
            Err(rejection) => {
                tracing::warn!("Rejected hub from {}: {}", addr, rejection);
                if let Some(code) = rejection.code() {
                    let _ = send_error(&mut ws_tx, code, &rejection.to_string()).await;
                }
                return;
            }
        };

    let peer_id = Uuid::new_v4().to_string();
    if let Err(e) = send_message(
        &mut ws_tx,
        &GatewayMessage::Welcome {
            peer_id: peer_id.clone(),
        },
    )
    .await
    {
        tracing::error!("Failed to send Welcome: {}", e);
        return;
    }

    tracing::info!("Hub {} connected from {} as peer {}", hello.name, addr, peer_id);

    // Create channel for outbound messages to this hub
    let (tx, mut rx) = mpsc::channel::<GatewayMessage>(32);
    let hub = Arc::new(ConnectedHub::new(peer_id.clone(), hello.name.clone(), tx.clone()));
    state.hubs.insert(hub.clone()).await;

    let ctx = CallContext::new(peer_id.clone());

    // Main message loop
    loop {
        tokio::select! {
            // Outbound messages (from gateway to hub)
            Some(msg) = rx.recv() => {
                if let Err(e) = send_message(&mut ws_tx, &msg).await {
                    tracing::error!("Failed to send message to {}: {}", peer_id, e);
                    break;
                }
            }

            // Inbound messages (from hub to gateway)
            Some(result) = ws_rx.next() => {
                match result {
                    Ok(Message::Text(text)) => {
                        if let Err(e) = handle_hub_message(&text, &ctx, &hub, &state.gateway, &tx) {
                            tracing::error!("Error handling message from {}: {}", peer_id, e);
                        }
                    }
                    Ok(Message::Ping(data)) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            tracing::error!("Failed to send pong to {}: {}", peer_id, e);
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("Hub {} sent close frame", peer_id);
                        break;
                    }
                    Ok(_) => {} // Ignore binary, pong, etc.
                    Err(e) => {
                        tracing::error!("WebSocket error from {}: {}", peer_id, e);
                        break;
                    }
                }
            }

            else => break,
        }
    }

    state.hubs.remove(&peer_id).await;
    hub.fail_pending();
    state.gateway.peer_disconnected(&peer_id).await;

    tracing::info!("Hub {} ({}) disconnected", hello.name, peer_id);
}

/// Why a connection never got past the hello.
#[derive(Debug, thiserror::Error)]
enum HelloRejection {
    #[error("Hello timeout")]
    Timeout,
    #[error("Connection closed before hello")]
    Closed,
    #[error("WebSocket error before hello: {0}")]
    Socket(String),
    #[error("Expected text message")]
    NotText,
    #[error("{0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Expected Hello message")]
    NotHello,
    #[error("{0}")]
    Refused(String),
}

impl HelloRejection {
    /// Error code reported to the hub, `None` when nobody is left to tell.
    fn code(&self) -> Option<&'static str> {
        match self {
            HelloRejection::Timeout => Some("TIMEOUT"),
            HelloRejection::Closed | HelloRejection::Socket(_) => None,
            HelloRejection::NotText | HelloRejection::NotHello => Some("PROTOCOL_ERROR"),
            HelloRejection::Malformed(_) => Some("PARSE_ERROR"),
            HelloRejection::Refused(_) => Some("AUTH_FAILED"),
        }
    }
}

/// Read the first frame of a connection and accept it as a [`HubHello`].
async fn receive_hello<S, E>(
    frames: &mut S,
    hello_timeout: Duration,
    expected_token: Option<&str>,
) -> Result<HubHello, HelloRejection>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let frame = timeout(hello_timeout, frames.next())
        .await
        .map_err(|_| HelloRejection::Timeout)?
        .ok_or(HelloRejection::Closed)?
        .map_err(|e| HelloRejection::Socket(e.to_string()))?;
    let Message::Text(text) = frame else {
        return Err(HelloRejection::NotText);
    };
    let HubMessage::Hello(hello) = serde_json::from_str::<HubMessage>(&text)? else {
        return Err(HelloRejection::NotHello);
    };
    validate_hello(&hello, expected_token).map_err(HelloRejection::Refused)?;
    Ok(hello)
}

/// Validate a hub hello.
fn validate_hello(hello: &HubHello, expected_token: Option<&str>) -> Result<(), String> {
    if let Some(expected) = expected_token {
        if hello.auth_token.as_deref() != Some(expected) {
            return Err("Invalid auth token".to_string());
        }
    }

    if hello.protocol_version != PROTOCOL_VERSION {
        return Err(format!(
            "Protocol version mismatch: expected {}, got {}",
            PROTOCOL_VERSION, hello.protocol_version
        ));
    }

    if hello.name.is_empty() {
        return Err("Hub name cannot be empty".to_string());
    }

    Ok(())
}

/// Handle a message from a hub.
///
/// Calls run on their own task so a slow publish does not hold up returns
/// for calls the gateway made on this hub.
fn handle_hub_message(
    text: &str,
    ctx: &CallContext,
    hub: &ConnectedHub,
    gateway: &Arc<Gateway>,
    tx: &mpsc::Sender<GatewayMessage>,
) -> Result<(), serde_json::Error> {
    let msg: HubMessage = serde_json::from_str(text)?;

    match msg {
        HubMessage::Call(GatewayRequest { call_id, call }) => {
            let gateway = gateway.clone();
            let ctx = ctx.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let method = call.method();
                let ret = match gateway.handle_call(&ctx, call).await {
                    Ok(()) => CallReturn::ok(call_id),
                    Err(e) => {
                        tracing::warn!("{} from {} failed: {}", method, ctx.peer_id, e);
                        CallReturn::err(call_id, e.to_string())
                    }
                };
                if tx.send(GatewayMessage::Return(ret)).await.is_err() {
                    tracing::debug!("Hub {} gone before {} returned", ctx.peer_id, method);
                }
            });
        }
        HubMessage::Return(ret) => hub.complete(ret),
        HubMessage::Hello(_) => {
            tracing::warn!("Unexpected Hello message from {} after handshake", ctx.peer_id);
        }
    }

    Ok(())
}

/// Send a GatewayMessage over WebSocket.
async fn send_message<S>(
    sink: &mut S,
    msg: &GatewayMessage,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let json = serde_json::to_string(msg)?;
    sink.send(Message::Text(json)).await?;
    Ok(())
}

/// Send an error message over WebSocket.
async fn send_error<S>(
    sink: &mut S,
    code: &str,
    message: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let msg = GatewayMessage::Error {
        code: code.to_string(),
        message: message.to_string(),
    };
    send_message(sink, &msg).await
}
