//! Gateway WebSocket client for hub-gateway communication.
//!
//! This module handles the WebSocket connection to the gateway, including
//! the hello handshake, registration, measurement forwarding, and control
//! commands.

mod client;

pub use client::GatewayClient;
