//! Registration-and-routing core of the gateway.
//!
//! This module provides:
//! - Ownership tables for rooms and plants
//! - Topic layout for this gateway instance
//! - Forwarding of hub measurements onto the broker
//! - Dispatch of broker control messages to the owning hub
//! - The `Gateway` itself, with its inbound RPC surface and lifecycle

mod dispatcher;
mod publisher;
mod registry;
mod service;
mod topics;

pub use dispatcher::{Actuator, Dispatcher, ErrorReporter};
pub use publisher::Publisher;
pub use registry::{OwnerTable, Registry};
pub use service::{Gateway, Lifecycle};
pub use topics::{wildcard_segment, Topics};
