//! Test doubles for the broker and the hubs.

pub mod memory_broker;
pub mod mock_hub;

pub use memory_broker::MemoryBroker;
pub use mock_hub::{MockHub, MockPeers};
