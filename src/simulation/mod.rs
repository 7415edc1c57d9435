//! Simulated meshes: an in-process network for tests and a client for the
//! standalone simulation server, both speaking the same JSON protocol.

pub mod client;
pub mod network;
pub mod protocol;
pub mod topology;

pub use client::SimulationTransport;
pub use network::{SimulatedNetwork, SimulatedTransport, SimulationObserver};
pub use protocol::{
    BroadcastMessage, BroadcastNotification, GoodbyeMessage, HelloMessage, LinkMessage,
    SimulationMessage,
};
pub use topology::Topology;

/// Path of the simulation server's WebSocket endpoint.
pub const MESSAGING_PATH: &str = "/messaging";
