//! WebSocket hub that plays the radio for simulated chat nodes: it owns the
//! mesh graph and forwards each broadcast along the links it knows about.

pub mod server;
pub mod state;

pub use server::SimulationServer;
pub use state::{ConnectionId, Outgoing, SimulationState};
