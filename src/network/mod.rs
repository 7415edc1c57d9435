pub mod behavior;
pub mod chat_transport;
pub mod link;
pub mod recording;
pub mod transport;

pub use chat_transport::{ChatTransport, EnvelopeTransport, FrameHandler, PeerHandler, TransportHandlers};
pub use link::{LinkConfig, LinkTransport};
pub use recording::RecordingTransport;
