use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use libp2p::request_response::{self, ProtocolSupport};
use libp2p::swarm::NetworkBehaviour;
use libp2p::{PeerId, StreamProtocol, mdns};
use serde::{Deserialize, Serialize};

use crate::error::ChatResult;

pub const FRAME_PROTOCOL: StreamProtocol = StreamProtocol::new("/distributed-chat/frame/1.0.0");

/// One opaque chat frame sent to a single neighbor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkFrame {
    pub payload: String,
}

impl LinkFrame {
    pub fn new(frame: &[u8]) -> Self {
        Self {
            payload: STANDARD.encode(frame),
        }
    }

    pub fn bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.payload)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameAck {
    pub accepted: bool,
}

#[derive(NetworkBehaviour)]
pub struct LinkBehavior {
    pub frames: request_response::json::Behaviour<LinkFrame, FrameAck>,
    pub mdns: mdns::tokio::Behaviour,
}

pub fn build_behavior(local_peer_id: PeerId) -> ChatResult<LinkBehavior> {
    let frames = request_response::json::Behaviour::new(
        [(FRAME_PROTOCOL, ProtocolSupport::Full)],
        request_response::Config::default(),
    );

    let mdns = mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id)?;

    Ok(LinkBehavior { frames, mdns })
}
