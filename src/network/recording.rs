use std::sync::Mutex;

use crate::protocol::Envelope;
use crate::sync::lock;

use super::chat_transport::{ChatTransport, FrameHandler, PeerHandler, TransportHandlers};

/// Test double that keeps every broadcast frame and lets callers inject
/// inbound frames and peer connections by hand.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Vec<u8>>>,
    peers_on_start: Mutex<Vec<String>>,
    handlers: TransportHandlers,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&self, frame: Vec<u8>) {
        self.handlers.deliver(frame);
    }

    pub fn inject_envelope(&self, envelope: &Envelope) {
        match envelope.encode() {
            Ok(frame) => self.inject(frame),
            Err(err) => log::warn!("Failed to encode injected envelope: {err}"),
        }
    }

    pub fn connect_peer(&self, peer: &str) {
        self.handlers.peer_connected(peer);
    }

    /// Reports `peer` as connected as soon as the transport is started.
    pub fn connect_on_start(&self, peer: &str) {
        lock(&self.peers_on_start).push(peer.to_string());
    }

    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        lock(&self.sent).clone()
    }

    /// Sent frames decoded back into envelopes; undecodable frames are skipped.
    pub fn sent_envelopes(&self) -> Vec<Envelope> {
        lock(&self.sent)
            .iter()
            .filter_map(|frame| Envelope::decode(frame).ok())
            .collect()
    }

    pub fn broadcast_count(&self) -> usize {
        lock(&self.sent).len()
    }
}

impl ChatTransport for RecordingTransport {
    fn broadcast(&self, frame: Vec<u8>) {
        lock(&self.sent).push(frame);
    }

    fn on_receive(&self, handler: FrameHandler) {
        self.handlers.set_receive(handler);
    }

    fn on_peer_connected(&self, handler: PeerHandler) {
        self.handlers.add_peer_connected(handler);
    }

    fn start(&self) {
        let peers = std::mem::take(&mut *lock(&self.peers_on_start));
        for peer in peers {
            self.handlers.peer_connected(&peer);
        }
    }
}
