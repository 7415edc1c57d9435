use std::sync::{Arc, Mutex};

use crate::protocol::Envelope;
use crate::sync::lock;

/// Invoked once per inbound frame.
pub type FrameHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Invoked with a transport-specific peer name when a link comes up.
pub type PeerHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// One logical channel to whatever peers are currently reachable.
///
/// `broadcast` is fire-and-forget: per-peer failures are the transport's
/// business and are never reported back. Implementations must not invoke the
/// receive handler from inside `broadcast`; inbound frames arrive on their own.
pub trait ChatTransport: Send + Sync {
    fn broadcast(&self, frame: Vec<u8>);

    /// Registers the inbound frame handler, replacing any previous one.
    fn on_receive(&self, handler: FrameHandler);

    /// Transports that know when links come up report them here.
    fn on_peer_connected(&self, handler: PeerHandler) {
        let _ = handler;
    }

    /// Begins delivering inbound frames and peer events. Call once, after the
    /// handlers are registered. Transports driven by a background task do not
    /// run it before this; in-process ones may ignore the call.
    fn start(&self) {}
}

/// Handler slots shared by the concrete transports.
#[derive(Default)]
pub struct TransportHandlers {
    receive: Mutex<Option<FrameHandler>>,
    peer_connected: Mutex<Vec<PeerHandler>>,
}

impl TransportHandlers {
    pub fn set_receive(&self, handler: FrameHandler) {
        *lock(&self.receive) = Some(handler);
    }

    pub fn add_peer_connected(&self, handler: PeerHandler) {
        lock(&self.peer_connected).push(handler);
    }

    /// Hands a frame to the registered handler. Frames arriving before a
    /// handler is registered are dropped.
    pub fn deliver(&self, frame: Vec<u8>) {
        let handler = lock(&self.receive).clone();
        match handler {
            Some(handler) => handler(frame),
            None => log::debug!("No receive handler registered, dropping {} byte frame", frame.len()),
        }
    }

    pub fn peer_connected(&self, peer: &str) {
        let handlers = lock(&self.peer_connected).clone();
        for handler in handlers {
            handler(peer);
        }
    }
}

/// Typed view over a [`ChatTransport`]: encodes outgoing envelopes and
/// decodes incoming frames, dropping anything that does not parse.
#[derive(Clone)]
pub struct EnvelopeTransport {
    inner: Arc<dyn ChatTransport>,
}

impl EnvelopeTransport {
    pub fn new(inner: Arc<dyn ChatTransport>) -> Self {
        Self { inner }
    }

    pub fn broadcast(&self, envelope: &Envelope) {
        match envelope.encode() {
            Ok(frame) => self.inner.broadcast(frame),
            Err(err) => log::warn!("Failed to encode envelope: {err}"),
        }
    }

    pub fn on_receive<F>(&self, handler: F)
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        self.inner
            .on_receive(Arc::new(move |frame: Vec<u8>| match Envelope::decode(&frame) {
                Ok(envelope) => handler(envelope),
                Err(err) => log::warn!("Dropping undecodable frame ({} bytes): {err}", frame.len()),
            }));
    }

    pub fn on_peer_connected<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.on_peer_connected(Arc::new(handler));
    }
}
