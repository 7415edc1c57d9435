//! Direct link transport: peers found nearby over mDNS, one libp2p
//! connection per neighbor, one request/response exchange per frame.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use libp2p::request_response::{self, OutboundRequestId};
use libp2p::swarm::dial_opts::DialOpts;
use libp2p::swarm::{Config as SwarmConfig, SwarmEvent};
use libp2p::{Multiaddr, PeerId, Swarm, identity, mdns};
use tokio::sync::mpsc;

use crate::error::{ChatError, ChatResult};
use crate::sync::lock;

use super::behavior::{FrameAck, LinkBehavior, LinkBehaviorEvent, LinkFrame, build_behavior};
use super::chat_transport::{ChatTransport, FrameHandler, PeerHandler, TransportHandlers};
use super::transport::build_transport;

pub const DEFAULT_LISTEN_ADDR: &str = "/ip4/0.0.0.0/tcp/0";

const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub listen_addr: Multiaddr,
    /// Peers to dial at startup in addition to those found over mDNS.
    pub dial: Vec<Multiaddr>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR
                .parse()
                .unwrap_or_else(|_| Multiaddr::empty()),
            dial: Vec::new(),
        }
    }
}

#[derive(Debug)]
enum LinkCommand {
    Broadcast(Vec<u8>),
    Dial(Multiaddr),
}

/// Handle to the link event loop. Broadcasts are queued to the loop and
/// never block the caller.
pub struct LinkTransport {
    local_peer_id: PeerId,
    commands: mpsc::UnboundedSender<LinkCommand>,
    handlers: Arc<TransportHandlers>,
    /// Parked until `start`, so no link comes up before handlers exist.
    event_loop: Mutex<Option<LinkEventLoop>>,
}

impl LinkTransport {
    /// Builds the swarm and queues the initial dials. The swarm is not polled
    /// until [`ChatTransport::start`] spawns its event loop.
    pub fn new(config: LinkConfig) -> ChatResult<Self> {
        let local_key = identity::Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(local_key.public());
        log::info!("Local PeerID: {local_peer_id}");

        let transport = build_transport(&local_key)?;
        let behavior = build_behavior(local_peer_id)?;

        let mut swarm = Swarm::new(
            transport,
            behavior,
            local_peer_id,
            SwarmConfig::with_tokio_executor().with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT),
        );

        swarm
            .listen_on(config.listen_addr.clone())
            .map_err(|err| ChatError::Link(format!("listen on {}: {err}", config.listen_addr)))?;

        for addr in config.dial {
            if let Err(err) = swarm.dial(addr.clone()) {
                log::warn!("Failed to dial {addr}: {err}");
            }
        }

        let (commands, command_receiver) = mpsc::unbounded_channel();
        let handlers = Arc::new(TransportHandlers::default());
        let event_loop = LinkEventLoop {
            swarm,
            command_receiver,
            handlers: handlers.clone(),
            peers: HashMap::new(),
        };

        Ok(Self {
            local_peer_id,
            commands,
            handlers,
            event_loop: Mutex::new(Some(event_loop)),
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    pub fn dial(&self, addr: Multiaddr) {
        if self.commands.send(LinkCommand::Dial(addr)).is_err() {
            log::warn!("Link event loop has stopped; dial ignored");
        }
    }
}

impl ChatTransport for LinkTransport {
    fn broadcast(&self, frame: Vec<u8>) {
        if self.commands.send(LinkCommand::Broadcast(frame)).is_err() {
            log::warn!("Link event loop has stopped; broadcast dropped");
        }
    }

    fn on_receive(&self, handler: FrameHandler) {
        self.handlers.set_receive(handler);
    }

    fn on_peer_connected(&self, handler: PeerHandler) {
        self.handlers.add_peer_connected(handler);
    }

    /// Spawns the event loop on the current tokio runtime.
    fn start(&self) {
        match lock(&self.event_loop).take() {
            Some(event_loop) => {
                tokio::spawn(event_loop.run());
            }
            None => log::debug!("Link transport already started"),
        }
    }
}

/// Frames waiting for one neighbor. At most one is in flight so the
/// neighbor sees them in the order they were accepted.
#[derive(Default)]
struct PeerQueue {
    pending: VecDeque<LinkFrame>,
    in_flight: Option<OutboundRequestId>,
}

struct LinkEventLoop {
    swarm: Swarm<LinkBehavior>,
    command_receiver: mpsc::UnboundedReceiver<LinkCommand>,
    handlers: Arc<TransportHandlers>,
    peers: HashMap<PeerId, PeerQueue>,
}

impl LinkEventLoop {
    async fn run(mut self) {
        log::info!("Link event loop started");

        loop {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => break,
                    }
                }
                event = self.swarm.select_next_some() => {
                    self.handle_swarm_event(event);
                }
            }
        }

        log::info!("Link event loop stopped");
    }

    fn handle_command(&mut self, command: LinkCommand) {
        match command {
            LinkCommand::Broadcast(frame) => {
                if self.peers.is_empty() {
                    log::debug!("No linked peers; broadcast of {} bytes reaches nobody", frame.len());
                    return;
                }
                let frame = LinkFrame::new(&frame);
                let peers: Vec<PeerId> = self.peers.keys().copied().collect();
                for peer in peers {
                    if let Some(queue) = self.peers.get_mut(&peer) {
                        queue.pending.push_back(frame.clone());
                    }
                    self.pump(peer);
                }
            }
            LinkCommand::Dial(addr) => {
                if let Err(err) = self.swarm.dial(addr.clone()) {
                    log::warn!("Failed to dial {addr}: {err}");
                }
            }
        }
    }

    /// Sends the next queued frame to `peer` unless one is still in flight.
    fn pump(&mut self, peer: PeerId) {
        let Some(queue) = self.peers.get_mut(&peer) else {
            return;
        };
        if queue.in_flight.is_some() {
            return;
        }
        if let Some(frame) = queue.pending.pop_front() {
            queue.in_flight = Some(self.swarm.behaviour_mut().frames.send_request(&peer, frame));
        }
    }

    fn finish_in_flight(&mut self, peer: PeerId, request_id: OutboundRequestId) {
        if let Some(queue) = self.peers.get_mut(&peer) {
            if queue.in_flight == Some(request_id) {
                queue.in_flight = None;
            }
        }
        self.pump(peer);
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<LinkBehaviorEvent>) {
        match event {
            SwarmEvent::Behaviour(LinkBehaviorEvent::Frames(event)) => {
                self.handle_frame_event(event);
            }
            SwarmEvent::Behaviour(LinkBehaviorEvent::Mdns(mdns::Event::Discovered(list))) => {
                for (peer_id, addr) in list {
                    if self.peers.contains_key(&peer_id) {
                        continue;
                    }
                    log::info!("Discovered nearby peer {peer_id} at {addr}");
                    let opts = DialOpts::peer_id(peer_id).addresses(vec![addr]).build();
                    if let Err(err) = self.swarm.dial(opts) {
                        log::debug!("Not dialing {peer_id}: {err}");
                    }
                }
            }
            SwarmEvent::Behaviour(LinkBehaviorEvent::Mdns(mdns::Event::Expired(list))) => {
                for (peer_id, _) in list {
                    log::debug!("mDNS record for {peer_id} expired");
                }
            }
            SwarmEvent::ConnectionEstablished {
                peer_id,
                num_established,
                ..
            } => {
                if num_established.get() == 1 {
                    self.peers.insert(peer_id, PeerQueue::default());
                    log::info!("Link up: {peer_id} ({} linked)", self.peers.len());
                    self.handlers.peer_connected(&peer_id.to_string());
                }
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                if num_established == 0 {
                    if let Some(queue) = self.peers.remove(&peer_id) {
                        let undelivered = queue.pending.len() + usize::from(queue.in_flight.is_some());
                        if undelivered > 0 {
                            log::warn!("Link to {peer_id} lost with {undelivered} frame(s) undelivered");
                        }
                    }
                    log::info!("Link down: {peer_id} ({} linked)", self.peers.len());
                }
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                log::warn!("Could not reach {peer_id:?}: {error}");
            }
            SwarmEvent::NewListenAddr { address, .. } => {
                log::info!("Listening on {address:?}");
            }
            _ => {}
        }
    }

    fn handle_frame_event(&mut self, event: request_response::Event<LinkFrame, FrameAck>) {
        match event {
            request_response::Event::Message { peer, message, .. } => match message {
                request_response::Message::Request {
                    request, channel, ..
                } => {
                    let decoded = request.bytes();
                    let ack = FrameAck {
                        accepted: decoded.is_ok(),
                    };
                    if self.swarm.behaviour_mut().frames.send_response(channel, ack).is_err() {
                        log::debug!("Could not acknowledge frame from {peer}");
                    }
                    match decoded {
                        Ok(frame) => self.handlers.deliver(frame),
                        Err(err) => log::warn!("Dropping malformed frame from {peer}: {err}"),
                    }
                }
                request_response::Message::Response {
                    request_id,
                    response,
                } => {
                    if !response.accepted {
                        log::warn!("{peer} rejected a frame");
                    }
                    self.finish_in_flight(peer, request_id);
                }
            },
            request_response::Event::OutboundFailure {
                peer,
                request_id,
                error,
                ..
            } => {
                log::warn!("Failed to deliver frame to {peer}: {error}");
                self.finish_in_flight(peer, request_id);
            }
            request_response::Event::InboundFailure { peer, error, .. } => {
                log::debug!("Inbound frame from {peer} failed: {error}");
            }
            request_response::Event::ResponseSent { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_listens_on_any_tcp_port() {
        let config = LinkConfig::default();
        assert_eq!(config.listen_addr.to_string(), DEFAULT_LISTEN_ADDR);
        assert!(config.dial.is_empty());
    }

    #[tokio::test]
    async fn event_loop_starts_once_and_tolerates_early_broadcasts() {
        let transport = match LinkTransport::new(LinkConfig {
            listen_addr: "/ip4/127.0.0.1/tcp/0".parse().unwrap(),
            dial: Vec::new(),
        }) {
            Ok(transport) => transport,
            // mDNS needs a multicast-capable interface; skip where there is none.
            Err(err) => {
                eprintln!("skipping: {err}");
                return;
            }
        };
        transport.broadcast(b"{}".to_vec());
        transport.start();
        transport.start();
        assert!(lock(&transport.event_loop).is_none());
        assert!(transport.local_peer_id().to_string().starts_with("12D3KooW"));
    }
}
