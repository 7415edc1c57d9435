//! In-process mesh of simulated transports.
//!
//! Broadcasts are not delivered immediately: they are queued per edge and
//! handed over in explicit rounds with [`SimulatedNetwork::step`]. One round
//! moves every frame that was queued before it started across one hop, which
//! makes relay depth directly observable.

use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::network::{ChatTransport, FrameHandler, PeerHandler, TransportHandlers};
use crate::sync::lock;

use super::protocol::{BroadcastNotification, GoodbyeMessage, HelloMessage, LinkMessage, SimulationMessage};
use super::topology::Topology;

/// Receives the same notifications the simulation server sends observers.
pub type SimulationObserver = Arc<dyn Fn(&SimulationMessage) + Send + Sync>;

struct Delivery {
    link: LinkMessage,
    frame: Vec<u8>,
}

#[derive(Default)]
struct NetworkState {
    topology: Topology,
    names: HashMap<Uuid, String>,
    handlers: HashMap<Uuid, Arc<TransportHandlers>>,
    queue: VecDeque<Delivery>,
    broadcasts: HashMap<Uuid, usize>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<NetworkState>,
    observers: Mutex<Vec<SimulationObserver>>,
}

impl Shared {
    fn publish(&self, messages: &[SimulationMessage]) {
        let observers = lock(&self.observers).clone();
        for message in messages {
            for observer in &observers {
                observer(message);
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct SimulatedNetwork {
    shared: Arc<Shared>,
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node without links and returns its transport.
    pub fn add_node(&self, uuid: Uuid, name: impl Into<String>) -> Arc<SimulatedTransport> {
        let name = name.into();
        let handlers = Arc::new(TransportHandlers::default());
        {
            let mut state = lock(&self.shared.state);
            state.topology.add_node(uuid);
            state.names.insert(uuid, name.clone());
            state.handlers.insert(uuid, handlers.clone());
        }
        self.shared
            .publish(&[SimulationMessage::HelloNotification(HelloMessage { uuid, name })]);

        Arc::new(SimulatedTransport {
            uuid,
            shared: self.shared.clone(),
            handlers,
        })
    }

    /// Removes a node together with its links. Frames still queued for it are lost.
    pub fn remove_node(&self, uuid: Uuid) {
        let (former, known) = {
            let mut state = lock(&self.shared.state);
            let known = state.handlers.remove(&uuid).is_some();
            state.names.remove(&uuid);
            (state.topology.remove_node(&uuid), known)
        };
        if !known {
            return;
        }
        let mut notifications: Vec<SimulationMessage> = former
            .into_iter()
            .map(|neighbor| SimulationMessage::RemoveLinkNotification(LinkMessage::new(uuid, neighbor)))
            .collect();
        notifications.push(SimulationMessage::GoodbyeNotification(GoodbyeMessage { uuid }));
        self.shared.publish(&notifications);
    }

    /// Links two nodes; both ends see a peer-connected event.
    pub fn add_link(&self, a: Uuid, b: Uuid) -> bool {
        let endpoints = {
            let mut state = lock(&self.shared.state);
            if !state.topology.add_link(a, b) {
                return false;
            }
            (state.handlers.get(&a).cloned(), state.handlers.get(&b).cloned())
        };

        self.shared
            .publish(&[SimulationMessage::AddLinkNotification(LinkMessage::new(a, b))]);
        if let (Some(a_handlers), Some(b_handlers)) = endpoints {
            a_handlers.peer_connected(&b.to_string());
            b_handlers.peer_connected(&a.to_string());
        }
        true
    }

    pub fn remove_link(&self, a: Uuid, b: Uuid) -> bool {
        let removed = lock(&self.shared.state).topology.remove_link(a, b);
        if removed {
            self.shared
                .publish(&[SimulationMessage::RemoveLinkNotification(LinkMessage::new(a, b))]);
        }
        removed
    }

    pub fn is_linked(&self, a: Uuid, b: Uuid) -> bool {
        lock(&self.shared.state).topology.is_linked(&a, &b)
    }

    pub fn name(&self, uuid: Uuid) -> Option<String> {
        lock(&self.shared.state).names.get(&uuid).cloned()
    }

    pub fn topology(&self) -> Topology {
        lock(&self.shared.state).topology.clone()
    }

    pub fn observe<F>(&self, observer: F)
    where
        F: Fn(&SimulationMessage) + Send + Sync + 'static,
    {
        lock(&self.shared.observers).push(Arc::new(observer));
    }

    /// Delivers every frame queued so far. Frames queued while this round
    /// runs wait for the next one. Returns how many frames arrived.
    pub fn step(&self) -> usize {
        let round = mem::take(&mut lock(&self.shared.state).queue);
        let mut delivered = 0;

        for delivery in round {
            let target = {
                let state = lock(&self.shared.state);
                let link = delivery.link;
                // A link torn down while the frame was queued loses the frame.
                if !state.topology.is_linked(&link.from_uuid, &link.to_uuid) {
                    None
                } else {
                    state.handlers.get(&link.to_uuid).cloned()
                }
            };
            match target {
                Some(handlers) => {
                    handlers.deliver(delivery.frame);
                    delivered += 1;
                }
                None => log::debug!(
                    "Dropping frame {} -> {}: link is gone",
                    delivery.link.from_uuid,
                    delivery.link.to_uuid
                ),
            }
        }

        delivered
    }

    /// Runs rounds until nothing is queued or `max_rounds` is reached.
    /// Returns the number of rounds that delivered at least one frame.
    pub fn run_until_quiet(&self, max_rounds: usize) -> usize {
        let mut rounds = 0;
        while rounds < max_rounds && self.pending() > 0 {
            if self.step() > 0 {
                rounds += 1;
            }
        }
        rounds
    }

    pub fn pending(&self) -> usize {
        lock(&self.shared.state).queue.len()
    }

    pub fn broadcast_count(&self, uuid: Uuid) -> usize {
        lock(&self.shared.state)
            .broadcasts
            .get(&uuid)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_broadcasts(&self) -> usize {
        lock(&self.shared.state).broadcasts.values().sum()
    }
}

/// One node's view of the simulated mesh.
pub struct SimulatedTransport {
    uuid: Uuid,
    shared: Arc<Shared>,
    handlers: Arc<TransportHandlers>,
}

impl SimulatedTransport {
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}

impl ChatTransport for SimulatedTransport {
    fn broadcast(&self, frame: Vec<u8>) {
        let links: Vec<LinkMessage> = {
            let mut state = lock(&self.shared.state);
            *state.broadcasts.entry(self.uuid).or_default() += 1;
            let links: Vec<LinkMessage> = state
                .topology
                .neighbors(&self.uuid)
                .map(|neighbor| LinkMessage::new(self.uuid, neighbor))
                .collect();
            for link in &links {
                state.queue.push_back(Delivery {
                    link: *link,
                    frame: frame.clone(),
                });
            }
            links
        };

        let content = String::from_utf8_lossy(&frame).into_owned();
        let notifications: Vec<SimulationMessage> = links
            .into_iter()
            .map(|link| {
                SimulationMessage::BroadcastNotification(BroadcastNotification {
                    link,
                    content: content.clone(),
                })
            })
            .collect();
        self.shared.publish(&notifications);
    }

    fn on_receive(&self, handler: FrameHandler) {
        self.handlers.set_receive(handler);
    }

    fn on_peer_connected(&self, handler: PeerHandler) {
        self.handlers.add_peer_connected(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn broadcast_reaches_only_neighbors_after_a_step() {
        let network = SimulatedNetwork::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let ta = network.add_node(a, "a");
        let tb = network.add_node(b, "b");
        let tc = network.add_node(c, "c");
        network.add_link(a, b);

        let b_frames = Arc::new(AtomicUsize::new(0));
        let c_frames = Arc::new(AtomicUsize::new(0));
        let counter = b_frames.clone();
        tb.on_receive(Arc::new(move |_: Vec<u8>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let counter = c_frames.clone();
        tc.on_receive(Arc::new(move |_: Vec<u8>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        ta.broadcast(b"x".to_vec());
        assert_eq!(b_frames.load(Ordering::SeqCst), 0);
        assert_eq!(network.pending(), 1);

        assert_eq!(network.step(), 1);
        assert_eq!(b_frames.load(Ordering::SeqCst), 1);
        assert_eq!(c_frames.load(Ordering::SeqCst), 0);
        assert_eq!(network.broadcast_count(a), 1);
    }

    #[test]
    fn frames_on_removed_links_are_lost() {
        let network = SimulatedNetwork::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let ta = network.add_node(a, "a");
        network.add_node(b, "b");
        network.add_link(a, b);

        ta.broadcast(b"x".to_vec());
        network.remove_link(a, b);
        assert_eq!(network.step(), 0);
        assert_eq!(network.pending(), 0);
    }

    #[test]
    fn observers_see_topology_and_traffic() {
        let network = SimulatedNetwork::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        network.observe(move |message| sink.lock().unwrap().push(message.clone()));

        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let ta = network.add_node(a, "a");
        network.add_node(b, "b");
        network.add_link(a, b);
        ta.broadcast(b"payload".to_vec());
        network.remove_node(b);

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.as_slice(),
            &[
                SimulationMessage::HelloNotification(HelloMessage {
                    uuid: a,
                    name: "a".to_string()
                }),
                SimulationMessage::HelloNotification(HelloMessage {
                    uuid: b,
                    name: "b".to_string()
                }),
                SimulationMessage::AddLinkNotification(LinkMessage::new(a, b)),
                SimulationMessage::BroadcastNotification(BroadcastNotification {
                    link: LinkMessage::new(a, b),
                    content: "payload".to_string()
                }),
                SimulationMessage::RemoveLinkNotification(LinkMessage::new(b, a)),
                SimulationMessage::GoodbyeNotification(GoodbyeMessage { uuid: b }),
            ]
        );
    }

    #[test]
    fn new_links_report_peer_connections_on_both_ends() {
        let network = SimulatedNetwork::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let ta = network.add_node(a, "a");
        let tb = network.add_node(b, "b");
        let connections = Arc::new(Mutex::new(Vec::new()));

        let sink = connections.clone();
        ta.on_peer_connected(Arc::new(move |peer: &str| sink.lock().unwrap().push(("a", peer.to_string()))));
        let sink = connections.clone();
        tb.on_peer_connected(Arc::new(move |peer: &str| sink.lock().unwrap().push(("b", peer.to_string()))));

        assert!(network.add_link(a, b));
        assert!(!network.add_link(b, a));

        assert_eq!(
            *connections.lock().unwrap(),
            vec![("a", b.to_string()), ("b", a.to_string())]
        );
    }
}
