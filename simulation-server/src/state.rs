//! The simulation server's bookkeeping, free of any I/O.
//!
//! Every inbound message yields the list of messages to send back out, each
//! addressed to one connection.

use std::collections::{BTreeSet, HashMap};

use distributed_chat::simulation::{
    BroadcastMessage, BroadcastNotification, GoodbyeMessage, HelloMessage, LinkMessage,
    SimulationMessage, Topology,
};
use uuid::Uuid;

pub type ConnectionId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub to: ConnectionId,
    pub message: SimulationMessage,
}

#[derive(Debug, Default)]
pub struct SimulationState {
    topology: Topology,
    names: HashMap<Uuid, String>,
    nodes: HashMap<ConnectionId, Uuid>,
    connections: HashMap<Uuid, ConnectionId>,
    observers: BTreeSet<ConnectionId>,
}

impl SimulationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, from: ConnectionId, message: SimulationMessage) -> Vec<Outgoing> {
        match message {
            SimulationMessage::Observe => self.observe(from),
            SimulationMessage::Hello(hello) => self.hello(from, hello),
            SimulationMessage::Broadcast(broadcast) => self.broadcast(from, broadcast),
            SimulationMessage::AddLink(link) => {
                if !self.topology.add_link(link.from_uuid, link.to_uuid) {
                    log::debug!("Ignoring addLink {} <-> {}", link.from_uuid, link.to_uuid);
                    return Vec::new();
                }
                log::info!("Linked {} <-> {}", link.from_uuid, link.to_uuid);
                self.fan_out(
                    &SimulationMessage::AddLinkNotification(link),
                    &[link.from_uuid, link.to_uuid],
                )
            }
            SimulationMessage::RemoveLink(link) => {
                if !self.topology.remove_link(link.from_uuid, link.to_uuid) {
                    log::debug!("Ignoring removeLink {} <-> {}", link.from_uuid, link.to_uuid);
                    return Vec::new();
                }
                log::info!("Unlinked {} <-> {}", link.from_uuid, link.to_uuid);
                self.fan_out(
                    &SimulationMessage::RemoveLinkNotification(link),
                    &[link.from_uuid, link.to_uuid],
                )
            }
            other => {
                log::warn!("Connection {from} sent a server-side message: {other:?}");
                Vec::new()
            }
        }
    }

    /// Forgets a closed connection, unlinking the node behind it.
    pub fn disconnect(&mut self, connection: ConnectionId) -> Vec<Outgoing> {
        self.observers.remove(&connection);
        let Some(uuid) = self.nodes.remove(&connection) else {
            return Vec::new();
        };
        self.connections.remove(&uuid);
        self.names.remove(&uuid);

        let mut outgoing = Vec::new();
        for neighbor in self.topology.remove_node(&uuid) {
            outgoing.extend(self.fan_out(
                &SimulationMessage::RemoveLinkNotification(LinkMessage::new(uuid, neighbor)),
                &[neighbor],
            ));
        }
        outgoing.extend(self.fan_out(
            &SimulationMessage::GoodbyeNotification(GoodbyeMessage { uuid }),
            &[],
        ));
        log::info!("Node {uuid} left");
        outgoing
    }

    pub fn node_count(&self) -> usize {
        self.topology.len()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// New observers first receive the current graph.
    fn observe(&mut self, from: ConnectionId) -> Vec<Outgoing> {
        self.observers.insert(from);

        let mut nodes: Vec<Uuid> = self.topology.nodes().collect();
        nodes.sort();
        let hellos = nodes.into_iter().map(|uuid| {
            SimulationMessage::HelloNotification(HelloMessage {
                uuid,
                name: self.names.get(&uuid).cloned().unwrap_or_default(),
            })
        });
        let links = self
            .topology
            .links()
            .into_iter()
            .map(|(a, b)| SimulationMessage::AddLinkNotification(LinkMessage::new(a, b)));

        hellos
            .chain(links)
            .map(|message| Outgoing { to: from, message })
            .collect()
    }

    fn hello(&mut self, from: ConnectionId, hello: HelloMessage) -> Vec<Outgoing> {
        if self.nodes.contains_key(&from) || self.topology.contains(&hello.uuid) {
            log::warn!("Duplicate hello for {} on connection {from}", hello.uuid);
            return Vec::new();
        }
        log::info!("Node {} ({}) joined", hello.name, hello.uuid);
        self.topology.add_node(hello.uuid);
        self.names.insert(hello.uuid, hello.name.clone());
        self.nodes.insert(from, hello.uuid);
        self.connections.insert(hello.uuid, from);
        self.fan_out(&SimulationMessage::HelloNotification(hello), &[])
    }

    fn broadcast(&mut self, from: ConnectionId, broadcast: BroadcastMessage) -> Vec<Outgoing> {
        let Some(&sender) = self.nodes.get(&from) else {
            log::warn!("Broadcast from connection {from} before hello");
            return Vec::new();
        };
        let neighbors: Vec<Uuid> = self.topology.neighbors(&sender).collect();
        neighbors
            .into_iter()
            .flat_map(|neighbor| {
                let notification = SimulationMessage::BroadcastNotification(BroadcastNotification {
                    link: LinkMessage::new(sender, neighbor),
                    content: broadcast.content.clone(),
                });
                self.fan_out(&notification, &[neighbor])
            })
            .collect()
    }

    /// Addresses `message` to every observer plus the given nodes, once each.
    fn fan_out(&self, message: &SimulationMessage, nodes: &[Uuid]) -> Vec<Outgoing> {
        let mut recipients = self.observers.clone();
        recipients.extend(nodes.iter().filter_map(|uuid| self.connections.get(uuid)));
        recipients
            .into_iter()
            .map(|to| Outgoing {
                to,
                message: message.clone(),
            })
            .collect()
    }
}
