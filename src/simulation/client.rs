use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::common::ChatUser;
use crate::error::ChatResult;
use crate::network::{ChatTransport, FrameHandler, PeerHandler, TransportHandlers};
use crate::sync::lock;

use super::protocol::{BroadcastMessage, HelloMessage, SimulationMessage};

/// Transport backed by a simulation server: the server owns the mesh graph
/// and forwards each broadcast to this node's current neighbors.
pub struct SimulationTransport {
    uuid: Uuid,
    outgoing: mpsc::UnboundedSender<SimulationMessage>,
    handlers: Arc<TransportHandlers>,
    /// Releases the reader task; server messages wait in the socket until then.
    start_signal: Mutex<Option<oneshot::Sender<()>>>,
}

impl SimulationTransport {
    /// Connects to `url` (e.g. `ws://localhost:8080/messaging`) and
    /// announces `me` to the server.
    pub async fn connect(url: &str, me: &ChatUser) -> ChatResult<Self> {
        let (socket, _) = connect_async(url).await?;
        log::info!("Connected to simulation server at {url}");
        let (mut sink, mut stream) = socket.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<SimulationMessage>();
        let handlers = Arc::new(TransportHandlers::default());
        let uuid = me.id;

        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(err) => {
                        log::warn!("Failed to encode simulation message: {err}");
                        continue;
                    }
                };
                if let Err(err) = sink.send(Message::Text(text)).await {
                    log::warn!("Simulation server connection lost while sending: {err}");
                    break;
                }
            }
        });

        let (start_signal, started) = oneshot::channel::<()>();
        let reader_handlers = handlers.clone();
        tokio::spawn(async move {
            if started.await.is_err() {
                return;
            }
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => handle_server_message(uuid, &reader_handlers, &text),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        log::warn!("Simulation server connection error: {err}");
                        break;
                    }
                }
            }
            log::info!("Simulation server connection closed");
        });

        let transport = Self {
            uuid,
            outgoing,
            handlers,
            start_signal: Mutex::new(Some(start_signal)),
        };
        transport.send(SimulationMessage::Hello(HelloMessage {
            uuid,
            name: me.name.clone(),
        }));
        Ok(transport)
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn send(&self, message: SimulationMessage) {
        if self.outgoing.send(message).is_err() {
            log::warn!("Simulation connection is closed; message dropped");
        }
    }
}

impl ChatTransport for SimulationTransport {
    fn broadcast(&self, frame: Vec<u8>) {
        match String::from_utf8(frame) {
            Ok(content) => self.send(SimulationMessage::Broadcast(BroadcastMessage { content })),
            Err(err) => log::warn!("Simulation frames must be UTF-8: {err}"),
        }
    }

    fn on_receive(&self, handler: FrameHandler) {
        self.handlers.set_receive(handler);
    }

    fn on_peer_connected(&self, handler: PeerHandler) {
        self.handlers.add_peer_connected(handler);
    }

    fn start(&self) {
        if let Some(signal) = lock(&self.start_signal).take() {
            let _ = signal.send(());
        }
    }
}

fn handle_server_message(uuid: Uuid, handlers: &TransportHandlers, text: &str) {
    match SimulationMessage::from_json(text) {
        Ok(SimulationMessage::BroadcastNotification(notification)) => {
            if notification.link.to_uuid == uuid {
                handlers.deliver(notification.content.into_bytes());
            }
        }
        Ok(SimulationMessage::AddLinkNotification(link)) => {
            if let Some(peer) = link.other(uuid) {
                log::info!("Simulated link to {peer} added");
                handlers.peer_connected(&peer.to_string());
            }
        }
        Ok(SimulationMessage::RemoveLinkNotification(link)) => {
            if let Some(peer) = link.other(uuid) {
                log::info!("Simulated link to {peer} removed");
            }
        }
        Ok(other) => log::debug!("Ignoring simulation message {other:?}"),
        Err(err) => log::warn!("Dropping malformed simulation message: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::protocol::{BroadcastNotification, LinkMessage};
    use std::sync::Mutex;

    fn recording_handlers() -> (TransportHandlers, Arc<Mutex<Vec<String>>>) {
        let handlers = TransportHandlers::default();
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();
        handlers.set_receive(Arc::new(move |frame: Vec<u8>| {
            sink.lock().unwrap().push(String::from_utf8(frame).unwrap());
        }));
        (handlers, frames)
    }

    #[test]
    fn only_broadcasts_addressed_to_us_are_delivered() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let (handlers, frames) = recording_handlers();

        let to_me = SimulationMessage::BroadcastNotification(BroadcastNotification {
            link: LinkMessage::new(other, me),
            content: "for me".to_string(),
        });
        let to_other = SimulationMessage::BroadcastNotification(BroadcastNotification {
            link: LinkMessage::new(me, other),
            content: "not for me".to_string(),
        });

        handle_server_message(me, &handlers, &to_me.to_json().unwrap());
        handle_server_message(me, &handlers, &to_other.to_json().unwrap());
        handle_server_message(me, &handlers, "garbage");

        assert_eq!(*frames.lock().unwrap(), vec!["for me".to_string()]);
    }

    #[test]
    fn link_notifications_involving_us_report_peers() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let handlers = TransportHandlers::default();
        let peers = Arc::new(Mutex::new(Vec::new()));
        let sink = peers.clone();
        handlers.add_peer_connected(Arc::new(move |peer: &str| sink.lock().unwrap().push(peer.to_string())));

        let ours = SimulationMessage::AddLinkNotification(LinkMessage::new(peer, me));
        let theirs = SimulationMessage::AddLinkNotification(LinkMessage::new(peer, Uuid::new_v4()));
        handle_server_message(me, &handlers, &ours.to_json().unwrap());
        handle_server_message(me, &handlers, &theirs.to_json().unwrap());

        assert_eq!(*peers.lock().unwrap(), vec![peer.to_string()]);
    }
}
