use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use distributed_chat::ChatResult;
use distributed_chat::simulation::{MESSAGING_PATH, SimulationMessage};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

use crate::state::{ConnectionId, Outgoing, SimulationState};

#[derive(Default)]
struct Hub {
    state: SimulationState,
    senders: HashMap<ConnectionId, mpsc::UnboundedSender<SimulationMessage>>,
    next_id: ConnectionId,
}

impl Hub {
    fn dispatch(&self, outgoing: Vec<Outgoing>) {
        for Outgoing { to, message } in outgoing {
            match self.senders.get(&to) {
                Some(sender) => {
                    if sender.send(message).is_err() {
                        log::debug!("Connection {to} is closing, message dropped");
                    }
                }
                None => log::debug!("No connection {to}, message dropped"),
            }
        }
    }
}

/// Relays simulation traffic between WebSocket clients on `/messaging`.
#[derive(Clone, Default)]
pub struct SimulationServer {
    hub: Arc<Mutex<Hub>>,
}

impl SimulationServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn bind(addr: &str) -> ChatResult<TcpListener> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("Simulation server listening on ws://{}{MESSAGING_PATH}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accepts connections until the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> ChatResult<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(err) = server.handle_connection(stream, peer).await {
                    log::warn!("Connection from {peer} failed: {err}");
                }
            });
        }
    }

    pub fn node_count(&self) -> usize {
        self.hub().state.node_count()
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> ChatResult<()> {
        let socket = accept_hdr_async(stream, check_path).await?;
        let (mut sink, mut stream) = socket.split();
        let (sender, mut receiver) = mpsc::unbounded_channel::<SimulationMessage>();

        let id = {
            let mut hub = self.hub();
            hub.next_id += 1;
            let id = hub.next_id;
            hub.senders.insert(id, sender);
            id
        };
        log::debug!("Connection {id} opened from {peer}");

        let writer = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(err) => {
                        log::warn!("Failed to encode simulation message: {err}");
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match SimulationMessage::from_json(&text) {
                    Ok(message) => {
                        let mut hub = self.hub();
                        let outgoing = hub.state.handle(id, message);
                        hub.dispatch(outgoing);
                    }
                    Err(err) => log::warn!("Connection {id} sent malformed message: {err}"),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    log::warn!("Connection {id} error: {err}");
                    break;
                }
            }
        }

        {
            let mut hub = self.hub();
            hub.senders.remove(&id);
            let outgoing = hub.state.disconnect(id);
            hub.dispatch(outgoing);
        }
        writer.abort();
        log::debug!("Connection {id} closed");
        Ok(())
    }
}

fn check_path(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    if request.uri().path() == MESSAGING_PATH {
        return Ok(response);
    }
    let mut error = ErrorResponse::new(Some(format!("expected {MESSAGING_PATH}")));
    *error.status_mut() = StatusCode::NOT_FOUND;
    Err(error)
}
