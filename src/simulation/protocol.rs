//! JSON messages spoken between simulated nodes, observers and the
//! simulation server.
//!
//! Every message is `{"type": "...", "data": {...}}`; `observe` carries no
//! data.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChatResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloMessage {
    pub uuid: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodbyeMessage {
    pub uuid: Uuid,
}

/// An undirected mesh edge; `from`/`to` only record who asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkMessage {
    #[serde(rename = "fromUUID")]
    pub from_uuid: Uuid,
    #[serde(rename = "toUUID")]
    pub to_uuid: Uuid,
}

impl LinkMessage {
    pub fn new(from_uuid: Uuid, to_uuid: Uuid) -> Self {
        Self { from_uuid, to_uuid }
    }

    pub fn involves(&self, uuid: Uuid) -> bool {
        self.from_uuid == uuid || self.to_uuid == uuid
    }

    /// The endpoint that is not `uuid`.
    pub fn other(&self, uuid: Uuid) -> Option<Uuid> {
        if self.from_uuid == uuid {
            Some(self.to_uuid)
        } else if self.to_uuid == uuid {
            Some(self.from_uuid)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub content: String,
}

/// A frame that crossed one edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastNotification {
    pub link: LinkMessage,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum SimulationMessage {
    // client -> server
    Observe,
    Hello(HelloMessage),
    Broadcast(BroadcastMessage),
    AddLink(LinkMessage),
    RemoveLink(LinkMessage),

    // server -> client
    HelloNotification(HelloMessage),
    GoodbyeNotification(GoodbyeMessage),
    AddLinkNotification(LinkMessage),
    RemoveLinkNotification(LinkMessage),
    BroadcastNotification(BroadcastNotification),
}

impl SimulationMessage {
    pub fn to_json(&self) -> ChatResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> ChatResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
