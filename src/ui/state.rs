use uuid::Uuid;

use crate::common::{Channel, ChatMessage};

/// Local, per-terminal view state.
#[derive(Debug, Default)]
pub struct AppState {
    pub channel: Option<String>,
    pub peers: Vec<String>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_channel(&self) -> Channel<'_> {
        Channel::from_name(self.channel.as_deref())
    }

    pub fn is_visible(&self, message: &ChatMessage) -> bool {
        message.content.channel() == self.current_channel()
    }

    pub fn add_peer(&mut self, peer_id: String) -> bool {
        if self.peers.iter().any(|peer| peer == &peer_id) {
            return false;
        }
        self.peers.push(peer_id);
        true
    }
}

/// Finds the single message whose id starts with `prefix`.
pub fn resolve_prefix<'a>(messages: &'a [ChatMessage], prefix: &str) -> Result<&'a ChatMessage, String> {
    let prefix = prefix.to_ascii_lowercase();
    let mut matches = messages
        .iter()
        .filter(|message| message.id.to_string().starts_with(&prefix));
    match (matches.next(), matches.next()) {
        (Some(message), None) => Ok(message),
        (None, _) => Err(format!("no message starts with {prefix}")),
        (Some(_), Some(_)) => Err(format!("{prefix} is ambiguous")),
    }
}

pub fn short_id(id: &Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}
