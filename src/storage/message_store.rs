use std::collections::HashMap;

use uuid::Uuid;

use crate::common::{ChatMessage, Channel};

/// Every chat message this node knows, in the order it learned them.
///
/// Inserting an id that is already present is a no-op; nothing is ever
/// removed.
#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    messages: Vec<ChatMessage>,
    index: HashMap<Uuid, usize>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.index.contains_key(id)
    }

    /// Returns `true` if the message was not known before.
    pub fn insert(&mut self, message: ChatMessage) -> bool {
        if self.index.contains_key(&message.id) {
            return false;
        }
        self.index.insert(message.id, self.messages.len());
        self.messages.push(message);
        true
    }

    pub fn get(&self, id: &Uuid) -> Option<&ChatMessage> {
        self.index.get(id).map(|&position| &self.messages[position])
    }

    /// Messages in insertion order, optionally restricted to one channel.
    ///
    /// The iterator is lazy and `Clone`, so it can be restarted.
    pub fn all<'a>(
        &'a self,
        channel: Option<Channel<'a>>,
    ) -> impl Iterator<Item = &'a ChatMessage> + Clone + 'a {
        self.messages
            .iter()
            .filter(move |message| channel.is_none_or(|channel| message.content.channel() == channel))
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
