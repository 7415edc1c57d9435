use crate::common::types::ChatMessage;

/// Events pushed from the chat core and transports up to the front end.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    MessageAdded(ChatMessage),
    PeerConnected(String),
}
