//! The logical envelope exchanged between directly connected peers.
//!
//! On the wire an envelope is a JSON object. Fields this version does not know
//! about are ignored, so newer event kinds can ride along without breaking
//! older nodes.

use serde::{Deserialize, Serialize};

use crate::common::ChatMessage;
use crate::error::ChatResult;

/// A batch of newly asserted events, broadcast to every current neighbor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub added_chat_messages: Vec<ChatMessage>,
}

impl Envelope {
    pub fn with_messages(messages: Vec<ChatMessage>) -> Self {
        Self {
            added_chat_messages: messages,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added_chat_messages.is_empty()
    }

    pub fn encode(&self) -> ChatResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(frame: &[u8]) -> ChatResult<Self> {
        Ok(serde_json::from_slice(frame)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ChatMessageContent, ChatUser};

    #[test]
    fn encodes_messages_under_added_chat_messages() {
        let message = ChatMessage::new(ChatUser::new("alice"), ChatMessageContent::text("hi"));
        let envelope = Envelope::with_messages(vec![message.clone()]);

        let json: serde_json::Value = serde_json::from_slice(&envelope.encode().unwrap()).unwrap();
        assert_eq!(json["addedChatMessages"][0]["content"]["text"], "hi");
        assert_eq!(json["addedChatMessages"][0]["author"]["name"], "alice");

        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded.added_chat_messages, vec![message]);
    }

    #[test]
    fn unknown_event_kinds_are_ignored() {
        let frame = br#"{"addedChatMessages":[],"presence":{"hello":"x"}}"#;
        let envelope = Envelope::decode(frame).unwrap();
        assert!(envelope.is_empty());

        let envelope = Envelope::decode(b"{}").unwrap();
        assert!(envelope.is_empty());
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(Envelope::decode(b"not json").is_err());
        assert!(Envelope::decode(br#"{"addedChatMessages":[{"id":"nope"}]}"#).is_err());
    }
}
