pub mod events;
pub mod types;

pub use events::ChatEvent;
pub use types::{
    ChatAttachment, ChatMessage, ChatMessageContent, ChatUser, Channel, GLOBAL_CHANNEL_NAME,
};
