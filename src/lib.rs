//! Core of a serverless mesh chat: messages spread by gossip, each node
//! relaying what it has not seen before to its direct neighbors.

pub mod common;
pub mod config;
pub mod controller;
pub mod error;
pub mod network;
pub mod protocol;
pub mod simulation;
pub mod storage;
pub mod ui;

pub(crate) mod sync;

pub use common::{ChatAttachment, ChatMessage, ChatMessageContent, ChatUser, Channel};
pub use controller::{ChatController, ControllerConfig, ListenerId};
pub use error::{ChatError, ChatResult};
pub use protocol::Envelope;
