use std::fmt;
use std::fs;
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};

/// Display name of the channel used when a message names none.
pub const GLOBAL_CHANNEL_NAME: &str = "global";

const DEFAULT_USER_NAME: &str = "Anonymous";

/// A chat participant. Messages carry a copy of this, never a reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: Uuid,
    pub name: String,
}

impl ChatUser {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }

    pub fn with_id(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl Default for ChatUser {
    fn default() -> Self {
        Self::new(DEFAULT_USER_NAME)
    }
}

/// A file attached to a message. `url` is usually an inline `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatAttachment {
    pub name: String,
    pub url: String,
}

impl ChatAttachment {
    /// Wraps raw bytes into a `data:<mime>;base64,...` URL.
    pub fn inline(name: impl Into<String>, mime_type: &str, data: &[u8]) -> Self {
        Self {
            name: name.into(),
            url: format!("data:{mime_type};base64,{}", STANDARD.encode(data)),
        }
    }

    /// Reads a file from disk and inlines it.
    pub fn from_path(path: impl AsRef<Path>) -> ChatResult<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ChatError::Attachment(format!("{} has no file name", path.display())))?;
        let data = fs::read(path)?;
        Ok(Self::inline(name, mime_type_for(path), &data))
    }

    pub fn mime_type(&self) -> Option<&str> {
        let header = self.url.strip_prefix("data:")?.split(',').next()?;
        Some(header.split(';').next().unwrap_or(header))
    }

    /// Decodes the payload of an inline attachment.
    pub fn data(&self) -> ChatResult<Vec<u8>> {
        let rest = self
            .url
            .strip_prefix("data:")
            .ok_or_else(|| ChatError::Attachment(format!("{} is not an inline attachment", self.name)))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| ChatError::Attachment(format!("{} has no payload", self.name)))?;
        // Only base64 payloads are produced by `inline`; percent-encoded ones are refused.
        if !header.ends_with(";base64") {
            return Err(ChatError::Attachment(format!("{} is not base64 encoded", self.name)));
        }
        STANDARD
            .decode(payload)
            .map_err(|err| ChatError::Attachment(format!("{}: {err}", self.name)))
    }
}

fn mime_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("txt") | Some("md") => "text/plain",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Which channel a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel<'a> {
    Global,
    Named(&'a str),
}

impl<'a> Channel<'a> {
    pub fn from_name(name: Option<&'a str>) -> Self {
        match name {
            Some(name) => Channel::Named(name),
            None => Channel::Global,
        }
    }

    pub fn name(&self) -> Option<&'a str> {
        match *self {
            Channel::Global => None,
            Channel::Named(name) => Some(name),
        }
    }
}

impl fmt::Display for Channel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.name().unwrap_or(GLOBAL_CHANNEL_NAME))
    }
}

/// What the author actually wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageContent {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<ChatAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Uuid>,
}

impl ChatMessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn in_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn replying_to(mut self, id: Uuid) -> Self {
        self.reply_to = Some(id);
        self
    }

    pub fn with_attachment(mut self, attachment: ChatAttachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn channel(&self) -> Channel<'_> {
        Channel::from_name(self.channel.as_deref())
    }
}

/// An authored message. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub author: ChatUser,
    pub content: ChatMessageContent,
}

impl ChatMessage {
    /// Creates a message with a fresh random id, stamped now.
    pub fn new(author: ChatUser, content: ChatMessageContent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            author,
            content,
        }
    }
}
