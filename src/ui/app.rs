use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::common::{ChatAttachment, ChatEvent, ChatMessage, ChatMessageContent};
use crate::controller::ChatController;
use crate::error::ChatResult;
use crate::network::ChatTransport;
use crate::storage::HistoryDatabase;
use crate::sync::lock;

use super::input::{HELP, InputCommand, parse_line};
use super::state::{AppState, resolve_prefix, short_id};

/// Line-oriented terminal front end.
pub struct ChatApp {
    controller: ChatController,
    state: AppState,
    history: Option<Arc<Mutex<HistoryDatabase>>>,
    event_receiver: mpsc::UnboundedReceiver<ChatEvent>,
}

impl ChatApp {
    pub fn new(controller: ChatController, transport: &dyn ChatTransport) -> Self {
        let (event_sender, event_receiver) = mpsc::unbounded_channel();

        let sender = event_sender.clone();
        controller.on_add_chat_message(move |message| {
            let _ = sender.send(ChatEvent::MessageAdded(message.clone()));
        });
        transport.on_peer_connected(Arc::new(move |peer: &str| {
            let _ = event_sender.send(ChatEvent::PeerConnected(peer.to_string()));
        }));

        Self {
            controller,
            state: AppState::new(),
            history: None,
            event_receiver,
        }
    }

    /// Renames are written back to this database.
    pub fn with_history(mut self, history: Arc<Mutex<HistoryDatabase>>) -> Self {
        self.history = Some(history);
        self
    }

    pub async fn run(mut self) -> ChatResult<()> {
        let me = self.controller.me();
        println!("Signed in as {} ({})", me.name, short_id(&me.id));
        println!("{HELP}");
        self.print_history();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => {
                        if !self.handle_input(parse_line(&line)) {
                            break;
                        }
                    }
                    None => break,
                },
                Some(event) = self.event_receiver.recv() => self.handle_event(event),
            }
        }
        Ok(())
    }

    fn handle_event(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::MessageAdded(message) => {
                if self.state.is_visible(&message) {
                    println!("{}", render_message(&message));
                } else {
                    println!("(new message in {})", message.content.channel());
                }
            }
            ChatEvent::PeerConnected(peer) => {
                if self.state.add_peer(peer.clone()) {
                    println!("* connected to {peer}");
                }
            }
        }
    }

    /// Returns `false` once the user asked to leave.
    fn handle_input(&mut self, command: InputCommand) -> bool {
        match command {
            InputCommand::Send(text) => {
                self.controller.send(self.compose(text));
            }
            InputCommand::Name(name) => {
                self.controller.update_name(name);
                let me = self.controller.me();
                if let Some(history) = &self.history {
                    if let Err(err) = lock(history).save_identity(&me) {
                        log::warn!("Failed to persist display name: {err}");
                    }
                }
                println!("* you are now {}", me.name);
            }
            InputCommand::Channel(channel) => {
                self.state.channel = channel;
                println!("* switched to {}", self.state.current_channel());
                self.print_history();
            }
            InputCommand::Reply { prefix, text } => {
                let messages = self.controller.messages(None);
                match resolve_prefix(&messages, &prefix) {
                    Ok(parent) => {
                        self.controller.send(self.compose(text).replying_to(parent.id));
                    }
                    Err(reason) => println!("! {reason}"),
                }
            }
            InputCommand::Attach { path, text } => match ChatAttachment::from_path(&path) {
                Ok(attachment) => {
                    self.controller.send(self.compose(text).with_attachment(attachment));
                }
                Err(err) => println!("! cannot attach {path}: {err}"),
            },
            InputCommand::History => self.print_history(),
            InputCommand::Peers => {
                if self.state.peers.is_empty() {
                    println!("* no peers yet");
                }
                for peer in &self.state.peers {
                    println!("* {peer}");
                }
            }
            InputCommand::Help => println!("{HELP}"),
            InputCommand::Quit => return false,
            InputCommand::Empty => {}
            InputCommand::Invalid(reason) => println!("! {reason}"),
        }
        true
    }

    fn compose(&self, text: String) -> ChatMessageContent {
        let content = ChatMessageContent::text(text);
        match &self.state.channel {
            Some(channel) => content.in_channel(channel.clone()),
            None => content,
        }
    }

    fn print_history(&self) {
        for message in self.controller.messages(Some(self.state.current_channel())) {
            println!("{}", render_message(&message));
        }
    }
}

fn render_message(message: &ChatMessage) -> String {
    let mut line = format!(
        "[{}] {} <{}> {}",
        message.timestamp.format("%H:%M:%S"),
        short_id(&message.id),
        message.author.name,
        message.content.text
    );
    if let Some(parent) = &message.content.reply_to {
        line.push_str(&format!(" (re {})", short_id(parent)));
    }
    for attachment in &message.content.attachments {
        let size = attachment.data().map(|data| data.len()).unwrap_or(0);
        line.push_str(&format!(
            " [{} {}, {size} bytes]",
            attachment.name,
            attachment.mime_type().unwrap_or("unknown")
        ));
    }
    line
}
