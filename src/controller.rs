//! The dissemination engine.
//!
//! Every node runs one [`ChatController`]. It owns the local user, the
//! message store and the observer list, and decides what gets relayed:
//! only messages that are new to this node are rebroadcast, so each node
//! relays a given message at most once and a flood always dies out.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use uuid::Uuid;

use crate::common::{ChatMessage, ChatMessageContent, ChatUser, Channel};
use crate::network::{ChatTransport, EnvelopeTransport};
use crate::protocol::Envelope;
use crate::storage::MessageStore;
use crate::sync::lock;

/// Observer invoked for every message the controller learns.
pub type MessageHandler = Arc<dyn Fn(&ChatMessage) + Send + Sync>;

/// Handle returned when registering an observer, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
    /// Rebroadcast the whole store whenever the transport reports a new link.
    pub replay_on_connect: bool,
}

struct State {
    me: ChatUser,
    store: MessageStore,
    /// Learned but not yet handed to observers, in learning order.
    pending: VecDeque<ChatMessage>,
    /// Set while some thread is delivering `pending`.
    draining: bool,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    handlers: Vec<(ListenerId, MessageHandler)>,
}

struct Inner {
    transport: EnvelopeTransport,
    state: Mutex<State>,
    listeners: Mutex<Listeners>,
}

/// Cheap to clone; all clones drive the same node.
#[derive(Clone)]
pub struct ChatController {
    inner: Arc<Inner>,
}

impl ChatController {
    pub fn new(transport: Arc<dyn ChatTransport>, me: ChatUser) -> Self {
        Self::with_config(transport, me, ControllerConfig::default())
    }

    pub fn with_config(transport: Arc<dyn ChatTransport>, me: ChatUser, config: ControllerConfig) -> Self {
        Self::with_history(transport, me, config, Vec::new())
    }

    /// Like [`ChatController::with_config`], but the store already holds
    /// `history` when the transport handlers are registered, so a replay
    /// triggered by the very first link includes it. Imported messages are
    /// neither relayed nor notified.
    pub fn with_history(
        transport: Arc<dyn ChatTransport>,
        me: ChatUser,
        config: ControllerConfig,
        history: impl IntoIterator<Item = ChatMessage>,
    ) -> Self {
        let mut store = MessageStore::new();
        let imported = history
            .into_iter()
            .filter(|message| store.insert(message.clone()))
            .count();
        if imported > 0 {
            log::info!("Seeded store with {imported} message(s) from history");
        }

        let inner = Arc::new(Inner {
            transport: EnvelopeTransport::new(transport),
            state: Mutex::new(State {
                me,
                store,
                pending: VecDeque::new(),
                draining: false,
            }),
            listeners: Mutex::new(Listeners::default()),
        });

        // The transport holds these closures, so they must not keep the node alive.
        let weak = Arc::downgrade(&inner);
        inner.transport.on_receive(move |envelope| {
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.handle_receive(envelope);
            }
        });

        if config.replay_on_connect {
            let weak = Arc::downgrade(&inner);
            inner.transport.on_peer_connected(move |peer| {
                if let Some(inner) = Weak::upgrade(&weak) {
                    log::info!("Link to {peer} came up, replaying known messages");
                    inner.replay();
                }
            });
        }

        Self { inner }
    }

    /// Merges an inbound envelope and relays whatever was new.
    pub fn handle_receive(&self, envelope: Envelope) {
        self.inner.handle_receive(envelope);
    }

    /// Authors a message as the local user and broadcasts it.
    pub fn send(&self, content: ChatMessageContent) -> ChatMessage {
        let message = {
            let mut state = lock(&self.inner.state);
            let message = ChatMessage::new(state.me.clone(), content);
            state.store.insert(message.clone());
            self.inner
                .transport
                .broadcast(&Envelope::with_messages(vec![message.clone()]));
            state.pending.push_back(message.clone());
            message
        };

        log::info!("Sent message {} to {}", message.id, message.content.channel());
        self.inner.drain();
        message
    }

    /// Registers an observer. Observers run synchronously, in registration
    /// order, and see messages in the order the store learned them. When
    /// several threads learn messages at once, the one already delivering
    /// also delivers the others' messages; a `send` from inside an observer
    /// is delivered after the current message.
    pub fn on_add_chat_message<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        let mut listeners = lock(&self.inner.listeners);
        let id = ListenerId(listeners.next_id);
        listeners.next_id += 1;
        listeners.handlers.push((id, Arc::new(handler)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.inner.listeners);
        let before = listeners.handlers.len();
        listeners.handlers.retain(|(listener, _)| *listener != id);
        listeners.handlers.len() != before
    }

    /// Renames the local user for messages sent from now on.
    pub fn update_name(&self, name: impl Into<String>) {
        let mut state = lock(&self.inner.state);
        state.me.name = name.into();
        log::info!("Local user {} is now called {}", state.me.id, state.me.name);
    }

    pub fn me(&self) -> ChatUser {
        lock(&self.inner.state).me.clone()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        lock(&self.inner.state).store.contains(id)
    }

    pub fn message(&self, id: &Uuid) -> Option<ChatMessage> {
        lock(&self.inner.state).store.get(id).cloned()
    }

    /// Snapshot of the store in learning order, optionally for one channel.
    pub fn messages(&self, channel: Option<Channel<'_>>) -> Vec<ChatMessage> {
        lock(&self.inner.state).store.all(channel).cloned().collect()
    }

    pub fn message_count(&self) -> usize {
        lock(&self.inner.state).store.len()
    }

    /// Seeds the store from persisted history without notifying or relaying.
    pub fn import_history(&self, messages: impl IntoIterator<Item = ChatMessage>) -> usize {
        let mut state = lock(&self.inner.state);
        messages
            .into_iter()
            .filter(|message| state.store.insert(message.clone()))
            .count()
    }

    /// Broadcasts every known message once.
    pub fn replay(&self) {
        self.inner.replay();
    }
}

impl Inner {
    fn handle_receive(&self, envelope: Envelope) {
        let received = envelope.added_chat_messages.len();
        {
            let mut state = lock(&self.state);
            let mut newly_learned = Vec::new();
            for message in envelope.added_chat_messages {
                if state.store.insert(message.clone()) {
                    newly_learned.push(message);
                }
            }

            if newly_learned.is_empty() {
                log::debug!("Envelope with {received} known message(s) dropped");
                return;
            }

            // Relay under the lock so relays leave in the order they were accepted.
            log::debug!(
                "Relaying {} new of {received} received message(s)",
                newly_learned.len()
            );
            self.transport
                .broadcast(&Envelope::with_messages(newly_learned.clone()));
            state.pending.extend(newly_learned);
        }

        self.drain();
    }

    /// Hands queued messages to observers, one drainer at a time. Observers
    /// run without any lock held.
    fn drain(&self) {
        {
            let mut state = lock(&self.state);
            if state.draining {
                return;
            }
            state.draining = true;
        }
        let _reset = DrainReset(self);

        while let Some(message) = self.next_pending() {
            let handlers: Vec<MessageHandler> = lock(&self.listeners)
                .handlers
                .iter()
                .map(|(_, handler)| handler.clone())
                .collect();
            for handler in &handlers {
                handler(&message);
            }
        }
    }

    /// Pops the next queued message, releasing the drainer role once empty.
    fn next_pending(&self) -> Option<ChatMessage> {
        let mut state = lock(&self.state);
        let next = state.pending.pop_front();
        if next.is_none() {
            state.draining = false;
        }
        next
    }

    fn replay(&self) {
        let state = lock(&self.state);
        if state.store.is_empty() {
            return;
        }
        let envelope = Envelope::with_messages(state.store.all(None).cloned().collect());
        self.transport.broadcast(&envelope);
    }
}

/// Releases the drainer role if an observer panics mid-delivery.
struct DrainReset<'a>(&'a Inner);

impl Drop for DrainReset<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            lock(&self.0.state).draining = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::RecordingTransport;

    fn node(name: &str) -> (ChatController, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new());
        let controller = ChatController::new(transport.clone(), ChatUser::new(name));
        (controller, transport)
    }

    fn collect(controller: &ChatController) -> Arc<Mutex<Vec<ChatMessage>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        controller.on_add_chat_message(move |message| sink.lock().unwrap().push(message.clone()));
        seen
    }

    fn remote(text: &str) -> ChatMessage {
        ChatMessage::new(ChatUser::new("remote"), ChatMessageContent::text(text))
    }

    #[test]
    fn send_stores_notifies_and_broadcasts_once() {
        let (alice, transport) = node("alice");
        let seen = collect(&alice);

        let sent = alice.send(ChatMessageContent::text("hi"));

        let stored = alice.messages(None);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content.text, "hi");
        assert_eq!(stored[0].content.channel, None);
        assert_eq!(stored[0].content.reply_to, None);
        assert_eq!(stored[0].author, alice.me());

        let envelopes = transport.sent_envelopes();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].added_chat_messages, vec![sent.clone()]);

        assert_eq!(*seen.lock().unwrap(), vec![sent]);
    }

    #[test]
    fn new_messages_are_notified_in_order_and_relayed() {
        let (bob, transport) = node("bob");
        let seen = collect(&bob);
        let first = remote("one");
        let second = remote("two");

        transport.inject_envelope(&Envelope::with_messages(vec![first.clone(), second.clone()]));

        assert_eq!(*seen.lock().unwrap(), vec![first.clone(), second.clone()]);
        let relayed = transport.sent_envelopes();
        assert_eq!(relayed.len(), 1);
        assert_eq!(relayed[0].added_chat_messages, vec![first, second]);
    }

    #[test]
    fn known_message_is_dropped_without_relay() {
        let (bob, transport) = node("bob");
        let message = remote("hello");
        transport.inject_envelope(&Envelope::with_messages(vec![message.clone()]));
        let seen = collect(&bob);
        let size_before = bob.message_count();
        let broadcasts_before = transport.broadcast_count();

        transport.inject_envelope(&Envelope::with_messages(vec![message]));

        assert_eq!(bob.message_count(), size_before);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(transport.broadcast_count(), broadcasts_before);
    }

    #[test]
    fn only_the_new_subset_is_relayed() {
        let (bob, transport) = node("bob");
        let known = remote("known");
        let fresh = remote("fresh");
        bob.handle_receive(Envelope::with_messages(vec![known.clone()]));

        bob.handle_receive(Envelope::with_messages(vec![known.clone(), fresh.clone(), fresh.clone()]));

        let relayed = transport.sent_envelopes();
        assert_eq!(relayed.len(), 2);
        assert_eq!(relayed[1].added_chat_messages, vec![fresh]);
        assert_eq!(bob.message_count(), 2);
    }

    #[test]
    fn own_message_echoed_back_is_not_relayed() {
        let (alice, transport) = node("alice");
        let sent = alice.send(ChatMessageContent::text("ping"));

        transport.inject_envelope(&Envelope::with_messages(vec![sent]));

        assert_eq!(transport.broadcast_count(), 1);
        assert_eq!(alice.message_count(), 1);
    }

    #[test]
    fn rename_does_not_touch_sent_messages() {
        let (alice, _transport) = node("alice");
        let before = alice.send(ChatMessageContent::text("first"));

        alice.update_name("alicia");
        let after = alice.send(ChatMessageContent::text("second"));

        assert_eq!(alice.message(&before.id).unwrap().author.name, "alice");
        assert_eq!(after.author.name, "alicia");
        assert_eq!(after.author.id, before.author.id);
        assert_eq!(alice.me().name, "alicia");
    }

    #[test]
    fn rename_sends_nothing() {
        let (alice, transport) = node("alice");
        alice.update_name("alicia");
        assert_eq!(transport.broadcast_count(), 0);
    }

    #[test]
    fn observers_run_in_registration_order_and_can_be_removed() {
        let (alice, _transport) = node("alice");
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = order.clone();
        let id = alice.on_add_chat_message(move |_| first.lock().unwrap().push("first"));
        let second = order.clone();
        alice.on_add_chat_message(move |_| second.lock().unwrap().push("second"));

        alice.send(ChatMessageContent::text("a"));
        assert!(alice.remove_listener(id));
        assert!(!alice.remove_listener(id));
        alice.send(ChatMessageContent::text("b"));

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "second"]);
    }

    #[test]
    fn observer_may_send_from_inside_the_callback() {
        let (bob, transport) = node("bob");
        let replier = bob.clone();
        bob.on_add_chat_message(move |message| {
            if message.author.name == "remote" {
                replier.send(ChatMessageContent::text("ack").replying_to(message.id));
            }
        });

        let incoming = remote("question");
        transport.inject_envelope(&Envelope::with_messages(vec![incoming.clone()]));

        let replies: Vec<_> = bob
            .messages(None)
            .into_iter()
            .filter(|message| message.content.reply_to == Some(incoming.id))
            .collect();
        assert_eq!(replies.len(), 1);
        assert_eq!(transport.broadcast_count(), 2);
    }

    #[test]
    fn imported_history_is_silent() {
        let (bob, transport) = node("bob");
        let seen = collect(&bob);
        let old = remote("old");

        assert_eq!(bob.import_history(vec![old.clone(), old.clone()]), 1);

        assert!(bob.contains(&old.id));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(transport.broadcast_count(), 0);

        // Already known, so a later delivery is not relayed either.
        transport.inject_envelope(&Envelope::with_messages(vec![old]));
        assert_eq!(transport.broadcast_count(), 0);
    }

    #[test]
    fn replay_on_connect_rebroadcasts_the_store() {
        let transport = Arc::new(RecordingTransport::new());
        let config = ControllerConfig {
            replay_on_connect: true,
        };
        let alice = ChatController::with_config(transport.clone(), ChatUser::new("alice"), config);

        transport.connect_peer("bob");
        assert_eq!(transport.broadcast_count(), 0);

        let first = alice.send(ChatMessageContent::text("one"));
        let second = alice.send(ChatMessageContent::text("two"));
        transport.connect_peer("bob");

        let envelopes = transport.sent_envelopes();
        assert_eq!(envelopes.len(), 3);
        assert_eq!(envelopes[2].added_chat_messages, vec![first, second]);
    }

    #[test]
    fn replay_is_off_by_default() {
        let (alice, transport) = node("alice");
        alice.send(ChatMessageContent::text("one"));
        transport.connect_peer("bob");
        assert_eq!(transport.broadcast_count(), 1);
    }

    #[test]
    fn dropped_controller_ignores_late_frames() {
        let (alice, transport) = node("alice");
        drop(alice);
        transport.inject_envelope(&Envelope::with_messages(vec![remote("late")]));
        assert_eq!(transport.broadcast_count(), 0);
    }

    #[test]
    fn concurrent_learners_notify_in_store_order() {
        use std::sync::mpsc;

        let (bob, _transport) = node("bob");
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let entered_tx = Mutex::new(entered_tx);
        let release_rx = Mutex::new(release_rx);
        let order = Arc::new(Mutex::new(Vec::new()));

        let sink = order.clone();
        bob.on_add_chat_message(move |message| {
            if message.content.text == "first" {
                entered_tx.lock().unwrap().send(()).unwrap();
                release_rx.lock().unwrap().recv().unwrap();
            }
            sink.lock().unwrap().push(message.content.text.clone());
        });

        let first = remote("first");
        let second = remote("second");
        let worker = {
            let bob = bob.clone();
            let first = first.clone();
            thread::spawn(move || bob.handle_receive(Envelope::with_messages(vec![first])))
        };

        // The worker is now parked inside the observer for "first".
        entered_rx.recv().unwrap();
        bob.handle_receive(Envelope::with_messages(vec![second.clone()]));
        release_tx.send(()).unwrap();
        worker.join().unwrap();

        let stored: Vec<String> = bob.messages(None).into_iter().map(|m| m.content.text).collect();
        assert_eq!(stored, vec!["first", "second"]);
        assert_eq!(*order.lock().unwrap(), stored);
    }

    #[test]
    fn send_from_an_observer_is_delivered_after_the_current_message() {
        let (bob, _transport) = node("bob");
        let replier = bob.clone();
        let order = Arc::new(Mutex::new(Vec::new()));

        let sink = order.clone();
        bob.on_add_chat_message(move |message| {
            sink.lock().unwrap().push(format!("a:{}", message.content.text));
            if message.content.text == "question" {
                replier.send(ChatMessageContent::text("ack"));
            }
        });
        let sink = order.clone();
        bob.on_add_chat_message(move |message| sink.lock().unwrap().push(format!("b:{}", message.content.text)));

        bob.handle_receive(Envelope::with_messages(vec![remote("question")]));

        assert_eq!(
            *order.lock().unwrap(),
            vec!["a:question", "b:question", "a:ack", "b:ack"]
        );
    }

    #[test]
    fn panicking_observer_does_not_stall_later_deliveries() {
        let (bob, _transport) = node("bob");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bob.on_add_chat_message(move |message| {
            if message.content.text == "boom" {
                panic!("observer failure");
            }
            sink.lock().unwrap().push(message.content.text.clone());
        });

        let crashing = bob.clone();
        let result = thread::spawn(move || crashing.handle_receive(Envelope::with_messages(vec![remote("boom")]))).join();
        assert!(result.is_err());

        bob.handle_receive(Envelope::with_messages(vec![remote("after")]));
        assert_eq!(*seen.lock().unwrap(), vec!["after".to_string()]);
    }

    #[test]
    fn history_is_in_the_store_before_the_first_link_replays() {
        let transport = Arc::new(RecordingTransport::new());
        transport.connect_on_start("bob");
        let old = remote("old");
        let config = ControllerConfig {
            replay_on_connect: true,
        };

        let alice = ChatController::with_history(
            transport.clone(),
            ChatUser::new("alice"),
            config,
            vec![old.clone(), old.clone()],
        );
        let seen = collect(&alice);
        assert_eq!(alice.message_count(), 1);
        assert_eq!(transport.broadcast_count(), 0);

        transport.start();

        let envelopes = transport.sent_envelopes();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].added_chat_messages, vec![old]);
        assert!(seen.lock().unwrap().is_empty());
    }
}
