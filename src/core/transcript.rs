//! Ordered, observable message list for one conversation.
//!
//! The store is the only owner of the live transcript. Readers get copies
//! through [`TranscriptStore::snapshot`]; writers go through `append`,
//! `update` and `clear`, each of which notifies every subscriber once the
//! mutation is fully applied.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::debug;

use crate::core::message::{Message, MessageId, MessageInput};

type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptError {
    UnknownMessage(MessageId),
}

impl fmt::Display for TranscriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptError::UnknownMessage(id) => write!(f, "No message with id {id}"),
        }
    }
}

impl std::error::Error for TranscriptError {}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Generates ids as `<random prefix>-<sequence>`. The sequence never repeats
/// for the lifetime of the generator.
struct IdGenerator {
    prefix: String,
    next: AtomicU64,
}

impl IdGenerator {
    fn new() -> Self {
        Self {
            prefix: random_prefix(),
            next: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> MessageId {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        MessageId::new(format!("{}-{seq:06}", self.prefix))
    }
}

fn random_prefix() -> String {
    let mut bytes = [0u8; 6];
    if getrandom::fill(&mut bytes).is_err() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let mixed = nanos ^ u128::from(std::process::id());
        bytes.copy_from_slice(&mixed.to_le_bytes()[..6]);
    }
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct TranscriptStore {
    messages: Mutex<Vec<Message>>,
    listeners: Arc<Mutex<Listeners>>,
    /// Serializes mutate-then-notify so listeners see mutations in order.
    writer: Mutex<()>,
    ids: IdGenerator,
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            writer: Mutex::new(()),
            ids: IdGenerator::new(),
        }
    }

    /// Append a message with a freshly generated id and return that id.
    pub fn append(&self, input: MessageInput) -> MessageId {
        let _writer = lock(&self.writer);
        let id = self.ids.next_id();
        lock(&self.messages).push(input.into_message(id.clone()));
        self.notify();
        id
    }

    /// Replace the content of the message with `id`.
    pub fn update(&self, id: &MessageId, content: impl Into<String>) -> Result<(), TranscriptError> {
        let _writer = lock(&self.writer);
        {
            let mut messages = lock(&self.messages);
            let message = messages
                .iter_mut()
                .find(|message| &message.id == id)
                .ok_or_else(|| TranscriptError::UnknownMessage(id.clone()))?;
            message.content = content.into();
        }
        self.notify();
        Ok(())
    }

    pub fn clear(&self) {
        let _writer = lock(&self.writer);
        let removed = {
            let mut messages = lock(&self.messages);
            let removed = messages.len();
            messages.clear();
            removed
        };
        debug!(removed, "Cleared transcript");
        self.notify();
    }

    /// Copy of the transcript in display order.
    pub fn snapshot(&self) -> Vec<Message> {
        lock(&self.messages).clone()
    }

    pub fn get(&self, id: &MessageId) -> Option<Message> {
        lock(&self.messages)
            .iter()
            .find(|message| &message.id == id)
            .cloned()
    }

    pub fn last(&self) -> Option<Message> {
        lock(&self.messages).last().cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.messages).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.messages).is_empty()
    }

    /// Register `listener` to run after every mutation.
    ///
    /// Listeners run on the mutating thread while writers are serialized, so
    /// they may read the store but must not call `append`, `update` or `clear`.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut listeners = lock(&self.listeners);
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.listeners).entries.len()
    }

    fn notify(&self) {
        // Clone out so listeners can subscribe or unsubscribe while running.
        let listeners: Vec<Listener> = lock(&self.listeners)
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener();
        }
    }
}

/// Handle returned by [`TranscriptStore::subscribe`].
#[must_use = "dropping a Subscription keeps the listener registered; call unsubscribe to remove it"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    /// Deregister the listener. Calling this again is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(listeners) = self.listeners.upgrade() {
            lock(&listeners).entries.retain(|(id, _)| *id != self.id);
        }
    }
}
