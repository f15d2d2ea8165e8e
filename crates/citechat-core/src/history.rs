//! Live, shared conversation history

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::message::ChatMessage;

/// The visible message sequence of one conversation.
///
/// Clones share the same underlying sequence, so a history handed out by the
/// history store and mutated by a chat session is observed by every holder.
/// Every mutation bumps a revision counter that can be watched.
#[derive(Clone)]
pub struct ChatHistory {
    messages: Arc<RwLock<Vec<ChatMessage>>>,
    revision: Arc<watch::Sender<u64>>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::with_messages(Vec::new())
    }

    pub fn with_messages(messages: Vec<ChatMessage>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            messages: Arc::new(RwLock::new(messages)),
            revision: Arc::new(revision),
        }
    }

    pub fn push(&self, message: ChatMessage) {
        self.messages.write().push(message);
        self.bump();
    }

    pub fn replace_all(&self, messages: Vec<ChatMessage>) {
        *self.messages.write() = messages;
        self.bump();
    }

    pub fn clear(&self) {
        self.messages.write().clear();
        self.bump();
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.read().clone()
    }

    /// Messages that may be sent to the model or written to storage.
    pub fn conversational_messages(&self) -> Vec<ChatMessage> {
        self.messages
            .read()
            .iter()
            .filter(|m| m.is_conversational())
            .cloned()
            .collect()
    }

    pub fn last(&self) -> Option<ChatMessage> {
        self.messages.read().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both handles point at the same live sequence.
    pub fn same_history(&self, other: &ChatHistory) -> bool {
        Arc::ptr_eq(&self.messages, &other.messages)
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }
}

impl Default for ChatHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChatHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatHistory")
            .field("len", &self.len())
            .field("revision", &self.revision())
            .finish()
    }
}
