use crate::bus::Message;
use chrono::{DateTime, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;

const MAX_CACHED_CONVERSATIONS: usize = 512;
const MAX_CONVERSATION_MESSAGES: usize = 200;

/// One buyer↔seller message thread. Messages arrive in network order, which
/// is not necessarily send order, so inserts keep the list sorted by
/// timestamp and drop ids already present.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub account_id: String,
    pub messages: Vec<Message>,
    /// Set when the buyer spoke last and we have not replied yet.
    pub awaiting_reply: bool,
    /// Price-haggling rounds consumed so far.
    pub bargain_rounds: u32,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: String, account_id: String) -> Self {
        Self {
            id,
            account_id,
            messages: Vec::new(),
            awaiting_reply: false,
            bargain_rounds: 0,
            updated_at: Utc::now(),
        }
    }

    /// Insert a message in timestamp order. Returns false for a duplicate id.
    pub fn record_message(&mut self, msg: Message) -> bool {
        if self.messages.iter().any(|m| m.id == msg.id) {
            return false;
        }
        let pos = self
            .messages
            .iter()
            .rposition(|m| m.timestamp <= msg.timestamp)
            .map_or(0, |p| p + 1);
        self.messages.insert(pos, msg);
        self.updated_at = Utc::now();

        // Prune oldest messages
        if self.messages.len() > MAX_CONVERSATION_MESSAGES {
            let drain_count = self.messages.len() - MAX_CONVERSATION_MESSAGES;
            self.messages.drain(..drain_count);
        }
        true
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Bounded per-pipeline conversation cache. Each account worker owns its own
/// store, so no locking is needed here.
pub struct ConversationStore {
    cache: LruCache<String, Conversation>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::with_capacity(MAX_CACHED_CONVERSATIONS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            cache: LruCache::new(capacity),
        }
    }

    pub fn get_or_create(&mut self, account_id: &str, conversation_id: &str) -> &mut Conversation {
        let key = format!("{}:{}", account_id, conversation_id);
        if !self.cache.contains(&key) {
            self.cache.put(
                key.clone(),
                Conversation::new(conversation_id.to_string(), account_id.to_string()),
            );
        }
        self.cache.get_mut(&key).expect("just inserted")
    }

    pub fn get(&mut self, account_id: &str, conversation_id: &str) -> Option<&Conversation> {
        let key = format!("{}:{}", account_id, conversation_id);
        self.cache.get(&key)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}
