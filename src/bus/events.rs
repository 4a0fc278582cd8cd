use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An event exactly as it came off an account's feed, before normalization.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub account_id: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl RawEvent {
    pub fn new(account_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            account_id: account_id.into(),
            payload,
            received_at: Utc::now(),
        }
    }
}

/// Coarse intent of a buyer message, classified deterministically from its
/// content. Used by reply rules and by the bargain-round counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Greeting,
    Question,
    OrderRelated,
    Unknown,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Greeting => "greeting",
            Intent::Question => "question",
            Intent::OrderRelated => "order_related",
            Intent::Unknown => "unknown",
        }
    }
}

/// A buyer message after normalization. Immutable from here on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub account_id: String,
    pub sender_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub intent: Intent,
}

impl Message {
    /// Key identifying the conversation across the whole engine.
    pub fn conversation_key(&self) -> String {
        format!("{}:{}", self.account_id, self.conversation_id)
    }

    /// Key used for duplicate suppression. Message ids are unique per
    /// account+conversation, so the conversation id is part of the key.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}", self.conversation_id, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderEventKind {
    Created,
    Paid,
    /// Remote side confirmed receipt of the shipment.
    Confirmed,
    Closed,
    Cancelled,
}

/// An order lifecycle event from the feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: String,
    pub account_id: String,
    pub item_id: String,
    #[serde(default)]
    pub item_title: Option<String>,
    pub kind: OrderEventKind,
    pub timestamp: DateTime<Utc>,
}

/// A normalized feed event: either a buyer message or an order transition.
#[derive(Debug, Clone)]
pub enum Event {
    Message(Message),
    Order(OrderEvent),
}

impl Event {
    pub fn account_id(&self) -> &str {
        match self {
            Event::Message(m) => &m.account_id,
            Event::Order(o) => &o.account_id,
        }
    }

    /// Order events and order-intent messages are never dropped under
    /// queue pressure.
    pub fn is_order_related(&self) -> bool {
        match self {
            Event::Order(_) => true,
            Event::Message(m) => m.intent == Intent::OrderRelated,
        }
    }
}
