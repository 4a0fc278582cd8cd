use crate::bus::{Event, Intent, Message, OrderEvent, OrderEventKind, RawEvent};
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde_json::Value;
use std::num::NonZeroUsize;
use thiserror::Error;

/// Non-fatal normalization failures. Both are logged and the event dropped;
/// neither tears down the account pipeline.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("unknown event type: {0}")]
    UnknownEventType(String),
}

/// Converts raw feed payloads into canonical events and suppresses
/// duplicates via a bounded recent-id cache (evicted oldest-first). One
/// normalizer per account pipeline — the cache is never shared.
pub struct Normalizer {
    recent_ids: LruCache<String, ()>,
}

impl Normalizer {
    pub fn new(dedup_cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(dedup_cache_size.max(1)).expect("capacity is at least 1");
        Self {
            recent_ids: LruCache::new(capacity),
        }
    }

    /// `Ok(None)` means "nothing to dispatch": a keepalive ping or a
    /// duplicate message. Duplicates are a no-op by contract, not an error.
    pub fn normalize(&mut self, raw: &RawEvent) -> Result<Option<Event>, NormalizeError> {
        let kind = raw
            .payload
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| NormalizeError::MalformedPayload("missing 'type'".into()))?;

        match kind {
            "message" => self.normalize_message(raw),
            "order" => normalize_order(raw).map(Some),
            // Keepalives refresh the heartbeat upstream; nothing to dispatch.
            "ping" => Ok(None),
            other => Err(NormalizeError::UnknownEventType(other.to_string())),
        }
    }

    fn normalize_message(&mut self, raw: &RawEvent) -> Result<Option<Event>, NormalizeError> {
        let id = required_str(&raw.payload, "messageId")?;
        let conversation_id = required_str(&raw.payload, "conversationId")?;
        let sender_id = required_str(&raw.payload, "senderId")?;
        let content = required_str(&raw.payload, "content")?;

        let msg = Message {
            intent: classify_intent(&content),
            timestamp: parse_timestamp(&raw.payload).unwrap_or(raw.received_at),
            id,
            conversation_id,
            account_id: raw.account_id.clone(),
            sender_id,
            content,
        };

        let key = msg.dedup_key();
        if self.recent_ids.contains(&key) {
            return Ok(None);
        }
        self.recent_ids.put(key, ());
        Ok(Some(Event::Message(msg)))
    }
}

fn normalize_order(raw: &RawEvent) -> Result<Event, NormalizeError> {
    let order_id = required_str(&raw.payload, "orderId")?;
    let item_id = required_str(&raw.payload, "itemId")?;
    let status = required_str(&raw.payload, "status")?;

    let kind = match status.as_str() {
        "created" => OrderEventKind::Created,
        "paid" => OrderEventKind::Paid,
        "confirmed" => OrderEventKind::Confirmed,
        "closed" => OrderEventKind::Closed,
        "cancelled" => OrderEventKind::Cancelled,
        other => {
            return Err(NormalizeError::UnknownEventType(format!(
                "order status '{}'",
                other
            )));
        }
    };

    Ok(Event::Order(OrderEvent {
        order_id,
        account_id: raw.account_id.clone(),
        item_id,
        item_title: raw
            .payload
            .get("itemTitle")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        kind,
        timestamp: parse_timestamp(&raw.payload).unwrap_or(raw.received_at),
    }))
}

fn required_str(payload: &Value, field: &str) -> Result<String, NormalizeError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| NormalizeError::MalformedPayload(format!("missing '{}'", field)))
}

fn parse_timestamp(payload: &Value) -> Option<DateTime<Utc>> {
    payload
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Deterministic keyword classification. Checked in a fixed order so the
/// same content always gets the same intent.
pub fn classify_intent(content: &str) -> Intent {
    const ORDER_WORDS: &[&str] = &[
        "订单", "发货", "付款", "快递", "物流", "单号", "退款", "order", "shipping", "refund",
    ];
    const GREETING_WORDS: &[&str] = &["你好", "您好", "在吗", "在不在", "hello", "hi"];
    const QUESTION_WORDS: &[&str] = &["多少", "怎么", "什么", "能不能", "可以", "吗"];

    if ORDER_WORDS.iter().any(|w| content.contains(w)) {
        return Intent::OrderRelated;
    }
    if content.contains('?')
        || content.contains('？')
        || QUESTION_WORDS.iter().any(|w| content.contains(w))
    {
        return Intent::Question;
    }
    if GREETING_WORDS.iter().any(|w| content.contains(w)) {
        return Intent::Greeting;
    }
    Intent::Unknown
}
