#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use stallbot::api::MarketplaceApi;
use stallbot::bus::RawEvent;
use stallbot::config::{Config, EngineConfig, ReplyConfig, ReplyRuleConfig, RuleConditionConfig};
use stallbot::creds::{CredentialStore, Token};
use stallbot::errors::{StallbotError, StallbotResult};
use stallbot::feed::{FeedHandle, MarketplaceFeed};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// What one `open()` call on the scripted feed should do.
pub enum FeedScript {
    /// Refuse the connection.
    ConnectError,
    /// Deliver these payloads in order, then hold the stream open forever.
    Session(Vec<Value>),
}

/// Scripted marketplace feed: each account has a queue of sessions; once the
/// queue is empty every further connect attempt fails. Accounts without a
/// script always fail to connect.
#[derive(Default)]
pub struct ScriptFeed {
    scripts: Mutex<HashMap<String, VecDeque<FeedScript>>>,
}

impl ScriptFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, account_id: &str, script: FeedScript) {
        self.scripts
            .lock()
            .expect("script lock")
            .entry(account_id.to_string())
            .or_default()
            .push_back(script);
    }
}

#[async_trait]
impl MarketplaceFeed for ScriptFeed {
    async fn open(&self, account_id: &str, _token: &Token) -> StallbotResult<Box<dyn FeedHandle>> {
        let next = self
            .scripts
            .lock()
            .expect("script lock")
            .get_mut(account_id)
            .and_then(VecDeque::pop_front);
        match next {
            Some(FeedScript::Session(payloads)) => Ok(Box::new(ScriptHandle {
                account_id: account_id.to_string(),
                payloads: payloads.into(),
            })),
            Some(FeedScript::ConnectError) | None => Err(StallbotError::Network {
                message: "scripted connect failure".into(),
                retryable: true,
            }),
        }
    }
}

struct ScriptHandle {
    account_id: String,
    payloads: VecDeque<Value>,
}

#[async_trait]
impl FeedHandle for ScriptHandle {
    async fn next_event(&mut self) -> StallbotResult<Option<RawEvent>> {
        match self.payloads.pop_front() {
            Some(payload) => Ok(Some(RawEvent::new(self.account_id.clone(), payload))),
            // Stream stays open with nothing more to say.
            None => std::future::pending().await,
        }
    }
}

/// Marketplace API stub recording every call; ship calls can be scripted to
/// fail a number of times first.
pub struct RecordingApi {
    pub sends: Mutex<Vec<(String, String, String)>>,
    pub ship_calls: Mutex<Vec<(String, String)>>,
    pub confirms: Mutex<Vec<String>>,
    ship_fail_first: AtomicU32,
}

impl RecordingApi {
    pub fn new() -> Self {
        Self::with_ship_failures(0)
    }

    pub fn with_ship_failures(fail_first: u32) -> Self {
        Self {
            sends: Mutex::new(Vec::new()),
            ship_calls: Mutex::new(Vec::new()),
            confirms: Mutex::new(Vec::new()),
            ship_fail_first: AtomicU32::new(fail_first),
        }
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sends
            .lock()
            .expect("sends lock")
            .iter()
            .map(|(_, _, text)| text.clone())
            .collect()
    }

    pub fn ship_call_count(&self) -> usize {
        self.ship_calls.lock().expect("ship lock").len()
    }
}

impl Default for RecordingApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketplaceApi for RecordingApi {
    async fn send_message(
        &self,
        account_id: &str,
        conversation_id: &str,
        content: &str,
    ) -> StallbotResult<()> {
        self.sends.lock().expect("sends lock").push((
            account_id.to_string(),
            conversation_id.to_string(),
            content.to_string(),
        ));
        Ok(())
    }

    async fn ship_order(
        &self,
        _account_id: &str,
        order_id: &str,
        idempotency_key: &str,
    ) -> StallbotResult<()> {
        self.ship_calls
            .lock()
            .expect("ship lock")
            .push((order_id.to_string(), idempotency_key.to_string()));
        let remaining = self.ship_fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.ship_fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(StallbotError::Shipment {
                order_id: order_id.to_string(),
                message: "scripted shipment failure".into(),
            });
        }
        Ok(())
    }

    async fn confirm_shipment(&self, _account_id: &str, order_id: &str) -> StallbotResult<()> {
        self.confirms
            .lock()
            .expect("confirm lock")
            .push(order_id.to_string());
        Ok(())
    }
}

/// Credential store handing the same token to everyone.
pub struct StaticCreds;

#[async_trait]
impl CredentialStore for StaticCreds {
    async fn get_token(&self, _: &str) -> StallbotResult<Token> {
        Ok(Token::new("test-token"))
    }
}

/// Fast timings for tests: no reconnect delay, short heartbeat.
pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        reconnect_base_delay_secs: 0,
        reconnect_max_delay_secs: 60,
        heartbeat_timeout_secs: 30,
        ..EngineConfig::default()
    }
}

pub fn contains_rule(pattern: &str, response: &str, priority: i32) -> ReplyRuleConfig {
    ReplyRuleConfig {
        name: String::new(),
        condition: RuleConditionConfig::Contains {
            pattern: pattern.into(),
        },
        response: response.into(),
        priority,
    }
}

pub fn single_account_config(rules: Vec<ReplyRuleConfig>) -> Config {
    Config {
        accounts: vec![account("a1")],
        reply: ReplyConfig {
            rules,
            ..ReplyConfig::default()
        },
        engine: test_engine_config(),
        ..Config::default()
    }
}

pub fn account(id: &str) -> stallbot::config::AccountConfig {
    serde_json::from_value(serde_json::json!({ "id": id, "credential": "tok" }))
        .expect("account config")
}

pub fn message_payload(id: &str, conversation: &str, content: &str) -> Value {
    serde_json::json!({
        "type": "message",
        "messageId": id,
        "conversationId": conversation,
        "senderId": "buyer-1",
        "content": content,
    })
}

pub fn order_payload(order_id: &str, item_id: &str, status: &str) -> Value {
    serde_json::json!({
        "type": "order",
        "orderId": order_id,
        "itemId": item_id,
        "itemTitle": "激活码 自动发货",
        "status": status,
    })
}

/// Poll until `predicate` returns true or the timeout elapses.
pub async fn wait_until<F>(timeout: Duration, mut predicate: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {:?}",
            timeout
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
