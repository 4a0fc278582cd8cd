pub mod connection;
pub mod poll;

pub use connection::ConnectionManager;
pub use poll::HttpPollFeed;

use crate::bus::RawEvent;
use crate::creds::Token;
use crate::errors::StallbotResult;
use crate::observe::{EngineEvent, ObservabilitySink};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Connection lifecycle of one account's feed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Live,
    Backoff,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Live => "live",
            Self::Backoff => "backoff",
        };
        f.write_str(s)
    }
}

/// The marketplace's real-time event source. Transport and wire format are
/// external-protocol concerns; the engine only requires this stream contract
/// plus the REST send path.
#[async_trait]
pub trait MarketplaceFeed: Send + Sync {
    async fn open(&self, account_id: &str, token: &Token) -> StallbotResult<Box<dyn FeedHandle>>;
}

/// A live feed session. Dropping the handle closes it.
#[async_trait]
pub trait FeedHandle: Send {
    /// Wait for the next raw event. `Ok(None)` means the remote side closed
    /// the stream cleanly; the supervisor will reconnect.
    async fn next_event(&mut self) -> StallbotResult<Option<RawEvent>>;
}

/// Per-account connection state records, published over `watch` channels so
/// the dispatcher (and tests) can observe transitions without sharing any
/// mutable fields. Writes go through `set`; every change is emitted to the
/// observability sink.
#[derive(Clone)]
pub struct StatusBoard {
    inner: Arc<Mutex<HashMap<String, watch::Sender<ConnectionState>>>>,
    last_seen: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
    sink: Arc<dyn ObservabilitySink>,
}

impl StatusBoard {
    pub fn new(sink: Arc<dyn ObservabilitySink>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            last_seen: Arc::new(Mutex::new(HashMap::new())),
            sink,
        }
    }

    /// Register an account, returning a receiver for its state transitions.
    /// Idempotent: re-registering returns a fresh receiver for the same
    /// channel.
    pub fn register(&self, account_id: &str) -> watch::Receiver<ConnectionState> {
        let mut inner = self.inner.lock().expect("status board lock");
        inner
            .entry(account_id.to_string())
            .or_insert_with(|| watch::channel(ConnectionState::Disconnected).0)
            .subscribe()
    }

    pub fn set(&self, account_id: &str, state: ConnectionState) {
        let changed = {
            let mut inner = self.inner.lock().expect("status board lock");
            let tx = inner
                .entry(account_id.to_string())
                .or_insert_with(|| watch::channel(ConnectionState::Disconnected).0);
            let previous = tx.send_replace(state);
            previous != state
        };
        if changed {
            self.sink.emit(EngineEvent::AccountState {
                account_id: account_id.to_string(),
                state,
            });
        }
    }

    pub fn get(&self, account_id: &str) -> Option<ConnectionState> {
        let inner = self.inner.lock().expect("status board lock");
        inner.get(account_id).map(|tx| *tx.borrow())
    }

    pub fn watch(&self, account_id: &str) -> Option<watch::Receiver<ConnectionState>> {
        let inner = self.inner.lock().expect("status board lock");
        inner.get(account_id).map(watch::Sender::subscribe)
    }

    /// Record feed activity (any event or ping) for the account.
    pub fn touch(&self, account_id: &str) {
        self.last_seen
            .lock()
            .expect("last seen lock")
            .insert(account_id.to_string(), Utc::now());
    }

    /// When the account's feed last produced anything.
    pub fn last_seen(&self, account_id: &str) -> Option<DateTime<Utc>> {
        self.last_seen
            .lock()
            .expect("last seen lock")
            .get(account_id)
            .copied()
    }
}
