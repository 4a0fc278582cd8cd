use crate::bus::RawEvent;
use crate::config::ApiConfig;
use crate::creds::Token;
use crate::errors::{StallbotError, StallbotResult};
use crate::feed::{FeedHandle, MarketplaceFeed};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Server-side hold on an empty poll, in seconds.
const POLL_WAIT_SECS: u64 = 20;

/// Long-poll implementation of the marketplace feed. Each `next_event` call
/// drains a buffered batch or holds a GET against the feed endpoint until
/// the server has something to say.
pub struct HttpPollFeed {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPollFeed {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        // The request timeout must comfortably exceed the server's hold.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_WAIT_SECS + config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MarketplaceFeed for HttpPollFeed {
    async fn open(&self, account_id: &str, token: &Token) -> StallbotResult<Box<dyn FeedHandle>> {
        Ok(Box::new(PollHandle {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            account_id: account_id.to_string(),
            token: token.clone(),
            cursor: None,
            buffer: VecDeque::new(),
        }))
    }
}

#[derive(Deserialize)]
struct FeedBatch {
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    events: Vec<serde_json::Value>,
}

struct PollHandle {
    client: reqwest::Client,
    base_url: String,
    account_id: String,
    token: Token,
    cursor: Option<String>,
    buffer: VecDeque<RawEvent>,
}

impl PollHandle {
    async fn poll_once(&mut self) -> StallbotResult<()> {
        let wait = POLL_WAIT_SECS.to_string();
        let mut request = self
            .client
            .get(format!("{}/v1/feed", self.base_url))
            .bearer_auth(self.token.expose())
            .query(&[
                ("accountId", self.account_id.as_str()),
                ("wait", wait.as_str()),
            ]);
        if let Some(cursor) = &self.cursor {
            request = request.query(&[("cursor", cursor.as_str())]);
        }

        let response = request.send().await.map_err(|e| StallbotError::Network {
            message: e.to_string(),
            retryable: true,
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(StallbotError::CredentialExpired(self.account_id.clone()));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(StallbotError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(StallbotError::Network {
                message: format!("feed poll returned HTTP {}", status.as_u16()),
                retryable: status.is_server_error(),
            });
        }

        let batch: FeedBatch = response.json().await.map_err(|e| StallbotError::Network {
            message: format!("feed batch decode failed: {}", e),
            retryable: true,
        })?;

        if batch.cursor.is_some() {
            self.cursor = batch.cursor;
        }
        self.buffer.extend(
            batch
                .events
                .into_iter()
                .map(|payload| RawEvent::new(self.account_id.clone(), payload)),
        );
        Ok(())
    }
}

#[async_trait]
impl FeedHandle for PollHandle {
    async fn next_event(&mut self) -> StallbotResult<Option<RawEvent>> {
        loop {
            if let Some(event) = self.buffer.pop_front() {
                return Ok(Some(event));
            }
            self.poll_once().await?;
        }
    }
}
