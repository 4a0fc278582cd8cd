pub mod outbound;

use crate::config::{ApiConfig, EngineConfig};
use crate::errors::{StallbotError, StallbotResult};
use anyhow::Result;
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// The marketplace REST surface the engine drives. All three operations are
/// documented retry-safe on the remote side; `ship_order` additionally takes
/// the caller's idempotency key, which must be reused verbatim on retries.
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    async fn send_message(
        &self,
        account_id: &str,
        conversation_id: &str,
        content: &str,
    ) -> StallbotResult<()>;

    async fn ship_order(
        &self,
        account_id: &str,
        order_id: &str,
        idempotency_key: &str,
    ) -> StallbotResult<()>;

    async fn confirm_shipment(&self, account_id: &str, order_id: &str) -> StallbotResult<()>;
}

/// Shared token bucket guarding the marketplace API across all account
/// pipelines. Acquisition is bounded: a pipeline waits at most
/// `acquire_timeout` for a token, then gets `RateLimited` and backs off —
/// it can suspend, it cannot deadlock.
pub struct ApiLimiter {
    limiter: DefaultDirectRateLimiter,
    acquire_timeout: Duration,
}

impl ApiLimiter {
    pub fn from_config(engine: &EngineConfig) -> Result<Self> {
        let rate = NonZeroU32::new(engine.api_rate_per_sec)
            .ok_or_else(|| anyhow::anyhow!("apiRatePerSec must be > 0"))?;
        let burst = NonZeroU32::new(engine.api_burst.max(1)).expect("burst is at least 1");
        Ok(Self {
            limiter: RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)),
            acquire_timeout: Duration::from_millis(engine.rate_acquire_timeout_ms),
        })
    }

    pub async fn acquire(&self) -> StallbotResult<()> {
        tokio::time::timeout(self.acquire_timeout, self.limiter.until_ready())
            .await
            .map_err(|_| StallbotError::RateLimited { retry_after: None })
    }
}

/// HTTP implementation against the marketplace REST API.
pub struct HttpMarketplaceApi {
    client: reqwest::Client,
    base_url: String,
    limiter: Arc<ApiLimiter>,
}

impl HttpMarketplaceApi {
    pub fn new(config: &ApiConfig, limiter: Arc<ApiLimiter>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            limiter,
        })
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> StallbotResult<()> {
        self.limiter.acquire().await?;
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await;
        map_response(response).await
    }
}

/// Map an HTTP outcome onto the engine error taxonomy: transport failures
/// and 5xx are retryable, 429 carries the Retry-After hint, other 4xx are
/// permanent.
async fn map_response(response: reqwest::Result<reqwest::Response>) -> StallbotResult<()> {
    let response = response.map_err(|e| StallbotError::Network {
        message: e.to_string(),
        retryable: true,
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        return Err(StallbotError::RateLimited { retry_after });
    }

    let body = response.text().await.unwrap_or_default();
    Err(StallbotError::Network {
        message: format!("HTTP {}: {}", status.as_u16(), truncate(&body, 200)),
        retryable: status.is_server_error(),
    })
}

fn truncate(s: &str, limit: usize) -> &str {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl MarketplaceApi for HttpMarketplaceApi {
    async fn send_message(
        &self,
        account_id: &str,
        conversation_id: &str,
        content: &str,
    ) -> StallbotResult<()> {
        self.post(
            "/v1/messages",
            &serde_json::json!({
                "accountId": account_id,
                "conversationId": conversation_id,
                "content": content,
            }),
        )
        .await
    }

    async fn ship_order(
        &self,
        account_id: &str,
        order_id: &str,
        idempotency_key: &str,
    ) -> StallbotResult<()> {
        self.post(
            "/v1/orders/ship",
            &serde_json::json!({
                "accountId": account_id,
                "orderId": order_id,
                "idempotencyKey": idempotency_key,
            }),
        )
        .await
    }

    async fn confirm_shipment(&self, account_id: &str, order_id: &str) -> StallbotResult<()> {
        self.post(
            "/v1/orders/confirm",
            &serde_json::json!({
                "accountId": account_id,
                "orderId": order_id,
            }),
        )
        .await
    }
}
