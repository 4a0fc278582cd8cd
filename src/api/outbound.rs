use crate::api::MarketplaceApi;
use crate::errors::StallbotError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outbound message send path. Transient failures are retried a bounded
/// number of times with backoff; exhaustion is reported to the caller so
/// the conversation can be escalated — delivery is never assumed.
pub struct OutboundSender {
    api: Arc<dyn MarketplaceApi>,
    retry_max: u32,
}

/// Result of a send attempt after retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Retries exhausted or a permanent failure; caller should escalate.
    Failed,
}

impl OutboundSender {
    pub fn new(api: Arc<dyn MarketplaceApi>, retry_max: u32) -> Self {
        Self { api, retry_max }
    }

    pub async fn send(
        &self,
        account_id: &str,
        conversation_id: &str,
        content: &str,
    ) -> SendOutcome {
        let mut last_err: Option<StallbotError> = None;
        for attempt in 0..=self.retry_max {
            match self
                .api
                .send_message(account_id, conversation_id, content)
                .await
            {
                Ok(()) => {
                    debug!(
                        account = %account_id,
                        conversation = %conversation_id,
                        attempt,
                        "message delivered"
                    );
                    return SendOutcome::Delivered;
                }
                Err(e) => {
                    if !e.is_retryable() {
                        warn!(
                            account = %account_id,
                            conversation = %conversation_id,
                            error = %e,
                            "permanent send failure"
                        );
                        return SendOutcome::Failed;
                    }
                    if attempt < self.retry_max {
                        // Honor the server's Retry-After hint when present,
                        // otherwise exponential backoff with jitter.
                        let delay = e.retry_after().map_or_else(
                            || {
                                let base = 500.0 * 2.0_f64.powi(attempt as i32);
                                let jitter = base * 0.25 * fastrand::f64();
                                Duration::from_millis((base + jitter).min(10_000.0) as u64)
                            },
                            Duration::from_secs,
                        );
                        warn!(
                            account = %account_id,
                            attempt = attempt + 1,
                            max = self.retry_max,
                            error = %e,
                            "send failed, retrying in {:?}",
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_err = Some(e);
                }
            }
        }
        warn!(
            account = %account_id,
            conversation = %conversation_id,
            error = %last_err.map_or_else(|| "unknown".to_string(), |e| e.to_string()),
            "send retries exhausted, escalating"
        );
        SendOutcome::Failed
    }
}
