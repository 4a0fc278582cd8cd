use crate::config::EngineConfig;
use crate::creds::CredentialStore;
use crate::dispatch::Dispatcher;
use crate::errors::StallbotError;
use crate::feed::{ConnectionState, MarketplaceFeed, StatusBoard};
use crate::normalize::Normalizer;
use crate::observe::{EngineEvent, ObservabilitySink};
use crate::utils::backoff_delay;
use crate::utils::task_tracker::TaskTracker;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Owns one supervisor task per account: opens the feed, pumps events into
/// the dispatcher, reconnects with capped exponential backoff, and parks the
/// account in `Backoff` after too many consecutive failures instead of
/// hammering the marketplace forever.
pub struct ConnectionManager {
    feed: Arc<dyn MarketplaceFeed>,
    creds: Arc<dyn CredentialStore>,
    dispatcher: Arc<Dispatcher>,
    status: StatusBoard,
    sink: Arc<dyn ObservabilitySink>,
    config: EngineConfig,
    tasks: TaskTracker,
}

impl ConnectionManager {
    pub fn new(
        feed: Arc<dyn MarketplaceFeed>,
        creds: Arc<dyn CredentialStore>,
        dispatcher: Arc<Dispatcher>,
        status: StatusBoard,
        sink: Arc<dyn ObservabilitySink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            feed,
            creds,
            dispatcher,
            status,
            sink,
            config,
            tasks: TaskTracker::new(),
        }
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    /// Start (or restart) the supervisor for one account.
    pub async fn start_account(&self, account_id: &str) {
        self.status.register(account_id);
        let ctx = SupervisorCtx {
            account_id: account_id.to_string(),
            feed: self.feed.clone(),
            creds: self.creds.clone(),
            dispatcher: self.dispatcher.clone(),
            status: self.status.clone(),
            sink: self.sink.clone(),
            config: self.config.clone(),
        };
        let handle = tokio::spawn(run_supervisor(ctx));
        self.tasks.spawn(supervisor_name(account_id), handle).await;
        info!(account = %account_id, "account supervisor started");
    }

    /// Close one account promptly: abort its supervisor, tear down its
    /// pipeline and queue. Other accounts are untouched.
    pub async fn close_account(&self, account_id: &str) {
        self.tasks.cancel(&supervisor_name(account_id)).await;
        self.dispatcher.close_account(account_id).await;
        self.status.set(account_id, ConnectionState::Disconnected);
        info!(account = %account_id, "account closed");
    }

    pub async fn shutdown(&self) {
        self.tasks.cancel_all().await;
    }
}

fn supervisor_name(account_id: &str) -> String {
    format!("supervisor:{}", account_id)
}

struct SupervisorCtx {
    account_id: String,
    feed: Arc<dyn MarketplaceFeed>,
    creds: Arc<dyn CredentialStore>,
    dispatcher: Arc<Dispatcher>,
    status: StatusBoard,
    sink: Arc<dyn ObservabilitySink>,
    config: EngineConfig,
}

async fn run_supervisor(ctx: SupervisorCtx) {
    let account_id = ctx.account_id.clone();
    // Dedup cache is owned by this account's pipeline, never shared.
    let mut normalizer = Normalizer::new(ctx.config.dedup_cache_size);
    let heartbeat = Duration::from_secs(ctx.config.heartbeat_timeout_secs);
    let mut consecutive_failures = 0u32;

    loop {
        ctx.status.set(&account_id, ConnectionState::Connecting);

        let token = match ctx.creds.get_token(&account_id).await {
            Ok(token) => token,
            Err(StallbotError::CredentialExpired(_)) => {
                park_for_reauth(&ctx, &account_id);
                return;
            }
            Err(e) => {
                warn!(account = %account_id, error = %e, "credential lookup failed");
                consecutive_failures += 1;
                sleep_before_retry(&ctx, &account_id, &mut consecutive_failures).await;
                continue;
            }
        };

        match ctx.feed.open(&account_id, &token).await {
            Ok(mut handle) => {
                consecutive_failures = 0;
                ctx.status.set(&account_id, ConnectionState::Live);
                info!(account = %account_id, "feed connected");

                loop {
                    match tokio::time::timeout(heartbeat, handle.next_event()).await {
                        Ok(Ok(Some(raw))) => {
                            ctx.status.touch(&account_id);
                            match normalizer.normalize(&raw) {
                                Ok(Some(event)) => ctx.dispatcher.submit(event).await,
                                Ok(None) => {
                                    debug!(account = %account_id, "duplicate or keepalive, skipped");
                                }
                                Err(e) => {
                                    // Malformed/unknown payloads are dropped, never fatal.
                                    warn!(account = %account_id, error = %e, "event dropped");
                                }
                            }
                        }
                        Ok(Ok(None)) => {
                            info!(account = %account_id, "feed closed by remote, reconnecting");
                            break;
                        }
                        Ok(Err(StallbotError::CredentialExpired(_))) => {
                            park_for_reauth(&ctx, &account_id);
                            return;
                        }
                        Ok(Err(e)) => {
                            warn!(account = %account_id, error = %e, "feed read failed, reconnecting");
                            break;
                        }
                        Err(_elapsed) => {
                            warn!(
                                account = %account_id,
                                timeout_secs = heartbeat.as_secs(),
                                "no event or ping within heartbeat window, forcing reconnect"
                            );
                            break;
                        }
                    }
                }
            }
            Err(StallbotError::CredentialExpired(_)) => {
                park_for_reauth(&ctx, &account_id);
                return;
            }
            Err(e) => {
                warn!(
                    account = %account_id,
                    failures = consecutive_failures + 1,
                    error = %e,
                    "feed connect failed"
                );
                consecutive_failures += 1;
            }
        }

        sleep_before_retry(&ctx, &account_id, &mut consecutive_failures).await;
    }
}

/// Credential expired: stop the loop and surface a re-auth request. The
/// account stays down until it is restarted with fresh credentials.
fn park_for_reauth(ctx: &SupervisorCtx, account_id: &str) {
    ctx.status.set(account_id, ConnectionState::Disconnected);
    ctx.sink.emit(EngineEvent::ReauthRequired {
        account_id: account_id.to_string(),
    });
    warn!(account = %account_id, "account paused pending re-auth");
}

/// Wait out the backoff window before the next connect attempt. Once the
/// consecutive-failure cap is hit, park in `Backoff` for a full maximum
/// window, emit the alert, and re-arm the counter.
async fn sleep_before_retry(
    ctx: &SupervisorCtx,
    account_id: &str,
    consecutive_failures: &mut u32,
) {
    if *consecutive_failures >= ctx.config.max_consecutive_failures {
        ctx.status.set(account_id, ConnectionState::Backoff);
        ctx.sink.emit(EngineEvent::AccountBackoff {
            account_id: account_id.to_string(),
            failures: *consecutive_failures,
        });
        tokio::time::sleep(Duration::from_secs(ctx.config.reconnect_max_delay_secs)).await;
        *consecutive_failures = 0;
        return;
    }

    ctx.status.set(account_id, ConnectionState::Disconnected);
    let delay = if *consecutive_failures == 0 {
        // Clean disconnect: come back quickly.
        Duration::from_secs(ctx.config.reconnect_base_delay_secs)
    } else {
        backoff_delay(
            *consecutive_failures - 1,
            ctx.config.reconnect_base_delay_secs,
            ctx.config.reconnect_max_delay_secs,
        )
    };
    debug!(account = %account_id, "reconnecting in {:?}", delay);
    tokio::time::sleep(delay).await;
}
