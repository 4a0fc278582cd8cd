use crate::api::outbound::OutboundSender;
use crate::api::{ApiLimiter, HttpMarketplaceApi, MarketplaceApi};
use crate::config::{Config, ReplyConfig};
use crate::creds::{ConfigCredentialStore, CredentialStore};
use crate::dispatch::{Dispatcher, PipelineDeps};
use crate::feed::{ConnectionManager, HttpPollFeed, MarketplaceFeed, StatusBoard};
use crate::observe::{ObservabilitySink, TracingSink};
use crate::reply::{ReplyEngine, RuleSet};
use crate::shipment::ShipmentOrchestrator;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

/// The assembled engine: credential store, feed connections, per-account
/// pipelines, reply engine and shipment orchestrator wired together.
pub struct Engine {
    config: Config,
    reply: ReplyEngine,
    dispatcher: Arc<Dispatcher>,
    connections: ConnectionManager,
    orchestrator: ShipmentOrchestrator,
}

impl Engine {
    /// Production wiring: HTTP long-poll feed, HTTP marketplace API behind
    /// the shared rate limiter, credentials from the config file, tracing
    /// observability.
    pub fn build(config: Config) -> Result<Self> {
        let limiter = Arc::new(ApiLimiter::from_config(&config.engine)?);
        let api: Arc<dyn MarketplaceApi> =
            Arc::new(HttpMarketplaceApi::new(&config.api, limiter)?);
        let feed: Arc<dyn MarketplaceFeed> = Arc::new(HttpPollFeed::new(&config.api)?);
        let creds: Arc<dyn CredentialStore> = Arc::new(ConfigCredentialStore::from_config(&config));
        let sink: Arc<dyn ObservabilitySink> = Arc::new(TracingSink);
        Self::with_parts(config, feed, creds, api, sink)
    }

    /// Wiring seam: tests inject scripted feeds, API stubs and recording
    /// sinks here.
    pub fn with_parts(
        config: Config,
        feed: Arc<dyn MarketplaceFeed>,
        creds: Arc<dyn CredentialStore>,
        api: Arc<dyn MarketplaceApi>,
        sink: Arc<dyn ObservabilitySink>,
    ) -> Result<Self> {
        let status = StatusBoard::new(sink.clone());
        let reply = ReplyEngine::from_config(&config.reply)?;
        let sender = Arc::new(OutboundSender::new(api.clone(), config.reply.send_retry_max));
        let orchestrator =
            ShipmentOrchestrator::new(api, config.shipping.clone(), sink.clone());

        let deps = PipelineDeps {
            reply: reply.clone(),
            sender,
            orchestrator: orchestrator.clone(),
            status: status.clone(),
            sink: sink.clone(),
        };
        let dispatcher = Arc::new(Dispatcher::new(deps, config.engine.clone()));
        let connections = ConnectionManager::new(
            feed,
            creds,
            dispatcher.clone(),
            status,
            sink,
            config.engine.clone(),
        );

        Ok(Self {
            config,
            reply,
            dispatcher,
            connections,
            orchestrator,
        })
    }

    /// Spawn a supervisor for every enabled account.
    pub async fn start(&self) {
        let mut started = 0usize;
        for account in self.config.enabled_accounts() {
            self.connections.start_account(&account.id).await;
            started += 1;
        }
        info!(accounts = started, "engine started");
    }

    /// Swap the live reply rule set without restarting any pipelines.
    pub async fn reload_rules(&self, reply_config: &ReplyConfig) -> Result<()> {
        let rules = RuleSet::from_config(reply_config)?;
        self.reply.reload(rules).await;
        info!("reply rules reloaded");
        Ok(())
    }

    /// Close one account: supervisor, connection and queue go away promptly;
    /// other accounts keep running.
    pub async fn close_account(&self, account_id: &str) {
        self.connections.close_account(account_id).await;
    }

    pub async fn shutdown(&self) {
        self.connections.shutdown().await;
        self.dispatcher.shutdown().await;
        self.orchestrator.shutdown().await;
        info!("engine stopped");
    }

    pub fn status(&self) -> &StatusBoard {
        self.connections.status()
    }

    pub fn orchestrator(&self) -> &ShipmentOrchestrator {
        &self.orchestrator
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}
