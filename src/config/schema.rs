use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// One seller account the engine maintains a live session for.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Opaque session credential (cookie/token blob) for this account.
    #[serde(default)]
    pub credential: String,
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("enabled", &self.enabled)
            .field(
                "credential",
                &if self.credential.is_empty() {
                    "[empty]"
                } else {
                    "[REDACTED]"
                },
            )
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Reply rules
// ---------------------------------------------------------------------------

/// A single reply-rule condition, as written in the config file.
/// Closed variant set — no open-ended predicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RuleConditionConfig {
    /// Message text contains the given substring.
    Contains { pattern: String },
    /// Message text matches the given regular expression.
    Regex { pattern: String },
    /// Message intent equals the given value (greeting/question/order_related/unknown).
    Intent { value: String },
    /// Conversation awaiting-reply flag equals the given value.
    Awaiting { value: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyRuleConfig {
    #[serde(default)]
    pub name: String,
    pub condition: RuleConditionConfig,
    /// Response template. `{sender}` and `{content}` are substituted.
    pub response: String,
    /// Higher priority rules are evaluated first.
    #[serde(default)]
    pub priority: i32,
}

/// What to do when no rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DefaultAction {
    #[default]
    Ignore,
    Escalate,
}

fn default_send_retry_max() -> u32 {
    3
}

fn default_max_bargain_rounds() -> u32 {
    3
}

fn default_bargain_refusal() -> String {
    "抱歉，这个价格已经是最优惠的了，不能再便宜了哦！".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyConfig {
    #[serde(default)]
    pub rules: Vec<ReplyRuleConfig>,
    #[serde(default, rename = "defaultAction")]
    pub default_action: DefaultAction,
    /// Transient send failures are retried this many times before the
    /// conversation is escalated.
    #[serde(default = "default_send_retry_max", rename = "sendRetryMax")]
    pub send_retry_max: u32,
    /// Price haggling is answered at most this many rounds per conversation.
    #[serde(default = "default_max_bargain_rounds", rename = "maxBargainRounds")]
    pub max_bargain_rounds: u32,
    /// Fixed reply once the bargain cap is reached.
    #[serde(default = "default_bargain_refusal", rename = "bargainRefusal")]
    pub bargain_refusal: String,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default_action: DefaultAction::Ignore,
            send_retry_max: default_send_retry_max(),
            max_bargain_rounds: default_max_bargain_rounds(),
            bargain_refusal: default_bargain_refusal(),
        }
    }
}

// ---------------------------------------------------------------------------
// Shipping
// ---------------------------------------------------------------------------

/// Eligibility rule for automatic shipment. An order qualifies when its
/// item id is listed or its title contains one of the keywords.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoShipRuleConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "itemIds")]
    pub item_ids: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for AutoShipRuleConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            item_ids: Vec::new(),
            keywords: Vec::new(),
            enabled: true,
        }
    }
}

fn default_ship_retry_max() -> u32 {
    3
}

fn default_ship_retry_base_delay_ms() -> u64 {
    500
}

fn default_confirm_delay_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingConfig {
    #[serde(default, rename = "autoShip")]
    pub auto_ship: Vec<AutoShipRuleConfig>,
    /// Failed shipment calls are retried this many times before escalation.
    #[serde(default = "default_ship_retry_max", rename = "retryMax")]
    pub retry_max: u32,
    #[serde(default = "default_ship_retry_base_delay_ms", rename = "retryBaseDelayMs")]
    pub retry_base_delay_ms: u64,
    /// When the remote side requires an explicit confirm-shipment call,
    /// issue it this long after a successful shipment.
    #[serde(default = "default_confirm_delay_secs", rename = "confirmDelaySecs")]
    pub confirm_delay_secs: u64,
    /// Whether to actively confirm, or wait for a confirmation event.
    #[serde(default, rename = "confirmActive")]
    pub confirm_active: bool,
}

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            auto_ship: Vec::new(),
            retry_max: default_ship_retry_max(),
            retry_base_delay_ms: default_ship_retry_base_delay_ms(),
            confirm_delay_secs: default_confirm_delay_secs(),
            confirm_active: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine tuning
// ---------------------------------------------------------------------------

fn default_queue_capacity() -> usize {
    256
}

fn default_dedup_cache_size() -> usize {
    1024
}

fn default_reconnect_base_delay_secs() -> u64 {
    2
}

fn default_reconnect_max_delay_secs() -> u64 {
    300
}

fn default_max_consecutive_failures() -> u32 {
    5
}

fn default_heartbeat_timeout_secs() -> u64 {
    90
}

fn default_api_rate_per_sec() -> u32 {
    10
}

fn default_api_burst() -> u32 {
    20
}

fn default_rate_acquire_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bounded per-account event queue length.
    #[serde(default = "default_queue_capacity", rename = "queueCapacity")]
    pub queue_capacity: usize,
    /// Recent-message-id cache per account, evicted oldest-first.
    #[serde(default = "default_dedup_cache_size", rename = "dedupCacheSize")]
    pub dedup_cache_size: usize,
    #[serde(
        default = "default_reconnect_base_delay_secs",
        rename = "reconnectBaseDelaySecs"
    )]
    pub reconnect_base_delay_secs: u64,
    #[serde(
        default = "default_reconnect_max_delay_secs",
        rename = "reconnectMaxDelaySecs"
    )]
    pub reconnect_max_delay_secs: u64,
    /// After this many consecutive connect failures the account parks in
    /// Backoff and an alert is emitted instead of hammering the feed.
    #[serde(
        default = "default_max_consecutive_failures",
        rename = "maxConsecutiveFailures"
    )]
    pub max_consecutive_failures: u32,
    /// Force a reconnect when no event or ping arrives within this window.
    #[serde(
        default = "default_heartbeat_timeout_secs",
        rename = "heartbeatTimeoutSecs"
    )]
    pub heartbeat_timeout_secs: u64,
    /// Shared marketplace-API token bucket, across all accounts.
    #[serde(default = "default_api_rate_per_sec", rename = "apiRatePerSec")]
    pub api_rate_per_sec: u32,
    #[serde(default = "default_api_burst", rename = "apiBurst")]
    pub api_burst: u32,
    /// How long a pipeline may wait for a rate-limit token before backing off.
    #[serde(
        default = "default_rate_acquire_timeout_ms",
        rename = "rateAcquireTimeoutMs"
    )]
    pub rate_acquire_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            dedup_cache_size: default_dedup_cache_size(),
            reconnect_base_delay_secs: default_reconnect_base_delay_secs(),
            reconnect_max_delay_secs: default_reconnect_max_delay_secs(),
            max_consecutive_failures: default_max_consecutive_failures(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            api_rate_per_sec: default_api_rate_per_sec(),
            api_burst: default_api_burst(),
            rate_acquire_timeout_ms: default_rate_acquire_timeout_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Marketplace API endpoint
// ---------------------------------------------------------------------------

fn default_base_url() -> String {
    "https://api.marketplace.example".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url", rename = "baseUrl")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs", rename = "timeoutSecs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub reply: ReplyConfig,
    #[serde(default)]
    pub shipping: ShippingConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Accounts the engine should actually connect.
    pub fn enabled_accounts(&self) -> impl Iterator<Item = &AccountConfig> {
        self.accounts.iter().filter(|a| a.enabled)
    }
}
