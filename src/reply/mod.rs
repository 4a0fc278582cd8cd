use crate::bus::{Intent, Message};
use crate::config::{DefaultAction, ReplyConfig, ReplyRuleConfig, RuleConditionConfig};
use crate::convo::Conversation;
use anyhow::{Context, Result};
use regex::Regex;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Outcome of the reply decision for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Reply(String),
    Ignore,
    Escalate,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Reply(_) => "reply",
            Action::Ignore => "ignore",
            Action::Escalate => "escalate",
        }
    }
}

/// Compiled rule condition. Closed variant set, evaluated through one match —
/// no open-ended predicates, no reflection.
#[derive(Debug, Clone)]
enum RuleCondition {
    Contains { pattern: String },
    Matches { regex: Regex },
    IntentIs { intent: Intent },
    Awaiting { value: bool },
}

impl RuleCondition {
    fn compile(config: &RuleConditionConfig) -> Result<Self> {
        match config {
            RuleConditionConfig::Contains { pattern } => Ok(Self::Contains {
                pattern: pattern.clone(),
            }),
            RuleConditionConfig::Regex { pattern } => Ok(Self::Matches {
                regex: Regex::new(pattern)
                    .with_context(|| format!("invalid rule regex: {}", pattern))?,
            }),
            RuleConditionConfig::Intent { value } => {
                let intent = match value.as_str() {
                    "greeting" => Intent::Greeting,
                    "question" => Intent::Question,
                    "order_related" => Intent::OrderRelated,
                    "unknown" => Intent::Unknown,
                    other => anyhow::bail!("unknown intent in rule condition: {}", other),
                };
                Ok(Self::IntentIs { intent })
            }
            RuleConditionConfig::Awaiting { value } => Ok(Self::Awaiting { value: *value }),
        }
    }

    fn matches(&self, convo: &Conversation, msg: &Message) -> bool {
        match self {
            Self::Contains { pattern } => msg.content.contains(pattern.as_str()),
            Self::Matches { regex } => regex.is_match(&msg.content),
            Self::IntentIs { intent } => msg.intent == *intent,
            Self::Awaiting { value } => convo.awaiting_reply == *value,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplyRule {
    pub name: String,
    condition: RuleCondition,
    response: String,
    priority: i32,
}

/// The full ordered rule set plus the bargain cap. Read-only during matching;
/// replaced wholesale on reload.
pub struct RuleSet {
    rules: Vec<ReplyRule>,
    default_action: DefaultAction,
    max_bargain_rounds: u32,
    bargain_refusal: String,
}

impl RuleSet {
    pub fn from_config(config: &ReplyConfig) -> Result<Self> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for (idx, rule) in config.rules.iter().enumerate() {
            rules.push(compile_rule(rule, idx)?);
        }
        // Stable sort: equal priorities keep declaration order, so matching
        // stays deterministic for any rule set.
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
        Ok(Self {
            rules,
            default_action: config.default_action,
            max_bargain_rounds: config.max_bargain_rounds,
            bargain_refusal: config.bargain_refusal.clone(),
        })
    }

    /// Decide how to handle `msg` in the context of `convo`. Deterministic:
    /// identical (conversation state, message, rule set) inputs always yield
    /// the same action.
    pub fn decide(&self, convo: &Conversation, msg: &Message) -> Action {
        // Bargain cap first: once the configured rounds are spent, price
        // haggling gets the fixed refusal instead of another rule match.
        if is_bargain_message(&msg.content) && convo.bargain_rounds >= self.max_bargain_rounds {
            return Action::Reply(self.bargain_refusal.clone());
        }

        for rule in &self.rules {
            if rule.condition.matches(convo, msg) {
                return Action::Reply(render_template(&rule.response, msg));
            }
        }

        match self.default_action {
            DefaultAction::Ignore => Action::Ignore,
            DefaultAction::Escalate => Action::Escalate,
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

fn compile_rule(config: &ReplyRuleConfig, idx: usize) -> Result<ReplyRule> {
    let name = if config.name.is_empty() {
        format!("rule-{}", idx)
    } else {
        config.name.clone()
    };
    Ok(ReplyRule {
        condition: RuleCondition::compile(&config.condition)
            .with_context(|| format!("rule '{}'", name))?,
        response: config.response.clone(),
        priority: config.priority,
        name,
    })
}

/// Substitute `{sender}` and `{content}` placeholders. Template selection is
/// done by the rule match; only parameterization happens here.
fn render_template(template: &str, msg: &Message) -> String {
    template
        .replace("{sender}", &msg.sender_id)
        .replace("{content}", &msg.content)
}

/// Price-haggling detector, used only for the bargain-round cap. Asking the
/// price ("多少钱") is a question, not a bargain; pushing the price down is.
pub fn is_bargain_message(content: &str) -> bool {
    const BARGAIN_WORDS: &[&str] = &[
        "便宜", "优惠", "降价", "打折", "少点", "最低", "cheaper", "discount",
    ];
    BARGAIN_WORDS.iter().any(|w| content.contains(w))
}

/// Shared handle to the live rule set. Matching takes a read lock; reload
/// swaps the whole set under the write lock.
#[derive(Clone)]
pub struct ReplyEngine {
    rules: Arc<RwLock<RuleSet>>,
}

impl ReplyEngine {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules: Arc::new(RwLock::new(rules)),
        }
    }

    pub fn from_config(config: &ReplyConfig) -> Result<Self> {
        Ok(Self::new(RuleSet::from_config(config)?))
    }

    pub async fn decide(&self, convo: &Conversation, msg: &Message) -> Action {
        self.rules.read().await.decide(convo, msg)
    }

    /// Replace the active rule set. In-flight decisions finish against the
    /// old set; subsequent messages see the new one.
    pub async fn reload(&self, rules: RuleSet) {
        *self.rules.write().await = rules;
    }

    pub async fn rule_count(&self) -> usize {
        self.rules.read().await.rule_count()
    }
}
