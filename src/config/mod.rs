pub mod loader;
pub mod schema;

pub use loader::{get_config_path, load_config};
pub use schema::{
    AccountConfig, ApiConfig, AutoShipRuleConfig, Config, DefaultAction, EngineConfig,
    ReplyConfig, ReplyRuleConfig, RuleConditionConfig, ShippingConfig,
};
