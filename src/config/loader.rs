use crate::config::Config;
use crate::utils::stallbot_home;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub fn get_config_path() -> Result<PathBuf> {
    Ok(stallbot_home()?.join("config.json"))
}

/// Load configuration from `config_path`, falling back to
/// `~/.stallbot/config.json`. A missing file yields the defaults; an
/// unreadable or unparsable file is fatal — the engine must not start on a
/// half-understood configuration.
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let default_path = get_config_path().unwrap_or_else(|_| PathBuf::from("config.json"));
    let path = config_path.unwrap_or(default_path.as_path());

    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let config: Config = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config JSON from {}", path.display()))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for account in &config.accounts {
        if account.id.trim().is_empty() {
            anyhow::bail!("account with empty id");
        }
        if !seen.insert(account.id.as_str()) {
            anyhow::bail!("duplicate account id: {}", account.id);
        }
    }
    if config.engine.queue_capacity == 0 {
        anyhow::bail!("engine.queueCapacity must be > 0");
    }
    if config.engine.dedup_cache_size == 0 {
        anyhow::bail!("engine.dedupCacheSize must be > 0");
    }
    if config.engine.api_rate_per_sec == 0 {
        anyhow::bail!("engine.apiRatePerSec must be > 0");
    }
    // Compile rule regexes now so a bad pattern fails at startup, not on the
    // first matching message.
    crate::reply::RuleSet::from_config(&config.reply)
        .context("invalid reply rule configuration")?;
    Ok(())
}
