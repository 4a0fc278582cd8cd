pub mod task_tracker;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

pub fn stallbot_home() -> Result<PathBuf> {
    if let Some(home) = std::env::var_os("STALLBOT_HOME") {
        return Ok(PathBuf::from(home));
    }
    Ok(dirs::home_dir()
        .context("Could not determine home directory")?
        .join(".stallbot"))
}

/// Exponential backoff delay for attempt `attempt` (0-based), capped at
/// `max_secs`, with up to 25% jitter to avoid thundering herds.
pub fn backoff_delay(attempt: u32, base_secs: u64, max_secs: u64) -> Duration {
    let exp = 2.0_f64.powi(attempt.min(16) as i32);
    let base = ((base_secs as f64) * exp).min(max_secs as f64);
    let jitter = base * 0.25 * fastrand::f64();
    Duration::from_secs_f64((base + jitter).min(max_secs as f64))
}
