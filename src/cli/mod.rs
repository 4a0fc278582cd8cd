use crate::config::load_config;
use crate::engine::Engine;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "stallbot")]
#[command(about = "Marketplace seller automation engine", version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine for all enabled accounts
    Run {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Validate the configuration and reply rules, then exit
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// List configured accounts
    Accounts {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let config = load_config(config.as_deref()).context("configuration load failed")?;
            if config.enabled_accounts().next().is_none() {
                anyhow::bail!("no enabled accounts configured");
            }
            let engine = Engine::build(config)?;
            engine.start().await;

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            info!("shutdown signal received");
            engine.shutdown().await;
            Ok(())
        }
        Commands::CheckConfig { config } => {
            let path = config.as_deref();
            let loaded = load_config(path).context("configuration invalid")?;
            println!(
                "config ok: {} account(s), {} reply rule(s), {} auto-ship rule(s)",
                loaded.accounts.len(),
                loaded.reply.rules.len(),
                loaded.shipping.auto_ship.len()
            );
            Ok(())
        }
        Commands::Accounts { config } => {
            let loaded = load_config(config.as_deref())?;
            for account in &loaded.accounts {
                println!(
                    "{}\t{}\t{}",
                    account.id,
                    if account.enabled { "enabled" } else { "disabled" },
                    account.label
                );
            }
            Ok(())
        }
    }
}
