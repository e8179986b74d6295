//! Autogrant agent CLI.

use anyhow::Result;
use clap::Parser;
use pangolin_autogrant::{Config, Engine, PangolinClient, PassError};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pangolin-autogrant")]
#[command(about = "Grant temporary Pangolin access to IPs seen authenticating in the proxy log")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "autogrant.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --print-config
    if args.print_config {
        println!("{}", Config::example());
        return Ok(());
    }

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Load configuration
    info!(config = %args.config.display(), "Loading configuration");
    let config = Config::load(&args.config)?;

    // Handle --validate
    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let provider = PangolinClient::new(config.provider.clone())
        .map_err(|e| anyhow::anyhow!("failed to build provider client: {}", e))?;
    let engine = Engine::new(&config, Box::new(provider));

    match engine.run_pass().await {
        Ok(summary) => {
            info!(
                events = summary.events,
                malformed = summary.malformed_lines,
                created = summary.rules_created,
                refreshed = summary.rules_refreshed,
                expired = summary.rules_expired,
                create_failures = summary.create_failures,
                delete_failures = summary.delete_failures,
                active = summary.active_rules,
                "Pass completed"
            );
            Ok(())
        }
        Err(PassError::SourceUnavailable(e)) if !config.log.missing_is_fatal => {
            warn!(error = %e, "Log source unavailable, skipping pass");
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!(e)),
    }
}
