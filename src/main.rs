//! u2-key-reset - Main entry point
//!
//! Resolves the run configuration, selects a torrent-client backend, and
//! drives one enumerate → exchange → apply → record pass.

use anyhow::{Context, Result};
use tracing::{debug, error, info};
use u2_key_reset::{BackendRegistry, CliArgs, Config, KeyResetClient, KeyResetError, RunSummary};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse_args();
    init_logging(&args);
    info!("u2-key-reset starting");
    debug!("CLI arguments: {:?}", args);

    let code = match run(&args).await {
        Ok(_) => {
            info!("u2-key-reset finished");
            0
        }
        Err(e) => {
            error!("{:#}", e);
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

/// Initialize logging based on verbosity settings
fn init_logging(args: &CliArgs) {
    let level = args.log_level();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.is_verbose() {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }
}

/// Execute one full run
async fn run(args: &CliArgs) -> Result<RunSummary> {
    let config = resolve_config(args).await?;
    info!(
        "Target: {} at {} (proxy: {})",
        config.target,
        config.base_url(),
        if config.has_proxy() { config.proxy.as_str() } else { "none" }
    );

    if args.save_config {
        config
            .save(&args.config)
            .await
            .context("Failed to save configuration")?;
        info!("Saved configuration to {}", args.config.display());
    }

    let registry = BackendRegistry::with_default_backends();
    let mut client = KeyResetClient::new(&config, &registry)?;
    Ok(client.run().await?)
}

/// Resolve the configuration: complete command-line flags win, otherwise
/// the saved config file is used
async fn resolve_config(args: &CliArgs) -> Result<Config> {
    if let Some(config) = Config::from_args(args) {
        debug!("Using configuration from command-line flags");
        return Ok(config);
    }

    if let Some(mut config) = Config::load(&args.config).await {
        debug!("Using saved configuration from {}", args.config.display());
        config.validate().context("Saved configuration is invalid")?;
        return Ok(config);
    }

    Err(KeyResetError::config_error(format!(
        "No usable configuration: pass --host, --port, and --api-key, or provide {}",
        args.config.display()
    ))
    .into())
}

/// Map terminal conditions to process exit codes
fn exit_code_for(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<KeyResetError>() {
        Some(KeyResetError::ConfigError { .. }) => 2,
        Some(KeyResetError::AuthorizationError { .. }) => 3,
        _ => 1,
    }
}
