//! Interception Proxy command line tool

use clap::Parser;
use log::{error, info};

use interception_proxy::common::{init_logger, Result};
use interception_proxy::config::{ConfigLoader, ConfigValidator, CoreConfig, BUFFER_SIZE};
use interception_proxy::{Orchestrator, APP_NAME, VERSION};

/// Interactive interception proxy
#[derive(Parser, Debug)]
#[clap(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Load configuration from a file
    #[clap(long, env = "INTERCEPTION_PROXY_CONFIG_FILE")]
    config_file: Option<String>,

    /// Log level (overrides the configuration)
    #[clap(long)]
    log_level: Option<String>,

    /// Quick mode: listen address of a single plain proxy
    #[clap(short, long, requires = "target")]
    listen: Option<String>,

    /// Quick mode: target server address
    #[clap(short, long, requires = "listen")]
    target: Option<String>,

    /// Quick mode: read buffer size
    #[clap(long, default_value_t = BUFFER_SIZE)]
    buffer_size: usize,

    /// Quick mode: log every PDU in both directions
    #[clap(long)]
    log_pdus: bool,
}

fn load_config(args: &Args) -> Result<CoreConfig> {
    let mut config = match (&args.listen, &args.target) {
        (Some(listen), Some(target)) => CoreConfig::quick(listen, target, args.buffer_size, args.log_pdus),
        _ => match &args.config_file {
            Some(path) => CoreConfig::from_file(path)?,
            None => CoreConfig::auto_load()?,
        },
    };

    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            init_logger(args.log_level.as_deref().unwrap_or("info"));
            error!("Invalid configuration: {}", e);
            return Err(e);
        }
    };

    init_logger(&config.log_level);
    info!("Starting {} v{}", APP_NAME, VERSION);
    config.log();

    if config.proxies.is_empty() {
        info!("No proxy configured; use --listen/--target or a configuration file");
    }

    let orchestrator = Orchestrator::from_config(&config);
    orchestrator.start().await?;

    info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    orchestrator.stop().await;
    Ok(())
}
