//! provisor - a minimal idempotent remote-task runner
//!
//! This is the main entry point for the provisor CLI.

mod cli;
mod config;

use anyhow::Result;
use cli::commands::CommandContext;
use cli::{Cli, Commands};
use config::Config;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Configuration problems are reported once logging is up
    let loaded = Config::load(cli.config.as_ref());
    let config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => Config::default(),
    };

    init_logging(cli.verbosity(), &config.logging);

    if let Err(e) = &loaded {
        if cli.config.is_some() {
            return Err(anyhow::anyhow!("{:#}", e));
        }
        tracing::warn!("Failed to load config: {:#}", e);
    }

    if cli.verbosity() >= 2 {
        eprintln!("provisor v{}", VERSION);
    }

    // Create command context
    let mut ctx = CommandContext::new(&cli, config);

    // Execute the appropriate command
    let result = match &cli.command {
        Commands::Run(args) => args.execute(&mut ctx).await,
        Commands::ListHosts(args) => args.execute(&mut ctx).await,
        Commands::Validate(args) => args.execute(&mut ctx).await,
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(e) => {
            ctx.output.error(&format!("{:#}", e));
            e.downcast_ref::<provisor::error::Error>()
                .map(|e| e.exit_code())
                .unwrap_or(1)
        }
    };

    std::process::exit(exit_code);
}

/// Initialize logging based on verbosity level
///
/// `RUST_LOG` wins when set; otherwise `-v` flags pick the level, falling
/// back to `logging.level` from the config.
fn init_logging(verbosity: u8, logging: &config::LoggingConfig) {
    let filter = match verbosity {
        0 => logging.level.clone().unwrap_or_else(|| "warn".to_string()),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    if logging.json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(verbosity >= 3)
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .init();
    }
}
