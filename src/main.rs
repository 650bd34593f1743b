use anyhow::{Context, Result};
use clap::Parser;
use polysock::cli::{
    decode_wire, encode_frame, Cli, CliError, Commands, ConfigCommand, EchoApplication,
};
use polysock::network::{InboundFactory, SocketServer};
use polysock::session::{SessionRegistry, SocketInbound};
use polysock::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => Config::default_config_file(),
    }
}

/// Configuration from the file if there is one, defaults otherwise
fn effective_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::load_from(path)
    } else {
        Ok(Config::default())
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn fail(err: CliError) -> ! {
    eprintln!("{}", err);
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = config_path(cli.config.as_deref())?;
    let config = match effective_config(&path) {
        Ok(config) => config,
        Err(e) => fail(CliError::config_unavailable(format!("{:#}", e))),
    };
    init_tracing(&config);

    match cli.command {
        Commands::Encode {
            kind,
            message_type,
            payload,
        } => match encode_frame(&kind, message_type, &payload) {
            Ok(encoded) => println!("{}", encoded),
            Err(e) => fail(e),
        },
        Commands::Decode { wire, strict } => {
            let report = decode_wire(&wire);
            print!("{}", report);
            if strict {
                if let Err(e) = report.into_strict() {
                    fail(e);
                }
            }
        }
        Commands::Config { command } => match command {
            ConfigCommand::Path => {
                println!("{}", path.display());
                if path.exists() {
                    info!("✓ Configuration file exists");
                } else {
                    info!("✗ Configuration file does not exist, defaults are in effect");
                    info!("Run 'polysock config init' to create one");
                }
            }
            ConfigCommand::Show => {
                let content =
                    toml::to_string_pretty(&config).context("Failed to serialize configuration")?;
                print!("{}", content);
            }
            ConfigCommand::Init { force } => {
                if path.exists() && !force {
                    fail(CliError::UserError {
                        message: format!("Configuration already exists at {}", path.display()),
                        suggestion: Some("Pass --force to overwrite it".to_string()),
                    });
                }
                if path.exists() {
                    warn!("Overwriting existing configuration at {}", path.display());
                }
                Config::default().save_to(&path)?;
                info!("Configuration written to {}", path.display());
            }
        },
        Commands::Serve { bind } => {
            let mut server_config = config.server_config();
            if let Some(bind) = bind {
                server_config.bind_addr = bind;
            }

            let registry = SessionRegistry::new();
            let factory: InboundFactory = Arc::new(|| {
                let application: Arc<dyn SocketInbound> = EchoApplication::new();
                application
            });
            let server = SocketServer::bind(server_config, registry, factory).await?;
            info!("Listening on {}", server.local_addr()?);

            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for shutdown signal: {}", e);
                    std::future::pending::<()>().await;
                }
                info!("Shutdown signal received");
            };
            server.run_until(shutdown).await?;
        }
    }

    Ok(())
}
