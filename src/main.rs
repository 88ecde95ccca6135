//! Mokkapi - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use mokkapi::{http, ConfigStore, FileStore, MemoryStore, MockApiConfig, MockServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mokkapi",
    about = "Mock API server - configurable endpoints, authentication and canned responses",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mokkapi.yaml")]
    config: PathBuf,

    /// Listen address, overrides `settings.listen`
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Print default config if requested
    if args.print_config {
        let default_config = include_str!("../demos/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    // Load configuration; the file, if any, is also the live store
    let (config, store): (MockApiConfig, Arc<dyn ConfigStore>) = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        let config = MockApiConfig::from_file(&args.config)?;
        (config, Arc::new(FileStore::new(args.config.clone())))
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no endpoints)");
        (MockApiConfig::default(), Arc::new(MemoryStore::new()))
    };

    // Validate and exit if requested
    if args.validate {
        println!(
            "Configuration is valid ({} endpoints, {} auth profiles defined)",
            config.endpoints.len(),
            config.auth_profiles.len()
        );
        return Ok(());
    }

    // Settings are read once; CLI flags win
    let mut settings = config.settings;
    if let Some(listen) = args.listen {
        settings.listen = listen;
    }

    // Load the first registry generation and serve
    let addr = settings.listen;
    let server = Arc::new(MockServer::from_store(settings, store).await?);
    http::serve(server, addr).await
}
