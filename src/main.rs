//! `lorawan-storage` binary: load configuration, open the stores, serve until
//! Ctrl-C, then flush and close.

use clap::Parser;
use lorawan_storage::config::{parse_access_code, DirectoryConfig, ListenerMode, StorageBackend};
use lorawan_storage::error::Result;
use lorawan_storage::service::DirectoryService;
use lorawan_storage::utils::logging::init_logging;
use lorawan_storage::utils::metrics::init_metrics;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::mpsc;
use tracing::{error, info, Level};

/// LoRaWAN device and gateway identity directory.
#[derive(Parser, Debug)]
#[command(name = "lorawan-storage", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// UDP/TCP listen address, e.g. 0.0.0.0:4244
    #[arg(short, long)]
    listen: Option<String>,

    /// Listener model: blocking or event-loop
    #[arg(short, long)]
    mode: Option<ListenerMode>,

    /// Enable the JSON listener on this address
    #[arg(long)]
    json_listen: Option<String>,

    /// Authorization code
    #[arg(long, allow_negative_numbers = true)]
    code: Option<i32>,

    /// Access code, hexadecimal
    #[arg(long)]
    access_code: Option<String>,

    /// Storage backend: memory or json
    #[arg(short, long)]
    backend: Option<StorageBackend>,

    /// Identity file for the json backend
    #[arg(long)]
    db: Option<PathBuf>,

    /// Gateway file for the json backend
    #[arg(long)]
    gateway_db: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn apply(&self, config: &mut DirectoryConfig) -> Result<()> {
        if let Some(listen) = &self.listen {
            config.server.address = listen.clone();
        }
        if let Some(mode) = self.mode {
            config.server.mode = mode;
        }
        if let Some(json) = &self.json_listen {
            config.server.json_address = Some(json.clone());
        }
        if let Some(code) = self.code {
            config.auth.code = code;
        }
        if let Some(access_code) = &self.access_code {
            config.auth.access_code = parse_access_code(access_code)?;
        }
        if let Some(backend) = self.backend {
            config.storage.backend = backend;
        }
        if let Some(db) = &self.db {
            config.storage.identity_path = db.clone();
        }
        if let Some(db) = &self.gateway_db {
            config.storage.gateway_path = db.clone();
        }
        match self.verbose {
            0 => {}
            1 => config.logging.log_level = Level::DEBUG,
            _ => config.logging.log_level = Level::TRACE,
        }
        Ok(())
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => DirectoryConfig::from_file(path)?,
        None => DirectoryConfig::default(),
    };
    config.apply_env()?;
    cli.apply(&mut config)?;

    if cli.print_config {
        let text = toml::to_string_pretty(&config).map_err(|e| {
            lorawan_storage::ProtocolError::ConfigError(format!("Failed to render config: {e}"))
        })?;
        println!("{text}");
        return Ok(());
    }

    init_logging(&config.logging)?;
    init_metrics();
    info!(
        address = %config.server.address,
        mode = ?config.server.mode,
        backend = ?config.storage.backend,
        "Starting lorawan-storage"
    );

    let service = DirectoryService::open(config)?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                let _ = shutdown_tx.send(()).await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for Ctrl-C");
                // keep the sender alive so the service keeps running
                std::future::pending::<()>().await;
            }
        }
    });

    let served = service.serve(shutdown_rx).await;
    let closed = service.close();
    served?;
    closed
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("lorawan-storage: {e}");
            ExitCode::FAILURE
        }
    }
}
