//! CLI binary for lectern.
//!
//! A thin shim over the library crate: loads `.env`, reads deployment
//! config from the environment, applies flag overrides, and runs the HTTP
//! service.

use anyhow::{Context, Result};
use clap::Parser;
use lectern::config::AppConfig;
use lectern::server;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Serve PDFs as narrated study material.
#[derive(Parser, Debug)]
#[command(name = "lectern", version, about, long_about = None)]
struct Cli {
    /// Port to listen on (overrides LECTERN_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Data directory for local artifacts and the catalog
    /// (overrides LECTERN_DATA_DIR).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Remote bucket name (overrides LECTERN_BUCKET).
    #[arg(long)]
    bucket: Option<String>,

    /// Log filter, e.g. "lectern=debug" (overrides RUST_LOG).
    #[arg(long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is a convenience for local development; absence is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match &cli.log {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = AppConfig::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(bucket) = cli.bucket {
        config.bucket = bucket;
    }

    let state = server::AppState::from_config(&config)
        .await
        .context("failed to initialise services")?;

    server::serve(state, config.port)
        .await
        .context("server exited with an error")?;

    Ok(())
}
