//! Strata Server - HTTP ingestion for the storage engine

mod api;

use anyhow::Context;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use strata_core::storage::{Engine, StorageConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// Data directory
    pub data_dir: PathBuf,
}

impl ServerConfig {
    /// Read `STRATA_ADDR` and `STRATA_DATA_DIR`, falling back to defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let http_addr = std::env::var("STRATA_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8000".to_string())
            .parse()
            .context("invalid STRATA_ADDR")?;
        let data_dir = std::env::var_os("STRATA_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data"));
        Ok(Self {
            http_addr,
            data_dir,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = ServerConfig::from_env()?;

    info!("Starting Strata server...");
    info!("Data directory: {:?}", config.data_dir);

    let storage_config = StorageConfig {
        data_dir: config.data_dir.clone(),
        ..Default::default()
    };
    let engine = Engine::open(storage_config)
        .with_context(|| format!("failed to open storage at {:?}", config.data_dir))?;
    let engine = Arc::new(engine);

    let app = api::create_router(engine);

    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!("Strata server listening on http://{}", config.http_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
