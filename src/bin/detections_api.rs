//! detections_api - detection store server for VisionClerk
//!
//! This daemon:
//! 1. Opens (or creates) the detections database
//! 2. Serves `POST`/`GET /api/detections` and `GET /health`
//! 3. Runs until Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::mpsc;

use vision_clerk::{
    api::{ApiConfig, ApiServer},
    config::ServerConfig,
    DetectionStore, InMemoryDetectionStore, SqliteDetectionStore,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Detection store HTTP API for VisionClerk")]
struct Args {
    /// Listen address (overrides PORT / VISION_CLERK_SERVER_ADDR).
    #[arg(long)]
    addr: Option<String>,

    /// SQLite database path (overrides VISION_CLERK_DB_PATH).
    #[arg(long)]
    db: Option<String>,

    /// Keep detections in memory only.
    #[arg(long)]
    memory: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = ServerConfig::load()?;
    if let Some(addr) = args.addr {
        config.addr = addr;
    }
    if let Some(db) = args.db {
        config.db_path = db;
    }

    let store: Box<dyn DetectionStore> = if args.memory {
        log::warn!("detections_api using in-memory store; detections are lost on exit");
        Box::new(InMemoryDetectionStore::new())
    } else {
        Box::new(SqliteDetectionStore::open(&config.db_path)?)
    };

    let api_config = ApiConfig {
        addr: config.addr.clone(),
        ..ApiConfig::default()
    };
    let api_handle = ApiServer::new(api_config, store).spawn()?;
    log::info!(
        "detections_api running. base url {} serving {}",
        api_handle.base_url(),
        if args.memory { ":memory:" } else { &config.db_path }
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("detections_api waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
