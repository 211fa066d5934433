//! respkv: a RESP front end for an in-memory key-value store
//!
//! The server speaks a small subset of the Redis wire protocol:
//! - `set key value`
//! - `get key`
//! - `cmd` (client handshake probe)
//!
//! Two interchangeable front ends produce byte-identical replies:
//! - a mio event loop with one poll loop per worker thread
//! - a tokio server with one task per connection
//!
//! Configuration via CLI arguments or TOML file.

mod config;
mod protocols;
mod runtime;
mod server;
mod storage;

use config::{Config, Frontend};
use server::{BoxError, Server};
use std::sync::Arc;
use std::thread;
use storage::{MemoryStore, Store};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), BoxError> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        frontend = ?config.frontend,
        event_listen = %config.event_listen,
        task_listen = %config.task_listen,
        workers = config.worker_count(),
        max_connections = config.max_connections,
        read_buffer_cap = config.read_buffer_cap,
        "Starting respkv server"
    );

    let store: Arc<dyn Store> = MemoryStore::new();

    match config.frontend {
        Frontend::Event => run_event_loop(config, store),
        Frontend::Tasks => run_tasks(config, store),
        Frontend::Both => {
            let event_config = config.clone();
            let event_store = Arc::clone(&store);
            thread::Builder::new()
                .name("event-loop".to_string())
                .spawn(move || {
                    if let Err(e) = run_event_loop(event_config, event_store) {
                        error!(error = %e, "Event loop front end failed");
                    }
                })?;
            run_tasks(config, store)
        }
    }
}

/// Run the mio front end (epoll on Linux, kqueue on macOS)
fn run_event_loop(config: Config, store: Arc<dyn Store>) -> Result<(), BoxError> {
    info!("Using mio event loop front end");
    runtime::run(config, store)?;
    Ok(())
}

/// Run the tokio task-per-connection front end
fn run_tasks(config: Config, store: Arc<dyn Store>) -> Result<(), BoxError> {
    info!("Using tokio task front end");
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let server = Server::new(
        config.task_listen,
        store,
        config.max_connections,
        config.read_buffer_cap,
    );
    rt.block_on(server.run())?;
    Ok(())
}
