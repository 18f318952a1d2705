//! plainserve: a minimal HTTP/1.1 subset server
//!
//! Routes:
//! - `/`: liveness check
//! - `/echo/<value>`: echoes `<value>` as the body
//! - `/user-agent`: reflects the `User-Agent` header
//! - `/files/<name>`: reads (GET) or writes (other methods) a file beneath
//!   the storage directory
//!
//! One request per connection; configuration via CLI arguments or TOML file.

mod compress;
mod config;
mod protocol;
mod router;
mod server;
mod storage;

use config::Config;
use server::Server;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
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
        listen = %config.listen,
        directory = %config.directory.display(),
        workers = ?config.workers,
        max_request_size = config.max_request_size,
        compression = config.compression,
        "Starting plainserve"
    );

    if !config.directory.is_dir() {
        warn!(
            directory = %config.directory.display(),
            "Storage directory does not exist, /files/ requests will fail"
        );
    }

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.build()?;

    let server = Server::new(config);
    runtime.block_on(server.run())
}
