use std::{error::Error, net::SocketAddr, path::PathBuf, process, sync::Arc, time::Duration};

use clap::Parser;
use log::info;
use spool::{Queue, QueueServer, ServerConfig};

#[derive(Debug, Parser)]
#[command(version, about = "Serve a queue directory over TCP", long_about = None)]
struct Cli {
    /// Path to queue directory
    path: PathBuf,
    /// Listen for new connections at address
    #[arg(short, long, default_value = "0.0.0.0:6666")]
    bind: SocketAddr,
    /// Connections served concurrently; more are turned away
    #[arg(short, long, default_value_t = 64)]
    workers: usize,
    /// Payload copy buffer size in bytes
    #[arg(long, default_value_t = 10 * 1024)]
    buffer_size: usize,
    /// Drop connections idle for this many seconds (0 disables)
    #[arg(long, default_value_t = 0)]
    timeout: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let queue = Arc::new(Queue::open(&cli.path)?);

    let timeout = (cli.timeout > 0).then(|| Duration::from_secs(cli.timeout));
    let config = ServerConfig {
        workers: cli.workers,
        buffer_size: cli.buffer_size,
        read_timeout: timeout,
        write_timeout: timeout,
        ..ServerConfig::new(cli.bind)
    };

    let shutdown = Arc::clone(&queue);
    ctrlc::set_handler(move || {
        info!("shutting down with {} messages queued", shutdown.size());
        process::exit(0);
    })?;

    QueueServer::new(queue, config)?.listen()?;
    Ok(())
}
