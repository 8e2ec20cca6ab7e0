use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lancopy::{Config, Peer};

#[derive(Parser, Debug)]
#[command(name = "lancopy")]
#[command(about = "Serverless LAN outbox/inbox file synchronization")]
struct Args {
    /// JSON config file; flags given on the command line win over it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Name broadcast to other machines (default: system hostname)
    #[arg(short, long)]
    name: Option<String>,

    /// Directory whose contents are offered to peers
    #[arg(long)]
    outbox: Option<PathBuf>,

    /// Directory that pulled files are written into
    #[arg(long)]
    inbox: Option<PathBuf>,

    /// UDP port for presence broadcasts
    #[arg(long)]
    discovery_port: Option<u16>,

    /// TCP port for the inventory service
    #[arg(long)]
    inventory_port: Option<u16>,

    /// TCP port for file transfers
    #[arg(long)]
    data_port: Option<u16>,

    /// Seconds between full-network sync sweeps (0 disables sweeping)
    #[arg(long, default_value = "10")]
    sync_interval: u64,

    /// Directory for a daily-rotated log file (logs go to stderr only
    /// when absent)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> Result<(Config, u64, Option<PathBuf>, bool)> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("loading config file {}", path.display()))?,
            None => Config::new(
                Config::system_hostname(),
                PathBuf::from("out"),
                PathBuf::from("in"),
            ),
        };

        if let Some(name) = self.name {
            config.advertised_name = name;
        }
        if let Some(outbox) = self.outbox {
            config.outbox = outbox;
        }
        if let Some(inbox) = self.inbox {
            config.inbox = inbox;
        }
        if let Some(port) = self.discovery_port {
            config.discovery_port = port;
        }
        if let Some(port) = self.inventory_port {
            config.inventory_port = port;
        }
        if let Some(port) = self.data_port {
            config.data_port = port;
        }

        Ok((config, self.sync_interval, self.log_dir, self.verbose))
    }
}

fn init_logging(
    log_dir: Option<&PathBuf>,
    verbose: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "lancopy.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (config, sync_interval, log_dir, verbose) = args.into_config()?;
    let _log_guard = init_logging(log_dir.as_ref(), verbose);

    info!(
        "lancopy starting as '{}' (outbox {}, inbox {})",
        config.advertised_name,
        config.outbox.display(),
        config.inbox.display()
    );

    let peer = Peer::new(config);
    peer.start();
    let client = peer.client();

    let sweep = async {
        if sync_interval == 0 {
            futures::future::pending::<()>().await;
        }
        let mut ticker = time::interval(Duration::from_secs(sync_interval));
        loop {
            ticker.tick().await;
            for host in peer.hosts() {
                match client.sync_all(&host).await {
                    Ok(0) => {}
                    Ok(n) => info!("pulled {} files from {}", n, host.name),
                    Err(e) => warn!("sync with {} failed: {}", host.name, e),
                }
            }
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => info!("interrupt received, shutting down"),
        _ = sweep => {}
    }

    peer.shutdown();
    peer.wait_until_stopped().await;
    Ok(())
}
