//! Standalone hub node.
//!
//! Listens for peers, dials configured remotes, relays log entries
//! across the network, and publishes a `status-report` event channel
//! that logs uptime when fired from anywhere on the network.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use weft_channel::{publish_event, EventChannel, LogLevel, NetworkLogRelay};
use weft_registry::Node;
use weft_session::{Client, Server};

mod config;
mod logging;

use config::NodeConfig;

#[derive(Parser, Debug)]
#[command(name = "weft-node", about = "Standalone hub for a weft node network")]
struct Args {
    /// TCP listen address
    #[arg(long)]
    listen: Option<String>,

    /// Remote hub to dial; repeat for several
    #[arg(long = "connect")]
    connect: Vec<String>,

    /// Name peers register this node's link under
    #[arg(long)]
    name: Option<String>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,

    /// Keepalive emission interval (e.g. "200ms")
    #[arg(long, value_parser = humantime::parse_duration)]
    keepalive: Option<Duration>,

    /// Disconnect timeout for keepalive-speaking peers (e.g. "600ms")
    #[arg(long, value_parser = humantime::parse_duration)]
    disconnect_timeout: Option<Duration>,

    /// Path to a YAML config file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn resolve_config(args: &Args) -> anyhow::Result<(NodeConfig, Vec<config::Notice>)> {
    let mut notices = Vec::new();
    let mut config = match &args.config {
        Some(path) => NodeConfig::load_from_file(path, &mut notices)?,
        None => NodeConfig::load(&mut notices),
    };
    if let Some(listen) = &args.listen {
        config.listen = listen.clone();
    }
    if !args.connect.is_empty() {
        config.connect = args.connect.clone();
    }
    if let Some(name) = &args.name {
        config.name = name.clone();
    }
    if let Some(log_level) = &args.log_level {
        config.log_level = log_level.clone();
    }
    if let Some(keepalive) = args.keepalive {
        config.keepalive = keepalive;
    }
    if let Some(timeout) = args.disconnect_timeout {
        config.disconnect_timeout = timeout;
    }
    Ok((config, notices))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let (config, notices) = resolve_config(&args)?;
    logging::init(&config.name, &config.log_level)?;
    for notice in &notices {
        notice.emit();
    }

    info!(
        name = %config.name,
        listen = %config.listen,
        peers = config.connect.len(),
        "starting hub node"
    );

    let node = Arc::new(Node::new());
    let started = Instant::now();

    let status = EventChannel::new();
    status.on_fire(move || {
        info!(uptime = %humantime::format_duration(truncate_to_seconds(started.elapsed())), "status report requested");
    });
    publish_event(&node, "status-report", status).context("publishing status-report")?;

    NetworkLogRelay::start(&node, LogLevel::Info).context("starting network log relay")?;

    let server = Server::new(node.clone(), config.listen.clone())
        .with_local_name(config.name.clone())
        .with_timing(config.keepalive, config.disconnect_timeout);
    tokio::spawn(async move {
        if let Err(err) = server.run().await {
            error!(%err, "server terminated");
        }
    });

    for remote in &config.connect {
        let link_name = remote.replace([':', '.'], "_");
        let client = Client::new(node.clone(), remote.clone(), link_name)
            .with_local_name(config.name.clone())
            .with_timing(config.keepalive, config.disconnect_timeout);
        tokio::spawn(client.run());
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}

fn truncate_to_seconds(elapsed: Duration) -> Duration {
    Duration::from_secs(elapsed.as_secs())
}
