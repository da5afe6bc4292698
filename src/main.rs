//! WinTest Bridge CLI - relay cluster and skimmer spots to WinTest.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wintest_bridge::{
    cat::{CatControl, KenwoodCat, available_ports},
    config::Config,
    extractor::SpotExtractor,
    metrics::start_metrics_server,
    poll::PollLoop,
    relay::CommandRelay,
    session::SessionEndpoint,
    stats::BridgeStats,
    udp::UdpChannel,
};

/// WinTest Bridge - relay DX cluster and CW skimmer spots to WinTest over UDP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "WINTEST_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Do not connect to the DX cluster
    #[arg(long)]
    no_cluster: bool,

    /// Do not connect to the skimmer
    #[arg(long)]
    no_skimmer: bool,

    /// Maximum runtime in seconds (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_runtime: u64,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = match args.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.validate().context("Invalid configuration")?;

    if args.check_config {
        println!("Configuration OK");
        return Ok(());
    }

    info!("WinTest Bridge {} starting...", env!("CARGO_PKG_VERSION"));
    info!("Skimmer follow: {}", config.follow_mode);
    info!(
        "UDP: {} -> {}",
        config.udp.bind_addr(),
        config.udp.broadcast_addr()
    );

    let cat = if config.radio_follow {
        Some(open_radio(&config)?)
    } else {
        None
    };

    let udp = UdpChannel::bind(
        &config.udp.bind_addr(),
        &config.udp.broadcast_addr(),
        config.udp_receive_timeout(),
    )
    .await
    .context("Failed to open the WinTest UDP socket")?;

    // Create shared statistics
    let stats = Arc::new(BridgeStats::new());

    if config.metrics.enabled {
        let port = config.metrics.port;
        let stats_clone = Arc::clone(&stats);
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(port, stats_clone).await {
                error!("Metrics server failed: {}", e);
            }
        });
    }

    if config.stats_interval > 0 {
        let stats_clone = Arc::clone(&stats);
        let stats_interval = config.stats_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(stats_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                info!("\n{}", stats_clone.summary());
            }
        });
    }

    let skimmer = start_feed(!args.no_skimmer, || config.skimmer_session());
    let cluster = start_feed(!args.no_cluster, || config.cluster_session());

    let mut relay = CommandRelay::new(config.relay_settings(), config.band_table());
    if let Some(cat) = cat {
        relay = relay.with_cat(cat);
    }

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle Ctrl+C
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Shutdown signal received");
        let _ = shutdown_tx_clone.send(true);
    });

    // Optional max runtime
    if args.max_runtime > 0 {
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(args.max_runtime)).await;
            info!("Max runtime reached");
            let _ = shutdown_tx_clone.send(true);
        });
    }

    let mut poll = PollLoop::new(
        skimmer,
        cluster,
        udp,
        SpotExtractor::new(config.spot_filters()),
        relay,
        Arc::clone(&stats),
    )
    .with_reconnect_threshold(config.reconnect_threshold);

    poll.run(shutdown_rx).await;

    // Print final statistics
    println!("\n\nFINAL STATISTICS");
    println!("{}", stats.summary());

    Ok(())
}

/// Open the radio and make sure it answers. Either failure is fatal.
fn open_radio(config: &Config) -> Result<Box<dyn CatControl>> {
    let mut cat = KenwoodCat::new(config.radio.clone());

    if let Err(e) = cat.open() {
        error!("{}", e);
        let ports = available_ports();
        if ports.is_empty() {
            error!("No serial ports found");
        } else {
            error!("Available serial ports: {}", ports.join(", "));
        }
        bail!("Cannot open radio port {}", config.radio.port);
    }

    match cat.check_radio() {
        Ok(id) => info!("Radio answered {}", id),
        Err(e) => {
            cat.close();
            return Err(e).with_context(|| {
                format!("No {} answering on {}", config.radio.model, config.radio.port)
            });
        }
    }

    Ok(Box::new(cat))
}

/// Build one feed and start its login. The poll loop picks up the result
/// and retries a failed login.
fn start_feed(
    enabled: bool,
    session_config: impl FnOnce() -> wintest_bridge::SessionConfig,
) -> Option<SessionEndpoint> {
    if !enabled {
        return None;
    }

    let mut session = SessionEndpoint::new(session_config());
    session.start_connect();
    Some(session)
}
