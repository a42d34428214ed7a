//! Hemtjänst Daemon - Main entry point
//!
//! Runs the device registry on an in-process bus and keeps a bridge's
//! accessories in sync with it.

mod config;

use anyhow::Result;
use clap::Parser;
use hemtjanst_core::{MemoryTransport, PublishSubscriber, QOS_AT_LEAST_ONCE};
use hemtjanst_homekit::{MemoryBridge, SyncAdapter};
use hemtjanst_registry::{Manager, Router};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "hemtjanst")]
#[command(about = "Smart-home device registry and bridge synchronizer")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "hemtjanst.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Process seed announcements, print the registry and exit
    #[arg(long)]
    once: bool,

    /// Write a default configuration file to the config path and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Hemtjänst v{}", env!("CARGO_PKG_VERSION"));

    if args.init_config {
        config::save_default_config(&args.config)?;
        info!(path = %args.config.display(), "Wrote default configuration");
        return Ok(());
    }

    let config = config::load_config(&args.config)?;
    info!(
        announce = %config.topics.announce,
        leave = %config.topics.leave,
        discover = %config.topics.discover,
        "Configuration loaded"
    );

    let bus = Arc::new(MemoryTransport::new());
    let manager = Arc::new(Manager::new(bus.clone()));
    let bridge = Arc::new(MemoryBridge::new(config.bridge_info()));
    let adapter = Arc::new(SyncAdapter::new(bus.clone(), bridge.clone()));
    manager.add_handler(adapter.clone()).await;
    Router::new(manager.clone(), config.to_router_config()).start();

    for seed in &config.seeds {
        bus.publish(
            &config.announce_topic(seed),
            seed.metadata.as_bytes(),
            QOS_AT_LEAST_ONCE,
            true,
        );
    }

    if args.once {
        // Last announce per topic decides whether the device should exist
        let mut expected: HashMap<&str, bool> = HashMap::new();
        for seed in &config.seeds {
            expected.insert(&seed.topic, !seed.metadata.is_empty());
        }
        let present = expected.values().filter(|p| **p).count();
        let wait = Duration::from_millis(config.topics.discover_delay_ms) + Duration::from_secs(1);
        if !settle(&manager, &adapter, present, wait).await {
            warn!(expected = present, "Registry did not settle, printing partial state");
        }

        let mut devices: Vec<_> = manager.get_all().await.into_values().collect();
        devices.sort_by(|a, b| a.topic.cmp(&b.topic));
        println!("Registered {} devices:", devices.len());
        for device in devices {
            println!(
                "  - {} ({}) type={} reachable={}",
                device.name, device.topic, device.device_type, device.reachable
            );
            for (name, feature) in device.features() {
                println!("    {}: get={} set={}", name, feature.get_topic, feature.set_topic);
            }
            if let Some(accessory) = adapter.accessory(&device.topic).await {
                println!(
                    "    accessory {:#018x}, {} services",
                    accessory.id,
                    accessory.services.len()
                );
            }
        }
    } else {
        tokio::signal::ctrl_c().await?;
        info!(accessories = bridge.len(), "Shutting down");
    }

    Ok(())
}

/// Wait until registry and adapter both hold `expected` devices
async fn settle(manager: &Manager, adapter: &SyncAdapter, expected: usize, wait: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + wait;
    while tokio::time::Instant::now() < deadline {
        if manager.len().await == expected && adapter.len().await == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
