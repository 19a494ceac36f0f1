//! mesh-discovery command line front end

use anyhow::Context;
use clap::{Parser, Subcommand};
use mesh_discovery::{
    config::DiscoveryConfig,
    discovery::{DiscoveryCoordinator, HostState, RegistrationOutcome},
    heartbeat::HeartbeatTimer,
    logging::{init_logging, LogConfig},
    network::{allocate_free_port, InterfaceInventory, ReachabilityMonitor},
};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Mesh device discovery
#[derive(Parser, Debug)]
#[command(name = "mesh-discovery")]
#[command(about = "Device discovery and interface inventory for the mesh runtime")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// TOML configuration file (defaults to MESH_* environment variables)
    #[arg(long, global = true, env = "MESH_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the classified interface table
    Interfaces {
        /// Include the loopback interface
        #[arg(long)]
        loopback: bool,
    },
    /// Run discovery until Ctrl-C
    Run,
    /// Register this node with a remote peer
    Register {
        /// Base URL of the peer, e.g. http://10.0.0.2:8080
        target: String,
    },
    /// Print an advisory free TCP port
    FreePort {
        #[arg(long, default_value = "49152")]
        low: u16,

        #[arg(long, default_value = "65535")]
        high: u16,

        #[arg(long, default_value = "0.0.0.0")]
        address: IpAddr,
    },
    /// Check internet reachability once
    Ping,
}

impl Cli {
    fn log_config(&self) -> LogConfig {
        if self.debug {
            LogConfig::debug()
        } else {
            LogConfig::from_env()
        }
    }

    fn load_config(&self) -> anyhow::Result<DiscoveryConfig> {
        let config = match &self.config {
            Some(path) => DiscoveryConfig::from_toml_file(path)
                .with_context(|| format!("reading {}", path.display()))?,
            None => DiscoveryConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }
}

fn build_inventory(config: &DiscoveryConfig) -> Arc<InterfaceInventory> {
    let inventory = InterfaceInventory::new().with_reachability(ReachabilityMonitor::new(
        config.reachability_target,
        config.reachability_floor,
    ));
    let inventory = Arc::new(inventory);
    if let Err(e) = InterfaceInventory::install_global(inventory.clone()) {
        warn!("{}", e);
    }
    inventory.refresh(config.include_loopback);
    inventory
}

fn print_interfaces(inventory: &InterfaceInventory) {
    println!(
        "{:<12} {:<16} {:<16} {:<8} {:<8} {:<8} MAC",
        "INTERFACE", "ADDRESS", "MASK", "PRIVATE", "DNS", "LOOP"
    );
    for record in inventory.interfaces() {
        let mask = std::net::Ipv4Addr::from(record.subnet_mask);
        println!(
            "{:<12} {:<16} {:<16} {:<8} {:<8} {:<8} {}",
            record.interface_name,
            record.address,
            mask,
            record.is_private,
            record.is_dns_eligible,
            record.is_loopback,
            record.mac_address
        );
    }
}

async fn run(config: DiscoveryConfig) -> anyhow::Result<()> {
    let inventory = build_inventory(&config);
    let heartbeat = HeartbeatTimer::new(config.heartbeat_interval);
    inventory.attach_to(&heartbeat, config.interface_poll_ticks);
    inventory.on_new_interface("cli", |record| {
        info!("New interface {} ({})", record.address, record.interface_name)
    });
    inventory.on_interface_lost("cli", |record| {
        info!("Interface lost {} ({})", record.address, record.interface_name)
    });

    let coordinator = DiscoveryCoordinator::builder(config)
        .inventory(inventory.clone())
        .heartbeat(heartbeat.clone())
        .build();

    coordinator
        .subscribe("*", |record| {
            info!(
                "Device {} '{}' at {}",
                record.usn, record.friendly_name, record.location
            )
        })
        .await;
    coordinator.subscribe_lost("*", |record| info!("Device {} gone", record.usn));
    coordinator.on_peer_found("cli", |peer| {
        info!(
            "Compatible peer {} at {} roles {:?}",
            peer.node_id, peer.connect_url, peer.roles
        )
    });

    heartbeat.start();
    coordinator.start().await;
    if let Some(description) = coordinator.self_description() {
        info!("Advertising {} at {}", description.usn, description.location);
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    HostState::global().begin_shutdown();
    coordinator.shutdown().await;
    heartbeat.stop();
    inventory.detach_from(&heartbeat);

    let stats = coordinator.stats().await;
    info!("Final stats: {}", serde_json::to_string(&stats)?);
    Ok(())
}

async fn register(config: DiscoveryConfig, target: String) -> anyhow::Result<()> {
    let inventory = build_inventory(&config);
    let coordinator = DiscoveryCoordinator::builder(config)
        .inventory(inventory)
        .build();
    coordinator.start().await;

    let (tx, rx) = oneshot::channel();
    coordinator.register_with_peer(&target, move |outcome| {
        let _ = tx.send(outcome);
    });
    let outcome = rx.await.context("registration task dropped")?;
    coordinator.shutdown().await;

    match outcome {
        RegistrationOutcome::Registered(peer) => {
            println!("{}", serde_json::to_string_pretty(&peer)?);
            Ok(())
        }
        RegistrationOutcome::ServerError(status) => {
            anyhow::bail!("peer reported server error {status}")
        }
        RegistrationOutcome::Rejected => anyhow::bail!("peer rejected the registration"),
        RegistrationOutcome::Failed(reason) => anyhow::bail!("registration failed: {reason}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.log_config()).map_err(|e| anyhow::anyhow!("logging setup failed: {e}"))?;
    let config = cli.load_config()?;

    match cli.command {
        Command::Interfaces { loopback } => {
            let inventory = InterfaceInventory::new();
            inventory.refresh(loopback || config.include_loopback);
            print_interfaces(&inventory);
        }
        Command::Run => run(config).await?,
        Command::Register { target } => register(config, target).await?,
        Command::FreePort { low, high, address } => {
            let port = allocate_free_port(low, high, address)?;
            println!("{port}");
        }
        Command::Ping => {
            let monitor = ReachabilityMonitor::new(config.reachability_target, config.reachability_floor);
            let online = monitor.force_check().await;
            println!(
                "{} {}",
                config.reachability_target,
                if online { "reachable" } else { "unreachable" }
            );
        }
    }

    Ok(())
}
