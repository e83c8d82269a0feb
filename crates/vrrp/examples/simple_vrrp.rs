//! Simple VRRP example
//!
//! Loads a JSON configuration, registers every router with a group manager
//! on raw sockets, starts them and reports state until Ctrl-C.
//!
//! Usage:
//!   sudo target/release/examples/simple_vrrp vrrp.json
//!
//! Or with capabilities:
//!   sudo setcap cap_net_raw+ep target/release/examples/simple_vrrp
//!   target/release/examples/simple_vrrp vrrp.json
//!
//! Example configuration:
//!
//! ```json
//! { "routers": [ { "vrid": 1, "priority": 150, "interface": "eth0", "addresses": ["192.168.1.1"] } ] }
//! ```

use std::env;
use std::time::Duration;
use tokio::signal;
use tokio::time::interval;
use tracing::info;
use vrrp::config::Config;
use vrrp::{GroupManager, LinuxNetwork};

#[tokio::main]
async fn main() -> common::Result<()> {
    let path = env::args().nth(1).unwrap_or_else(|| "vrrp.json".to_string());
    let config = Config::load(&path)?;

    match config.logging.format.as_deref() {
        Some("json") => common::logging::init_json(),
        _ => common::logging::init(),
    }
    info!(path = %path, routers = config.routers.len(), "Loaded configuration");

    let network = LinuxNetwork::new();
    let manager = GroupManager::new(network.clone());

    let mut routers = Vec::new();
    for entry in &config.routers {
        let router = entry.build(network.clone()).await?;
        manager.register(router.clone()).await?;
        router.start().await?;
        routers.push(router);
    }

    let mut ticker = interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for router in &routers {
                    let stats = router.stats().await;
                    info!(
                        vrid = router.vrid(),
                        family = %router.family(),
                        state = %router.state().await,
                        sent = stats.adverts_sent,
                        received = stats.adverts_received,
                        "Status"
                    );
                }
            }
            _ = signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}
