//! Virtual Router Redundancy Protocol (VRRP) Version 3
//!
//! Pure Rust implementation of RFC 5798 failover for a set of virtual
//! IP addresses shared by a group of routers.
//!
//! # Features
//!
//! - VRRPv3 advertisements for IPv4 and IPv6
//! - Priority-based master election with preemption
//! - Address owner (priority 255) takes over immediately
//! - Graceful shutdown (priority 0 advertisements)
//! - Per-host registry enforcing group and address exclusivity
//!
//! # Example
//!
//! ```no_run
//! use vrrp::{Flags, GroupManager, LinuxNetwork, VirtualRouter};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let network = LinuxNetwork::new();
//! let manager = GroupManager::new(network.clone());
//!
//! let router = VirtualRouter::new(1, 100, Flags::default(), "eth0", ["192.168.1.1"], network)?;
//! manager.register(router.clone()).await?;
//!
//! // Requires CAP_NET_RAW
//! router.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod error;
mod manager;
mod memory;
mod network;
mod packet;
mod router;
#[cfg(target_os = "linux")]
mod socket;
mod state_machine;
mod types;

pub use error::{Result, VRRPError};
pub use manager::{GroupManager, RouterKey};
pub use memory::MemoryNetwork;
pub use network::{Frame, Interface, Network, interface_owns_address, primary_address};
pub use packet::{DecodeError, VRRPPacket, internet_checksum};
pub use router::{ArmedTimer, TimerKind, VirtualRouter};
#[cfg(target_os = "linux")]
pub use socket::LinuxNetwork;
pub use state_machine::{Action, Advertisement, Event, Local, Transition, transition};
pub use types::{
    AddressFamily, DEFAULT_PRIORITY, Flags, OWNER_PRIORITY, VRRP_MULTICAST_ADDR_V4,
    VRRP_MULTICAST_ADDR_V6, VRRP_PROTOCOL, VRRP_VERSION, VRRPState, VRRPStats,
};
