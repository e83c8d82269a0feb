//! Network capability used by virtual routers and the group manager.
//!
//! Everything that touches the operating system goes through [`Network`]:
//! interface lookup, address listing, multicast membership and frame I/O.
//! [`crate::MemoryNetwork`] implements it in-process and
//! [`crate::LinuxNetwork`] on raw sockets.

use crate::types::{AddressFamily, is_global_unicast};
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::net::IpAddr;

/// A network interface as seen by the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Interface {
    pub index: u32,
    pub name: String,
}

/// A VRRP message received on, or sent from, an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Index of the interface the frame arrived on or left from
    pub interface: u32,
    pub family: AddressFamily,
    /// IP source address of the sender
    pub source: IpAddr,
    /// VRRP message, without the IP header
    pub payload: Bytes,
}

#[async_trait]
pub trait Network: Send + Sync {
    /// Resolve an interface by name.
    fn interface_by_name(&self, name: &str) -> io::Result<Interface>;

    /// Addresses currently configured on the interface.
    fn addresses(&self, iface: &Interface) -> io::Result<Vec<IpAddr>>;

    /// Start receiving VRRP multicast on the interface. Must be idempotent.
    async fn enable_multicast(&self, iface: &Interface, family: AddressFamily) -> io::Result<()>;

    async fn disable_multicast(&self, iface: &Interface, family: AddressFamily) -> io::Result<()>;

    /// Send one VRRP message to the group multicast address.
    async fn send(&self, iface: &Interface, family: AddressFamily, payload: Bytes) -> io::Result<()>;

    /// Wait for the next VRRP message on the interface.
    async fn recv(&self, iface: &Interface, family: AddressFamily) -> io::Result<Frame>;
}

/// An interface owns an address iff it lists it among its global unicast
/// addresses.
pub fn interface_owns_address(
    network: &dyn Network,
    iface: &Interface,
    addr: &IpAddr,
) -> io::Result<bool> {
    Ok(network
        .addresses(iface)?
        .iter()
        .any(|a| a == addr && is_global_unicast(a)))
}

/// First global unicast address of `family` on the interface.
pub fn primary_address(
    network: &dyn Network,
    iface: &Interface,
    family: AddressFamily,
) -> io::Result<Option<IpAddr>> {
    Ok(network
        .addresses(iface)?
        .into_iter()
        .find(|a| family.matches(a) && is_global_unicast(a)))
}
