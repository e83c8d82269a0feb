//! Registry of the virtual routers running on one host.
//!
//! The manager enforces the group-wide rules before a router may start:
//! one router per (interface, family, group id), priority 255 only for
//! addresses the interface owns, and no address claimed by two routers.
//! It also joins the VRRP multicast group once per interface and family and
//! runs one receive task there, fanning inbound frames out to routers.

use crate::error::{Result, VRRPError};
use crate::network::{Frame, Interface, Network, interface_owns_address};
use crate::packet::VRRPPacket;
use crate::router::VirtualRouter;
use crate::types::{AddressFamily, VRRPState};
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::IpAddr;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Composite lookup key for a registered router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouterKey {
    pub interface: u32,
    pub family: AddressFamily,
    pub vrid: u8,
}

impl RouterKey {
    pub fn of(router: &VirtualRouter) -> Self {
        Self {
            interface: router.interface().index,
            family: router.family(),
            vrid: router.vrid(),
        }
    }
}

type MulticastKey = (u32, AddressFamily);

/// Pause before calling `recv` again after it failed
const RECV_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Registry {
    routers: HashMap<AddressFamily, Vec<Arc<VirtualRouter>>>,
    index: HashMap<RouterKey, Arc<VirtualRouter>>,
    addresses: HashSet<IpAddr>,
    multicast: HashMap<MulticastKey, Interface>,
}

impl Registry {
    fn lookup(&self, router: &Arc<VirtualRouter>) -> Result<RouterKey> {
        let key = RouterKey::of(router);
        match self.index.get(&key) {
            Some(registered) if Arc::ptr_eq(registered, router) => Ok(key),
            _ => Err(VRRPError::NotRegistered(router.vrid())),
        }
    }
}

pub struct GroupManager {
    network: Arc<dyn Network>,
    registry: Arc<Mutex<Registry>>,
    receivers: std::sync::Mutex<HashMap<MulticastKey, JoinHandle<()>>>,
}

impl GroupManager {
    pub fn new(network: Arc<dyn Network>) -> Self {
        Self {
            network,
            registry: Arc::new(Mutex::new(Registry::default())),
            receivers: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Add a router to the registry.
    ///
    /// Either every check passes and the router is registered, or nothing
    /// changes. Checks run in order: duplicate group, address ownership for
    /// the owner, address exclusivity, multicast join.
    pub async fn register(&self, router: Arc<VirtualRouter>) -> Result<()> {
        let key = RouterKey::of(&router);
        let mut registry = self.registry.lock().await;

        if registry.index.contains_key(&key) {
            return Err(VRRPError::AlreadyExists {
                vrid: key.vrid,
                family: key.family,
                interface: router.interface().name.clone(),
            });
        }

        let addresses = router.addresses().await;
        if router.is_owner() {
            for addr in &addresses {
                if !interface_owns_address(&*self.network, router.interface(), addr)? {
                    return Err(VRRPError::NotAddressOwner {
                        interface: router.interface().name.clone(),
                        address: *addr,
                    });
                }
            }
        }
        if let Some(addr) = addresses.iter().find(|a| registry.addresses.contains(a)) {
            return Err(VRRPError::AddressInUse(*addr));
        }

        self.ensure_multicast(&mut registry, router.interface(), key.family)
            .await?;

        registry.addresses.extend(addresses);
        registry
            .routers
            .entry(key.family)
            .or_default()
            .push(router.clone());
        registry.index.insert(key, router);

        info!(
            vrid = key.vrid,
            family = %key.family,
            interface = key.interface,
            "Registered virtual router"
        );
        Ok(())
    }

    /// Remove a stopped router from the registry and release its addresses.
    ///
    /// The multicast group is left, and its receive task stopped, once no
    /// registered router uses that interface and family any more.
    pub async fn unregister(&self, router: &Arc<VirtualRouter>) -> Result<()> {
        let mut registry = self.registry.lock().await;
        let key = registry.lookup(router)?;

        let state = router.state().await;
        if matches!(state, VRRPState::Backup | VRRPState::Master) {
            return Err(VRRPError::RouterActive {
                vrid: router.vrid(),
                state,
            });
        }

        registry.index.remove(&key);
        if let Some(list) = registry.routers.get_mut(&key.family) {
            list.retain(|r| !Arc::ptr_eq(r, router));
        }
        for addr in router.addresses().await {
            registry.addresses.remove(&addr);
        }

        let in_use = registry
            .index
            .keys()
            .any(|k| k.interface == key.interface && k.family == key.family);
        if !in_use {
            // Left under the registry lock so a concurrent register cannot
            // join in between and lose its membership.
            if let Some(iface) = registry.multicast.remove(&(key.interface, key.family)) {
                self.abort_receiver((key.interface, key.family));
                match self.network.disable_multicast(&iface, key.family).await {
                    Ok(()) => info!(interface = %iface.name, family = %key.family, "Left VRRP multicast group"),
                    Err(e) => warn!(interface = %iface.name, error = %e, "Failed to leave multicast group"),
                }
            }
        }

        info!(vrid = key.vrid, family = %key.family, "Unregistered virtual router");
        Ok(())
    }

    /// Add an address to a registered router under the same rules as
    /// [`GroupManager::register`]. Returns false if the router already had it
    /// or it is of the wrong family.
    pub async fn add_address(&self, router: &Arc<VirtualRouter>, addr: IpAddr) -> Result<bool> {
        let mut registry = self.registry.lock().await;
        registry.lookup(router)?;

        if !router.family().matches(&addr) {
            return Ok(false);
        }
        if router.is_owner() && !interface_owns_address(&*self.network, router.interface(), &addr)? {
            return Err(VRRPError::NotAddressOwner {
                interface: router.interface().name.clone(),
                address: addr,
            });
        }
        if registry.addresses.contains(&addr) {
            return if router.addresses().await.contains(&addr) {
                Ok(false)
            } else {
                Err(VRRPError::AddressInUse(addr))
            };
        }

        let added = router.add_address(addr).await;
        if added {
            registry.addresses.insert(addr);
        }
        Ok(added)
    }

    pub async fn remove_address(&self, router: &Arc<VirtualRouter>, addr: IpAddr) -> Result<bool> {
        let mut registry = self.registry.lock().await;
        registry.lookup(router)?;

        let removed = router.remove_address(&addr).await;
        if removed {
            registry.addresses.remove(&addr);
        }
        Ok(removed)
    }

    pub async fn get(&self, interface: u32, family: AddressFamily, vrid: u8) -> Option<Arc<VirtualRouter>> {
        let key = RouterKey {
            interface,
            family,
            vrid,
        };
        self.registry.lock().await.index.get(&key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.registry.lock().await.index.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Registered routers of one family, in registration order.
    pub async fn routers(&self, family: AddressFamily) -> Vec<Arc<VirtualRouter>> {
        self.registry
            .lock()
            .await
            .routers
            .get(&family)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn is_address_claimed(&self, addr: &IpAddr) -> bool {
        self.registry.lock().await.addresses.contains(addr)
    }

    pub async fn multicast_enabled(&self, interface: u32, family: AddressFamily) -> bool {
        self.registry
            .lock()
            .await
            .multicast
            .contains_key(&(interface, family))
    }

    /// Decode a received frame and hand it to the router it belongs to.
    ///
    /// Returns false if the frame was dropped.
    pub async fn dispatch(&self, frame: &Frame) -> bool {
        dispatch_frame(&self.registry, frame).await
    }

    /// Signal every router on `ifname` that the interface went down.
    pub async fn interface_down(&self, ifname: &str) -> usize {
        let routers: Vec<_> = self
            .registry
            .lock()
            .await
            .index
            .values()
            .filter(|r| r.interface().name == ifname)
            .cloned()
            .collect();

        for router in &routers {
            if let Err(e) = router.interface_down().await {
                warn!(vrid = router.vrid(), error = %e, "Failed to take router down");
            }
        }
        routers.len()
    }

    /// Stop and unregister every router, leave all multicast groups and stop
    /// the receive tasks.
    pub async fn shutdown(&self) {
        let (routers, joined) = {
            let mut registry = self.registry.lock().await;
            registry.routers.clear();
            registry.addresses.clear();
            let routers: Vec<_> = registry.index.drain().map(|(_, r)| r).collect();
            let joined: Vec<_> = registry.multicast.drain().collect();
            (routers, joined)
        };

        for router in &routers {
            if let Err(e) = router.stop().await {
                warn!(vrid = router.vrid(), error = %e, "Failed to stop router");
            }
        }

        self.abort_receivers();

        for ((_, family), iface) in joined {
            if let Err(e) = self.network.disable_multicast(&iface, family).await {
                warn!(interface = %iface.name, error = %e, "Failed to leave multicast group");
            }
        }

        info!(routers = routers.len(), "Group manager shut down");
    }

    async fn ensure_multicast(
        &self,
        registry: &mut Registry,
        iface: &Interface,
        family: AddressFamily,
    ) -> Result<()> {
        let key = (iface.index, family);
        if registry.multicast.contains_key(&key) {
            return Ok(());
        }

        self.network.enable_multicast(iface, family).await?;
        registry.multicast.insert(key, iface.clone());
        self.spawn_receiver(iface.clone(), family);
        info!(interface = %iface.name, %family, "Joined VRRP multicast group");
        Ok(())
    }

    fn spawn_receiver(&self, iface: Interface, family: AddressFamily) {
        let key = (iface.index, family);
        let handle = tokio::spawn(receive_loop(
            self.registry.clone(),
            self.network.clone(),
            iface,
            family,
        ));
        let mut receivers = self.receivers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = receivers.insert(key, handle) {
            old.abort();
        }
    }

    fn abort_receiver(&self, key: MulticastKey) {
        let mut receivers = self.receivers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = receivers.remove(&key) {
            handle.abort();
        }
    }

    fn abort_receivers(&self) {
        let mut receivers = self.receivers.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in receivers.drain() {
            handle.abort();
        }
    }
}

impl Drop for GroupManager {
    fn drop(&mut self) {
        self.abort_receivers();
    }
}

/// Feed frames from one (interface, family) to the registry. Receive errors
/// are retried after a short pause; the task runs until the manager aborts it.
async fn receive_loop(
    registry: Arc<Mutex<Registry>>,
    network: Arc<dyn Network>,
    iface: Interface,
    family: AddressFamily,
) {
    debug!(interface = %iface.name, %family, "Receiver started");
    loop {
        match network.recv(&iface, family).await {
            Ok(frame) => {
                dispatch_frame(&registry, &frame).await;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(interface = %iface.name, %family, error = %e, "Receive failed, retrying");
                sleep(RECV_RETRY_DELAY).await;
            }
        }
    }
}

async fn dispatch_frame(registry: &Mutex<Registry>, frame: &Frame) -> bool {
    let packet = match VRRPPacket::decode(&frame.payload, frame.family) {
        Ok(packet) => packet,
        Err(e) => {
            debug!(source = %frame.source, error = %e, "Dropping malformed frame");
            return false;
        }
    };

    let key = RouterKey {
        interface: frame.interface,
        family: frame.family,
        vrid: packet.vrid,
    };
    let router = registry.lock().await.index.get(&key).cloned();

    match router {
        Some(router) => router.handle_advertisement(frame.source, &packet).await,
        None => {
            debug!(vrid = packet.vrid, source = %frame.source, "No local router for frame");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryNetwork;
    use crate::types::Flags;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::time::sleep;

    fn network() -> Arc<MemoryNetwork> {
        let net = MemoryNetwork::new();
        net.add_interface("eth0", &["10.0.0.5".parse().unwrap(), "2001:db8::5".parse().unwrap()]);
        net.add_interface("eth1", &["10.1.0.5".parse().unwrap()]);
        net
    }

    fn router(net: &Arc<MemoryNetwork>, vrid: u8, priority: u8, ifname: &str, addrs: &[&str]) -> Arc<VirtualRouter> {
        VirtualRouter::new(vrid, priority, Flags::default(), ifname, addrs.iter(), net.clone()).unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_register_duplicate_group() {
        let net = network();
        let manager = GroupManager::new(net.clone());

        manager.register(router(&net, 1, 100, "eth0", &["10.0.0.100"])).await.unwrap();
        let err = manager
            .register(router(&net, 1, 120, "eth0", &["10.0.0.101"]))
            .await
            .unwrap_err();
        assert!(matches!(err, VRRPError::AlreadyExists { vrid: 1, .. }));
        assert_eq!(manager.len().await, 1);
        assert!(!manager.is_address_claimed(&ip("10.0.0.101")).await);

        // Same group id is fine on another interface or family.
        manager.register(router(&net, 1, 100, "eth1", &["10.1.0.100"])).await.unwrap();
        let v6 = VirtualRouter::new(1, 100, Flags::default() | Flags::IPV6, "eth0", ["2001:db8::100"], net.clone())
            .unwrap();
        manager.register(v6).await.unwrap();
        assert_eq!(manager.len().await, 3);
        assert_eq!(manager.routers(AddressFamily::V4).await.len(), 2);
        assert_eq!(manager.routers(AddressFamily::V6).await.len(), 1);
    }

    #[tokio::test]
    async fn test_same_priority_different_groups_do_not_collide() {
        let net = network();
        let manager = GroupManager::new(net.clone());

        manager.register(router(&net, 1, 100, "eth0", &["10.0.0.100"])).await.unwrap();
        manager.register(router(&net, 2, 100, "eth0", &["10.0.0.101"])).await.unwrap();

        let eth0 = net.interface_by_name("eth0").unwrap();
        assert_eq!(manager.get(eth0.index, AddressFamily::V4, 1).await.unwrap().vrid(), 1);
        assert_eq!(manager.get(eth0.index, AddressFamily::V4, 2).await.unwrap().vrid(), 2);
        assert!(manager.get(eth0.index, AddressFamily::V6, 1).await.is_none());
    }

    #[tokio::test]
    async fn test_register_address_in_use() {
        let net = network();
        let manager = GroupManager::new(net.clone());

        manager
            .register(router(&net, 1, 100, "eth0", &["10.0.0.100", "10.0.0.101"]))
            .await
            .unwrap();
        let err = manager
            .register(router(&net, 2, 100, "eth1", &["10.0.0.200", "10.0.0.101"]))
            .await
            .unwrap_err();
        assert!(matches!(err, VRRPError::AddressInUse(a) if a == ip("10.0.0.101")));
        assert_eq!(manager.len().await, 1);
        assert!(!manager.is_address_claimed(&ip("10.0.0.200")).await);

        // Nothing was joined for the rejected router.
        let eth1 = net.interface_by_name("eth1").unwrap();
        assert!(!manager.multicast_enabled(eth1.index, AddressFamily::V4).await);
    }

    #[tokio::test]
    async fn test_owner_must_own_addresses() {
        let net = network();
        let manager = GroupManager::new(net.clone());

        manager.register(router(&net, 1, 100, "eth0", &["10.0.0.100"])).await.unwrap();

        // Not owned and in use: ownership is reported first.
        let err = manager
            .register(router(&net, 2, 255, "eth0", &["10.0.0.100"]))
            .await
            .unwrap_err();
        assert!(matches!(err, VRRPError::NotAddressOwner { .. }));

        manager.register(router(&net, 3, 255, "eth0", &["10.0.0.5"])).await.unwrap();
        assert_eq!(manager.len().await, 2);
    }

    #[tokio::test]
    async fn test_multicast_enabled_once_per_interface() {
        let net = network();
        let manager = GroupManager::new(net.clone());
        let eth0 = net.interface_by_name("eth0").unwrap();

        manager.register(router(&net, 1, 100, "eth0", &["10.0.0.100"])).await.unwrap();
        manager.register(router(&net, 2, 100, "eth0", &["10.0.0.101"])).await.unwrap();
        manager.register(router(&net, 3, 100, "eth0", &["10.0.0.102"])).await.unwrap();

        assert_eq!(net.multicast_enable_calls(&eth0, AddressFamily::V4), 1);
        assert!(manager.multicast_enabled(eth0.index, AddressFamily::V4).await);
    }

    #[tokio::test]
    async fn test_multicast_failure_leaves_no_state() {
        let net = network();
        let manager = GroupManager::new(net.clone());
        let eth0 = net.interface_by_name("eth0").unwrap();

        net.fail_multicast(true);
        let err = manager
            .register(router(&net, 1, 100, "eth0", &["10.0.0.100"]))
            .await
            .unwrap_err();
        assert!(matches!(err, VRRPError::Transport(_)));
        assert!(manager.is_empty().await);
        assert!(!manager.is_address_claimed(&ip("10.0.0.100")).await);
        assert!(!manager.multicast_enabled(eth0.index, AddressFamily::V4).await);

        net.fail_multicast(false);
        manager.register(router(&net, 1, 100, "eth0", &["10.0.0.100"])).await.unwrap();
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn test_unregister_requires_stop() {
        let net = network();
        let manager = GroupManager::new(net.clone());
        let r = router(&net, 1, 100, "eth0", &["10.0.0.100"]);

        manager.register(r.clone()).await.unwrap();
        r.start().await.unwrap();
        assert!(matches!(
            manager.unregister(&r).await,
            Err(VRRPError::RouterActive { vrid: 1, state: VRRPState::Backup })
        ));

        r.stop().await.unwrap();
        manager.unregister(&r).await.unwrap();
        assert!(manager.is_empty().await);
        let eth0 = net.interface_by_name("eth0").unwrap();
        assert!(!manager.multicast_enabled(eth0.index, AddressFamily::V4).await);
        assert!(!net.multicast_joined(&eth0, AddressFamily::V4));
        assert!(!manager.is_address_claimed(&ip("10.0.0.100")).await);
        assert!(matches!(manager.unregister(&r).await, Err(VRRPError::NotRegistered(1))));

        // The address is free again.
        manager.register(router(&net, 2, 100, "eth0", &["10.0.0.100"])).await.unwrap();
    }

    #[tokio::test]
    async fn test_multicast_left_with_last_router() {
        let net = network();
        let manager = GroupManager::new(net.clone());
        let eth0 = net.interface_by_name("eth0").unwrap();
        let a = router(&net, 1, 100, "eth0", &["10.0.0.100"]);
        let b = router(&net, 2, 100, "eth0", &["10.0.0.101"]);
        let other = router(&net, 3, 100, "eth1", &["10.1.0.100"]);
        for r in [&a, &b, &other] {
            manager.register(r.clone()).await.unwrap();
        }

        manager.unregister(&a).await.unwrap();
        assert!(net.multicast_joined(&eth0, AddressFamily::V4));
        assert!(manager.multicast_enabled(eth0.index, AddressFamily::V4).await);

        manager.unregister(&b).await.unwrap();
        assert!(!net.multicast_joined(&eth0, AddressFamily::V4));
        assert!(!manager.multicast_enabled(eth0.index, AddressFamily::V4).await);
        assert!(!manager.receivers.lock().unwrap().contains_key(&(eth0.index, AddressFamily::V4)));

        // eth1 is untouched.
        let eth1 = net.interface_by_name("eth1").unwrap();
        assert!(net.multicast_joined(&eth1, AddressFamily::V4));
        assert_eq!(manager.receivers.lock().unwrap().len(), 1);

        // Registering again joins afresh.
        manager.register(a).await.unwrap();
        assert_eq!(net.multicast_enable_calls(&eth0, AddressFamily::V4), 2);
        assert!(net.multicast_joined(&eth0, AddressFamily::V4));
    }

    #[tokio::test]
    async fn test_add_and_remove_address() {
        let net = network();
        let manager = GroupManager::new(net.clone());
        let a = router(&net, 1, 100, "eth0", &["10.0.0.100"]);
        let b = router(&net, 2, 100, "eth0", &["10.0.0.101"]);
        let owner = router(&net, 3, 255, "eth0", &["10.0.0.5"]);
        manager.register(a.clone()).await.unwrap();
        manager.register(b.clone()).await.unwrap();
        manager.register(owner.clone()).await.unwrap();

        assert!(manager.add_address(&a, ip("10.0.0.110")).await.unwrap());
        assert!(!manager.add_address(&a, ip("10.0.0.110")).await.unwrap());
        assert!(!manager.add_address(&a, ip("2001:db8::1")).await.unwrap());
        assert!(matches!(
            manager.add_address(&b, ip("10.0.0.110")).await,
            Err(VRRPError::AddressInUse(_))
        ));
        assert!(matches!(
            manager.add_address(&owner, ip("10.0.0.120")).await,
            Err(VRRPError::NotAddressOwner { .. })
        ));
        assert_eq!(a.address_count().await, 2);

        assert!(manager.remove_address(&a, ip("10.0.0.110")).await.unwrap());
        assert!(!manager.is_address_claimed(&ip("10.0.0.110")).await);
        assert!(manager.add_address(&b, ip("10.0.0.110")).await.unwrap());

        let stranger = router(&net, 9, 100, "eth1", &["10.1.0.100"]);
        assert!(matches!(
            manager.add_address(&stranger, ip("10.1.0.101")).await,
            Err(VRRPError::NotRegistered(9))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_routes_by_group() {
        let net = network();
        let manager = GroupManager::new(net.clone());
        let eth0 = net.interface_by_name("eth0").unwrap();
        let a = router(&net, 1, 100, "eth0", &["10.0.0.100"]);
        let b = router(&net, 2, 100, "eth0", &["10.0.0.101"]);
        manager.register(a.clone()).await.unwrap();
        manager.register(b.clone()).await.unwrap();
        a.start().await.unwrap();
        b.start().await.unwrap();

        let frame = |payload: Bytes| Frame {
            interface: eth0.index,
            family: AddressFamily::V4,
            source: ip("10.0.0.9"),
            payload,
        };

        let advert = VRRPPacket::new(2, 200, 100, vec![ip("10.0.0.101")]);
        assert!(manager.dispatch(&frame(advert.encode())).await);
        assert_eq!(a.stats().await.adverts_received, 0);
        assert_eq!(b.stats().await.adverts_received, 1);

        let unknown = VRRPPacket::new(7, 200, 100, vec![ip("10.0.0.107")]);
        assert!(!manager.dispatch(&frame(unknown.encode())).await);

        let mut corrupt = advert.encode().to_vec();
        corrupt[2] ^= 0xFF;
        assert!(!manager.dispatch(&frame(Bytes::from(corrupt))).await);
        assert_eq!(b.stats().await.adverts_received, 1);

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_receiver_feeds_routers() {
        let net = network();
        let manager = GroupManager::new(net.clone());
        let eth0 = net.interface_by_name("eth0").unwrap();
        let r = router(&net, 1, 100, "eth0", &["10.0.0.100"]);
        manager.register(r.clone()).await.unwrap();
        r.start().await.unwrap();

        net.inject(Frame {
            interface: eth0.index,
            family: AddressFamily::V4,
            source: ip("10.0.0.9"),
            payload: VRRPPacket::new(1, 0, 100, vec![ip("10.0.0.100")]).encode(),
        });
        sleep(Duration::from_millis(1)).await;
        assert_eq!(r.stats().await.priority_zero_received, 1);

        sleep(Duration::from_millis(600)).await;
        assert_eq!(r.state().await, VRRPState::Master);

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_receiver_survives_receive_errors() {
        let net = network();
        let manager = GroupManager::new(net.clone());
        let eth0 = net.interface_by_name("eth0").unwrap();
        net.fail_recv(3);

        let r = router(&net, 1, 100, "eth0", &["10.0.0.100"]);
        manager.register(r.clone()).await.unwrap();
        r.start().await.unwrap();

        // A live Master advertising every 500 ms for 10 s.
        for _ in 0..20 {
            net.inject(Frame {
                interface: eth0.index,
                family: AddressFamily::V4,
                source: ip("10.0.0.9"),
                payload: VRRPPacket::new(1, 200, 50, vec![ip("10.0.0.100")]).encode(),
            });
            sleep(Duration::from_millis(500)).await;
        }

        assert_eq!(r.state().await, VRRPState::Backup);
        assert_eq!(r.stats().await.adverts_received, 20);
        assert!(manager.multicast_enabled(eth0.index, AddressFamily::V4).await);

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_interface_down_fans_out() {
        let net = network();
        let manager = GroupManager::new(net.clone());
        let a = router(&net, 1, 100, "eth0", &["10.0.0.100"]);
        let b = router(&net, 2, 255, "eth0", &["10.0.0.5"]);
        let c = router(&net, 3, 100, "eth1", &["10.1.0.100"]);
        for r in [&a, &b, &c] {
            manager.register(r.clone()).await.unwrap();
            r.start().await.unwrap();
        }

        assert_eq!(manager.interface_down("eth0").await, 2);
        assert_eq!(a.state().await, VRRPState::Down);
        assert_eq!(b.state().await, VRRPState::Down);
        assert_eq!(c.state().await, VRRPState::Backup);

        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_everything() {
        let net = network();
        let manager = GroupManager::new(net.clone());
        let eth0 = net.interface_by_name("eth0").unwrap();
        let owner = router(&net, 1, 255, "eth0", &["10.0.0.5"]);
        let backup = router(&net, 2, 100, "eth0", &["10.0.0.100"]);
        manager.register(owner.clone()).await.unwrap();
        manager.register(backup.clone()).await.unwrap();
        owner.start().await.unwrap();
        backup.start().await.unwrap();

        manager.shutdown().await;

        assert!(manager.is_empty().await);
        assert_eq!(owner.state().await, VRRPState::Init);
        assert_eq!(backup.state().await, VRRPState::Init);
        assert!(!net.multicast_joined(&eth0, AddressFamily::V4));
        assert_eq!(net.sent_packets().last().unwrap().priority, 0);

        let sent = net.sent().len();
        sleep(Duration::from_secs(10)).await;
        assert_eq!(net.sent().len(), sent);
    }
}
