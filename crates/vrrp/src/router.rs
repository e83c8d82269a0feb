//! Virtual router: one VRRP instance per (group id, address family).
//!
//! All mutable state lives behind the router's own lock. Packet arrivals,
//! timer expiries and API calls each take that lock before running the
//! transition table, so a router never processes two events at once.
//! Timers are tokio tasks tagged with an epoch; cancelling a timer bumps the
//! epoch, so a task that already woke up finds itself stale and does nothing.

use crate::error::{Result, VRRPError};
use crate::network::{Interface, Network, primary_address};
use crate::packet::VRRPPacket;
use crate::state_machine::{Action, Advertisement, Event, Local, transition};
use crate::types::{
    AddressFamily, DEFAULT_ADVERT_INTERVAL, Flags, MAX_ADDRESSES, OWNER_PRIORITY, VRRPState,
    VRRPStats, interval_to_ticks, is_global_unicast, master_down_interval, skew_time,
    ticks_to_duration, virtual_mac,
};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Runs while Master
    Advertisement,
    /// Runs while Backup
    MasterDown,
}

/// The currently armed timer and the delay it was armed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedTimer {
    pub kind: TimerKind,
    pub ticks: u16,
}

struct Timer {
    armed: ArmedTimer,
    handle: JoinHandle<()>,
}

struct RouterInner {
    state: VRRPState,
    addresses: Vec<IpAddr>,
    advert_interval: u16,
    master_advert_interval: u16,
    skew_time: u16,
    master_down_interval: u16,
    master_priority: Option<u8>,
    primary_address: IpAddr,
    timer: Option<Timer>,
    epoch: u64,
    stats: VRRPStats,
}

impl RouterInner {
    fn learn_master_interval(&mut self, priority: u8, interval: u16) {
        self.master_advert_interval = interval;
        self.skew_time = skew_time(priority, interval);
        self.master_down_interval = master_down_interval(priority, interval);
    }

    fn cancel_timer(&mut self) {
        self.epoch += 1;
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
    }
}

/// A member of a virtual router group.
pub struct VirtualRouter {
    vrid: u8,
    priority: u8,
    flags: Flags,
    family: AddressFamily,
    interface: Interface,
    mac_v4: [u8; 6],
    mac_v6: [u8; 6],
    network: Arc<dyn Network>,
    inner: Mutex<RouterInner>,
}

impl VirtualRouter {
    /// Create a router with an explicit priority and flag bundle.
    ///
    /// Address strings that do not parse, belong to the other family, or
    /// repeat an earlier entry are skipped.
    pub fn new<I, S>(
        vrid: u8,
        priority: u8,
        flags: Flags,
        ifname: &str,
        addresses: I,
        network: Arc<dyn Network>,
    ) -> Result<Arc<Self>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut router = Self::build(vrid, priority, flags, ifname, network)?;
        let inner = router.inner.get_mut();
        for addr in addresses {
            let addr = addr.as_ref();
            match addr.parse::<IpAddr>() {
                Ok(ip) => {
                    insert_address(vrid, router.family, &mut inner.addresses, ip);
                }
                Err(_) => warn!(vrid, address = addr, "Skipping malformed address"),
            }
        }
        Ok(Arc::new(router))
    }

    /// Create the address owner for `ifname`: priority 255, default flags,
    /// and every global unicast address of `family` the interface carries.
    pub fn new_owner(
        vrid: u8,
        ifname: &str,
        family: AddressFamily,
        network: Arc<dyn Network>,
    ) -> Result<Arc<Self>> {
        let flags = match family {
            AddressFamily::V4 => Flags::default(),
            AddressFamily::V6 => Flags::default() | Flags::IPV6,
        };
        let mut router = Self::build(vrid, OWNER_PRIORITY, flags, ifname, network)?;
        let owned = router.network.addresses(&router.interface)?;
        let inner = router.inner.get_mut();
        for ip in owned.into_iter().filter(is_global_unicast) {
            if family.matches(&ip) {
                insert_address(vrid, family, &mut inner.addresses, ip);
            }
        }
        Ok(Arc::new(router))
    }

    fn build(
        vrid: u8,
        priority: u8,
        flags: Flags,
        ifname: &str,
        network: Arc<dyn Network>,
    ) -> Result<Self> {
        if vrid == 0 {
            return Err(VRRPError::InvalidConfig("VRID must be between 1 and 255".into()));
        }
        if priority == 0 {
            return Err(VRRPError::InvalidConfig(
                "Priority must be between 1 and 255".into(),
            ));
        }

        let interface = network
            .interface_by_name(ifname)
            .map_err(|_| VRRPError::InterfaceNotFound(ifname.to_string()))?;
        let family = AddressFamily::from_flags(flags);
        let advert_interval = interval_to_ticks(DEFAULT_ADVERT_INTERVAL);

        let mut inner = RouterInner {
            state: VRRPState::Init,
            addresses: Vec::new(),
            advert_interval,
            master_advert_interval: advert_interval,
            skew_time: 0,
            master_down_interval: 0,
            master_priority: None,
            primary_address: family.unspecified(),
            timer: None,
            epoch: 0,
            stats: VRRPStats::default(),
        };
        inner.learn_master_interval(priority, advert_interval);

        Ok(Self {
            vrid,
            priority,
            flags,
            family,
            interface,
            mac_v4: virtual_mac(vrid, AddressFamily::V4),
            mac_v6: virtual_mac(vrid, AddressFamily::V6),
            network,
            inner: Mutex::new(inner),
        })
    }

    pub fn vrid(&self) -> u8 {
        self.vrid
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn interface(&self) -> &Interface {
        &self.interface
    }

    pub fn is_owner(&self) -> bool {
        self.priority == OWNER_PRIORITY
    }

    pub fn preempt_enabled(&self) -> bool {
        self.flags.contains(Flags::PREEMPT)
    }

    pub fn accept_mode_enabled(&self) -> bool {
        self.flags.contains(Flags::ACCEPT)
    }

    pub fn is_unicast(&self) -> bool {
        self.flags.contains(Flags::UNICAST)
    }

    pub fn mac_v4(&self) -> [u8; 6] {
        self.mac_v4
    }

    pub fn mac_v6(&self) -> [u8; 6] {
        self.mac_v6
    }

    /// Virtual MAC for the router's own family.
    pub fn virtual_mac(&self) -> [u8; 6] {
        match self.family {
            AddressFamily::V4 => self.mac_v4,
            AddressFamily::V6 => self.mac_v6,
        }
    }

    pub async fn state(&self) -> VRRPState {
        self.inner.lock().await.state
    }

    pub async fn address_count(&self) -> usize {
        self.inner.lock().await.addresses.len()
    }

    pub async fn addresses(&self) -> Vec<IpAddr> {
        self.inner.lock().await.addresses.clone()
    }

    pub async fn stats(&self) -> VRRPStats {
        self.inner.lock().await.stats.clone()
    }

    pub async fn advert_interval(&self) -> Duration {
        ticks_to_duration(self.inner.lock().await.advert_interval)
    }

    /// Set the advertisement interval. Anything below 100 ms is raised to
    /// 100 ms; the value is kept in 10 ms ticks.
    pub async fn set_advert_interval(&self, interval: Duration) {
        let ticks = interval_to_ticks(interval);
        let mut inner = self.inner.lock().await;
        inner.advert_interval = ticks;
        if inner.state == VRRPState::Init {
            inner.learn_master_interval(self.priority, ticks);
        }
    }

    /// Interval learned from the current Master (ticks).
    pub async fn master_advert_interval(&self) -> u16 {
        self.inner.lock().await.master_advert_interval
    }

    pub async fn skew_time(&self) -> u16 {
        self.inner.lock().await.skew_time
    }

    pub async fn master_down_interval(&self) -> u16 {
        self.inner.lock().await.master_down_interval
    }

    /// Priority carried by the last advertisement accepted while Backup.
    pub async fn master_priority(&self) -> Option<u8> {
        self.inner.lock().await.master_priority
    }

    pub async fn armed_timer(&self) -> Option<ArmedTimer> {
        self.inner.lock().await.timer.as_ref().map(|t| t.armed)
    }

    /// Add an address. Returns false if it was skipped.
    pub(crate) async fn add_address(&self, ip: IpAddr) -> bool {
        let mut inner = self.inner.lock().await;
        insert_address(self.vrid, self.family, &mut inner.addresses, ip)
    }

    pub(crate) async fn remove_address(&self, ip: &IpAddr) -> bool {
        let mut inner = self.inner.lock().await;
        let before = inner.addresses.len();
        inner.addresses.retain(|a| a != ip);
        inner.addresses.len() != before
    }

    /// Leave Init (or Down): the owner becomes Master at once, everyone
    /// else becomes Backup and waits for the Master.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.addresses.is_empty() {
            return Err(VRRPError::NoAddresses(self.vrid));
        }

        if matches!(inner.state, VRRPState::Init | VRRPState::Down) {
            inner.primary_address = primary_address(&*self.network, &self.interface, self.family)?
                .unwrap_or_else(|| self.family.unspecified());
            inner.master_priority = None;
            info!(
                vrid = self.vrid,
                priority = self.priority,
                interface = %self.interface.name,
                primary = %inner.primary_address,
                "Starting virtual router"
            );
        }

        self.apply(&mut inner, Event::Startup).await
    }

    /// Stop the router. A Master relinquishes with a priority 0
    /// advertisement. No timer fires once this returns.
    pub async fn stop(self: &Arc<Self>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.apply(&mut inner, Event::Shutdown).await
    }

    /// The interface became unusable.
    pub async fn interface_down(self: &Arc<Self>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        warn!(vrid = self.vrid, interface = %self.interface.name, "Interface down");
        self.apply(&mut inner, Event::InterfaceDown).await
    }

    /// Feed a decoded advertisement to the state machine.
    ///
    /// Returns false when the packet was dropped.
    pub async fn handle_advertisement(self: &Arc<Self>, source: IpAddr, packet: &VRRPPacket) -> bool {
        let mut inner = self.inner.lock().await;

        if !matches!(inner.state, VRRPState::Backup | VRRPState::Master) {
            return false;
        }

        let family_ok = self.family.matches(&source)
            && packet.family().is_none_or(|family| family == self.family);
        if packet.vrid != self.vrid || !family_ok {
            inner.stats.invalid_adverts += 1;
            debug!(
                vrid = self.vrid,
                packet_vrid = packet.vrid,
                source = %source,
                "Dropping advertisement for another group or family"
            );
            return false;
        }
        if packet.max_advert_int == 0 {
            inner.stats.invalid_adverts += 1;
            debug!(vrid = self.vrid, source = %source, "Dropping advertisement with zero interval");
            return false;
        }

        inner.stats.adverts_received += 1;
        if packet.priority == 0 {
            inner.stats.priority_zero_received += 1;
        }
        if !same_addresses(&packet.addresses, &inner.addresses) {
            debug!(
                vrid = self.vrid,
                source = %source,
                "Advertised addresses differ from local configuration"
            );
        }

        let event = Event::Advertisement(Advertisement {
            priority: packet.priority,
            interval: packet.max_advert_int,
            source,
        });
        if let Err(e) = self.apply(&mut inner, event).await {
            warn!(vrid = self.vrid, error = %e, "Failed to process advertisement");
            return false;
        }
        if inner.state == VRRPState::Backup {
            inner.master_priority = Some(packet.priority);
        }
        true
    }

    async fn on_timer(self: &Arc<Self>, kind: TimerKind, epoch: u64) {
        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch {
            return;
        }
        // This task is the timer: detach it so re-arming does not abort it.
        inner.timer = None;

        let event = match kind {
            TimerKind::Advertisement => Event::AdvertTimer,
            TimerKind::MasterDown => {
                info!(vrid = self.vrid, "Master_Down_Interval expired");
                Event::MasterDownTimer
            }
        };
        if let Err(e) = self.apply(&mut inner, event).await {
            warn!(vrid = self.vrid, error = %e, "Timer event rejected");
        }
    }

    /// Run one event through the transition table and execute its actions.
    async fn apply(self: &Arc<Self>, inner: &mut RouterInner, event: Event) -> Result<()> {
        let local = Local {
            priority: self.priority,
            advert_interval: inner.advert_interval,
            preempt: self.preempt_enabled(),
            primary_address: inner.primary_address,
        };
        let t = transition(inner.state, &event, &local)?;

        for action in &t.actions {
            match *action {
                Action::LearnMasterInterval(interval) => {
                    inner.learn_master_interval(self.priority, interval);
                }
                Action::SendAdvertisement { priority } => {
                    self.send_advertisement(inner, priority).await;
                }
                Action::ArmAdvertTimer => {
                    let ticks = inner.advert_interval;
                    self.arm_timer(inner, TimerKind::Advertisement, ticks);
                }
                Action::ArmMasterDownTimer { ticks } => {
                    self.arm_timer(inner, TimerKind::MasterDown, ticks);
                }
                Action::CancelTimers => inner.cancel_timer(),
            }
        }

        let prev = inner.state;
        inner.state = t.next;
        if prev != t.next {
            match t.next {
                VRRPState::Master => inner.stats.master_transitions += 1,
                VRRPState::Backup => inner.stats.backup_transitions += 1,
                VRRPState::Init | VRRPState::Down => {}
            }
            info!(
                vrid = self.vrid,
                interface = %self.interface.name,
                from = %prev,
                to = %t.next,
                event = event.name(),
                "State transition"
            );
        }
        Ok(())
    }

    fn arm_timer(self: &Arc<Self>, inner: &mut RouterInner, kind: TimerKind, ticks: u16) {
        inner.cancel_timer();
        let epoch = inner.epoch;
        let router = Arc::downgrade(self);
        let delay = ticks_to_duration(ticks);

        let handle = tokio::spawn(async move {
            sleep(delay).await;
            if let Some(router) = router.upgrade() {
                router.on_timer(kind, epoch).await;
            }
        });

        debug!(vrid = self.vrid, ?kind, ticks, "Timer armed");
        inner.timer = Some(Timer {
            armed: ArmedTimer { kind, ticks },
            handle,
        });
    }

    /// Send one advertisement. Failures are logged; the next timer retries.
    async fn send_advertisement(&self, inner: &mut RouterInner, priority: u8) -> bool {
        let packet = VRRPPacket::new(
            self.vrid,
            priority,
            inner.advert_interval,
            inner.addresses.clone(),
        );

        match self
            .network
            .send(&self.interface, self.family, packet.encode())
            .await
        {
            Ok(()) => {
                inner.stats.adverts_sent += 1;
                debug!(vrid = self.vrid, priority, "Sent advertisement");
                true
            }
            Err(e) => {
                warn!(vrid = self.vrid, error = %e, "Failed to send advertisement");
                false
            }
        }
    }
}

impl Drop for VirtualRouter {
    fn drop(&mut self) {
        self.inner.get_mut().cancel_timer();
    }
}

impl std::fmt::Debug for VirtualRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualRouter")
            .field("vrid", &self.vrid)
            .field("priority", &self.priority)
            .field("family", &self.family)
            .field("interface", &self.interface.name)
            .finish_non_exhaustive()
    }
}

fn insert_address(vrid: u8, family: AddressFamily, addresses: &mut Vec<IpAddr>, ip: IpAddr) -> bool {
    if !family.matches(&ip) {
        warn!(vrid, address = %ip, %family, "Skipping address of the wrong family");
        return false;
    }
    if addresses.contains(&ip) {
        return false;
    }
    if addresses.len() >= MAX_ADDRESSES {
        warn!(vrid, address = %ip, "Address limit reached");
        return false;
    }
    addresses.push(ip);
    true
}

fn same_addresses(a: &[IpAddr], b: &[IpAddr]) -> bool {
    a.len() == b.len() && a.iter().all(|ip| b.contains(ip))
}
