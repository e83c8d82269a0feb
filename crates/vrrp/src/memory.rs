//! In-process [`Network`] for tests and simulations.
//!
//! Each `MemoryNetwork` is one host. Interfaces and their addresses are set
//! up programmatically, every sent frame is recorded, and frames can be
//! injected as if they had arrived from the wire. Hosts can be linked so
//! that a frame one of them sends is received by the others on the
//! interface with the same name, provided they joined the VRRP group there.

use crate::network::{Frame, Interface, Network};
use crate::packet::VRRPPacket;
use crate::types::AddressFamily;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tracing::trace;

type InboxKey = (u32, AddressFamily);

struct Inbox {
    tx: mpsc::UnboundedSender<Frame>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>>,
}

impl Inbox {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }
}

#[derive(Default)]
struct HostState {
    interfaces: Vec<(Interface, Vec<IpAddr>)>,
    joined: HashMap<InboxKey, bool>,
    enable_calls: HashMap<InboxKey, usize>,
    inboxes: HashMap<InboxKey, Inbox>,
    sent: Vec<Frame>,
    fail_multicast: bool,
    recv_failures: usize,
}

impl HostState {
    fn interface(&self, index: u32) -> io::Result<&(Interface, Vec<IpAddr>)> {
        self.interfaces
            .iter()
            .find(|(iface, _)| iface.index == index)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no interface {index}")))
    }

    fn inbox(&mut self, key: InboxKey) -> &Inbox {
        self.inboxes.entry(key).or_insert_with(Inbox::new)
    }
}

/// A simulated host.
#[derive(Default)]
pub struct MemoryNetwork {
    state: Mutex<HostState>,
    peers: Mutex<Vec<Weak<MemoryNetwork>>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an interface; indexes are assigned from 1.
    pub fn add_interface(&self, name: &str, addresses: &[IpAddr]) -> Interface {
        let mut state = self.lock();
        let iface = Interface {
            index: state.interfaces.len() as u32 + 1,
            name: name.to_string(),
        };
        state.interfaces.push((iface.clone(), addresses.to_vec()));
        iface
    }

    /// Replace the addresses configured on an interface.
    pub fn set_addresses(&self, name: &str, addresses: &[IpAddr]) {
        let mut state = self.lock();
        if let Some((_, addrs)) = state.interfaces.iter_mut().find(|(i, _)| i.name == name) {
            *addrs = addresses.to_vec();
        }
    }

    /// Make every multicast join fail until reset.
    pub fn fail_multicast(&self, fail: bool) {
        self.lock().fail_multicast = fail;
    }

    /// Make the next `count` receive calls fail with `NetworkDown`.
    pub fn fail_recv(&self, count: usize) {
        self.lock().recv_failures = count;
    }

    pub fn multicast_joined(&self, iface: &Interface, family: AddressFamily) -> bool {
        self.lock()
            .joined
            .get(&(iface.index, family))
            .copied()
            .unwrap_or(false)
    }

    /// Number of successful enable calls for an interface.
    pub fn multicast_enable_calls(&self, iface: &Interface, family: AddressFamily) -> usize {
        self.lock()
            .enable_calls
            .get(&(iface.index, family))
            .copied()
            .unwrap_or(0)
    }

    pub fn sent(&self) -> Vec<Frame> {
        self.lock().sent.clone()
    }

    /// Sent frames decoded as advertisements.
    pub fn sent_packets(&self) -> Vec<VRRPPacket> {
        self.lock()
            .sent
            .iter()
            .filter_map(|f| VRRPPacket::decode(&f.payload, f.family).ok())
            .collect()
    }

    pub fn clear_sent(&self) {
        self.lock().sent.clear();
    }

    /// Queue a frame for `recv` on the frame's interface and family.
    pub fn inject(&self, frame: Frame) {
        let mut state = self.lock();
        let inbox = state.inbox((frame.interface, frame.family));
        let _ = inbox.tx.send(frame);
    }

    /// Put two hosts on the same links.
    pub fn link(a: &Arc<Self>, b: &Arc<Self>) {
        a.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(b));
        b.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(a));
    }

    /// Deliver a frame sent by a linked host on the link named `ifname`.
    fn deliver(&self, ifname: &str, family: AddressFamily, source: IpAddr, payload: Bytes) {
        let mut state = self.lock();
        let Some(index) = state
            .interfaces
            .iter()
            .find(|(i, _)| i.name == ifname)
            .map(|(i, _)| i.index)
        else {
            return;
        };
        if !state.joined.get(&(index, family)).copied().unwrap_or(false) {
            return;
        }
        let frame = Frame {
            interface: index,
            family,
            source,
            payload,
        };
        let _ = state.inbox((index, family)).tx.send(frame);
    }
}

#[async_trait]
impl Network for MemoryNetwork {
    fn interface_by_name(&self, name: &str) -> io::Result<Interface> {
        self.lock()
            .interfaces
            .iter()
            .find(|(i, _)| i.name == name)
            .map(|(i, _)| i.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no interface {name}")))
    }

    fn addresses(&self, iface: &Interface) -> io::Result<Vec<IpAddr>> {
        Ok(self.lock().interface(iface.index)?.1.clone())
    }

    async fn enable_multicast(&self, iface: &Interface, family: AddressFamily) -> io::Result<()> {
        let mut state = self.lock();
        state.interface(iface.index)?;
        if state.fail_multicast {
            return Err(io::Error::other("multicast join refused"));
        }
        *state.enable_calls.entry((iface.index, family)).or_default() += 1;
        state.joined.insert((iface.index, family), true);
        Ok(())
    }

    async fn disable_multicast(&self, iface: &Interface, family: AddressFamily) -> io::Result<()> {
        self.lock().joined.insert((iface.index, family), false);
        Ok(())
    }

    async fn send(&self, iface: &Interface, family: AddressFamily, payload: Bytes) -> io::Result<()> {
        let source = {
            let mut state = self.lock();
            let source = state
                .interface(iface.index)?
                .1
                .iter()
                .copied()
                .find(|a| family.matches(a))
                .unwrap_or_else(|| family.unspecified());
            state.sent.push(Frame {
                interface: iface.index,
                family,
                source,
                payload: payload.clone(),
            });
            source
        };
        trace!(interface = %iface.name, %source, len = payload.len(), "Frame sent");

        let peers: Vec<_> = self
            .peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for peer in peers {
            peer.deliver(&iface.name, family, source, payload.clone());
        }
        Ok(())
    }

    async fn recv(&self, iface: &Interface, family: AddressFamily) -> io::Result<Frame> {
        let rx = {
            let mut state = self.lock();
            if state.recv_failures > 0 {
                state.recv_failures -= 1;
                return Err(io::Error::new(io::ErrorKind::NetworkDown, "link down"));
            }
            state.inbox((iface.index, family)).rx.clone()
        };
        let mut rx = rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionAborted, "inbox closed"))
    }
}
