//! Raw-socket [`Network`] for Linux.
//!
//! One raw IP protocol 112 socket per (interface, family), bound to the
//! interface, sending with TTL / hop limit 255 to the VRRP multicast group.
//! Sockets are non-blocking and driven through tokio's `AsyncFd`.
//! Requires CAP_NET_RAW.

use crate::network::{Frame, Interface, Network};
use crate::types::{AddressFamily, VRRP_MULTICAST_ADDR_V4, VRRP_MULTICAST_ADDR_V6, VRRP_PROTOCOL, VRRP_TTL};
use async_trait::async_trait;
use bytes::Bytes;
use nix::ifaddrs::getifaddrs;
use nix::net::if_::if_nametoindex;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::collections::{HashMap, HashSet};
use std::io::{self, ErrorKind};
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::os::fd::AsRawFd;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::unix::AsyncFd;
use tracing::{debug, trace};

const RECV_BUFFER: usize = 2048;
const IPV4_MIN_HEADER: usize = 20;

type SocketKey = (u32, AddressFamily);

#[derive(Default)]
struct Sockets {
    open: HashMap<SocketKey, Arc<AsyncFd<Socket>>>,
    joined: HashSet<SocketKey>,
}

#[derive(Default)]
pub struct LinuxNetwork {
    sockets: Mutex<Sockets>,
}

impl LinuxNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Socket for (interface, family), opened on first use.
    fn socket(&self, iface: &Interface, family: AddressFamily) -> io::Result<Arc<AsyncFd<Socket>>> {
        let mut sockets = self.sockets.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(socket) = sockets.open.get(&(iface.index, family)) {
            return Ok(socket.clone());
        }
        let socket = Arc::new(AsyncFd::new(open_socket(iface, family)?)?);
        sockets.open.insert((iface.index, family), socket.clone());
        debug!(interface = %iface.name, %family, "Opened VRRP socket");
        Ok(socket)
    }
}

fn setsockopt<T>(socket: &Socket, level: libc::c_int, name: libc::c_int, value: &T) -> io::Result<()> {
    // SAFETY: value points to a live T and the length matches it.
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            value as *const T as *const libc::c_void,
            std::mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn open_socket(iface: &Interface, family: AddressFamily) -> io::Result<Socket> {
    let domain = match family {
        AddressFamily::V4 => Domain::IPV4,
        AddressFamily::V6 => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::RAW, Some(Protocol::from(VRRP_PROTOCOL as i32)))?;
    socket.set_nonblocking(true)?;
    socket.bind_device(Some(iface.name.as_bytes()))?;

    let ttl = VRRP_TTL as libc::c_int;
    let no_loop: libc::c_int = 0;
    match family {
        AddressFamily::V4 => {
            setsockopt(&socket, libc::IPPROTO_IP, libc::IP_TTL, &ttl)?;
            setsockopt(&socket, libc::IPPROTO_IP, libc::IP_MULTICAST_TTL, &ttl)?;
            setsockopt(&socket, libc::IPPROTO_IP, libc::IP_MULTICAST_LOOP, &no_loop)?;
            setsockopt(&socket, libc::IPPROTO_IP, libc::IP_MULTICAST_IF, &mreq_v4(iface))?;
        }
        AddressFamily::V6 => {
            let index = iface.index as libc::c_int;
            setsockopt(&socket, libc::IPPROTO_IPV6, libc::IPV6_UNICAST_HOPS, &ttl)?;
            setsockopt(&socket, libc::IPPROTO_IPV6, libc::IPV6_MULTICAST_HOPS, &ttl)?;
            setsockopt(&socket, libc::IPPROTO_IPV6, libc::IPV6_MULTICAST_LOOP, &no_loop)?;
            setsockopt(&socket, libc::IPPROTO_IPV6, libc::IPV6_MULTICAST_IF, &index)?;
        }
    }
    Ok(socket)
}

fn mreq_v4(iface: &Interface) -> libc::ip_mreqn {
    libc::ip_mreqn {
        imr_multiaddr: libc::in_addr {
            s_addr: u32::from_ne_bytes(VRRP_MULTICAST_ADDR_V4.octets()),
        },
        imr_address: libc::in_addr { s_addr: 0 },
        imr_ifindex: iface.index as libc::c_int,
    }
}

fn mreq_v6(iface: &Interface) -> libc::ipv6_mreq {
    libc::ipv6_mreq {
        ipv6mr_multiaddr: libc::in6_addr {
            s6_addr: VRRP_MULTICAST_ADDR_V6.octets(),
        },
        ipv6mr_interface: iface.index,
    }
}

fn membership(socket: &Socket, iface: &Interface, family: AddressFamily, join: bool) -> io::Result<()> {
    match family {
        AddressFamily::V4 => {
            let opt = if join { libc::IP_ADD_MEMBERSHIP } else { libc::IP_DROP_MEMBERSHIP };
            setsockopt(socket, libc::IPPROTO_IP, opt, &mreq_v4(iface))
        }
        AddressFamily::V6 => {
            let opt = if join { libc::IPV6_ADD_MEMBERSHIP } else { libc::IPV6_DROP_MEMBERSHIP };
            setsockopt(socket, libc::IPPROTO_IPV6, opt, &mreq_v6(iface))
        }
    }
}

/// VRRP payload of a raw IPv4 datagram, or None if it is truncated or was
/// not sent with TTL 255.
fn strip_ipv4_header(data: &[u8]) -> Option<&[u8]> {
    if data.len() < IPV4_MIN_HEADER {
        return None;
    }
    let header_len = usize::from(data[0] & 0x0F) * 4;
    if header_len < IPV4_MIN_HEADER || data.len() < header_len {
        return None;
    }
    if data[8] != VRRP_TTL {
        return None;
    }
    Some(&data[header_len..])
}

fn recv_datagram(socket: &Socket) -> io::Result<(Bytes, Option<IpAddr>)> {
    let mut buf = [MaybeUninit::<u8>::uninit(); RECV_BUFFER];
    let (len, addr) = socket.recv_from(&mut buf)?;
    // SAFETY: recv_from initialised the first `len` bytes.
    let data = unsafe { std::slice::from_raw_parts(buf.as_ptr().cast::<u8>(), len) };
    Ok((Bytes::copy_from_slice(data), addr.as_socket().map(|a| a.ip())))
}

#[async_trait]
impl Network for LinuxNetwork {
    fn interface_by_name(&self, name: &str) -> io::Result<Interface> {
        let index = if_nametoindex(name)
            .map_err(|_| io::Error::new(ErrorKind::NotFound, format!("Interface {name} not found")))?;
        Ok(Interface {
            index,
            name: name.to_string(),
        })
    }

    fn addresses(&self, iface: &Interface) -> io::Result<Vec<IpAddr>> {
        let mut addrs = Vec::new();
        for ifa in getifaddrs().map_err(io::Error::from)? {
            if ifa.interface_name != iface.name {
                continue;
            }
            let Some(address) = ifa.address else {
                continue;
            };
            if let Some(sin) = address.as_sockaddr_in() {
                addrs.push(IpAddr::V4(sin.ip()));
            } else if let Some(sin6) = address.as_sockaddr_in6() {
                addrs.push(IpAddr::V6(sin6.ip()));
            }
        }
        Ok(addrs)
    }

    async fn enable_multicast(&self, iface: &Interface, family: AddressFamily) -> io::Result<()> {
        let socket = self.socket(iface, family)?;
        let mut sockets = self.sockets.lock().unwrap_or_else(PoisonError::into_inner);
        if sockets.joined.contains(&(iface.index, family)) {
            return Ok(());
        }
        membership(socket.get_ref(), iface, family, true)?;
        sockets.joined.insert((iface.index, family));
        Ok(())
    }

    async fn disable_multicast(&self, iface: &Interface, family: AddressFamily) -> io::Result<()> {
        let mut sockets = self.sockets.lock().unwrap_or_else(PoisonError::into_inner);
        if !sockets.joined.remove(&(iface.index, family)) {
            return Ok(());
        }
        match sockets.open.remove(&(iface.index, family)) {
            Some(socket) => membership(socket.get_ref(), iface, family, false),
            None => Ok(()),
        }
    }

    async fn send(&self, iface: &Interface, family: AddressFamily, payload: Bytes) -> io::Result<()> {
        let socket = self.socket(iface, family)?;
        let dest = SockAddr::from(SocketAddr::new(family.multicast_group(), 0));
        loop {
            let mut guard = socket.writable().await?;
            match guard.try_io(|fd| fd.get_ref().send_to(&payload, &dest)) {
                Ok(result) => {
                    let len = result?;
                    trace!(interface = %iface.name, len, "Frame sent");
                    return Ok(());
                }
                Err(_would_block) => continue,
            }
        }
    }

    async fn recv(&self, iface: &Interface, family: AddressFamily) -> io::Result<Frame> {
        let socket = self.socket(iface, family)?;
        loop {
            let mut guard = socket.readable().await?;
            let (data, source) = match guard.try_io(|fd| recv_datagram(fd.get_ref())) {
                Ok(result) => result?,
                Err(_would_block) => continue,
            };

            let Some(source) = source else {
                continue;
            };
            let payload = match family {
                AddressFamily::V4 => match strip_ipv4_header(&data) {
                    Some(body) => data.slice_ref(body),
                    None => {
                        debug!(interface = %iface.name, %source, "Dropping frame with bad IP header or TTL");
                        continue;
                    }
                },
                AddressFamily::V6 => data,
            };

            return Ok(Frame {
                interface: iface.index,
                family,
                source,
                payload,
            });
        }
    }
}
