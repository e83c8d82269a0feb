//! VRRP data types, constants and timer arithmetic.
//!
//! Based on RFC 5798: Virtual Router Redundancy Protocol (VRRP) Version 3

use bitflags::bitflags;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

/// VRRP protocol version (3 per RFC 5798)
pub const VRRP_VERSION: u8 = 3;

/// VRRP IP protocol number
pub const VRRP_PROTOCOL: u8 = 112;

/// TTL / hop limit every advertisement is sent with
pub const VRRP_TTL: u8 = 255;

/// VRRP multicast address for IPv4
pub const VRRP_MULTICAST_ADDR_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 18);

/// VRRP multicast address for IPv6
pub const VRRP_MULTICAST_ADDR_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x12);

/// Priority reserved for the owner of the virtual addresses
pub const OWNER_PRIORITY: u8 = 255;

/// Priority carried by a Master that is giving up mastership
pub const RELINQUISH_PRIORITY: u8 = 0;

/// Default priority for a non-owner router
pub const DEFAULT_PRIORITY: u8 = 100;

/// Largest number of addresses a single advertisement can carry
pub const MAX_ADDRESSES: usize = u8::MAX as usize;

/// Default advertisement interval
pub const DEFAULT_ADVERT_INTERVAL: Duration = Duration::from_secs(1);

/// Smallest advertisement interval the setter accepts
pub const MIN_ADVERT_INTERVAL: Duration = Duration::from_millis(100);

/// Largest interval representable in the 12-bit wire field (ticks)
pub const MAX_ADVERT_INTERVAL_TICKS: u16 = 0x0FFF;

/// Length of one protocol time unit
pub const TICK: Duration = Duration::from_millis(10);

/// VRRP state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VRRPState {
    /// Constructed or stopped, inert
    Init,
    /// Monitoring the Master
    Backup,
    /// Answering for the virtual addresses and advertising
    Master,
    /// Interface unusable until the router is started again
    Down,
}

impl std::fmt::Display for VRRPState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VRRPState::Init => write!(f, "INIT"),
            VRRPState::Backup => write!(f, "BACKUP"),
            VRRPState::Master => write!(f, "MASTER"),
            VRRPState::Down => write!(f, "DOWN"),
        }
    }
}

bitflags! {
    /// Behaviour switches for a virtual router.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Flags: u8 {
        const PREEMPT = 0x1;
        const ACCEPT = 0x2;
        const UNICAST = 0x4;
        const IPV6 = 0x8;
    }
}

impl Default for Flags {
    /// Preempt, accept and unicast enabled; IPv4.
    fn default() -> Self {
        Flags::PREEMPT | Flags::ACCEPT | Flags::UNICAST
    }
}

/// Address family a virtual router operates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn from_flags(flags: Flags) -> Self {
        if flags.contains(Flags::IPV6) {
            AddressFamily::V6
        } else {
            AddressFamily::V4
        }
    }

    /// Wire size of one address
    pub fn address_len(self) -> usize {
        match self {
            AddressFamily::V4 => 4,
            AddressFamily::V6 => 16,
        }
    }

    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    pub fn matches(self, addr: &IpAddr) -> bool {
        Self::of(addr) == self
    }

    pub fn multicast_group(self) -> IpAddr {
        match self {
            AddressFamily::V4 => IpAddr::V4(VRRP_MULTICAST_ADDR_V4),
            AddressFamily::V6 => IpAddr::V6(VRRP_MULTICAST_ADDR_V6),
        }
    }

    pub fn unspecified(self) -> IpAddr {
        match self {
            AddressFamily::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::V4 => write!(f, "IPv4"),
            AddressFamily::V6 => write!(f, "IPv6"),
        }
    }
}

/// Skew_Time = ((256 - Priority) * Master_Adver_Interval) / 256, in ticks.
pub fn skew_time(priority: u8, master_advert_interval: u16) -> u16 {
    (((256 - priority as u32) * master_advert_interval as u32) / 256) as u16
}

/// Master_Down_Interval = (3 * Master_Adver_Interval) + Skew_Time, in ticks.
pub fn master_down_interval(priority: u8, master_advert_interval: u16) -> u16 {
    let ticks = 3 * master_advert_interval as u32 + skew_time(priority, master_advert_interval) as u32;
    ticks.min(u16::MAX as u32) as u16
}

/// Convert an advertisement interval into ticks, clamped to the range the
/// protocol can express.
pub fn interval_to_ticks(interval: Duration) -> u16 {
    let interval = interval.max(MIN_ADVERT_INTERVAL);
    let ticks = interval.as_millis() / TICK.as_millis();
    ticks.min(MAX_ADVERT_INTERVAL_TICKS as u128) as u16
}

pub fn ticks_to_duration(ticks: u16) -> Duration {
    TICK * ticks as u32
}

/// Virtual MAC address for a group: 00-00-5E-00-01-{VRID} for IPv4 and
/// 00-00-5E-00-02-{VRID} for IPv6.
pub fn virtual_mac(vrid: u8, family: AddressFamily) -> [u8; 6] {
    let kind = match family {
        AddressFamily::V4 => 0x01,
        AddressFamily::V6 => 0x02,
    };
    [0x00, 0x00, 0x5E, 0x00, kind, vrid]
}

/// Whether an address is usable as a global unicast address on an interface.
pub fn is_global_unicast(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            !(v4.is_unspecified()
                || v4.is_loopback()
                || v4.is_multicast()
                || v4.is_broadcast()
                || v4.is_link_local())
        }
        IpAddr::V6(v6) => {
            !(v6.is_unspecified()
                || v6.is_loopback()
                || v6.is_multicast()
                || v6.is_unicast_link_local())
        }
    }
}

/// VRRP statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VRRPStats {
    /// Number of transitions to Master state
    pub master_transitions: u64,

    /// Number of transitions to Backup state
    pub backup_transitions: u64,

    /// Advertisements sent (including priority 0)
    pub adverts_sent: u64,

    /// Valid advertisements received for this group
    pub adverts_received: u64,

    /// Advertisements dropped by the router (wrong group or family, zero interval)
    pub invalid_adverts: u64,

    /// Priority zero advertisements received
    pub priority_zero_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skew_and_master_down() {
        assert_eq!(skew_time(100, 100), 60);
        assert_eq!(master_down_interval(100, 100), 360);

        // floor division
        assert_eq!(skew_time(254, 100), 0);
        assert_eq!(skew_time(1, 100), 99);
        assert_eq!(master_down_interval(1, 100), 399);
    }

    #[test]
    fn test_skew_matches_formula() {
        for priority in 1..=254u8 {
            for interval in [1u16, 7, 100, 333, 4095] {
                let expected = ((256 - priority as u32) * interval as u32) / 256;
                assert_eq!(skew_time(priority, interval) as u32, expected);
                assert_eq!(
                    master_down_interval(priority, interval) as u32,
                    3 * interval as u32 + expected
                );
            }
        }
    }

    #[test]
    fn test_interval_clamping() {
        assert_eq!(interval_to_ticks(Duration::from_millis(1)), 10);
        assert_eq!(interval_to_ticks(Duration::from_millis(99)), 10);
        assert_eq!(interval_to_ticks(Duration::from_secs(1)), 100);
        assert_eq!(interval_to_ticks(Duration::from_millis(1234)), 123);
        assert_eq!(interval_to_ticks(Duration::from_secs(3600)), MAX_ADVERT_INTERVAL_TICKS);
        assert_eq!(ticks_to_duration(360), Duration::from_millis(3600));
    }

    #[test]
    fn test_default_flags() {
        let flags = Flags::default();
        assert!(flags.contains(Flags::PREEMPT | Flags::ACCEPT | Flags::UNICAST));
        assert!(!flags.contains(Flags::IPV6));
        assert_eq!(AddressFamily::from_flags(flags), AddressFamily::V4);
        assert_eq!(AddressFamily::from_flags(flags | Flags::IPV6), AddressFamily::V6);
    }

    #[test]
    fn test_virtual_mac() {
        assert_eq!(virtual_mac(1, AddressFamily::V4), [0, 0, 0x5E, 0, 1, 1]);
        assert_eq!(virtual_mac(0xAB, AddressFamily::V6), [0, 0, 0x5E, 0, 2, 0xAB]);
    }

    #[test]
    fn test_global_unicast() {
        assert!(is_global_unicast(&"192.168.1.10".parse().unwrap()));
        assert!(is_global_unicast(&"2001:db8::1".parse().unwrap()));
        assert!(!is_global_unicast(&"127.0.0.1".parse().unwrap()));
        assert!(!is_global_unicast(&"169.254.0.1".parse().unwrap()));
        assert!(!is_global_unicast(&"224.0.0.18".parse().unwrap()));
        assert!(!is_global_unicast(&"fe80::1".parse().unwrap()));
        assert!(!is_global_unicast(&"::".parse().unwrap()));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(VRRPState::Init.to_string(), "INIT");
        assert_eq!(VRRPState::Down.to_string(), "DOWN");
    }
}
