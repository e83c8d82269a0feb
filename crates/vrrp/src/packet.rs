//! VRRP packet format, encoding and decoding.
//!
//! RFC 5798 Section 5.1 - VRRP Packet Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Version| Type  | Virtual Rtr ID|   Priority    | Count IP Addrs|
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |(rsvd) |     Max Adver Int     |          Checksum             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! +                                                               +
//! |                       IP Address(es)                          |
//! +                                                               +
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The checksum is the RFC 1071 internet checksum of the whole VRRP message
//! with the checksum field taken as zero.

use crate::types::{AddressFamily, MAX_ADVERT_INTERVAL_TICKS, VRRP_VERSION};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// VRRP packet type (always 1 = ADVERTISEMENT)
const VRRP_TYPE_ADVERTISEMENT: u8 = 1;

/// Fixed header length
pub const HEADER_LEN: usize = 8;

/// Offset of the checksum field inside the header
const CHECKSUM_OFFSET: usize = 6;

/// Reasons a frame is rejected by [`VRRPPacket::decode`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("packet too short: {0} bytes")]
    TooShort(usize),

    #[error("unsupported VRRP version {0}")]
    Version(u8),

    #[error("unsupported packet type {0}")]
    Type(u8),

    #[error("address count {count} does not match {body} body bytes")]
    Length { count: u8, body: usize },

    #[error("checksum mismatch: carried {carried:#06x}, computed {computed:#06x}")]
    Checksum { carried: u16, computed: u16 },

    #[error("advertisement interval of zero")]
    Interval,
}

/// A VRRP advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VRRPPacket {
    /// Version (high nibble, always 3) and Type (low nibble, always 1)
    pub version_type: u8,

    /// Virtual Router ID (1-255)
    pub vrid: u8,

    /// Priority (1-255, 0 = master shutting down)
    pub priority: u8,

    /// Count of IP addresses
    pub count_ip: u8,

    /// Maximum advertisement interval in centiseconds (12 bits)
    pub max_advert_int: u16,

    /// Internet checksum over the whole packet
    pub checksum: u16,

    /// Virtual IP addresses, all of one family
    pub addresses: Vec<IpAddr>,
}

impl VRRPPacket {
    /// Build an advertisement with its checksum already filled in.
    ///
    /// `addresses` must all belong to one family; at most 255 are carried.
    pub fn new(vrid: u8, priority: u8, advert_interval: u16, mut addresses: Vec<IpAddr>) -> Self {
        addresses.truncate(u8::MAX as usize);

        let mut packet = Self {
            version_type: (VRRP_VERSION << 4) | VRRP_TYPE_ADVERTISEMENT,
            vrid,
            priority,
            count_ip: addresses.len() as u8,
            max_advert_int: advert_interval & MAX_ADVERT_INTERVAL_TICKS,
            checksum: 0,
            addresses,
        };
        packet.checksum = packet.compute_checksum();
        packet
    }

    /// Address family of the carried addresses, if any are present.
    pub fn family(&self) -> Option<AddressFamily> {
        self.addresses.first().map(AddressFamily::of)
    }

    /// Serialize the packet. The checksum is computed over the final bytes
    /// and written last.
    pub fn encode(&self) -> Bytes {
        let mut buf = self.write_unchecked();
        let checksum = internet_checksum(&buf);
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_be_bytes());
        buf.freeze()
    }

    /// Parse and validate a packet received on a socket of `family`.
    ///
    /// Nothing is returned unless the header, the address count and the
    /// checksum are all consistent and the interval is non-zero.
    pub fn decode(data: &[u8], family: AddressFamily) -> Result<Self, DecodeError> {
        if data.len() < HEADER_LEN {
            return Err(DecodeError::TooShort(data.len()));
        }

        let mut buf = data;
        let version_type = buf.get_u8();
        let version = version_type >> 4;
        let pkt_type = version_type & 0x0F;

        if version != VRRP_VERSION {
            return Err(DecodeError::Version(version));
        }
        if pkt_type != VRRP_TYPE_ADVERTISEMENT {
            return Err(DecodeError::Type(pkt_type));
        }

        let vrid = buf.get_u8();
        let priority = buf.get_u8();
        let count_ip = buf.get_u8();
        let max_advert_int = buf.get_u16() & MAX_ADVERT_INTERVAL_TICKS;
        let checksum = buf.get_u16();

        if buf.remaining() != count_ip as usize * family.address_len() {
            return Err(DecodeError::Length {
                count: count_ip,
                body: buf.remaining(),
            });
        }

        let mut zeroed = BytesMut::from(data);
        zeroed[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].fill(0);
        let computed = internet_checksum(&zeroed);
        if computed != checksum {
            return Err(DecodeError::Checksum {
                carried: checksum,
                computed,
            });
        }
        // A zero interval would collapse Master_Down_Interval to nothing.
        if max_advert_int == 0 {
            return Err(DecodeError::Interval);
        }

        let addresses = (0..count_ip)
            .map(|_| match family {
                AddressFamily::V4 => IpAddr::V4(Ipv4Addr::from(buf.get_u32())),
                AddressFamily::V6 => IpAddr::V6(Ipv6Addr::from(buf.get_u128())),
            })
            .collect();

        Ok(Self {
            version_type,
            vrid,
            priority,
            count_ip,
            max_advert_int,
            checksum,
            addresses,
        })
    }

    fn compute_checksum(&self) -> u16 {
        internet_checksum(&self.write_unchecked())
    }

    /// Header and body with a zero checksum field.
    fn write_unchecked(&self) -> BytesMut {
        let body_len: usize = self
            .addresses
            .iter()
            .map(|ip| AddressFamily::of(ip).address_len())
            .sum();
        let mut buf = BytesMut::with_capacity(HEADER_LEN + body_len);

        buf.put_u8(self.version_type);
        buf.put_u8(self.vrid);
        buf.put_u8(self.priority);
        buf.put_u8(self.count_ip);
        // 4 reserved bits + 12 bit interval
        buf.put_u16(self.max_advert_int & MAX_ADVERT_INTERVAL_TICKS);
        buf.put_u16(0);

        for ip in &self.addresses {
            match ip {
                IpAddr::V4(addr) => buf.put_slice(&addr.octets()),
                IpAddr::V6(addr) => buf.put_slice(&addr.octets()),
            }
        }

        buf
    }
}

/// RFC 1071 one's complement checksum.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum += u16::from_be_bytes([pair[0], pair[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += u16::from_be_bytes([*last, 0]) as u32;
    }

    // Fold 32-bit sum to 16 bits
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}
