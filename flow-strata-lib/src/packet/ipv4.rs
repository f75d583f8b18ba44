//! IPv4 header layout (RFC 791)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Version|  IHL  |    DSCP   |ECN|          Total Length         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Identification        |Flags|      Fragment Offset    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Time to Live |    Protocol   |         Header Checksum       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       Source Address                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Destination Address                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! # Examples
//!
//! ```
//! use flow_strata::packet::ipv4::Ipv4Header;
//! use flow_strata::packet::protocol::IpProto;
//! use flow_strata::packet::Packet;
//! use std::net::Ipv4Addr;
//!
//! let bytes = vec![
//!     0x45,              // Version=4, IHL=5
//!     0x00,              // DSCP=0, ECN=0
//!     0x05, 0xdc,        // Total length: 1500
//!     0x74, 0x74,        // Identification: 29812
//!     0x20, 0x00,        // MF, offset 0
//!     0x40,              // TTL: 64
//!     0x01,              // Protocol: ICMP
//!     0x00, 0x00,        // Checksum
//!     0xc0, 0xa8, 0x01, 0x01,
//!     0xc0, 0xa8, 0x01, 0x02,
//! ];
//!
//! let ip: &Ipv4Header = Packet::new(&bytes).view().header().unwrap();
//! assert_eq!(ip.id(), 29812);
//! assert_eq!(ip.total_length(), 1500);
//! assert!(ip.is_first_fragment());
//! assert_eq!(ip.protocol(), IpProto::ICMP);
//! assert_eq!(ip.dst_ip(), Ipv4Addr::new(192, 168, 1, 2));
//! ```

use std::fmt::{self, Formatter};
use std::net::Ipv4Addr;

use zerocopy::byteorder::{BigEndian, U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::packet::protocol::IpProto;
use crate::packet::PacketHeader;

pub const IPV4_MIN_HLEN: usize = 20;

#[repr(C, packed)]
#[derive(FromBytes, IntoBytes, Unaligned, Immutable, KnownLayout, Debug, Clone, Copy)]
pub struct Ipv4Header {
    ver_ihl: u8,
    dscp_ecn: u8,
    total_length: U16<BigEndian>,
    identification: U16<BigEndian>,
    flags_frag_offset: U16<BigEndian>,
    ttl: u8,
    protocol: IpProto,
    checksum: U16<BigEndian>,
    src_ip: U32<BigEndian>,
    dst_ip: U32<BigEndian>,
}

impl Ipv4Header {
    const OFFSET_MASK: u16 = 0x1FFF;
    const MF_FLAG_MASK: u16 = 0x2000;
    const DF_FLAG_MASK: u16 = 0x4000;

    #[inline]
    pub fn version(&self) -> u8 {
        self.ver_ihl >> 4
    }

    /// Header length in 32-bit words.
    #[inline]
    pub fn ihl(&self) -> u8 {
        self.ver_ihl & 0x0F
    }

    /// Header length in bytes.
    #[inline]
    pub fn header_length(&self) -> usize {
        self.ihl() as usize * 4
    }

    #[inline]
    pub fn dscp(&self) -> u8 {
        self.dscp_ecn >> 2
    }

    /// Declared datagram length, header included.
    #[inline]
    pub fn total_length(&self) -> usize {
        self.total_length.get() as usize
    }

    #[inline]
    pub fn id(&self) -> u16 {
        self.identification.get()
    }

    #[inline]
    pub fn fragment_offset(&self) -> u16 {
        self.flags_frag_offset.get() & Self::OFFSET_MASK
    }

    #[inline]
    pub fn has_more_fragments(&self) -> bool {
        self.flags_frag_offset.get() & Self::MF_FLAG_MASK != 0
    }

    #[inline]
    pub fn has_dont_fragment(&self) -> bool {
        self.flags_frag_offset.get() & Self::DF_FLAG_MASK != 0
    }

    /// MF set or a non-zero offset.
    #[inline]
    pub fn is_fragment(&self) -> bool {
        self.flags_frag_offset.get() & (Self::MF_FLAG_MASK | Self::OFFSET_MASK) != 0
    }

    #[inline]
    pub fn is_first_fragment(&self) -> bool {
        self.has_more_fragments() && self.fragment_offset() == 0
    }

    #[inline]
    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    #[inline]
    pub fn protocol(&self) -> IpProto {
        self.protocol
    }

    #[inline]
    pub fn checksum(&self) -> u16 {
        self.checksum.get()
    }

    #[inline]
    pub fn src_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.src_ip.get())
    }

    #[inline]
    pub fn dst_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.dst_ip.get())
    }

    #[inline]
    pub fn src_ip_raw(&self) -> u32 {
        self.src_ip.get()
    }

    #[inline]
    pub fn dst_ip_raw(&self) -> u32 {
        self.dst_ip.get()
    }
}

impl PacketHeader for Ipv4Header {
    const NAME: &'static str = "Ipv4Header";

    #[inline]
    fn total_len(&self) -> usize {
        self.header_length()
    }

    #[inline]
    fn is_valid(&self) -> bool {
        self.version() == 4 && self.header_length() >= IPV4_MIN_HLEN
    }
}

impl fmt::Display for Ipv4Header {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IPv4 {} -> {} proto={} ttl={} len={} id={}",
            self.src_ip(),
            self.dst_ip(),
            self.protocol(),
            self.ttl(),
            self.total_length(),
            self.id()
        )?;
        if self.is_fragment() {
            write!(
                f,
                " frag[off={} mf={}]",
                self.fragment_offset(),
                self.has_more_fragments()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{HeaderError, Packet};

    fn header_bytes(ver_ihl: u8, flags_frag: [u8; 2]) -> Vec<u8> {
        let mut bytes = vec![
            ver_ihl, 0x00, // version/ihl, tos
            0x00, 0x3d, // total length: 61
        ];
        bytes.extend_from_slice(&[0x12, 0x34]); // identification
        bytes.extend_from_slice(&flags_frag);
        bytes.extend_from_slice(&[0x40, 0x11, 0x00, 0x00]); // ttl 64, udp, checksum
        bytes.extend_from_slice(&[192, 168, 1, 118]);
        bytes.extend_from_slice(&[80, 58, 61, 250]);
        bytes
    }

    #[test]
    fn test_ipv4_header_size() {
        assert_eq!(std::mem::size_of::<Ipv4Header>(), IPV4_MIN_HLEN);
    }

    #[test]
    fn test_ipv4_fields() {
        let bytes = header_bytes(0x45, [0x40, 0x00]);
        let ip: &Ipv4Header = Packet::new(&bytes).view().header().unwrap();

        assert_eq!(ip.version(), 4);
        assert_eq!(ip.header_length(), 20);
        assert_eq!(ip.total_length(), 61);
        assert_eq!(ip.id(), 0x1234);
        assert_eq!(ip.ttl(), 64);
        assert_eq!(ip.protocol(), IpProto::UDP);
        assert_eq!(ip.src_ip().to_string(), "192.168.1.118");
        assert_eq!(ip.dst_ip().to_string(), "80.58.61.250");
        assert_eq!(ip.src_ip_raw(), 0xc0a80176);
        assert!(ip.has_dont_fragment());
        assert!(!ip.is_fragment());
    }

    #[test]
    fn test_ipv4_fragment_flags() {
        let first = header_bytes(0x45, [0x20, 0x00]);
        let ip: &Ipv4Header = Packet::new(&first).view().header().unwrap();
        assert!(ip.is_fragment());
        assert!(ip.is_first_fragment());

        let last = header_bytes(0x45, [0x00, 0xb9]);
        let ip: &Ipv4Header = Packet::new(&last).view().header().unwrap();
        assert!(ip.is_fragment());
        assert!(!ip.is_first_fragment());
        assert_eq!(ip.fragment_offset(), 0xb9);
        assert!(ip.to_string().contains("frag[off=185 mf=false]"));
    }

    #[test]
    fn test_ipv4_rejects_bad_version_and_ihl() {
        let bytes = header_bytes(0x65, [0, 0]);
        assert_eq!(
            Packet::new(&bytes).view().header::<Ipv4Header>().unwrap_err(),
            HeaderError::Invalid(Ipv4Header::NAME)
        );

        let bytes = header_bytes(0x44, [0, 0]);
        assert_eq!(
            Packet::new(&bytes).view().header::<Ipv4Header>().unwrap_err(),
            HeaderError::Invalid(Ipv4Header::NAME)
        );
    }

    #[test]
    fn test_ipv4_options_must_be_captured() {
        // IHL=6 announces 4 bytes of options that are missing
        let bytes = header_bytes(0x46, [0, 0]);
        assert_eq!(
            Packet::new(&bytes).view().header::<Ipv4Header>().unwrap_err(),
            HeaderError::TooShort(Ipv4Header::NAME)
        );

        let mut bytes = header_bytes(0x46, [0, 0]);
        bytes.extend_from_slice(&[0x01, 0x01, 0x01, 0x00]); // NOP NOP NOP EOL
        let ip: &Ipv4Header = Packet::new(&bytes).view().header().unwrap();
        assert_eq!(ip.header_length(), 24);
    }
}
