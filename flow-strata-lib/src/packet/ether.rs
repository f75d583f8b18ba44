//! Ethernet II and 802.1Q header layouts
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! +                    Destination MAC Address                    +
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! +                      Source MAC Address                       +
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           EtherType           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Unlike a one-shot parser, the dispatch graph handles an 802.1Q tag as a
//! layer of its own: the Ethernet layer reports `VLAN_8021Q` as its next
//! identifier and the VLAN layer reads the 4-byte [`VlanTag`] that follows.
//!
//! ```text
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | PCP |D|         VLAN ID       |        Inner EtherType        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zerocopy::{BigEndian, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, U16};

use crate::packet::protocol::EtherProto;
use crate::packet::PacketHeader;

pub const ETH_ALEN: usize = 6;
pub const ETH_HLEN: usize = 14;
pub const VLAN_TAG_LEN: usize = 4;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
    Serialize,
    Deserialize,
)]
#[serde(into = "String")]
#[serde(try_from = "String")]
#[repr(transparent)]
pub struct EthAddr(pub [u8; ETH_ALEN]);

impl Display for EthAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[derive(Debug, Clone, Error)]
#[error("invalid ethernet address {0:?}")]
pub struct EthAddrError(String);

impl FromStr for EthAddr {
    type Err = EthAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut addr = [0u8; ETH_ALEN];
        let mut parts = s.split(':');
        for byte in addr.iter_mut() {
            *byte = parts
                .next()
                .and_then(|p| u8::from_str_radix(p, 16).ok())
                .ok_or_else(|| EthAddrError(s.to_owned()))?;
        }
        if parts.next().is_some() {
            return Err(EthAddrError(s.to_owned()));
        }
        Ok(EthAddr(addr))
    }
}

impl From<EthAddr> for String {
    #[inline]
    fn from(addr: EthAddr) -> Self {
        addr.to_string()
    }
}

impl TryFrom<String> for EthAddr {
    type Error = EthAddrError;

    #[inline]
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[repr(C, packed)]
#[derive(FromBytes, IntoBytes, Unaligned, Immutable, KnownLayout, Debug, Clone, Copy)]
pub struct EtherHeader {
    dest: EthAddr,
    source: EthAddr,
    proto: EtherProto,
}

impl EtherHeader {
    #[inline]
    pub fn dest(&self) -> EthAddr {
        self.dest
    }

    #[inline]
    pub fn source(&self) -> EthAddr {
        self.source
    }

    /// EtherType of the encapsulated payload.
    #[inline]
    pub fn proto(&self) -> EtherProto {
        self.proto
    }
}

impl PacketHeader for EtherHeader {
    const NAME: &'static str = "EtherHeader";
}

impl Display for EtherHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Ethernet {} -> {} proto={}", self.source(), self.dest(), self.proto())
    }
}

/// 802.1Q tag as seen after the outer EtherType.
#[repr(C, packed)]
#[derive(FromBytes, IntoBytes, Unaligned, Immutable, KnownLayout, Debug, Clone, Copy)]
pub struct VlanTag {
    tci: U16<BigEndian>,
    proto: EtherProto,
}

impl VlanTag {
    #[inline]
    pub fn vlan_id(&self) -> u16 {
        self.tci.get() & 0x0FFF
    }

    #[inline]
    pub fn pcp(&self) -> u8 {
        (self.tci.get() >> 13) as u8
    }

    #[inline]
    pub fn dei(&self) -> bool {
        (self.tci.get() >> 12) & 0x01 != 0
    }

    /// EtherType following the tag.
    #[inline]
    pub fn proto(&self) -> EtherProto {
        self.proto
    }
}

impl PacketHeader for VlanTag {
    const NAME: &'static str = "VlanTag";
}

impl Display for VlanTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "802.1Q vid={} pcp={} dei={} proto={}",
            self.vlan_id(),
            self.pcp(),
            self.dei(),
            self.proto()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;

    #[test]
    fn test_ether_header() {
        let frame = [
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, // dest MAC
            0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, // source MAC
            0x81, 0x00, // EtherType: 802.1Q
        ];

        let eth: &EtherHeader = Packet::new(&frame).view().header().unwrap();
        assert_eq!(eth.proto(), EtherProto::VLAN_8021Q);
        assert_eq!(eth.dest().to_string(), "01:02:03:04:05:06");
        assert_eq!(eth.source().to_string(), "07:08:09:0a:0b:0c");
        assert_eq!(
            eth.to_string(),
            format!("Ethernet 07:08:09:0a:0b:0c -> 01:02:03:04:05:06 proto={}", EtherProto::VLAN_8021Q)
        );
    }

    #[test]
    fn test_vlan_tag() {
        let tag_bytes = [
            0xa0, 0x2a, // TCI: PCP=5, DEI=0, VID=42
            0x08, 0x00, // inner EtherType: IPv4
        ];

        let tag: &VlanTag = Packet::new(&tag_bytes).view().header().unwrap();
        assert_eq!(tag.vlan_id(), 42);
        assert_eq!(tag.pcp(), 5);
        assert!(!tag.dei());
        assert_eq!(tag.proto(), EtherProto::IPV4);
        assert!(tag.to_string().contains("vid=42"));
    }

    #[test]
    fn test_eth_addr_in_place() {
        let bytes = [0x00, 0x1b, 0x21, 0x3c, 0x9d, 0xf8];
        let addr = EthAddr::ref_from_bytes(&bytes).unwrap();
        assert_eq!(addr.to_string(), "00:1b:21:3c:9d:f8");
        assert_eq!(std::mem::align_of::<EthAddr>(), 1);
    }

    #[test]
    fn test_eth_addr_parse() {
        let addr: EthAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(addr.0, [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert!("aa:bb:cc:dd:ee".parse::<EthAddr>().is_err());
        assert!("aa:bb:cc:dd:ee:ff:00".parse::<EthAddr>().is_err());
        assert!("zz:bb:cc:dd:ee:ff".parse::<EthAddr>().is_err());

        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"aa:bb:cc:dd:ee:ff\"");
        let back: EthAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
