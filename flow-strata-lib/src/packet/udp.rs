//! UDP header layout (RFC 768)
//!
//! ```text
//!  0      7 8     15 16    23 24    31
//! +--------+--------+--------+--------+
//! |     Source      |   Destination   |
//! |      Port       |      Port       |
//! +--------+--------+--------+--------+
//! |     Length      |    Checksum     |
//! +--------+--------+--------+--------+
//! ```

use std::fmt::{self, Formatter};

use zerocopy::byteorder::{BigEndian, U16};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::packet::PacketHeader;

#[repr(C, packed)]
#[derive(FromBytes, IntoBytes, Unaligned, Immutable, KnownLayout, Debug, Clone, Copy)]
pub struct UdpHeader {
    src_port: U16<BigEndian>,
    dst_port: U16<BigEndian>,
    length: U16<BigEndian>,
    checksum: U16<BigEndian>,
}

impl UdpHeader {
    /// Returns the source port number
    #[inline]
    pub fn src_port(&self) -> u16 {
        self.src_port.get()
    }

    /// Returns the destination port number
    #[inline]
    pub fn dst_port(&self) -> u16 {
        self.dst_port.get()
    }

    /// Returns the total length of the UDP datagram (header + data)
    #[inline]
    pub fn length(&self) -> u16 {
        self.length.get()
    }

    #[inline]
    pub fn checksum(&self) -> u16 {
        self.checksum.get()
    }

    /// Returns the length of the payload data
    #[inline]
    pub fn payload_len(&self) -> usize {
        (self.length() as usize).saturating_sub(Self::FIXED_LEN)
    }
}

impl PacketHeader for UdpHeader {
    const NAME: &'static str = "UdpHeader";

    #[inline]
    fn is_valid(&self) -> bool {
        self.length() as usize >= Self::FIXED_LEN
    }
}

impl fmt::Display for UdpHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "UDP {} -> {} len={}",
            self.src_port(),
            self.dst_port(),
            self.length()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{HeaderError, Packet};

    #[test]
    fn test_udp_header() {
        let bytes = [
            0xd4, 0x31, // src port 54321
            0x00, 0x35, // dst port 53
            0x00, 0x0c, // length 12
            0x00, 0x00, // checksum
            0xde, 0xad, 0xbe, 0xef,
        ];

        let udp: &UdpHeader = Packet::new(&bytes).view().header().unwrap();
        assert_eq!(udp.src_port(), 54321);
        assert_eq!(udp.dst_port(), 53);
        assert_eq!(udp.length(), 12);
        assert_eq!(udp.payload_len(), 4);
        assert_eq!(udp.to_string(), "UDP 54321 -> 53 len=12");
    }

    #[test]
    fn test_udp_length_below_header() {
        let bytes = [0x00, 0x01, 0x00, 0x02, 0x00, 0x04, 0x00, 0x00];
        assert_eq!(
            Packet::new(&bytes).view().header::<UdpHeader>().unwrap_err(),
            HeaderError::Invalid(UdpHeader::NAME)
        );
    }
}
