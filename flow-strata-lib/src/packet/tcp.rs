//! TCP header layout (RFC 793)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Source Port          |       Destination Port        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Data |       |C|E|U|A|P|R|S|F|                               |
//! | Offset| Rsrvd |W|C|R|C|S|S|Y|I|            Window             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Checksum            |         Urgent Pointer        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::fmt::{self, Formatter};

use smol_str::{SmolStr, SmolStrBuilder};
use zerocopy::byteorder::{BigEndian, U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::packet::PacketHeader;

pub const TCP_MIN_HLEN: usize = 20;

#[repr(C, packed)]
#[derive(FromBytes, IntoBytes, Unaligned, Immutable, KnownLayout, Debug, Clone, Copy)]
pub struct TcpHeader {
    src_port: U16<BigEndian>,
    dst_port: U16<BigEndian>,
    sequence_number: U32<BigEndian>,
    acknowledgment_number: U32<BigEndian>,
    data_offset_flags: U16<BigEndian>,
    window_size: U16<BigEndian>,
    checksum: U16<BigEndian>,
    urgent_pointer: U16<BigEndian>,
}

impl TcpHeader {
    pub const FLAG_FIN: u8 = 0x01;
    pub const FLAG_SYN: u8 = 0x02;
    pub const FLAG_RST: u8 = 0x04;
    pub const FLAG_PSH: u8 = 0x08;
    pub const FLAG_ACK: u8 = 0x10;
    pub const FLAG_URG: u8 = 0x20;

    /// Returns the data offset (header length) in 32-bit words
    #[inline]
    pub fn data_offset(&self) -> u8 {
        (self.data_offset_flags.get() >> 12) as u8
    }

    /// Header length in bytes, options included.
    #[inline]
    pub fn header_length(&self) -> usize {
        self.data_offset() as usize * 4
    }

    #[inline]
    pub fn flags(&self) -> u8 {
        (self.data_offset_flags.get() & 0x00FF) as u8
    }

    #[inline]
    pub fn is_fin(&self) -> bool {
        self.flags() & Self::FLAG_FIN != 0
    }

    #[inline]
    pub fn is_syn(&self) -> bool {
        self.flags() & Self::FLAG_SYN != 0
    }

    #[inline]
    pub fn is_rst(&self) -> bool {
        self.flags() & Self::FLAG_RST != 0
    }

    #[inline]
    pub fn is_psh(&self) -> bool {
        self.flags() & Self::FLAG_PSH != 0
    }

    #[inline]
    pub fn is_ack(&self) -> bool {
        self.flags() & Self::FLAG_ACK != 0
    }

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

    #[inline]
    pub fn sequence_number(&self) -> u32 {
        self.sequence_number.get()
    }

    #[inline]
    pub fn acknowledgment_number(&self) -> u32 {
        self.acknowledgment_number.get()
    }

    #[inline]
    pub fn window_size(&self) -> u16 {
        self.window_size.get()
    }

    /// Compact flag rendering, e.g. `SA` for SYN+ACK.
    pub fn flags_string(&self) -> SmolStr {
        const NAMES: [(u8, char); 6] = [
            (TcpHeader::FLAG_SYN, 'S'),
            (TcpHeader::FLAG_ACK, 'A'),
            (TcpHeader::FLAG_FIN, 'F'),
            (TcpHeader::FLAG_RST, 'R'),
            (TcpHeader::FLAG_PSH, 'P'),
            (TcpHeader::FLAG_URG, 'U'),
        ];
        let mut builder = SmolStrBuilder::new();
        for (mask, c) in NAMES {
            if self.flags() & mask != 0 {
                builder.push(c);
            }
        }
        builder.finish()
    }
}

impl PacketHeader for TcpHeader {
    const NAME: &'static str = "TcpHeader";

    #[inline]
    fn total_len(&self) -> usize {
        self.header_length()
    }

    #[inline]
    fn is_valid(&self) -> bool {
        self.header_length() >= TCP_MIN_HLEN
    }
}

impl fmt::Display for TcpHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TCP {} -> {} [{}] seq={} ack={} win={}",
            self.src_port(),
            self.dst_port(),
            self.flags_string(),
            self.sequence_number(),
            self.acknowledgment_number(),
            self.window_size()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{HeaderError, Packet};

    #[test]
    fn test_tcp_syn() {
        let bytes = [
            0xc3, 0x50, // src port 50000
            0x00, 0x50, // dst port 80
            0x00, 0x00, 0x00, 0x01, // seq
            0x00, 0x00, 0x00, 0x00, // ack
            0x50, 0x02, // data offset 5, SYN
            0xff, 0xff, // window
            0x00, 0x00, 0x00, 0x00, // checksum, urgent
        ];

        let tcp: &TcpHeader = Packet::new(&bytes).view().header().unwrap();
        assert_eq!(tcp.src_port(), 50000);
        assert_eq!(tcp.dst_port(), 80);
        assert_eq!(tcp.header_length(), 20);
        assert!(tcp.is_syn());
        assert!(!tcp.is_ack());
        assert_eq!(tcp.flags_string(), "S");
        assert_eq!(tcp.sequence_number(), 1);
    }

    #[test]
    fn test_tcp_bad_data_offset() {
        let mut bytes = [0u8; 20];
        bytes[12] = 0x40; // data offset 4 < 5
        assert_eq!(
            Packet::new(&bytes).view().header::<TcpHeader>().unwrap_err(),
            HeaderError::Invalid(TcpHeader::NAME)
        );

        bytes[12] = 0x60; // options announced but not captured
        assert_eq!(
            Packet::new(&bytes).view().header::<TcpHeader>().unwrap_err(),
            HeaderError::TooShort(TcpHeader::NAME)
        );
    }

    #[test]
    fn test_tcp_flags_string() {
        let mut bytes = [0u8; 20];
        bytes[12] = 0x50;
        bytes[13] = TcpHeader::FLAG_SYN | TcpHeader::FLAG_ACK;
        let tcp: &TcpHeader = Packet::new(&bytes).view().header().unwrap();
        assert_eq!(tcp.flags_string(), "SA");
        bytes[13] = TcpHeader::FLAG_FIN | TcpHeader::FLAG_ACK | TcpHeader::FLAG_PSH;
        let tcp: &TcpHeader = Packet::new(&bytes).view().header().unwrap();
        assert_eq!(tcp.flags_string(), "AFP");
    }
}
