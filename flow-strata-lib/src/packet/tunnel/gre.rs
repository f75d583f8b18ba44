//! GRE header layout (RFC 2784, RFC 2890)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |C| |K|S| Reserved0       | Ver |         Protocol Type         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      Checksum (optional)      |       Reserved1 (optional)    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Key (optional)                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                 Sequence Number (optional)                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! ```
//! use flow_strata::packet::tunnel::gre::GreHeader;
//! use flow_strata::packet::protocol::EtherProto;
//! use flow_strata::packet::Packet;
//!
//! let bytes = vec![
//!     0x20, 0x00,              // K bit, version 0
//!     0x65, 0x58,              // transparent ethernet bridging
//!     0x00, 0x00, 0x00, 0x2a,  // key = 42
//! ];
//!
//! let view = Packet::new(&bytes).view();
//! let gre: &GreHeader = view.header().unwrap();
//! assert_eq!(gre.protocol_type(), EtherProto::TEB);
//! assert_eq!(gre.header_length(), 8);
//! assert_eq!(gre.key(view.bytes()), Some(42));
//! ```

use zerocopy::byteorder::{BigEndian, U16};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::packet::protocol::EtherProto;
use crate::packet::PacketHeader;

#[repr(C, packed)]
#[derive(FromBytes, IntoBytes, Unaligned, Immutable, KnownLayout, Debug, Clone, Copy)]
pub struct GreHeader {
    flags_version: U16<BigEndian>,
    protocol_type: EtherProto,
}

impl GreHeader {
    pub const FLAG_CHECKSUM: u16 = 0x8000;
    pub const FLAG_ROUTING: u16 = 0x4000;
    pub const FLAG_KEY: u16 = 0x2000;
    pub const FLAG_SEQUENCE: u16 = 0x1000;

    const VERSION_MASK: u16 = 0x0007;
    const RESERVED_MASK: u16 = 0x0FF8;

    #[inline]
    pub fn version(&self) -> u8 {
        (self.flags_version.get() & Self::VERSION_MASK) as u8
    }

    /// EtherType of the encapsulated payload.
    #[inline]
    pub fn protocol_type(&self) -> EtherProto {
        self.protocol_type
    }

    #[inline]
    pub fn has_checksum(&self) -> bool {
        self.flags_version.get() & Self::FLAG_CHECKSUM != 0
    }

    #[inline]
    pub fn has_key(&self) -> bool {
        self.flags_version.get() & Self::FLAG_KEY != 0
    }

    #[inline]
    pub fn has_sequence(&self) -> bool {
        self.flags_version.get() & Self::FLAG_SEQUENCE != 0
    }

    /// Length including the optional words announced by the flags.
    #[inline]
    pub fn header_length(&self) -> usize {
        let optional = [
            self.has_checksum() || self.flags_version.get() & Self::FLAG_ROUTING != 0,
            self.has_key(),
            self.has_sequence(),
        ];
        Self::FIXED_LEN + 4 * optional.iter().filter(|present| **present).count()
    }

    /// Reads the key from `buf`, which must start at this header.
    pub fn key(&self, buf: &[u8]) -> Option<u32> {
        if !self.has_key() {
            return None;
        }
        let at = Self::FIXED_LEN + if self.has_checksum() { 4 } else { 0 };
        let word = buf.get(at..at + 4)?;
        Some(u32::from_be_bytes([word[0], word[1], word[2], word[3]]))
    }
}

impl PacketHeader for GreHeader {
    const NAME: &'static str = "GreHeader";

    #[inline]
    fn total_len(&self) -> usize {
        self.header_length()
    }

    /// Version 0 with the reserved flag bits clear.
    #[inline]
    fn is_valid(&self) -> bool {
        self.version() == 0 && self.flags_version.get() & Self::RESERVED_MASK == 0
    }
}
