//! ICMP header layout (RFC 792)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type      |     Code      |          Checksum             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Rest of Header                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::fmt::{self, Formatter};

use zerocopy::byteorder::{BigEndian, U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::packet::PacketHeader;

/// ICMP message type
#[repr(transparent)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    FromBytes,
    IntoBytes,
    Unaligned,
    Immutable,
    KnownLayout,
)]
pub struct IcmpType(pub u8);

impl IcmpType {
    pub const ECHO_REPLY: IcmpType = IcmpType(0);
    pub const DEST_UNREACH: IcmpType = IcmpType(3);
    pub const REDIRECT: IcmpType = IcmpType(5);
    pub const ECHO: IcmpType = IcmpType(8);
    pub const TIME_EXCEEDED: IcmpType = IcmpType(11);
    pub const PARAMETER_PROBLEM: IcmpType = IcmpType(12);
    pub const TIMESTAMP: IcmpType = IcmpType(13);
    pub const TIMESTAMP_REPLY: IcmpType = IcmpType(14);

    /// Error messages quote the offending datagram instead of carrying data.
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(
            *self,
            IcmpType::DEST_UNREACH
                | IcmpType::REDIRECT
                | IcmpType::TIME_EXCEEDED
                | IcmpType::PARAMETER_PROBLEM
        )
    }
}

impl fmt::Display for IcmpType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match *self {
            IcmpType::ECHO_REPLY => "echo-reply",
            IcmpType::DEST_UNREACH => "dest-unreach",
            IcmpType::REDIRECT => "redirect",
            IcmpType::ECHO => "echo",
            IcmpType::TIME_EXCEEDED => "time-exceeded",
            IcmpType::PARAMETER_PROBLEM => "parameter-problem",
            IcmpType::TIMESTAMP => "timestamp",
            IcmpType::TIMESTAMP_REPLY => "timestamp-reply",
            IcmpType(other) => return write!(f, "type-{other}"),
        };
        f.write_str(name)
    }
}

#[repr(C, packed)]
#[derive(FromBytes, IntoBytes, Unaligned, Immutable, KnownLayout, Debug, Clone, Copy)]
pub struct IcmpHeader {
    icmp_type: IcmpType,
    code: u8,
    checksum: U16<BigEndian>,
    un: U32<BigEndian>,
}

impl IcmpHeader {
    #[inline]
    pub fn icmp_type(&self) -> IcmpType {
        self.icmp_type
    }

    #[inline]
    pub fn code(&self) -> u8 {
        self.code
    }

    #[inline]
    pub fn checksum(&self) -> u16 {
        self.checksum.get()
    }

    /// Echo identifier, meaningful for echo and echo-reply only.
    #[inline]
    pub fn echo_id(&self) -> u16 {
        (self.un.get() >> 16) as u16
    }

    #[inline]
    pub fn echo_sequence(&self) -> u16 {
        (self.un.get() & 0xFFFF) as u16
    }
}

impl PacketHeader for IcmpHeader {
    const NAME: &'static str = "IcmpHeader";
}
