//! MPLS label stack entry (RFC 3032)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                Label                  | TC  |S|       TTL     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The stack carries no payload type: the layer below the bottom label is
//! guessed from the first nibble of the payload.

use zerocopy::byteorder::{BigEndian, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::packet::protocol::EtherProto;
use crate::packet::PacketHeader;

/// Deepest label stack walked before giving up.
pub const MPLS_MAX_LABELS: usize = 8;

#[repr(C, packed)]
#[derive(FromBytes, IntoBytes, Unaligned, Immutable, KnownLayout, Debug, Clone, Copy)]
pub struct MplsLabel {
    label_tc_s_ttl: U32<BigEndian>,
}

impl MplsLabel {
    const BOS_MASK: u32 = 0x0000_0100;

    /// Returns the 20-bit label value
    #[inline]
    pub fn label(&self) -> u32 {
        self.label_tc_s_ttl.get() >> 12
    }

    #[inline]
    pub fn traffic_class(&self) -> u8 {
        ((self.label_tc_s_ttl.get() >> 9) & 0x07) as u8
    }

    /// Returns true if this is the bottom of the label stack (S=1)
    #[inline]
    pub fn is_bottom_of_stack(&self) -> bool {
        self.label_tc_s_ttl.get() & Self::BOS_MASK != 0
    }

    #[inline]
    pub fn ttl(&self) -> u8 {
        (self.label_tc_s_ttl.get() & 0xFF) as u8
    }
}

impl PacketHeader for MplsLabel {
    const NAME: &'static str = "MplsLabel";
}

/// Guesses the protocol following the bottom label.
#[inline]
pub fn detect_inner_protocol(payload: &[u8]) -> Option<EtherProto> {
    match payload.first()? >> 4 {
        4 => Some(EtherProto::IPV4),
        6 => Some(EtherProto::IPV6),
        _ => None,
    }
}
