//! VXLAN header layout (RFC 7348)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |R|R|R|R|I|R|R|R|            Reserved                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                VXLAN Network Identifier (VNI) |   Reserved    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use zerocopy::byteorder::{BigEndian, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::packet::PacketHeader;

/// IANA-assigned destination port.
pub const VXLAN_PORT: u16 = 4789;

#[repr(C, packed)]
#[derive(FromBytes, IntoBytes, Unaligned, Immutable, KnownLayout, Debug, Clone, Copy)]
pub struct VxlanHeader {
    flags_reserved: U32<BigEndian>,
    vni_reserved: U32<BigEndian>,
}

impl VxlanHeader {
    const FLAG_I_MASK: u32 = 0x0800_0000;

    #[inline]
    pub fn flags(&self) -> u8 {
        (self.flags_reserved.get() >> 24) as u8
    }

    /// The 24-bit VXLAN network identifier.
    #[inline]
    pub fn vni(&self) -> u32 {
        self.vni_reserved.get() >> 8
    }
}

impl PacketHeader for VxlanHeader {
    const NAME: &'static str = "VxlanHeader";

    /// The I flag must be set.
    #[inline]
    fn is_valid(&self) -> bool {
        self.flags_reserved.get() & Self::FLAG_I_MASK != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{HeaderError, Packet};

    #[test]
    fn test_vxlan_vni() {
        let bytes = [
            0x08, 0x00, 0x00, 0x00, // I flag
            0x00, 0x30, 0x39, 0x00, // VNI 12345
        ];
        let vxlan: &VxlanHeader = Packet::new(&bytes).view().header().unwrap();
        assert_eq!(vxlan.flags(), 0x08);
        assert_eq!(vxlan.vni(), 12345);
    }

    #[test]
    fn test_vxlan_requires_i_flag() {
        let bytes = [0x00, 0x00, 0x00, 0x00, 0x00, 0x30, 0x39, 0x00];
        assert_eq!(
            Packet::new(&bytes).view().header::<VxlanHeader>().unwrap_err(),
            HeaderError::Invalid(VxlanHeader::NAME)
        );
    }
}
