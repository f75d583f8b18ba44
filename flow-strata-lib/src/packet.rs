//! Captured packets and bounds-checked header views
//!
//! A [`Packet`] is the immutable capture record handed to
//! [`NetworkStack::inject`](crate::stack::NetworkStack::inject). Decoders never
//! touch its bytes directly: each layer receives a [`HeaderView`], a window
//! `(offset, declared_length)` into the packet that always satisfies
//! `offset + declared_length <= packet.len()`. Moving to the next layer means
//! deriving a new view with [`HeaderView::advance`] (and, for layers that
//! declare their own length such as IPv4, [`HeaderView::truncate`]); both
//! refuse to produce a view that would break the invariant.
//!
//! # Examples
//!
//! ```
//! use flow_strata::packet::{HeaderView, Packet};
//! use flow_strata::packet::ether::EtherHeader;
//! use flow_strata::packet::protocol::EtherProto;
//!
//! let frame = vec![
//!     0xff, 0xff, 0xff, 0xff, 0xff, 0xff, // dst
//!     0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // src
//!     0x08, 0x00,                         // IPv4
//!     0x45, 0x00,                         // start of the IP header
//! ];
//!
//! let packet = Packet::new(&frame);
//! let view = packet.view();
//! let eth: &EtherHeader = view.header().unwrap();
//! assert_eq!(eth.proto(), EtherProto::IPV4);
//!
//! let upper = view.advance(14).unwrap();
//! assert_eq!(upper.offset(), 14);
//! assert_eq!(upper.len(), 2);
//! assert!(upper.advance(3).is_err());
//! ```

use std::fmt;
use std::mem;

use thiserror::Error;
use zerocopy::{FromBytes, Immutable, KnownLayout, Ref, Unaligned};

use crate::metadata::PacketMetadata;
use crate::timestamp::Timestamp;

pub mod ether;
pub mod icmp;
pub mod ipv4;
pub mod protocol;
pub mod tcp;
pub mod tunnel;
pub mod udp;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("buffer too short for {0}")]
    TooShort(&'static str),
    #[error("invalid {0}")]
    Invalid(&'static str),
    #[error("declared length {len} at offset {offset} exceeds {available} captured bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        available: usize,
    },
}

/// Fixed wire layout of a protocol header.
pub trait PacketHeader: Sized {
    const FIXED_LEN: usize = mem::size_of::<Self>();
    const NAME: &'static str;

    /// Length of the header including any variable part announced by the
    /// fixed fields (IPv4 options, GRE optional words, TCP options).
    #[inline]
    fn total_len(&self) -> usize {
        Self::FIXED_LEN
    }

    /// Structural validity of the fixed fields.
    #[inline]
    fn is_valid(&self) -> bool {
        true
    }
}

/// Immutable capture record.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    data: &'a [u8],
    wire_len: usize,
    timestamp: Timestamp,
}

impl<'a> Packet<'a> {
    /// A packet whose wire length equals the captured length.
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        Packet {
            data,
            wire_len: data.len(),
            timestamp: Timestamp::ZERO,
        }
    }

    #[inline]
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Original length on the wire, never less than the captured length.
    #[inline]
    pub fn with_wire_len(mut self, wire_len: usize) -> Self {
        self.wire_len = wire_len.max(self.data.len());
        self
    }

    /// Builds a packet from any capture block, honouring its caplen.
    pub fn from_metadata<M: PacketMetadata>(meta: &'a M) -> Self {
        let data = meta.data();
        let caplen = (meta.caplen() as usize).min(data.len());
        Packet::new(&data[..caplen])
            .with_wire_len(meta.origlen() as usize)
            .with_timestamp(meta.timestamp())
    }

    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Captured length.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn wire_len(&self) -> usize {
        self.wire_len
    }

    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// View over the whole captured packet.
    #[inline]
    pub fn view(&self) -> HeaderView<'a> {
        HeaderView {
            packet: *self,
            offset: 0,
            len: self.data.len(),
        }
    }
}

/// Bounds-checked window over the bytes of one decode depth.
#[derive(Clone, Copy)]
pub struct HeaderView<'a> {
    packet: Packet<'a>,
    offset: usize,
    len: usize,
}

impl<'a> HeaderView<'a> {
    /// Creates a view, rejecting any window that is not fully captured.
    pub fn new(packet: Packet<'a>, offset: usize, len: usize) -> Result<Self, HeaderError> {
        match offset.checked_add(len) {
            Some(end) if end <= packet.len() => Ok(HeaderView {
                packet,
                offset,
                len,
            }),
            _ => Err(HeaderError::OutOfBounds {
                offset,
                len,
                available: packet.len(),
            }),
        }
    }

    #[inline]
    pub fn packet(&self) -> Packet<'a> {
        self.packet
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Declared length of the window.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.packet.timestamp
    }

    /// Bytes inside the window.
    #[inline]
    pub fn bytes(&self) -> &'a [u8] {
        // constructors keep offset + len within the captured data
        &self.packet.data[self.offset..self.offset + self.len]
    }

    /// The window that starts `n` bytes further and ends where this one ends.
    #[inline]
    pub fn advance(&self, n: usize) -> Result<HeaderView<'a>, HeaderError> {
        if n > self.len {
            return Err(HeaderError::TooShort("advance"));
        }
        Ok(HeaderView {
            packet: self.packet,
            offset: self.offset + n,
            len: self.len - n,
        })
    }

    /// Shrinks the window to a declared length, which must fit in the current one.
    #[inline]
    pub fn truncate(&self, len: usize) -> Result<HeaderView<'a>, HeaderError> {
        if len > self.len {
            return Err(HeaderError::OutOfBounds {
                offset: self.offset,
                len,
                available: self.len,
            });
        }
        Ok(HeaderView {
            packet: self.packet,
            offset: self.offset,
            len,
        })
    }

    /// Reads the fixed header `H` at the start of the window.
    ///
    /// Fails when the window is shorter than the fixed part, when the fixed
    /// fields are not valid, or when the variable part they announce does not
    /// fit in the window.
    #[inline]
    pub fn header<H>(&self) -> Result<&'a H, HeaderError>
    where
        H: PacketHeader + FromBytes + KnownLayout + Immutable + Unaligned,
    {
        let (header, _) =
            Ref::<_, H>::from_prefix(self.bytes()).map_err(|_| HeaderError::TooShort(H::NAME))?;
        let header = Ref::into_ref(header);

        if !header.is_valid() {
            return Err(HeaderError::Invalid(H::NAME));
        }
        if header.total_len() > self.len {
            return Err(HeaderError::TooShort(H::NAME));
        }
        Ok(header)
    }
}

impl fmt::Debug for HeaderView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderView")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("caplen", &self.packet.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::ipv4::Ipv4Header;

    #[test]
    fn test_view_invariant() {
        let data = [0u8; 10];
        let packet = Packet::new(&data);

        assert!(HeaderView::new(packet, 0, 10).is_ok());
        assert!(HeaderView::new(packet, 4, 6).is_ok());
        assert!(HeaderView::new(packet, 10, 0).is_ok());
        assert_eq!(
            HeaderView::new(packet, 4, 7).unwrap_err(),
            HeaderError::OutOfBounds {
                offset: 4,
                len: 7,
                available: 10
            }
        );
        assert!(HeaderView::new(packet, usize::MAX, 2).is_err());
    }

    #[test]
    fn test_advance_and_truncate() {
        let data: Vec<u8> = (0..20).collect();
        let view = Packet::new(&data).view();

        let upper = view.advance(8).unwrap();
        assert_eq!(upper.offset(), 8);
        assert_eq!(upper.len(), 12);
        assert_eq!(upper.bytes()[0], 8);

        let short = upper.truncate(4).unwrap();
        assert_eq!(short.bytes(), &[8, 9, 10, 11]);
        assert!(short.truncate(5).is_err());
        assert!(short.advance(4).unwrap().is_empty());
        assert!(short.advance(5).is_err());
    }

    #[test]
    fn test_header_rejects_truncation() {
        let ip = [
            0x45, 0x00, 0x00, 0x14, // ver/ihl, tos, total length 20
            0x00, 0x01, 0x00, 0x00, // id, flags/offset
            0x40, 0x11, 0x00, 0x00, // ttl, udp, checksum
            0x0a, 0x00, 0x00, 0x01, // src
            0x0a, 0x00, 0x00, 0x02, // dst
        ];

        for cut in 0..ip.len() {
            let view = Packet::new(&ip[..cut]).view();
            assert_eq!(
                view.header::<Ipv4Header>().unwrap_err(),
                HeaderError::TooShort(Ipv4Header::NAME),
                "cut at {cut}"
            );
        }
        assert!(Packet::new(&ip).view().header::<Ipv4Header>().is_ok());
    }

    #[test]
    fn test_wire_len_never_below_caplen() {
        let data = [0u8; 64];
        let packet = Packet::new(&data).with_wire_len(10);
        assert_eq!(packet.wire_len(), 64);
        let packet = Packet::new(&data).with_wire_len(1514);
        assert_eq!(packet.wire_len(), 1514);
        assert_eq!(packet.len(), 64);
    }
}
