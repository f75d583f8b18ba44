//! Capture record metadata
//!
//! [`PacketMetadata`] abstracts over the `pcap_parser` block types so a
//! reader can turn any of them into a [`Packet`](crate::packet::Packet) with
//! [`Packet::from_metadata`](crate::packet::Packet::from_metadata).

use std::cmp::min;

use pcap_parser::{EnhancedPacketBlock, LegacyPcapBlock, SimplePacketBlock};

use crate::timestamp::Timestamp;

pub trait PacketMetadata {
    fn caplen(&self) -> u32;
    fn origlen(&self) -> u32;
    fn data(&self) -> &[u8];
    fn timestamp(&self) -> Timestamp;
}

impl PacketMetadata for LegacyPcapBlock<'_> {
    #[inline]
    fn timestamp(&self) -> Timestamp {
        Timestamp::from_micros_parts(self.ts_sec, self.ts_usec)
    }

    #[inline]
    fn caplen(&self) -> u32 {
        self.caplen
    }

    #[inline]
    fn origlen(&self) -> u32 {
        self.origlen
    }

    #[inline]
    fn data(&self) -> &[u8] {
        self.data
    }
}

impl PacketMetadata for EnhancedPacketBlock<'_> {
    /// The interface resolution is not known here: values that look like
    /// nanoseconds since 1973..2106 are kept, anything else is taken as
    /// microseconds.
    #[inline]
    fn timestamp(&self) -> Timestamp {
        let raw_ts = ((self.ts_high as u64) << 32) | (self.ts_low as u64);
        let maybe_secs = raw_ts / 1_000_000_000;

        if (100_000_000..=4_000_000_000).contains(&maybe_secs) {
            Timestamp(raw_ts)
        } else {
            Timestamp(raw_ts.saturating_mul(1000))
        }
    }

    #[inline]
    fn caplen(&self) -> u32 {
        self.caplen
    }

    #[inline]
    fn origlen(&self) -> u32 {
        self.origlen
    }

    #[inline]
    fn data(&self) -> &[u8] {
        self.data
    }
}

impl PacketMetadata for SimplePacketBlock<'_> {
    #[inline]
    fn timestamp(&self) -> Timestamp {
        Timestamp::ZERO
    }

    #[inline]
    fn caplen(&self) -> u32 {
        min(self.origlen, self.data.len() as u32)
    }

    #[inline]
    fn origlen(&self) -> u32 {
        self.origlen
    }

    #[inline]
    fn data(&self) -> &[u8] {
        self.data
    }
}
