use std::net::Ipv4Addr;

use tracing::trace;

use crate::layer::{CounterMap, LayerContext, Protocol, ProtocolStats};
use crate::packet::ipv4::Ipv4Header;
use crate::packet::protocol::IpProto;
use crate::packet::{HeaderError, HeaderView};

/// IPv4 layer.
///
/// The declared total length bounds the bytes handed to the next layer, so
/// Ethernet padding never reaches the transport layers. Fragments count one
/// event each; only the first one is dispatched further, by protocol
/// number. Reassembly is not attempted.
#[derive(Debug, Default)]
pub struct IpProtocol {
    header: Option<Ipv4Header>,
    is_fragment: bool,
    fragments: u64,
    stats: ProtocolStats,
}

impl IpProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn header(&self) -> Option<&Ipv4Header> {
        self.header.as_ref()
    }

    #[inline]
    pub fn ttl(&self) -> Option<u8> {
        self.header.map(|h| h.ttl())
    }

    #[inline]
    pub fn ip_header_length(&self) -> Option<usize> {
        self.header.map(|h| h.header_length())
    }

    /// Declared total length, header included.
    #[inline]
    pub fn packet_length(&self) -> Option<usize> {
        self.header.map(|h| h.total_length())
    }

    #[inline]
    pub fn id(&self) -> Option<u16> {
        self.header.map(|h| h.id())
    }

    #[inline]
    pub fn protocol(&self) -> Option<IpProto> {
        self.header.map(|h| h.protocol())
    }

    #[inline]
    pub fn src_addr(&self) -> Option<Ipv4Addr> {
        self.header.map(|h| h.src_ip())
    }

    #[inline]
    pub fn dst_addr(&self) -> Option<Ipv4Addr> {
        self.header.map(|h| h.dst_ip())
    }

    #[inline]
    pub fn src_addr_raw(&self) -> Option<u32> {
        self.header.map(|h| h.src_ip_raw())
    }

    #[inline]
    pub fn dst_addr_raw(&self) -> Option<u32> {
        self.header.map(|h| h.dst_ip_raw())
    }

    /// Whether the last valid packet was a fragment.
    #[inline]
    pub fn is_fragment(&self) -> bool {
        self.is_fragment
    }

    #[inline]
    pub fn fragments(&self) -> u64 {
        self.fragments
    }
}

impl Protocol for IpProtocol {
    fn name(&self) -> &'static str {
        "ip"
    }

    fn set_header(&mut self, view: &HeaderView<'_>) -> Result<(), HeaderError> {
        self.header = Some(*view.header::<Ipv4Header>()?);
        Ok(())
    }

    fn process_packet(&mut self, view: &HeaderView<'_>, ctx: &mut LayerContext<'_>) -> bool {
        let Some(ip) = self.header else {
            self.stats.reject();
            return false;
        };

        let total = ip.total_length();
        if total > view.len() || total < ip.header_length() {
            self.stats.reject();
            trace!(total, available = view.len(), "ip total length rejected");
            return false;
        }

        self.is_fragment = ip.is_fragment();
        if self.is_fragment {
            self.fragments += 1;
            self.stats.events += 1;
        }
        self.stats.accept(view.len());
        ctx.state.endpoints = Some((ip.src_ip(), ip.dst_ip()));
        true
    }

    fn next_identifier(&self) -> Option<u16> {
        let ip = self.header?;
        if ip.fragment_offset() != 0 {
            return None;
        }
        Some(u8::from(ip.protocol()) as u16)
    }

    fn header_length(&self) -> usize {
        self.header.map_or(0, |h| h.header_length())
    }

    fn upper_view<'a>(&self, view: &HeaderView<'a>) -> Option<HeaderView<'a>> {
        let ip = self.header?;
        view.truncate(ip.total_length())
            .and_then(|v| v.advance(ip.header_length()))
            .ok()
    }

    fn stats(&self) -> &ProtocolStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut ProtocolStats {
        &mut self.stats
    }

    fn counters(&self) -> CounterMap {
        let mut counters = self.stats.counters();
        counters.push("fragments", self.fragments);
        counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::test_support::{run, tables};
    use crate::layer::DecodeState;
    use crate::packet::Packet;

    fn ip_packet(total_length: u16, flags_frag: u16, payload: usize) -> Vec<u8> {
        let mut bytes = vec![
            0x45, 0x00, // version 4, ihl 5
        ];
        bytes.extend_from_slice(&total_length.to_be_bytes());
        bytes.extend_from_slice(&[0x74, 0x74]); // id 29812
        bytes.extend_from_slice(&flags_frag.to_be_bytes());
        bytes.extend_from_slice(&[
            0x40, 0x06, 0x00, 0x00, // ttl 64, tcp, checksum
            0xc0, 0xa8, 0x01, 0x76, // 192.168.1.118
            0x50, 0x3a, 0x3d, 0xfa, // 80.58.61.250
        ]);
        bytes.resize(20 + payload, 0);
        bytes
    }

    #[test]
    fn test_ip_fields_and_endpoints() {
        let bytes = ip_packet(40, 0x4000, 20);
        let view = Packet::new(&bytes).view();
        let mut ip = IpProtocol::new();
        let mut state = DecodeState::default();
        assert!(run(&mut ip, &view, &mut tables(1), &mut state));

        assert_eq!(ip.ttl(), Some(64));
        assert_eq!(ip.packet_length(), Some(40));
        assert_eq!(ip.id(), Some(29812));
        assert_eq!(ip.protocol(), Some(IpProto::TCP));
        assert_eq!(ip.src_addr(), Some(Ipv4Addr::new(192, 168, 1, 118)));
        assert_eq!(ip.dst_addr_raw(), Some(0x503a_3dfa));
        assert!(!ip.is_fragment());
        assert_eq!(ip.next_identifier(), Some(6));
        assert_eq!(
            state.endpoints,
            Some((Ipv4Addr::new(192, 168, 1, 118), Ipv4Addr::new(80, 58, 61, 250)))
        );
    }

    #[test]
    fn test_upper_view_drops_padding() {
        // 26 bytes declared, 46 captured (ethernet minimum padding)
        let bytes = ip_packet(26, 0, 26);
        let view = Packet::new(&bytes).view();
        let mut ip = IpProtocol::new();
        assert!(run(&mut ip, &view, &mut tables(1), &mut DecodeState::default()));

        let upper = ip.upper_view(&view).unwrap();
        assert_eq!(upper.offset(), 20);
        assert_eq!(upper.len(), 6);
        assert_eq!(ip.stats().total_bytes, 46);
    }

    #[test]
    fn test_total_length_rejected() {
        let mut ip = IpProtocol::new();
        let mut flows = tables(1);
        let mut state = DecodeState::default();

        let too_long = ip_packet(100, 0, 10);
        assert!(!run(&mut ip, &Packet::new(&too_long).view(), &mut flows, &mut state));

        let too_short = ip_packet(12, 0, 10);
        assert!(!run(&mut ip, &Packet::new(&too_short).view(), &mut flows, &mut state));

        assert_eq!(ip.stats().invalid_packets, 2);
        assert_eq!(ip.stats().total_packets, 0);
        assert!(state.endpoints.is_none());
    }

    #[test]
    fn test_fragments() {
        let mut ip = IpProtocol::new();
        let mut flows = tables(1);
        let mut state = DecodeState::default();

        let first = ip_packet(1480, 0x2000, 1460); // MF, offset 0
        assert!(run(&mut ip, &Packet::new(&first).view(), &mut flows, &mut state));
        assert!(ip.is_fragment());
        assert_eq!(ip.stats().events, 1);
        assert_eq!(ip.stats().valid_packets, 1);
        assert_eq!(ip.next_identifier(), Some(6));

        let last = ip_packet(548, 0x00b9, 528); // offset 185
        assert!(run(&mut ip, &Packet::new(&last).view(), &mut flows, &mut state));
        assert!(ip.is_fragment());
        assert_eq!(ip.next_identifier(), None);
        assert_eq!(ip.counters().get("fragments"), Some(2));
    }
}
