use crate::layer::{LayerContext, Protocol, ProtocolStats};
use crate::packet::ether::{EthAddr, EtherHeader, ETH_HLEN};
use crate::packet::protocol::EtherProto;
use crate::packet::{HeaderError, HeaderView};

/// Ethernet II layer.
///
/// The EtherType is the next identifier, so 802.1Q tags, MPLS label stacks
/// and IPv4 are reached through separate candidates.
#[derive(Debug, Default)]
pub struct EthernetProtocol {
    header: Option<EtherHeader>,
    stats: ProtocolStats,
}

impl EthernetProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn header(&self) -> Option<&EtherHeader> {
        self.header.as_ref()
    }

    #[inline]
    pub fn ethernet_type(&self) -> Option<EtherProto> {
        self.header.map(|h| h.proto())
    }

    #[inline]
    pub fn source(&self) -> Option<EthAddr> {
        self.header.map(|h| h.source())
    }

    #[inline]
    pub fn destination(&self) -> Option<EthAddr> {
        self.header.map(|h| h.dest())
    }
}

impl Protocol for EthernetProtocol {
    fn name(&self) -> &'static str {
        "ethernet"
    }

    fn set_header(&mut self, view: &HeaderView<'_>) -> Result<(), HeaderError> {
        self.header = Some(*view.header::<EtherHeader>()?);
        Ok(())
    }

    fn process_packet(&mut self, view: &HeaderView<'_>, _ctx: &mut LayerContext<'_>) -> bool {
        self.stats.accept(view.len());
        true
    }

    fn next_identifier(&self) -> Option<u16> {
        self.ethernet_type().map(|p| p.value())
    }

    fn header_length(&self) -> usize {
        ETH_HLEN
    }

    fn stats(&self) -> &ProtocolStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut ProtocolStats {
        &mut self.stats
    }
}
