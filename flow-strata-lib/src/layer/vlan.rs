use crate::layer::{LayerContext, Protocol, ProtocolStats};
use crate::packet::ether::{VlanTag, VLAN_TAG_LEN};
use crate::packet::protocol::EtherProto;
use crate::packet::{HeaderError, HeaderView};

/// 802.1Q / 802.1ad tag.
#[derive(Debug, Default)]
pub struct VlanProtocol {
    tag: Option<VlanTag>,
    stats: ProtocolStats,
}

impl VlanProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn vlan_id(&self) -> Option<u16> {
        self.tag.map(|t| t.vlan_id())
    }

    #[inline]
    pub fn priority(&self) -> Option<u8> {
        self.tag.map(|t| t.pcp())
    }

    /// EtherType following the tag.
    #[inline]
    pub fn ethernet_type(&self) -> Option<EtherProto> {
        self.tag.map(|t| t.proto())
    }
}

impl Protocol for VlanProtocol {
    fn name(&self) -> &'static str {
        "vlan"
    }

    fn set_header(&mut self, view: &HeaderView<'_>) -> Result<(), HeaderError> {
        self.tag = Some(*view.header::<VlanTag>()?);
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
        VLAN_TAG_LEN
    }

    fn stats(&self) -> &ProtocolStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut ProtocolStats {
        &mut self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::test_support::{run, tables};
    use crate::layer::DecodeState;
    use crate::packet::Packet;

    #[test]
    fn test_vlan_layer() {
        let bytes = vec![
            0x60, 0x64, // PCP 3, VID 100
            0x08, 0x00, // IPv4
            0x45, 0x00,
        ];
        let mut vlan = VlanProtocol::new();
        let view = Packet::new(&bytes).view();
        assert!(run(&mut vlan, &view, &mut tables(1), &mut DecodeState::default()));
        assert_eq!(vlan.vlan_id(), Some(100));
        assert_eq!(vlan.priority(), Some(3));
        assert_eq!(vlan.ethernet_type(), Some(EtherProto::IPV4));
        assert_eq!(vlan.upper_view(&view).unwrap().len(), 2);
    }
}
