use crate::layer::{LayerContext, Protocol, ProtocolStats};
use crate::packet::protocol::EtherProto;
use crate::packet::tunnel::vxlan::VxlanHeader;
use crate::packet::{HeaderError, HeaderView, PacketHeader};

/// VXLAN layer. Always carries an inner Ethernet frame.
#[derive(Debug, Default)]
pub struct VxlanProtocol {
    header: Option<VxlanHeader>,
    stats: ProtocolStats,
}

impl VxlanProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn vni(&self) -> Option<u32> {
        self.header.map(|h| h.vni())
    }
}

impl Protocol for VxlanProtocol {
    fn name(&self) -> &'static str {
        "vxlan"
    }

    fn set_header(&mut self, view: &HeaderView<'_>) -> Result<(), HeaderError> {
        self.header = Some(*view.header::<VxlanHeader>()?);
        Ok(())
    }

    fn process_packet(&mut self, view: &HeaderView<'_>, ctx: &mut LayerContext<'_>) -> bool {
        self.stats.accept(view.len());
        if let Some(vni) = self.vni() {
            ctx.state.tunnel_id = vni;
        }
        true
    }

    fn next_identifier(&self) -> Option<u16> {
        self.header.map(|_| EtherProto::TEB.value())
    }

    fn header_length(&self) -> usize {
        VxlanHeader::FIXED_LEN
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
    fn test_vxlan_sets_vni() {
        let bytes = vec![
            0x08, 0x00, 0x00, 0x00, // I flag
            0x00, 0x00, 0x64, 0x00, // VNI 100
        ];
        let mut vxlan = VxlanProtocol::new();
        let mut state = DecodeState::default();
        assert!(run(&mut vxlan, &Packet::new(&bytes).view(), &mut tables(1), &mut state));
        assert_eq!(vxlan.vni(), Some(100));
        assert_eq!(state.tunnel_id, 100);
        assert_eq!(vxlan.next_identifier(), Some(0x6558));
    }

    #[test]
    fn test_vxlan_rejects_missing_flag() {
        let bytes = vec![0x00; 8];
        let mut vxlan = VxlanProtocol::new();
        assert!(!vxlan.check(&Packet::new(&bytes).view()));
        assert_eq!(vxlan.stats().invalid_packets, 1);
    }
}
