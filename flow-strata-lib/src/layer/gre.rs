use crate::layer::{LayerContext, Protocol, ProtocolStats};
use crate::packet::protocol::EtherProto;
use crate::packet::tunnel::gre::GreHeader;
use crate::packet::{HeaderError, HeaderView};

/// GRE layer. The key, when present, becomes the tunnel id of the flows
/// decoded underneath.
#[derive(Debug, Default)]
pub struct GreProtocol {
    header: Option<GreHeader>,
    key: Option<u32>,
    stats: ProtocolStats,
}

impl GreProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn protocol_type(&self) -> Option<EtherProto> {
        self.header.map(|h| h.protocol_type())
    }

    #[inline]
    pub fn key(&self) -> Option<u32> {
        self.key
    }
}

impl Protocol for GreProtocol {
    fn name(&self) -> &'static str {
        "gre"
    }

    fn set_header(&mut self, view: &HeaderView<'_>) -> Result<(), HeaderError> {
        let gre = view.header::<GreHeader>()?;
        self.key = gre.key(view.bytes());
        self.header = Some(*gre);
        Ok(())
    }

    fn process_packet(&mut self, view: &HeaderView<'_>, ctx: &mut LayerContext<'_>) -> bool {
        self.stats.accept(view.len());
        if let Some(key) = self.key {
            ctx.state.tunnel_id = key;
        }
        true
    }

    fn next_identifier(&self) -> Option<u16> {
        self.protocol_type().map(|p| p.value())
    }

    fn header_length(&self) -> usize {
        self.header.map_or(0, |h| h.header_length())
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
    fn test_gre_key_sets_tunnel_id() {
        let bytes = vec![
            0x20, 0x00, 0x65, 0x58, // K, TEB
            0x00, 0x00, 0x01, 0x00, // key 256
            0xff, 0xff,
        ];
        let view = Packet::new(&bytes).view();
        let mut gre = GreProtocol::new();
        let mut state = DecodeState::default();
        assert!(run(&mut gre, &view, &mut tables(1), &mut state));

        assert_eq!(gre.key(), Some(256));
        assert_eq!(state.tunnel_id, 256);
        assert_eq!(gre.next_identifier(), Some(0x6558));
        assert_eq!(gre.upper_view(&view).unwrap().len(), 2);
    }

    #[test]
    fn test_gre_without_key_keeps_tunnel_id() {
        let bytes = vec![0x00, 0x00, 0x08, 0x00];
        let mut gre = GreProtocol::new();
        let mut state = DecodeState {
            tunnel_id: 9,
            ..Default::default()
        };
        assert!(run(&mut gre, &Packet::new(&bytes).view(), &mut tables(1), &mut state));
        assert_eq!(gre.protocol_type(), Some(EtherProto::IPV4));
        assert_eq!(state.tunnel_id, 9);
    }
}
