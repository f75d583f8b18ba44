use std::net::SocketAddrV4;

use tracing::trace;

use crate::layer::{CounterMap, LayerContext, Protocol, ProtocolStats};
use crate::packet::protocol::IpProto;
use crate::packet::udp::UdpHeader;
use crate::packet::{HeaderError, HeaderView, PacketHeader};
use crate::tracker::direction::PacketDirection;
use crate::tracker::flow_key::FlowKey;

/// UDP layer.
///
/// The destination port is the next identifier, which is how VXLAN (port
/// 4789) is reached. Datagrams are attached to flows of the shared UDP
/// table the same way TCP segments are.
#[derive(Debug, Default)]
pub struct UdpProtocol {
    header: Option<UdpHeader>,
    flow_errors: u64,
    stats: ProtocolStats,
}

impl UdpProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn src_port(&self) -> Option<u16> {
        self.header.map(|h| h.src_port())
    }

    #[inline]
    pub fn dst_port(&self) -> Option<u16> {
        self.header.map(|h| h.dst_port())
    }

    /// Datagram length declared in the header.
    #[inline]
    pub fn length(&self) -> Option<u16> {
        self.header.map(|h| h.length())
    }

    #[inline]
    pub fn flow_errors(&self) -> u64 {
        self.flow_errors
    }
}

impl Protocol for UdpProtocol {
    fn name(&self) -> &'static str {
        "udp"
    }

    fn set_header(&mut self, view: &HeaderView<'_>) -> Result<(), HeaderError> {
        self.header = Some(*view.header::<UdpHeader>()?);
        Ok(())
    }

    fn process_packet(&mut self, view: &HeaderView<'_>, ctx: &mut LayerContext<'_>) -> bool {
        let Some(udp) = self.header else {
            self.stats.reject();
            return false;
        };
        self.stats.accept(view.len());

        let Some((src_ip, dst_ip)) = ctx.state.endpoints else {
            return true;
        };
        let src = SocketAddrV4::new(src_ip, udp.src_port());
        let dst = SocketAddrV4::new(dst_ip, udp.dst_port());
        let key = FlowKey::new(src, dst, IpProto::UDP, ctx.state.tunnel_id);
        let now = ctx.state.now;

        let flow = match ctx.flows.udp.lookup(key, now) {
            Ok(flow) => flow,
            Err(err) => {
                self.flow_errors += 1;
                trace!(%key, %err, "udp datagram without flow");
                return true;
            }
        };

        let guess = PacketDirection::infer_udp(udp.src_port(), udp.dst_port());
        let dir = flow.direction_of(src, dst, guess);
        flow.update(dir, view.len(), now);
        ctx.state.current_udp = Some(key);

        let payload = self.upper_view(view).map(|v| v.bytes()).unwrap_or_default();
        if !payload.is_empty() {
            if let Some(forwarder) = ctx.forwarder.as_deref_mut() {
                forwarder.forward_flow(flow, payload, dir, ctx.state.engines);
            }
        }
        true
    }

    fn next_identifier(&self) -> Option<u16> {
        self.dst_port()
    }

    fn header_length(&self) -> usize {
        UdpHeader::FIXED_LEN
    }

    /// Payload bounded by the declared datagram length when it fits.
    fn upper_view<'a>(&self, view: &HeaderView<'a>) -> Option<HeaderView<'a>> {
        let udp = self.header?;
        let payload = view.advance(UdpHeader::FIXED_LEN).ok()?;
        let len = udp.payload_len().min(payload.len());
        payload.truncate(len).ok()
    }

    fn stats(&self) -> &ProtocolStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut ProtocolStats {
        &mut self.stats
    }

    fn counters(&self) -> CounterMap {
        let mut counters = self.stats.counters();
        counters.push("flow_errors", self.flow_errors);
        counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::test_support::{run, tables};
    use crate::layer::DecodeState;
    use crate::packet::Packet;
    use std::net::Ipv4Addr;

    #[test]
    fn test_udp_flow_and_next_identifier() {
        let bytes = vec![
            0xc3, 0x50, 0x12, 0xb5, // 50000 -> 4789
            0x00, 0x0c, 0x00, 0x00, // length 12
            0x08, 0x00, 0x00, 0x00, // payload
            0x00, 0x00,             // trailing bytes beyond the datagram
        ];
        let view = Packet::new(&bytes).view();
        let mut udp = UdpProtocol::new();
        let mut flows = tables(2);
        let mut state = DecodeState {
            endpoints: Some((Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2))),
            ..Default::default()
        };
        assert!(run(&mut udp, &view, &mut flows, &mut state));

        assert_eq!(udp.next_identifier(), Some(4789));
        assert_eq!(udp.length(), Some(12));
        assert_eq!(udp.upper_view(&view).unwrap().len(), 4);
        assert_eq!(flows.udp.len(), 1);
        let flow = flows.udp.find(&state.current_udp.unwrap()).unwrap();
        assert_eq!(flow.total_bytes, 14);
    }
}
