use std::net::SocketAddrV4;

use tracing::trace;

use crate::layer::{CounterMap, LayerContext, Protocol, ProtocolStats};
use crate::packet::protocol::IpProto;
use crate::packet::tcp::TcpHeader;
use crate::packet::{HeaderError, HeaderView};
use crate::tracker::direction::PacketDirection;
use crate::tracker::flow::Flow;
use crate::tracker::flow_key::FlowKey;

/// TCP layer, terminal.
///
/// Every segment below an IPv4 layer is attached to a flow of the shared
/// TCP table; its payload is handed to the multiplexer's forwarder.
#[derive(Debug, Default)]
pub struct TcpProtocol {
    header: Option<TcpHeader>,
    flow_errors: u64,
    stats: ProtocolStats,
}

impl TcpProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn header(&self) -> Option<&TcpHeader> {
        self.header.as_ref()
    }

    #[inline]
    pub fn src_port(&self) -> Option<u16> {
        self.header.map(|h| h.src_port())
    }

    #[inline]
    pub fn dst_port(&self) -> Option<u16> {
        self.header.map(|h| h.dst_port())
    }

    #[inline]
    pub fn flags(&self) -> Option<u8> {
        self.header.map(|h| h.flags())
    }

    /// Lookups refused because the TCP table was exhausted.
    #[inline]
    pub fn flow_errors(&self) -> u64 {
        self.flow_errors
    }
}

impl Protocol for TcpProtocol {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn set_header(&mut self, view: &HeaderView<'_>) -> Result<(), HeaderError> {
        self.header = Some(*view.header::<TcpHeader>()?);
        Ok(())
    }

    fn process_packet(&mut self, view: &HeaderView<'_>, ctx: &mut LayerContext<'_>) -> bool {
        let Some(tcp) = self.header else {
            self.stats.reject();
            return false;
        };
        self.stats.accept(view.len());

        let Some((src_ip, dst_ip)) = ctx.state.endpoints else {
            return true;
        };
        let src = SocketAddrV4::new(src_ip, tcp.src_port());
        let dst = SocketAddrV4::new(dst_ip, tcp.dst_port());
        let key = FlowKey::new(src, dst, IpProto::TCP, ctx.state.tunnel_id);
        let now = ctx.state.now;

        let flow = match ctx.flows.tcp.lookup(key, now) {
            Ok(flow) => flow,
            Err(err) => {
                self.flow_errors += 1;
                trace!(%key, %err, "tcp segment without flow");
                return true;
            }
        };

        let guess = PacketDirection::infer_tcp(tcp.src_port(), tcp.dst_port(), tcp.is_syn(), tcp.is_ack());
        let dir = flow.direction_of(src, dst, guess);
        flow.update(dir, view.len(), now);
        self.process_flow(Some(&mut *flow));
        ctx.state.current_tcp = Some(key);

        let payload = view
            .advance(tcp.header_length())
            .map(|v| v.bytes())
            .unwrap_or_default();
        if !payload.is_empty() {
            if let Some(forwarder) = ctx.forwarder.as_deref_mut() {
                forwarder.forward_flow(flow, payload, dir, ctx.state.engines);
            }
        }
        true
    }

    fn next_identifier(&self) -> Option<u16> {
        None
    }

    fn header_length(&self) -> usize {
        self.header.map_or(0, |h| h.header_length())
    }

    fn process_flow(&mut self, flow: Option<&mut Flow>) {
        if let (Some(flow), Some(tcp)) = (flow, self.header.as_ref()) {
            flow.tcp.update(tcp);
        }
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
    use crate::timestamp::Timestamp;
    use crate::tracker::flow::TcpState;
    use std::net::Ipv4Addr;

    fn segment(src_port: u16, dst_port: u16, flags: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&src_port.to_be_bytes());
        bytes.extend_from_slice(&dst_port.to_be_bytes());
        bytes.extend_from_slice(&[
            0x00, 0x00, 0x00, 0x01, // seq
            0x00, 0x00, 0x00, 0x00, // ack
            0x50, flags, 0x20, 0x00, // data offset 5, flags, window
            0x00, 0x00, 0x00, 0x00, // checksum, urgent
        ]);
        bytes.extend_from_slice(payload);
        bytes
    }

    fn state(src: [u8; 4], dst: [u8; 4]) -> DecodeState {
        DecodeState {
            now: Timestamp::from_secs(1),
            endpoints: Some((Ipv4Addr::from(src), Ipv4Addr::from(dst))),
            ..Default::default()
        }
    }

    #[test]
    fn test_both_directions_share_a_flow() {
        let mut tcp = TcpProtocol::new();
        let mut flows = tables(4);

        let syn = segment(51000, 80, TcpHeader::FLAG_SYN, &[]);
        let mut up = state([10, 0, 0, 2], [10, 0, 0, 1]);
        assert!(run(&mut tcp, &Packet::new(&syn).view(), &mut flows, &mut up));

        let syn_ack = segment(80, 51000, TcpHeader::FLAG_SYN | TcpHeader::FLAG_ACK, &[]);
        let mut down = state([10, 0, 0, 1], [10, 0, 0, 2]);
        assert!(run(&mut tcp, &Packet::new(&syn_ack).view(), &mut flows, &mut down));

        assert_eq!(flows.tcp.len(), 1);
        let key = down.current_tcp.unwrap();
        let flow = flows.tcp.find(&key).unwrap();
        assert_eq!(flow.upstream_packets, 1);
        assert_eq!(flow.downstream_packets, 1);
        assert_eq!(flow.tcp.state, TcpState::SynReceived);
        assert_eq!(flow.initiator, Some("10.0.0.2:51000".parse().unwrap()));
        assert_eq!(tcp.stats().total_bytes, 40);
    }

    #[test]
    fn test_exhaustion_counted() {
        let mut tcp = TcpProtocol::new();
        let mut flows = tables(1);

        let a = segment(1000, 80, TcpHeader::FLAG_SYN, &[]);
        let b = segment(1001, 80, TcpHeader::FLAG_SYN, &[]);
        let mut st = state([10, 0, 0, 2], [10, 0, 0, 1]);
        assert!(run(&mut tcp, &Packet::new(&a).view(), &mut flows, &mut st));
        assert!(run(&mut tcp, &Packet::new(&b).view(), &mut flows, &mut st));

        assert_eq!(tcp.flow_errors(), 1);
        assert_eq!(tcp.counters().get("flow_errors"), Some(1));
        assert_eq!(tcp.stats().valid_packets, 2);
        assert_eq!(flows.tcp.len(), 1);
    }

    #[test]
    fn test_no_flow_without_ip() {
        let mut tcp = TcpProtocol::new();
        let mut flows = tables(1);
        let bytes = segment(1, 2, TcpHeader::FLAG_ACK, b"data");
        assert!(run(&mut tcp, &Packet::new(&bytes).view(), &mut flows, &mut DecodeState::default()));
        assert!(flows.tcp.is_empty());
        assert_eq!(tcp.flags(), Some(TcpHeader::FLAG_ACK));
    }
}
