//! The network stack
//!
//! [`NetworkStack`] wires every layer into a fixed dispatch graph and owns
//! the TCP and UDP flow tables. Decapsulated traffic (VXLAN, GRE, IP-in-IP)
//! re-enters a second set of "virtual" layers so inner and outer headers
//! keep separate counters, while both sets share the same flow tables.
//!
//! ```text
//! eth ─┬─ vlan ─┐
//!      ├─ mpls ─┤
//!      └────────┴─ ip ─┬─ tcp
//!                      ├─ udp ── vxlan ── eth_vir
//!                      ├─ icmp
//!                      ├─ gre ─┬─ eth_vir ─┬─ vlan_vir ── ip_vir
//!                      │       └─ ip_vir   └─ ip_vir
//!                      └─ ip_vir ─┬─ tcp_vir
//!                                 ├─ udp_vir
//!                                 ├─ icmp
//!                                 └─ ip_vir
//! ```
//!
//! Stacks share nothing: several can run side by side, one per thread.
//!
//! ```
//! use flow_strata::config::StackConfig;
//! use flow_strata::layer::Protocol;
//! use flow_strata::packet::Packet;
//! use flow_strata::stack::NetworkStack;
//!
//! let syn: Vec<u8> = vec![
//!     0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0x08, 0x00,
//!     0x45, 0x00, 0x00, 0x28, 0x00, 0x01, 0x40, 0x00, 0x40, 0x06, 0x00, 0x00,
//!     0x0a, 0x00, 0x00, 0x02, 0x0a, 0x00, 0x00, 0x01,
//!     0xc7, 0x38, 0x00, 0x50, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
//!     0x50, 0x02, 0x72, 0x10, 0x00, 0x00, 0x00, 0x00,
//! ];
//!
//! let mut stack = NetworkStack::new(StackConfig::default()).unwrap();
//! stack.inject(&Packet::new(&syn));
//!
//! assert_eq!(stack.ip().unwrap().stats().total_bytes, 40);
//! assert_eq!(stack.tcp_flow_manager().len(), 1);
//! ```

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::StackConfig;
use crate::forwarder::{Engines, FlowConsumer, FlowForwarder, FrequencyEngine};
use crate::layer::{
    AnyProtocol, CounterMap, DecodeState, EthernetProtocol, GreProtocol, IcmpProtocol,
    IpProtocol, MplsProtocol, Protocol, TcpProtocol, UdpProtocol, VlanProtocol, VxlanProtocol,
};
use crate::mux::{Multiplexer, MultiplexerGraph, MuxId};
use crate::packet::ether::{EtherHeader, VLAN_TAG_LEN};
use crate::packet::icmp::IcmpHeader;
use crate::packet::ipv4::Ipv4Header;
use crate::packet::protocol::{EtherProto, IpProto};
use crate::packet::tcp::TcpHeader;
use crate::packet::tunnel::gre::GreHeader;
use crate::packet::tunnel::mpls::MplsLabel;
use crate::packet::tunnel::vxlan::{VxlanHeader, VXLAN_PORT};
use crate::packet::udp::UdpHeader;
use crate::packet::{Packet, PacketHeader};
use crate::timestamp::Interval;
use crate::tracker::cache::FlowCache;
use crate::tracker::flow::Flow;
use crate::tracker::{FlowManager, FlowManagerStats, FlowTables};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    #[error("unknown multiplexer {0}")]
    UnknownMultiplexer(MuxId),

    #[error("multiplexer {0} ({1}) cannot be its own candidate")]
    SelfLoop(MuxId, &'static str),

    #[error("invalid configuration: {0}")]
    Config(&'static str),
}

const VLAN_IDS: [EtherProto; 3] = [
    EtherProto::VLAN_8021Q,
    EtherProto::VLAN_8021AD,
    EtherProto::QINQ1,
];

const MPLS_IDS: [EtherProto; 2] = [EtherProto::MPLS_UC, EtherProto::MPLS_MC];

/// Multiplexer ids of a stack.
#[derive(Debug, Clone, Copy)]
pub struct Topology {
    pub eth: MuxId,
    pub vlan: MuxId,
    pub mpls: MuxId,
    pub ip: MuxId,
    pub tcp: MuxId,
    pub udp: MuxId,
    pub icmp: MuxId,
    pub gre: MuxId,
    pub vxlan: MuxId,
    pub eth_vir: MuxId,
    pub vlan_vir: MuxId,
    pub ip_vir: MuxId,
    pub tcp_vir: MuxId,
    pub udp_vir: MuxId,
}

impl Topology {
    fn build(graph: &mut MultiplexerGraph) -> Result<Topology, StackError> {
        let t = Topology {
            eth: layer(graph, EthernetProtocol::new(), EtherHeader::FIXED_LEN),
            vlan: layer(graph, VlanProtocol::new(), VLAN_TAG_LEN),
            mpls: layer(graph, MplsProtocol::new(), MplsLabel::FIXED_LEN),
            ip: layer(graph, IpProtocol::new(), Ipv4Header::FIXED_LEN),
            tcp: stateful(graph, TcpProtocol::new(), TcpHeader::FIXED_LEN),
            udp: stateful(graph, UdpProtocol::new(), UdpHeader::FIXED_LEN),
            icmp: layer(graph, IcmpProtocol::new(), IcmpHeader::FIXED_LEN),
            gre: layer(graph, GreProtocol::new(), GreHeader::FIXED_LEN),
            vxlan: layer(graph, VxlanProtocol::new(), VxlanHeader::FIXED_LEN),
            eth_vir: layer(graph, EthernetProtocol::new(), EtherHeader::FIXED_LEN),
            vlan_vir: layer(graph, VlanProtocol::new(), VLAN_TAG_LEN),
            ip_vir: layer(graph, IpProtocol::new(), Ipv4Header::FIXED_LEN),
            tcp_vir: stateful(graph, TcpProtocol::new(), TcpHeader::FIXED_LEN),
            udp_vir: stateful(graph, UdpProtocol::new(), UdpHeader::FIXED_LEN),
        };

        let ipv4 = EtherProto::IPV4.value();
        let ip_proto = |p: IpProto| p.value() as u16;

        // outer stack
        for id in VLAN_IDS {
            link(graph, t.eth, t.vlan, id.value())?;
        }
        for id in MPLS_IDS {
            link(graph, t.eth, t.mpls, id.value())?;
        }
        link(graph, t.eth, t.ip, ipv4)?;
        link(graph, t.vlan, t.ip, ipv4)?;
        link(graph, t.mpls, t.ip, ipv4)?;
        link(graph, t.ip, t.tcp, ip_proto(IpProto::TCP))?;
        link(graph, t.ip, t.udp, ip_proto(IpProto::UDP))?;
        link(graph, t.ip, t.icmp, ip_proto(IpProto::ICMP))?;
        link(graph, t.ip, t.gre, ip_proto(IpProto::GRE))?;
        link(graph, t.ip, t.ip_vir, ip_proto(IpProto::IP_ENCAP))?;

        // tunnels
        link(graph, t.udp, t.vxlan, VXLAN_PORT)?;
        link(graph, t.vxlan, t.eth_vir, EtherProto::TEB.value())?;
        link(graph, t.gre, t.eth_vir, EtherProto::TEB.value())?;
        link(graph, t.gre, t.ip_vir, ipv4)?;

        // virtual stack
        for id in VLAN_IDS {
            link(graph, t.eth_vir, t.vlan_vir, id.value())?;
        }
        link(graph, t.eth_vir, t.ip_vir, ipv4)?;
        link(graph, t.vlan_vir, t.ip_vir, ipv4)?;
        link(graph, t.ip_vir, t.tcp_vir, ip_proto(IpProto::TCP))?;
        link(graph, t.ip_vir, t.udp_vir, ip_proto(IpProto::UDP))?;
        link(graph, t.ip_vir, t.icmp, ip_proto(IpProto::ICMP))?;
        link(graph, t.ip_vir, t.ip_vir, ip_proto(IpProto::IP_ENCAP))?;

        Ok(t)
    }

    /// Every node with its display name, outer stack first.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, MuxId)> {
        [
            ("ethernet", self.eth),
            ("vlan", self.vlan),
            ("mpls", self.mpls),
            ("ip", self.ip),
            ("tcp", self.tcp),
            ("udp", self.udp),
            ("icmp", self.icmp),
            ("gre", self.gre),
            ("vxlan", self.vxlan),
            ("ethernet_vir", self.eth_vir),
            ("vlan_vir", self.vlan_vir),
            ("ip_vir", self.ip_vir),
            ("tcp_vir", self.tcp_vir),
            ("udp_vir", self.udp_vir),
        ]
        .into_iter()
    }
}

fn layer(graph: &mut MultiplexerGraph, protocol: impl Into<AnyProtocol>, header_size: usize) -> MuxId {
    let mut mux = Multiplexer::with_protocol(protocol);
    mux.set_header_size(header_size);
    graph.add_multiplexer(mux)
}

/// A transport layer with a forwarder for its flows.
fn stateful(graph: &mut MultiplexerGraph, protocol: impl Into<AnyProtocol>, header_size: usize) -> MuxId {
    let mut forwarder = FlowForwarder::new();
    forwarder.add_consumer(FrequencyEngine::new());

    let mut mux = Multiplexer::with_protocol(protocol);
    mux.set_header_size(header_size);
    mux.set_forwarder(forwarder);
    graph.add_multiplexer(mux)
}

fn link(graph: &mut MultiplexerGraph, parent: MuxId, child: MuxId, id: u16) -> Result<(), StackError> {
    graph.add_up_multiplexer(parent, child, id)?;
    graph.add_down_multiplexer(child, parent)?;
    if let Some(mux) = graph.get_mut(child) {
        mux.set_protocol_identifier(id);
    }
    Ok(())
}

macro_rules! layer_accessors {
    ($($name:ident($node:ident) -> $as:ident: $ty:ty;)+) => {
        paste::paste! {
            $(
                #[inline]
                pub fn $name(&self) -> Option<&$ty> {
                    self.graph[self.topology.$node].protocol().$as()
                }

                #[inline]
                pub fn [< mux_ $node >](&self) -> &Multiplexer {
                    &self.graph[self.topology.$node]
                }
            )+
        }
    };
}

pub struct NetworkStack {
    graph: MultiplexerGraph,
    topology: Topology,
    flows: FlowTables,
    state: DecodeState,
    packets: u64,
    bytes: u64,
}

impl NetworkStack {
    pub fn new(config: StackConfig) -> Result<Self, StackError> {
        config.validate()?;

        let timeout = Interval::from(config.flows_timeout);
        let mut tcp_cache = FlowCache::new("tcp", config.total_tcp_flows);
        let mut udp_cache = FlowCache::new("udp", config.total_udp_flows);
        tcp_cache.preallocate(config.preallocated_flows);
        udp_cache.preallocate(config.preallocated_flows);
        let flows = FlowTables::new(
            FlowManager::new(tcp_cache, timeout),
            FlowManager::new(udp_cache, timeout),
        );

        let mut graph = MultiplexerGraph::new(config.max_dispatch_depth);
        let topology = Topology::build(&mut graph)?;

        let state = DecodeState {
            engines: Engines {
                nids: config.enable_nids_engine,
                frequency: config.enable_frequency_engine,
            },
            ..DecodeState::default()
        };

        info!(
            multiplexers = graph.len(),
            tcp_flows = config.total_tcp_flows,
            udp_flows = config.total_udp_flows,
            timeout = ?config.flows_timeout,
            nids = config.enable_nids_engine,
            frequency = config.enable_frequency_engine,
            "network stack ready"
        );

        Ok(NetworkStack {
            graph,
            topology,
            flows,
            state,
            packets: 0,
            bytes: 0,
        })
    }

    /// Runs one packet through the stack. Malformed packets only move
    /// counters.
    pub fn inject(&mut self, packet: &Packet<'_>) {
        self.packets += 1;
        self.bytes += packet.len() as u64;
        self.state.begin_packet(packet.timestamp());
        self.graph.forward_packet(
            self.topology.eth,
            packet.view(),
            &mut self.flows,
            &mut self.state,
        );
    }

    layer_accessors! {
        ethernet(eth) -> as_ethernet: EthernetProtocol;
        vlan(vlan) -> as_vlan: VlanProtocol;
        mpls(mpls) -> as_mpls: MplsProtocol;
        ip(ip) -> as_ip: IpProtocol;
        tcp(tcp) -> as_tcp: TcpProtocol;
        udp(udp) -> as_udp: UdpProtocol;
        icmp(icmp) -> as_icmp: IcmpProtocol;
        gre(gre) -> as_gre: GreProtocol;
        vxlan(vxlan) -> as_vxlan: VxlanProtocol;
        ethernet_vir(eth_vir) -> as_ethernet: EthernetProtocol;
        vlan_vir(vlan_vir) -> as_vlan: VlanProtocol;
        ip_vir(ip_vir) -> as_ip: IpProtocol;
        tcp_vir(tcp_vir) -> as_tcp: TcpProtocol;
        udp_vir(udp_vir) -> as_udp: UdpProtocol;
    }

    #[inline]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    #[inline]
    pub fn graph(&self) -> &MultiplexerGraph {
        &self.graph
    }

    pub fn enable_nids_engine(&mut self, enable: bool) {
        self.state.engines.nids = enable;
    }

    pub fn enable_frequency_engine(&mut self, enable: bool) {
        self.state.engines.frequency = enable;
    }

    #[inline]
    pub fn engines(&self) -> Engines {
        self.state.engines
    }

    pub fn set_flows_timeout(&mut self, timeout: Duration) {
        let timeout = Interval::from(timeout);
        self.flows.tcp.set_timeout(timeout);
        self.flows.udp.set_timeout(timeout);
    }

    pub fn set_total_tcp_flows(&mut self, total: usize) {
        self.flows.tcp.set_total_flows(total);
    }

    pub fn set_total_udp_flows(&mut self, total: usize) {
        self.flows.udp.set_total_flows(total);
    }

    #[inline]
    pub fn tcp_flow_manager(&self) -> &FlowManager {
        &self.flows.tcp
    }

    #[inline]
    pub fn udp_flow_manager(&self) -> &FlowManager {
        &self.flows.udp
    }

    /// Adds a consumer built by `make` to the outer and the tunnelled TCP
    /// forwarders.
    pub fn add_tcp_consumer<C, F>(&mut self, make: F)
    where
        C: FlowConsumer + 'static,
        F: Fn() -> C,
    {
        self.add_consumer([self.topology.tcp, self.topology.tcp_vir], make);
    }

    /// UDP counterpart of [`add_tcp_consumer`](Self::add_tcp_consumer).
    pub fn add_udp_consumer<C, F>(&mut self, make: F)
    where
        C: FlowConsumer + 'static,
        F: Fn() -> C,
    {
        self.add_consumer([self.topology.udp, self.topology.udp_vir], make);
    }

    fn add_consumer<C, F>(&mut self, nodes: [MuxId; 2], make: F)
    where
        C: FlowConsumer + 'static,
        F: Fn() -> C,
    {
        for id in nodes {
            if let Some(forwarder) = self.graph[id].forwarder_mut() {
                forwarder.add_consumer(make());
            }
        }
    }

    /// The last TCP and UDP flows touched, if still active.
    pub fn current_flows(&self) -> (Option<&Flow>, Option<&Flow>) {
        let tcp = self.state.current_tcp.and_then(|key| self.flows.tcp.find(&key));
        let udp = self.state.current_udp.and_then(|key| self.flows.udp.find(&key));
        (tcp, udp)
    }

    /// Writes up to `limit` flows of each table, most recent first.
    pub fn show_flows(&self, f: &mut impl fmt::Write, limit: usize) -> fmt::Result {
        self.flows.tcp.show_flows(f, limit)?;
        self.flows.udp.show_flows(f, limit)
    }

    /// Releases every active flow, for shutdown.
    pub fn drain_flows(&mut self) -> usize {
        self.flows.tcp.drain() + self.flows.udp.drain()
    }

    #[inline]
    pub fn packets(&self) -> u64 {
        self.packets
    }

    #[inline]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn statistics(&self) -> Statistics<'_> {
        Statistics(self)
    }

    /// Serializable snapshot of every counter.
    pub fn counters(&self) -> StackCounters {
        let layers = self
            .topology
            .iter()
            .map(|(name, id)| {
                let mux = &self.graph[id];
                LayerCounters {
                    name,
                    total: mux.total(),
                    forward: mux.forward(),
                    fail: mux.fail(),
                    counters: mux.protocol().counters(),
                }
            })
            .collect();

        StackCounters {
            packets: self.packets,
            bytes: self.bytes,
            layers,
            tcp_flows: FlowTableCounters::from(&self.flows.tcp),
            udp_flows: FlowTableCounters::from(&self.flows.udp),
        }
    }
}

impl fmt::Debug for NetworkStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkStack")
            .field("multiplexers", &self.graph.len())
            .field("flows", &self.flows)
            .field("engines", &self.state.engines)
            .field("packets", &self.packets)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StackCounters {
    pub packets: u64,
    pub bytes: u64,
    pub layers: Vec<LayerCounters>,
    pub tcp_flows: FlowTableCounters,
    pub udp_flows: FlowTableCounters,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerCounters {
    pub name: &'static str,
    pub total: u64,
    pub forward: u64,
    pub fail: u64,
    pub counters: CounterMap,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FlowTableCounters {
    pub active: usize,
    pub free: usize,
    pub allocated: usize,
    pub limit: usize,
    #[serde(flatten)]
    pub stats: FlowManagerStats,
}

impl From<&FlowManager> for FlowTableCounters {
    fn from(manager: &FlowManager) -> Self {
        FlowTableCounters {
            active: manager.len(),
            free: manager.cache().free_flows(),
            allocated: manager.cache().allocated(),
            limit: manager.cache().ceiling(),
            stats: manager.stats(),
        }
    }
}

/// Human readable statistics of a stack.
pub struct Statistics<'a>(&'a NetworkStack);

impl fmt::Display for Statistics<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stack = self.0;
        writeln!(f, "=== Network Stack Statistics ===")?;
        writeln!(f)?;
        writeln!(f, "Packets injected: {}", stack.packets)?;
        writeln!(f, "Bytes injected: {}", stack.bytes)?;
        writeln!(f)?;

        writeln!(f, "--- Multiplexers ---")?;
        for (name, id) in stack.topology.iter() {
            let mux = &stack.graph[id];
            writeln!(
                f,
                "{name:<14}total {:<10} forward {:<10} fail {}",
                mux.total(),
                mux.forward(),
                mux.fail()
            )?;
        }
        writeln!(f)?;

        writeln!(f, "--- Layers ---")?;
        for (name, id) in stack.topology.iter() {
            let mux = &stack.graph[id];
            if mux.total() == 0 && mux.fail() == 0 {
                continue;
            }
            writeln!(f, "{name}:")?;
            write!(f, "{}", mux.protocol().counters())?;
            if let Some(forwarder) = mux.forwarder() {
                writeln!(
                    f,
                    "\t{:<20}{} forwarded, {} unclaimed",
                    "payloads",
                    forwarder.forward_count(),
                    forwarder.fail_count()
                )?;
            }
        }
        writeln!(f)?;

        writeln!(f, "--- Flows ---")?;
        for manager in [&stack.flows.tcp, &stack.flows.udp] {
            let stats = manager.stats();
            writeln!(
                f,
                "{}: {} active, {} free, {} allocated, {} created, {} expired, {} exhausted",
                manager.cache().name(),
                manager.len(),
                manager.cache().free_flows(),
                manager.cache().allocated(),
                stats.created,
                stats.expired,
                stats.exhausted
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::flow::TcpState;
    use crate::tracker::flow_key::FlowKey;
    use crate::timestamp::Timestamp;
    use std::net::SocketAddrV4;

    const SYN: u8 = TcpHeader::FLAG_SYN;

    fn ethernet(proto: u16, payload: &[u8]) -> Vec<u8> {
        let mut p = vec![
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // dst
            0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, // src
        ];
        p.extend_from_slice(&proto.to_be_bytes());
        p.extend_from_slice(payload);
        p
    }

    fn ipv4_frag(proto: u8, src: [u8; 4], dst: [u8; 4], id: u16, frag: u16, payload: &[u8]) -> Vec<u8> {
        let total = (20 + payload.len()) as u16;
        let mut p = vec![0x45, 0x00]; // version 4, ihl 5
        p.extend_from_slice(&total.to_be_bytes());
        p.extend_from_slice(&id.to_be_bytes());
        p.extend_from_slice(&frag.to_be_bytes()); // flags + offset
        p.extend_from_slice(&[0x40, proto, 0x00, 0x00]); // ttl, protocol, checksum
        p.extend_from_slice(&src);
        p.extend_from_slice(&dst);
        p.extend_from_slice(payload);
        p
    }

    fn ipv4(proto: u8, src: [u8; 4], dst: [u8; 4], payload: &[u8]) -> Vec<u8> {
        ipv4_frag(proto, src, dst, 1, 0x4000, payload)
    }

    fn tcp(sport: u16, dport: u16, flags: u8, payload: &[u8]) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&sport.to_be_bytes());
        p.extend_from_slice(&dport.to_be_bytes());
        p.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]); // seq
        p.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // ack
        p.extend_from_slice(&[0x50, flags, 0x72, 0x10]); // doff 5, flags, window
        p.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // checksum, urgent
        p.extend_from_slice(payload);
        p
    }

    fn udp(sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&sport.to_be_bytes());
        p.extend_from_slice(&dport.to_be_bytes());
        p.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
        p.extend_from_slice(&[0x00, 0x00]); // checksum
        p.extend_from_slice(payload);
        p
    }

    fn vxlan(vni: u32, payload: &[u8]) -> Vec<u8> {
        let mut p = vec![0x08, 0x00, 0x00, 0x00]; // I flag
        p.extend_from_slice(&(vni << 8).to_be_bytes());
        p.extend_from_slice(payload);
        p
    }

    fn gre_keyed(proto: u16, key: u32, payload: &[u8]) -> Vec<u8> {
        let mut p = vec![0x20, 0x00]; // K flag, version 0
        p.extend_from_slice(&proto.to_be_bytes());
        p.extend_from_slice(&key.to_be_bytes());
        p.extend_from_slice(payload);
        p
    }

    fn tcp_syn() -> Vec<u8> {
        ethernet(
            0x0800,
            &ipv4(6, [10, 0, 0, 2], [10, 0, 0, 1], &tcp(51000, 80, SYN, &[])),
        )
    }

    fn vxlan_syn(vni: u32) -> Vec<u8> {
        let inner = ethernet(
            0x0800,
            &ipv4(6, [172, 16, 0, 2], [172, 16, 0, 1], &tcp(40000, 443, SYN, &[])),
        );
        ethernet(
            0x0800,
            &ipv4(17, [10, 0, 0, 1], [10, 0, 0, 2], &udp(50000, 4789, &vxlan(vni, &inner))),
        )
    }

    fn gre_dns(key: u32) -> Vec<u8> {
        let inner = ipv4(17, [192, 168, 1, 1], [192, 168, 1, 2], &udp(33000, 53, b"query"));
        ethernet(
            0x0800,
            &ipv4(47, [10, 0, 0, 1], [10, 0, 0, 2], &gre_keyed(0x0800, key, &inner)),
        )
    }

    fn stack() -> NetworkStack {
        NetworkStack::new(StackConfig::default()).unwrap()
    }

    fn tcp_key(src: &str, dst: &str, tunnel_id: u32) -> FlowKey {
        let src: SocketAddrV4 = src.parse().unwrap();
        let dst: SocketAddrV4 = dst.parse().unwrap();
        FlowKey::new(src, dst, IpProto::TCP, tunnel_id)
    }

    #[test]
    fn test_tcp_syn() {
        let bytes = tcp_syn();
        let len = bytes.len();
        let mut s = stack();
        s.inject(&Packet::new(&bytes));

        assert_eq!(s.ethernet().unwrap().stats().total_packets, 1);
        let ip = s.ip().unwrap();
        assert_eq!(ip.stats().total_packets, 1);
        assert_eq!(ip.stats().total_bytes, (len - 14) as u64);
        assert!(!ip.is_fragment());
        assert_eq!(s.mux_eth().forward(), 1);
        assert_eq!(s.mux_ip().forward(), 1);
        assert_eq!(s.mux_tcp().total(), 1);

        let key = tcp_key("10.0.0.2:51000", "10.0.0.1:80", 0);
        let flow = s.tcp_flow_manager().find(&key).unwrap();
        assert_eq!(flow.tcp.state, TcpState::SynSent);
        assert_eq!(flow.initiator, Some("10.0.0.2:51000".parse().unwrap()));
        assert_eq!(s.current_flows().0.and_then(|f| f.key), Some(key));
    }

    #[test]
    fn test_short_ip_is_invalid() {
        let bytes = ethernet(0x0800, &[0x45, 0x00, 0x00, 0x1c]);
        assert_eq!(bytes.len(), 18);
        let mut s = stack();
        s.inject(&Packet::new(&bytes));

        let ip = s.ip().unwrap();
        assert_eq!(ip.stats().total_packets, 0);
        assert_eq!(ip.stats().invalid_packets, 1);
        assert_eq!(ip.stats().total_bytes, 0);
        assert_eq!(s.mux_ip().fail(), 1);
        assert_eq!(s.mux_eth().fail(), 1);
    }

    #[test]
    fn test_fixed_header_sizes() {
        let s = stack();
        assert_eq!(s.mux_eth().header_size(), 14);
        assert_eq!(s.mux_vlan().header_size(), 4);
        assert_eq!(s.mux_ip().header_size(), 20);
        assert_eq!(s.mux_tcp().header_size(), 20);
        assert_eq!(s.mux_udp().header_size(), 8);
        assert_eq!(s.mux_vxlan().header_size(), 8);
    }

    #[test]
    fn test_vlan_tagged() {
        let mut tagged = vec![0x00, 0x64, 0x08, 0x00]; // VID 100, IPv4
        tagged.extend(ipv4(6, [10, 0, 0, 2], [10, 0, 0, 1], &tcp(51000, 80, SYN, &[])));
        let bytes = ethernet(0x8100, &tagged);
        let mut s = stack();
        s.inject(&Packet::new(&bytes));

        assert_eq!(s.ethernet().unwrap().ethernet_type(), Some(EtherProto::VLAN_8021Q));
        assert_eq!(s.vlan().unwrap().ethernet_type(), Some(EtherProto::IPV4));
        assert_eq!(s.vlan().unwrap().vlan_id(), Some(100));
        assert_eq!(s.mux_eth().forward(), 1);
        assert_eq!(s.mux_vlan().forward(), 1);
        assert_eq!(s.mux_ip().protocol_identifier(), EtherProto::IPV4.value());
        assert_eq!(s.mux_tcp().total(), 1);
    }

    #[test]
    fn test_first_and_last_fragment() {
        let first = ethernet(
            0x0800,
            &ipv4_frag(17, [10, 0, 0, 1], [10, 0, 0, 2], 29812, 0x2000, &udp(5000, 6000, &[0; 1472])),
        );
        let last = ethernet(
            0x0800,
            &ipv4_frag(17, [10, 0, 0, 1], [10, 0, 0, 2], 29812, 185, &[0; 548]),
        );
        let mut s = stack();

        s.inject(&Packet::new(&first));
        let ip = s.ip().unwrap();
        assert_eq!(ip.id(), Some(29812));
        assert!(ip.is_fragment());
        assert_eq!(ip.packet_length(), Some(1500));
        assert_eq!(ip.stats().events, 1);
        assert_eq!(ip.stats().valid_packets, 1);
        assert_eq!(s.mux_udp().total(), 1);

        s.inject(&Packet::new(&last));
        let ip = s.ip().unwrap();
        assert_eq!(ip.id(), Some(29812));
        assert!(ip.is_fragment());
        assert_eq!(ip.packet_length(), Some(568));
        assert_eq!(ip.fragments(), 2);
        // non-first fragments stop at ip
        assert_eq!(s.mux_udp().total(), 1);
        assert_eq!(s.mux_ip().forward(), 1);
        assert_eq!(s.mux_ip().fail(), 0);
    }

    #[test]
    fn test_truncation_never_panics() {
        let mut s = stack();
        let syn = tcp_syn();
        for cut in 0..34 {
            s.inject(&Packet::new(&syn[..cut]));
        }
        assert_eq!(s.mux_eth().fail(), 34);
        assert_eq!(s.mux_ip().fail(), 20);
        assert_eq!(s.ip().unwrap().stats().valid_packets, 0);

        let mut injected = 34;
        for bytes in [syn, vxlan_syn(42), gre_dns(7)] {
            for cut in 0..=bytes.len() {
                s.inject(&Packet::new(&bytes[..cut]));
                injected += 1;
            }
        }
        // 14 cuts of each packet are shorter than an ethernet header
        let rejected = 14 * 4;
        assert_eq!(s.packets(), injected);
        assert_eq!(s.ethernet().unwrap().stats().invalid_packets, rejected);
        assert_eq!(s.mux_eth().total(), injected - rejected);
        assert_eq!(s.ethernet().unwrap().stats().total_packets, s.mux_eth().total());
    }

    #[test]
    fn test_vxlan_tunnel_flows() {
        let bytes = vxlan_syn(42);
        let mut s = stack();
        s.inject(&Packet::new(&bytes));

        assert_eq!(s.vxlan().unwrap().vni(), Some(42));
        assert_eq!(s.mux_vxlan().forward(), 1);
        assert_eq!(s.mux_eth_vir().forward(), 1);
        assert_eq!(s.ip_vir().unwrap().stats().total_packets, 1);
        assert_eq!(s.mux_tcp_vir().total(), 1);
        assert_eq!(s.mux_tcp().total(), 0);

        let inner = tcp_key("172.16.0.2:40000", "172.16.0.1:443", 42);
        assert!(s.tcp_flow_manager().find(&inner).is_some());
        assert!(s.tcp_flow_manager().find(&tcp_key("172.16.0.2:40000", "172.16.0.1:443", 0)).is_none());
        assert_eq!(s.udp_flow_manager().len(), 1);
        assert_eq!(s.udp_flow_manager().iter().next().and_then(|f| f.key).map(|k| k.tunnel_id), Some(0));
    }

    #[test]
    fn test_gre_tunnel_flows() {
        let bytes = gre_dns(7);
        let mut s = stack();
        s.inject(&Packet::new(&bytes));

        assert_eq!(s.gre().unwrap().key(), Some(7));
        assert_eq!(s.mux_gre().forward(), 1);
        assert_eq!(s.mux_ip_vir().forward(), 1);
        assert_eq!(s.mux_udp_vir().total(), 1);

        let flow = s.current_flows().1.unwrap();
        let key = flow.key.unwrap();
        assert_eq!(key.tunnel_id, 7);
        assert_eq!(key.protocol, IpProto::UDP);
        assert_eq!(flow.total_packets(), 1);
    }

    #[test]
    fn test_flow_pool_conservation() {
        let config = StackConfig {
            flows_timeout: Duration::from_secs(5),
            total_udp_flows: 8,
            preallocated_flows: 4,
            ..StackConfig::default()
        };
        let mut s = NetworkStack::new(config).unwrap();

        for i in 0..200u16 {
            let bytes = ethernet(
                0x0800,
                &ipv4(17, [10, 0, 0, 1], [10, 0, 0, 2], &udp(20000 + i % 20, 53, b"q")),
            );
            s.inject(&Packet::new(&bytes).with_timestamp(Timestamp::from_secs(i as u64 / 2)));

            let udp = s.udp_flow_manager();
            assert_eq!(udp.len() + udp.cache().free_flows(), udp.cache().allocated());
            assert!(udp.cache().allocated() <= 8);
        }
        let udp = s.udp().unwrap();
        assert!(udp.flow_errors() > 0);
        assert_eq!(udp.flow_errors(), s.udp_flow_manager().stats().exhausted);

        s.drain_flows();
        assert!(s.udp_flow_manager().is_empty());
    }

    #[test]
    fn test_tcp_exhaustion_counted() {
        let config = StackConfig {
            total_tcp_flows: 1,
            preallocated_flows: 1,
            ..StackConfig::default()
        };
        let mut s = NetworkStack::new(config).unwrap();
        for sport in [1000, 1001] {
            let bytes = ethernet(
                0x0800,
                &ipv4(6, [10, 0, 0, 2], [10, 0, 0, 1], &tcp(sport, 80, SYN, &[])),
            );
            s.inject(&Packet::new(&bytes));
        }
        assert_eq!(s.tcp().unwrap().flow_errors(), 1);
        assert_eq!(s.tcp().unwrap().stats().valid_packets, 2);
        assert_eq!(s.tcp_flow_manager().stats().exhausted, 1);
    }

    #[test]
    fn test_frequency_engine_toggle() {
        let data = ethernet(
            0x0800,
            &ipv4(6, [10, 0, 0, 2], [10, 0, 0, 1], &tcp(51000, 80, 0x18, b"GET / HTTP/1.1")),
        );
        let key = tcp_key("10.0.0.2:51000", "10.0.0.1:80", 0);

        let mut s = stack();
        s.inject(&Packet::new(&data));
        assert!(s.tcp_flow_manager().find(&key).unwrap().frequencies.is_none());
        assert_eq!(s.mux_tcp().forwarder().unwrap().fail_count(), 1);

        s.enable_frequency_engine(true);
        s.inject(&Packet::new(&data));
        let flow = s.tcp_flow_manager().find(&key).unwrap();
        assert_eq!(flow.frequencies.as_ref().unwrap().count(b'T'), 3);
        assert_eq!(flow.label.as_deref(), Some("frequency"));
    }

    #[test]
    fn test_same_input_same_counters() {
        let packets = [tcp_syn(), vxlan_syn(42), gre_dns(7), ethernet(0x0800, &[0x45])];
        let run = || {
            let mut s = stack();
            for bytes in &packets {
                s.inject(&Packet::new(bytes));
            }
            serde_json::to_string(&s.counters()).unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_statistics_and_flows_output() {
        let mut s = stack();
        let bytes = tcp_syn();
        s.inject(&Packet::new(&bytes));

        let stats = s.statistics().to_string();
        assert!(stats.contains("Packets injected: 1"));
        assert!(stats.contains("ip:"));
        assert!(!stats.contains("vxlan:"));

        let mut flows = String::new();
        s.show_flows(&mut flows, 10).unwrap();
        assert!(flows.starts_with("tcp flows: 1 active"));
        assert!(flows.contains("udp flows: 0 active"));
    }

    #[test]
    fn test_invalid_config() {
        let config = StackConfig {
            max_dispatch_depth: 0,
            ..StackConfig::default()
        };
        assert!(matches!(NetworkStack::new(config), Err(StackError::Config(_))));
    }
}
