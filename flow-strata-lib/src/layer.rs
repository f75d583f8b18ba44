//! Protocol layers
//!
//! Each multiplexer of the dispatch graph owns one protocol instance. The
//! instance is created once with the stack and reused for every packet: it
//! keeps a copy of the last header it parsed together with its counters.
//!
//! A layer is driven in three steps by its multiplexer:
//!
//! 1. [`Protocol::check`] parses the fixed header through a bounds-checked
//!    [`HeaderView`] and stores it ([`Protocol::set_header`]). A header that
//!    does not fit is rejected and counted as invalid.
//! 2. [`Protocol::process_packet`] validates the header against the rest of
//!    the packet, counts the packet and updates the per-packet
//!    [`DecodeState`] (addresses, tunnel id) and the flow tables.
//! 3. [`Protocol::next_identifier`] and [`Protocol::upper_view`] tell the
//!    multiplexer which candidates to try next and on which bytes.

use std::fmt;
use std::net::Ipv4Addr;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tracing::trace;

use crate::forwarder::{Engines, FlowForwarder};
use crate::packet::{HeaderError, HeaderView};
use crate::timestamp::Timestamp;
use crate::tracker::flow::Flow;
use crate::tracker::flow_key::FlowKey;
use crate::tracker::FlowTables;

pub mod ethernet;
pub mod gre;
pub mod icmp;
pub mod ip;
pub mod mpls;
pub mod tcp;
pub mod udp;
pub mod vlan;
pub mod vxlan;

pub use ethernet::EthernetProtocol;
pub use gre::GreProtocol;
pub use icmp::IcmpProtocol;
pub use ip::IpProtocol;
pub use mpls::MplsProtocol;
pub use tcp::TcpProtocol;
pub use udp::UdpProtocol;
pub use vlan::VlanProtocol;
pub use vxlan::VxlanProtocol;

/// Counters every layer keeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProtocolStats {
    pub total_packets: u64,
    pub total_bytes: u64,
    pub valid_packets: u64,
    pub invalid_packets: u64,
    pub events: u64,
}

impl ProtocolStats {
    #[inline]
    pub fn accept(&mut self, bytes: usize) {
        self.total_packets += 1;
        self.total_bytes += bytes as u64;
        self.valid_packets += 1;
    }

    #[inline]
    pub fn reject(&mut self) {
        self.invalid_packets += 1;
    }

    pub fn counters(&self) -> CounterMap {
        let mut map = CounterMap::new();
        map.push("total_packets", self.total_packets);
        map.push("total_bytes", self.total_bytes);
        map.push("valid_packets", self.valid_packets);
        map.push("invalid_packets", self.invalid_packets);
        map.push("events", self.events);
        map
    }
}

/// Ordered snapshot of named counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterMap(Vec<(&'static str, u64)>);

impl CounterMap {
    pub fn new() -> Self {
        CounterMap(Vec::new())
    }

    pub fn push(&mut self, name: &'static str, value: u64) {
        self.0.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.0.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CounterMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.0 {
            writeln!(f, "\t{name:<20}{value}")?;
        }
        Ok(())
    }
}

impl Serialize for CounterMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Per-packet state written by lower layers and read by upper ones.
#[derive(Debug, Clone, Default)]
pub struct DecodeState {
    pub now: Timestamp,
    pub engines: Engines,
    /// Source and destination of the innermost IPv4 header seen so far.
    pub endpoints: Option<(Ipv4Addr, Ipv4Addr)>,
    /// VXLAN VNI or GRE key of the innermost tunnel, 0 outside tunnels.
    pub tunnel_id: u32,
    /// Last TCP flow touched, kept across packets.
    pub current_tcp: Option<FlowKey>,
    /// Last UDP flow touched, kept across packets.
    pub current_udp: Option<FlowKey>,
}

impl DecodeState {
    /// Clears the per-packet fields.
    pub fn begin_packet(&mut self, now: Timestamp) {
        self.now = now;
        self.endpoints = None;
        self.tunnel_id = 0;
    }
}

/// What a layer may touch while processing a packet.
pub struct LayerContext<'a> {
    pub flows: &'a mut FlowTables,
    pub state: &'a mut DecodeState,
    /// Forwarder of the multiplexer running the layer, if it has one.
    pub forwarder: Option<&'a mut FlowForwarder>,
}

pub trait Protocol {
    fn name(&self) -> &'static str;

    /// Copies the header at the start of `view`. Does not count.
    fn set_header(&mut self, view: &HeaderView<'_>) -> Result<(), HeaderError>;

    /// Structural check run as the default multiplexer checker.
    fn check(&mut self, view: &HeaderView<'_>) -> bool {
        match self.set_header(view) {
            Ok(()) => true,
            Err(err) => {
                self.stats_mut().reject();
                trace!(layer = self.name(), offset = view.offset(), %err, "header rejected");
                false
            }
        }
    }

    /// Validates the stored header against `view` and counts the packet.
    /// Returning false stops the dispatch at this layer.
    fn process_packet(&mut self, view: &HeaderView<'_>, ctx: &mut LayerContext<'_>) -> bool;

    /// Key of the upper candidates, `None` for a terminal layer.
    fn next_identifier(&self) -> Option<u16>;

    /// Length of the last parsed header, variable part included.
    fn header_length(&self) -> usize;

    /// The bytes handed to the next layer.
    fn upper_view<'a>(&self, view: &HeaderView<'a>) -> Option<HeaderView<'a>> {
        view.advance(self.header_length()).ok()
    }

    /// Updates flow state from the last parsed header. A missing flow is ignored.
    fn process_flow(&mut self, _flow: Option<&mut Flow>) {}

    fn stats(&self) -> &ProtocolStats;

    fn stats_mut(&mut self) -> &mut ProtocolStats;

    fn counters(&self) -> CounterMap {
        self.stats().counters()
    }
}

macro_rules! any_protocol {
    ($($variant:ident($ty:ty)),+ $(,)?) => {
        paste::paste! {
            /// The closed set of layers a multiplexer can own.
            #[derive(Debug)]
            pub enum AnyProtocol {
                $( $variant($ty), )+
            }

            impl AnyProtocol {
                $(
                    pub fn [< as_ $variant:snake >](&self) -> Option<&$ty> {
                        match self {
                            AnyProtocol::$variant(p) => Some(p),
                            #[allow(unreachable_patterns)]
                            _ => None,
                        }
                    }

                    pub fn [< as_ $variant:snake _mut >](&mut self) -> Option<&mut $ty> {
                        match self {
                            AnyProtocol::$variant(p) => Some(p),
                            #[allow(unreachable_patterns)]
                            _ => None,
                        }
                    }
                )+
            }

            $(
                impl From<$ty> for AnyProtocol {
                    fn from(p: $ty) -> Self {
                        AnyProtocol::$variant(p)
                    }
                }
            )+

            impl Protocol for AnyProtocol {
                fn name(&self) -> &'static str {
                    match self { $( AnyProtocol::$variant(p) => p.name(), )+ }
                }

                fn set_header(&mut self, view: &HeaderView<'_>) -> Result<(), HeaderError> {
                    match self { $( AnyProtocol::$variant(p) => p.set_header(view), )+ }
                }

                fn check(&mut self, view: &HeaderView<'_>) -> bool {
                    match self { $( AnyProtocol::$variant(p) => p.check(view), )+ }
                }

                fn process_packet(&mut self, view: &HeaderView<'_>, ctx: &mut LayerContext<'_>) -> bool {
                    match self { $( AnyProtocol::$variant(p) => p.process_packet(view, ctx), )+ }
                }

                fn next_identifier(&self) -> Option<u16> {
                    match self { $( AnyProtocol::$variant(p) => p.next_identifier(), )+ }
                }

                fn header_length(&self) -> usize {
                    match self { $( AnyProtocol::$variant(p) => p.header_length(), )+ }
                }

                fn upper_view<'a>(&self, view: &HeaderView<'a>) -> Option<HeaderView<'a>> {
                    match self { $( AnyProtocol::$variant(p) => p.upper_view(view), )+ }
                }

                fn process_flow(&mut self, flow: Option<&mut Flow>) {
                    match self { $( AnyProtocol::$variant(p) => p.process_flow(flow), )+ }
                }

                fn stats(&self) -> &ProtocolStats {
                    match self { $( AnyProtocol::$variant(p) => p.stats(), )+ }
                }

                fn stats_mut(&mut self) -> &mut ProtocolStats {
                    match self { $( AnyProtocol::$variant(p) => p.stats_mut(), )+ }
                }

                fn counters(&self) -> CounterMap {
                    match self { $( AnyProtocol::$variant(p) => p.counters(), )+ }
                }
            }
        }
    };
}

any_protocol! {
    Ethernet(EthernetProtocol),
    Vlan(VlanProtocol),
    Mpls(MplsProtocol),
    Ip(IpProtocol),
    Gre(GreProtocol),
    Vxlan(VxlanProtocol),
    Tcp(TcpProtocol),
    Udp(UdpProtocol),
    Icmp(IcmpProtocol),
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::timestamp::Interval;
    use crate::tracker::cache::FlowCache;
    use crate::tracker::FlowManager;

    pub fn tables(ceiling: usize) -> FlowTables {
        FlowTables::new(
            FlowManager::new(FlowCache::new("tcp", ceiling), Interval::from_secs(180)),
            FlowManager::new(FlowCache::new("udp", ceiling), Interval::from_secs(180)),
        )
    }

    /// Runs check and process_packet the way a multiplexer does.
    pub fn run<P: Protocol>(
        proto: &mut P,
        view: &HeaderView<'_>,
        flows: &mut FlowTables,
        state: &mut DecodeState,
    ) -> bool {
        if !proto.check(view) {
            return false;
        }
        let mut ctx = LayerContext {
            flows,
            state,
            forwarder: None,
        };
        proto.process_packet(view, &mut ctx)
    }
}
