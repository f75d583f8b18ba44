//! Protocol dispatch graph
//!
//! A [`Multiplexer`] wraps one protocol layer with the hooks that decide
//! whether a packet belongs to it (checkers), the hooks that process it
//! (packet functions) and the candidate layers that may follow it, keyed
//! by the identifier the layer reports as next (EtherType, IP protocol, UDP
//! port). Several candidates may share an identifier: they are tried in
//! registration order and the first whose checkers accept consumes the
//! packet.
//!
//! All multiplexers of a stack live in a [`MultiplexerGraph`] arena and are
//! addressed by [`MuxId`]. Edges are plain ids, so a candidate list may
//! point back to its own node (nested IP-in-IP) without any ownership
//! cycle; recursion depth is bounded instead.
//!
//! # Counters
//!
//! - `total`: packets accepted by the node's checkers.
//! - `fail`: packets its checkers rejected, plus packets it could not hand
//!   on, either because no candidate is registered for the next identifier
//!   or because every candidate rejected them.
//! - `forward`: packets one of its candidates accepted.
//!
//! A layer that reports no next identifier (TCP, ICMP, non-first IP
//! fragments) is terminal and counts neither `forward` nor `fail`.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Index, IndexMut};

use ahash::RandomState;
use smallvec::SmallVec;
use tracing::trace;

use crate::forwarder::FlowForwarder;
use crate::layer::{AnyProtocol, DecodeState, LayerContext, Protocol};
use crate::packet::HeaderView;
use crate::stack::StackError;
use crate::tracker::FlowTables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MuxId(pub usize);

impl fmt::Display for MuxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Structural acceptance test run before a layer processes a packet.
pub type Checker = Box<dyn Fn(&mut AnyProtocol, &HeaderView<'_>) -> bool>;

/// Packet processing hook. Returning false stops the dispatch at the layer.
pub type PacketFunction =
    Box<dyn FnMut(&mut AnyProtocol, &HeaderView<'_>, &mut LayerContext<'_>) -> bool>;

type Candidates = SmallVec<[MuxId; 2]>;

pub struct Multiplexer {
    protocol: AnyProtocol,
    protocol_identifier: u16,
    header_size: usize,
    checkers: Vec<Checker>,
    packet_functions: Vec<PacketFunction>,
    upper: HashMap<u16, Candidates, RandomState>,
    lower: Option<MuxId>,
    forwarder: Option<FlowForwarder>,
    current_length: usize,
    total: u64,
    forward: u64,
    fail: u64,
}

impl Multiplexer {
    /// A multiplexer without hooks: it accepts everything and only counts.
    pub fn new(protocol: impl Into<AnyProtocol>) -> Self {
        Multiplexer {
            protocol: protocol.into(),
            protocol_identifier: 0,
            header_size: 0,
            checkers: Vec::new(),
            packet_functions: Vec::new(),
            upper: HashMap::with_hasher(RandomState::new()),
            lower: None,
            forwarder: None,
            current_length: 0,
            total: 0,
            forward: 0,
            fail: 0,
        }
    }

    /// A multiplexer running the layer's own structural check and packet
    /// processing.
    pub fn with_protocol(protocol: impl Into<AnyProtocol>) -> Self {
        let mut mux = Self::new(protocol);
        mux.add_checker(|proto, view| proto.check(view));
        mux.add_packet_function(|proto, view, ctx| proto.process_packet(view, ctx));
        mux
    }

    pub fn set_protocol(&mut self, protocol: impl Into<AnyProtocol>) {
        self.protocol = protocol.into();
    }

    pub fn set_protocol_identifier(&mut self, id: u16) {
        self.protocol_identifier = id;
    }

    /// Fixed header length of the layer, options excluded.
    ///
    /// Informational only: dispatch advances by what the protocol actually
    /// parsed ([`Protocol::upper_view`]), which accounts for IP options, TCP
    /// data offset and optional GRE fields.
    pub fn set_header_size(&mut self, size: usize) {
        self.header_size = size;
    }

    pub fn add_checker<F>(&mut self, checker: F)
    where
        F: Fn(&mut AnyProtocol, &HeaderView<'_>) -> bool + 'static,
    {
        self.checkers.push(Box::new(checker));
    }

    pub fn add_packet_function<F>(&mut self, function: F)
    where
        F: FnMut(&mut AnyProtocol, &HeaderView<'_>, &mut LayerContext<'_>) -> bool + 'static,
    {
        self.packet_functions.push(Box::new(function));
    }

    pub fn set_forwarder(&mut self, forwarder: FlowForwarder) {
        self.forwarder = Some(forwarder);
    }

    #[inline]
    pub fn protocol(&self) -> &AnyProtocol {
        &self.protocol
    }

    #[inline]
    pub fn protocol_mut(&mut self) -> &mut AnyProtocol {
        &mut self.protocol
    }

    /// Identifier under which the lower layer reaches this node.
    #[inline]
    pub fn protocol_identifier(&self) -> u16 {
        self.protocol_identifier
    }

    #[inline]
    pub fn header_size(&self) -> usize {
        self.header_size
    }

    #[inline]
    pub fn forwarder(&self) -> Option<&FlowForwarder> {
        self.forwarder.as_ref()
    }

    #[inline]
    pub fn forwarder_mut(&mut self) -> Option<&mut FlowForwarder> {
        self.forwarder.as_mut()
    }

    /// Candidates registered for `id`, in trial order.
    pub fn upper_candidates(&self, id: u16) -> &[MuxId] {
        self.upper.get(&id).map_or(&[], |c| c.as_slice())
    }

    #[inline]
    pub fn lower(&self) -> Option<MuxId> {
        self.lower
    }

    /// Length of the last view the node was offered, 0 before any.
    #[inline]
    pub fn current_length(&self) -> usize {
        self.current_length
    }

    #[inline]
    pub fn total(&self) -> u64 {
        self.total
    }

    #[inline]
    pub fn forward(&self) -> u64 {
        self.forward
    }

    #[inline]
    pub fn fail(&self) -> u64 {
        self.fail
    }
}

impl fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("protocol", &self.protocol.name())
            .field("protocol_identifier", &self.protocol_identifier)
            .field("checkers", &self.checkers.len())
            .field("packet_functions", &self.packet_functions.len())
            .field("upper", &self.upper)
            .field("lower", &self.lower)
            .field("total", &self.total)
            .field("forward", &self.forward)
            .field("fail", &self.fail)
            .finish()
    }
}

/// Arena of multiplexers.
#[derive(Debug)]
pub struct MultiplexerGraph {
    nodes: Vec<Multiplexer>,
    max_depth: usize,
}

impl MultiplexerGraph {
    pub fn new(max_depth: usize) -> Self {
        MultiplexerGraph {
            nodes: Vec::new(),
            max_depth,
        }
    }

    pub fn add_multiplexer(&mut self, mux: Multiplexer) -> MuxId {
        self.nodes.push(mux);
        MuxId(self.nodes.len() - 1)
    }

    #[inline]
    pub fn get(&self, id: MuxId) -> Option<&Multiplexer> {
        self.nodes.get(id.0)
    }

    #[inline]
    pub fn get_mut(&mut self, id: MuxId) -> Option<&mut Multiplexer> {
        self.nodes.get_mut(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (MuxId, &Multiplexer)> {
        self.nodes.iter().enumerate().map(|(i, m)| (MuxId(i), m))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Registers `child` as a candidate of `parent` for identifier `id`.
    ///
    /// Only IP layers may list themselves, for nested IP-in-IP.
    pub fn add_up_multiplexer(
        &mut self,
        parent: MuxId,
        child: MuxId,
        id: u16,
    ) -> Result<(), StackError> {
        self.get(child).ok_or(StackError::UnknownMultiplexer(child))?;
        let node = self
            .nodes
            .get_mut(parent.0)
            .ok_or(StackError::UnknownMultiplexer(parent))?;
        if parent == child && node.protocol.as_ip().is_none() {
            return Err(StackError::SelfLoop(parent, node.protocol.name()));
        }
        node.upper.entry(id).or_default().push(child);
        Ok(())
    }

    /// Sets the back-edge of `child`. The edge is informational and never
    /// followed by the dispatch.
    pub fn add_down_multiplexer(&mut self, child: MuxId, parent: MuxId) -> Result<(), StackError> {
        self.get(parent).ok_or(StackError::UnknownMultiplexer(parent))?;
        let node = self
            .nodes
            .get_mut(child.0)
            .ok_or(StackError::UnknownMultiplexer(child))?;
        node.lower = Some(parent);
        Ok(())
    }

    /// Offers `view` to node `id`. Returns whether its checkers accepted it,
    /// regardless of what happened further up.
    pub fn forward_packet(
        &mut self,
        id: MuxId,
        view: HeaderView<'_>,
        flows: &mut FlowTables,
        state: &mut DecodeState,
    ) -> bool {
        self.forward_at_depth(id, view, flows, state, 0)
    }

    fn forward_at_depth(
        &mut self,
        id: MuxId,
        view: HeaderView<'_>,
        flows: &mut FlowTables,
        state: &mut DecodeState,
        depth: usize,
    ) -> bool {
        if depth >= self.max_depth {
            trace!(mux = %id, depth, "dispatch depth exceeded");
            return false;
        }
        let Some(node) = self.nodes.get_mut(id.0) else {
            return false;
        };
        node.current_length = view.len();

        let Multiplexer {
            protocol,
            checkers,
            packet_functions,
            forwarder,
            upper,
            total,
            fail,
            ..
        } = node;

        for checker in checkers.iter() {
            if !checker(&mut *protocol, &view) {
                *fail += 1;
                trace!(mux = %id, layer = protocol.name(), "checker rejected packet");
                return false;
            }
        }
        *total += 1;

        let mut ctx = LayerContext {
            flows: &mut *flows,
            state: &mut *state,
            forwarder: forwarder.as_mut(),
        };
        for function in packet_functions.iter_mut() {
            if !function(&mut *protocol, &view, &mut ctx) {
                return true;
            }
        }

        let Some(next) = protocol.next_identifier() else {
            return true;
        };
        let candidates = match upper.get(&next) {
            Some(candidates) if !candidates.is_empty() => candidates.clone(),
            _ => {
                *fail += 1;
                trace!(mux = %id, next, "no candidate registered for next identifier");
                return true;
            }
        };
        let upper_view = protocol.upper_view(&view);

        let accepted = match upper_view {
            Some(upper_view) => candidates.iter().any(|&candidate| {
                self.forward_at_depth(candidate, upper_view, flows, state, depth + 1)
            }),
            None => false,
        };

        let Some(node) = self.nodes.get_mut(id.0) else {
            return true;
        };
        if accepted {
            node.forward += 1;
        } else {
            node.fail += 1;
            trace!(mux = %id, next, "no candidate accepted packet");
        }
        true
    }
}

impl Index<MuxId> for MultiplexerGraph {
    type Output = Multiplexer;

    fn index(&self, id: MuxId) -> &Multiplexer {
        &self.nodes[id.0]
    }
}

impl IndexMut<MuxId> for MultiplexerGraph {
    fn index_mut(&mut self, id: MuxId) -> &mut Multiplexer {
        &mut self.nodes[id.0]
    }
}
