//! Flow payload forwarding
//!
//! A stateful multiplexer (TCP or UDP) owns one [`FlowForwarder`]. For every
//! packet with a payload the forwarder offers `(flow, payload, direction)`
//! to its consumers in registration order; each consumer that accepts the
//! flow consumes it. Consumers of a disabled engine are skipped.
//!
//! ```
//! use flow_strata::forwarder::{Engines, FlowForwarder, FrequencyEngine};
//! use flow_strata::tracker::direction::PacketDirection;
//! use flow_strata::tracker::flow::Flow;
//!
//! let mut forwarder = FlowForwarder::new();
//! forwarder.add_consumer(FrequencyEngine::new());
//!
//! let mut flow = Flow::new();
//! let engines = Engines { nids: true, frequency: true };
//! assert!(forwarder.forward_flow(&mut flow, b"hello", PacketDirection::Upwards, engines));
//! assert_eq!(flow.frequencies.as_ref().unwrap().count(b'l'), 2);
//! assert_eq!(flow.label.as_deref(), Some("frequency"));
//! ```

use std::fmt;

use serde::Serialize;
use smol_str::SmolStr;
use tracing::trace;

use crate::tracker::direction::PacketDirection;
use crate::tracker::flow::Flow;

/// Engine toggles consulted per consumer kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Engines {
    pub nids: bool,
    pub frequency: bool,
}

impl Default for Engines {
    fn default() -> Self {
        Engines {
            nids: true,
            frequency: false,
        }
    }
}

impl Engines {
    #[inline]
    pub fn allows(&self, kind: ConsumerKind) -> bool {
        match kind {
            ConsumerKind::Signature => self.nids,
            ConsumerKind::Frequency => self.frequency,
            ConsumerKind::Generic => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConsumerKind {
    /// Pattern matching on payloads, gated by the NIDS engine.
    Signature,
    /// Statistical profiling, gated by the frequency engine.
    Frequency,
    /// Always enabled.
    Generic,
}

/// Receiver of flow payloads.
pub trait FlowConsumer {
    fn name(&self) -> &str;

    fn kind(&self) -> ConsumerKind {
        ConsumerKind::Generic
    }

    /// Whether the consumer wants this packet of `flow`.
    fn accepts(&self, _flow: &Flow, _payload: &[u8]) -> bool {
        true
    }

    fn consume(&mut self, flow: &mut Flow, payload: &[u8], dir: PacketDirection);
}

#[derive(Default)]
pub struct FlowForwarder {
    consumers: Vec<Box<dyn FlowConsumer>>,
    forward: u64,
    fail: u64,
}

impl FlowForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_consumer<C: FlowConsumer + 'static>(&mut self, consumer: C) {
        self.consumers.push(Box::new(consumer));
    }

    /// Offers a payload to every enabled consumer. Returns true when at
    /// least one consumed it.
    ///
    /// The first consumer to take a flow labels it.
    pub fn forward_flow(
        &mut self,
        flow: &mut Flow,
        payload: &[u8],
        dir: PacketDirection,
        engines: Engines,
    ) -> bool {
        let mut consumed = false;
        for consumer in self.consumers.iter_mut() {
            if !engines.allows(consumer.kind()) || !consumer.accepts(flow, payload) {
                continue;
            }
            consumer.consume(flow, payload, dir);
            if flow.label.is_none() {
                flow.label = Some(SmolStr::new(consumer.name()));
            }
            consumed = true;
        }

        if consumed {
            self.forward += 1;
        } else {
            self.fail += 1;
            trace!(len = payload.len(), "payload not consumed");
        }
        consumed
    }

    #[inline]
    pub fn forward_count(&self) -> u64 {
        self.forward
    }

    #[inline]
    pub fn fail_count(&self) -> u64 {
        self.fail
    }

    pub fn consumer_names(&self) -> impl Iterator<Item = &str> {
        self.consumers.iter().map(|c| c.name())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}

impl fmt::Debug for FlowForwarder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowForwarder")
            .field("consumers", &self.consumer_names().collect::<Vec<_>>())
            .field("forward", &self.forward)
            .field("fail", &self.fail)
            .finish()
    }
}

/// Built-in frequency consumer: a byte histogram per flow.
#[derive(Debug, Default)]
pub struct FrequencyEngine {
    flows: u64,
    bytes: u64,
}

impl FrequencyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flows that received their first histogram from this engine.
    #[inline]
    pub fn flows(&self) -> u64 {
        self.flows
    }

    #[inline]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl FlowConsumer for FrequencyEngine {
    fn name(&self) -> &str {
        "frequency"
    }

    fn kind(&self) -> ConsumerKind {
        ConsumerKind::Frequency
    }

    fn consume(&mut self, flow: &mut Flow, payload: &[u8], _dir: PacketDirection) {
        if flow.frequencies.is_none() {
            self.flows += 1;
        }
        flow.frequencies.get_or_insert_with(Box::default).add(payload);
        self.bytes += payload.len() as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records what it sees, takes only payloads starting with a prefix.
    struct Recorder {
        name: &'static str,
        kind: ConsumerKind,
        prefix: &'static [u8],
        seen: Rc<RefCell<Vec<(&'static str, PacketDirection)>>>,
    }

    impl FlowConsumer for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> ConsumerKind {
            self.kind
        }

        fn accepts(&self, _flow: &Flow, payload: &[u8]) -> bool {
            payload.starts_with(self.prefix)
        }

        fn consume(&mut self, _flow: &mut Flow, _payload: &[u8], dir: PacketDirection) {
            self.seen.borrow_mut().push((self.name, dir));
        }
    }

    fn recorder(
        name: &'static str,
        kind: ConsumerKind,
        prefix: &'static [u8],
        seen: &Rc<RefCell<Vec<(&'static str, PacketDirection)>>>,
    ) -> Recorder {
        Recorder {
            name,
            kind,
            prefix,
            seen: Rc::clone(seen),
        }
    }

    #[test]
    fn test_consumers_in_registration_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut forwarder = FlowForwarder::new();
        forwarder.add_consumer(recorder("http", ConsumerKind::Generic, b"GET", &seen));
        forwarder.add_consumer(recorder("any", ConsumerKind::Generic, b"", &seen));

        let mut flow = Flow::new();
        let engines = Engines::default();
        assert!(forwarder.forward_flow(&mut flow, b"GET /", PacketDirection::Upwards, engines));
        assert!(forwarder.forward_flow(&mut flow, b"HTTP/1.1", PacketDirection::Downwards, engines));

        assert_eq!(
            *seen.borrow(),
            vec![
                ("http", PacketDirection::Upwards),
                ("any", PacketDirection::Upwards),
                ("any", PacketDirection::Downwards),
            ]
        );
        assert_eq!(flow.label.as_deref(), Some("http"));
        assert_eq!(forwarder.forward_count(), 2);
        assert_eq!(forwarder.fail_count(), 0);
    }

    #[test]
    fn test_engine_toggles() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut forwarder = FlowForwarder::new();
        forwarder.add_consumer(recorder("sig", ConsumerKind::Signature, b"", &seen));
        forwarder.add_consumer(FrequencyEngine::new());

        let mut flow = Flow::new();
        let off = Engines {
            nids: false,
            frequency: false,
        };
        assert!(!forwarder.forward_flow(&mut flow, b"x", PacketDirection::Upwards, off));
        assert_eq!(forwarder.fail_count(), 1);
        assert!(seen.borrow().is_empty());
        assert!(flow.frequencies.is_none());

        let freq_only = Engines {
            nids: false,
            frequency: true,
        };
        assert!(forwarder.forward_flow(&mut flow, b"xy", PacketDirection::Upwards, freq_only));
        assert!(seen.borrow().is_empty());
        assert_eq!(flow.frequencies.as_ref().unwrap().total(), 2);
        assert_eq!(flow.label.as_deref(), Some("frequency"));
    }
}
