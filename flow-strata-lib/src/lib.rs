//! # flow-strata
//!
//! A protocol dispatch graph and flow lifecycle engine for deep packet
//! inspection.
//!
//! Packets enter a [`NetworkStack`](stack::NetworkStack), which hands them
//! through a graph of [`Multiplexer`](mux::Multiplexer)s, one per protocol
//! layer. Each layer parses its header zero-copy, counts the packet and
//! picks the next layer by identifier (EtherType, IP protocol, UDP port).
//! Transport layers attach packets to bidirectional flows kept by a
//! [`FlowManager`](tracker::FlowManager), and forward flow payloads to
//! registered [`FlowConsumer`](forwarder::FlowConsumer)s.
//!
//! ## Modules
//!
//! - [`packet`]: bounds-checked header views and the wire formats.
//! - [`layer`]: the protocol layers and their counters.
//! - [`mux`]: multiplexers and the dispatch graph.
//! - [`tracker`]: flow keys, flows, the flow cache and the flow managers.
//! - [`forwarder`]: payload delivery to flow consumers.
//! - [`stack`]: the assembled stack.
//! - [`config`]: build-time configuration.

pub mod config;
pub mod forwarder;
pub mod layer;
pub mod macros;
pub mod metadata;
pub mod mux;
pub mod packet;
pub mod stack;
pub mod timestamp;
pub mod tracker;
