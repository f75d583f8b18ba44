use std::fmt::{self, Display};
use std::net::SocketAddrV4;

use serde::Serialize;
use smol_str::SmolStr;

use crate::{
    packet::tcp::TcpHeader,
    timestamp::{Interval, Timestamp},
    tracker::{direction::PacketDirection, flow_key::FlowKey},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum FlowState {
    /// Parked in a cache, owned by nobody.
    #[default]
    Free,
    /// Keyed and stored in a flow manager.
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TcpState {
    /// Initial state, or no handshake observed yet.
    #[default]
    Closed,

    /// Client sent SYN, waiting for SYN-ACK.
    SynSent,

    /// Server sent SYN-ACK.
    SynReceived,

    /// Handshake completed, or data seen on a flow picked up mid-stream.
    Established,

    /// One side sent a FIN.
    FinWait,

    /// Both sides sent a FIN.
    Closing,

    /// Connection reset via RST flag.
    Reset,
}

impl Display for TcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TcpState::Closed => "closed",
            TcpState::SynSent => "syn-sent",
            TcpState::SynReceived => "syn-received",
            TcpState::Established => "established",
            TcpState::FinWait => "fin-wait",
            TcpState::Closing => "closing",
            TcpState::Reset => "reset",
        };
        f.write_str(s)
    }
}

/// Why a flow left its manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Termination {
    /// FIN exchange observed before expiry.
    Close,

    /// RST observed before expiry.
    Reset,

    /// Inactivity reached the manager timeout.
    Timeout,

    /// The manager was drained.
    MonitorShutdown,
}

impl Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Close => write!(f, "close"),
            Termination::Reset => write!(f, "reset"),
            Termination::Timeout => write!(f, "timeout"),
            Termination::MonitorShutdown => write!(f, "monitor-shutdown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TcpInfo {
    pub state: TcpState,
    pub syn: u32,
    pub syn_ack: u32,
    pub ack: u32,
    pub fin: u32,
    pub rst: u32,
    pub psh: u32,
}

impl TcpInfo {
    /// Counts the flags of `tcp` and advances the passive state machine.
    pub fn update(&mut self, tcp: &TcpHeader) {
        let (syn, ack, fin, rst) = (tcp.is_syn(), tcp.is_ack(), tcp.is_fin(), tcp.is_rst());

        match (syn, ack) {
            (true, true) => self.syn_ack += 1,
            (true, false) => self.syn += 1,
            (false, true) => self.ack += 1,
            _ => {}
        }
        self.fin += fin as u32;
        self.rst += rst as u32;
        self.psh += tcp.is_psh() as u32;

        self.state = match self.state {
            _ if rst => TcpState::Reset,
            TcpState::Reset => TcpState::Reset,
            TcpState::Closed if syn && !ack => TcpState::SynSent,
            TcpState::Closed if ack => TcpState::Established,
            TcpState::SynSent if syn && ack => TcpState::SynReceived,
            TcpState::SynReceived if ack && !syn => TcpState::Established,
            TcpState::Established if fin => TcpState::FinWait,
            TcpState::FinWait if fin => TcpState::Closing,
            state => state,
        };
    }
}

/// Per-flow byte histogram filled by the frequency engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteFrequencies {
    counts: [u64; 256],
    total: u64,
}

impl Default for ByteFrequencies {
    fn default() -> Self {
        ByteFrequencies {
            counts: [0; 256],
            total: 0,
        }
    }
}

impl ByteFrequencies {
    pub fn add(&mut self, payload: &[u8]) {
        for &b in payload {
            self.counts[b as usize] += 1;
        }
        self.total += payload.len() as u64;
    }

    #[inline]
    pub fn count(&self, byte: u8) -> u64 {
        self.counts[byte as usize]
    }

    #[inline]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Distinct byte values seen so far.
    pub fn distinct(&self) -> usize {
        self.counts.iter().filter(|c| **c > 0).count()
    }
}

/// State of one connection.
///
/// Flows are pooled: a [`FlowCache`](crate::tracker::cache::FlowCache) hands
/// them out already [`reset`](Flow::reset), so nothing from a previous owner
/// survives reuse.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Flow {
    /// Canonical key, `None` while the flow is free.
    pub key: Option<FlowKey>,

    pub state: FlowState,

    /// Endpoint that sent (or is believed to have sent) the first packet.
    pub initiator: Option<SocketAddrV4>,

    /// Timestamp of the first packet in the flow.
    pub start_ts: Timestamp,

    /// Timestamp of the last packet in the flow.
    pub last_seen: Timestamp,

    pub upstream_bytes: u64,
    pub downstream_bytes: u64,
    pub upstream_packets: u32,
    pub downstream_packets: u32,
    pub total_bytes: u64,

    /// TCP flags and state, untouched for UDP flows.
    pub tcp: TcpInfo,

    #[serde(skip)]
    pub frequencies: Option<Box<ByteFrequencies>>,

    /// Name of the consumer that claimed the flow payload.
    pub label: Option<SmolStr>,
}

impl Flow {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears every field, returning the flow to the free state.
    pub fn reset(&mut self) {
        *self = Flow::default();
    }

    /// Keys a free flow and marks it active.
    pub fn activate(&mut self, key: FlowKey, now: Timestamp) {
        self.key = Some(key);
        self.state = FlowState::Active;
        self.start_ts = now;
        self.last_seen = now;
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.state == FlowState::Active
    }

    #[inline]
    pub fn total_packets(&self) -> u64 {
        self.upstream_packets as u64 + self.downstream_packets as u64
    }

    /// Time between the first and the last packet.
    #[inline]
    pub fn duration(&self) -> Interval {
        self.last_seen - self.start_ts
    }

    /// Classifies a packet sent by `src`. The first packet sets the initiator
    /// from the `guess` made by the transport layer.
    pub fn direction_of(&mut self, src: SocketAddrV4, dst: SocketAddrV4, guess: PacketDirection) -> PacketDirection {
        match self.initiator {
            Some(initiator) if initiator == src => PacketDirection::Upwards,
            Some(_) => PacketDirection::Downwards,
            None => {
                self.initiator = Some(match guess {
                    PacketDirection::Upwards => src,
                    PacketDirection::Downwards => dst,
                });
                guess
            }
        }
    }

    /// Accounts one packet of `bytes` in `dir`.
    pub fn update(&mut self, dir: PacketDirection, bytes: usize, now: Timestamp) {
        match dir {
            PacketDirection::Upwards => {
                self.upstream_bytes += bytes as u64;
                self.upstream_packets += 1;
            }
            PacketDirection::Downwards => {
                self.downstream_bytes += bytes as u64;
                self.downstream_packets += 1;
            }
        }
        self.total_bytes += bytes as u64;
        self.last_seen = now;
    }

    /// Reason reported when the flow expires in its current state.
    pub fn termination_on_expiry(&self) -> Termination {
        match self.tcp.state {
            TcpState::Reset => Termination::Reset,
            TcpState::FinWait | TcpState::Closing => Termination::Close,
            _ => Termination::Timeout,
        }
    }
}

impl Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{key}")?,
            None => write!(f, "<free>")?,
        }
        write!(
            f,
            " pkts={}/{} bytes={}/{}",
            self.upstream_packets, self.downstream_packets, self.upstream_bytes, self.downstream_bytes
        )?;
        if self.tcp.state != TcpState::Closed {
            write!(f, " tcp={}", self.tcp.state)?;
        }
        if let Some(label) = &self.label {
            write!(f, " label={label}")?;
        }
        Ok(())
    }
}
