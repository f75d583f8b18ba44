use std::fmt;

use serde::Serialize;

/// Direction of a packet relative to the flow initiator.
///
/// - `Upwards`: from the initiator (client) to the responder
/// - `Downwards`: from the responder back to the initiator
///
/// The initiator is guessed once, from the first packet of the flow, with
/// [`PacketDirection::infer_tcp`] or [`PacketDirection::infer_udp`]. Every
/// later packet is classified by comparing its source with the initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PacketDirection {
    #[default]
    Upwards,
    Downwards,
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Upwards => write!(f, "upwards"),
            PacketDirection::Downwards => write!(f, "downwards"),
        }
    }
}

impl PacketDirection {
    #[inline]
    pub fn flip(self) -> Self {
        match self {
            PacketDirection::Upwards => PacketDirection::Downwards,
            PacketDirection::Downwards => PacketDirection::Upwards,
        }
    }

    /// Handshake flags decide when present, port ranks otherwise.
    pub fn infer_tcp(src_port: u16, dst_port: u16, syn: bool, ack: bool) -> PacketDirection {
        match (syn, ack) {
            (true, false) => PacketDirection::Upwards,
            (true, true) => PacketDirection::Downwards,
            _ => Self::infer_by_ports(src_port, dst_port),
        }
    }

    pub fn infer_udp(src_port: u16, dst_port: u16) -> PacketDirection {
        // DHCP client/server pair
        match (src_port, dst_port) {
            (68, 67) => PacketDirection::Upwards,
            (67, 68) => PacketDirection::Downwards,
            _ => Self::infer_by_ports(src_port, dst_port),
        }
    }

    /// System ports (<=1024) < user ports (<=49151) < dynamic ports.
    /// A packet from a higher rank to a lower rank goes client to server.
    fn infer_by_ports(source: u16, dest: u16) -> PacketDirection {
        let rank = |p: u16| -> u8 {
            if p <= 1024 {
                0
            } else if p <= 49151 {
                1
            } else {
                2
            }
        };

        if rank(source) < rank(dest) {
            PacketDirection::Downwards
        } else {
            PacketDirection::Upwards
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_handshake() {
        assert_eq!(
            PacketDirection::infer_tcp(80, 51000, true, false),
            PacketDirection::Upwards
        );
        assert_eq!(
            PacketDirection::infer_tcp(80, 51000, true, true),
            PacketDirection::Downwards
        );
    }

    #[test]
    fn test_port_rank() {
        assert_eq!(
            PacketDirection::infer_tcp(443, 51000, false, true),
            PacketDirection::Downwards
        );
        assert_eq!(
            PacketDirection::infer_udp(51000, 53),
            PacketDirection::Upwards
        );
        assert_eq!(PacketDirection::infer_udp(67, 68), PacketDirection::Downwards);
        // same rank falls back to upwards
        assert_eq!(PacketDirection::infer_udp(5000, 6000), PacketDirection::Upwards);
        assert_eq!(PacketDirection::Upwards.flip(), PacketDirection::Downwards);
    }
}
