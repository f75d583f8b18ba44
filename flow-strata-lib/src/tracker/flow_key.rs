use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

use serde::Serialize;

use crate::packet::protocol::IpProto;

/// Canonical connection key.
///
/// Endpoints are sorted so both directions of a connection produce the same
/// key: the lower address comes first, and on equal addresses the lower
/// port. Protocols without ports use port 0 on both sides. The tunnel id
/// (VXLAN VNI or GRE key, 0 outside a tunnel) keeps identical inner tuples
/// of different overlays apart.
///
/// ```
/// use std::net::SocketAddrV4;
/// use flow_strata::packet::protocol::IpProto;
/// use flow_strata::tracker::flow_key::FlowKey;
///
/// let client: SocketAddrV4 = "10.0.0.2:51000".parse().unwrap();
/// let server: SocketAddrV4 = "10.0.0.1:80".parse().unwrap();
///
/// let up = FlowKey::new(client, server, IpProto::TCP, 0);
/// let down = FlowKey::new(server, client, IpProto::TCP, 0);
/// assert_eq!(up, down);
/// assert_eq!(up.lo_port, 80);
/// ```
#[derive(Hash, Eq, PartialEq, Debug, Copy, Clone, Serialize)]
pub struct FlowKey {
    pub tunnel_id: u32,
    pub lo_ip: Ipv4Addr,
    pub hi_ip: Ipv4Addr,
    pub lo_port: u16,
    pub hi_port: u16,
    pub protocol: IpProto,
}

impl FlowKey {
    pub fn new(src: SocketAddrV4, dst: SocketAddrV4, protocol: IpProto, tunnel_id: u32) -> Self {
        let (src, dst) = if protocol.has_ports() {
            (src, dst)
        } else {
            (
                SocketAddrV4::new(*src.ip(), 0),
                SocketAddrV4::new(*dst.ip(), 0),
            )
        };

        let swap = src.ip() > dst.ip() || (src.ip() == dst.ip() && src.port() > dst.port());
        let (lo, hi) = if swap { (dst, src) } else { (src, dst) };

        Self {
            tunnel_id,
            lo_ip: *lo.ip(),
            hi_ip: *hi.ip(),
            lo_port: lo.port(),
            hi_port: hi.port(),
            protocol,
        }
    }

    #[inline]
    pub fn lo(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.lo_ip, self.lo_port)
    }

    #[inline]
    pub fn hi(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.hi_ip, self.hi_port)
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {} {}", self.lo(), self.hi(), self.protocol)?;
        if self.tunnel_id != 0 {
            write!(f, " tunnel={}", self.tunnel_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddrV4 {
        s.parse().unwrap()
    }

    #[test]
    fn test_same_ip_sorted_by_port() {
        let a = FlowKey::new(addr("10.0.0.1:9000"), addr("10.0.0.1:53"), IpProto::UDP, 0);
        let b = FlowKey::new(addr("10.0.0.1:53"), addr("10.0.0.1:9000"), IpProto::UDP, 0);
        assert_eq!(a, b);
        assert_eq!((a.lo_port, a.hi_port), (53, 9000));
    }

    #[test]
    fn test_tunnel_id_separates_overlays() {
        let a = FlowKey::new(addr("10.0.0.1:1"), addr("10.0.0.2:2"), IpProto::TCP, 100);
        let b = FlowKey::new(addr("10.0.0.1:1"), addr("10.0.0.2:2"), IpProto::TCP, 200);
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "10.0.0.1:1 <-> 10.0.0.2:2 tcp tunnel=100");
    }

    #[test]
    fn test_portless_protocol() {
        let key = FlowKey::new(addr("10.0.0.9:7"), addr("10.0.0.1:8"), IpProto::ICMP, 0);
        assert_eq!(key.lo(), addr("10.0.0.1:0"));
        assert_eq!(key.hi(), addr("10.0.0.9:0"));
    }
}
