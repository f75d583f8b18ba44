//! Tunnel and label-switching header layouts
//!
//! | Protocol | Module | Carried by | Decapsulates to |
//! |----------|--------|------------|-----------------|
//! | [GRE](gre) | `gre` | IP protocol 47 | EtherType in the header (IPv4, TEB) |
//! | [VXLAN](vxlan) | `vxlan` | UDP port 4789 | Ethernet |
//! | [MPLS](mpls) | `mpls` | EtherType 0x8847/0x8848 | IPv4, detected from the payload |
//!
//! IP-in-IP (IP protocol 4) has no header of its own: the inner datagram
//! starts right after the outer IPv4 header.

pub mod gre;
pub mod mpls;
pub mod vxlan;
