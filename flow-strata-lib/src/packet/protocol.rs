//! Protocol identifiers used as multiplexer edge keys
//!
//! Ethernet-like layers (Ethernet, VLAN, GRE) report an [`EtherProto`] as
//! their next identifier, IPv4 reports an [`IpProto`]. Both are stored in
//! headers as zerocopy integers so they can be read in place.
//!
//! # Examples
//!
//! ```
//! use flow_strata::packet::protocol::{EtherProto, IpProto};
//!
//! assert_eq!(EtherProto::MPLS_UC.to_string(), "mpls-uc");
//! assert_eq!(IpProto::from(4), IpProto::IP_ENCAP);
//! assert_eq!(u8::from(IpProto::UDP), 17);
//! assert_eq!(EtherProto::from(0x1234).to_string(), "0x1234");
//! assert!(!IpProto::from(200).is_valid());
//! ```

crate::protocol_constants! {
    /// EtherType carried by Ethernet, 802.1Q tags and GRE.
    EtherProto, U16<BigEndian>, u16:
        #[default] IPV4 = 0x0800;
        ARP = 0x0806;
        TEB = 0x6558;
        RARP = 0x8035;
        VLAN_8021Q = 0x8100;
        IPV6 = 0x86DD;
        MPLS_UC = 0x8847;
        MPLS_MC = 0x8848;
        PPP_DISC = 0x8863;
        PPP_SES = 0x8864;
        VLAN_8021AD = 0x88A8;
        LLDP = 0x88CC;
        QINQ1 = 0x9100;
}

crate::protocol_constants! {
    /// IP protocol number (IPv4 `protocol` field).
    IpProto, u8, u8:
        ICMP = 1;
        IGMP = 2;
        IP_ENCAP = 4;
        #[default] TCP = 6;
        UDP = 17;
        IPV6 = 41;
        GRE = 47;
        ESP = 50;
        AH = 51;
        SCTP = 132;
}

use zerocopy::{BigEndian, U16};

impl EtherProto {
    /// Returns true for the 802.1Q/802.1ad tag types decoded by the VLAN layer.
    #[inline]
    pub fn is_vlan(&self) -> bool {
        matches!(
            *self,
            EtherProto::VLAN_8021Q | EtherProto::VLAN_8021AD | EtherProto::QINQ1
        )
    }

    #[inline]
    pub fn is_mpls(&self) -> bool {
        matches!(*self, EtherProto::MPLS_UC | EtherProto::MPLS_MC)
    }
}

impl IpProto {
    /// Protocols whose flows are keyed by a port pair.
    #[inline]
    pub fn has_ports(&self) -> bool {
        matches!(*self, IpProto::TCP | IpProto::UDP | IpProto::SCTP)
    }
}
