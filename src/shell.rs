//! Hard shells (HXS): the fixed-function parsing stages soft-parser code
//! hands control to, and the next-header tables used by protocol jumps.

use std::borrow::Cow;

use crate::variant::{MIN_PC, Variant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shell {
    Ethernet,
    LlcSnap,
    Vlan,
    PppoePpp,
    Mpls,
    Arp,
    Ip,
    Ipv4,
    Ipv6,
    Gre,
    MinEncap,
    OtherL3,
    Tcp,
    Udp,
    Ipsec,
    Sctp,
    Dccp,
    OtherL4,
    Gtp,
    Esp,
    OtherL5,
    Final,
}

const DPAA1_SHELLS: [(u16, Shell); 16] = [
    (0x00, Shell::Ethernet),
    (0x01, Shell::LlcSnap),
    (0x02, Shell::Vlan),
    (0x03, Shell::PppoePpp),
    (0x04, Shell::Mpls),
    (0x05, Shell::Ipv4),
    (0x06, Shell::Ipv6),
    (0x07, Shell::Gre),
    (0x08, Shell::MinEncap),
    (0x09, Shell::OtherL3),
    (0x0A, Shell::Tcp),
    (0x0B, Shell::Udp),
    (0x0C, Shell::Ipsec),
    (0x0D, Shell::Sctp),
    (0x0E, Shell::Dccp),
    (0x0F, Shell::OtherL4),
];

const DPAA2_SHELLS: [(u16, Shell); 22] = [
    (0x00, Shell::Ethernet),
    (0x01, Shell::LlcSnap),
    (0x02, Shell::Vlan),
    (0x03, Shell::PppoePpp),
    (0x04, Shell::Mpls),
    (0x05, Shell::Arp),
    (0x06, Shell::Ip),
    (0x07, Shell::Ipv4),
    (0x08, Shell::Ipv6),
    (0x09, Shell::Gre),
    (0x0A, Shell::MinEncap),
    (0x0B, Shell::OtherL3),
    (0x0C, Shell::Tcp),
    (0x0D, Shell::Udp),
    (0x0E, Shell::Ipsec),
    (0x0F, Shell::Sctp),
    (0x10, Shell::Dccp),
    (0x11, Shell::OtherL4),
    (0x12, Shell::Gtp),
    (0x13, Shell::Esp),
    (0x1E, Shell::OtherL5),
    (0x1F, Shell::Final),
];

fn shells(variant: Variant) -> &'static [(u16, Shell)] {
    match variant {
        Variant::Dpaa1 => &DPAA1_SHELLS,
        Variant::Dpaa2 => &DPAA2_SHELLS,
    }
}

impl Shell {
    pub fn from_address(variant: Variant, address: u16) -> Option<Shell> {
        shells(variant)
            .iter()
            .find(|(code, _)| *code == address)
            .map(|(_, shell)| *shell)
    }

    /// Entry address on `variant`, if that revision has this shell.
    pub fn address(self, variant: Variant) -> Option<u16> {
        shells(variant)
            .iter()
            .find(|(_, shell)| *shell == self)
            .map(|(code, _)| *code)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Shell::Ethernet => "Ethernet",
            Shell::LlcSnap => "LLC+SNAP",
            Shell::Vlan => "VLAN",
            Shell::PppoePpp => "PPPoE+PPP",
            Shell::Mpls => "MPLS",
            Shell::Arp => "ARP",
            Shell::Ip => "IP",
            Shell::Ipv4 => "IPv4 HXS",
            Shell::Ipv6 => "IPv6 HXS",
            Shell::Gre => "GRE HXS",
            Shell::MinEncap => "MinEncap HXS",
            Shell::OtherL3 => "Other L3 Shell",
            Shell::Tcp => "TCP",
            Shell::Udp => "UDP",
            Shell::Ipsec => "IPSec",
            Shell::Sctp => "SCTP",
            Shell::Dccp => "DCCP",
            Shell::OtherL4 => "Other L4 Shell",
            Shell::Gtp => "GTP",
            Shell::Esp => "ESP",
            Shell::OtherL5 => "Other L5+ Shell",
            Shell::Final => "Final Shell",
        }
    }
}

/// Name printed after an absolute destination that leaves soft-parser code,
/// or `None` for an ordinary code address.
pub fn describe_target(variant: Variant, address: u16) -> Option<Cow<'static, str>> {
    if address == variant.return_to_hard_shell() {
        Some(Cow::Borrowed("Return to hard HXS"))
    } else if address == variant.end_parsing() {
        Some(Cow::Borrowed("End Parsing"))
    } else if address < MIN_PC {
        Some(match Shell::from_address(variant, address) {
            Some(shell) => Cow::Borrowed(shell.name()),
            None => Cow::Owned(format!("Unknown HXS : {address:02x}")),
        })
    } else {
        None
    }
}

/// Which header's next-header field a protocol jump dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolClass {
    L2,
    L3,
    L4,
}

impl ProtocolClass {
    /// The reserved encoding 3 behaves as L2.
    pub const fn from_field(field: u8) -> Self {
        match field & 0x3 {
            1 => ProtocolClass::L3,
            2 => ProtocolClass::L4,
            _ => ProtocolClass::L2,
        }
    }

    pub const fn layer(self) -> u8 {
        match self {
            ProtocolClass::L2 => 2,
            ProtocolClass::L3 => 3,
            ProtocolClass::L4 => 4,
        }
    }
}

/// Outcome of a next-header lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolJump {
    pub class: ProtocolClass,
    pub next_header: u16,
    pub protocol: &'static str,
    /// `None` when the revision has no shell for the protocol.
    pub shell: Option<Shell>,
}

impl ProtocolJump {
    pub fn shell_name(&self) -> &'static str {
        self.shell.map_or("Unknown HXS", Shell::name)
    }
}

pub fn lookup_next_header(
    variant: Variant,
    class: ProtocolClass,
    next_header: u16,
) -> ProtocolJump {
    let (protocol, shell) = match class {
        ProtocolClass::L2 => match next_header {
            0x0000..=0x05DC => ("LLC-SNAP", Shell::LlcSnap),
            0x0800 => ("IPv4", Shell::Ipv4),
            0x0806 => ("ARP", Shell::Arp),
            0x86DD => ("IPv6", Shell::Ipv6),
            0x8847 | 0x8848 => ("MPLS", Shell::Mpls),
            0x8864 => ("PPPoE+PPP", Shell::PppoePpp),
            _ => ("Other L3", Shell::OtherL3),
        },
        ProtocolClass::L3 => match next_header {
            4 => ("IPv4", Shell::Ipv4),
            6 => ("TCP", Shell::Tcp),
            17 => ("UDP", Shell::Udp),
            33 => ("DCCP", Shell::Dccp),
            41 => ("IPv6", Shell::Ipv6),
            47 => ("GRE", Shell::Gre),
            50 | 51 => ("IPSec", Shell::Ipsec),
            55 => ("MinEncap", Shell::MinEncap),
            132 => ("SCTP", Shell::Sctp),
            _ => ("Other L4", Shell::OtherL4),
        },
        ProtocolClass::L4 => match next_header {
            2123 => ("GTP-C", Shell::Gtp),
            2152 => ("GTP-U", Shell::Gtp),
            3386 => ("GTP", Shell::Gtp),
            4500 => ("ESP", Shell::Esp),
            4789 => ("VXLAN", Shell::OtherL5),
            _ => ("Other L5", Shell::OtherL5),
        },
    };
    ProtocolJump {
        class,
        next_header,
        protocol,
        shell: shell.address(variant).map(|_| shell),
    }
}
