use std::fmt::{Debug, Display, Formatter};
use std::net::Ipv6Addr;

/// Next hop carried inside an MP_REACH_NLRI attribute for IPv6 unicast:
/// either a single global address or a global/link-local pair.
#[derive(PartialEq, Copy, Clone, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MpNextHop {
    Ipv6(Ipv6Addr),
    Ipv6LinkLocal(Ipv6Addr, Ipv6Addr),
}

impl MpNextHop {
    /// The global (routable) address of this next hop.
    pub const fn global(&self) -> Ipv6Addr {
        match self {
            MpNextHop::Ipv6(x) => *x,
            MpNextHop::Ipv6LinkLocal(x, _) => *x,
        }
    }

    pub const fn link_local(&self) -> Option<Ipv6Addr> {
        match self {
            MpNextHop::Ipv6(_) => None,
            MpNextHop::Ipv6LinkLocal(_, ll) => Some(*ll),
        }
    }

    /// Wire length of the next hop field: 16 or 32 octets.
    pub const fn wire_len(&self) -> u8 {
        match self {
            MpNextHop::Ipv6(_) => 16,
            MpNextHop::Ipv6LinkLocal(_, _) => 32,
        }
    }
}

impl Debug for MpNextHop {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MpNextHop::Ipv6(x) => write!(f, "{}", x),
            MpNextHop::Ipv6LinkLocal(x, y) => write!(f, "{} (link-local {})", x, y),
        }
    }
}

impl Display for MpNextHop {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.global())
    }
}

impl From<Ipv6Addr> for MpNextHop {
    fn from(addr: Ipv6Addr) -> Self {
        MpNextHop::Ipv6(addr)
    }
}
