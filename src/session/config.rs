use crate::bus::RouteEventBus;
use crate::filter::{FilterRules4, FilterRules6};
use crate::rib::{Rib4, Rib6};
use crate::session::{Clock, OutHandler};
use ipnet::{Ipv4Net, Ipv6Net};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

/// Everything a [`BgpFsm`](crate::session::BgpFsm) needs to run one
/// session. Construct with [`SessionConfig::new`] and adjust fields
/// directly; the defaults mirror a plain EBGP IPv4 session.
pub struct SessionConfig {
    /// Local ASN.
    pub asn: u32,
    /// Expected peer ASN; 0 accepts any peer.
    pub peer_asn: u32,
    /// Local BGP identifier.
    pub router_id: Ipv4Addr,
    /// Proposed hold time in seconds; the session uses
    /// `min(local, remote)` and 0 disables keepalive/hold handling.
    pub hold_timer: u16,

    /// Advertise and honor the four-octet-ASN capability (RFC 6793).
    pub use_4b_asn: bool,
    /// Advertise MP-BGP IPv4 unicast. Only meaningful together with
    /// `mp_bgp_ipv6` when IPv4 routes should ride the same session.
    pub mp_bgp_ipv4: bool,
    /// Advertise MP-BGP IPv6 unicast. Setting this without
    /// `mp_bgp_ipv4` turns the session IPv6-only.
    pub mp_bgp_ipv6: bool,
    /// Skip publishing collision probes when an OPEN arrives.
    pub no_collision_detection: bool,
    /// Do not advance timers implicitly when `run` is called.
    pub no_autotick: bool,
    /// Rewrite the next hop on IBGP sessions the way EBGP does.
    pub ibgp_alter_nexthop: bool,

    /// IPv4 peering LAN; ingress routes whose next hop lies outside it
    /// are ignored, egress next hops outside it are replaced.
    pub peering_lan4: Ipv4Net,
    pub peering_lan6: Ipv6Net,
    /// Accept any IPv4 next hop regardless of the peering LAN.
    pub no_nexthop_check4: bool,
    pub no_nexthop_check6: bool,
    /// Next hop used on egress when the route's own next hop is absent
    /// or outside the peering LAN.
    pub default_nexthop4: Ipv4Addr,
    /// Always use `default_nexthop4` on egress.
    pub forced_default_nexthop4: bool,
    pub default_nexthop6_global: Ipv6Addr,
    /// Optional link-local next hop sent alongside the global one.
    pub default_nexthop6_linklocal: Option<Ipv6Addr>,
    pub forced_default_nexthop6: bool,

    pub in_filters4: FilterRules4,
    pub out_filters4: FilterRules4,
    pub in_filters6: FilterRules6,
    pub out_filters6: FilterRules6,

    /// How many times the local ASN may appear in a received AS_PATH
    /// before the routes are treated as a loop and ignored.
    pub allow_local_as: u8,
    /// Session weight stamped on learned routes; higher wins selection.
    pub weight: i32,

    /// Shared IPv4 RIB; a private one is created when absent.
    pub rib4: Option<Arc<Rib4>>,
    pub rib6: Option<Arc<Rib6>>,
    /// Event bus connecting co-hosted sessions; collision detection and
    /// route redistribution need it.
    pub rev_bus: Option<Arc<RouteEventBus>>,
    /// Clock override; the realtime clock is used when absent.
    pub clock: Option<Arc<dyn Clock>>,
    /// Receives every serialized message. Required.
    pub out_handler: Arc<dyn OutHandler>,
}

impl SessionConfig {
    pub fn new(asn: u32, router_id: Ipv4Addr, out_handler: Arc<dyn OutHandler>) -> Self {
        SessionConfig {
            asn,
            peer_asn: 0,
            router_id,
            hold_timer: 120,
            use_4b_asn: true,
            mp_bgp_ipv4: false,
            mp_bgp_ipv6: false,
            no_collision_detection: false,
            no_autotick: false,
            ibgp_alter_nexthop: false,
            peering_lan4: Ipv4Net::new(Ipv4Addr::UNSPECIFIED, 0).unwrap(),
            peering_lan6: Ipv6Net::new(Ipv6Addr::UNSPECIFIED, 0).unwrap(),
            no_nexthop_check4: false,
            no_nexthop_check6: false,
            default_nexthop4: Ipv4Addr::UNSPECIFIED,
            forced_default_nexthop4: false,
            default_nexthop6_global: Ipv6Addr::UNSPECIFIED,
            default_nexthop6_linklocal: None,
            forced_default_nexthop6: false,
            in_filters4: FilterRules4::default(),
            out_filters4: FilterRules4::default(),
            in_filters6: FilterRules6::default(),
            out_filters6: FilterRules6::default(),
            allow_local_as: 0,
            weight: 0,
            rib4: None,
            rib6: None,
            rev_bus: None,
            clock: None,
            out_handler,
        }
    }
}
