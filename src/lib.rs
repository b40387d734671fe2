/*!
`bgp-speaker` is a BGP-4 (RFC 4271) speaker library: the protocol
machinery for establishing sessions, exchanging routes, and maintaining a
Routing Information Base, with four-octet ASN support (RFC 6793) and
MP-BGP IPv6 unicast (RFC 4760).

The crate does no I/O of its own. The host owns sockets, threads, and the
clock, and talks to a session through narrow interfaces:

- received bytes go into [`BgpFsm::run`](session::BgpFsm::run) in whatever
  chunks the transport produced;
- outbound messages come back through the host's
  [`OutHandler`](session::OutHandler);
- time advances only via [`BgpFsm::tick`](session::BgpFsm::tick) against a
  pluggable [`Clock`](session::Clock);
- diagnostics go through the `log` facade.

# Example

Bring up a passive session and answer a peer's OPEN:

```no_run
use bgp_speaker::session::{BgpFsm, OutHandler, SessionConfig};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

struct QueueOut(Mutex<Vec<u8>>);

impl OutHandler for QueueOut {
    fn handle_out(&self, buf: &[u8]) -> bool {
        self.0.lock().unwrap().extend_from_slice(buf);
        true
    }
}

let out = Arc::new(QueueOut(Mutex::new(Vec::new())));
let mut config = SessionConfig::new(65000, Ipv4Addr::new(10, 0, 0, 1), out.clone());
config.peering_lan4 = "10.0.0.0/24".parse().unwrap();
config.default_nexthop4 = Ipv4Addr::new(10, 0, 0, 1);

let fsm = BgpFsm::new(config);
# let bytes_from_peer: &[u8] = &[];
fsm.run(bytes_from_peer).unwrap();   // feed whatever the TCP socket read
fsm.tick().unwrap();                 // call at least once per second
// bytes queued in `out` go back to the peer
```

Multiple sessions can share a [`rib::Rib4`]/[`rib::Rib6`] and a
[`bus::RouteEventBus`]; routes learned on one session are then announced
on the others, and colliding opens for the same peer resolve to a single
surviving session.
*/
pub mod bus;
pub mod error;
pub mod filter;
pub mod models;
pub mod parser;
pub mod rib;
pub mod session;

pub use bus::{RouteEvent, RouteEventBus, RouteEventReceiver};
pub use error::{BgpError, BgpErrorCode};
pub use filter::{FilterMode, FilterOp, FilterRule, FilterRules};
pub use models::{BgpMessage, BgpUpdateMessage};
pub use rib::{Rib4, Rib6};
pub use session::{BgpFsm, BgpState, OutHandler, SessionConfig};
