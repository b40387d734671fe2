/*!
The Routing Information Base.

One [`Rib`] holds the routes of a single address family, keyed by
`(prefix, source router id)`; [`Rib4`] and [`Rib6`] are the two
instantiations. A RIB may be shared by any number of sessions: every
operation takes one internal lock and returns owned data (attribute bundles
are `Arc`-shared, so entry clones are cheap).

Selection among candidates for the same prefix ("best path") uses, in
order: higher session weight, shorter AS_PATH (AS_SEQUENCE hops only), then
lowest source router id, so selection is deterministic under any insertion
order. Replacement under one `(prefix, source)` key is stricter: the new
route must be strictly better on weight/path length, otherwise the existing
entry is retained.
*/
use crate::models::*;
use ipnet::{Ipv4Net, Ipv6Net};
use itertools::Itertools;
use log::info;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

/// Per-family glue the generic RIB needs: how to synthesize the minimal
/// attribute bundle for locally originated routes, and how to read a next
/// hop back out of a bundle.
pub trait RibPrefix: RoutedPrefix {
    type Nexthop: Copy + std::fmt::Debug + PartialEq;

    fn local_attributes(nexthop: Self::Nexthop) -> Attributes;
    fn nexthop_of(attributes: &Attributes) -> Option<Self::Nexthop>;
}

impl RibPrefix for Ipv4Net {
    type Nexthop = Ipv4Addr;

    fn local_attributes(nexthop: Self::Nexthop) -> Attributes {
        [
            AttributeValue::Origin(Origin::IGP),
            AttributeValue::AsPath {
                path: AsPath::new(),
                is_as4: false,
            },
            AttributeValue::NextHop(nexthop),
        ]
        .into_iter()
        .collect()
    }

    fn nexthop_of(attributes: &Attributes) -> Option<Self::Nexthop> {
        attributes.next_hop()
    }
}

impl RibPrefix for Ipv6Net {
    type Nexthop = MpNextHop;

    fn local_attributes(nexthop: Self::Nexthop) -> Attributes {
        [
            AttributeValue::Origin(Origin::IGP),
            AttributeValue::AsPath {
                path: AsPath::new(),
                is_as4: false,
            },
            AttributeValue::MpReachNlri(MpReachNlri::Ipv6Unicast {
                next_hop: nexthop,
                prefixes: vec![],
            }),
        ]
        .into_iter()
        .collect()
    }

    fn nexthop_of(attributes: &Attributes) -> Option<Self::Nexthop> {
        match attributes.get_reachable() {
            Some(MpReachNlri::Ipv6Unicast { next_hop, .. }) => Some(*next_hop),
            _ => None,
        }
    }
}

/// Source router id of locally originated routes.
pub const LOCAL_SRC_ID: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

/// One route in the RIB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RibEntry<P: RibPrefix> {
    pub prefix: P,
    /// Originating speaker's BGP identifier; 0.0.0.0 for local routes.
    pub src_router_id: Ipv4Addr,
    pub attributes: Arc<Attributes>,
    /// Entries announced together with one attribute bundle share an
    /// update group, letting a session emit them as a single UPDATE.
    pub update_group: u64,
    pub weight: i32,
    /// ASN of the IBGP peer this route was learned from; 0 for EBGP or
    /// local routes.
    pub ibgp_asn: u32,
}

impl<P: RibPrefix> RibEntry<P> {
    pub fn is_local(&self) -> bool {
        self.src_router_id == LOCAL_SRC_ID
    }

    /// AS_PATH hop count; only AS_SEQUENCE segments contribute.
    pub fn metric(&self) -> usize {
        self.attributes
            .as_path()
            .map(|path| path.route_len())
            .unwrap_or(0)
    }

    pub fn next_hop(&self) -> Option<P::Nexthop> {
        P::nexthop_of(&self.attributes)
    }

    /// Strictly better than `other`: higher weight, or shorter path at
    /// equal weight. Equal scores are NOT better, which is what keeps an
    /// incumbent in place.
    fn preferred_over(&self, other: &Self) -> bool {
        if self.weight != other.weight {
            return self.weight > other.weight;
        }
        self.metric() < other.metric()
    }

    /// Total-order rank for from-scratch selection: weight descending,
    /// metric ascending, source router id ascending (host order).
    fn rank(&self) -> (i32, usize, u32) {
        (-self.weight, self.metric(), u32::from(self.src_router_id))
    }
}

/// Outcome of a withdraw operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawOutcome<P: RibPrefix> {
    /// No entry under this (prefix, source) key.
    NotFound,
    /// Entry removed, but it was not the selected one; reachability is
    /// unchanged.
    RemovedShadowed,
    /// Removed entry was the selected one and another candidate took over.
    RemovedReplaced(RibEntry<P>),
    /// Removed entry was the last candidate; the prefix is now
    /// unreachable.
    RemovedUnreachable,
}

/// Outcome of discarding every route from one source.
#[derive(Debug, Clone)]
pub struct DiscardOutcome<P: RibPrefix> {
    /// Prefixes that lost their last candidate.
    pub unreachable: Vec<P>,
    /// New best entries for prefixes whose selected route was discarded
    /// but that remain reachable through another source.
    pub changed: Vec<RibEntry<P>>,
}

impl<P: RibPrefix> Default for DiscardOutcome<P> {
    fn default() -> Self {
        DiscardOutcome {
            unreachable: Vec::new(),
            changed: Vec::new(),
        }
    }
}

struct RibInner<P: RibPrefix> {
    entries: HashMap<(P, Ipv4Addr), RibEntry<P>>,
    next_update_group: u64,
}

/// A per-address-family routing table. See the module docs for the
/// selection rules.
pub struct Rib<P: RibPrefix> {
    inner: Mutex<RibInner<P>>,
}

pub type Rib4 = Rib<Ipv4Net>;
pub type Rib6 = Rib<Ipv6Net>;

impl<P: RibPrefix> Default for Rib<P> {
    fn default() -> Self {
        Rib {
            inner: Mutex::new(RibInner {
                entries: HashMap::new(),
                next_update_group: 0,
            }),
        }
    }
}

fn select_best<'a, P: RibPrefix>(
    inner: &'a RibInner<P>,
    prefix: &P,
) -> Option<&'a RibEntry<P>> {
    inner
        .entries
        .values()
        .filter(|entry| entry.prefix == *prefix)
        .min_by_key(|entry| entry.rank())
}

impl<P: RibPrefix> Rib<P> {
    pub fn new() -> Self {
        Rib::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, prefix: &P, src_router_id: Ipv4Addr) -> Option<RibEntry<P>> {
        self.inner
            .lock()
            .unwrap()
            .entries
            .get(&(*prefix, src_router_id))
            .cloned()
    }

    /// Inserts a locally originated route (source id 0.0.0.0) with the
    /// minimal attribute bundle. Local routes sharing a next hop are
    /// grouped under one update group so they announce as a single
    /// UPDATE. Returns `None` when the route already exists.
    pub fn insert_local(
        &self,
        prefix: P,
        nexthop: P::Nexthop,
        weight: i32,
    ) -> Option<RibEntry<P>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.contains_key(&(prefix, LOCAL_SRC_ID)) {
            info!("insert_local: route {} already exists", prefix);
            return None;
        }

        let group = inner
            .entries
            .values()
            .find(|entry| entry.is_local() && entry.next_hop() == Some(nexthop))
            .map(|entry| entry.update_group);
        let update_group = group.unwrap_or_else(|| {
            inner.next_update_group += 1;
            inner.next_update_group
        });

        let entry = RibEntry {
            prefix,
            src_router_id: LOCAL_SRC_ID,
            attributes: Arc::new(P::local_attributes(nexthop)),
            update_group,
            weight,
            ibgp_asn: 0,
        };
        info!(
            "insert_local: group {}, route {}",
            entry.update_group, prefix
        );
        inner.entries.insert((prefix, LOCAL_SRC_ID), entry.clone());
        Some(entry)
    }

    /// Inserts one route learned from a peer. An existing entry under the
    /// same `(prefix, src)` key is only replaced when the new route is
    /// strictly better. Returns the selected entry for the prefix after
    /// the operation and whether the selection changed.
    pub fn insert_from_peer(
        &self,
        src_router_id: Ipv4Addr,
        prefix: P,
        attributes: Arc<Attributes>,
        weight: i32,
        ibgp_asn: u32,
    ) -> (Option<RibEntry<P>>, bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.next_update_group += 1;
        let group = inner.next_update_group;
        let (best, changed) = insert_entry(
            &mut inner,
            src_router_id,
            prefix,
            attributes,
            weight,
            ibgp_asn,
            group,
        );
        (best, changed)
    }

    /// Bulk form of [`Rib::insert_from_peer`]: all routes share one
    /// attribute bundle and one update group. Returns the prefixes whose
    /// selected entry became the newly inserted route; those are the ones
    /// worth announcing onward.
    pub fn insert_many_from_peer(
        &self,
        src_router_id: Ipv4Addr,
        prefixes: &[P],
        attributes: Arc<Attributes>,
        weight: i32,
        ibgp_asn: u32,
    ) -> Vec<P> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_update_group += 1;
        let group = inner.next_update_group;

        let mut newly_best = Vec::new();
        for prefix in prefixes {
            let (best, changed) = insert_entry(
                &mut inner,
                src_router_id,
                *prefix,
                attributes.clone(),
                weight,
                ibgp_asn,
                group,
            );
            if changed && best.is_some_and(|b| b.src_router_id == src_router_id) {
                newly_best.push(*prefix);
            }
        }
        newly_best
    }

    /// Removes the entry under `(prefix, src)`.
    pub fn withdraw(&self, src_router_id: Ipv4Addr, prefix: P) -> WithdrawOutcome<P> {
        let mut inner = self.inner.lock().unwrap();

        let was_best = match select_best(&inner, &prefix) {
            Some(best) => best.src_router_id == src_router_id,
            None => false,
        };

        if inner.entries.remove(&(prefix, src_router_id)).is_none() {
            return WithdrawOutcome::NotFound;
        }
        info!("withdraw: scope {}, route {}", src_router_id, prefix);

        if !was_best {
            return WithdrawOutcome::RemovedShadowed;
        }
        match select_best(&inner, &prefix) {
            Some(next) => WithdrawOutcome::RemovedReplaced(next.clone()),
            None => WithdrawOutcome::RemovedUnreachable,
        }
    }

    /// Removes every route learned from `src_router_id`.
    pub fn discard(&self, src_router_id: Ipv4Addr) -> DiscardOutcome<P> {
        let mut inner = self.inner.lock().unwrap();

        let victims: Vec<(P, bool)> = inner
            .entries
            .values()
            .filter(|entry| entry.src_router_id == src_router_id)
            .map(|entry| {
                let was_best = select_best(&inner, &entry.prefix)
                    .is_some_and(|best| best.src_router_id == src_router_id);
                (entry.prefix, was_best)
            })
            .collect();

        let mut outcome = DiscardOutcome::default();
        for (prefix, was_best) in victims {
            inner.entries.remove(&(prefix, src_router_id));
            info!("discard: scope {}, route {}", src_router_id, prefix);
            if !was_best {
                continue;
            }
            match select_best(&inner, &prefix) {
                Some(next) => outcome.changed.push(next.clone()),
                None => outcome.unreachable.push(prefix),
            }
        }
        outcome
    }

    /// Longest-prefix match with best-path tiebreak among covering
    /// prefixes of equal length.
    pub fn lookup(&self, addr: &P::Addr) -> Option<RibEntry<P>> {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .values()
            .filter(|entry| entry.prefix.contains_addr(addr))
            .min_by_key(|entry| (std::cmp::Reverse(entry.prefix.bits()), entry.rank()))
            .cloned()
    }

    /// Scoped lookup: only considers routes from one source.
    pub fn lookup_from(&self, src_router_id: Ipv4Addr, addr: &P::Addr) -> Option<RibEntry<P>> {
        let inner = self.inner.lock().unwrap();
        inner
            .entries
            .values()
            .filter(|entry| entry.src_router_id == src_router_id)
            .filter(|entry| entry.prefix.contains_addr(addr))
            .min_by_key(|entry| (std::cmp::Reverse(entry.prefix.bits()), entry.rank()))
            .cloned()
    }

    /// The selected entry per prefix, ordered by update group so callers
    /// can batch same-bundle routes into shared UPDATEs.
    pub fn best_entries(&self) -> Vec<RibEntry<P>> {
        let inner = self.inner.lock().unwrap();
        let prefixes: Vec<P> = inner
            .entries
            .keys()
            .map(|(prefix, _)| *prefix)
            .unique()
            .collect();

        prefixes
            .into_iter()
            .filter_map(|prefix| select_best(&inner, &prefix).cloned())
            .sorted_by_key(|entry| entry.update_group)
            .collect()
    }
}

fn insert_entry<P: RibPrefix>(
    inner: &mut RibInner<P>,
    src_router_id: Ipv4Addr,
    prefix: P,
    attributes: Arc<Attributes>,
    weight: i32,
    ibgp_asn: u32,
    update_group: u64,
) -> (Option<RibEntry<P>>, bool) {
    let entry = RibEntry {
        prefix,
        src_router_id,
        attributes,
        update_group,
        weight,
        ibgp_asn,
    };

    if let Some(existing) = inner.entries.get(&(prefix, src_router_id)) {
        if !entry.preferred_over(existing) {
            return (select_best(inner, &prefix).cloned(), false);
        }
    }

    let old_best = select_best(inner, &prefix).cloned();
    info!(
        "insert: group {}, scope {}, route {}",
        update_group, src_router_id, prefix
    );
    inner.entries.insert((prefix, src_router_id), entry);
    let new_best = select_best(inner, &prefix).cloned();
    let changed = old_best != new_best;
    (new_best, changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn net(s: &str) -> Ipv4Net {
        Ipv4Net::from_str(s).unwrap()
    }

    fn peer(n: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, n)
    }

    fn attrs_with_path(asns: &[u32]) -> Arc<Attributes> {
        Arc::new(
            [
                AttributeValue::Origin(Origin::IGP),
                AttributeValue::AsPath {
                    path: AsPath::from_sequence(asns.iter().copied()),
                    is_as4: false,
                },
                AttributeValue::NextHop(Ipv4Addr::new(10, 0, 0, 254)),
            ]
            .into_iter()
            .collect::<Attributes>(),
        )
    }

    #[test]
    fn test_local_insert_groups_by_nexthop() {
        let rib = Rib4::new();
        let a = rib
            .insert_local(net("172.30.0.0/24"), Ipv4Addr::new(10, 0, 0, 1), 0)
            .unwrap();
        let b = rib
            .insert_local(net("172.30.1.0/24"), Ipv4Addr::new(10, 0, 0, 1), 0)
            .unwrap();
        let c = rib
            .insert_local(net("172.30.2.0/24"), Ipv4Addr::new(10, 0, 0, 2), 0)
            .unwrap();

        assert_eq!(a.update_group, b.update_group);
        assert_ne!(a.update_group, c.update_group);
        assert!(a.is_local());
        assert_eq!(a.next_hop(), Some(Ipv4Addr::new(10, 0, 0, 1)));

        // duplicate insert refused
        assert!(rib
            .insert_local(net("172.30.0.0/24"), Ipv4Addr::new(10, 0, 0, 3), 0)
            .is_none());
    }

    #[test]
    fn test_peer_insert_and_replacement() {
        let rib = Rib4::new();
        let prefix = net("192.0.2.0/24");

        let (best, changed) =
            rib.insert_from_peer(peer(1), prefix, attrs_with_path(&[65001, 65002]), 0, 0);
        assert!(changed);
        assert_eq!(best.unwrap().src_router_id, peer(1));

        // same source, longer path: discarded
        let (best, changed) = rib.insert_from_peer(
            peer(1),
            prefix,
            attrs_with_path(&[65001, 65002, 65003]),
            0,
            0,
        );
        assert!(!changed);
        assert_eq!(best.unwrap().metric(), 2);

        // same source, shorter path: replaces
        let (best, changed) =
            rib.insert_from_peer(peer(1), prefix, attrs_with_path(&[65001]), 0, 0);
        assert!(changed);
        assert_eq!(best.unwrap().metric(), 1);
    }

    #[test]
    fn test_best_path_weight_beats_length() {
        let rib = Rib4::new();
        let prefix = net("192.0.2.0/24");

        rib.insert_from_peer(peer(1), prefix, attrs_with_path(&[65001]), 0, 0);
        let (best, changed) =
            rib.insert_from_peer(peer(2), prefix, attrs_with_path(&[65001, 65002]), 100, 0);
        assert!(changed);
        assert_eq!(best.unwrap().src_router_id, peer(2));
    }

    #[test]
    fn test_equal_score_tiebreak_is_deterministic() {
        // equal weight and path length: the lower source router id is
        // selected no matter which arrived first
        let prefix = net("192.0.2.0/24");

        let rib = Rib4::new();
        rib.insert_from_peer(peer(2), prefix, attrs_with_path(&[65001]), 0, 0);
        let (best, _) = rib.insert_from_peer(peer(1), prefix, attrs_with_path(&[65009]), 0, 0);
        assert_eq!(best.unwrap().src_router_id, peer(1));

        let rib = Rib4::new();
        rib.insert_from_peer(peer(1), prefix, attrs_with_path(&[65009]), 0, 0);
        let (best, changed) =
            rib.insert_from_peer(peer(2), prefix, attrs_with_path(&[65001]), 0, 0);
        assert!(!changed);
        assert_eq!(best.unwrap().src_router_id, peer(1));
    }

    #[test]
    fn test_withdraw_outcomes() {
        let rib = Rib4::new();
        let prefix = net("192.0.2.0/24");

        assert_eq!(rib.withdraw(peer(1), prefix), WithdrawOutcome::NotFound);

        rib.insert_from_peer(peer(1), prefix, attrs_with_path(&[65001]), 0, 0);
        rib.insert_from_peer(peer(2), prefix, attrs_with_path(&[65002, 65003]), 0, 0);

        // peer 2 is shadowed by peer 1's shorter path
        assert_eq!(
            rib.withdraw(peer(2), prefix),
            WithdrawOutcome::RemovedShadowed
        );

        rib.insert_from_peer(peer(2), prefix, attrs_with_path(&[65002, 65003]), 0, 0);
        match rib.withdraw(peer(1), prefix) {
            WithdrawOutcome::RemovedReplaced(entry) => {
                assert_eq!(entry.src_router_id, peer(2))
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        assert_eq!(
            rib.withdraw(peer(2), prefix),
            WithdrawOutcome::RemovedUnreachable
        );
        assert!(rib.is_empty());
    }

    #[test]
    fn test_discard_reports_unreachable_and_changed() {
        let rib = Rib4::new();
        let shared = net("192.0.2.0/24");
        let exclusive = net("198.51.100.0/24");

        rib.insert_from_peer(peer(1), shared, attrs_with_path(&[65001]), 0, 0);
        rib.insert_from_peer(peer(2), shared, attrs_with_path(&[65002, 65003]), 0, 0);
        rib.insert_from_peer(peer(1), exclusive, attrs_with_path(&[65001]), 0, 0);

        let outcome = rib.discard(peer(1));
        assert_eq!(outcome.unreachable, vec![exclusive]);
        assert_eq!(outcome.changed.len(), 1);
        assert_eq!(outcome.changed[0].src_router_id, peer(2));
        assert_eq!(rib.len(), 1);
    }

    #[test]
    fn test_lookup_longest_prefix() {
        let rib = Rib4::new();
        rib.insert_from_peer(peer(1), net("10.0.0.0/8"), attrs_with_path(&[65001]), 0, 0);
        rib.insert_from_peer(
            peer(2),
            net("10.1.0.0/16"),
            attrs_with_path(&[65002, 65003, 65004]),
            0,
            0,
        );

        let hit = rib.lookup(&Ipv4Addr::new(10, 1, 2, 3)).unwrap();
        assert_eq!(hit.prefix, net("10.1.0.0/16"));

        let hit = rib.lookup(&Ipv4Addr::new(10, 200, 0, 1)).unwrap();
        assert_eq!(hit.prefix, net("10.0.0.0/8"));

        assert!(rib.lookup(&Ipv4Addr::new(192, 0, 2, 1)).is_none());

        let scoped = rib.lookup_from(peer(1), &Ipv4Addr::new(10, 1, 2, 3)).unwrap();
        assert_eq!(scoped.prefix, net("10.0.0.0/8"));
    }

    #[test]
    fn test_selection_insertion_order_independent() {
        // same multiset of entries inserted in two orders selects the
        // same best entry
        let build = |order: &[(Ipv4Addr, &[u32])]| {
            let rib = Rib4::new();
            for (src, path) in order {
                rib.insert_from_peer(*src, net("192.0.2.0/24"), attrs_with_path(path), 0, 0);
            }
            rib.withdraw(
                match rib.lookup(&Ipv4Addr::new(192, 0, 2, 1)) {
                    Some(best) => best.src_router_id,
                    None => peer(9),
                },
                net("192.0.2.0/24"),
            );
            rib.lookup(&Ipv4Addr::new(192, 0, 2, 1)).unwrap().src_router_id
        };

        let a: &[u32] = &[65001];
        let b: &[u32] = &[65009];
        let c: &[u32] = &[65005, 65006];
        let forward = build(&[(peer(1), a), (peer(2), b), (peer(3), c)]);
        let backward = build(&[(peer(3), c), (peer(2), b), (peer(1), a)]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_insert_many_reports_newly_best() {
        let rib = Rib4::new();
        let attrs = attrs_with_path(&[65001]);

        // pre-seed one prefix with a better (higher weight) route
        rib.insert_from_peer(peer(2), net("192.0.2.0/24"), attrs_with_path(&[65002]), 50, 0);

        let newly_best = rib.insert_many_from_peer(
            peer(1),
            &[net("192.0.2.0/24"), net("198.51.100.0/24")],
            attrs,
            0,
            0,
        );
        assert_eq!(newly_best, vec![net("198.51.100.0/24")]);

        // both inserted entries share one update group
        let a = rib.get(&net("192.0.2.0/24"), peer(1)).unwrap();
        let b = rib.get(&net("198.51.100.0/24"), peer(1)).unwrap();
        assert_eq!(a.update_group, b.update_group);
    }

    #[test]
    fn test_rib6_local_insert_nexthop() {
        use std::net::Ipv6Addr;

        let rib = Rib6::new();
        let prefix = Ipv6Net::from_str("2001:db8::/32").unwrap();
        let nexthop = MpNextHop::Ipv6(Ipv6Addr::from_str("fc00::1").unwrap());
        let entry = rib.insert_local(prefix, nexthop, 0).unwrap();
        assert_eq!(entry.next_hop(), Some(nexthop));
        assert_eq!(rib.lookup(&Ipv6Addr::from_str("2001:db8::42").unwrap()), Some(entry));
    }
}
