/*!
In-process pub/sub coupling co-hosted BGP sessions.

Sessions sharing a RIB subscribe to one [`RouteEventBus`]; route additions,
withdrawals, and open-collision probes fan out synchronously to every other
subscriber. A publisher never receives its own event.
*/
use crate::models::Attributes;
use ipnet::{Ipv4Net, Ipv6Net};
use log::debug;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// An event delivered through the bus.
#[derive(Debug, Clone)]
pub enum RouteEvent {
    /// IPv4 routes became reachable; all prefixes share one attribute
    /// bundle.
    Add4 {
        attributes: Arc<Attributes>,
        prefixes: Vec<Ipv4Net>,
    },
    /// IPv4 routes became unreachable.
    Withdraw4 { prefixes: Vec<Ipv4Net> },
    /// IPv6 routes became reachable.
    Add6 {
        attributes: Arc<Attributes>,
        prefixes: Vec<Ipv6Net>,
    },
    /// IPv6 routes became unreachable.
    Withdraw6 { prefixes: Vec<Ipv6Net> },
    /// Probe for open-collision detection: the publisher received an OPEN
    /// from this BGP identifier. A subscriber returns true when it holds
    /// the session that should survive (the publisher then backs off).
    Collision { peer_bgp_id: Ipv4Addr },
}

/// Receives events from a [`RouteEventBus`].
pub trait RouteEventReceiver: Send + Sync {
    /// Handles one event; returns true when the receiver considers the
    /// event handled (only meaningful for [`RouteEvent::Collision`]).
    fn handle_route_event(&self, event: &RouteEvent) -> bool;
}

/// The event bus: an ordered list of weakly-held subscribers, each stamped
/// with a monotonically increasing subscription id.
#[derive(Default)]
pub struct RouteEventBus {
    subscribers: Mutex<Vec<(u64, Weak<dyn RouteEventReceiver>)>>,
    next_id: AtomicU64,
}

impl RouteEventBus {
    pub fn new() -> Self {
        RouteEventBus::default()
    }

    /// Registers a receiver and returns its subscription id. The bus holds
    /// the receiver weakly; a dropped receiver is pruned on the next
    /// publish.
    pub fn subscribe(&self, receiver: Weak<dyn RouteEventReceiver>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.subscribers.lock().unwrap().push((id, receiver));
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|(sub_id, _)| *sub_id != id);
    }

    /// Delivers `event` to every live subscriber except the publisher, in
    /// subscription order, and returns how many reported it handled.
    ///
    /// The subscriber list is snapshotted before delivery so a handler may
    /// publish follow-up events without deadlocking.
    pub fn publish(&self, publisher: Option<u64>, event: &RouteEvent) -> usize {
        let targets: Vec<(u64, Weak<dyn RouteEventReceiver>)> = self
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| Some(*id) != publisher)
            .cloned()
            .collect();

        let mut handled = 0;
        let mut dead: Vec<u64> = Vec::new();
        for (id, weak) in targets {
            match weak.upgrade() {
                Some(receiver) => {
                    if receiver.handle_route_event(event) {
                        handled += 1;
                    }
                }
                None => dead.push(id),
            }
        }

        if !dead.is_empty() {
            debug!("pruning {} dead bus subscriber(s)", dead.len());
            self.subscribers
                .lock()
                .unwrap()
                .retain(|(id, _)| !dead.contains(id));
        }

        handled
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        seen: AtomicUsize,
        report_handled: bool,
    }

    impl Counter {
        fn new(report_handled: bool) -> Arc<Self> {
            Arc::new(Counter {
                seen: AtomicUsize::new(0),
                report_handled,
            })
        }
    }

    impl RouteEventReceiver for Counter {
        fn handle_route_event(&self, _event: &RouteEvent) -> bool {
            self.seen.fetch_add(1, Ordering::Relaxed);
            self.report_handled
        }
    }

    fn collision() -> RouteEvent {
        RouteEvent::Collision {
            peer_bgp_id: Ipv4Addr::new(10, 0, 0, 1),
        }
    }

    #[test]
    fn test_publisher_not_delivered_to_itself() {
        let bus = RouteEventBus::new();
        let a = Counter::new(false);
        let b = Counter::new(false);
        let id_a = bus.subscribe(Arc::downgrade(&a) as Weak<dyn RouteEventReceiver>);
        let _id_b = bus.subscribe(Arc::downgrade(&b) as Weak<dyn RouteEventReceiver>);

        bus.publish(Some(id_a), &collision());
        assert_eq!(a.seen.load(Ordering::Relaxed), 0);
        assert_eq!(b.seen.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_handled_count() {
        let bus = RouteEventBus::new();
        let a = Counter::new(true);
        let b = Counter::new(false);
        let c = Counter::new(true);
        for receiver in [&a, &b, &c] {
            bus.subscribe(Arc::downgrade(receiver) as Weak<dyn RouteEventReceiver>);
        }
        assert_eq!(bus.publish(None, &collision()), 2);
    }

    #[test]
    fn test_dead_subscribers_pruned() {
        let bus = RouteEventBus::new();
        let a = Counter::new(false);
        bus.subscribe(Arc::downgrade(&a) as Weak<dyn RouteEventReceiver>);
        {
            let short_lived = Counter::new(false);
            bus.subscribe(Arc::downgrade(&short_lived) as Weak<dyn RouteEventReceiver>);
            assert_eq!(bus.subscriber_count(), 2);
        }
        bus.publish(None, &collision());
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = RouteEventBus::new();
        let a = Counter::new(false);
        let id = bus.subscribe(Arc::downgrade(&a) as Weak<dyn RouteEventReceiver>);
        bus.unsubscribe(id);
        bus.publish(None, &collision());
        assert_eq!(a.seen.load(Ordering::Relaxed), 0);
    }
}
