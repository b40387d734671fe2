//! End-to-end session scenarios: two state machines wired back to back
//! through byte queues, exchanging real serialized messages.
use bgp_speaker::bus::RouteEvent;
use bgp_speaker::error::{BgpErrorCode, CeaseSubcode, UpdateSubcode};
use bgp_speaker::models::*;
use bgp_speaker::parser::bgp::messages::encode_message;
use bgp_speaker::rib::LOCAL_SRC_ID;
use bgp_speaker::session::{
    BgpFsm, BgpState, Clock, MessageSink, OutHandler, SessionConfig,
};
use bgp_speaker::{RouteEventBus, FilterMode, FilterOp, FilterRule};
use ipnet::{Ipv4Net, Ipv6Net};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Queues serialized messages instead of delivering them inline; the
/// tests pump the queues between the two machines (the out handler must
/// not re-enter the FSM that called it).
#[derive(Default)]
struct PipeOut {
    buf: Mutex<Vec<u8>>,
}

impl OutHandler for PipeOut {
    fn handle_out(&self, buf: &[u8]) -> bool {
        self.buf.lock().unwrap().extend_from_slice(buf);
        true
    }
}

impl PipeOut {
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buf.lock().unwrap())
    }
}

#[derive(Default)]
struct FakeClock(AtomicU64);

impl Clock for FakeClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl FakeClock {
    fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::Relaxed);
    }
}

struct Speaker {
    fsm: Arc<BgpFsm>,
    out: Arc<PipeOut>,
    bus: Arc<RouteEventBus>,
    clock: Arc<FakeClock>,
}

fn speaker(asn: u32, last_octet: u8, tweak: impl FnOnce(&mut SessionConfig)) -> Speaker {
    let _ = env_logger::builder().is_test(true).try_init();

    let out = Arc::new(PipeOut::default());
    let bus = Arc::new(RouteEventBus::new());
    let clock = Arc::new(FakeClock::default());
    clock.advance(1_000);

    let router_id = Ipv4Addr::new(10, 0, 0, last_octet);
    let mut config = SessionConfig::new(asn, router_id, out.clone());
    config.peering_lan4 = Ipv4Net::from_str("10.0.0.0/24").unwrap();
    config.default_nexthop4 = router_id;
    config.rev_bus = Some(bus.clone());
    config.clock = Some(clock.clone());
    tweak(&mut config);

    Speaker {
        fsm: BgpFsm::new(config),
        out,
        bus,
        clock,
    }
}

/// Shuttles queued bytes between the two machines until both go quiet.
fn pump(a: &Speaker, b: &Speaker) {
    loop {
        let from_a = a.out.take();
        let from_b = b.out.take();
        if from_a.is_empty() && from_b.is_empty() {
            break;
        }
        if !from_a.is_empty() {
            b.fsm.run(&from_a).unwrap();
        }
        if !from_b.is_empty() {
            a.fsm.run(&from_b).unwrap();
        }
    }
}

fn establish(a: &Speaker, b: &Speaker) {
    a.fsm.start().unwrap();
    pump(a, b);
    assert_eq!(a.fsm.state(), BgpState::Established);
    assert_eq!(b.fsm.state(), BgpState::Established);
}

fn parse_frames(bytes: &[u8], four_byte: bool) -> Vec<BgpMessage> {
    let mut sink = MessageSink::default();
    sink.fill(bytes).unwrap();
    let mut messages = Vec::new();
    while let Some(msg) = sink.pour(four_byte).unwrap() {
        messages.push(msg);
    }
    messages
}

fn net4(s: &str) -> Ipv4Net {
    Ipv4Net::from_str(s).unwrap()
}

#[test]
fn session_establishes_both_sides() {
    let a = speaker(65000, 1, |_| {});
    let b = speaker(65001, 2, |_| {});
    establish(&a, &b);

    assert_eq!(a.fsm.peer_bgp_id(), Ipv4Addr::new(10, 0, 0, 2));
    assert_eq!(b.fsm.peer_bgp_id(), Ipv4Addr::new(10, 0, 0, 1));
    assert_eq!(a.fsm.peer_asn(), Asn::new_32bit(65001));
    assert_eq!(b.fsm.peer_asn(), Asn::new_32bit(65000));
    assert_eq!(a.fsm.hold_timer(), 120);
}

#[test]
fn open_carries_as_trans_and_capability() {
    let a = speaker(396303, 1, |config| {
        config.hold_timer = 120;
    });
    a.fsm.start().unwrap();

    let frames = parse_frames(&a.out.take(), false);
    assert_eq!(frames.len(), 1);
    match &frames[0] {
        BgpMessage::Open(open) => {
            assert_eq!(open.asn, 23456);
            assert_eq!(open.hold_time, 120);
            assert_eq!(open.bgp_id, Ipv4Addr::new(10, 0, 0, 1));
            assert_eq!(open.true_asn(), Asn::new_32bit(396303));
        }
        other => panic!("expected OPEN, got {other:?}"),
    }
}

#[test]
fn local_route_propagates_and_withdraws() {
    let a = speaker(65000, 1, |_| {});
    let b = speaker(65001, 2, |_| {});
    establish(&a, &b);

    let prefix = net4("172.30.0.0/24");
    let entry = a
        .fsm
        .rib4()
        .insert_local(prefix, Ipv4Addr::new(10, 0, 0, 1), 0)
        .unwrap();
    a.bus.publish(
        None,
        &RouteEvent::Add4 {
            attributes: entry.attributes.clone(),
            prefixes: vec![prefix],
        },
    );
    pump(&a, &b);

    assert_eq!(b.fsm.rib4().len(), 1);
    let learned = b
        .fsm
        .rib4()
        .get(&prefix, Ipv4Addr::new(10, 0, 0, 1))
        .expect("B should have learned the route from A");
    assert_eq!(learned.src_router_id, a.fsm.router_id());
    assert_eq!(
        learned.attributes.as_path(),
        Some(&AsPath::from_sequence([65000]))
    );
    assert_eq!(learned.attributes.next_hop(), Some(Ipv4Addr::new(10, 0, 0, 1)));
    assert_eq!(
        b.fsm.rib4().lookup(&Ipv4Addr::new(172, 30, 0, 77)).unwrap().prefix,
        prefix
    );

    // withdraw on A, B's table empties again
    a.fsm.rib4().withdraw(LOCAL_SRC_ID, prefix);
    a.bus.publish(
        None,
        &RouteEvent::Withdraw4 {
            prefixes: vec![prefix],
        },
    );
    pump(&a, &b);

    assert!(b.fsm.rib4().get(&prefix, Ipv4Addr::new(10, 0, 0, 1)).is_none());
    assert!(b.fsm.rib4().is_empty());
}

#[test]
fn rib_dump_on_establishment() {
    let a = speaker(65000, 1, |_| {});
    let b = speaker(65001, 2, |_| {});

    a.fsm
        .rib4()
        .insert_local(net4("172.30.0.0/24"), Ipv4Addr::new(10, 0, 0, 1), 0)
        .unwrap();
    a.fsm
        .rib4()
        .insert_local(net4("172.30.1.0/24"), Ipv4Addr::new(10, 0, 0, 1), 0)
        .unwrap();

    establish(&a, &b);

    // both prefixes share a nexthop, hence one update group; B learned both
    assert_eq!(b.fsm.rib4().len(), 2);
    assert!(b
        .fsm
        .rib4()
        .get(&net4("172.30.1.0/24"), Ipv4Addr::new(10, 0, 0, 1))
        .is_some());
}

#[test]
fn egress_filter_limits_announcements() {
    let a = speaker(65000, 1, |config| {
        config
            .out_filters4
            .append(FilterRule::new(
                FilterMode::Loose,
                FilterOp::Reject,
                net4("172.30.1.0/24"),
            ));
    });
    let b = speaker(65001, 2, |_| {});

    a.fsm
        .rib4()
        .insert_local(net4("172.30.0.0/24"), Ipv4Addr::new(10, 0, 0, 1), 0)
        .unwrap();
    a.fsm
        .rib4()
        .insert_local(net4("172.30.1.0/24"), Ipv4Addr::new(10, 0, 0, 1), 0)
        .unwrap();

    establish(&a, &b);

    assert_eq!(b.fsm.rib4().len(), 1);
    assert!(b
        .fsm
        .rib4()
        .get(&net4("172.30.0.0/24"), Ipv4Addr::new(10, 0, 0, 1))
        .is_some());
}

#[test]
fn ingress_filter_reject_all_with_strict_exception() {
    let b = speaker(65001, 2, |config| {
        config
            .in_filters4
            .append(FilterRule::new(
                FilterMode::Loose,
                FilterOp::Reject,
                net4("0.0.0.0/0"),
            ))
            .append(FilterRule::new(
                FilterMode::Strict,
                FilterOp::Accept,
                net4("172.17.0.0/24"),
            ));
    });
    let a = speaker(65000, 1, |_| {});

    for prefix in ["10.1.0.0/24", "172.17.0.0/26", "172.17.0.0/24"] {
        a.fsm
            .rib4()
            .insert_local(net4(prefix), Ipv4Addr::new(10, 0, 0, 1), 0)
            .unwrap();
    }

    establish(&a, &b);

    assert_eq!(b.fsm.rib4().len(), 1);
    assert!(b
        .fsm
        .rib4()
        .get(&net4("172.17.0.0/24"), Ipv4Addr::new(10, 0, 0, 1))
        .is_some());
}

#[test]
fn hold_timer_expiry_and_keepalive() {
    let a = speaker(65000, 1, |_| {});
    let b = speaker(65001, 2, |_| {});
    establish(&a, &b);
    a.out.take();

    // 41 seconds of silence: past hold/3, a keepalive goes out
    a.clock.advance(41);
    assert_eq!(a.fsm.tick().unwrap(), BgpState::Established);
    let frames = parse_frames(&a.out.take(), false);
    assert_eq!(frames, vec![BgpMessage::KeepAlive]);

    // 121 total seconds without peer traffic: hold timer expires
    a.clock.advance(80);
    assert_eq!(a.fsm.tick().unwrap(), BgpState::Idle);
    let frames = parse_frames(&a.out.take(), false);
    match &frames[..] {
        [BgpMessage::Notification(notification)] => {
            assert_eq!(notification.error.code, BgpErrorCode::HoldTimerExpired);
        }
        other => panic!("expected hold-expiry notification, got {other:?}"),
    }
}

#[test]
fn update_without_origin_resets_session() {
    let a = speaker(65000, 1, |_| {});
    let b = speaker(65001, 2, |_| {});
    establish(&a, &b);
    b.out.take();

    // hand-build an UPDATE that announces NLRI without ORIGIN
    let attributes: Attributes = [
        AttributeValue::AsPath {
            path: AsPath::from_sequence([65000]),
            is_as4: false,
        },
        AttributeValue::NextHop(Ipv4Addr::new(10, 0, 0, 1)),
    ]
    .into_iter()
    .collect();
    let update = BgpUpdateMessage {
        withdrawn: vec![],
        attributes,
        announced: vec![net4("192.0.2.0/24")],
    };
    let bytes = encode_message(&BgpMessage::Update(update), AsnLength::Bits32).unwrap();

    assert_eq!(b.fsm.run(&bytes).unwrap(), BgpState::Idle);
    let frames = parse_frames(&b.out.take(), false);
    match &frames[..] {
        [BgpMessage::Notification(notification)] => {
            assert_eq!(notification.error.code, BgpErrorCode::Update);
            assert_eq!(
                notification.error.subcode,
                u8::from(UpdateSubcode::MissingWellKnownAttribute)
            );
        }
        other => panic!("expected notification, got {other:?}"),
    }
}

#[test]
fn four_byte_asn_downgrades_toward_two_byte_peer() {
    let a = speaker(396303, 1, |_| {});
    let b = speaker(65001, 2, |config| {
        config.use_4b_asn = false;
    });
    establish(&a, &b);

    let prefix = net4("172.30.0.0/24");
    let entry = a
        .fsm
        .rib4()
        .insert_local(prefix, Ipv4Addr::new(10, 0, 0, 1), 0)
        .unwrap();
    a.bus.publish(
        None,
        &RouteEvent::Add4 {
            attributes: entry.attributes.clone(),
            prefixes: vec![prefix],
        },
    );

    // capture the wire form before delivering it: AS_PATH must carry
    // AS_TRANS with the true path in AS4_PATH
    let wire = a.out.take();
    let frames = parse_frames(&wire, false);
    match &frames[..] {
        [BgpMessage::Update(update)] => {
            assert_eq!(
                update.attributes.as_path(),
                Some(&AsPath::from_sequence([23456]))
            );
            assert_eq!(
                update.attributes.as4_path(),
                Some(&AsPath::from_sequence([396303]))
            );
        }
        other => panic!("expected update, got {other:?}"),
    }

    b.fsm.run(&wire).unwrap();
    pump(&a, &b);

    // B restored the four-octet path and dropped AS4_PATH
    let learned = b.fsm.rib4().get(&prefix, Ipv4Addr::new(10, 0, 0, 1)).unwrap();
    assert_eq!(
        learned.attributes.as_path(),
        Some(&AsPath::from_sequence([396303]))
    );
    assert!(learned.attributes.as4_path().is_none());
}

#[test]
fn ipv6_unicast_over_mp_bgp() {
    let tweak6 = |config: &mut SessionConfig| {
        config.mp_bgp_ipv6 = true;
        config.peering_lan6 = Ipv6Net::from_str("fc00::/64").unwrap();
    };
    let a = speaker(65000, 1, |config| {
        tweak6(config);
        config.default_nexthop6_global = Ipv6Addr::from_str("fc00::1").unwrap();
    });
    let b = speaker(65001, 2, |config| {
        tweak6(config);
        config.default_nexthop6_global = Ipv6Addr::from_str("fc00::2").unwrap();
    });

    let prefix = Ipv6Net::from_str("2001:db8::/32").unwrap();
    a.fsm
        .rib6()
        .insert_local(
            prefix,
            MpNextHop::Ipv6(Ipv6Addr::from_str("fc00::1").unwrap()),
            0,
        )
        .unwrap();

    establish(&a, &b);

    let learned = b
        .fsm
        .rib6()
        .get(&prefix, Ipv4Addr::new(10, 0, 0, 1))
        .expect("B should have learned the v6 route over MP-BGP");
    assert_eq!(
        learned.next_hop(),
        Some(MpNextHop::Ipv6(Ipv6Addr::from_str("fc00::1").unwrap()))
    );
    assert_eq!(
        learned.attributes.as_path(),
        Some(&AsPath::from_sequence([65000]))
    );

    // withdrawal travels inside MP_UNREACH_NLRI
    a.fsm.rib6().withdraw(LOCAL_SRC_ID, prefix);
    a.bus.publish(
        None,
        &RouteEvent::Withdraw6 {
            prefixes: vec![prefix],
        },
    );
    pump(&a, &b);
    assert!(b.fsm.rib6().is_empty());
}

/// Two co-hosted sessions contending for the same peer: exactly one ends
/// up Idle with Cease/Collision Resolution.
#[test]
fn open_collision_resolves_to_single_winner() {
    let bus = Arc::new(RouteEventBus::new());

    let build = |last_octet: u8, bus: &Arc<RouteEventBus>| {
        let out = Arc::new(PipeOut::default());
        let mut config =
            SessionConfig::new(65000, Ipv4Addr::new(10, 0, 0, last_octet), out.clone());
        config.peering_lan4 = Ipv4Net::from_str("10.0.0.0/24").unwrap();
        config.default_nexthop4 = Ipv4Addr::new(10, 0, 0, last_octet);
        config.rev_bus = Some(bus.clone());
        (BgpFsm::new(config), out)
    };
    let (first, first_out) = build(200, &bus);
    let (second, second_out) = build(201, &bus);

    // the peer's OPEN, fed to both sessions
    let peer_open = BgpOpenMessage::new(
        true,
        Asn::new_32bit(65001),
        120,
        Ipv4Addr::new(10, 0, 0, 50),
        &[],
    );
    let open_bytes = encode_message(&BgpMessage::Open(peer_open), AsnLength::Bits16).unwrap();

    // first session reaches OpenConfirm with the peer
    first.start().unwrap();
    first_out.take();
    first.run(&open_bytes).unwrap();
    assert_eq!(first.state(), BgpState::OpenConfirm);

    // the same peer now opens a second session; the first one holds the
    // higher router id (10.0.0.200 > 10.0.0.50) and survives
    second.run(&open_bytes).unwrap();
    assert_eq!(second.state(), BgpState::Idle);
    assert_eq!(first.state(), BgpState::OpenConfirm);

    let frames = parse_frames(&second_out.take(), false);
    match &frames[..] {
        [BgpMessage::Notification(notification)] => {
            assert_eq!(notification.error.code, BgpErrorCode::Cease);
            assert_eq!(
                notification.error.subcode,
                u8::from(CeaseSubcode::ConnectionCollisionResolution)
            );
        }
        other => panic!("expected cease notification, got {other:?}"),
    }
}

/// The losing side of the comparison is the established session when the
/// peer id outranks it.
#[test]
fn open_collision_yields_to_higher_peer_id() {
    let bus = Arc::new(RouteEventBus::new());

    let build = |last_octet: u8| {
        let out = Arc::new(PipeOut::default());
        let mut config =
            SessionConfig::new(65000, Ipv4Addr::new(10, 0, 0, last_octet), out.clone());
        config.peering_lan4 = Ipv4Net::from_str("10.0.0.0/24").unwrap();
        config.default_nexthop4 = Ipv4Addr::new(10, 0, 0, last_octet);
        config.rev_bus = Some(bus.clone());
        (BgpFsm::new(config), out)
    };
    let (first, first_out) = build(20);
    let (second, _second_out) = build(21);

    let peer_open = BgpOpenMessage::new(
        true,
        Asn::new_32bit(65001),
        120,
        Ipv4Addr::new(10, 0, 0, 99),
        &[],
    );
    let open_bytes = encode_message(&BgpMessage::Open(peer_open), AsnLength::Bits16).unwrap();

    first.start().unwrap();
    first.run(&open_bytes).unwrap();
    assert_eq!(first.state(), BgpState::OpenConfirm);
    first_out.take();

    // 10.0.0.20 < 10.0.0.99: the confirmed session cedes to the new one
    second.run(&open_bytes).unwrap();
    assert_eq!(first.state(), BgpState::Idle);
    assert_eq!(second.state(), BgpState::OpenConfirm);

    let frames = parse_frames(&first_out.take(), false);
    assert!(matches!(
        &frames[..],
        [BgpMessage::Notification(n)] if n.error.code == BgpErrorCode::Cease
    ));
}

#[test]
fn open_with_unacceptable_hold_time_is_rejected() {
    use bgp_speaker::error::OpenSubcode;

    let b = speaker(65001, 2, |_| {});
    let peer_open = BgpOpenMessage {
        version: 4,
        asn: 65000,
        hold_time: 2, // 1 and 2 are illegal; only 0 or >= 3
        bgp_id: Ipv4Addr::new(10, 0, 0, 1),
        opt_params: vec![],
    };
    let bytes = encode_message(&BgpMessage::Open(peer_open), AsnLength::Bits16).unwrap();

    assert_eq!(b.fsm.run(&bytes).unwrap(), BgpState::Idle);
    let frames = parse_frames(&b.out.take(), false);
    match &frames[..] {
        [BgpMessage::Notification(notification)] => {
            assert_eq!(notification.error.code, BgpErrorCode::Open);
            assert_eq!(
                notification.error.subcode,
                u8::from(OpenSubcode::UnacceptableHoldTime)
            );
        }
        other => panic!("expected notification, got {other:?}"),
    }
}

#[test]
fn stop_sends_administrative_shutdown() {
    let a = speaker(65000, 1, |_| {});
    let b = speaker(65001, 2, |_| {});
    establish(&a, &b);
    a.out.take();

    a.fsm.stop().unwrap();
    assert_eq!(a.fsm.state(), BgpState::Idle);
    let frames = parse_frames(&a.out.take(), false);
    match &frames[..] {
        [BgpMessage::Notification(notification)] => {
            assert_eq!(notification.error.code, BgpErrorCode::Cease);
            assert_eq!(
                notification.error.subcode,
                u8::from(CeaseSubcode::AdministrativeShutdown)
            );
        }
        other => panic!("expected cease notification, got {other:?}"),
    }

    // peer learns of the shutdown and discards state
    pump(&a, &b);
    assert_eq!(b.fsm.state(), BgpState::Idle);
}

#[test]
fn out_handler_failure_breaks_fsm() {
    struct FailingOut;
    impl OutHandler for FailingOut {
        fn handle_out(&self, _buf: &[u8]) -> bool {
            false
        }
    }

    let config = SessionConfig::new(65000, Ipv4Addr::new(10, 0, 0, 1), Arc::new(FailingOut));
    let fsm = BgpFsm::new(config);
    assert_eq!(fsm.start(), Err(bgp_speaker::session::FsmError::Broken));
    assert_eq!(fsm.state(), BgpState::Broken);

    // hard reset is the only way back
    fsm.reset_hard();
    assert_eq!(fsm.state(), BgpState::Idle);
}

#[test]
fn as_loop_is_ignored_on_ingress() {
    let a = speaker(65000, 1, |_| {});
    let b = speaker(65001, 2, |_| {});
    establish(&a, &b);

    // an announcement whose path already contains B's ASN
    let attributes: Attributes = [
        AttributeValue::Origin(Origin::IGP),
        AttributeValue::AsPath {
            path: AsPath::from_sequence([65000, 65001]),
            is_as4: false,
        },
        AttributeValue::NextHop(Ipv4Addr::new(10, 0, 0, 1)),
    ]
    .into_iter()
    .collect();
    let update = BgpUpdateMessage {
        withdrawn: vec![],
        attributes,
        announced: vec![net4("192.0.2.0/24")],
    };
    let bytes = encode_message(&BgpMessage::Update(update), AsnLength::Bits32).unwrap();

    assert_eq!(b.fsm.run(&bytes).unwrap(), BgpState::Established);
    assert!(b.fsm.rib4().is_empty());
}

#[test]
fn nexthop_outside_peering_lan_is_ignored() {
    let a = speaker(65000, 1, |_| {});
    let b = speaker(65001, 2, |_| {});
    establish(&a, &b);

    let attributes: Attributes = [
        AttributeValue::Origin(Origin::IGP),
        AttributeValue::AsPath {
            path: AsPath::from_sequence([65000]),
            is_as4: false,
        },
        AttributeValue::NextHop(Ipv4Addr::new(192, 0, 2, 1)), // not in 10.0.0.0/24
    ]
    .into_iter()
    .collect();
    let update = BgpUpdateMessage {
        withdrawn: vec![],
        attributes,
        announced: vec![net4("198.51.100.0/24")],
    };
    let bytes = encode_message(&BgpMessage::Update(update), AsnLength::Bits32).unwrap();

    // soft condition: session stays up, routes are dropped
    assert_eq!(b.fsm.run(&bytes).unwrap(), BgpState::Established);
    assert!(b.fsm.rib4().is_empty());
}
