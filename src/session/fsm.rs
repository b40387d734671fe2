/*!
The per-session finite state machine.

A [`BgpFsm`] owns no sockets and no threads: the host feeds it received
bytes through [`BgpFsm::run`], drives time with [`BgpFsm::tick`], and
receives outbound messages through its [`OutHandler`]. Several FSMs can
share a RIB and a [`RouteEventBus`]; routes learned on one session then
propagate to the others.

State lives behind internal mutexes, so all operations take `&self` and
the host may call `run`, `tick`, and bus publishes from different threads.
The out-handler callback must never feed bytes back into the FSM that
invoked it (queue them and deliver from the host loop instead).
*/
use crate::bus::{RouteEvent, RouteEventBus, RouteEventReceiver};
use crate::error::{BgpError, CeaseSubcode, FsmSubcode, OpenSubcode, UpdateSubcode};
use crate::filter::{FilterOp, FilterRules};
use crate::models::*;
use crate::rib::{Rib4, Rib6, RibEntry, RibPrefix, WithdrawOutcome};
use crate::session::{
    BgpState, Clock, FsmError, MessageSink, RealtimeClock, SessionConfig,
};
use ipnet::{Ipv4Net, Ipv6Net};
use itertools::Itertools;
use log::{debug, error, info, warn};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Mutex, OnceLock};

/// Mutable session state, guarded by one mutex.
struct FsmCore {
    state: BgpState,
    /// Negotiated hold time, `min(local, remote)`; 0 disables timers.
    hold_timer: u16,
    peer_bgp_id: Ipv4Addr,
    /// Peer's true ASN as negotiated at OPEN.
    peer_asn: Asn,
    /// Four-octet ASNs active on the wire (both sides advertised it).
    use_4b_asn: bool,
    /// IPv4 unicast exchange active.
    send_ipv4: bool,
    /// IPv6 unicast exchange active (MP-BGP negotiated both ways).
    send_ipv6: bool,
    last_recv: u64,
    last_sent: u64,
}

/// A BGP-4 session state machine. Construct with [`BgpFsm::new`].
pub struct BgpFsm {
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    rib4: Arc<Rib4>,
    rib6: Arc<Rib6>,
    bus: Option<Arc<RouteEventBus>>,
    sub_id: OnceLock<u64>,
    core: Mutex<FsmCore>,
    sink: Mutex<MessageSink>,
    /// Serializes out-handler invocations.
    out_lock: Mutex<()>,
}

impl BgpFsm {
    /// Builds the FSM and, when a bus is configured, subscribes to it.
    /// The subscription is dropped again when the FSM is dropped.
    pub fn new(config: SessionConfig) -> Arc<BgpFsm> {
        let clock = config
            .clock
            .clone()
            .unwrap_or_else(|| Arc::new(RealtimeClock));
        let rib4 = config.rib4.clone().unwrap_or_default();
        let rib6 = config.rib6.clone().unwrap_or_default();
        let bus = config.rev_bus.clone();

        let fsm = Arc::new(BgpFsm {
            config,
            clock,
            rib4,
            rib6,
            bus,
            sub_id: OnceLock::new(),
            core: Mutex::new(FsmCore {
                state: BgpState::Idle,
                hold_timer: 0,
                peer_bgp_id: Ipv4Addr::UNSPECIFIED,
                peer_asn: Asn::RESERVED,
                use_4b_asn: false,
                send_ipv4: true,
                send_ipv6: false,
                last_recv: 0,
                last_sent: 0,
            }),
            sink: Mutex::new(MessageSink::default()),
            out_lock: Mutex::new(()),
        });

        if let Some(bus) = &fsm.bus {
            let weak = Arc::downgrade(&fsm);
            let id = bus.subscribe(weak);
            let _ = fsm.sub_id.set(id);
        }
        fsm
    }

    pub fn state(&self) -> BgpState {
        self.core.lock().unwrap().state
    }

    pub fn router_id(&self) -> Ipv4Addr {
        self.config.router_id
    }

    pub fn local_asn(&self) -> Asn {
        Asn::new_32bit(self.config.asn)
    }

    pub fn peer_bgp_id(&self) -> Ipv4Addr {
        self.core.lock().unwrap().peer_bgp_id
    }

    pub fn peer_asn(&self) -> Asn {
        self.core.lock().unwrap().peer_asn
    }

    pub fn hold_timer(&self) -> u16 {
        self.core.lock().unwrap().hold_timer
    }

    pub fn rib4(&self) -> &Arc<Rib4> {
        &self.rib4
    }

    pub fn rib6(&self) -> &Arc<Rib6> {
        &self.rib6
    }

    /// Opens the session actively: sends OPEN and moves to OpenSent.
    pub fn start(&self) -> Result<(), FsmError> {
        let mut core = self.core.lock().unwrap();
        match core.state {
            BgpState::Broken => return Err(FsmError::Broken),
            BgpState::Idle => {}
            state => return Err(FsmError::InvalidState(state)),
        }

        info!("start: sending OPEN message to peer");
        let open = BgpOpenMessage::new(
            self.config.use_4b_asn,
            self.local_asn(),
            self.config.hold_timer,
            self.config.router_id,
            &self.mp_families(),
        );
        self.set_state(&mut core, BgpState::OpenSent);
        self.write_message(&mut core, &BgpMessage::Open(open))
    }

    /// Orderly shutdown from Established: sends Cease/Administrative
    /// Shutdown and goes Idle. A no-op in Idle.
    pub fn stop(&self) -> Result<(), FsmError> {
        let mut core = self.core.lock().unwrap();
        match core.state {
            BgpState::Broken => return Err(FsmError::Broken),
            BgpState::Idle => return Ok(()),
            BgpState::Established => {}
            state => return Err(FsmError::InvalidState(state)),
        }

        info!("stop: de-peering");
        self.notify_and_idle(
            &mut core,
            BgpError::cease(CeaseSubcode::AdministrativeShutdown),
        )
    }

    /// Feeds received transport bytes in and processes every complete
    /// message buffered so far. Returns the state after processing.
    pub fn run(&self, data: &[u8]) -> Result<BgpState, FsmError> {
        let mut core = self.core.lock().unwrap();
        if core.state == BgpState::Broken {
            return Err(FsmError::Broken);
        }

        if self.sink.lock().unwrap().fill(data).is_err() {
            error!("run: sink overflow");
            self.set_state(&mut core, BgpState::Broken);
            return Err(FsmError::Broken);
        }

        if !self.config.no_autotick && self.tick_core(&mut core)? {
            return Ok(core.state);
        }
        core.last_recv = self.clock.now();

        loop {
            let poured = self.sink.lock().unwrap().pour(core.use_4b_asn);
            match poured {
                Ok(None) => break,
                Ok(Some(msg)) => self.handle_message(&mut core, msg)?,
                Err(sink_err) => {
                    if sink_err.msg_type == Some(BgpMessageType::Notification) {
                        // a malformed NOTIFICATION is not answered with
                        // another notification
                        error!("run: got invalid NOTIFICATION message");
                        self.set_state(&mut core, BgpState::Idle);
                    } else {
                        error!("run: message error: {}", sink_err.error);
                        self.notify_and_idle(&mut core, sink_err.error)?;
                    }
                    break;
                }
            }
        }

        Ok(core.state)
    }

    /// Advances timers. The host must call this at least once per second
    /// (unless every `run` call already does, see
    /// [`SessionConfig::no_autotick`]).
    pub fn tick(&self) -> Result<BgpState, FsmError> {
        let mut core = self.core.lock().unwrap();
        if core.state == BgpState::Broken {
            return Err(FsmError::Broken);
        }
        self.tick_core(&mut core)?;
        Ok(core.state)
    }

    /// Sends Cease/Administrative Reset, then performs the hard reset.
    pub fn reset_soft(&self) -> Result<(), FsmError> {
        {
            let mut core = self.core.lock().unwrap();
            let notify =
                BgpMessage::Notification(BgpError::cease(CeaseSubcode::AdministrativeReset).into());
            self.write_message(&mut core, &notify)?;
        }
        self.reset_hard();
        Ok(())
    }

    /// Forces the session back to Idle and drains the sink. This is also
    /// the only way out of [`BgpState::Broken`].
    pub fn reset_hard(&self) {
        let mut core = self.core.lock().unwrap();
        self.sink.lock().unwrap().drain();
        self.set_state(&mut core, BgpState::Idle);
    }

    fn mp_families(&self) -> Vec<(Afi, Safi)> {
        let mut families = Vec::new();
        if self.config.mp_bgp_ipv4 {
            families.push((Afi::Ipv4, Safi::Unicast));
        }
        if self.config.mp_bgp_ipv6 {
            families.push((Afi::Ipv6, Safi::Unicast));
        }
        families
    }

    fn is_ibgp(&self, core: &FsmCore) -> bool {
        core.peer_asn != Asn::RESERVED && core.peer_asn.to_u32() == self.config.asn
    }

    fn publish_event(&self, event: RouteEvent) -> usize {
        match &self.bus {
            Some(bus) => bus.publish(self.sub_id.get().copied(), &event),
            None => 0,
        }
    }

    fn tick_core(&self, core: &mut FsmCore) -> Result<bool, FsmError> {
        if core.state != BgpState::Established || core.hold_timer == 0 {
            return Ok(false);
        }

        let now = self.clock.now();
        if now.saturating_sub(core.last_recv) > core.hold_timer as u64 {
            error!("tick: peer hold timer expired");
            self.notify_and_idle(core, BgpError::hold_timer_expired())?;
            return Ok(true);
        }
        if now.saturating_sub(core.last_sent) > (core.hold_timer / 3) as u64 {
            self.write_message(core, &BgpMessage::KeepAlive)?;
        }
        Ok(false)
    }

    fn handle_message(&self, core: &mut FsmCore, msg: BgpMessage) -> Result<(), FsmError> {
        debug!("got {:?} message in state {}", msg.msg_type(), core.state);

        if let BgpMessage::Notification(notification) = &msg {
            error!("got NOTIFICATION: {}", notification.error);
            if core.state == BgpState::Established {
                error!("discarding all routes learned from peer");
            }
            self.set_state(core, BgpState::Idle);
            return Ok(());
        }

        match (core.state, msg) {
            (BgpState::Idle, BgpMessage::Open(open)) => {
                if self.open_recv(core, &open)? {
                    // passive open: answer with our OPEN and confirm
                    let reply = BgpOpenMessage::new(
                        core.use_4b_asn,
                        self.local_asn(),
                        core.hold_timer,
                        self.config.router_id,
                        &self.mp_families(),
                    );
                    self.set_state(core, BgpState::OpenConfirm);
                    self.write_message(core, &BgpMessage::Open(reply))?;
                    self.write_message(core, &BgpMessage::KeepAlive)?;
                }
                Ok(())
            }
            (BgpState::Idle, _) => {
                error!("got non-OPEN message in Idle state");
                Ok(())
            }
            (BgpState::OpenSent, BgpMessage::Open(open)) => {
                if self.open_recv(core, &open)? {
                    self.set_state(core, BgpState::OpenConfirm);
                    self.write_message(core, &BgpMessage::KeepAlive)?;
                }
                Ok(())
            }
            (BgpState::OpenSent, _) => {
                error!("got non-OPEN message in OpenSent state");
                self.notify_and_idle(core, BgpError::fsm(FsmSubcode::UnexpectedInOpenSent))
            }
            (BgpState::OpenConfirm, BgpMessage::KeepAlive) => {
                self.set_state(core, BgpState::Established);
                self.write_message(core, &BgpMessage::KeepAlive)?;
                self.dump_rib(core)
            }
            (BgpState::OpenConfirm, _) => {
                error!("got non-KEEPALIVE message in OpenConfirm state");
                self.notify_and_idle(core, BgpError::fsm(FsmSubcode::UnexpectedInOpenConfirm))
            }
            (BgpState::Established, BgpMessage::KeepAlive) => Ok(()),
            (BgpState::Established, BgpMessage::Update(update)) => {
                self.process_update(core, update)
            }
            (BgpState::Established, _) => {
                error!("got unexpected message in Established state");
                self.notify_and_idle(core, BgpError::fsm(FsmSubcode::UnexpectedInEstablished))
            }
            (BgpState::Broken, _) => Err(FsmError::Broken),
        }
    }

    /// Validates a received OPEN and negotiates session parameters.
    /// Returns false when the open was rejected (a notification has been
    /// sent and the session is back in Idle).
    fn open_recv(&self, core: &mut FsmCore, open: &BgpOpenMessage) -> Result<bool, FsmError> {
        if open.version != 4 {
            self.notify_and_idle(core, BgpError::open(OpenSubcode::UnsupportedVersionNumber))?;
            return Ok(false);
        }

        let peer_asn = open.true_asn();
        if self.config.peer_asn != 0 && peer_asn != self.config.peer_asn {
            error!(
                "open_recv: peer ASN {} does not match configured {}",
                peer_asn, self.config.peer_asn
            );
            self.notify_and_idle(core, BgpError::open(OpenSubcode::BadPeerAs))?;
            return Ok(false);
        }

        if !self.valid_addr4(open.bgp_id) {
            error!("open_recv: peer BGP ID ({}) invalid", open.bgp_id);
            self.notify_and_idle(core, BgpError::open(OpenSubcode::BadBgpIdentifier))?;
            return Ok(false);
        }

        // a hold time of 0 disables timers; 1 and 2 are illegal
        if open.hold_time != 0 && open.hold_time < 3 {
            error!("open_recv: unacceptable hold time {}", open.hold_time);
            self.notify_and_idle(core, BgpError::open(OpenSubcode::UnacceptableHoldTime))?;
            return Ok(false);
        }

        if !self.config.no_collision_detection
            && self
                .publish_event(RouteEvent::Collision {
                    peer_bgp_id: open.bgp_id,
                })
                > 0
        {
            // another session to this peer claimed survival
            info!(
                "open_recv: open collision with {} resolved against this session",
                open.bgp_id
            );
            self.set_state(core, BgpState::Idle);
            self.write_message(
                core,
                &BgpMessage::Notification(
                    BgpError::cease(CeaseSubcode::ConnectionCollisionResolution).into(),
                ),
            )?;
            return Ok(false);
        }

        core.hold_timer = self.config.hold_timer.min(open.hold_time);
        core.peer_bgp_id = open.bgp_id;
        core.peer_asn = peer_asn;
        core.use_4b_asn = self.config.use_4b_asn && open.has_four_octet_as();
        core.send_ipv6 =
            self.config.mp_bgp_ipv6 && open.supports_family(Afi::Ipv6, Safi::Unicast);
        core.send_ipv4 = !self.config.mp_bgp_ipv6 || self.config.mp_bgp_ipv4;

        Ok(true)
    }

    /// Applies a received UPDATE per RFC 4271 §6.3: withdraw, validate
    /// well-known attributes, restore four-octet data, filter, insert,
    /// and fan out bus events.
    fn process_update(
        &self,
        core: &mut FsmCore,
        mut update: BgpUpdateMessage,
    ) -> Result<(), FsmError> {
        let peer = core.peer_bgp_id;
        let is_ibgp = self.is_ibgp(core);
        let ibgp_asn = if is_ibgp { core.peer_asn.to_u32() } else { 0 };

        let mut unreachable4: Vec<Ipv4Net> = Vec::new();
        for prefix in &update.withdrawn {
            if let WithdrawOutcome::RemovedUnreachable = self.rib4.withdraw(peer, *prefix) {
                unreachable4.push(*prefix);
            }
        }

        let mut unreachable6: Vec<Ipv6Net> = Vec::new();
        if let Some(MpUnreachNlri::Ipv6Unicast { prefixes }) = update.attributes.get_unreachable()
        {
            for prefix in prefixes.clone() {
                if let WithdrawOutcome::RemovedUnreachable = self.rib6.withdraw(peer, prefix) {
                    unreachable6.push(prefix);
                }
            }
        }

        if !unreachable4.is_empty() {
            self.publish_event(RouteEvent::Withdraw4 {
                prefixes: unreachable4,
            });
        }
        if !unreachable6.is_empty() {
            self.publish_event(RouteEvent::Withdraw6 {
                prefixes: unreachable6,
            });
        }

        if !core.use_4b_asn {
            update.restore_as_path();
            update.restore_aggregator();
        }

        let announced4 = std::mem::take(&mut update.announced);
        let reach6 = match update.attributes.get_reachable() {
            Some(MpReachNlri::Ipv6Unicast { next_hop, prefixes }) if !prefixes.is_empty() => {
                Some((*next_hop, prefixes.clone()))
            }
            _ => None,
        };

        if !announced4.is_empty() || reach6.is_some() {
            let mut missing = !update.attributes.has_attr(AttrType::ORIGIN)
                || !update.attributes.has_attr(AttrType::AS_PATH);
            if !announced4.is_empty() && !update.attributes.has_attr(AttrType::NEXT_HOP) {
                missing = true;
            }
            if missing {
                error!("update: missing well-known mandatory attribute");
                return self.notify_and_idle(
                    core,
                    BgpError::update(UpdateSubcode::MissingWellKnownAttribute),
                );
            }

            let local_occurrences = update
                .attributes
                .as_path()
                .map(|path| path.count_asn(self.local_asn()))
                .unwrap_or(0);
            if local_occurrences > self.config.allow_local_as as usize {
                warn!(
                    "update: AS path loops through local ASN {} times, ignoring routes",
                    local_occurrences
                );
            } else {
                let bundle = Arc::new(update.attributes.clone());

                if core.send_ipv4 && !announced4.is_empty() {
                    self.ingest_v4(core, &announced4, &bundle, ibgp_asn);
                }
                if core.send_ipv6 {
                    if let Some((next_hop, prefixes)) = reach6 {
                        self.ingest_v6(core, next_hop, &prefixes, &bundle, ibgp_asn);
                    }
                }
            }
        }

        Ok(())
    }

    fn ingest_v4(
        &self,
        core: &FsmCore,
        announced: &[Ipv4Net],
        bundle: &Arc<Attributes>,
        ibgp_asn: u32,
    ) {
        // NEXT_HOP presence was checked above
        let nexthop = match bundle.next_hop() {
            Some(nh) => nh,
            None => return,
        };
        if !self.valid_addr4(nexthop) {
            warn!(
                "update: ignored {} routes with invalid nexthop {}",
                announced.len(),
                nexthop
            );
            return;
        }
        if !self.config.no_nexthop_check4 && !self.config.peering_lan4.contains(&nexthop) {
            warn!(
                "update: ignored {} routes with nexthop outside peering LAN ({} not in {})",
                announced.len(),
                nexthop,
                self.config.peering_lan4
            );
            return;
        }

        let accepted = apply_in_filters(&self.config.in_filters4, announced);
        if accepted.is_empty() {
            return;
        }

        let newly_best = self.rib4.insert_many_from_peer(
            core.peer_bgp_id,
            &accepted,
            bundle.clone(),
            self.config.weight,
            ibgp_asn,
        );
        if !newly_best.is_empty() {
            self.publish_event(RouteEvent::Add4 {
                attributes: bundle.clone(),
                prefixes: newly_best,
            });
        }
    }

    fn ingest_v6(
        &self,
        core: &FsmCore,
        next_hop: MpNextHop,
        prefixes: &[Ipv6Net],
        bundle: &Arc<Attributes>,
        ibgp_asn: u32,
    ) {
        let global = next_hop.global();
        if !valid_addr6(global) {
            warn!(
                "update: ignored {} v6 routes with invalid nexthop {}",
                prefixes.len(),
                global
            );
            return;
        }
        if !self.config.no_nexthop_check6 && !self.config.peering_lan6.contains(&global) {
            warn!(
                "update: ignored {} v6 routes with nexthop outside peering LAN ({} not in {})",
                prefixes.len(),
                global,
                self.config.peering_lan6
            );
            return;
        }

        let accepted = apply_in_filters(&self.config.in_filters6, prefixes);
        if accepted.is_empty() {
            return;
        }

        let newly_best = self.rib6.insert_many_from_peer(
            core.peer_bgp_id,
            &accepted,
            bundle.clone(),
            self.config.weight,
            ibgp_asn,
        );
        if !newly_best.is_empty() {
            self.publish_event(RouteEvent::Add6 {
                attributes: bundle.clone(),
                prefixes: newly_best,
            });
        }
    }

    /// On entering Established: advertise the RIB, one UPDATE per update
    /// group (identical attribute bundles batch together).
    fn dump_rib(&self, core: &mut FsmCore) -> Result<(), FsmError> {
        let is_ibgp = self.is_ibgp(core);

        if core.send_ipv4 {
            let entries = self.rib4.best_entries();
            let groups = entries.into_iter().chunk_by(|entry| entry.update_group);
            for (_, group) in &groups {
                let group: Vec<RibEntry<Ipv4Net>> = group.collect();
                if is_ibgp && group[0].ibgp_asn != 0 {
                    // learned over IBGP, not reflected to IBGP peers
                    continue;
                }
                let announced = self.apply_out_filters4(&group);
                if announced.is_empty() {
                    continue;
                }
                let mut update = BgpUpdateMessage {
                    withdrawn: vec![],
                    attributes: (*group[0].attributes).clone(),
                    announced,
                };
                self.prepare_update4(core, &mut update);
                self.write_message(core, &BgpMessage::Update(update))?;
            }
        }

        if core.send_ipv6 {
            let entries = self.rib6.best_entries();
            let groups = entries.into_iter().chunk_by(|entry| entry.update_group);
            for (_, group) in &groups {
                let group: Vec<RibEntry<Ipv6Net>> = group.collect();
                if is_ibgp && group[0].ibgp_asn != 0 {
                    continue;
                }
                let announced = self.apply_out_filters6(&group);
                if announced.is_empty() {
                    continue;
                }
                let update = self.build_update6(
                    core,
                    (*group[0].attributes).clone(),
                    group[0].next_hop(),
                    announced,
                );
                self.write_message(core, &BgpMessage::Update(update))?;
            }
        }

        Ok(())
    }

    fn apply_out_filters4(&self, entries: &[RibEntry<Ipv4Net>]) -> Vec<Ipv4Net> {
        entries
            .iter()
            .map(|entry| entry.prefix)
            .filter(|prefix| {
                let keep = self.config.out_filters4.apply(prefix) == FilterOp::Accept;
                if !keep {
                    info!("route {} filtered by out_filters4", prefix);
                }
                keep
            })
            .collect()
    }

    fn apply_out_filters6(&self, entries: &[RibEntry<Ipv6Net>]) -> Vec<Ipv6Net> {
        entries
            .iter()
            .map(|entry| entry.prefix)
            .filter(|prefix| {
                let keep = self.config.out_filters6.apply(prefix) == FilterOp::Accept;
                if !keep {
                    info!("route {} filtered by out_filters6", prefix);
                }
                keep
            })
            .collect()
    }

    /// Egress preparation for an IPv4 UPDATE: strip what must not cross
    /// an EBGP boundary, fix up the next hop, and prepend the local ASN.
    fn prepare_update4(&self, core: &FsmCore, update: &mut BgpUpdateMessage) {
        let is_ibgp = self.is_ibgp(core);
        if is_ibgp {
            // stale MP payloads from the ingress bundle never go back out
            update.attributes.remove(AttrType::MP_REACHABLE_NLRI);
            update.attributes.remove(AttrType::MP_UNREACHABLE_NLRI);
        } else {
            update.attributes.drop_non_transitive();
        }

        let alter = !is_ibgp || self.config.ibgp_alter_nexthop;
        match update.attributes.next_hop() {
            None => update
                .attributes
                .upsert(AttributeValue::NextHop(self.config.default_nexthop4)),
            Some(nh) => {
                if alter
                    && (self.config.forced_default_nexthop4
                        || !self.config.peering_lan4.contains(&nh))
                {
                    update
                        .attributes
                        .upsert(AttributeValue::NextHop(self.config.default_nexthop4));
                }
            }
        }

        self.finish_egress_attrs(core, update);
    }

    /// Builds an egress IPv6 UPDATE around a fresh MP_REACH_NLRI.
    fn build_update6(
        &self,
        core: &FsmCore,
        attributes: Attributes,
        next_hop: Option<MpNextHop>,
        prefixes: Vec<Ipv6Net>,
    ) -> BgpUpdateMessage {
        let mut update = BgpUpdateMessage {
            withdrawn: vec![],
            attributes,
            announced: vec![],
        };

        let is_ibgp = self.is_ibgp(core);
        if is_ibgp {
            update.attributes.remove(AttrType::MP_REACHABLE_NLRI);
            update.attributes.remove(AttrType::MP_UNREACHABLE_NLRI);
        } else {
            update.attributes.drop_non_transitive();
        }
        update.attributes.remove(AttrType::NEXT_HOP);

        let alter = !is_ibgp || self.config.ibgp_alter_nexthop;
        let next_hop = match next_hop {
            Some(nh)
                if !(alter
                    && (self.config.forced_default_nexthop6
                        || !self.config.peering_lan6.contains(&nh.global()))) =>
            {
                nh
            }
            _ => self.default_nexthop6(),
        };

        update
            .attributes
            .upsert(AttributeValue::MpReachNlri(MpReachNlri::Ipv6Unicast {
                next_hop,
                prefixes,
            }));

        self.finish_egress_attrs(core, &mut update);
        update
    }

    fn default_nexthop6(&self) -> MpNextHop {
        match self.config.default_nexthop6_linklocal {
            Some(ll) => MpNextHop::Ipv6LinkLocal(self.config.default_nexthop6_global, ll),
            None => MpNextHop::Ipv6(self.config.default_nexthop6_global),
        }
    }

    fn finish_egress_attrs(&self, core: &FsmCore, update: &mut BgpUpdateMessage) {
        if core.use_4b_asn {
            update.restore_as_path();
            update.restore_aggregator();
        } else {
            update.downgrade_as_path();
            update.downgrade_aggregator();
        }
        if !self.is_ibgp(core) {
            update.prepend(self.local_asn(), core.use_4b_asn);
        }
    }

    fn notify_and_idle(&self, core: &mut FsmCore, error: BgpError) -> Result<(), FsmError> {
        self.set_state(core, BgpState::Idle);
        self.write_message(core, &BgpMessage::Notification(error.into()))
    }

    fn set_state(&self, core: &mut FsmCore, new_state: BgpState) {
        if core.state == new_state {
            return;
        }
        info!("state change: {} -> {}", core.state, new_state);

        if core.state == BgpState::Established {
            info!("dropping all routes received from peer");
            self.drop_all_routes(core);
        }
        core.state = new_state;
    }

    /// Discards every route learned from the peer and publishes the
    /// reachability fallout.
    fn drop_all_routes(&self, core: &FsmCore) {
        if core.peer_bgp_id == Ipv4Addr::UNSPECIFIED {
            return;
        }

        let outcome4 = self.rib4.discard(core.peer_bgp_id);
        if !outcome4.unreachable.is_empty() {
            self.publish_event(RouteEvent::Withdraw4 {
                prefixes: outcome4.unreachable,
            });
        }
        let outcome6 = self.rib6.discard(core.peer_bgp_id);
        if !outcome6.unreachable.is_empty() {
            self.publish_event(RouteEvent::Withdraw6 {
                prefixes: outcome6.unreachable,
            });
        }
    }

    fn write_message(&self, core: &mut FsmCore, msg: &BgpMessage) -> Result<(), FsmError> {
        debug!("writing {:?} message in state {}", msg.msg_type(), core.state);

        let asn_len = if core.use_4b_asn {
            AsnLength::Bits32
        } else {
            AsnLength::Bits16
        };
        let bytes = match crate::parser::bgp::messages::encode_message(msg, asn_len) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!("write_message: failed to serialize message: {err}");
                self.set_state(core, BgpState::Broken);
                return Err(FsmError::Broken);
            }
        };

        let _out = self.out_lock.lock().unwrap();
        core.last_sent = self.clock.now();
        if !self.config.out_handler.handle_out(&bytes) {
            error!("write_message: out handler failed");
            self.set_state(core, BgpState::Broken);
            return Err(FsmError::Broken);
        }
        Ok(())
    }

    /// A usable unicast IPv4 address: not this router, not the default
    /// next hop, and outside the unspecified/loopback/multicast/reserved
    /// ranges.
    fn valid_addr4(&self, addr: Ipv4Addr) -> bool {
        if addr == self.config.default_nexthop4 || addr == self.config.router_id {
            return false;
        }
        let first = addr.octets()[0];
        !(first == 0 || first == 127 || first >= 224)
    }
}

fn valid_addr6(addr: Ipv6Addr) -> bool {
    !(addr.is_unspecified() || addr.is_loopback() || addr.is_multicast())
}

fn apply_in_filters<P: crate::models::RoutedPrefix>(
    filters: &FilterRules<P>,
    prefixes: &[P],
) -> Vec<P> {
    prefixes
        .iter()
        .copied()
        .filter(|prefix| {
            let keep = filters.apply(prefix) == FilterOp::Accept;
            if !keep {
                info!("route {} filtered by ingress filters", prefix);
            }
            keep
        })
        .collect()
}

impl RouteEventReceiver for BgpFsm {
    fn handle_route_event(&self, event: &RouteEvent) -> bool {
        match event {
            RouteEvent::Collision { peer_bgp_id } => self.on_collision(*peer_bgp_id),
            RouteEvent::Add4 {
                attributes,
                prefixes,
            } => self.on_add4(attributes, prefixes),
            RouteEvent::Withdraw4 { prefixes } => self.on_withdraw4(prefixes),
            RouteEvent::Add6 {
                attributes,
                prefixes,
            } => self.on_add6(attributes, prefixes),
            RouteEvent::Withdraw6 { prefixes } => self.on_withdraw6(prefixes),
        }
    }
}

impl BgpFsm {
    /// Collision probe from a sibling session: survive (return true) when
    /// this side holds the session in OpenConfirm for the same peer and
    /// the local router id is the higher one (host-order comparison).
    fn on_collision(&self, peer_bgp_id: Ipv4Addr) -> bool {
        let mut core = self.core.lock().unwrap();
        if core.state != BgpState::OpenConfirm || core.peer_bgp_id != peer_bgp_id {
            return false;
        }
        info!("collision with {} detected", peer_bgp_id);

        if u32::from(self.config.router_id) > u32::from(peer_bgp_id) {
            return true;
        }
        self.set_state(&mut core, BgpState::Idle);
        let _ = self.write_message(
            &mut core,
            &BgpMessage::Notification(
                BgpError::cease(CeaseSubcode::ConnectionCollisionResolution).into(),
            ),
        );
        false
    }

    fn on_add4(&self, attributes: &Arc<Attributes>, prefixes: &[Ipv4Net]) -> bool {
        let mut core = self.core.lock().unwrap();
        if core.state != BgpState::Established || !core.send_ipv4 {
            return false;
        }

        let announced: Vec<Ipv4Net> = prefixes
            .iter()
            .copied()
            .filter(|prefix| {
                let keep = self.config.out_filters4.apply(prefix) == FilterOp::Accept;
                if !keep {
                    info!("route {} filtered by out_filters4", prefix);
                }
                keep
            })
            .collect();
        if announced.is_empty() {
            return false;
        }

        let mut update = BgpUpdateMessage {
            withdrawn: vec![],
            attributes: (**attributes).clone(),
            announced,
        };
        self.prepare_update4(&core, &mut update);
        self.write_message(&mut core, &BgpMessage::Update(update))
            .is_ok()
    }

    fn on_withdraw4(&self, prefixes: &[Ipv4Net]) -> bool {
        let mut core = self.core.lock().unwrap();
        if core.state != BgpState::Established || !core.send_ipv4 {
            return false;
        }

        let update = BgpUpdateMessage {
            withdrawn: prefixes.to_vec(),
            attributes: Attributes::default(),
            announced: vec![],
        };
        self.write_message(&mut core, &BgpMessage::Update(update))
            .is_ok()
    }

    fn on_add6(&self, attributes: &Arc<Attributes>, prefixes: &[Ipv6Net]) -> bool {
        let mut core = self.core.lock().unwrap();
        if core.state != BgpState::Established || !core.send_ipv6 {
            return false;
        }

        let announced: Vec<Ipv6Net> = prefixes
            .iter()
            .copied()
            .filter(|prefix| {
                let keep = self.config.out_filters6.apply(prefix) == FilterOp::Accept;
                if !keep {
                    info!("route {} filtered by out_filters6", prefix);
                }
                keep
            })
            .collect();
        if announced.is_empty() {
            return false;
        }

        let next_hop = <Ipv6Net as RibPrefix>::nexthop_of(attributes.as_ref());
        let update = self.build_update6(&core, (**attributes).clone(), next_hop, announced);
        self.write_message(&mut core, &BgpMessage::Update(update))
            .is_ok()
    }

    fn on_withdraw6(&self, prefixes: &[Ipv6Net]) -> bool {
        let mut core = self.core.lock().unwrap();
        if core.state != BgpState::Established || !core.send_ipv6 {
            return false;
        }

        let mut attributes = Attributes::default();
        attributes.upsert(AttributeValue::MpUnreachNlri(MpUnreachNlri::Ipv6Unicast {
            prefixes: prefixes.to_vec(),
        }));
        let update = BgpUpdateMessage {
            withdrawn: vec![],
            attributes,
            announced: vec![],
        };
        self.write_message(&mut core, &BgpMessage::Update(update))
            .is_ok()
    }
}

impl Drop for BgpFsm {
    fn drop(&mut self) {
        if let (Some(bus), Some(id)) = (&self.bus, self.sub_id.get()) {
            bus.unsubscribe(*id);
        }
    }
}
