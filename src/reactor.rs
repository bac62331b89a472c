// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The single-threaded event reactor. Owns the registry exclusively;
//! timers are `(Instant, TimerEvent)` entries in a `BinaryHeap`, not
//! tasks holding back-references into sessions, so no session is ever
//! reachable from more than one place at a time.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap},
    net::Ipv4Addr,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::{sync::mpsc, time::sleep_until};
use tracing::{debug, error, info, warn};

use crate::{
    discovery::{self, DiscoveryPolicy},
    error::CoreError,
    external::{AaaClient, AaaCredentials, ForwarderAdapter},
    fsm::{ipcp::IpcpPolicy, lcp::LcpPolicy},
    session::{entity::SessionEffect, Encap, Session, SessionRegistry},
    wire::{
        discovery::{DiscoveryCode, DiscoveryFrame},
        session_hdr::SessionFrame,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Discovery,
    Session,
}

pub struct IngressFrame {
    pub encap: Encap,
    pub payload: Vec<u8>,
    pub kind: FrameKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerEvent {
    FsmRestart { session_id: u16, fsm: crate::session::entity::FsmKind },
    Echo { session_id: u16 },
    PendingSweep,
}

struct TimerEntry {
    when: Instant,
    event: TimerEvent,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.when == other.when
    }
}
impl Eq for TimerEntry {}
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest deadline pops first.
        other.when.cmp(&self.when)
    }
}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Per-VLAN negotiation defaults used to build a freshly allocated
/// session's LCP/IPCP policies.
pub struct VlanProfile {
    pub discovery: DiscoveryPolicy,
    pub auth_chap: bool,
    pub auth_pap: bool,
    pub mru: u16,
    pub pool_name: String,
    pub vrf: Option<String>,
    pub unnumbered: Option<String>,
    pub dns_primary: Option<Ipv4Addr>,
    pub dns_secondary: Option<Ipv4Addr>,
}

pub struct Reactor {
    registry: SessionRegistry,
    profiles: HashMap<u16, VlanProfile>,
    default_profile: Option<VlanProfile>,
    forwarder: Arc<dyn ForwarderAdapter>,
    aaa: Arc<dyn AaaClient>,
    timers: BinaryHeap<TimerEntry>,
    ingress: mpsc::Receiver<IngressFrame>,
    egress_discovery: mpsc::Sender<Vec<u8>>,
    egress_session: mpsc::Sender<Vec<u8>>,
}

const PENDING_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

impl Reactor {
    pub fn new(
        forwarder: Arc<dyn ForwarderAdapter>,
        aaa: Arc<dyn AaaClient>,
        ingress: mpsc::Receiver<IngressFrame>,
        egress_discovery: mpsc::Sender<Vec<u8>>,
        egress_session: mpsc::Sender<Vec<u8>>,
    ) -> Self {
        Self::with_pending_timeout(forwarder, aaa, ingress, egress_discovery, egress_session, Duration::from_secs(10))
    }

    /// Same as [`Reactor::new`], but with the pending-cookie timeout taken
    /// from the config's `PendingCookieTimeout` instead of the ten-second
    /// default.
    pub fn with_pending_timeout(
        forwarder: Arc<dyn ForwarderAdapter>,
        aaa: Arc<dyn AaaClient>,
        ingress: mpsc::Receiver<IngressFrame>,
        egress_discovery: mpsc::Sender<Vec<u8>>,
        egress_session: mpsc::Sender<Vec<u8>>,
        pending_timeout: Duration,
    ) -> Self {
        let mut timers = BinaryHeap::new();
        timers.push(TimerEntry { when: Instant::now() + PENDING_SWEEP_INTERVAL, event: TimerEvent::PendingSweep });
        Self {
            registry: SessionRegistry::with_pending_timeout(pending_timeout),
            profiles: HashMap::new(),
            default_profile: None,
            forwarder,
            aaa,
            timers,
            ingress,
            egress_discovery,
            egress_session,
        }
    }

    pub fn set_default_profile(&mut self, profile: VlanProfile) {
        self.default_profile = Some(profile);
    }

    pub fn set_vlan_profile(&mut self, outer_vlan: u16, profile: VlanProfile) {
        self.profiles.insert(outer_vlan, profile);
    }

    fn profile_for(&self, outer_vlan: u16) -> Option<&VlanProfile> {
        self.profiles.get(&outer_vlan).or(self.default_profile.as_ref())
    }

    /// Drives the reactor until the ingress channel closes (global
    /// shutdown handled by the caller closing the sender).
    pub async fn run(&mut self) {
        loop {
            let deadline = self.timers.peek().map(|e| e.when);
            tokio::select! {
                frame = self.ingress.recv() => {
                    match frame {
                        Some(f) => self.handle_ingress(f).await,
                        None => break,
                    }
                }
                _ = sleep_until_opt(deadline) => {
                    if let Some(entry) = self.timers.pop() {
                        self.handle_timer(entry.event).await;
                    }
                }
            }
        }
        self.shutdown().await;
    }

    async fn handle_ingress(&mut self, frame: IngressFrame) {
        let status = match frame.kind {
            FrameKind::Discovery => self.handle_discovery(&frame.encap, &frame.payload).await,
            FrameKind::Session => self.handle_session(&frame.encap, &frame.payload).await,
        };
        if let Err(e) = status {
            log_core_error(&e);
        }
    }

    async fn handle_discovery(&mut self, encap: &Encap, payload: &[u8]) -> Result<(), CoreError> {
        let frame = DiscoveryFrame::decode(payload)?;
        match frame.code {
            DiscoveryCode::Padi => {
                let Some(profile) = self.profile_for(encap.outer_vlan) else {
                    return Err(CoreError::WrongServiceName("no policy for VLAN".into()));
                };
                let pado = discovery::handle_padi(&frame, encap, &profile.discovery, &mut self.registry)?;
                self.send_discovery(pado);
            }
            DiscoveryCode::Padr => {
                let Some(profile) = self.profile_for(encap.outer_vlan) else {
                    return Err(CoreError::WrongServiceName("no policy for VLAN".into()));
                };
                let lcp_policy = LcpPolicy::new(profile.mru, profile.auth_chap, profile.auth_pap);
                let ipcp_policy = IpcpPolicy::new(Ipv4Addr::UNSPECIFIED, profile.dns_primary, profile.dns_secondary);
                let (auth_chap, auth_pap) = (profile.auth_chap, profile.auth_pap);
                let encap_for_session = *encap;
                let (pads, session_id) = discovery::handle_padr(&frame, encap, &mut self.registry, move |id| {
                    Session::new(id, encap_for_session, lcp_policy, ipcp_policy, auth_chap, auth_pap)
                })?;
                self.send_discovery(pads);
                debug!(target: "pppoed", session_id, "session allocated via PADR");
            }
            DiscoveryCode::Padt => {
                if let Some(session) = discovery::handle_padt(&frame, &mut self.registry) {
                    self.teardown_session(session).await;
                } else {
                    debug!(target: "pppoed", session_id = frame.session_id, "PADT for unknown session");
                }
            }
            DiscoveryCode::Pado | DiscoveryCode::Pads => {
                // We are the access concentrator; these never arrive as ingress.
            }
        }
        Ok(())
    }

    async fn handle_session(&mut self, encap: &Encap, payload: &[u8]) -> Result<(), CoreError> {
        let frame = SessionFrame::decode(payload)?;
        let Some(key) = self.registry.key_for_id(frame.session_id) else {
            debug!(target: "ppp", session_id = frame.session_id, "dropping frame for unknown session");
            return Ok(());
        };
        if key.mac != encap.src_mac || key.outer_vlan != encap.outer_vlan || key.inner_vlan != encap.inner_vlan {
            return Err(CoreError::UnknownSession);
        }

        let mut outputs = Vec::new();
        let mut layer_finished = false;
        {
            let Some(session) = self.registry.get_by_id_mut(frame.session_id) else { return Ok(()) };
            for item in session.ensure_started() {
                outputs.push(item);
            }
            match session.handle_frame(frame.protocol, &frame.payload) {
                Ok(items) => outputs.extend(items),
                Err(e) => {
                    log_core_error(&e);
                    return Ok(());
                }
            }
        }

        for (protocol, bytes, effects) in outputs {
            if !bytes.is_empty() {
                self.send_session(frame.session_id, protocol, bytes);
            }
            for effect in effects {
                if matches!(effect, SessionEffect::LayerFinished) {
                    layer_finished = true;
                }
                self.apply_effect(frame.session_id, effect).await;
            }
        }

        if layer_finished {
            if let Some(session) = self.registry.remove_by_id(frame.session_id) {
                self.teardown_session(session).await;
            }
        }

        Ok(())
    }

    async fn apply_effect(&mut self, session_id: u16, effect: SessionEffect) {
        match effect {
            SessionEffect::ArmFsmTimer { fsm, after } => {
                self.timers.push(TimerEntry { when: Instant::now() + after, event: TimerEvent::FsmRestart { session_id, fsm } });
            }
            SessionEffect::StopFsmTimer { .. } => {
                // Left in the heap; fires into a no-op if the FSM already moved on.
            }
            SessionEffect::ArmEchoTimer { after } => {
                self.timers.push(TimerEntry { when: Instant::now() + after, event: TimerEvent::Echo { session_id } });
            }
            SessionEffect::AuthenticateWithAaa { peer_id, password } => {
                self.run_pap_auth(session_id, peer_id, password).await;
            }
            SessionEffect::FetchChapSecret { peer_name } => {
                self.run_chap_secret_fetch(session_id, peer_name).await;
            }
            SessionEffect::Authenticated => {
                self.start_ipcp(session_id).await;
            }
            SessionEffect::AuthenticationFailed => {
                warn!(target: "auth", session_id, "authentication failed, closing LCP");
            }
            SessionEffect::IpcpUp => {
                self.provision_session(session_id).await;
            }
            SessionEffect::LayerFinished => {}
        }
    }

    async fn start_ipcp(&mut self, session_id: u16) {
        let Some(session) = self.registry.get_by_id_mut(session_id) else { return };
        let outputs = session.start_ipcp();
        for (protocol, bytes, effects) in outputs {
            if !bytes.is_empty() {
                self.send_session(session_id, protocol, bytes);
            }
            for effect in effects {
                Box::pin(self.apply_effect(session_id, effect)).await;
            }
        }
    }

    async fn run_pap_auth(&mut self, session_id: u16, peer_id: Vec<u8>, password: Vec<u8>) {
        let credentials = AaaCredentials { peer_id, secret_or_password: password };
        let Some(profile) = self.registry.key_for_id(session_id).and_then(|k| self.profile_for(k.outer_vlan)) else {
            return;
        };
        let result = self.aaa.start(&credentials, &profile.pool_name, profile.vrf.as_deref()).await;
        let Some(session) = self.registry.get_by_id_mut(session_id) else { return };
        let success = match result {
            Ok(lease) => {
                session.aaa_session_id = Some(lease.aaa_session_id);
                session.address.peer_ipv4 = Some(lease.assigned_ipv4);
                session.ipcp.policy.pool_address = lease.assigned_ipv4;
                true
            }
            Err(_) => false,
        };
        for (protocol, bytes, effects) in session.complete_pap(success) {
            if !bytes.is_empty() {
                self.send_session(session_id, protocol, bytes);
            }
            for effect in effects {
                Box::pin(self.apply_effect(session_id, effect)).await;
            }
        }
    }

    async fn run_chap_secret_fetch(&mut self, session_id: u16, peer_name: Vec<u8>) {
        let secret = self.aaa.fetch_chap_secret(&peer_name).await;
        let credentials = AaaCredentials { peer_id: peer_name, secret_or_password: Vec::new() };
        let Some(profile) = self.registry.key_for_id(session_id).and_then(|k| self.profile_for(k.outer_vlan)) else {
            return;
        };
        let Ok(secret) = secret else {
            let Some(session) = self.registry.get_by_id_mut(session_id) else { return };
            if let Ok(items) = session.complete_chap(&[]) {
                for (protocol, bytes, effects) in items {
                    if !bytes.is_empty() {
                        self.send_session(session_id, protocol, bytes);
                    }
                    for effect in effects {
                        Box::pin(self.apply_effect(session_id, effect)).await;
                    }
                }
            }
            return;
        };
        let lease = self.aaa.start(&credentials, &profile.pool_name, profile.vrf.as_deref()).await;
        let Some(session) = self.registry.get_by_id_mut(session_id) else { return };
        let outcome = match lease {
            Ok(l) => {
                session.aaa_session_id = Some(l.aaa_session_id);
                session.address.peer_ipv4 = Some(l.assigned_ipv4);
                session.ipcp.policy.pool_address = l.assigned_ipv4;
                session.complete_chap(&secret)
            }
            Err(e) => Err(e),
        };
        let Ok(items) = outcome else { return };
        for (protocol, bytes, effects) in items {
            if !bytes.is_empty() {
                self.send_session(session_id, protocol, bytes);
            }
            for effect in effects {
                Box::pin(self.apply_effect(session_id, effect)).await;
            }
        }
    }

    async fn provision_session(&mut self, session_id: u16) {
        let Some(key) = self.registry.key_for_id(session_id) else { return };
        let Some(profile) = self.profile_for(key.outer_vlan) else { return };
        let vrf = profile.vrf.clone();
        let unnumbered = profile.unnumbered.clone();
        let peer_ip = self.registry.get_by_id_mut(session_id).and_then(|s| s.address.peer_ipv4);
        let Some(peer_ip) = peer_ip else { return };
        if let Some(session) = self.registry.get_by_id_mut(session_id) {
            session.address.vrf = vrf.clone();
            session.address.unnumbered = unnumbered.clone();
        }

        let result = self.forwarder.add_pppoe_session(peer_ip, session_id, key.mac, vrf.as_deref(), true).await;
        match result {
            Ok((true, ifindex)) => {
                if let Some(session) = self.registry.get_by_id_mut(session_id) {
                    session.ifindex = Some(ifindex);
                    let magic = session.lcp.policy.magic_number;
                    let interval = session.arm_echo(magic);
                    self.timers.push(TimerEntry { when: Instant::now() + interval, event: TimerEvent::Echo { session_id } });
                }
                if let Some(vrf) = vrf.as_deref() {
                    if let Err(e) = self.forwarder.set_interface_table(ifindex, vrf).await {
                        error!(target: "ppp", session_id, error = %e, "failed to move session to VRF {vrf}");
                    }
                }
                if let Some(name) = unnumbered.as_deref() {
                    match self.forwarder.get_iface_by_name(name).await {
                        Ok((parent_ifindex, true)) => {
                            if let Err(e) = self.forwarder.set_unnumbered(ifindex, parent_ifindex, true).await {
                                error!(target: "ppp", session_id, error = %e, "failed to set unnumbered interface {name}");
                            }
                        }
                        _ => {
                            error!(target: "ppp", session_id, "unnumbered parent interface {name} not found");
                        }
                    }
                }
                if let Some(aaa_session_id) = self.registry.get_by_id_mut(session_id).and_then(|s| s.aaa_session_id.clone()) {
                    let _ = self.aaa.map_iface(&aaa_session_id, ifindex).await;
                }
            }
            _ => {
                error!(target: "ppp", session_id, "forwarder provisioning failed");
                if let Some(session) = self.registry.remove_by_id(session_id) {
                    self.teardown_session(session).await;
                }
            }
        }
    }

    async fn handle_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::PendingSweep => {
                self.registry.sweep_pending();
                self.timers.push(TimerEntry { when: Instant::now() + PENDING_SWEEP_INTERVAL, event: TimerEvent::PendingSweep });
            }
            TimerEvent::FsmRestart { session_id, fsm } => {
                let Some(session) = self.registry.get_by_id_mut(session_id) else { return };
                let outputs = session.on_fsm_timer(fsm);
                for (protocol, bytes, effects) in outputs {
                    if !bytes.is_empty() {
                        self.send_session(session_id, protocol, bytes);
                    }
                    for effect in effects {
                        self.apply_effect(session_id, effect).await;
                    }
                }
            }
            TimerEvent::Echo { session_id } => {
                let Some(session) = self.registry.get_by_id_mut(session_id) else { return };
                let (frame, effects) = session.on_echo_tick();
                if let Some(bytes) = frame {
                    let _ = self.egress_session.send(bytes).await;
                }
                let mut finished = false;
                for effect in effects {
                    if matches!(effect, SessionEffect::LayerFinished) {
                        finished = true;
                    }
                    self.apply_effect(session_id, effect).await;
                }
                if finished {
                    warn!(target: "lcp", session_id, "echo keepalive failure threshold exceeded");
                    if let Some(session) = self.registry.remove_by_id(session_id) {
                        self.teardown_session(session).await;
                    }
                }
            }
        }
    }

    fn send_discovery(&mut self, frame: DiscoveryFrame) {
        let bytes = frame.encode();
        if let Err(e) = self.egress_discovery.try_send(bytes) {
            warn!(target: "pppoed", error = %e, "discovery egress queue full or closed");
        }
    }

    fn send_session(&mut self, session_id: u16, protocol: crate::wire::session_hdr::PppProtocol, payload: Vec<u8>) {
        let frame = SessionFrame::new(session_id, protocol, payload).encode();
        if let Err(e) = self.egress_session.try_send(frame) {
            warn!(target: "ppp", error = %e, "session egress queue full or closed");
        }
    }

    async fn teardown_session(&mut self, mut session: Session) {
        if let Some(aaa_session_id) = session.aaa_session_id.take() {
            let _ = self.aaa.stop(&aaa_session_id).await;
        }
        if let Some(ifindex) = session.ifindex {
            if session.address.unnumbered.is_some() {
                let _ = self.forwarder.dump_unnumbered(ifindex).await;
            }
            let peer_ip = session.address.peer_ipv4.unwrap_or(Ipv4Addr::UNSPECIFIED);
            let _ = self.forwarder.add_pppoe_session(peer_ip, session.session_id, session.encap.src_mac, None, false).await;
        }
        info!(target: "session", session_id = session.session_id, "session deallocated");
    }

    /// Global shutdown: stop all AAA sessions, then drop every active
    /// session (which deprovisions forwarder state), then clear the
    /// allocator state.
    async fn shutdown(&mut self) {
        let _ = self.aaa.stop_all().await;
        let sessions = self.registry.clear_all();
        for session in sessions {
            self.teardown_session(session).await;
        }
    }
}

/// Maps a `CoreError` to the right log severity: malformed input and
/// unknown sessions are routine noise, exhaustion and backend failures
/// are operationally significant.
fn log_core_error(err: &CoreError) {
    match err {
        CoreError::MalformedFrame(_) | CoreError::UnknownSession | CoreError::UnexpectedSession | CoreError::WrongServiceName(_) => {
            debug!(target: "packet", error = %err, "dropping frame");
        }
        CoreError::Exhausted | CoreError::ForwarderFailed(_) | CoreError::AaaFailed(_) | CoreError::PolicyViolation(_) => {
            error!(target: "session", error = %err, "request failed");
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(when) => sleep_until(when.into()).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use md5::{Digest, Md5};
    use tokio::time::timeout;

    use super::*;
    use crate::{
        testutil::{MockAaa, MockForwarder},
        wire::{
            discovery::{DiscoveryCode, DiscoveryFrame, Tag},
            options::{encode_options, RawOption},
            ppp_header::{ChapCode, ChapPacket, FsmPacket, LcpCode, PapCode, PapPacket},
            session_hdr::PppProtocol,
        },
    };

    const RECV_TIMEOUT: Duration = Duration::from_secs(1);

    fn encap() -> Encap {
        Encap { src_mac: [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01], dst_mac: [0xff; 6], outer_vlan: 200, inner_vlan: 0, ethertype: 0x8863 }
    }

    fn chap_profile(_pool: Ipv4Addr) -> VlanProfile {
        VlanProfile {
            discovery: DiscoveryPolicy {
                ac_name: "vBNG AC PPPoE".into(),
                service_names: vec!["inet".into()],
                ignore_service_name: false,
                cookie_enabled: true,
            },
            auth_chap: true,
            auth_pap: false,
            mru: 1492,
            pool_name: "inet-pool".into(),
            vrf: None,
            unnumbered: None,
            dns_primary: None,
            dns_secondary: None,
        }
    }

    fn pap_profile(pool: Ipv4Addr) -> VlanProfile {
        VlanProfile { auth_chap: false, auth_pap: true, ..chap_profile(pool) }
    }

    async fn recv_discovery(rx: &mut mpsc::Receiver<Vec<u8>>) -> DiscoveryFrame {
        let bytes = timeout(RECV_TIMEOUT, rx.recv()).await.expect("discovery timeout").expect("discovery channel closed");
        DiscoveryFrame::decode(&bytes).expect("decode discovery frame")
    }

    async fn recv_session(rx: &mut mpsc::Receiver<Vec<u8>>) -> SessionFrame {
        let bytes = timeout(RECV_TIMEOUT, rx.recv()).await.expect("session timeout").expect("session channel closed");
        SessionFrame::decode(&bytes).expect("decode session frame")
    }

    async fn recv_fsm(rx: &mut mpsc::Receiver<Vec<u8>>) -> (PppProtocol, FsmPacket) {
        let frame = recv_session(rx).await;
        (frame.protocol, FsmPacket::decode(&frame.payload).expect("decode FSM packet"))
    }

    async fn recv_chap(rx: &mut mpsc::Receiver<Vec<u8>>) -> ChapPacket {
        let frame = recv_session(rx).await;
        assert_eq!(frame.protocol, PppProtocol::Chap);
        ChapPacket::decode(&frame.payload).expect("decode CHAP packet")
    }

    async fn recv_pap(rx: &mut mpsc::Receiver<Vec<u8>>) -> PapPacket {
        let frame = recv_session(rx).await;
        assert_eq!(frame.protocol, PppProtocol::Pap);
        PapPacket::decode(&frame.payload).expect("decode PAP packet")
    }

    /// Drives a reactor through PADI→PADO→PADR→PADS and the LCP exchange
    /// up to (and including) our Configure-Ack of the peer's own
    /// Configure-Request, returning the allocated session id.
    async fn establish_discovery_and_lcp(
        ingress: &mpsc::Sender<IngressFrame>,
        disc_rx: &mut mpsc::Receiver<Vec<u8>>,
        sess_rx: &mut mpsc::Receiver<Vec<u8>>,
        auth_option: RawOption,
    ) -> u16 {
        let mut padi = DiscoveryFrame::new(DiscoveryCode::Padi, 0);
        padi.push_tag(Tag::ServiceName, b"inet".to_vec());
        ingress
            .send(IngressFrame { encap: encap(), payload: padi.encode(), kind: FrameKind::Discovery })
            .await
            .expect("send PADI");
        let pado = recv_discovery(disc_rx).await;
        assert_eq!(pado.code, DiscoveryCode::Pado);
        let cookie = pado.get_tag(Tag::AcCookie).expect("cookie").to_vec();

        let mut padr = DiscoveryFrame::new(DiscoveryCode::Padr, 0);
        padr.push_tag(Tag::ServiceName, b"inet".to_vec());
        padr.push_tag(Tag::AcCookie, cookie);
        ingress
            .send(IngressFrame { encap: encap(), payload: padr.encode(), kind: FrameKind::Discovery })
            .await
            .expect("send PADR");
        let pads = recv_discovery(disc_rx).await;
        assert_eq!(pads.code, DiscoveryCode::Pads);
        let session_id = pads.session_id;
        assert_eq!(session_id, 1);

        let peer_opts = vec![RawOption::mru(1492), auth_option, RawOption::magic_number(0x1234_5678)];
        let peer_cr = FsmPacket::new(LcpCode::ConfigureRequest, 7, encode_options(&peer_opts));
        ingress
            .send(IngressFrame {
                encap: encap(),
                payload: SessionFrame::new(session_id, PppProtocol::Lcp, peer_cr.encode()).encode(),
                kind: FrameKind::Session,
            })
            .await
            .expect("send peer LCP Configure-Request");

        let (proto, our_cr) = recv_fsm(sess_rx).await;
        assert_eq!(proto, PppProtocol::Lcp);
        assert_eq!(our_cr.code, LcpCode::ConfigureRequest);
        assert_eq!(our_cr.identifier, 0);

        let (proto, our_ack) = recv_fsm(sess_rx).await;
        assert_eq!(proto, PppProtocol::Lcp);
        assert_eq!(our_ack.code, LcpCode::ConfigureAck);
        assert_eq!(our_ack.identifier, 7, "Configure-Ack must echo the peer's own identifier");

        let peer_ack = FsmPacket::new(LcpCode::ConfigureAck, our_cr.identifier, Vec::new());
        ingress
            .send(IngressFrame {
                encap: encap(),
                payload: SessionFrame::new(session_id, PppProtocol::Lcp, peer_ack.encode()).encode(),
                kind: FrameKind::Session,
            })
            .await
            .expect("send peer LCP Configure-Ack");

        session_id
    }

    async fn drive_ipcp_to_opened(
        ingress: &mpsc::Sender<IngressFrame>,
        sess_rx: &mut mpsc::Receiver<Vec<u8>>,
        session_id: u16,
        pool: Ipv4Addr,
    ) {
        let (proto, our_cr) = recv_fsm(sess_rx).await;
        assert_eq!(proto, PppProtocol::Ipcp);
        assert_eq!(our_cr.code, LcpCode::ConfigureRequest);

        let peer_cr = FsmPacket::new(LcpCode::ConfigureRequest, 3, encode_options(&[RawOption::ip_address(pool)]));
        ingress
            .send(IngressFrame {
                encap: encap(),
                payload: SessionFrame::new(session_id, PppProtocol::Ipcp, peer_cr.encode()).encode(),
                kind: FrameKind::Session,
            })
            .await
            .expect("send peer IPCP Configure-Request");

        let (proto, our_ack) = recv_fsm(sess_rx).await;
        assert_eq!(proto, PppProtocol::Ipcp);
        assert_eq!(our_ack.code, LcpCode::ConfigureAck);
        assert_eq!(our_ack.identifier, 3);

        let peer_ack = FsmPacket::new(LcpCode::ConfigureAck, our_cr.identifier, Vec::new());
        ingress
            .send(IngressFrame {
                encap: encap(),
                payload: SessionFrame::new(session_id, PppProtocol::Ipcp, peer_ack.encode()).encode(),
                kind: FrameKind::Session,
            })
            .await
            .expect("send peer IPCP Configure-Ack");
    }

    /// Polls `check` until it returns `true` or a bound is hit; the reactor
    /// runs on a background task, so side effects (AAA/forwarder calls)
    /// land asynchronously with respect to the test driver.
    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition did not become true in time");
    }

    #[tokio::test]
    async fn chap_session_reaches_ipcp_and_provisions_forwarder() {
        let pool: Ipv4Addr = "100.64.0.10".parse().expect("addr");
        let (ingress_tx, ingress_rx) = mpsc::channel(16);
        let (disc_tx, mut disc_rx) = mpsc::channel(16);
        let (sess_tx, mut sess_rx) = mpsc::channel(16);
        let forwarder = Arc::new(MockForwarder::new());
        let aaa = Arc::new(MockAaa::new(pool, b"supersecret".to_vec()));

        let mut reactor = Reactor::new(forwarder.clone(), aaa.clone(), ingress_rx, disc_tx, sess_tx);
        reactor.set_vlan_profile(200, chap_profile(pool));
        tokio::spawn(async move { reactor.run().await });

        let session_id =
            establish_discovery_and_lcp(&ingress_tx, &mut disc_rx, &mut sess_rx, RawOption::auth_protocol_chap_md5()).await;

        let challenge = recv_chap(&mut sess_rx).await;
        assert_eq!(challenge.code, ChapCode::Challenge);
        let (value, name) = challenge.parse_value_and_name().expect("parse challenge");
        assert_eq!(name, b"bng-ac");

        let mut hasher = Md5::new();
        hasher.update([challenge.identifier]);
        hasher.update(b"supersecret");
        hasher.update(value);
        let digest: [u8; 16] = hasher.finalize().into();

        let response = ChapPacket::response(challenge.identifier, &digest, b"subscriber1");
        ingress_tx
            .send(IngressFrame {
                encap: encap(),
                payload: SessionFrame::new(session_id, PppProtocol::Chap, response.encode()).encode(),
                kind: FrameKind::Session,
            })
            .await
            .expect("send CHAP response");

        let success = recv_chap(&mut sess_rx).await;
        assert_eq!(success.code, ChapCode::Success);

        drive_ipcp_to_opened(&ingress_tx, &mut sess_rx, session_id, pool).await;

        wait_until(|| forwarder.add_call_count() >= 1).await;
        let calls = forwarder.add_calls.lock().expect("mutex");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (pool, session_id, encap().src_mac, None, true));
    }

    #[tokio::test]
    async fn pap_session_authenticates_and_starts_ipcp() {
        let pool: Ipv4Addr = "100.64.0.20".parse().expect("addr");
        let (ingress_tx, ingress_rx) = mpsc::channel(16);
        let (disc_tx, mut disc_rx) = mpsc::channel(16);
        let (sess_tx, mut sess_rx) = mpsc::channel(16);
        let forwarder = Arc::new(MockForwarder::new());
        let aaa = Arc::new(MockAaa::new(pool, b"hunter2".to_vec()));

        let mut reactor = Reactor::new(forwarder, aaa, ingress_rx, disc_tx, sess_tx);
        reactor.set_vlan_profile(200, pap_profile(pool));
        tokio::spawn(async move { reactor.run().await });

        let session_id =
            establish_discovery_and_lcp(&ingress_tx, &mut disc_rx, &mut sess_rx, RawOption::auth_protocol(0xc023)).await;

        let request = PapPacket::request(9, b"subscriber1", b"hunter2");
        ingress_tx
            .send(IngressFrame {
                encap: encap(),
                payload: SessionFrame::new(session_id, PppProtocol::Pap, request.encode()).encode(),
                kind: FrameKind::Session,
            })
            .await
            .expect("send PAP request");

        let ack = recv_pap(&mut sess_rx).await;
        assert_eq!(ack.code, PapCode::AuthenticateAck);
        assert_eq!(ack.identifier, 9);

        let (proto, our_cr) = recv_fsm(&mut sess_rx).await;
        assert_eq!(proto, PppProtocol::Ipcp);
        assert_eq!(our_cr.code, LcpCode::ConfigureRequest);
    }

    #[tokio::test]
    async fn padt_tears_down_established_session() {
        let pool: Ipv4Addr = "100.64.0.30".parse().expect("addr");
        let (ingress_tx, ingress_rx) = mpsc::channel(16);
        let (disc_tx, mut disc_rx) = mpsc::channel(16);
        let (sess_tx, mut sess_rx) = mpsc::channel(16);
        let forwarder = Arc::new(MockForwarder::new());
        let aaa = Arc::new(MockAaa::new(pool, b"supersecret".to_vec()));

        let mut reactor = Reactor::new(forwarder.clone(), aaa.clone(), ingress_rx, disc_tx, sess_tx);
        reactor.set_vlan_profile(200, chap_profile(pool));
        tokio::spawn(async move { reactor.run().await });

        let session_id =
            establish_discovery_and_lcp(&ingress_tx, &mut disc_rx, &mut sess_rx, RawOption::auth_protocol_chap_md5()).await;

        let challenge = recv_chap(&mut sess_rx).await;
        let (value, _name) = challenge.parse_value_and_name().expect("parse challenge");
        let mut hasher = Md5::new();
        hasher.update([challenge.identifier]);
        hasher.update(b"supersecret");
        hasher.update(value);
        let digest: [u8; 16] = hasher.finalize().into();
        let response = ChapPacket::response(challenge.identifier, &digest, b"subscriber1");
        ingress_tx
            .send(IngressFrame {
                encap: encap(),
                payload: SessionFrame::new(session_id, PppProtocol::Chap, response.encode()).encode(),
                kind: FrameKind::Session,
            })
            .await
            .expect("send CHAP response");
        let _ = recv_chap(&mut sess_rx).await; // CHAP Success
        drive_ipcp_to_opened(&ingress_tx, &mut sess_rx, session_id, pool).await;
        wait_until(|| forwarder.add_call_count() >= 1).await;

        let padt = DiscoveryFrame::new(DiscoveryCode::Padt, session_id);
        ingress_tx
            .send(IngressFrame { encap: encap(), payload: padt.encode(), kind: FrameKind::Discovery })
            .await
            .expect("send PADT");

        wait_until(|| forwarder.add_call_count() >= 2).await;
        wait_until(|| !aaa.stop_calls.lock().expect("mutex").is_empty()).await;

        let calls = forwarder.add_calls.lock().expect("mutex");
        assert_eq!(calls[1], (pool, session_id, encap().src_mac, None, false));
        let stops = aaa.stop_calls.lock().expect("mutex");
        assert_eq!(*stops, vec![String::from("aaa-1")]);
    }
}
