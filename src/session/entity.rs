// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The session entity: owns the four PPP FSMs, the negotiated address
//! state, and the Echo keepalive. Dispatch methods translate wire frames
//! into kernel events and kernel/other outputs back into wire frames
//! plus `SessionEffect`s the reactor must act on (arming timers, calling
//! the forwarder or AAA). The session never reaches back into the
//! registry or the reactor itself — all communication is by return value.

use std::{net::Ipv4Addr, time::Duration};

use crate::{
    error::CoreError,
    fsm::{
        chap::ChapMachine,
        ipcp::IpcpPolicy,
        kernel::{self, Event, Output, PppFsm},
        lcp::{EchoKeepalive, LcpPolicy},
        pap::PapMachine,
    },
    session::Encap,
    wire::{
        ppp_header::{ChapCode, ChapPacket, FsmPacket, PapPacket},
        session_hdr::{PppProtocol, SessionFrame},
    },
};

pub type LcpFsm = PppFsm<LcpPolicy>;
pub type IpcpFsm = PppFsm<IpcpPolicy>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmKind {
    Lcp,
    Ipcp,
}

/// Negotiated addressing state, modeled on
/// `original_source/src/session.cpp`'s `vrf`/`unnumbered` members.
#[derive(Debug, Clone, Default)]
pub struct SessionAddress {
    pub peer_ipv4: Option<Ipv4Addr>,
    pub dns_primary: Option<Ipv4Addr>,
    pub dns_secondary: Option<Ipv4Addr>,
    pub vrf: Option<String>,
    pub unnumbered: Option<String>,
    pub framed_pool: Option<String>,
}

/// Work the reactor must do on behalf of a session after a dispatch call.
/// Sessions never perform I/O themselves.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    ArmFsmTimer { fsm: FsmKind, after: Duration },
    StopFsmTimer { fsm: FsmKind },
    ArmEchoTimer { after: Duration },
    /// PAP parsed a request; forward the credentials to AAA.
    AuthenticateWithAaa { peer_id: Vec<u8>, password: Vec<u8> },
    /// CHAP parsed a response but needs the subscriber's secret from AAA
    /// before it can verify it.
    FetchChapSecret { peer_name: Vec<u8> },
    /// Authentication succeeded; the caller should start IPCP.
    Authenticated,
    /// LCP or CHAP/PAP failed or CHAP failure requested LCP close.
    AuthenticationFailed,
    /// IPCP reached Opened: provision the forwarder and register with AAA.
    IpcpUp,
    /// LCP's Echo keepalive exceeded its failure threshold, or LCP
    /// otherwise finished: tear the whole session down.
    LayerFinished,
}

pub struct Session {
    pub session_id: u16,
    pub encap: Encap,
    pub ifindex: Option<u32>,
    pub address: SessionAddress,
    pub aaa_session_id: Option<String>,
    pub started: bool,

    pub lcp: LcpFsm,
    pub pap: PapMachine,
    pub chap: ChapMachine,
    pub ipcp: IpcpFsm,

    echo: Option<EchoKeepalive>,
    pending_chap_response: Option<ChapPacket>,
    auth_chap: bool,
    auth_pap: bool,
}

impl Session {
    pub fn new(
        session_id: u16,
        encap: Encap,
        lcp_policy: LcpPolicy,
        ipcp_policy: IpcpPolicy,
        auth_chap: bool,
        auth_pap: bool,
    ) -> Self {
        Self {
            session_id,
            encap,
            ifindex: None,
            address: SessionAddress::default(),
            aaa_session_id: None,
            started: false,
            lcp: PppFsm::new(lcp_policy),
            pap: PapMachine::new(),
            chap: ChapMachine::new(),
            ipcp: PppFsm::new(ipcp_policy),
            echo: None,
            pending_chap_response: None,
            auth_chap,
            auth_pap,
        }
    }

    /// First session-phase frame for this id: lazily brings LCP up
    /// (`original_source/src/ppp.cpp`'s `if (!session->started) ...`).
    pub fn ensure_started(&mut self) -> Vec<(PppProtocol, Vec<u8>, Vec<SessionEffect>)> {
        if self.started {
            return Vec::new();
        }
        self.started = true;
        let mut out = Vec::new();
        // Open (Initial -> Starting) must precede Up (Starting -> RequestSent,
        // which is what actually transmits the first Configure-Request).
        for o in self.lcp.step(Event::Open) {
            push_lcp_output(&mut out, o);
        }
        for o in self.lcp.step(Event::Up) {
            push_lcp_output(&mut out, o);
        }
        out
    }

    /// Routes an inbound PPP payload to the right FSM by protocol number.
    pub fn handle_frame(
        &mut self,
        protocol: PppProtocol,
        payload: &[u8],
    ) -> Result<Vec<(PppProtocol, Vec<u8>, Vec<SessionEffect>)>, CoreError> {
        match protocol {
            PppProtocol::Lcp => self.handle_lcp(payload),
            PppProtocol::Pap => self.handle_pap(payload),
            PppProtocol::Chap => self.handle_chap(payload),
            PppProtocol::Ipcp => self.handle_ipcp(payload),
            PppProtocol::Ipv4 => Ok(Vec::new()),
        }
    }

    fn handle_lcp(&mut self, payload: &[u8]) -> Result<Vec<(PppProtocol, Vec<u8>, Vec<SessionEffect>)>, CoreError> {
        let pkt = FsmPacket::decode(payload)?;

        // Echo-Reply is ours to track, not the kernel's.
        if pkt.code == crate::wire::ppp_header::LcpCode::EchoReply {
            if let (Some(echo), Ok(magic)) = (self.echo.as_mut(), parse_magic(&pkt.body)) {
                echo.on_reply(magic);
            }
            return Ok(Vec::new());
        }

        let event = kernel::decode_to_event(&pkt)?;
        let was_opened = matches!(self.lcp.state(), crate::fsm::kernel::FsmState::Opened);
        let outputs = self.lcp.step(event);
        let mut out = Vec::new();
        let mut layer_up = false;
        for o in outputs {
            if matches!(o, Output::LayerUp) {
                layer_up = true;
            }
            push_lcp_output(&mut out, o);
        }
        if layer_up && !was_opened {
            self.on_lcp_opened(&mut out);
        }
        Ok(out)
    }

    fn on_lcp_opened(&mut self, out: &mut Vec<(PppProtocol, Vec<u8>, Vec<SessionEffect>)>) {
        if self.auth_chap {
            let pkt = self.chap.open(b"bng-ac");
            out.push((PppProtocol::Chap, pkt.encode(), Vec::new()));
        } else if self.auth_pap {
            // PAP is passive: nothing to send until the peer initiates.
        } else {
            // No authentication configured for this VLAN: IPCP starts as
            // soon as LCP is up, same as if auth had already succeeded.
            out.extend(self.start_ipcp());
        }
    }

    fn handle_pap(&mut self, payload: &[u8]) -> Result<Vec<(PppProtocol, Vec<u8>, Vec<SessionEffect>)>, CoreError> {
        let pkt = PapPacket::decode(payload)?;
        let (peer_id, password) = self.pap.on_request(&pkt)?;
        Ok(vec![(
            PppProtocol::Pap,
            Vec::new(),
            vec![SessionEffect::AuthenticateWithAaa { peer_id: peer_id.to_vec(), password: password.to_vec() }],
        )])
    }

    /// Called once AAA answers the PAP credential check.
    pub fn complete_pap(&mut self, success: bool) -> Vec<(PppProtocol, Vec<u8>, Vec<SessionEffect>)> {
        let pkt = self.pap.on_aaa_result(success, b"");
        let effect = if success { SessionEffect::Authenticated } else { SessionEffect::AuthenticationFailed };
        vec![(PppProtocol::Pap, pkt.encode(), vec![effect])]
    }

    fn handle_chap(&mut self, payload: &[u8]) -> Result<Vec<(PppProtocol, Vec<u8>, Vec<SessionEffect>)>, CoreError> {
        let pkt = ChapPacket::decode(payload)?;
        if pkt.code != ChapCode::Response {
            return Err(CoreError::MalformedFrame("unexpected CHAP code from peer".into()));
        }
        let (_value, name) = pkt.parse_value_and_name()?;
        self.pending_chap_response = Some(pkt);
        Ok(vec![(PppProtocol::Chap, Vec::new(), vec![SessionEffect::FetchChapSecret { peer_name: name.to_vec() }])])
    }

    /// Called once AAA returns the subscriber's shared secret.
    pub fn complete_chap(&mut self, secret: &[u8]) -> Result<Vec<(PppProtocol, Vec<u8>, Vec<SessionEffect>)>, CoreError> {
        let pkt = self.pending_chap_response.take().ok_or_else(|| {
            CoreError::MalformedFrame("CHAP secret arrived with no outstanding response".into())
        })?;
        let ok = self.chap.verify_response(&pkt, secret)?;
        let reply = if ok { self.chap.success(b"Welcome") } else { self.chap.failure(b"Authentication failed") };
        let effect = if ok { SessionEffect::Authenticated } else { SessionEffect::AuthenticationFailed };
        Ok(vec![(PppProtocol::Chap, reply.encode(), vec![effect])])
    }

    /// Starts IPCP once authentication has succeeded (or no authentication
    /// was required) and LCP is up.
    pub fn start_ipcp(&mut self) -> Vec<(PppProtocol, Vec<u8>, Vec<SessionEffect>)> {
        let mut out = Vec::new();
        for o in self.ipcp.step(Event::Open) {
            push_ipcp_output(&mut out, o);
        }
        for o in self.ipcp.step(Event::Up) {
            push_ipcp_output(&mut out, o);
        }
        out
    }

    fn handle_ipcp(&mut self, payload: &[u8]) -> Result<Vec<(PppProtocol, Vec<u8>, Vec<SessionEffect>)>, CoreError> {
        let pkt = FsmPacket::decode(payload)?;
        let event = kernel::decode_to_event(&pkt)?;
        let was_opened = matches!(self.ipcp.state(), crate::fsm::kernel::FsmState::Opened);
        let outputs = self.ipcp.step(event);
        let mut out = Vec::new();
        let mut layer_up = false;
        for o in outputs {
            if matches!(o, Output::LayerUp) {
                layer_up = true;
            }
            push_ipcp_output(&mut out, o);
        }
        if layer_up && !was_opened {
            out.push((PppProtocol::Ipcp, Vec::new(), vec![SessionEffect::IpcpUp]));
        }
        Ok(out)
    }

    pub fn arm_echo(&mut self, magic_number: u32) -> Duration {
        let echo = EchoKeepalive::new(magic_number);
        let interval = echo.next_interval();
        self.echo = Some(echo);
        interval
    }

    /// Fires on every Echo timer tick; returns the Echo-Request frame (or
    /// a `LayerFinished` effect once the failure threshold trips).
    pub fn on_echo_tick(&mut self) -> (Option<Vec<u8>>, Vec<SessionEffect>) {
        let Some(echo) = self.echo.as_mut() else {
            return (None, Vec::new());
        };
        match echo.on_tick() {
            crate::fsm::lcp::EchoTick::Send(magic) => {
                let pkt = FsmPacket::new(crate::wire::ppp_header::LcpCode::EchoRequest, 0, magic.to_be_bytes().to_vec());
                let frame = SessionFrame::new(self.session_id, PppProtocol::Lcp, pkt.encode()).encode();
                let interval = echo.next_interval();
                (Some(frame), vec![SessionEffect::ArmEchoTimer { after: interval }])
            }
            crate::fsm::lcp::EchoTick::LayerDown => (None, vec![SessionEffect::LayerFinished]),
        }
    }

    pub fn on_fsm_timer(&mut self, fsm: FsmKind) -> Vec<(PppProtocol, Vec<u8>, Vec<SessionEffect>)> {
        let mut out = Vec::new();
        match fsm {
            FsmKind::Lcp => {
                for o in self.lcp.step(Event::TimerExpiry) {
                    push_lcp_output(&mut out, o);
                }
            }
            FsmKind::Ipcp => {
                for o in self.ipcp.step(Event::TimerExpiry) {
                    push_ipcp_output(&mut out, o);
                }
            }
        }
        out
    }
}

fn parse_magic(body: &[u8]) -> Result<u32, CoreError> {
    let bytes: [u8; 4] = body.try_into().map_err(|_| CoreError::MalformedFrame("short magic number".into()))?;
    Ok(u32::from_be_bytes(bytes))
}

fn push_lcp_output(out: &mut Vec<(PppProtocol, Vec<u8>, Vec<SessionEffect>)>, o: Output) {
    push_fsm_output(out, PppProtocol::Lcp, FsmKind::Lcp, o);
}

fn push_ipcp_output(out: &mut Vec<(PppProtocol, Vec<u8>, Vec<SessionEffect>)>, o: Output) {
    push_fsm_output(out, PppProtocol::Ipcp, FsmKind::Ipcp, o);
}

fn push_fsm_output(
    out: &mut Vec<(PppProtocol, Vec<u8>, Vec<SessionEffect>)>,
    protocol: PppProtocol,
    kind: FsmKind,
    o: Output,
) {
    match o {
        Output::Transmit(pkt) => out.push((protocol, pkt.encode(), Vec::new())),
        Output::ArmRestartTimer(after) => out.push((protocol, Vec::new(), vec![SessionEffect::ArmFsmTimer { fsm: kind, after }])),
        Output::StopRestartTimer => out.push((protocol, Vec::new(), vec![SessionEffect::StopFsmTimer { fsm: kind }])),
        Output::LayerFinished if matches!(kind, FsmKind::Lcp) => {
            out.push((protocol, Vec::new(), vec![SessionEffect::LayerFinished]))
        }
        Output::LayerUp | Output::LayerDown | Output::LayerStarted | Output::LayerFinished => {}
    }
}
