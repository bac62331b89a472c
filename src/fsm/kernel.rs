// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Generic PPP Option Negotiation state machine (RFC 1661 §4), shared by
//! LCP and IPCP. The RFC table is implemented verbatim in `step`; the
//! option-specific parts (which options to offer, whether a peer's option
//! is acceptable, what counter-proposal to Nak with) come from an
//! `OptionPolicy` supplied by the caller.

use std::time::Duration;

use crate::{
    error::CoreError,
    wire::{
        options::{encode_options, parse_options, RawOption},
        ppp_header::{FsmPacket, LcpCode},
    },
};

pub const MAX_CONFIGURE: u32 = 10;
pub const MAX_TERMINATE: u32 = 2;
pub const MAX_FAILURE: u32 = 5;
pub const RESTART_TIMER: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmState {
    Initial,
    Starting,
    Closed,
    Stopped,
    Closing,
    Stopping,
    RequestSent,
    AckReceived,
    AckSent,
    Opened,
}

/// Events accepted by the kernel. `TimerExpiry` folds
/// `TimeoutPositive`/`TimeoutNegative` into one event: the kernel itself
/// tracks the restart counter and picks the right RFC transition.
#[derive(Debug, Clone)]
pub enum Event {
    Up,
    Down,
    Open,
    Close,
    TimerExpiry,
    RcvConfReq(u8, Vec<RawOption>),
    RcvConfAck(u8),
    RcvConfNak(u8, Vec<RawOption>),
    RcvConfRej(u8, Vec<RawOption>),
    RcvTermReq(u8),
    RcvTermAck,
    RcvCodeRej,
    RcvEchoReq(u8, u32),
    RcvEchoRep(u32),
    RcvDiscardReq,
}

/// What the caller must do in response to a `step()` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Transmit(FsmPacket),
    /// `tlu`: lower/upper layer may now pass traffic.
    LayerUp,
    /// `tld`: traffic must stop; negotiation is restarting or tearing down.
    LayerDown,
    /// `tls`: this layer is starting negotiation.
    LayerStarted,
    /// `tlf`: this layer has finished; safe to tear the session down.
    LayerFinished,
    ArmRestartTimer(Duration),
    StopRestartTimer,
}

/// How a single peer-offered option should be treated.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionVerdict {
    Ack,
    Nak(RawOption),
    Reject,
}

/// The option-specific half of an FSM: what LCP and IPCP each disagree on.
pub trait OptionPolicy {
    /// Options we offer in our own Configure-Request, in order.
    fn desired_options(&self) -> Vec<RawOption>;

    /// Judges one option from the peer's Configure-Request.
    fn classify(&self, opt: &RawOption) -> OptionVerdict;

    /// Applies a Nak's counter-proposals to our next Configure-Request.
    fn apply_nak(&mut self, opts: &[RawOption]);

    /// Applies a Reject: the rejected option types are no longer offered.
    fn apply_reject(&mut self, opts: &[RawOption]);
}

pub struct PppFsm<P: OptionPolicy> {
    pub policy: P,
    state: FsmState,
    restart_count: u32,
    failure_count: u32,
    next_identifier: u8,
    last_sent_identifier: u8,
}

impl<P: OptionPolicy> PppFsm<P> {
    pub fn new(policy: P) -> Self {
        Self {
            policy,
            state: FsmState::Initial,
            restart_count: 0,
            failure_count: 0,
            next_identifier: 0,
            last_sent_identifier: 0,
        }
    }

    pub fn state(&self) -> FsmState {
        self.state
    }

    fn fresh_identifier(&mut self) -> u8 {
        let id = self.next_identifier;
        self.next_identifier = self.next_identifier.wrapping_add(1);
        id
    }

    fn configure_request_packet(&mut self) -> FsmPacket {
        let id = self.fresh_identifier();
        self.last_sent_identifier = id;
        let body = encode_options(&self.policy.desired_options());
        FsmPacket::new(LcpCode::ConfigureRequest, id, body)
    }

    fn irc(&mut self) {
        self.restart_count = MAX_CONFIGURE;
    }

    fn zrc(&mut self) {
        self.restart_count = 0;
    }

    /// Decrements the restart counter; `true` means retransmit (positive),
    /// `false` means give up (negative).
    fn tick_restart(&mut self) -> bool {
        if self.restart_count > 0 {
            self.restart_count -= 1;
            true
        } else {
            false
        }
    }

    /// Drives one event through the RFC 1661 Appendix A table.
    pub fn step(&mut self, event: Event) -> Vec<Output> {
        use FsmState::*;
        let mut out = Vec::new();

        match (self.state, event) {
            // --- administrative ---
            (Initial, Event::Up) => self.state = Starting,
            (Starting, Event::Down) => self.state = Initial,
            (_, Event::Open) if matches!(self.state, Initial) => {
                self.state = Starting;
                out.push(Output::LayerStarted);
            }
            (Closed, Event::Open) | (Stopped, Event::Open) => {
                self.irc();
                let pkt = self.configure_request_packet();
                out.push(Output::Transmit(pkt));
                out.push(Output::ArmRestartTimer(RESTART_TIMER));
                self.state = RequestSent;
            }
            (_, Event::Close) if matches!(self.state, Starting) => {
                self.state = Initial;
            }
            (Stopped, Event::Close) => self.state = Closed,
            (Closed, Event::Close) => {}
            (RequestSent | AckReceived | AckSent, Event::Close) => {
                self.irc();
                out.push(Output::Transmit(term_request(self.fresh_identifier())));
                out.push(Output::ArmRestartTimer(RESTART_TIMER));
                self.state = Closing;
            }
            (Opened, Event::Close) => {
                out.push(Output::LayerDown);
                self.irc();
                out.push(Output::Transmit(term_request(self.fresh_identifier())));
                out.push(Output::ArmRestartTimer(RESTART_TIMER));
                self.state = Closing;
            }
            (Closing | Stopping, Event::Close) => {}

            // --- lower layer up/down while negotiating ---
            (Starting, Event::Up) => {
                self.irc();
                let pkt = self.configure_request_packet();
                out.push(Output::Transmit(pkt));
                out.push(Output::ArmRestartTimer(RESTART_TIMER));
                self.state = RequestSent;
            }
            (Closing | Stopping | RequestSent | AckReceived | AckSent | Opened, Event::Down) => {
                if matches!(self.state, Opened) {
                    out.push(Output::LayerDown);
                }
                out.push(Output::StopRestartTimer);
                self.state = Starting;
            }
            (Closed | Stopped, Event::Down) => {}

            // --- timer expiry: decide TO+ vs TO- internally ---
            (Closing | Stopping, Event::TimerExpiry) => {
                if self.tick_restart() {
                    out.push(Output::Transmit(term_request(self.fresh_identifier())));
                    out.push(Output::ArmRestartTimer(RESTART_TIMER));
                } else {
                    out.push(Output::LayerFinished);
                    self.state = if matches!(self.state, Closing) { Closed } else { Stopped };
                }
            }
            (RequestSent | AckReceived | AckSent, Event::TimerExpiry) => {
                if self.tick_restart() {
                    let pkt = self.configure_request_packet();
                    out.push(Output::Transmit(pkt));
                    out.push(Output::ArmRestartTimer(RESTART_TIMER));
                    self.state = RequestSent;
                } else {
                    out.push(Output::LayerFinished);
                    self.state = Stopped;
                }
            }

            // --- Configure-Request from peer ---
            (Closed, Event::RcvConfReq(id, _)) => {
                out.push(Output::Transmit(term_ack(id)));
            }
            (Stopped, Event::RcvConfReq(id, opts)) => {
                self.irc();
                let pkt = self.configure_request_packet();
                out.push(Output::Transmit(pkt));
                out.push(Output::ArmRestartTimer(RESTART_TIMER));
                let good = out_is_good(&mut self.policy, &opts);
                out.extend(self.respond_to_peer_request(id, &opts));
                self.state = if good { AckSent } else { RequestSent };
            }
            (RequestSent, Event::RcvConfReq(id, opts)) => {
                let good = out_is_good(&mut self.policy, &opts);
                out.extend(self.respond_to_peer_request(id, &opts));
                self.state = if good { AckSent } else { RequestSent };
            }
            (AckReceived, Event::RcvConfReq(id, opts)) => {
                let good = out_is_good(&mut self.policy, &opts);
                out.extend(self.respond_to_peer_request(id, &opts));
                if good {
                    out.push(Output::LayerUp);
                    self.state = Opened;
                } else {
                    self.state = AckReceived;
                }
            }
            (AckSent, Event::RcvConfReq(id, opts)) => {
                let good = out_is_good(&mut self.policy, &opts);
                out.extend(self.respond_to_peer_request(id, &opts));
                self.state = if good { AckSent } else { RequestSent };
            }
            (Opened, Event::RcvConfReq(id, opts)) => {
                out.push(Output::LayerDown);
                let pkt = self.configure_request_packet();
                out.push(Output::Transmit(pkt));
                out.push(Output::ArmRestartTimer(RESTART_TIMER));
                out.extend(self.respond_to_peer_request(id, &opts));
                self.state = RequestSent;
            }

            // --- Configure-Ack from peer ---
            (RequestSent, Event::RcvConfAck(id)) if id == self.last_sent_identifier => {
                self.state = AckReceived;
                self.restart_count = MAX_CONFIGURE;
            }
            (AckReceived, Event::RcvConfAck(id)) if id == self.last_sent_identifier => {
                let pkt = self.configure_request_packet();
                out.push(Output::Transmit(pkt));
                out.push(Output::ArmRestartTimer(RESTART_TIMER));
                self.state = RequestSent;
            }
            (AckSent, Event::RcvConfAck(id)) if id == self.last_sent_identifier => {
                out.push(Output::LayerUp);
                self.state = Opened;
            }
            (Opened, Event::RcvConfAck(_)) => {
                out.push(Output::LayerDown);
                let pkt = self.configure_request_packet();
                out.push(Output::Transmit(pkt));
                out.push(Output::ArmRestartTimer(RESTART_TIMER));
                self.state = RequestSent;
            }

            // --- Configure-Nak / Configure-Reject from peer ---
            (RequestSent | AckSent, Event::RcvConfNak(id, opts)) if id == self.last_sent_identifier => {
                self.restart_count = MAX_CONFIGURE;
                self.policy.apply_nak(&opts);
                let pkt = self.configure_request_packet();
                out.push(Output::Transmit(pkt));
                out.push(Output::ArmRestartTimer(RESTART_TIMER));
                self.state = RequestSent;
            }
            (AckReceived, Event::RcvConfNak(id, opts)) if id == self.last_sent_identifier => {
                self.policy.apply_nak(&opts);
                let pkt = self.configure_request_packet();
                out.push(Output::Transmit(pkt));
                out.push(Output::ArmRestartTimer(RESTART_TIMER));
                self.state = RequestSent;
            }
            (RequestSent | AckSent, Event::RcvConfRej(id, opts)) if id == self.last_sent_identifier => {
                self.restart_count = MAX_CONFIGURE;
                self.policy.apply_reject(&opts);
                let pkt = self.configure_request_packet();
                out.push(Output::Transmit(pkt));
                out.push(Output::ArmRestartTimer(RESTART_TIMER));
                self.state = RequestSent;
            }
            (AckReceived, Event::RcvConfRej(id, opts)) if id == self.last_sent_identifier => {
                self.policy.apply_reject(&opts);
                let pkt = self.configure_request_packet();
                out.push(Output::Transmit(pkt));
                out.push(Output::ArmRestartTimer(RESTART_TIMER));
                self.state = RequestSent;
            }
            (Opened, Event::RcvConfNak(_, opts)) => {
                out.push(Output::LayerDown);
                self.policy.apply_nak(&opts);
                let pkt = self.configure_request_packet();
                out.push(Output::Transmit(pkt));
                out.push(Output::ArmRestartTimer(RESTART_TIMER));
                self.state = RequestSent;
            }
            (Opened, Event::RcvConfRej(_, opts)) => {
                out.push(Output::LayerDown);
                self.policy.apply_reject(&opts);
                let pkt = self.configure_request_packet();
                out.push(Output::Transmit(pkt));
                out.push(Output::ArmRestartTimer(RESTART_TIMER));
                self.state = RequestSent;
            }
            (_, Event::RcvConfNak(..) | Event::RcvConfRej(..)) => {}

            // --- Terminate-Request from peer: always answer, always drop to Stopping-ish ---
            (Opened, Event::RcvTermReq(id)) => {
                out.push(Output::LayerDown);
                out.push(Output::Transmit(term_ack(id)));
                self.zrc();
                out.push(Output::ArmRestartTimer(RESTART_TIMER));
                self.state = Stopping;
            }
            (RequestSent | AckReceived | AckSent, Event::RcvTermReq(id)) => {
                out.push(Output::Transmit(term_ack(id)));
                self.state = RequestSent;
            }
            (_, Event::RcvTermReq(id)) => {
                out.push(Output::Transmit(term_ack(id)));
            }

            // --- Terminate-Ack from peer ---
            (Closing, Event::RcvTermAck) => {
                out.push(Output::LayerFinished);
                self.state = Closed;
            }
            (Stopping, Event::RcvTermAck) => {
                out.push(Output::LayerFinished);
                self.state = Stopped;
            }
            (AckReceived | AckSent, Event::RcvTermAck) => {
                let pkt = self.configure_request_packet();
                out.push(Output::Transmit(pkt));
                out.push(Output::ArmRestartTimer(RESTART_TIMER));
                self.state = RequestSent;
            }
            (Opened, Event::RcvTermAck) => {
                out.push(Output::LayerDown);
                let pkt = self.configure_request_packet();
                out.push(Output::Transmit(pkt));
                out.push(Output::ArmRestartTimer(RESTART_TIMER));
                self.state = RequestSent;
            }
            (_, Event::RcvTermAck) => {}

            // --- Code-Reject / unrecognized codes from peer ---
            (Opened, Event::RcvCodeRej) => {
                out.push(Output::LayerDown);
                self.failure_count += 1;
                if self.failure_count > MAX_FAILURE {
                    out.push(Output::LayerFinished);
                    self.state = Stopped;
                } else {
                    let pkt = self.configure_request_packet();
                    out.push(Output::Transmit(pkt));
                    out.push(Output::ArmRestartTimer(RESTART_TIMER));
                    self.state = RequestSent;
                }
            }
            (RequestSent | AckReceived | AckSent, Event::RcvCodeRej) => {
                self.failure_count += 1;
                if self.failure_count > MAX_FAILURE {
                    out.push(Output::LayerFinished);
                    self.state = Stopped;
                }
            }
            (_, Event::RcvCodeRej) => {}

            // --- Echo / Discard: only meaningful in Opened, answered regardless ---
            (Opened, Event::RcvEchoReq(id, magic)) => {
                out.push(Output::Transmit(echo_reply(id, magic)));
            }
            (_, Event::RcvEchoReq(..) | Event::RcvEchoRep(_) | Event::RcvDiscardReq) => {}

            // Every other (state, event) pair is a no-op per RFC 1661 Appendix A
            // (e.g. Open while Starting, Up while already past Starting).
            _ => {}
        }

        out
    }

    /// Evaluates the peer's whole Configure-Request and emits the right
    /// Ack/Nak/Reject, returning just the `Output`s (state transition is
    /// the caller's responsibility, matching the RFC table above).
    fn respond_to_peer_request(&mut self, id: u8, opts: &[RawOption]) -> Vec<Output> {
        let mut acks = Vec::new();
        let mut naks = Vec::new();
        let mut rejects = Vec::new();

        for opt in opts {
            match self.policy.classify(opt) {
                OptionVerdict::Ack => acks.push(opt.clone()),
                OptionVerdict::Nak(proposal) => naks.push(proposal),
                OptionVerdict::Reject => rejects.push(opt.clone()),
            }
        }

        let code = if !rejects.is_empty() {
            LcpCode::ConfigureReject
        } else if !naks.is_empty() {
            LcpCode::ConfigureNak
        } else {
            LcpCode::ConfigureAck
        };
        let body_opts: &[RawOption] = if !rejects.is_empty() {
            &rejects
        } else if !naks.is_empty() {
            &naks
        } else {
            &acks
        };
        vec![Output::Transmit(FsmPacket::new(code, id, encode_options(body_opts)))]
    }
}

fn out_is_good(policy: &mut dyn OptionPolicy, opts: &[RawOption]) -> bool {
    opts.iter().all(|o| matches!(policy.classify(o), OptionVerdict::Ack))
}

fn term_request(id: u8) -> FsmPacket {
    FsmPacket::new(LcpCode::TerminateRequest, id, Vec::new())
}

fn term_ack(id: u8) -> FsmPacket {
    FsmPacket::new(LcpCode::TerminateAck, id, Vec::new())
}

fn echo_reply(id: u8, magic: u32) -> FsmPacket {
    FsmPacket::new(LcpCode::EchoReply, id, magic.to_be_bytes().to_vec())
}

fn be32(body: &[u8]) -> Result<u32, CoreError> {
    let bytes: [u8; 4] =
        body.try_into().map_err(|_| CoreError::MalformedFrame("expected a 4-byte magic number".into()))?;
    Ok(u32::from_be_bytes(bytes))
}

/// Translates a decoded `FsmPacket` into the kernel `Event` it represents.
/// Session code feeds the result into `PppFsm::step`, except for
/// `RcvEchoRep`, which the session intercepts directly for the Echo
/// keepalive (the kernel treats it as a no-op regardless).
pub fn decode_to_event(pkt: &FsmPacket) -> Result<Event, CoreError> {
    Ok(match pkt.code {
        LcpCode::ConfigureRequest => Event::RcvConfReq(pkt.identifier, parse_options(&pkt.body)?),
        LcpCode::ConfigureAck => Event::RcvConfAck(pkt.identifier),
        LcpCode::ConfigureNak => Event::RcvConfNak(pkt.identifier, parse_options(&pkt.body)?),
        LcpCode::ConfigureReject => Event::RcvConfRej(pkt.identifier, parse_options(&pkt.body)?),
        LcpCode::TerminateRequest => Event::RcvTermReq(pkt.identifier),
        LcpCode::TerminateAck => Event::RcvTermAck,
        LcpCode::CodeReject | LcpCode::ProtocolReject => Event::RcvCodeRej,
        LcpCode::EchoRequest => Event::RcvEchoReq(pkt.identifier, be32(&pkt.body)?),
        LcpCode::EchoReply => Event::RcvEchoRep(be32(&pkt.body)?),
        LcpCode::DiscardRequest => Event::RcvDiscardReq,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AcceptAll;

    impl OptionPolicy for AcceptAll {
        fn desired_options(&self) -> Vec<RawOption> {
            vec![RawOption::mru(1492)]
        }
        fn classify(&self, _opt: &RawOption) -> OptionVerdict {
            OptionVerdict::Ack
        }
        fn apply_nak(&mut self, _opts: &[RawOption]) {}
        fn apply_reject(&mut self, _opts: &[RawOption]) {}
    }

    #[test]
    fn open_then_ack_reaches_opened() {
        let mut fsm = PppFsm::new(AcceptAll);
        fsm.step(Event::Open);
        let out = fsm.step(Event::Up);
        assert_eq!(fsm.state(), FsmState::RequestSent);
        let id = match &out[0] {
            Output::Transmit(p) => p.identifier,
            _ => panic!("expected Transmit"),
        };

        let out = fsm.step(Event::RcvConfAck(id));
        assert_eq!(fsm.state(), FsmState::AckReceived);

        let out2 = fsm.step(Event::RcvConfReq(9, vec![RawOption::mru(1492)]));
        assert!(out2.iter().any(|o| matches!(o, Output::LayerUp)));
        assert_eq!(fsm.state(), FsmState::Opened);
        let _ = out;
    }

    #[test]
    fn term_req_in_opened_drops_layer_and_answers() {
        let mut fsm = PppFsm::new(AcceptAll);
        fsm.step(Event::Open);
        let out = fsm.step(Event::Up);
        let id = match &out[0] {
            Output::Transmit(p) => p.identifier,
            _ => panic!("expected Transmit"),
        };
        fsm.step(Event::RcvConfAck(id));
        fsm.step(Event::RcvConfReq(9, vec![RawOption::mru(1492)]));
        assert_eq!(fsm.state(), FsmState::Opened);

        let out = fsm.step(Event::RcvTermReq(42));
        assert!(out.iter().any(|o| matches!(o, Output::LayerDown)));
        assert!(out.iter().any(|o| matches!(o, Output::Transmit(p) if p.code == LcpCode::TerminateAck && p.identifier == 42)));
        assert_eq!(fsm.state(), FsmState::Stopping);
    }

    #[test]
    fn stopped_request_starts_our_own_negotiation() {
        let mut fsm = PppFsm::new(AcceptAll);
        fsm.step(Event::Open);
        fsm.step(Event::Up);
        assert_eq!(fsm.state(), FsmState::RequestSent);

        // Exhaust the restart counter so the kernel gives up and settles in
        // Stopped, as a peer that never answers our Configure-Request would
        // cause.
        let mut reached_stopped = false;
        for _ in 0..=MAX_CONFIGURE {
            let out = fsm.step(Event::TimerExpiry);
            if out.iter().any(|o| matches!(o, Output::LayerFinished)) {
                reached_stopped = true;
                break;
            }
        }
        assert!(reached_stopped);
        assert_eq!(fsm.state(), FsmState::Stopped);

        let out = fsm.step(Event::RcvConfReq(9, vec![RawOption::mru(1492)]));
        assert!(out.iter().any(|o| matches!(o, Output::Transmit(p) if p.code == LcpCode::ConfigureRequest)));
        assert!(out.iter().any(|o| matches!(o, Output::Transmit(p) if p.code == LcpCode::ConfigureAck && p.identifier == 9)));
        assert_eq!(fsm.state(), FsmState::AckSent);
    }
}
