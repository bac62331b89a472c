// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! PAP: a passive responder, no retransmission of our own.
//! The machine never touches AAA directly — it hands the caller the
//! parsed credentials and is later told the verdict.

use crate::{
    error::CoreError,
    wire::ppp_header::{PapCode, PapPacket},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PapState {
    WaitingRequest,
    AwaitingAaa,
    Done,
}

pub struct PapMachine {
    state: PapState,
    pending_identifier: u8,
}

impl Default for PapMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PapMachine {
    pub fn new() -> Self {
        Self { state: PapState::WaitingRequest, pending_identifier: 0 }
    }

    pub fn state(&self) -> PapState {
        self.state
    }

    /// Parses an Authenticate-Request, returning `(peer_id, password)` to
    /// forward to AAA. Fails the machine state unchanged on a malformed or
    /// out-of-order packet.
    pub fn on_request<'a>(&mut self, pkt: &'a PapPacket) -> Result<(&'a [u8], &'a [u8]), CoreError> {
        if pkt.code != PapCode::AuthenticateRequest {
            return Err(CoreError::MalformedFrame("expected PAP Authenticate-Request".into()));
        }
        let (peer_id, password) = pkt.parse_request()?;
        self.pending_identifier = pkt.identifier;
        self.state = PapState::AwaitingAaa;
        Ok((peer_id, password))
    }

    /// Builds the Ack/Nak once AAA has answered.
    pub fn on_aaa_result(&mut self, success: bool, message: &[u8]) -> PapPacket {
        self.state = PapState::Done;
        let code = if success { PapCode::AuthenticateAck } else { PapCode::AuthenticateNak };
        PapPacket::ack_or_nak(code, self.pending_identifier, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_then_success_produces_ack() {
        let mut pap = PapMachine::new();
        let req = PapPacket::request(3, b"subscriber1", b"hunter2");
        let (peer_id, password) = pap.on_request(&req).expect("parse");
        assert_eq!(peer_id, b"subscriber1");
        assert_eq!(password, b"hunter2");
        assert_eq!(pap.state(), PapState::AwaitingAaa);

        let reply = pap.on_aaa_result(true, b"");
        assert_eq!(reply.code, PapCode::AuthenticateAck);
        assert_eq!(reply.identifier, 3);
        assert_eq!(pap.state(), PapState::Done);
    }

    #[test]
    fn aaa_failure_produces_nak() {
        let mut pap = PapMachine::new();
        let req = PapPacket::request(9, b"subscriber1", b"wrong");
        pap.on_request(&req).expect("parse");
        let reply = pap.on_aaa_result(false, b"denied");
        assert_eq!(reply.code, PapCode::AuthenticateNak);
    }
}
