// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! CHAP: we are the authenticator, so we drive the exchange —
//! issue the Challenge on `open`, verify the Response against the secret
//! AAA hands back.

use md5::{Digest, Md5};
use rand::Rng;

use crate::{
    error::CoreError,
    wire::ppp_header::{ChapCode, ChapPacket},
};

const CHALLENGE_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapState {
    Idle,
    ChallengeSent,
    Done,
}

pub struct ChapMachine {
    state: ChapState,
    identifier: u8,
    challenge: Vec<u8>,
}

impl Default for ChapMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ChapMachine {
    pub fn new() -> Self {
        Self { state: ChapState::Idle, identifier: 0, challenge: Vec::new() }
    }

    pub fn state(&self) -> ChapState {
        self.state
    }

    /// Generates a fresh 16-byte challenge and the Challenge packet to send.
    pub fn open(&mut self, authenticator_name: &[u8]) -> ChapPacket {
        let mut challenge = vec![0u8; CHALLENGE_LEN];
        rand::rng().fill(challenge.as_mut_slice());
        let identifier: u8 = rand::rng().random();

        self.identifier = identifier;
        self.challenge = challenge.clone();
        self.state = ChapState::ChallengeSent;

        ChapPacket::challenge(identifier, &challenge, authenticator_name)
    }

    /// Verifies a Response against the secret AAA returned for this peer.
    /// Returns `true` on a match; the caller still has to build and send
    /// the Success/Failure packet.
    pub fn verify_response(&mut self, pkt: &ChapPacket, secret: &[u8]) -> Result<bool, CoreError> {
        if self.state != ChapState::ChallengeSent {
            return Err(CoreError::MalformedFrame("CHAP response without an outstanding challenge".into()));
        }
        if pkt.code != ChapCode::Response {
            return Err(CoreError::MalformedFrame("expected CHAP Response".into()));
        }
        if pkt.identifier != self.identifier {
            return Err(CoreError::MalformedFrame("CHAP response identifier mismatch".into()));
        }

        let (value, _name) = pkt.parse_value_and_name()?;
        let expected = chap_digest(self.identifier, secret, &self.challenge);
        self.state = ChapState::Done;
        Ok(constant_time_eq(value, &expected))
    }

    pub fn success(&self, message: &[u8]) -> ChapPacket {
        ChapPacket::success_or_failure(ChapCode::Success, self.identifier, message)
    }

    pub fn failure(&self, message: &[u8]) -> ChapPacket {
        ChapPacket::success_or_failure(ChapCode::Failure, self.identifier, message)
    }
}

fn chap_digest(identifier: u8, secret: &[u8], challenge: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update([identifier]);
    hasher.update(secret);
    hasher.update(challenge);
    hasher.finalize().into()
}

/// Constant-time byte comparison to avoid timing side channels.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_response_verifies() {
        let mut chap = ChapMachine::new();
        let challenge_pkt = chap.open(b"bng-ac");
        let (value, _name) = challenge_pkt.parse_value_and_name().expect("parse");
        let secret = b"supersecret";
        let expected = chap_digest(challenge_pkt.identifier, secret, value);

        let response = ChapPacket::response(challenge_pkt.identifier, &expected, b"subscriber1");
        assert!(chap.verify_response(&response, secret).expect("verify"));
        assert_eq!(chap.state(), ChapState::Done);
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let mut chap = ChapMachine::new();
        let challenge_pkt = chap.open(b"bng-ac");
        let response = ChapPacket::response(challenge_pkt.identifier, &[0u8; 16], b"subscriber1");
        assert!(!chap.verify_response(&response, b"supersecret").expect("verify"));
    }

    #[test]
    fn mismatched_identifier_is_rejected() {
        let mut chap = ChapMachine::new();
        let challenge_pkt = chap.open(b"bng-ac");
        let response = ChapPacket::response(challenge_pkt.identifier.wrapping_add(1), &[0u8; 16], b"subscriber1");
        assert!(chap.verify_response(&response, b"supersecret").is_err());
    }
}
