// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! LCP's option policy and its Echo keepalive subsystem.

use std::time::Duration;

use rand::Rng;

use crate::{
    fsm::kernel::{OptionPolicy, OptionVerdict},
    wire::options::{LcpOptionType, RawOption},
};

/// What LCP negotiates for a session, plus which options are still worth
/// offering (a Configure-Reject from the peer turns one off for good).
pub struct LcpPolicy {
    pub mru: u16,
    pub magic_number: u32,
    pub auth_chap: bool,
    pub auth_pap: bool,
    offer_mru: bool,
    offer_magic: bool,
    offer_auth: bool,
}

impl LcpPolicy {
    pub fn new(mru: u16, auth_chap: bool, auth_pap: bool) -> Self {
        Self {
            mru,
            magic_number: random_nonzero_magic(),
            auth_chap,
            auth_pap,
            offer_mru: true,
            offer_magic: true,
            offer_auth: auth_chap || auth_pap,
        }
    }

    fn required_auth_option(&self) -> Option<RawOption> {
        if self.auth_chap {
            Some(RawOption::auth_protocol_chap_md5())
        } else if self.auth_pap {
            Some(RawOption::auth_protocol(0xc023))
        } else {
            None
        }
    }
}

impl OptionPolicy for LcpPolicy {
    fn desired_options(&self) -> Vec<RawOption> {
        let mut opts = Vec::new();
        if self.offer_mru {
            opts.push(RawOption::mru(self.mru));
        }
        if self.offer_magic {
            opts.push(RawOption::magic_number(self.magic_number));
        }
        if self.offer_auth {
            if let Some(auth) = self.required_auth_option() {
                opts.push(auth);
            }
        }
        opts
    }

    fn classify(&self, opt: &RawOption) -> OptionVerdict {
        match LcpOptionType::from_u8(opt.option_type) {
            Some(LcpOptionType::Mru) => OptionVerdict::Ack,
            Some(LcpOptionType::MagicNumber) => match opt.as_u32() {
                Ok(v) if v != 0 => OptionVerdict::Ack,
                _ => OptionVerdict::Nak(RawOption::magic_number(random_nonzero_magic())),
            },
            Some(LcpOptionType::AuthenticationProtocol) => match self.required_auth_option() {
                Some(required) if required.value == opt.value => OptionVerdict::Ack,
                Some(required) => OptionVerdict::Nak(required),
                None => OptionVerdict::Reject,
            },
            None => OptionVerdict::Reject,
        }
    }

    fn apply_nak(&mut self, opts: &[RawOption]) {
        for opt in opts {
            match LcpOptionType::from_u8(opt.option_type) {
                Some(LcpOptionType::Mru) => {
                    if let Ok(v) = opt.as_u16() {
                        self.mru = v;
                    }
                }
                Some(LcpOptionType::MagicNumber) => {
                    self.magic_number = random_nonzero_magic();
                }
                Some(LcpOptionType::AuthenticationProtocol) | None => {}
            }
        }
    }

    fn apply_reject(&mut self, opts: &[RawOption]) {
        for opt in opts {
            match LcpOptionType::from_u8(opt.option_type) {
                Some(LcpOptionType::Mru) => self.offer_mru = false,
                Some(LcpOptionType::MagicNumber) => self.offer_magic = false,
                Some(LcpOptionType::AuthenticationProtocol) => self.offer_auth = false,
                None => {}
            }
        }
    }
}

fn random_nonzero_magic() -> u32 {
    loop {
        let v: u32 = rand::rng().random();
        if v != 0 {
            return v;
        }
    }
}

const ECHO_BASE: Duration = Duration::from_secs(20);
const ECHO_JITTER_MAX_SECS: u64 = 10;
const ECHO_FAILURE_THRESHOLD: u32 = 6;

/// Per-session LCP Echo keepalive. Owns its own magic number
/// copy (the current one LCP negotiated) and the running count of
/// consecutive unanswered Echo-Requests.
pub struct EchoKeepalive {
    magic_number: u32,
    echo_counter: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EchoTick {
    /// Send an Echo-Request with this magic; still within budget.
    Send(u32),
    /// More than 6 consecutive requests went unanswered; tear the session down.
    LayerDown,
}

impl EchoKeepalive {
    pub fn new(magic_number: u32) -> Self {
        Self { magic_number, echo_counter: 0 }
    }

    /// Draws the next jittered interval, `20 + uniform(0, 10)` seconds.
    pub fn next_interval(&self) -> Duration {
        let jitter_ms = rand::rng().random_range(0..=ECHO_JITTER_MAX_SECS * 1000);
        ECHO_BASE + Duration::from_millis(jitter_ms)
    }

    pub fn on_tick(&mut self) -> EchoTick {
        self.echo_counter += 1;
        if self.echo_counter > ECHO_FAILURE_THRESHOLD {
            EchoTick::LayerDown
        } else {
            EchoTick::Send(self.magic_number)
        }
    }

    /// Resets the counter on any reply carrying the magic we last sent.
    pub fn on_reply(&mut self, received_magic: u32) -> bool {
        if received_magic == self.magic_number {
            self.echo_counter = 0;
            true
        } else {
            false
        }
    }

    pub fn set_magic(&mut self, magic_number: u32) {
        self.magic_number = magic_number;
    }

    pub fn echo_counter(&self) -> u32 {
        self.echo_counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lcp_accepts_matching_chap_auth_option() {
        let policy = LcpPolicy::new(1492, true, false);
        let verdict = policy.classify(&RawOption::auth_protocol_chap_md5());
        assert_eq!(verdict, OptionVerdict::Ack);
    }

    #[test]
    fn lcp_naks_pap_when_chap_required() {
        let policy = LcpPolicy::new(1492, true, false);
        let verdict = policy.classify(&RawOption::auth_protocol(0xc023));
        assert_eq!(verdict, OptionVerdict::Nak(RawOption::auth_protocol_chap_md5()));
    }

    #[test]
    fn lcp_rejects_unknown_option() {
        let policy = LcpPolicy::new(1492, true, false);
        let verdict = policy.classify(&RawOption::new(200, vec![1, 2, 3]));
        assert_eq!(verdict, OptionVerdict::Reject);
    }

    #[test]
    fn echo_counter_resets_on_matching_reply_and_trips_after_six() {
        let mut echo = EchoKeepalive::new(0xdead_beef);
        for _ in 0..6 {
            assert_eq!(echo.on_tick(), EchoTick::Send(0xdead_beef));
        }
        assert_eq!(echo.on_tick(), EchoTick::LayerDown);

        let mut echo2 = EchoKeepalive::new(0xdead_beef);
        echo2.on_tick();
        echo2.on_tick();
        assert!(echo2.on_reply(0xdead_beef));
        assert_eq!(echo2.echo_counter(), 0);
    }
}
