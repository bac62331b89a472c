// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! IPCP's option policy: negotiates the subscriber's pool
//! address and DNS servers, rejects IP-Compression-Protocol outright.

use std::net::Ipv4Addr;

use crate::{
    fsm::kernel::{OptionPolicy, OptionVerdict},
    wire::options::{IpcpOptionType, RawOption},
};

pub struct IpcpPolicy {
    pub pool_address: Ipv4Addr,
    pub primary_dns: Option<Ipv4Addr>,
    pub secondary_dns: Option<Ipv4Addr>,
    offer_address: bool,
    offer_primary_dns: bool,
    offer_secondary_dns: bool,
}

impl IpcpPolicy {
    pub fn new(pool_address: Ipv4Addr, primary_dns: Option<Ipv4Addr>, secondary_dns: Option<Ipv4Addr>) -> Self {
        Self {
            pool_address,
            primary_dns,
            secondary_dns,
            offer_address: true,
            offer_primary_dns: primary_dns.is_some(),
            offer_secondary_dns: secondary_dns.is_some(),
        }
    }
}

impl OptionPolicy for IpcpPolicy {
    fn desired_options(&self) -> Vec<RawOption> {
        let mut opts = Vec::new();
        if self.offer_address {
            opts.push(RawOption::ip_address(self.pool_address));
        }
        if self.offer_primary_dns {
            if let Some(dns) = self.primary_dns {
                opts.push(RawOption::primary_dns(dns));
            }
        }
        if self.offer_secondary_dns {
            if let Some(dns) = self.secondary_dns {
                opts.push(RawOption::secondary_dns(dns));
            }
        }
        opts
    }

    fn classify(&self, opt: &RawOption) -> OptionVerdict {
        match IpcpOptionType::from_u8(opt.option_type) {
            Some(IpcpOptionType::IpCompressionProtocol) => OptionVerdict::Reject,
            Some(IpcpOptionType::IpAddress) => match opt.as_ipv4() {
                Ok(addr) if addr == self.pool_address => OptionVerdict::Ack,
                Ok(_) | Err(_) => OptionVerdict::Nak(RawOption::ip_address(self.pool_address)),
            },
            Some(IpcpOptionType::PrimaryDns) => self.dns_verdict(opt, self.primary_dns, RawOption::primary_dns),
            Some(IpcpOptionType::SecondaryDns) => {
                self.dns_verdict(opt, self.secondary_dns, RawOption::secondary_dns)
            }
            None => OptionVerdict::Reject,
        }
    }

    fn apply_nak(&mut self, opts: &[RawOption]) {
        for opt in opts {
            match IpcpOptionType::from_u8(opt.option_type) {
                Some(IpcpOptionType::PrimaryDns) => {
                    if let Ok(addr) = opt.as_ipv4() {
                        self.primary_dns = Some(addr);
                    }
                }
                Some(IpcpOptionType::SecondaryDns) => {
                    if let Ok(addr) = opt.as_ipv4() {
                        self.secondary_dns = Some(addr);
                    }
                }
                // The pool address comes from the AAA lease, not from peer
                // negotiation; a Nak of it here is a policy violation the
                // caller surfaces independently.
                Some(IpcpOptionType::IpAddress) | Some(IpcpOptionType::IpCompressionProtocol) | None => {}
            }
        }
    }

    fn apply_reject(&mut self, opts: &[RawOption]) {
        for opt in opts {
            match IpcpOptionType::from_u8(opt.option_type) {
                Some(IpcpOptionType::IpAddress) => self.offer_address = false,
                Some(IpcpOptionType::PrimaryDns) => self.offer_primary_dns = false,
                Some(IpcpOptionType::SecondaryDns) => self.offer_secondary_dns = false,
                Some(IpcpOptionType::IpCompressionProtocol) | None => {}
            }
        }
    }
}

impl IpcpPolicy {
    fn dns_verdict(
        &self,
        opt: &RawOption,
        configured: Option<Ipv4Addr>,
        make: impl Fn(Ipv4Addr) -> RawOption,
    ) -> OptionVerdict {
        let Some(configured) = configured else {
            return OptionVerdict::Reject;
        };
        match opt.as_ipv4() {
            Ok(addr) if addr == configured => OptionVerdict::Ack,
            _ => OptionVerdict::Nak(make(configured)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naks_zero_address_with_pool_address() {
        let policy = IpcpPolicy::new("100.64.0.10".parse().expect("addr"), None, None);
        let verdict = policy.classify(&RawOption::ip_address(Ipv4Addr::UNSPECIFIED));
        assert_eq!(verdict, OptionVerdict::Nak(RawOption::ip_address("100.64.0.10".parse().expect("addr"))));
    }

    #[test]
    fn acks_correct_pool_address() {
        let pool: Ipv4Addr = "100.64.0.10".parse().expect("addr");
        let policy = IpcpPolicy::new(pool, None, None);
        assert_eq!(policy.classify(&RawOption::ip_address(pool)), OptionVerdict::Ack);
    }

    #[test]
    fn naks_wrong_nonzero_address() {
        let pool: Ipv4Addr = "100.64.0.10".parse().expect("addr");
        let policy = IpcpPolicy::new(pool, None, None);
        let wrong: Ipv4Addr = "10.0.0.1".parse().expect("addr");
        assert_eq!(policy.classify(&RawOption::ip_address(wrong)), OptionVerdict::Nak(RawOption::ip_address(pool)));
    }

    #[test]
    fn rejects_compression_protocol() {
        let policy = IpcpPolicy::new("100.64.0.10".parse().expect("addr"), None, None);
        let opt = RawOption::new(IpcpOptionType::IpCompressionProtocol as u8, vec![0x00, 0x2d]);
        assert_eq!(policy.classify(&opt), OptionVerdict::Reject);
    }
}
