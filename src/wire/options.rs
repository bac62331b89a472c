// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! PPP configuration options (RFC 1661 §6 for LCP, RFC 1332 §3 for IPCP):
//! `type (1 byte) | length-including-header (1 byte) | value`.

use crate::error::CoreError;

/// LCP option types (RFC 1661 §6).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LcpOptionType {
    Mru = 1,
    AuthenticationProtocol = 3,
    MagicNumber = 5,
}

impl LcpOptionType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::Mru,
            3 => Self::AuthenticationProtocol,
            5 => Self::MagicNumber,
            _ => return None,
        })
    }
}

/// IPCP option types (RFC 1332 §3).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcpOptionType {
    IpCompressionProtocol = 2,
    IpAddress = 3,
    PrimaryDns = 129,
    SecondaryDns = 131,
}

impl IpcpOptionType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            2 => Self::IpCompressionProtocol,
            3 => Self::IpAddress,
            129 => Self::PrimaryDns,
            131 => Self::SecondaryDns,
            _ => return None,
        })
    }
}

/// A single option as it appears on the wire: recognized options carry a
/// parsed `kind` tag (so FSM policies can `match` on it); unrecognized
/// option types are kept with `kind = None` so Configure-Reject can still
/// echo them back verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOption {
    pub option_type: u8,
    pub value: Vec<u8>,
}

impl RawOption {
    pub fn new(option_type: u8, value: impl Into<Vec<u8>>) -> Self {
        Self { option_type, value: value.into() }
    }

    pub fn mru(mru: u16) -> Self {
        Self::new(LcpOptionType::Mru as u8, mru.to_be_bytes().to_vec())
    }

    pub fn auth_protocol(proto: u16) -> Self {
        Self::new(LcpOptionType::AuthenticationProtocol as u8, proto.to_be_bytes().to_vec())
    }

    /// CHAP's Authentication-Protocol option carries an extra algorithm
    /// byte after the 2-byte protocol number (RFC 1994 §2); 0x05 is MD5.
    pub fn auth_protocol_chap_md5() -> Self {
        let mut value = (0xc223u16).to_be_bytes().to_vec();
        value.push(0x05);
        Self::new(LcpOptionType::AuthenticationProtocol as u8, value)
    }

    pub fn magic_number(magic: u32) -> Self {
        Self::new(LcpOptionType::MagicNumber as u8, magic.to_be_bytes().to_vec())
    }

    pub fn ip_address(addr: std::net::Ipv4Addr) -> Self {
        Self::new(IpcpOptionType::IpAddress as u8, addr.octets().to_vec())
    }

    pub fn primary_dns(addr: std::net::Ipv4Addr) -> Self {
        Self::new(IpcpOptionType::PrimaryDns as u8, addr.octets().to_vec())
    }

    pub fn secondary_dns(addr: std::net::Ipv4Addr) -> Self {
        Self::new(IpcpOptionType::SecondaryDns as u8, addr.octets().to_vec())
    }

    pub fn as_u16(&self) -> Result<u16, CoreError> {
        if self.value.len() != 2 {
            return Err(CoreError::MalformedFrame(format!(
                "option {} expected a 2-byte value, got {}",
                self.option_type,
                self.value.len()
            )));
        }
        Ok(u16::from_be_bytes([self.value[0], self.value[1]]))
    }

    pub fn as_u32(&self) -> Result<u32, CoreError> {
        if self.value.len() != 4 {
            return Err(CoreError::MalformedFrame(format!(
                "option {} expected a 4-byte value, got {}",
                self.option_type,
                self.value.len()
            )));
        }
        Ok(u32::from_be_bytes([self.value[0], self.value[1], self.value[2], self.value[3]]))
    }

    pub fn as_ipv4(&self) -> Result<std::net::Ipv4Addr, CoreError> {
        let raw = self.as_u32()?;
        Ok(std::net::Ipv4Addr::from(raw))
    }

    fn wire_len(&self) -> usize {
        2 + self.value.len()
    }
}

/// Parses an options area until it is fully consumed. Every option must
/// declare at least a 2-byte header; a length under that, or one that
/// overruns the buffer, is malformed.
pub fn parse_options(buf: &[u8]) -> Result<Vec<RawOption>, CoreError> {
    let mut opts = Vec::new();
    let mut off = 0usize;

    while off < buf.len() {
        if buf.len() - off < 2 {
            return Err(CoreError::MalformedFrame("truncated option header".into()));
        }
        let option_type = buf[off];
        let len = buf[off + 1] as usize;
        if len < 2 {
            return Err(CoreError::MalformedFrame(format!(
                "option {option_type} declares length {len} under header size"
            )));
        }
        if off + len > buf.len() {
            return Err(CoreError::MalformedFrame(format!(
                "option {option_type} value extends beyond packet"
            )));
        }
        opts.push(RawOption { option_type, value: buf[off + 2..off + len].to_vec() });
        off += len;
    }

    Ok(opts)
}

pub fn encode_options(opts: &[RawOption]) -> Vec<u8> {
    let total: usize = opts.iter().map(RawOption::wire_len).sum();
    let mut out = Vec::with_capacity(total);
    for opt in opts {
        out.push(opt.option_type);
        out.push(opt.wire_len() as u8);
        out.extend_from_slice(&opt.value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_lcp_configure_request_options() {
        let opts = vec![
            RawOption::mru(1492),
            RawOption::auth_protocol_chap_md5(),
            RawOption::magic_number(0xdead_beef),
        ];
        let bytes = encode_options(&opts);
        let decoded = parse_options(&bytes).expect("parse");
        assert_eq!(decoded, opts);
        assert_eq!(decoded[0].as_u16().expect("u16"), 1492);
        assert_eq!(decoded[2].as_u32().expect("u32"), 0xdead_beef);
    }

    #[test]
    fn round_trips_ipcp_options() {
        let addr: std::net::Ipv4Addr = "100.64.0.10".parse().expect("addr");
        let opts = vec![RawOption::ip_address(addr), RawOption::primary_dns(addr)];
        let bytes = encode_options(&opts);
        let decoded = parse_options(&bytes).expect("parse");
        assert_eq!(decoded[0].as_ipv4().expect("ipv4"), addr);
    }

    #[test]
    fn rejects_option_shorter_than_header() {
        let bytes = vec![1u8, 1u8]; // length 1 < minimum 2
        assert!(matches!(parse_options(&bytes), Err(CoreError::MalformedFrame(_))));
    }

    #[test]
    fn rejects_option_overrunning_buffer() {
        let bytes = vec![1u8, 8u8, 0, 0]; // declares 8 bytes, only 4 present
        assert!(matches!(parse_options(&bytes), Err(CoreError::MalformedFrame(_))));
    }
}
