// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! PPPoE session-stage header: same 6-byte layout as discovery (RFC 2516
//! §4), `code` fixed at `0x00`, carrying a PPP frame instead of TLVs.

use zerocopy::{BigEndian, FromBytes, Immutable, IntoBytes, KnownLayout, U16};

use crate::{error::CoreError, wire::PPPOE_VERSION_TYPE};

pub const HEADER_LEN: usize = 6;
pub const SESSION_DATA_CODE: u8 = 0x00;

/// PPP protocol-number field that follows the PPPoE session header
/// (RFC 1661 §2, RFC 1332, RFC 1334, RFC 1994).
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PppProtocol {
    Ipv4 = 0x0021,
    Lcp = 0xc021,
    Pap = 0xc023,
    Chap = 0xc223,
    Ipcp = 0x8021,
}

impl PppProtocol {
    pub fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            0x0021 => Self::Ipv4,
            0xc021 => Self::Lcp,
            0xc023 => Self::Pap,
            0xc223 => Self::Chap,
            0x8021 => Self::Ipcp,
            _ => return None,
        })
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct SessionHeaderRaw {
    pub version_type: u8,
    pub code: u8,
    pub session_id: U16<BigEndian>,
    pub length: U16<BigEndian>,
}

/// A decoded PPPoE session-stage frame: the header, the PPP protocol
/// number, and the raw PPP payload (the sub-protocol body, not including
/// the 2-byte protocol field itself).
#[derive(Debug, Clone, PartialEq)]
pub struct SessionFrame {
    pub session_id: u16,
    pub protocol: PppProtocol,
    pub payload: Vec<u8>,
}

impl SessionFrame {
    pub fn new(session_id: u16, protocol: PppProtocol, payload: Vec<u8>) -> Self {
        Self { session_id, protocol, payload }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CoreError> {
        if buf.len() < HEADER_LEN {
            return Err(CoreError::MalformedFrame("frame shorter than header".into()));
        }
        let hdr = SessionHeaderRaw::ref_from_bytes(&buf[..HEADER_LEN])
            .map_err(|_| CoreError::MalformedFrame("header alignment".into()))?;
        if hdr.version_type != PPPOE_VERSION_TYPE {
            return Err(CoreError::MalformedFrame(format!(
                "bad version/type byte: {:#04x}",
                hdr.version_type
            )));
        }
        if hdr.code != SESSION_DATA_CODE {
            return Err(CoreError::MalformedFrame(format!(
                "unexpected session-stage code {:#04x}",
                hdr.code
            )));
        }

        let session_id = hdr.session_id.get();
        let declared_len = hdr.length.get() as usize;
        let available = buf.len() - HEADER_LEN;
        if declared_len > available {
            return Err(CoreError::MalformedFrame(format!(
                "declared length {declared_len} exceeds buffer ({available} available)"
            )));
        }
        if declared_len < 2 {
            return Err(CoreError::MalformedFrame("frame too short for a protocol field".into()));
        }

        let body = &buf[HEADER_LEN..HEADER_LEN + declared_len];
        let proto_raw = u16::from_be_bytes([body[0], body[1]]);
        let protocol = PppProtocol::from_u16(proto_raw)
            .ok_or_else(|| CoreError::MalformedFrame(format!("unknown PPP protocol {proto_raw:#06x}")))?;

        Ok(Self { session_id, protocol, payload: body[2..].to_vec() })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(2 + self.payload.len());
        body.extend_from_slice(&(self.protocol as u16).to_be_bytes());
        body.extend_from_slice(&self.payload);

        let hdr = SessionHeaderRaw {
            version_type: PPPOE_VERSION_TYPE,
            code: SESSION_DATA_CODE,
            session_id: self.session_id.into(),
            length: (body.len() as u16).into(),
        };

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(hdr.as_bytes());
        out.extend_from_slice(&body);
        out
    }
}
