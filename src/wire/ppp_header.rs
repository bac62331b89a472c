// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Header shared by every PPP option-negotiation protocol (LCP, IPCP) per
//! RFC 1661 §5, plus the PAP (RFC 1334) and CHAP (RFC 1994) packet headers,
//! which reuse the same `code/identifier/length` shape with different code
//! spaces.

use zerocopy::{BigEndian, FromBytes, Immutable, IntoBytes, KnownLayout, U16};

use crate::error::CoreError;

pub const HEADER_LEN: usize = 4;

/// RFC 1661 §5 codes, shared by LCP and IPCP.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LcpCode {
    ConfigureRequest = 1,
    ConfigureAck = 2,
    ConfigureNak = 3,
    ConfigureReject = 4,
    TerminateRequest = 5,
    TerminateAck = 6,
    CodeReject = 7,
    /// LCP-only; IPCP never sends these but shares the enum for the
    /// generic FSM kernel's sake.
    ProtocolReject = 8,
    EchoRequest = 9,
    EchoReply = 10,
    DiscardRequest = 11,
}

impl LcpCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::ConfigureRequest,
            2 => Self::ConfigureAck,
            3 => Self::ConfigureNak,
            4 => Self::ConfigureReject,
            5 => Self::TerminateRequest,
            6 => Self::TerminateAck,
            7 => Self::CodeReject,
            8 => Self::ProtocolReject,
            9 => Self::EchoRequest,
            10 => Self::EchoReply,
            11 => Self::DiscardRequest,
            _ => return None,
        })
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FsmHeaderRaw {
    pub code: u8,
    pub identifier: u8,
    pub length: U16<BigEndian>,
}

/// A decoded option-negotiation packet: header plus raw body (options for
/// Configure-*, the rejected packet for Code-Reject, the magic number for
/// Echo/Discard, empty for Terminate-*).
#[derive(Debug, Clone, PartialEq)]
pub struct FsmPacket {
    pub code: LcpCode,
    pub identifier: u8,
    pub body: Vec<u8>,
}

impl FsmPacket {
    pub fn new(code: LcpCode, identifier: u8, body: Vec<u8>) -> Self {
        Self { code, identifier, body }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CoreError> {
        if buf.len() < HEADER_LEN {
            return Err(CoreError::MalformedFrame("FSM packet shorter than header".into()));
        }
        let hdr = FsmHeaderRaw::ref_from_bytes(&buf[..HEADER_LEN])
            .map_err(|_| CoreError::MalformedFrame("FSM header alignment".into()))?;
        let code = LcpCode::from_u8(hdr.code)
            .ok_or_else(|| CoreError::MalformedFrame(format!("unknown FSM code {}", hdr.code)))?;
        let declared_len = hdr.length.get() as usize;
        if declared_len < HEADER_LEN {
            return Err(CoreError::MalformedFrame("FSM length field under header size".into()));
        }
        if declared_len > buf.len() {
            return Err(CoreError::MalformedFrame(format!(
                "FSM declared length {declared_len} exceeds buffer ({})",
                buf.len()
            )));
        }
        let body = buf[HEADER_LEN..declared_len].to_vec();
        Ok(Self { code, identifier: hdr.identifier, body })
    }

    pub fn encode(&self) -> Vec<u8> {
        let hdr = FsmHeaderRaw {
            code: self.code as u8,
            identifier: self.identifier,
            length: ((HEADER_LEN + self.body.len()) as u16).into(),
        };
        let mut out = Vec::with_capacity(HEADER_LEN + self.body.len());
        out.extend_from_slice(hdr.as_bytes());
        out.extend_from_slice(&self.body);
        out
    }
}

/// PAP (RFC 1334 §2) codes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PapCode {
    AuthenticateRequest = 1,
    AuthenticateAck = 2,
    AuthenticateNak = 3,
}

impl PapCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::AuthenticateRequest,
            2 => Self::AuthenticateAck,
            3 => Self::AuthenticateNak,
            _ => return None,
        })
    }
}

/// A decoded PAP packet. `body` holds the code-specific payload: for
/// Authenticate-Request, `peer_id_len | peer_id | passwd_len | passwd`;
/// for Ack/Nak, an optional `msg_len | message`.
#[derive(Debug, Clone, PartialEq)]
pub struct PapPacket {
    pub code: PapCode,
    pub identifier: u8,
    pub body: Vec<u8>,
}

impl PapPacket {
    pub fn request(identifier: u8, peer_id: &[u8], password: &[u8]) -> Self {
        let mut body = Vec::with_capacity(2 + peer_id.len() + password.len());
        body.push(peer_id.len() as u8);
        body.extend_from_slice(peer_id);
        body.push(password.len() as u8);
        body.extend_from_slice(password);
        Self { code: PapCode::AuthenticateRequest, identifier, body }
    }

    pub fn ack_or_nak(code: PapCode, identifier: u8, message: &[u8]) -> Self {
        let mut body = Vec::with_capacity(1 + message.len());
        body.push(message.len() as u8);
        body.extend_from_slice(message);
        Self { code, identifier, body }
    }

    /// Splits an Authenticate-Request body into `(peer_id, password)`.
    pub fn parse_request(&self) -> Result<(&[u8], &[u8]), CoreError> {
        if self.code != PapCode::AuthenticateRequest {
            return Err(CoreError::MalformedFrame("not a PAP Authenticate-Request".into()));
        }
        let buf = &self.body;
        if buf.is_empty() {
            return Err(CoreError::MalformedFrame("empty PAP request".into()));
        }
        let id_len = buf[0] as usize;
        if 1 + id_len + 1 > buf.len() {
            return Err(CoreError::MalformedFrame("PAP peer-id overruns packet".into()));
        }
        let peer_id = &buf[1..1 + id_len];
        let pw_len_off = 1 + id_len;
        let pw_len = buf[pw_len_off] as usize;
        let pw_off = pw_len_off + 1;
        if pw_off + pw_len > buf.len() {
            return Err(CoreError::MalformedFrame("PAP password overruns packet".into()));
        }
        Ok((peer_id, &buf[pw_off..pw_off + pw_len]))
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CoreError> {
        if buf.len() < HEADER_LEN {
            return Err(CoreError::MalformedFrame("PAP packet shorter than header".into()));
        }
        let hdr = FsmHeaderRaw::ref_from_bytes(&buf[..HEADER_LEN])
            .map_err(|_| CoreError::MalformedFrame("PAP header alignment".into()))?;
        let code = PapCode::from_u8(hdr.code)
            .ok_or_else(|| CoreError::MalformedFrame(format!("unknown PAP code {}", hdr.code)))?;
        let declared_len = hdr.length.get() as usize;
        if declared_len < HEADER_LEN || declared_len > buf.len() {
            return Err(CoreError::MalformedFrame("PAP declared length out of range".into()));
        }
        Ok(Self { code, identifier: hdr.identifier, body: buf[HEADER_LEN..declared_len].to_vec() })
    }

    pub fn encode(&self) -> Vec<u8> {
        let hdr = FsmHeaderRaw {
            code: self.code as u8,
            identifier: self.identifier,
            length: ((HEADER_LEN + self.body.len()) as u16).into(),
        };
        let mut out = Vec::with_capacity(HEADER_LEN + self.body.len());
        out.extend_from_slice(hdr.as_bytes());
        out.extend_from_slice(&self.body);
        out
    }
}

/// CHAP (RFC 1994 §4) codes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapCode {
    Challenge = 1,
    Response = 2,
    Success = 3,
    Failure = 4,
}

impl ChapCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => Self::Challenge,
            2 => Self::Response,
            3 => Self::Success,
            4 => Self::Failure,
            _ => return None,
        })
    }
}

/// A decoded CHAP packet. For Challenge/Response: `value_size | value |
/// name`. For Success/Failure: an opaque message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapPacket {
    pub code: ChapCode,
    pub identifier: u8,
    pub body: Vec<u8>,
}

impl ChapPacket {
    pub fn challenge(identifier: u8, value: &[u8], name: &[u8]) -> Self {
        Self::value_and_name(ChapCode::Challenge, identifier, value, name)
    }

    pub fn response(identifier: u8, value: &[u8], name: &[u8]) -> Self {
        Self::value_and_name(ChapCode::Response, identifier, value, name)
    }

    fn value_and_name(code: ChapCode, identifier: u8, value: &[u8], name: &[u8]) -> Self {
        let mut body = Vec::with_capacity(1 + value.len() + name.len());
        body.push(value.len() as u8);
        body.extend_from_slice(value);
        body.extend_from_slice(name);
        Self { code, identifier, body }
    }

    pub fn success_or_failure(code: ChapCode, identifier: u8, message: &[u8]) -> Self {
        Self { code, identifier, body: message.to_vec() }
    }

    /// Splits a Challenge/Response body into `(value, name)`.
    pub fn parse_value_and_name(&self) -> Result<(&[u8], &[u8]), CoreError> {
        if !matches!(self.code, ChapCode::Challenge | ChapCode::Response) {
            return Err(CoreError::MalformedFrame("not a CHAP Challenge/Response".into()));
        }
        if self.body.is_empty() {
            return Err(CoreError::MalformedFrame("empty CHAP value-and-name body".into()));
        }
        let value_len = self.body[0] as usize;
        if 1 + value_len > self.body.len() {
            return Err(CoreError::MalformedFrame("CHAP value overruns packet".into()));
        }
        Ok((&self.body[1..1 + value_len], &self.body[1 + value_len..]))
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CoreError> {
        if buf.len() < HEADER_LEN {
            return Err(CoreError::MalformedFrame("CHAP packet shorter than header".into()));
        }
        let hdr = FsmHeaderRaw::ref_from_bytes(&buf[..HEADER_LEN])
            .map_err(|_| CoreError::MalformedFrame("CHAP header alignment".into()))?;
        let code = ChapCode::from_u8(hdr.code)
            .ok_or_else(|| CoreError::MalformedFrame(format!("unknown CHAP code {}", hdr.code)))?;
        let declared_len = hdr.length.get() as usize;
        if declared_len < HEADER_LEN || declared_len > buf.len() {
            return Err(CoreError::MalformedFrame("CHAP declared length out of range".into()));
        }
        Ok(Self { code, identifier: hdr.identifier, body: buf[HEADER_LEN..declared_len].to_vec() })
    }

    pub fn encode(&self) -> Vec<u8> {
        let hdr = FsmHeaderRaw {
            code: self.code as u8,
            identifier: self.identifier,
            length: ((HEADER_LEN + self.body.len()) as u16).into(),
        };
        let mut out = Vec::with_capacity(HEADER_LEN + self.body.len());
        out.extend_from_slice(hdr.as_bytes());
        out.extend_from_slice(&self.body);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_configure_request() {
        let p = FsmPacket::new(LcpCode::ConfigureRequest, 5, vec![1, 4, 0x05, 0xdc]);
        let bytes = p.encode();
        assert_eq!(FsmPacket::decode(&bytes).expect("decode"), p);
    }

    #[test]
    fn pap_request_round_trips_and_parses() {
        let p = PapPacket::request(1, b"alice", b"hunter2");
        let bytes = p.encode();
        let decoded = PapPacket::decode(&bytes).expect("decode");
        let (peer_id, password) = decoded.parse_request().expect("parse");
        assert_eq!(peer_id, b"alice");
        assert_eq!(password, b"hunter2");
    }

    #[test]
    fn chap_challenge_round_trips_and_parses() {
        let p = ChapPacket::challenge(9, &[0xde, 0xad, 0xbe, 0xef], b"bng-ac");
        let bytes = p.encode();
        let decoded = ChapPacket::decode(&bytes).expect("decode");
        let (value, name) = decoded.parse_value_and_name().expect("parse");
        assert_eq!(value, &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(name, b"bng-ac");
    }

    #[test]
    fn rejects_truncated_pap_request() {
        let mut bytes = PapPacket::request(1, b"alice", b"hunter2").encode();
        bytes.truncate(bytes.len() - 3);
        let hdr_len = bytes.len() as u16;
        bytes[2..4].copy_from_slice(&hdr_len.to_be_bytes());
        let decoded = PapPacket::decode(&bytes).expect("header itself still decodes");
        assert!(decoded.parse_request().is_err());
    }
}
