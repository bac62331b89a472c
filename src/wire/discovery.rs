// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! PPPoE discovery frames (PADI/PADO/PADR/PADS/PADT) and their TLVs.
//!
//! Layout (RFC 2516 §4):
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | VER | TYPE |     CODE      |          SESSION_ID           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           LENGTH              |           TAG_TYPE          ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use zerocopy::{BigEndian, FromBytes, Immutable, IntoBytes, KnownLayout, U16};

use crate::{error::CoreError, wire::PPPOE_VERSION_TYPE};

pub const HEADER_LEN: usize = 6;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryCode {
    Padi = 0x09,
    Pado = 0x07,
    Padr = 0x19,
    Pads = 0x65,
    Padt = 0xa7,
}

impl DiscoveryCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x09 => Self::Padi,
            0x07 => Self::Pado,
            0x19 => Self::Padr,
            0x65 => Self::Pads,
            0xa7 => Self::Padt,
            _ => return None,
        })
    }
}

/// Recognized discovery tags. Anything else is kept as an
/// opaque `(u16, Vec<u8>)` pair so it still round-trips.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    EndOfList = 0x0000,
    ServiceName = 0x0101,
    AcName = 0x0102,
    HostUniq = 0x0103,
    AcCookie = 0x0104,
}

impl Tag {
    pub fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            0x0000 => Self::EndOfList,
            0x0101 => Self::ServiceName,
            0x0102 => Self::AcName,
            0x0103 => Self::HostUniq,
            0x0104 => Self::AcCookie,
            _ => return None,
        })
    }
}

/// Fixed 6-byte discovery header.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct DiscoveryHeaderRaw {
    pub version_type: u8,
    pub code: u8,
    pub session_id: U16<BigEndian>,
    pub length: U16<BigEndian>,
}

/// A decoded (or to-be-encoded) discovery frame: header plus an ordered tag
/// list. Order is caller-controlled on encode and preserved on decode so
/// round-tripping is a straight comparison of the tag multiset.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryFrame {
    pub code: DiscoveryCode,
    pub session_id: u16,
    pub tags: Vec<(u16, Vec<u8>)>,
}

impl DiscoveryFrame {
    pub fn new(code: DiscoveryCode, session_id: u16) -> Self {
        Self { code, session_id, tags: Vec::new() }
    }

    pub fn push_tag(&mut self, tag: Tag, value: impl Into<Vec<u8>>) -> &mut Self {
        self.tags.push((tag as u16, value.into()));
        self
    }

    pub fn get_tag(&self, tag: Tag) -> Option<&[u8]> {
        let want = tag as u16;
        self.tags.iter().find(|(t, _)| *t == want).map(|(_, v)| v.as_slice())
    }

    /// Decodes a full Ethernet-payload-less discovery frame: the 6-byte
    /// header immediately followed by `length` bytes of TLVs.
    pub fn decode(buf: &[u8]) -> Result<Self, CoreError> {
        if buf.len() < HEADER_LEN {
            return Err(CoreError::MalformedFrame("frame shorter than header".into()));
        }
        let hdr = DiscoveryHeaderRaw::ref_from_bytes(&buf[..HEADER_LEN])
            .map_err(|_| CoreError::MalformedFrame("header alignment".into()))?;
        if hdr.version_type != PPPOE_VERSION_TYPE {
            return Err(CoreError::MalformedFrame(format!(
                "bad version/type byte: {:#04x}",
                hdr.version_type
            )));
        }
        let code = DiscoveryCode::from_u8(hdr.code)
            .ok_or_else(|| CoreError::MalformedFrame(format!("unknown code {:#04x}", hdr.code)))?;
        let session_id = hdr.session_id.get();
        let declared_len = hdr.length.get() as usize;

        let available = buf.len() - HEADER_LEN;
        if declared_len > available {
            return Err(CoreError::MalformedFrame(format!(
                "declared length {declared_len} exceeds buffer ({available} available)"
            )));
        }

        let payload = &buf[HEADER_LEN..HEADER_LEN + declared_len];
        let tags = parse_tlvs(payload)?;

        Ok(Self { code, session_id, tags })
    }

    /// Encodes the frame, emitting tags in insertion order and filling in
    /// the payload-length field.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for (tag, value) in &self.tags {
            body.extend_from_slice(&tag.to_be_bytes());
            body.extend_from_slice(&(value.len() as u16).to_be_bytes());
            body.extend_from_slice(value);
        }

        let hdr = DiscoveryHeaderRaw {
            version_type: PPPOE_VERSION_TYPE,
            code: self.code as u8,
            session_id: self.session_id.into(),
            length: (body.len() as u16).into(),
        };

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(hdr.as_bytes());
        out.extend_from_slice(&body);
        out
    }
}

/// Parses a TLV sequence, stopping at End-Of-List or at the end of `buf`.
/// Fails on a TLV that overruns `buf` or on a duplicate tag.
fn parse_tlvs(buf: &[u8]) -> Result<Vec<(u16, Vec<u8>)>, CoreError> {
    let mut tags = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut off = 0usize;

    while off < buf.len() {
        if buf.len() - off < 4 {
            return Err(CoreError::MalformedFrame("truncated TLV header".into()));
        }
        let tag_type = u16::from_be_bytes([buf[off], buf[off + 1]]);
        let len = u16::from_be_bytes([buf[off + 2], buf[off + 3]]) as usize;
        off += 4;

        if tag_type == Tag::EndOfList as u16 {
            return Ok(tags);
        }

        if off + len > buf.len() {
            return Err(CoreError::MalformedFrame(format!(
                "TLV {tag_type:#06x} value extends beyond frame"
            )));
        }

        if !seen.insert(tag_type) {
            return Err(CoreError::MalformedFrame(format!("duplicate tag {tag_type:#06x}")));
        }

        tags.push((tag_type, buf[off..off + len].to_vec()));
        off += len;
    }

    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_well_formed_pado() {
        let mut f = DiscoveryFrame::new(DiscoveryCode::Pado, 0);
        f.push_tag(Tag::AcName, b"vBNG AC PPPoE".to_vec());
        f.push_tag(Tag::HostUniq, vec![1, 2, 3, 4]);
        f.push_tag(Tag::ServiceName, b"inet".to_vec());
        f.push_tag(Tag::AcCookie, vec![0xaa; 16]);

        let bytes = f.encode();
        let decoded = DiscoveryFrame::decode(&bytes).expect("decode");
        assert_eq!(decoded, f);
    }

    #[test]
    fn rejects_truncated_tlv() {
        let mut bytes = DiscoveryFrame::new(DiscoveryCode::Padi, 0).encode();
        // Claim a TLV of length 200 but don't provide the bytes.
        bytes.extend_from_slice(&0x0101u16.to_be_bytes());
        bytes.extend_from_slice(&200u16.to_be_bytes());
        // Patch the length field to claim the (too-short) TLV is in-frame.
        let new_len = (bytes.len() - HEADER_LEN) as u16;
        bytes[4..6].copy_from_slice(&new_len.to_be_bytes());
        assert!(matches!(
            DiscoveryFrame::decode(&bytes),
            Err(CoreError::MalformedFrame(_))
        ));
    }

    #[test]
    fn rejects_duplicate_tag() {
        let mut f = DiscoveryFrame::new(DiscoveryCode::Padi, 0);
        f.push_tag(Tag::ServiceName, b"inet".to_vec());
        f.push_tag(Tag::ServiceName, b"voip".to_vec());
        let bytes = f.encode();
        assert!(matches!(
            DiscoveryFrame::decode(&bytes),
            Err(CoreError::MalformedFrame(_))
        ));
    }

    #[test]
    fn end_of_list_terminates_early() {
        let mut bytes = DiscoveryFrame::new(DiscoveryCode::Padi, 0).encode();
        bytes.extend_from_slice(&0u16.to_be_bytes()); // End-Of-List
        bytes.extend_from_slice(&0u16.to_be_bytes());
        // Garbage after End-Of-List that would fail to parse as a TLV.
        bytes.push(0xff);
        let new_len = (bytes.len() - HEADER_LEN) as u16;
        bytes[4..6].copy_from_slice(&new_len.to_be_bytes());

        let decoded = DiscoveryFrame::decode(&bytes).expect("decode");
        assert!(decoded.tags.is_empty());
    }

    #[test]
    fn declared_length_over_buffer_is_malformed() {
        let mut bytes = DiscoveryFrame::new(DiscoveryCode::Padi, 0).encode();
        bytes[4..6].copy_from_slice(&9000u16.to_be_bytes());
        assert!(matches!(
            DiscoveryFrame::decode(&bytes),
            Err(CoreError::MalformedFrame(_))
        ));
    }
}
