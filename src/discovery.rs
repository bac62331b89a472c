// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Discovery handler: PADI→PADO, PADR→PADS, PADT. Stateless
//! beyond the registry's pending set, grounded in
//! `original_source/src/pppoe.cpp`'s `process_padi`/`process_padr`.

use crate::{
    error::CoreError,
    session::{Encap, PendingKey, SessionKey, SessionRegistry},
    utils::generate_ac_cookie,
    wire::discovery::{DiscoveryCode, DiscoveryFrame, Tag},
};

/// Per-VLAN discovery policy: which service names this AC answers for,
/// what it calls itself, and whether it issues AC-Cookies.
#[derive(Debug, Clone)]
pub struct DiscoveryPolicy {
    pub ac_name: String,
    pub service_names: Vec<String>,
    pub ignore_service_name: bool,
    pub cookie_enabled: bool,
}

fn requested_service_name(frame: &DiscoveryFrame) -> Result<String, CoreError> {
    let raw = frame.get_tag(Tag::ServiceName).unwrap_or(&[]);
    String::from_utf8(raw.to_vec())
        .map_err(|_| CoreError::MalformedFrame("Service-Name tag is not valid UTF-8".into()))
}

/// PADI → PADO. Registers a pending entry keyed by (MAC, VLANs, cookie)
/// when cookies are enabled.
pub fn handle_padi(
    frame: &DiscoveryFrame,
    encap: &Encap,
    policy: &DiscoveryPolicy,
    registry: &mut SessionRegistry,
) -> Result<DiscoveryFrame, CoreError> {
    let requested = requested_service_name(frame)?;

    let echoed = if policy.service_names.iter().any(|s| s == &requested) {
        requested
    } else if policy.ignore_service_name {
        requested
    } else {
        return Err(CoreError::WrongServiceName(requested));
    };

    let mut pado = DiscoveryFrame::new(DiscoveryCode::Pado, 0);
    pado.push_tag(Tag::AcName, policy.ac_name.clone().into_bytes());
    if let Some(host_uniq) = frame.get_tag(Tag::HostUniq) {
        pado.push_tag(Tag::HostUniq, host_uniq.to_vec());
    }
    pado.push_tag(Tag::ServiceName, echoed.into_bytes());

    // A pending entry is tracked either way; when cookies are disabled it
    // carries an empty cookie so a PADR with no AC-Cookie tag still matches
    // it instead of being rejected as unexpected.
    let cookie = if policy.cookie_enabled {
        let cookie = generate_ac_cookie();
        pado.push_tag(Tag::AcCookie, cookie.clone());
        cookie
    } else {
        Vec::new()
    };
    registry.add_pending(PendingKey {
        mac: encap.src_mac,
        outer_vlan: encap.outer_vlan,
        inner_vlan: encap.inner_vlan,
        ac_cookie: cookie,
    });

    Ok(pado)
}

/// PADR → PADS. Consumes the matching pending entry and allocates a
/// session id; the caller supplies the session construction closure so
/// discovery stays independent of FSM/policy wiring.
pub fn handle_padr(
    frame: &DiscoveryFrame,
    encap: &Encap,
    registry: &mut SessionRegistry,
    make_session: impl FnOnce(u16) -> crate::session::Session,
) -> Result<(DiscoveryFrame, u16), CoreError> {
    // No AC-Cookie tag means the client is replying to a cookie-less PADO;
    // the pending entry was tracked with an empty cookie to match.
    let cookie = frame.get_tag(Tag::AcCookie).unwrap_or(&[]);
    let pending_key = PendingKey {
        mac: encap.src_mac,
        outer_vlan: encap.outer_vlan,
        inner_vlan: encap.inner_vlan,
        ac_cookie: cookie.to_vec(),
    };
    registry.consume_pending(&pending_key).ok_or(CoreError::UnexpectedSession)?;

    let mac = encap.src_mac;
    let (outer, inner) = (encap.outer_vlan, encap.inner_vlan);
    let session_id =
        registry.allocate_and_insert(|id| SessionKey::new(mac, id, outer, inner), make_session)?;

    let mut pads = DiscoveryFrame::new(DiscoveryCode::Pads, session_id);
    if let Some(service_name) = frame.get_tag(Tag::ServiceName) {
        pads.push_tag(Tag::ServiceName, service_name.to_vec());
    }
    if let Some(host_uniq) = frame.get_tag(Tag::HostUniq) {
        pads.push_tag(Tag::HostUniq, host_uniq.to_vec());
    }

    Ok((pads, session_id))
}

/// PADT: deallocate the session named by the frame's session id. No
/// response is ever sent.
pub fn handle_padt(frame: &DiscoveryFrame, registry: &mut SessionRegistry) -> Option<crate::session::Session> {
    registry.remove_by_id(frame.session_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encap() -> Encap {
        Encap { src_mac: [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01], dst_mac: [0xff; 6], outer_vlan: 200, inner_vlan: 0, ethertype: 0x8863 }
    }

    fn policy() -> DiscoveryPolicy {
        DiscoveryPolicy {
            ac_name: "vBNG AC PPPoE".into(),
            service_names: vec!["inet".into()],
            ignore_service_name: false,
            cookie_enabled: true,
        }
    }

    #[test]
    fn padi_with_matching_service_name_yields_pado_with_cookie() {
        let mut registry = SessionRegistry::new();
        let mut padi = DiscoveryFrame::new(DiscoveryCode::Padi, 0);
        padi.push_tag(Tag::ServiceName, b"inet".to_vec());

        let pado = handle_padi(&padi, &encap(), &policy(), &mut registry).expect("pado");
        assert_eq!(pado.get_tag(Tag::AcName), Some(b"vBNG AC PPPoE".as_slice()));
        assert_eq!(pado.get_tag(Tag::ServiceName), Some(b"inet".as_slice()));
        assert_eq!(pado.get_tag(Tag::AcCookie).map(<[u8]>::len), Some(16));
        assert_eq!(registry.pending_len(), 1);
    }

    #[test]
    fn padi_with_wrong_service_name_is_rejected() {
        let mut registry = SessionRegistry::new();
        let mut padi = DiscoveryFrame::new(DiscoveryCode::Padi, 0);
        padi.push_tag(Tag::ServiceName, b"voip".to_vec());

        assert!(matches!(
            handle_padi(&padi, &encap(), &policy(), &mut registry),
            Err(CoreError::WrongServiceName(_))
        ));
    }

    #[test]
    fn padr_without_pending_cookie_is_unexpected() {
        let mut registry = SessionRegistry::new();
        let mut padr = DiscoveryFrame::new(DiscoveryCode::Padr, 0);
        padr.push_tag(Tag::AcCookie, vec![1; 16]);

        let result = handle_padr(&padr, &encap(), &mut registry, |id| {
            crate::session::Session::new(
                id,
                encap(),
                crate::fsm::lcp::LcpPolicy::new(1492, true, false),
                crate::fsm::ipcp::IpcpPolicy::new("100.64.0.10".parse().expect("addr"), None, None),
                true,
                false,
            )
        });
        assert!(matches!(result, Err(CoreError::UnexpectedSession)));
    }

    #[test]
    fn padr_with_valid_cookie_allocates_session_one() {
        let mut registry = SessionRegistry::new();
        let mut padi = DiscoveryFrame::new(DiscoveryCode::Padi, 0);
        padi.push_tag(Tag::ServiceName, b"inet".to_vec());
        let pado = handle_padi(&padi, &encap(), &policy(), &mut registry).expect("pado");
        let cookie = pado.get_tag(Tag::AcCookie).expect("cookie").to_vec();

        let mut padr = DiscoveryFrame::new(DiscoveryCode::Padr, 0);
        padr.push_tag(Tag::ServiceName, b"inet".to_vec());
        padr.push_tag(Tag::AcCookie, cookie);

        let (pads, id) = handle_padr(&padr, &encap(), &mut registry, |id| {
            crate::session::Session::new(
                id,
                encap(),
                crate::fsm::lcp::LcpPolicy::new(1492, true, false),
                crate::fsm::ipcp::IpcpPolicy::new("100.64.0.10".parse().expect("addr"), None, None),
                true,
                false,
            )
        })
        .expect("pads");

        assert_eq!(id, 1);
        assert_eq!(pads.session_id, 1);
        assert_eq!(registry.pending_len(), 0);
    }

    #[test]
    fn padr_completes_without_a_cookie_when_disabled() {
        let mut registry = SessionRegistry::new();
        let no_cookie_policy = DiscoveryPolicy { cookie_enabled: false, ..policy() };
        let mut padi = DiscoveryFrame::new(DiscoveryCode::Padi, 0);
        padi.push_tag(Tag::ServiceName, b"inet".to_vec());
        let pado = handle_padi(&padi, &encap(), &no_cookie_policy, &mut registry).expect("pado");
        assert_eq!(pado.get_tag(Tag::AcCookie), None);
        assert_eq!(registry.pending_len(), 1);

        let mut padr = DiscoveryFrame::new(DiscoveryCode::Padr, 0);
        padr.push_tag(Tag::ServiceName, b"inet".to_vec());

        let (pads, id) = handle_padr(&padr, &encap(), &mut registry, |id| {
            crate::session::Session::new(
                id,
                encap(),
                crate::fsm::lcp::LcpPolicy::new(1492, true, false),
                crate::fsm::ipcp::IpcpPolicy::new("100.64.0.10".parse().expect("addr"), None, None),
                true,
                false,
            )
        })
        .expect("pads");

        assert_eq!(id, 1);
        assert_eq!(pads.session_id, 1);
    }
}
