// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Mock `ForwarderAdapter`/`AaaClient` for the reactor's end-to-end scenario tests.
//! Gated to test builds only.

use std::{
    net::Ipv4Addr,
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    },
};

use crate::{
    error::CoreError,
    external::{AaaClient, AaaCredentials, AaaLease, BoxFuture, ForwarderAdapter},
};

/// Records every call so tests can assert call counts/arguments, and
/// hands back a configurable pool address for IPCP leases.
#[derive(Default)]
pub struct MockForwarder {
    pub add_calls: Mutex<Vec<(Ipv4Addr, u16, [u8; 6], Option<String>, bool)>>,
    next_ifindex: AtomicU32,
}

impl MockForwarder {
    pub fn new() -> Self {
        Self { add_calls: Mutex::new(Vec::new()), next_ifindex: AtomicU32::new(1) }
    }

    pub fn add_call_count(&self) -> usize {
        self.add_calls.lock().expect("mock forwarder mutex poisoned").len()
    }
}

impl ForwarderAdapter for MockForwarder {
    fn add_pppoe_session<'a>(
        &'a self,
        peer_ip: Ipv4Addr,
        session_id: u16,
        mac: [u8; 6],
        vrf: Option<&'a str>,
        add: bool,
    ) -> BoxFuture<'a, Result<(bool, u32), CoreError>> {
        Box::pin(async move {
            self.add_calls
                .lock()
                .expect("mock forwarder mutex poisoned")
                .push((peer_ip, session_id, mac, vrf.map(str::to_owned), add));
            let ifindex = self.next_ifindex.fetch_add(1, Ordering::SeqCst);
            Ok((true, ifindex))
        })
    }

    fn set_interface_table<'a>(&'a self, _ifindex: u32, _vrf: &'a str) -> BoxFuture<'a, Result<bool, CoreError>> {
        Box::pin(async { Ok(true) })
    }

    fn set_unnumbered<'a>(
        &'a self,
        _ifindex: u32,
        _parent_ifindex: u32,
        _on_off: bool,
    ) -> BoxFuture<'a, Result<bool, CoreError>> {
        Box::pin(async { Ok(true) })
    }

    fn dump_unnumbered<'a>(&'a self, _ifindex: u32) -> BoxFuture<'a, Result<(), CoreError>> {
        Box::pin(async { Ok(()) })
    }

    fn get_iface_by_name<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, Result<(u32, bool), CoreError>> {
        Box::pin(async { Ok((1, true)) })
    }
}

/// A scripted AAA backend: always leases `pool_address` and accepts every
/// credential whose password/secret equals `expected_secret`.
pub struct MockAaa {
    pub pool_address: Ipv4Addr,
    pub expected_secret: Vec<u8>,
    pub stop_calls: Mutex<Vec<String>>,
    next_session: AtomicU32,
}

impl MockAaa {
    pub fn new(pool_address: Ipv4Addr, expected_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            pool_address,
            expected_secret: expected_secret.into(),
            stop_calls: Mutex::new(Vec::new()),
            next_session: AtomicU32::new(1),
        }
    }
}

impl AaaClient for MockAaa {
    fn start<'a>(
        &'a self,
        credentials: &'a AaaCredentials,
        _pool_name: &'a str,
        _vrf: Option<&'a str>,
    ) -> BoxFuture<'a, Result<AaaLease, CoreError>> {
        Box::pin(async move {
            // An empty password means the caller already authenticated the
            // peer itself (CHAP) and is only asking for the IP lease.
            if !credentials.secret_or_password.is_empty() && credentials.secret_or_password != self.expected_secret {
                return Err(CoreError::AaaFailed("credential rejected".into()));
            }
            let id = self.next_session.fetch_add(1, Ordering::SeqCst);
            Ok(AaaLease {
                aaa_session_id: format!("aaa-{id}"),
                assigned_ipv4: self.pool_address,
                dns_primary: None,
                dns_secondary: None,
            })
        })
    }

    fn map_iface<'a>(&'a self, _aaa_session_id: &'a str, _ifindex: u32) -> BoxFuture<'a, Result<(), CoreError>> {
        Box::pin(async { Ok(()) })
    }

    fn fetch_chap_secret<'a>(&'a self, _peer_name: &'a [u8]) -> BoxFuture<'a, Result<Vec<u8>, CoreError>> {
        Box::pin(async { Ok(self.expected_secret.clone()) })
    }

    fn stop<'a>(&'a self, aaa_session_id: &'a str) -> BoxFuture<'a, Result<(), CoreError>> {
        Box::pin(async move {
            self.stop_calls.lock().expect("mock aaa mutex poisoned").push(aaa_session_id.to_owned());
            Ok(())
        })
    }

    fn stop_all<'a>(&'a self) -> BoxFuture<'a, Result<(), CoreError>> {
        Box::pin(async { Ok(()) })
    }
}

/// The CHAP secret the mock AAA expects, exposed separately since
/// `AaaLease`/`start` are shaped around PAP/IPCP, while CHAP asks AAA for
/// the raw secret to hash locally.
impl MockAaa {
    pub fn chap_secret(&self) -> &[u8] {
        &self.expected_secret
    }
}
