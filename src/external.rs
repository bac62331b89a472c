// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! External collaborators: the data-plane driver and the AAA backend.
//! Both are consumed as object-safe async traits so the reactor can hold
//! `Box<dyn ForwarderAdapter>`/`Box<dyn AaaClient>` without knowing the
//! concrete transport — each trait spells out its future type per method
//! rather than hoisting it into one associated type.

use std::{future::Future, net::Ipv4Addr, pin::Pin};

use crate::error::CoreError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of an AAA `start()` call: session id plus the leased address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AaaLease {
    pub aaa_session_id: String,
    pub assigned_ipv4: Ipv4Addr,
    pub dns_primary: Option<Ipv4Addr>,
    pub dns_secondary: Option<Ipv4Addr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AaaCredentials {
    pub peer_id: Vec<u8>,
    pub secret_or_password: Vec<u8>,
}

/// The data-plane driver: creates/destroys forwarding state for a session.
pub trait ForwarderAdapter: Send + Sync {
    fn add_pppoe_session<'a>(
        &'a self,
        peer_ip: Ipv4Addr,
        session_id: u16,
        mac: [u8; 6],
        vrf: Option<&'a str>,
        add: bool,
    ) -> BoxFuture<'a, Result<(bool, u32), CoreError>>;

    fn set_interface_table<'a>(&'a self, ifindex: u32, vrf: &'a str) -> BoxFuture<'a, Result<bool, CoreError>>;

    fn set_unnumbered<'a>(
        &'a self,
        ifindex: u32,
        parent_ifindex: u32,
        on_off: bool,
    ) -> BoxFuture<'a, Result<bool, CoreError>>;

    fn dump_unnumbered<'a>(&'a self, ifindex: u32) -> BoxFuture<'a, Result<(), CoreError>>;

    fn get_iface_by_name<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(u32, bool), CoreError>>;
}

/// The AAA backend: RADIUS-speaking auth/acct collaborator.
pub trait AaaClient: Send + Sync {
    fn start<'a>(
        &'a self,
        credentials: &'a AaaCredentials,
        pool_name: &'a str,
        vrf: Option<&'a str>,
    ) -> BoxFuture<'a, Result<AaaLease, CoreError>>;

    fn map_iface<'a>(&'a self, aaa_session_id: &'a str, ifindex: u32) -> BoxFuture<'a, Result<(), CoreError>>;

    /// Fetches the shared secret for a CHAP peer so the authenticator can
    /// compute the expected digest itself; unlike PAP, CHAP never sends
    /// the secret over the wire.
    fn fetch_chap_secret<'a>(&'a self, peer_name: &'a [u8]) -> BoxFuture<'a, Result<Vec<u8>, CoreError>>;

    fn stop<'a>(&'a self, aaa_session_id: &'a str) -> BoxFuture<'a, Result<(), CoreError>>;

    fn stop_all<'a>(&'a self) -> BoxFuture<'a, Result<(), CoreError>>;
}
