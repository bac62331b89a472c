// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, fs, net::Ipv4Addr, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::{
    cfg::enums::{AuthMethod, YesNo},
    discovery::DiscoveryPolicy,
    reactor::VlanProfile,
};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Per-outer-VLAN PPPoE/PPP policy, keyed by VLAN tag.
    pub vlans: HashMap<u16, VlanConfig>,
    /// Policy applied when a frame's outer VLAN has no specific entry.
    #[serde(default)]
    pub default_vlan: Option<VlanConfig>,
    /// AAA backend endpoint and credentials.
    pub aaa: AaaEndpointConfig,
    /// Data-plane forwarder endpoint.
    pub forwarder: ForwarderEndpointConfig,
    /// Implementation/runtime parameters that live outside the PPPoE/PPP
    /// protocols themselves.
    pub runtime: RuntimeConfig,
}

/// PPPoE discovery and PPP negotiation policy for one VLAN.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct VlanConfig {
    #[serde(rename = "AcName")]
    /// Access Concentrator name advertised in PADO.
    pub ac_name: String,

    #[serde(rename = "ServiceNames")]
    /// Service-Name values this AC answers for.
    pub service_names: Vec<String>,

    #[serde(default, rename = "IgnoreServiceName")]
    /// Accept any requested Service-Name instead of rejecting unknown ones.
    pub ignore_service_name: YesNo,

    #[serde(default = "default_yes", rename = "CookieEnabled")]
    /// Whether PADO carries an AC-Cookie, used as an anti-spoofing token
    /// the client must echo back in PADR.
    pub cookie_enabled: YesNo,

    #[serde(rename = "AuthMethod")]
    /// Authentication required before IPCP is allowed to start.
    pub auth_method: AuthMethod,

    #[serde(rename = "Mru")]
    /// MRU offered in LCP's Configure-Request.
    pub mru: u16,

    #[serde(rename = "FramedPool")]
    /// AAA pool name this VLAN's subscribers are leased from.
    pub pool_name: String,

    #[serde(default, rename = "Vrf")]
    /// VRF the forwarder should bind the subscriber interface to.
    pub vrf: Option<String>,

    #[serde(default, rename = "Unnumbered")]
    /// Parent interface this subscriber's session borrows its IP from.
    pub unnumbered: Option<String>,

    #[serde(default, rename = "DnsPrimary")]
    pub dns_primary: Option<Ipv4Addr>,

    #[serde(default, rename = "DnsSecondary")]
    pub dns_secondary: Option<Ipv4Addr>,
}

impl VlanConfig {
    /// Builds the reactor-facing policy bundle this VLAN's sessions are
    /// constructed from.
    pub fn to_profile(&self) -> VlanProfile {
        VlanProfile {
            discovery: DiscoveryPolicy {
                ac_name: self.ac_name.clone(),
                service_names: self.service_names.clone(),
                ignore_service_name: self.ignore_service_name.as_bool(),
                cookie_enabled: self.cookie_enabled.as_bool(),
            },
            auth_chap: matches!(self.auth_method, AuthMethod::Chap),
            auth_pap: matches!(self.auth_method, AuthMethod::Pap),
            mru: self.mru,
            pool_name: self.pool_name.clone(),
            vrf: self.vrf.clone(),
            unnumbered: self.unnumbered.clone(),
            dns_primary: self.dns_primary,
            dns_secondary: self.dns_secondary,
        }
    }
}

fn default_yes() -> YesNo {
    YesNo::Yes
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AaaEndpointConfig {
    #[serde(rename = "Endpoint")]
    /// RADIUS (or local test double) endpoint address.
    pub endpoint: String,

    #[serde(rename = "RequestTimeout", with = "serde_secs")]
    pub request_timeout: Duration,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ForwarderEndpointConfig {
    #[serde(rename = "Endpoint")]
    /// Data-plane driver's control socket or RPC endpoint.
    pub endpoint: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Runtime-only settings that do not map to any PPPoE/PPP key.
pub struct RuntimeConfig {
    #[serde(rename = "MaxSessions")]
    /// External limit on the number of simultaneously tracked sessions.
    pub max_sessions: u32,

    #[serde(rename = "PendingCookieTimeout", with = "serde_secs")]
    /// How long a PADO's AC-Cookie stays valid awaiting a PADR before the
    /// pending entry is swept.
    pub pending_cookie_timeout: Duration,
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants that YAML's type system can't express.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(!self.vlans.is_empty() || self.default_vlan.is_some(), "at least one VLAN policy or a default_vlan must be configured");

        for (vlan, cfg) in &self.vlans {
            ensure!(!cfg.service_names.is_empty() || cfg.ignore_service_name.as_bool(), "VLAN {vlan}: ServiceNames must be non-empty unless IgnoreServiceName is set");
            ensure!(cfg.mru >= 128, "VLAN {vlan}: Mru must be at least 128");
            ensure!(!cfg.pool_name.is_empty(), "VLAN {vlan}: FramedPool must not be empty");
        }

        ensure!(self.runtime.max_sessions >= 1, "MaxSessions must be >= 1");
        ensure!(!self.aaa.endpoint.is_empty(), "aaa.Endpoint must not be empty");
        ensure!(!self.forwarder.endpoint.is_empty(), "forwarder.Endpoint must not be empty");

        Ok(())
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vlan() -> VlanConfig {
        VlanConfig {
            ac_name: "vBNG AC PPPoE".into(),
            service_names: vec!["inet".into()],
            ignore_service_name: YesNo::No,
            cookie_enabled: YesNo::Yes,
            auth_method: AuthMethod::Chap,
            mru: 1492,
            pool_name: "inet-pool".into(),
            vrf: None,
            unnumbered: None,
            dns_primary: None,
            dns_secondary: None,
        }
    }

    fn sample_config() -> Config {
        let mut vlans = HashMap::new();
        vlans.insert(200, sample_vlan());
        Config {
            vlans,
            default_vlan: None,
            aaa: AaaEndpointConfig { endpoint: "radius://127.0.0.1:1812".into(), request_timeout: Duration::from_secs(5) },
            forwarder: ForwarderEndpointConfig { endpoint: "unix:///run/bng-forwarder.sock".into() },
            runtime: RuntimeConfig { max_sessions: 4096, pending_cookie_timeout: Duration::from_secs(10) },
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        let mut cfg = sample_config();
        assert!(cfg.validate_and_normalize().is_ok());
    }

    #[test]
    fn empty_service_names_without_ignore_flag_is_rejected() {
        let mut cfg = sample_config();
        cfg.vlans.get_mut(&200).expect("vlan 200").service_names.clear();
        assert!(cfg.validate_and_normalize().is_err());
    }

    #[test]
    fn vlan_config_converts_to_auth_chap_profile() {
        let profile = sample_vlan().to_profile();
        assert!(profile.auth_chap);
        assert!(!profile.auth_pap);
        assert_eq!(profile.mru, 1492);
    }
}
