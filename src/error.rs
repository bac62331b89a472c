// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Crate-wide error kinds.
//!
//! Ingress handlers never propagate these as panics: every `deliver()` path
//! returns a human-readable status string built from these variants, and the
//! reactor logs-and-continues. `CoreError` exists so call sites can still
//! match on a specific failure (e.g. tests asserting `Exhausted`).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CoreError {
    /// Parse failure on an incoming discovery or PPP frame.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Session-phase frame with no matching session key (expected after
    /// PADT; dropped silently at Debug).
    #[error("unknown session")]
    UnknownSession,

    /// PADR without a matching pending entry.
    #[error("unexpected session")]
    UnexpectedSession,

    /// Discovery rejected because the requested Service-Name wasn't offered
    /// and `ignore_service_name` is off.
    #[error("wrong service name: {0}")]
    WrongServiceName(String),

    /// No free session id remained after a full sweep of the id space.
    #[error("session id space exhausted")]
    Exhausted,

    /// Data-plane provisioning failed during session construction.
    #[error("forwarder failed: {0}")]
    ForwarderFailed(String),

    /// AAA backend failed during session construction.
    #[error("aaa failed: {0}")]
    AaaFailed(String),

    /// FSM option policy violation (e.g. unacceptable option after
    /// Max-Failure); the FSM moves to Stopped and the session is torn down.
    #[error("policy violation: {0}")]
    PolicyViolation(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
