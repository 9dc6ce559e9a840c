//! pppcp - PPP control plane
//!
//! LCP and IPCP option negotiation on a shared automaton, CHAP and PAP
//! authentication, and the phase sequencing that ties them together on a
//! per-link session. Frame delivery and interface configuration are left to
//! a [`session::Link`] implementation.

pub mod auth;
pub mod config;
pub mod control;
pub mod driver;
pub mod effects;
pub mod error;
pub mod protocol;
pub mod session;
pub mod telemetry;

pub use error::{Error, Result};
