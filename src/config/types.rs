//! Configuration types
//!
//! Every section and field is optional in the file; missing values take the
//! defaults of the protocol engines.

use crate::telemetry::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Contents of the configuration file
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub lcp: LcpConfig,
    pub fsm: FsmTimingConfig,
    pub auth: AuthConfig,
    pub secrets: SecretsConfig,
    pub ipcp: IpcpConfig,
    pub limits: LimitsConfig,
    pub log: LogConfig,
}

/// `[lcp]`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LcpConfig {
    /// MRU to request; not sent when unset
    pub mru: Option<u16>,
    /// Largest MRU the peer may ask us to send
    pub max_mru: Option<u16>,
    /// Async control character map to request
    pub asyncmap: Option<u32>,
    pub magic: bool,
    pub pcomp: bool,
    pub accomp: bool,
    /// Seconds between Echo-Requests, 0 disables
    pub echo_interval: u64,
    /// Unanswered Echo-Requests before the link is closed, 0 never
    pub echo_failure: u32,
    /// Magic-number Naks in a row before loopback is declared
    pub loopback_fail: u32,
    /// Wait for the peer instead of giving up after max-configure
    pub passive: bool,
    /// Never send the first Configure-Request
    pub silent: bool,
    /// Ask for Link Quality Reports at this period (hundredths of a second)
    pub lqr_period: Option<u32>,
    /// Offer the callback option
    pub callback: bool,
}

impl Default for LcpConfig {
    fn default() -> Self {
        Self {
            mru: None,
            max_mru: None,
            asyncmap: None,
            magic: true,
            pcomp: false,
            accomp: false,
            echo_interval: 0,
            echo_failure: 0,
            loopback_fail: crate::control::lcp::DEFAULT_LOOPBACK_FAIL,
            passive: false,
            silent: false,
            lqr_period: None,
            callback: false,
        }
    }
}

/// `[fsm]` timing shared by LCP and IPCP
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FsmTimingConfig {
    /// Restart timer in seconds
    pub timeout: u64,
    pub max_configure: u32,
    pub max_terminate: u32,
    /// Naks before a Nak is treated as a Reject
    pub max_failure: u32,
    /// Restart negotiation when opened again
    pub restart: bool,
}

impl Default for FsmTimingConfig {
    fn default() -> Self {
        use crate::control::fsm;
        Self {
            timeout: fsm::DEFAULT_TIMEOUT.as_secs(),
            max_configure: fsm::DEFAULT_MAX_CONFIGURE,
            max_terminate: fsm::DEFAULT_MAX_TERMINATE,
            max_failure: fsm::DEFAULT_MAX_NAK_LOOPS,
            restart: false,
        }
    }
}

/// `[auth]`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Our name when authenticating the peer
    pub name: String,
    /// Name to authenticate ourselves as; defaults to `name`
    pub user: Option<String>,
    /// PAP password; looked up in the PAP secrets when unset
    pub password: Option<String>,
    /// Peer's name for secret lookups
    pub remote_name: Option<String>,
    /// Use `remote_name` even when the peer names itself
    pub explicit_remote: bool,
    /// Require the peer to authenticate
    pub required: bool,
    pub require_pap: bool,
    pub require_chap: bool,
    pub refuse_pap: bool,
    pub refuse_chap: bool,
    /// Without an address list, accept addresses we already have routes to
    pub allow_any_ip: bool,
    /// CHAP retransmit interval in seconds
    pub chap_timeout: u64,
    pub chap_max_challenge: u32,
    /// Re-challenge interval in seconds
    pub chap_interval: Option<u64>,
    /// PAP retransmit interval in seconds
    pub pap_timeout: u64,
    pub pap_max_authreq: u32,
    /// How long the PAP server waits for a request, 0 waits forever
    pub pap_request_timeout: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        use crate::auth::{chap, pap};
        Self {
            name: String::new(),
            user: None,
            password: None,
            remote_name: None,
            explicit_remote: false,
            required: false,
            require_pap: false,
            require_chap: false,
            refuse_pap: false,
            refuse_chap: false,
            allow_any_ip: false,
            chap_timeout: chap::DEFAULT_TIMEOUT.as_secs(),
            chap_max_challenge: chap::DEFAULT_MAX_TRANSMITS,
            chap_interval: None,
            pap_timeout: pap::DEFAULT_TIMEOUT.as_secs(),
            pap_max_authreq: pap::DEFAULT_MAX_TRANSMITS,
            pap_request_timeout: pap::DEFAULT_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

/// `[secrets]` file locations
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SecretsConfig {
    pub pap: Option<PathBuf>,
    pub chap: Option<PathBuf>,
}

/// `[ipcp]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct IpcpConfig {
    pub enabled: bool,
    /// Our address, dotted quad
    pub local: Option<String>,
    /// Address for the peer, dotted quad
    pub remote: Option<String>,
    /// Take the peer's idea of our address
    pub accept_local: bool,
    /// Take the peer's idea of its address
    pub accept_remote: bool,
    /// Negotiate VJ header compression
    pub vj: bool,
    /// Highest VJ slot index to offer
    pub vj_max_slots: Option<u8>,
    pub vj_slot_compression: bool,
    pub use_peer_dns: bool,
    pub default_route: bool,
    pub proxy_arp: bool,
}

impl Default for IpcpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            local: None,
            remote: None,
            accept_local: false,
            accept_remote: false,
            vj: true,
            vj_max_slots: None,
            vj_slot_compression: true,
            use_peer_dns: false,
            default_route: false,
            proxy_arp: false,
        }
    }
}

/// `[limits]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Idle seconds before the link is closed
    pub idle: Option<u64>,
    /// Seconds the network phase may last
    pub max_connect: Option<u64>,
    /// Unit number for `+` address offsets in secrets entries
    pub unit: u32,
    /// Sessions the registry will hold
    pub max_sessions: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            idle: None,
            max_connect: None,
            unit: 0,
            max_sessions: 64,
        }
    }
}
