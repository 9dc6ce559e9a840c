//! Configuration management
//!
//! Loads the TOML configuration file and turns it into session settings.

mod types;
mod validation;

pub use types::*;
pub use validation::{validate, ValidationResult};

use crate::auth::{AuthSettings, ChapConfig, PapConfig, SecretsFiles};
use crate::control::{FsmConfig, IpcpOptions, IpcpSettings, LcpOptions, LcpSettings};
use crate::session::SessionSettings;
use crate::{Error, Result};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use zeroize::Zeroizing;

/// Load configuration from a TOML file
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    parse(&content)
}

/// Parse configuration from TOML text
pub fn parse(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
    Ok(config)
}

/// The configuration with every default filled in, as TOML
pub fn effective(config: &Config) -> Result<String> {
    toml::to_string_pretty(config).map_err(|e| Error::Config(e.to_string()))
}

fn parse_addr(field: &str, value: Option<&String>) -> Result<Ipv4Addr> {
    match value {
        None => Ok(Ipv4Addr::UNSPECIFIED),
        Some(text) => text
            .parse()
            .map_err(|_| Error::Config(format!("{}: invalid address '{}'", field, text))),
    }
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

impl Config {
    /// Secrets files named in `[secrets]`
    pub fn secrets(&self) -> SecretsFiles {
        SecretsFiles::new(self.secrets.pap.clone(), self.secrets.chap.clone())
    }

    /// Settings for a new session
    pub fn session_settings(&self) -> Result<SessionSettings> {
        let fsm = FsmConfig {
            timeout: secs(self.fsm.timeout),
            max_configure: self.fsm.max_configure,
            max_terminate: self.fsm.max_terminate,
            max_nak_loops: self.fsm.max_failure,
            passive: false,
            silent: false,
            restart: self.fsm.restart,
        };
        let lcp_fsm = FsmConfig {
            passive: self.lcp.passive,
            silent: self.lcp.silent,
            ..fsm.clone()
        };

        let (lcp_wanted, lcp_allowed) = self.lcp_options();
        let (ipcp_wanted, ipcp_allowed) = self.ipcp_options()?;

        Ok(SessionSettings {
            lcp_fsm,
            ipcp_fsm: fsm,
            lcp_wanted,
            lcp_allowed,
            lcp: LcpSettings {
                echo_interval: secs(self.lcp.echo_interval),
                echo_failure: self.lcp.echo_failure,
                loopback_fail: self.lcp.loopback_fail,
            },
            ipcp_wanted,
            ipcp_allowed,
            ipcp: IpcpSettings {
                use_peer_dns: self.ipcp.use_peer_dns,
                default_route: self.ipcp.default_route,
                proxy_arp: self.ipcp.proxy_arp,
            },
            chap: ChapConfig {
                timeout: secs(self.auth.chap_timeout),
                max_transmits: self.auth.chap_max_challenge,
                rechallenge: self.auth.chap_interval.map(secs),
            },
            pap: PapConfig {
                timeout: secs(self.auth.pap_timeout),
                max_transmits: self.auth.pap_max_authreq,
                request_timeout: (self.auth.pap_request_timeout > 0)
                    .then(|| secs(self.auth.pap_request_timeout)),
            },
            auth: self.auth_settings(),
        })
    }

    fn lcp_options(&self) -> (LcpOptions, LcpOptions) {
        let lcp = &self.lcp;
        let mut wanted = LcpOptions::wanted_defaults();
        let mut allowed = LcpOptions::allowed_defaults();

        if let Some(mru) = lcp.mru {
            wanted.neg_mru = true;
            wanted.mru = mru;
        }
        if let Some(max) = lcp.max_mru {
            allowed.mru = max;
        }
        if let Some(map) = lcp.asyncmap {
            wanted.neg_asyncmap = true;
            wanted.asyncmap = map;
        }
        wanted.neg_magicnumber = lcp.magic;
        allowed.neg_magicnumber = lcp.magic;
        wanted.neg_pcompression = lcp.pcomp;
        wanted.neg_accompression = lcp.accomp;
        if let Some(period) = lcp.lqr_period {
            wanted.neg_lqr = true;
            wanted.lqr_period = period;
            allowed.neg_lqr = true;
        }
        wanted.neg_cbcp = lcp.callback;
        allowed.neg_cbcp = lcp.callback;

        (wanted, allowed)
    }

    fn ipcp_options(&self) -> Result<(IpcpOptions, IpcpOptions)> {
        let ipcp = &self.ipcp;
        let mut wanted = IpcpOptions::wanted_defaults();
        let mut allowed = IpcpOptions::allowed_defaults();

        wanted.ouraddr = parse_addr("ipcp.local", ipcp.local.as_ref())?;
        wanted.hisaddr = parse_addr("ipcp.remote", ipcp.remote.as_ref())?;
        wanted.accept_local = ipcp.accept_local;
        wanted.accept_remote = ipcp.accept_remote;

        wanted.neg_vj = ipcp.vj;
        allowed.neg_vj = ipcp.vj;
        wanted.cflag = ipcp.vj_slot_compression;
        allowed.cflag = ipcp.vj_slot_compression;
        if let Some(slots) = ipcp.vj_max_slots {
            wanted.maxslotindex = slots;
            allowed.maxslotindex = slots;
        }

        Ok((wanted, allowed))
    }

    fn auth_settings(&self) -> AuthSettings {
        let auth = &self.auth;
        AuthSettings {
            our_name: auth.name.clone(),
            user: auth.user.clone().unwrap_or_default(),
            password: Zeroizing::new(
                auth.password
                    .as_deref()
                    .map(|p| p.as_bytes().to_vec())
                    .unwrap_or_default(),
            ),
            remote_name: auth.remote_name.clone(),
            explicit_remote: auth.explicit_remote,
            auth_required: auth.required,
            require_pap: auth.require_pap,
            require_chap: auth.require_chap,
            refuse_pap: auth.refuse_pap,
            refuse_chap: auth.refuse_chap,
            allow_any_ip: auth.allow_any_ip,
            idle_limit: self.limits.idle.filter(|&s| s > 0).map(secs),
            max_connect: self.limits.max_connect.filter(|&s| s > 0).map(secs),
            unit: self.limits.unit,
            ipcp_enabled: self.ipcp.enabled,
        }
    }
}
