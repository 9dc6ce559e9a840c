//! Configuration validation
//!
//! Catches settings that would load fine but can never negotiate, or that
//! are probably mistakes.

use super::Config;
use crate::protocol::lcp::{MAX_MRU, MIN_MRU};
use crate::protocol::ipcp::MAX_STATES;
use crate::telemetry::is_known_format;
use std::net::Ipv4Addr;

/// Validation result containing warnings and errors
#[derive(Debug)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate the configuration
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_lcp(config, &mut result);
    validate_fsm(config, &mut result);
    validate_auth(config, &mut result);
    validate_ipcp(config, &mut result);
    validate_limits(config, &mut result);
    validate_log(config, &mut result);

    result
}

fn validate_lcp(config: &Config, result: &mut ValidationResult) {
    let lcp = &config.lcp;

    for (field, value) in [("mru", lcp.mru), ("max_mru", lcp.max_mru)] {
        if let Some(mru) = value {
            if !(MIN_MRU..=MAX_MRU).contains(&mru) {
                result.error(format!(
                    "lcp.{}: {} out of range {}..={}",
                    field, mru, MIN_MRU, MAX_MRU
                ));
            }
        }
    }

    if lcp.echo_failure > 0 && lcp.echo_interval == 0 {
        result.warn("lcp.echo_failure: has no effect without lcp.echo_interval");
    }

    if lcp.passive && lcp.silent {
        result.warn("lcp: silent already implies passive");
    }

    if lcp.lqr_period == Some(0) {
        result.error("lcp.lqr_period: must be greater than 0");
    }
}

fn validate_fsm(config: &Config, result: &mut ValidationResult) {
    let fsm = &config.fsm;
    if fsm.timeout == 0 {
        result.error("fsm.timeout: must be at least 1 second");
    }
    if fsm.max_configure == 0 {
        result.error("fsm.max_configure: must be greater than 0");
    }
    if fsm.max_terminate == 0 {
        result.warn("fsm.max_terminate: 0 closes without sending Terminate-Request");
    }
}

fn validate_auth(config: &Config, result: &mut ValidationResult) {
    let auth = &config.auth;

    if (auth.require_pap && auth.refuse_pap) || (auth.require_chap && auth.refuse_chap) {
        result.error("auth: a protocol cannot be both required and refused");
    }

    let wants_peer_auth = auth.required || auth.require_pap || auth.require_chap;
    if wants_peer_auth && auth.refuse_pap && auth.refuse_chap {
        result.error("auth: authentication required but both PAP and CHAP refused");
    }

    if wants_peer_auth && auth.name.is_empty() {
        result.warn("auth.name: empty, secrets will be matched against an empty server name");
    }

    if auth.require_pap && config.secrets.pap.is_none() {
        result.error("auth.require_pap: no secrets.pap file configured");
    }
    if auth.require_chap && config.secrets.chap.is_none() {
        result.error("auth.require_chap: no secrets.chap file configured");
    }

    if auth.explicit_remote && auth.remote_name.is_none() {
        result.error("auth.explicit_remote: requires auth.remote_name");
    }

    if auth.chap_timeout == 0 {
        result.error("auth.chap_timeout: must be at least 1 second");
    }
    if auth.pap_timeout == 0 {
        result.error("auth.pap_timeout: must be at least 1 second");
    }
    if auth.chap_interval == Some(0) {
        result.error("auth.chap_interval: must be at least 1 second");
    }

    if let Some(password) = &auth.password {
        if password.len() > crate::auth::secrets::MAX_SECRET_LEN {
            result.error(format!(
                "auth.password: longer than {} bytes",
                crate::auth::secrets::MAX_SECRET_LEN
            ));
        }
    }
}

fn validate_ipcp(config: &Config, result: &mut ValidationResult) {
    let ipcp = &config.ipcp;

    for (field, value) in [("local", &ipcp.local), ("remote", &ipcp.remote)] {
        let Some(addr) = value else {
            continue;
        };
        match addr.parse::<Ipv4Addr>() {
            Ok(parsed) if parsed.is_unspecified() => {
                result.warn(format!("ipcp.{}: 0.0.0.0 is the same as leaving it unset", field));
            }
            Ok(_) => {}
            Err(_) => {
                result.error(format!("ipcp.{}: invalid address '{}'", field, addr));
            }
        }
    }

    if let (Some(local), Some(remote)) = (&ipcp.local, &ipcp.remote) {
        if local == remote {
            result.error("ipcp: local and remote addresses are the same");
        }
    }

    if let Some(slots) = ipcp.vj_max_slots {
        if slots < 2 || slots >= MAX_STATES {
            result.error(format!(
                "ipcp.vj_max_slots: {} out of range 2..{}",
                slots, MAX_STATES
            ));
        }
    }

    if !ipcp.enabled && (ipcp.default_route || ipcp.proxy_arp) {
        result.warn("ipcp: default_route/proxy_arp have no effect with IPCP disabled");
    }
}

fn validate_limits(config: &Config, result: &mut ValidationResult) {
    let limits = &config.limits;
    if limits.max_sessions == 0 {
        result.error("limits.max_sessions: must be greater than 0");
    }
    if limits.idle == Some(0) {
        result.warn("limits.idle: 0 disables the idle limit");
    }
    if limits.max_connect == Some(0) {
        result.warn("limits.max_connect: 0 disables the connect time limit");
    }
}

fn validate_log(config: &Config, result: &mut ValidationResult) {
    if !is_known_format(&config.log.format) {
        result.warn(format!(
            "log.format: unknown format '{}', using pretty",
            config.log.format
        ));
    }
}
