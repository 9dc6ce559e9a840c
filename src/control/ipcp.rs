//! IPCP negotiation
//!
//! Address, VJ compression and Microsoft DNS/WINS options. The address
//! is sent in the IP-Address form and falls back to the legacy
//! IP-Addresses form when the peer rejects it.

use super::ci::{match_naked, match_rejected, ReqBuilder, ReqResponse};
use super::fsm::{ControlProtocol, NakOutcome};
use crate::protocol::ipcp::{self as wire, lengths, options};
use crate::protocol::ppp::protocols;
use crate::protocol::Ci;
use crate::session::timer::TimerPurpose;
use std::net::Ipv4Addr;
use thiserror::Error;
use tracing::{debug, warn};

/// One IPCP option set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcpOptions {
    /// Negotiate with IP-Address
    pub neg_addr: bool,
    /// Fall back to IP-Addresses
    pub old_addrs: bool,
    /// Ask the peer for its address
    pub req_addr: bool,
    pub neg_vj: bool,
    /// Use the short legacy VJ option
    pub old_vj: bool,
    pub vj_protocol: u16,
    pub maxslotindex: u8,
    pub cflag: bool,
    /// Take the peer's idea of our address
    pub accept_local: bool,
    /// Take the peer's idea of its own address
    pub accept_remote: bool,
    pub req_dns1: bool,
    pub req_dns2: bool,
    pub ouraddr: Ipv4Addr,
    pub hisaddr: Ipv4Addr,
    pub dnsaddr: [Ipv4Addr; 2],
    pub winsaddr: [Ipv4Addr; 2],
}

impl Default for IpcpOptions {
    fn default() -> Self {
        Self {
            neg_addr: false,
            old_addrs: false,
            req_addr: false,
            neg_vj: false,
            old_vj: false,
            vj_protocol: wire::VJ_COMP,
            maxslotindex: wire::MAX_STATES - 1,
            cflag: false,
            accept_local: false,
            accept_remote: false,
            req_dns1: false,
            req_dns2: false,
            ouraddr: Ipv4Addr::UNSPECIFIED,
            hisaddr: Ipv4Addr::UNSPECIFIED,
            dnsaddr: [Ipv4Addr::UNSPECIFIED; 2],
            winsaddr: [Ipv4Addr::UNSPECIFIED; 2],
        }
    }
}

impl IpcpOptions {
    pub fn wanted_defaults() -> Self {
        Self {
            neg_addr: true,
            old_addrs: true,
            neg_vj: true,
            cflag: true,
            ..Self::default()
        }
    }

    pub fn allowed_defaults() -> Self {
        Self {
            neg_addr: true,
            old_addrs: true,
            neg_vj: true,
            cflag: true,
            ..Self::default()
        }
    }

    /// Sending the legacy IP-Addresses option
    fn sends_addrs(&self) -> bool {
        !self.neg_addr && self.old_addrs
    }
}

#[derive(Debug, Clone, Default)]
pub struct IpcpSettings {
    /// Ask the peer for DNS servers
    pub use_peer_dns: bool,
    /// Install a default route through the peer
    pub default_route: bool,
    /// Publish a proxy ARP entry for the peer
    pub proxy_arp: bool,
}

/// VJ parameters for the compressor towards the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VjParams {
    pub cflag: bool,
    pub max_slot_index: u8,
}

/// IP configuration to install once IPCP is open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpConfig {
    pub local: Ipv4Addr,
    pub remote: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub dns: [Option<Ipv4Addr>; 2],
    pub vj: Option<VjParams>,
    pub default_route: bool,
    pub proxy_arp: bool,
}

/// Why IPCP could not come up
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IpUpError {
    #[error("Refused our IP address")]
    RefusedOurAddress,
    #[error("Could not determine local IP address")]
    NoLocalAddress,
    #[error("Could not determine remote IP address")]
    NoRemoteAddress,
    #[error("Unauthorized remote IP address")]
    Unauthorized(Ipv4Addr),
}

/// Natural netmask of a class A/B/C address
pub fn classful_netmask(addr: Ipv4Addr) -> Ipv4Addr {
    let first = addr.octets()[0];
    if first < 128 {
        Ipv4Addr::new(255, 0, 0, 0)
    } else if first < 192 {
        Ipv4Addr::new(255, 255, 0, 0)
    } else if first < 224 {
        Ipv4Addr::new(255, 255, 255, 0)
    } else {
        Ipv4Addr::BROADCAST
    }
}

#[derive(Debug)]
pub struct Ipcp {
    pub wanted: IpcpOptions,
    pub allowed: IpcpOptions,
    pub got: IpcpOptions,
    pub his: IpcpOptions,
    settings: IpcpSettings,
}

impl Ipcp {
    pub fn new(wanted: IpcpOptions, allowed: IpcpOptions, settings: IpcpSettings) -> Self {
        Self {
            got: wanted.clone(),
            wanted,
            allowed,
            his: IpcpOptions::default(),
            settings,
        }
    }

    pub fn settings(&self) -> &IpcpSettings {
        &self.settings
    }

    /// Work out the configuration to install after negotiation.
    ///
    /// `authorize` decides whether the peer may use its address.
    pub fn negotiated_config(
        &mut self,
        authorize: impl FnOnce(Ipv4Addr) -> bool,
    ) -> Result<IpConfig, IpUpError> {
        if !self.his.neg_addr && !self.his.old_addrs {
            self.his.hisaddr = self.wanted.hisaddr;
        }

        let asked = self.wanted.neg_addr || self.wanted.old_addrs;
        if !(self.got.neg_addr || self.got.old_addrs)
            && asked
            && !self.wanted.ouraddr.is_unspecified()
        {
            warn!("peer refused to agree to our IP address");
            return Err(IpUpError::RefusedOurAddress);
        }
        if self.got.ouraddr.is_unspecified() {
            warn!("could not determine local IP address");
            return Err(IpUpError::NoLocalAddress);
        }
        if self.his.hisaddr.is_unspecified() {
            warn!("could not determine remote IP address");
            return Err(IpUpError::NoRemoteAddress);
        }

        let remote = self.his.hisaddr;
        if !authorize(remote) {
            warn!(%remote, "peer is not authorized to use remote address");
            return Err(IpUpError::Unauthorized(remote));
        }

        let dns = [
            Some(self.got.dnsaddr[0]).filter(|a| self.got.req_dns1 && !a.is_unspecified()),
            Some(self.got.dnsaddr[1]).filter(|a| self.got.req_dns2 && !a.is_unspecified()),
        ];
        let vj = self.his.neg_vj.then_some(VjParams {
            cflag: self.his.cflag,
            max_slot_index: self.his.maxslotindex,
        });

        Ok(IpConfig {
            local: self.got.ouraddr,
            remote,
            netmask: classful_netmask(self.got.ouraddr),
            dns,
            vj,
            default_route: self.settings.default_route,
            proxy_arp: self.settings.proxy_arp,
        })
    }

    fn req_address(
        &mut self,
        ci: &Ci,
        his: &mut IpcpOptions,
        reply: &mut ReqBuilder,
    ) {
        let old = ci.kind == options::IP_ADDRESSES;
        let allowed = if old {
            self.allowed.old_addrs && !his.neg_addr && ci.len() == lengths::ADDRS
        } else {
            self.allowed.neg_addr && !his.old_addrs && ci.len() == lengths::ADDR
        };
        if !allowed {
            reply.reject(ci);
            return;
        }

        let wo = &mut self.wanted;
        let mut reader = ci.reader();
        let (Ok(claimed_his), claimed_ours) = (reader.ipv4(), reader.ipv4().ok()) else {
            reply.reject(ci);
            return;
        };

        let mut nak_his = None;
        if claimed_his != wo.hisaddr && (claimed_his.is_unspecified() || !wo.accept_remote) {
            nak_his = Some(wo.hisaddr);
        } else if claimed_his.is_unspecified() && wo.hisaddr.is_unspecified() {
            // Neither side knows the peer's address: stop asking for it
            debug!("rejecting zero address");
            wo.req_addr = false;
            reply.reject(ci);
            return;
        }

        let mut nak_ours = None;
        if let Some(claimed_ours) = claimed_ours {
            if claimed_ours != wo.ouraddr {
                if claimed_ours.is_unspecified() || !wo.accept_local {
                    nak_ours = Some(wo.ouraddr);
                } else {
                    wo.ouraddr = claimed_ours;
                    self.got.ouraddr = claimed_ours;
                }
            }
            his.old_addrs = true;
            his.ouraddr = claimed_ours;
        } else {
            his.neg_addr = true;
        }
        his.hisaddr = claimed_his;

        if nak_his.is_none() && nak_ours.is_none() {
            reply.ack(ci);
        } else if old {
            let ours = nak_ours.or(claimed_ours).unwrap_or(Ipv4Addr::UNSPECIFIED);
            reply.nak(ci, wire::addresses(nak_his.unwrap_or(claimed_his), ours));
        } else {
            reply.nak(ci, wire::address(nak_his.unwrap_or(claimed_his)));
        }
    }

    fn req_compression(&self, ci: &Ci, his: &mut IpcpOptions, reply: &mut ReqBuilder) {
        let ao = &self.allowed;
        if !ao.neg_vj || (ci.len() != lengths::VJ && ci.len() != lengths::COMPRESS) {
            reply.reject(ci);
            return;
        }
        let protocol = u16::from_be_bytes([ci.data[0], ci.data[1]]);
        let short = ci.len() == lengths::COMPRESS;
        if !(protocol == wire::VJ_COMP || (protocol == wire::VJ_COMP_OLD && short)) {
            reply.reject(ci);
            return;
        }

        his.neg_vj = true;
        his.vj_protocol = protocol;
        if short {
            his.old_vj = true;
            his.maxslotindex = wire::MAX_STATES - 1;
            his.cflag = true;
            reply.ack(ci);
            return;
        }

        let maxslot = ci.data[2];
        let cflag = ci.data[3] != 0;
        his.maxslotindex = maxslot;
        his.cflag = cflag;

        let nak_slot = maxslot > ao.maxslotindex;
        let nak_cflag = cflag && !ao.cflag;
        if nak_slot || nak_cflag {
            let slot = if nak_slot { ao.maxslotindex } else { maxslot };
            let flag = if nak_cflag { self.wanted.cflag } else { cflag };
            reply.nak(ci, wire::vj(protocol, false, slot, flag));
        } else {
            reply.ack(ci);
        }
    }

    fn req_server(&self, ci: &Ci, servers: [Ipv4Addr; 2], index: usize, reply: &mut ReqBuilder) {
        let ours = servers[index];
        match ci.as_addr() {
            Some(addr) if !ours.is_unspecified() => {
                if addr == ours {
                    reply.ack(ci);
                } else {
                    reply.nak(ci, Ci::addr(ci.kind, ours));
                }
            }
            _ => reply.reject(ci),
        }
    }
}

impl ControlProtocol for Ipcp {
    const PROTOCOL: u16 = protocols::IPCP;
    const NAME: &'static str = "IPCP";
    const TIMER: TimerPurpose = TimerPurpose::Ipcp;

    fn reset_ci(&mut self) {
        let wo = &mut self.wanted;
        wo.req_addr =
            (wo.neg_addr || wo.old_addrs) && (self.allowed.neg_addr || self.allowed.old_addrs);
        if wo.ouraddr.is_unspecified() {
            wo.accept_local = true;
        }
        if wo.hisaddr.is_unspecified() {
            wo.accept_remote = true;
        }
        wo.req_dns1 = self.settings.use_peer_dns;
        wo.req_dns2 = self.settings.use_peer_dns;
        self.got = wo.clone();
        self.his = IpcpOptions::default();
    }

    fn add_ci(&mut self) -> Vec<Ci> {
        // Switch to the legacy forms when the peer uses them
        let go = &mut self.got;
        if go.neg_addr && go.old_addrs && !self.his.neg_addr && self.his.old_addrs {
            go.neg_addr = false;
        }
        if self.wanted.neg_vj && !go.neg_vj && !go.old_vj && self.his.neg_vj && self.his.old_vj {
            go.neg_vj = true;
            go.old_vj = true;
            go.vj_protocol = self.his.vj_protocol;
        }

        let mut cis = Vec::new();
        if go.sends_addrs() {
            cis.push(wire::addresses(go.ouraddr, go.hisaddr));
        }
        if go.neg_addr {
            cis.push(wire::address(go.ouraddr));
        }
        if go.neg_vj {
            cis.push(wire::vj(go.vj_protocol, go.old_vj, go.maxslotindex, go.cflag));
        }
        if go.req_dns1 {
            cis.push(Ci::addr(options::PRIMARY_DNS, go.dnsaddr[0]));
        }
        if go.req_dns2 {
            cis.push(Ci::addr(options::SECONDARY_DNS, go.dnsaddr[1]));
        }
        cis
    }

    fn nak_ci(
        &mut self,
        sent: &[Ci],
        naked: &[Ci],
        treat_as_reject: bool,
        opened: bool,
    ) -> Option<NakOutcome> {
        let (answers, extra) = match_naked(sent, naked)?;
        let go = &self.got;
        let mut attempt = go.clone();

        for ci in answers {
            match ci.kind {
                options::IP_ADDRESSES => {
                    let (ours, his) = wire::parse_addresses(ci)?;
                    if treat_as_reject {
                        attempt.old_addrs = false;
                    } else {
                        if go.accept_local && !ours.is_unspecified() {
                            attempt.ouraddr = ours;
                        }
                        if go.accept_remote && !his.is_unspecified() {
                            attempt.hisaddr = his;
                        }
                    }
                }
                options::IP_ADDRESS => {
                    let ours = ci.as_addr()?;
                    if treat_as_reject {
                        attempt.neg_addr = false;
                        attempt.old_addrs = false;
                    } else if go.accept_local && !ours.is_unspecified() {
                        attempt.ouraddr = ours;
                    }
                }
                options::IP_COMPRESSION => {
                    if ci.len() != lengths::VJ && ci.len() != lengths::COMPRESS {
                        return None;
                    }
                    let protocol = u16::from_be_bytes([ci.data[0], ci.data[1]]);
                    if treat_as_reject {
                        attempt.neg_vj = false;
                    } else if ci.len() == lengths::VJ {
                        if protocol == wire::VJ_COMP {
                            attempt.old_vj = false;
                            if ci.data[2] < go.maxslotindex {
                                attempt.maxslotindex = ci.data[2];
                            }
                            if ci.data[3] == 0 {
                                attempt.cflag = false;
                            }
                        } else {
                            attempt.neg_vj = false;
                        }
                    } else if protocol == wire::VJ_COMP || protocol == wire::VJ_COMP_OLD {
                        attempt.old_vj = true;
                        attempt.vj_protocol = protocol;
                    } else {
                        attempt.neg_vj = false;
                    }
                }
                options::PRIMARY_DNS | options::SECONDARY_DNS => {
                    let addr = ci.as_addr()?;
                    let index = usize::from(ci.kind == options::SECONDARY_DNS);
                    if treat_as_reject {
                        if index == 0 {
                            attempt.req_dns1 = false;
                        } else {
                            attempt.req_dns2 = false;
                        }
                    } else {
                        attempt.dnsaddr[index] = addr;
                    }
                }
                _ => return None,
            }
        }

        let mut seen = Vec::new();
        for ci in extra {
            if seen.contains(&ci.kind) {
                return None;
            }
            seen.push(ci.kind);
            match ci.kind {
                options::IP_ADDRESSES => {
                    let (ours, his) = wire::parse_addresses(ci)?;
                    attempt.neg_addr = false;
                    if !ours.is_unspecified() && go.accept_local {
                        attempt.ouraddr = ours;
                    }
                    if !his.is_unspecified() && go.accept_remote {
                        attempt.hisaddr = his;
                    }
                }
                options::IP_ADDRESS => {
                    let ours = ci.as_addr()?;
                    attempt.old_addrs = false;
                    if !ours.is_unspecified() && go.accept_local {
                        attempt.ouraddr = ours;
                    }
                    if !attempt.ouraddr.is_unspecified() {
                        attempt.neg_addr = true;
                    }
                }
                options::PRIMARY_DNS | options::SECONDARY_DNS => {
                    let addr = ci.as_addr()?;
                    if ci.kind == options::PRIMARY_DNS {
                        attempt.dnsaddr[0] = addr;
                        attempt.req_dns1 = true;
                    } else {
                        attempt.dnsaddr[1] = addr;
                        attempt.req_dns2 = true;
                    }
                }
                options::PRIMARY_NBNS | options::SECONDARY_NBNS => {
                    let addr = ci.as_addr()?;
                    let index = usize::from(ci.kind == options::SECONDARY_NBNS);
                    attempt.winsaddr[index] = addr;
                }
                options::IP_COMPRESSION => {
                    if ci.len() != lengths::VJ && ci.len() != lengths::COMPRESS {
                        return None;
                    }
                }
                _ => {}
            }
        }

        if !opened {
            self.got = attempt;
        }
        Some(NakOutcome::Continue)
    }

    fn rej_ci(&mut self, sent: &[Ci], rejected: &[Ci], opened: bool) -> bool {
        let Some(kinds) = match_rejected(sent, rejected) else {
            return false;
        };
        let mut attempt = self.got.clone();
        for kind in kinds {
            match kind {
                options::IP_ADDRESSES => attempt.old_addrs = false,
                options::IP_ADDRESS => attempt.neg_addr = false,
                options::IP_COMPRESSION => attempt.neg_vj = false,
                options::PRIMARY_DNS => attempt.req_dns1 = false,
                options::SECONDARY_DNS => attempt.req_dns2 = false,
                _ => {}
            }
        }
        if !opened {
            self.got = attempt;
        }
        true
    }

    fn req_ci(&mut self, cis: &[Ci], reject_if_disagree: bool) -> ReqResponse {
        let mut reply = ReqBuilder::new(reject_if_disagree);
        let mut his = IpcpOptions::default();

        for ci in cis {
            match ci.kind {
                options::IP_ADDRESSES | options::IP_ADDRESS => {
                    self.req_address(ci, &mut his, &mut reply)
                }
                options::IP_COMPRESSION => self.req_compression(ci, &mut his, &mut reply),
                options::PRIMARY_DNS | options::SECONDARY_DNS => {
                    let index = usize::from(ci.kind == options::SECONDARY_DNS);
                    self.req_server(ci, self.allowed.dnsaddr, index, &mut reply);
                }
                options::PRIMARY_NBNS | options::SECONDARY_NBNS => {
                    let index = usize::from(ci.kind == options::SECONDARY_NBNS);
                    self.req_server(ci, self.allowed.winsaddr, index, &mut reply);
                }
                _ => {
                    debug!(kind = ci.kind, "rejecting unknown IPCP option");
                    reply.reject(ci);
                }
            }
        }

        // Peer left out its address but we want to know it
        if reply.code() != crate::protocol::packet::codes::CONFIGURE_REJECT
            && !his.neg_addr
            && !his.old_addrs
            && self.wanted.req_addr
            && !reject_if_disagree
            && reply.append_nak(wire::address(self.wanted.hisaddr))
        {
            // Only ask once
            self.wanted.req_addr = false;
        }

        self.his = his;
        reply.finish()
    }
}
