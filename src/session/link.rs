//! The link a session runs over
//!
//! A [`Link`] is everything outside the control plane: frame delivery, the
//! framing layer and the IP interface. Sessions call it while executing
//! effects, never from inside a protocol engine.

use crate::auth::Phase;
use crate::control::{FramingParams, IpConfig, VjParams};
use crate::Result;
use std::net::Ipv4Addr;
use std::time::Duration;

pub trait Link {
    /// Send one control packet under `protocol`
    fn transmit(&mut self, protocol: u16, packet: &[u8]) -> Result<()>;

    /// Apply the framing LCP negotiated, or the defaults when it goes down
    fn install_framing(&mut self, framing: FramingParams);

    /// Configure VJ compression towards the peer, `None` turns it off
    fn set_vj_compression(&mut self, vj: Option<VjParams>) -> Result<()>;

    /// Assign addresses and bring the interface up
    fn if_up(&mut self, config: &IpConfig) -> Result<()>;

    fn if_down(&mut self, config: &IpConfig) -> Result<()>;

    /// Install a default route through the peer
    fn add_route(&mut self, config: &IpConfig) -> Result<()>;

    fn del_route(&mut self, config: &IpConfig) -> Result<()>;

    fn set_proxy_arp(&mut self, peer: Ipv4Addr) -> Result<()>;

    fn clear_proxy_arp(&mut self, peer: Ipv4Addr) -> Result<()>;

    /// Time since data traffic last crossed the link
    fn idle_time(&self) -> Duration;

    /// Is `addr` already reachable through some other interface
    fn have_route_to(&self, addr: Ipv4Addr) -> bool;

    fn phase_changed(&mut self, _phase: Phase) {}
}

/// A link that records what the session asked of it.
///
/// Used to wire sessions together in tests and simulations.
#[derive(Debug, Default)]
pub struct RecordingLink {
    /// Packets sent, oldest first
    pub sent: Vec<(u16, Vec<u8>)>,
    pub framing: Option<FramingParams>,
    pub vj: Option<VjParams>,
    /// Configuration of the interface while it is up
    pub ip: Option<IpConfig>,
    pub default_route: bool,
    pub proxy_arp: Option<Ipv4Addr>,
    pub phases: Vec<Phase>,
    /// Reported by `idle_time`
    pub idle: Duration,
    /// Addresses `have_route_to` claims to reach
    pub routed: Vec<Ipv4Addr>,
    /// Make `if_up` fail
    pub fail_if_up: bool,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the packets sent so far
    pub fn take_sent(&mut self) -> Vec<(u16, Vec<u8>)> {
        std::mem::take(&mut self.sent)
    }
}

impl Link for RecordingLink {
    fn transmit(&mut self, protocol: u16, packet: &[u8]) -> Result<()> {
        self.sent.push((protocol, packet.to_vec()));
        Ok(())
    }

    fn install_framing(&mut self, framing: FramingParams) {
        self.framing = Some(framing);
    }

    fn set_vj_compression(&mut self, vj: Option<VjParams>) -> Result<()> {
        self.vj = vj;
        Ok(())
    }

    fn if_up(&mut self, config: &IpConfig) -> Result<()> {
        if self.fail_if_up {
            return Err(crate::Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "interface configuration refused",
            )));
        }
        self.ip = Some(config.clone());
        Ok(())
    }

    fn if_down(&mut self, _config: &IpConfig) -> Result<()> {
        self.ip = None;
        Ok(())
    }

    fn add_route(&mut self, _config: &IpConfig) -> Result<()> {
        self.default_route = true;
        Ok(())
    }

    fn del_route(&mut self, _config: &IpConfig) -> Result<()> {
        self.default_route = false;
        Ok(())
    }

    fn set_proxy_arp(&mut self, peer: Ipv4Addr) -> Result<()> {
        self.proxy_arp = Some(peer);
        Ok(())
    }

    fn clear_proxy_arp(&mut self, _peer: Ipv4Addr) -> Result<()> {
        self.proxy_arp = None;
        Ok(())
    }

    fn idle_time(&self) -> Duration {
        self.idle
    }

    fn have_route_to(&self, addr: Ipv4Addr) -> bool {
        self.routed.contains(&addr)
    }

    fn phase_changed(&mut self, phase: Phase) {
        self.phases.push(phase);
    }
}
