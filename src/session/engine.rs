//! Per-link session
//!
//! A [`Session`] owns every protocol engine of one link. Each entry point
//! runs one event to completion: the engines queue effects, then the
//! session executes them (see `dispatch`) until the queue is empty.

use super::link::Link;
use super::registry::SessionId;
use super::timer::{TimerHandle, TimerPurpose, TimerService, TimerSlots};
use super::Context;
use crate::auth::{
    AuthContext, AuthSettings, Chap, ChapConfig, DigestRegistry, Orchestrator, Pap, PapConfig,
    Phase,
};
use crate::control::{
    Fsm, FsmConfig, IpConfig, Ipcp, IpcpOptions, IpcpSettings, Lcp, LcpOptions, LcpSettings,
};
use crate::effects::{Effects, ExitStatus};
use crate::protocol::ppp::{is_network_control, protocol_name, protocols};
use crate::telemetry::LinkStats;
use std::net::Ipv4Addr;
use tracing::{debug, info};

/// Everything needed to build a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub lcp_fsm: FsmConfig,
    pub ipcp_fsm: FsmConfig,
    pub lcp_wanted: LcpOptions,
    pub lcp_allowed: LcpOptions,
    pub lcp: LcpSettings,
    pub ipcp_wanted: IpcpOptions,
    pub ipcp_allowed: IpcpOptions,
    pub ipcp: IpcpSettings,
    pub chap: ChapConfig,
    pub pap: PapConfig,
    pub auth: AuthSettings,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            lcp_fsm: FsmConfig::default(),
            ipcp_fsm: FsmConfig::default(),
            lcp_wanted: LcpOptions::wanted_defaults(),
            lcp_allowed: LcpOptions::allowed_defaults(),
            lcp: LcpSettings::default(),
            ipcp_wanted: IpcpOptions::wanted_defaults(),
            ipcp_allowed: IpcpOptions::allowed_defaults(),
            ipcp: IpcpSettings::default(),
            chap: ChapConfig::default(),
            pap: PapConfig::default(),
            auth: AuthSettings::default(),
        }
    }
}

#[derive(Debug)]
pub struct Session<L: Link> {
    pub(super) id: SessionId,
    pub(super) link: L,
    pub(super) lcp: Fsm<Lcp>,
    pub(super) ipcp: Fsm<Ipcp>,
    pub(super) chap: Chap,
    pub(super) pap: Pap,
    pub(super) orchestrator: Orchestrator,
    pub(super) status: ExitStatus,
    pub(super) timers: TimerSlots,
    pub(super) stats: LinkStats,
    /// IP configuration installed on the link
    pub(super) ip: Option<IpConfig>,
}

impl<L: Link> Session<L> {
    pub fn new(id: SessionId, link: L, settings: SessionSettings) -> Self {
        Self::with_digests(id, link, settings, DigestRegistry::default())
    }

    /// Build a session with a custom set of CHAP digests
    pub fn with_digests(
        id: SessionId,
        link: L,
        settings: SessionSettings,
        digests: DigestRegistry,
    ) -> Self {
        let mut lcp_wanted = settings.lcp_wanted;
        let mut lcp_allowed = settings.lcp_allowed;
        let codes = digests.codes();
        if let Some(&preferred) = codes.first() {
            lcp_wanted.chap_mdtype = preferred;
            lcp_allowed.chap_mdtype = preferred;
        }
        lcp_wanted.chap_digests = codes.clone();
        lcp_allowed.chap_digests = codes;

        Self {
            id,
            link,
            lcp: Fsm::new(Lcp::new(lcp_wanted, lcp_allowed, settings.lcp), settings.lcp_fsm),
            ipcp: Fsm::new(
                Ipcp::new(settings.ipcp_wanted, settings.ipcp_allowed, settings.ipcp),
                settings.ipcp_fsm,
            ),
            chap: Chap::new(settings.chap, digests),
            pap: Pap::new(settings.pap),
            orchestrator: Orchestrator::new(settings.auth),
            status: ExitStatus::default(),
            timers: TimerSlots::new(),
            stats: LinkStats::new(),
            ip: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Exit status recorded for the link
    pub fn status(&self) -> ExitStatus {
        self.status
    }

    pub fn phase(&self) -> Phase {
        self.orchestrator.phase()
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn lcp(&self) -> &Fsm<Lcp> {
        &self.lcp
    }

    pub fn ipcp(&self) -> &Fsm<Ipcp> {
        &self.ipcp
    }

    pub fn chap(&self) -> &Chap {
        &self.chap
    }

    pub fn pap(&self) -> &Pap {
        &self.pap
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn timers(&self) -> &TimerSlots {
        &self.timers
    }

    /// IP configuration currently installed, if IPCP is up
    pub fn ip_config(&self) -> Option<&IpConfig> {
        self.ip.as_ref()
    }

    /// Name the peer authenticated as
    pub fn peer_name(&self) -> Option<&str> {
        self.orchestrator.peer_name()
    }

    /// Options from the peer's secrets entry
    pub fn extra_options(&self) -> &[String] {
        self.orchestrator.extra_options()
    }

    /// The lower layer came up
    pub fn lower_up(&mut self, ctx: &mut Context<'_>) {
        let mut fx = Effects::new();
        info!(session = %self.id, "lower layer up");
        self.orchestrator.establish(&mut fx);
        self.lcp.lower_up(&mut fx);
        self.run(&mut fx, ctx);
    }

    /// The lower layer went away
    pub fn lower_down(&mut self, ctx: &mut Context<'_>) {
        let mut fx = Effects::new();
        info!(session = %self.id, "lower layer down");
        if self.status == ExitStatus::Ok {
            self.status = ExitStatus::Hangup;
        }
        self.lcp.lower_down(&mut fx);
        self.orchestrator.link_terminated(&mut fx);
        self.run(&mut fx, ctx);
    }

    /// Start negotiating the link
    pub fn open(&mut self, ctx: &mut Context<'_>) {
        let mut fx = Effects::new();
        self.orchestrator.auth_reset(self.lcp.proto_mut(), ctx.secrets);
        self.status = ExitStatus::NegotiationFailed;
        self.lcp.open(&mut fx);
        self.run(&mut fx, ctx);
    }

    /// Close the link on request
    pub fn close(&mut self, reason: &str, ctx: &mut Context<'_>) {
        let mut fx = Effects::new();
        info!(session = %self.id, reason, "closing link");
        self.status = ExitStatus::UserRequest;
        self.orchestrator.link_terminating(&mut fx);
        self.lcp.close_link(reason, &mut fx);
        self.run(&mut fx, ctx);
    }

    pub fn ipcp_open(&mut self, ctx: &mut Context<'_>) {
        let mut fx = Effects::new();
        self.ipcp.open(&mut fx);
        self.run(&mut fx, ctx);
    }

    pub fn ipcp_close(&mut self, reason: &str, ctx: &mut Context<'_>) {
        let mut fx = Effects::new();
        self.ipcp.close(reason, &mut fx);
        self.run(&mut fx, ctx);
    }

    /// A received frame, demultiplexed by protocol number
    pub fn input(&mut self, protocol: u16, bytes: &[u8], ctx: &mut Context<'_>) {
        self.stats.record_rx(bytes.len());

        if protocol != protocols::LCP && !self.lcp.is_opened() {
            debug!(session = %self.id, protocol, "discarded non-LCP packet while LCP is not open");
            return;
        }

        match protocol {
            protocols::LCP => self.lcp_input(bytes, ctx),
            protocols::IPCP => {
                if matches!(self.phase(), Phase::Network | Phase::Running) {
                    self.ipcp_input(bytes, ctx);
                } else {
                    debug!(session = %self.id, phase = %self.phase(), "discarding IPCP before network phase");
                }
            }
            protocols::CHAP => self.chap_input(bytes, ctx),
            protocols::PAP => self.pap_input(bytes, ctx),
            other => {
                self.stats.rx_unknown_protocol.inc();
                if is_network_control(other) {
                    debug!(session = %self.id, protocol = other, "unsupported network control protocol");
                }
                let mut fx = Effects::new();
                self.lcp.send_protocol_reject(other, bytes, &mut fx);
                self.run(&mut fx, ctx);
            }
        }
    }

    pub fn lcp_input(&mut self, bytes: &[u8], ctx: &mut Context<'_>) {
        let mut fx = Effects::new();
        let result = self.lcp.input(bytes, &mut fx);
        self.finish_input(protocols::LCP, result, &mut fx, ctx);
    }

    pub fn ipcp_input(&mut self, bytes: &[u8], ctx: &mut Context<'_>) {
        let mut fx = Effects::new();
        let result = self.ipcp.input(bytes, &mut fx);
        self.finish_input(protocols::IPCP, result, &mut fx, ctx);
    }

    pub fn chap_input(&mut self, bytes: &[u8], ctx: &mut Context<'_>) {
        let mut fx = Effects::new();
        let auth = AuthContext {
            secrets: ctx.secrets,
            login: ctx.login,
        };
        let result = self.chap.input(bytes, &auth, &mut fx);
        self.finish_input(protocols::CHAP, result, &mut fx, ctx);
    }

    pub fn pap_input(&mut self, bytes: &[u8], ctx: &mut Context<'_>) {
        let mut fx = Effects::new();
        let auth = AuthContext {
            secrets: ctx.secrets,
            login: ctx.login,
        };
        let result = self.pap.input(bytes, &auth, &mut fx);
        self.finish_input(protocols::PAP, result, &mut fx, ctx);
    }

    fn finish_input(
        &mut self,
        protocol: u16,
        result: crate::Result<()>,
        fx: &mut Effects,
        ctx: &mut Context<'_>,
    ) {
        if let Err(e) = result {
            self.stats.record_malformed();
            debug!(session = %self.id, protocol = protocol_name(protocol), error = %e, "dropping malformed packet");
        }
        self.run(fx, ctx);
    }

    /// A timer armed by this session expired
    pub fn timer_fired(&mut self, purpose: TimerPurpose, handle: TimerHandle, ctx: &mut Context<'_>) {
        if !self.timers.fire(purpose, handle) {
            debug!(session = %self.id, ?purpose, "ignoring stale timer");
            return;
        }

        let mut fx = Effects::new();
        match purpose {
            TimerPurpose::Lcp => self.lcp.timeout(&mut fx),
            TimerPurpose::Ipcp => self.ipcp.timeout(&mut fx),
            TimerPurpose::Echo => self.lcp.echo_timeout(&mut fx),
            TimerPurpose::ChapChallenge
            | TimerPurpose::ChapResponse
            | TimerPurpose::ChapRechallenge => self.chap.timeout(purpose, &mut fx),
            TimerPurpose::PapRequest | TimerPurpose::PapListen => self.pap.timeout(purpose, &mut fx),
            TimerPurpose::Idle => {
                let idle = self.link.idle_time();
                self.orchestrator.idle_check(idle, &mut fx);
            }
            TimerPurpose::SessionLimit => self.orchestrator.connect_time_expired(&mut fx),
        }
        self.run(&mut fx, ctx);
    }

    /// The callback exchange completed
    pub fn callback_complete(&mut self, ctx: &mut Context<'_>) {
        let mut fx = Effects::new();
        let (orchestrator, mut layers) = self.split();
        orchestrator.callback_complete(&mut layers, &mut fx);
        self.run(&mut fx, ctx);
    }

    /// May the peer use `addr` as its IP address?
    pub fn auth_ip_addr(&self, addr: Ipv4Addr) -> bool {
        let link = &self.link;
        self.orchestrator
            .authorize_ip(addr, |addr| link.have_route_to(addr))
    }

    /// Cancel every armed timer. Called before the session is dropped.
    pub fn release(&mut self, timers: &mut dyn TimerService) {
        self.timers.cancel_all(timers);
    }
}
