//! Effect execution
//!
//! Runs the effects queued by the engines in FIFO order. Effects may queue
//! further effects; the loop ends when the queue is empty.

use super::engine::Session;
use super::link::Link;
use super::Context;
use crate::auth::{Layers, Orchestrator};
use crate::control::{FramingParams, IpConfig};
use crate::effects::{AuthOutcome, Effect, Effects, ExitStatus, LayerEvent};
use crate::protocol::lcp::DEFAULT_MRU;
use crate::protocol::packet::codes;
use crate::protocol::ppp::{protocol_name, protocols};
use crate::Result;
use tracing::{debug, info, warn};

impl<L: Link> Session<L> {
    pub(super) fn run(&mut self, fx: &mut Effects, ctx: &mut Context<'_>) {
        while let Some(effect) = fx.pop() {
            self.apply(effect, fx, ctx);
        }
    }

    /// Borrow the orchestrator and the engines it drives separately
    pub(super) fn split(&mut self) -> (&mut Orchestrator, Layers<'_>) {
        (
            &mut self.orchestrator,
            Layers {
                lcp: &mut self.lcp,
                ipcp: &mut self.ipcp,
                chap: &mut self.chap,
                pap: &mut self.pap,
            },
        )
    }

    fn apply(&mut self, effect: Effect, fx: &mut Effects, ctx: &mut Context<'_>) {
        match effect {
            Effect::Transmit { protocol, packet } => self.transmit(protocol, &packet),
            Effect::ArmTimer { purpose, delay } => {
                self.timers.arm(ctx.timers, self.id, purpose, delay);
            }
            Effect::CancelTimer(purpose) => self.timers.cancel(ctx.timers, purpose),
            Effect::Layer { protocol, event } => self.layer_event(protocol, event, fx, ctx),
            Effect::ConfigTimeout { protocol } => {
                warn!(session = %self.id, protocol = protocol_name(protocol), "peer not responding to Configure-Requests");
                if protocol == protocols::LCP {
                    self.status = ExitStatus::PeerDead;
                }
            }
            Effect::Status(status) => self.status = status,
            Effect::CloseLink { reason } => {
                self.orchestrator.link_terminating(fx);
                self.lcp.close_link(reason, fx);
            }
            Effect::ProtocolRejected(protocol) => match protocol {
                protocols::CHAP => self.chap.protocol_reject(fx),
                protocols::PAP => self.pap.protocol_reject(fx),
                protocols::IPCP => self.ipcp.protocol_reject(fx),
                other => {
                    debug!(session = %self.id, protocol = other, "Protocol-Reject for a protocol we do not send");
                }
            },
            Effect::Auth(outcome) => {
                if matches!(outcome, AuthOutcome::PeerFailure { .. }) {
                    self.stats.auth_failures.inc();
                }
                let (orchestrator, mut layers) = self.split();
                orchestrator.handle_outcome(outcome, &mut layers, fx);
            }
            Effect::Phase(phase) => {
                info!(session = %self.id, %phase, "phase");
                self.link.phase_changed(phase);
            }
        }
    }

    fn transmit(&mut self, protocol: u16, packet: &[u8]) {
        if matches!(protocol, protocols::LCP | protocols::IPCP) {
            match packet.first() {
                Some(&codes::CONFIGURE_NAK) => self.stats.naks_sent.inc(),
                Some(&codes::CONFIGURE_REJECT) => self.stats.rejects_sent.inc(),
                _ => {}
            }
        }
        match self.link.transmit(protocol, packet) {
            Ok(()) => self.stats.record_tx(packet.len()),
            Err(e) => {
                self.stats.tx_errors.inc();
                warn!(session = %self.id, protocol = protocol_name(protocol), error = %e, "transmit failed");
            }
        }
    }

    fn layer_event(
        &mut self,
        protocol: u16,
        event: LayerEvent,
        fx: &mut Effects,
        ctx: &mut Context<'_>,
    ) {
        debug!(session = %self.id, protocol = protocol_name(protocol), ?event, "layer event");
        match (protocol, event) {
            (protocols::LCP, LayerEvent::Up) => {
                self.link.install_framing(self.lcp.proto().framing());
                self.set_peer_mru(self.lcp.proto().peer_mru());
                self.lcp.echo_lower_up(fx);
                let secrets = ctx.secrets;
                let (orchestrator, mut layers) = self.split();
                orchestrator.link_established(&mut layers, secrets, fx);
            }
            (protocols::LCP, LayerEvent::Down) => {
                self.lcp.echo_lower_down(fx);
                self.link.install_framing(FramingParams::default());
                self.set_peer_mru(DEFAULT_MRU);
                let (orchestrator, mut layers) = self.split();
                orchestrator.link_down(&mut layers, fx);
                self.lcp.proto_mut().clear_negotiated();
            }
            (protocols::LCP, LayerEvent::Finished) => self.orchestrator.link_terminated(fx),
            (protocols::IPCP, LayerEvent::Up) => self.ipcp_up(fx),
            (protocols::IPCP, LayerEvent::Down) => self.ipcp_down(fx),
            (protocols::IPCP, LayerEvent::Finished) => {
                self.orchestrator.np_finished(protocols::IPCP, fx)
            }
            (_, LayerEvent::Starting) => {}
            (other, event) => {
                debug!(session = %self.id, protocol = other, ?event, "layer event for unknown protocol");
            }
        }
    }

    fn set_peer_mru(&mut self, mru: u16) {
        self.lcp.set_peer_mru(mru);
        self.ipcp.set_peer_mru(mru);
    }

    fn ipcp_up(&mut self, fx: &mut Effects) {
        let link = &self.link;
        let orchestrator = &self.orchestrator;
        let negotiated = self.ipcp.proto_mut().negotiated_config(|addr| {
            orchestrator.authorize_ip(addr, |addr| link.have_route_to(addr))
        });
        let config = match negotiated {
            Ok(config) => config,
            Err(e) => {
                self.ipcp.close(e.to_string(), fx);
                return;
            }
        };

        let installed = self.install_ip(&config);
        if let Err(e) = installed {
            warn!(session = %self.id, error = %e, "failed to configure interface");
            self.ipcp.close("Interface configuration failed", fx);
            return;
        }

        info!(
            session = %self.id,
            local = %config.local,
            remote = %config.remote,
            "IP link up"
        );
        for dns in config.dns.iter().flatten() {
            info!(session = %self.id, %dns, "DNS address from peer");
        }
        self.ip = Some(config);
        self.orchestrator.np_up(protocols::IPCP, fx);
    }

    fn install_ip(&mut self, config: &IpConfig) -> Result<()> {
        self.link.set_vj_compression(config.vj)?;
        self.link.if_up(config)?;
        if config.default_route {
            self.link.add_route(config)?;
        }
        if config.proxy_arp {
            self.link.set_proxy_arp(config.remote)?;
        }
        Ok(())
    }

    fn ipcp_down(&mut self, fx: &mut Effects) {
        self.orchestrator.np_down(protocols::IPCP, fx);
        let Some(config) = self.ip.take() else {
            return;
        };
        if config.proxy_arp {
            if let Err(e) = self.link.clear_proxy_arp(config.remote) {
                warn!(session = %self.id, error = %e, "failed to clear proxy ARP entry");
            }
        }
        if config.default_route {
            if let Err(e) = self.link.del_route(&config) {
                warn!(session = %self.id, error = %e, "failed to delete default route");
            }
        }
        if let Err(e) = self.link.if_down(&config) {
            warn!(session = %self.id, error = %e, "failed to bring interface down");
        }
        info!(session = %self.id, "IP link down");
    }
}
