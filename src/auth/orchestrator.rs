//! Link phase sequencing
//!
//! Drives a link from establishment through authentication to the network
//! phase. Authentication roles negotiated by LCP are started together and
//! tracked in a pending mask; the network phase begins once the mask is
//! empty. Any authentication failure closes the link.

use super::addrs::{self, AddrPolicy, AllowedAddrs};
use super::chap::Chap;
use super::pap::Pap;
use super::secrets::{SecretKind, SecretSource};
use crate::control::{Fsm, Ipcp, Lcp};
use crate::effects::{AuthOutcome, Effect, Effects, ExitStatus};
use crate::protocol::ppp::{protocol_name, protocols};
use crate::session::timer::TimerPurpose;
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

/// We are authenticating the peer with CHAP
pub const CHAP_PEER: u8 = 0x1;
/// We are authenticating ourselves with CHAP
pub const CHAP_WITHPEER: u8 = 0x2;
/// We are authenticating the peer with PAP
pub const PAP_PEER: u8 = 0x4;
/// We are authenticating ourselves with PAP
pub const PAP_WITHPEER: u8 = 0x8;

/// Link phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Dead,
    Establish,
    Authenticate,
    Callback,
    Network,
    Running,
    Terminate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Dead => "dead",
            Phase::Establish => "establish",
            Phase::Authenticate => "authenticate",
            Phase::Callback => "callback",
            Phase::Network => "network",
            Phase::Running => "running",
            Phase::Terminate => "terminate",
        };
        f.write_str(name)
    }
}

/// Who authenticates whom, and with what
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Our name when authenticating the peer
    pub our_name: String,
    /// Name we authenticate ourselves as
    pub user: String,
    /// PAP password; when empty it is looked up in the PAP secrets
    pub password: Zeroizing<Vec<u8>>,
    /// Peer's name for secret lookups
    pub remote_name: Option<String>,
    /// Always use `remote_name`, even when the peer names itself
    pub explicit_remote: bool,
    /// The peer must authenticate itself
    pub auth_required: bool,
    pub require_pap: bool,
    pub require_chap: bool,
    pub refuse_pap: bool,
    pub refuse_chap: bool,
    /// Without an address list, accept addresses we already route
    pub allow_any_ip: bool,
    /// Close the link after this long without traffic
    pub idle_limit: Option<Duration>,
    /// Close the link this long after the network came up
    pub max_connect: Option<Duration>,
    /// Unit number used for `+` address offsets
    pub unit: u32,
    /// Run IPCP in the network phase
    pub ipcp_enabled: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            our_name: String::new(),
            user: String::new(),
            password: Zeroizing::new(Vec::new()),
            remote_name: None,
            explicit_remote: false,
            auth_required: false,
            require_pap: false,
            require_chap: false,
            refuse_pap: false,
            refuse_chap: false,
            allow_any_ip: false,
            idle_limit: None,
            max_connect: None,
            unit: 0,
            ipcp_enabled: true,
        }
    }
}

impl AuthSettings {
    /// Name we authenticate as, defaulting to our own name
    pub fn user(&self) -> &str {
        if self.user.is_empty() {
            &self.our_name
        } else {
            &self.user
        }
    }

    /// Is the peer required to authenticate at all
    pub fn peer_auth_required(&self) -> bool {
        self.auth_required || self.require_pap || self.require_chap
    }

    fn explicit_remote_name(&self) -> Option<&str> {
        if self.explicit_remote {
            self.remote_name.as_deref()
        } else {
            None
        }
    }
}

/// The protocol engines the orchestrator drives
pub struct Layers<'a> {
    pub lcp: &'a mut Fsm<Lcp>,
    pub ipcp: &'a mut Fsm<Ipcp>,
    pub chap: &'a mut Chap,
    pub pap: &'a mut Pap,
}

#[derive(Debug)]
pub struct Orchestrator {
    settings: AuthSettings,
    phase: Phase,
    pending: u8,
    done: u8,
    num_np_open: u32,
    num_np_up: u32,
    peer_name: Option<String>,
    allowed: Option<AllowedAddrs>,
    extra_options: Vec<String>,
    connected_at: Option<DateTime<Utc>>,
}

impl Orchestrator {
    pub fn new(settings: AuthSettings) -> Self {
        Self {
            settings,
            phase: Phase::Dead,
            pending: 0,
            done: 0,
            num_np_open: 0,
            num_np_up: 0,
            peer_name: None,
            allowed: None,
            extra_options: Vec::new(),
            connected_at: None,
        }
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Authentication roles still outstanding
    pub fn pending(&self) -> u8 {
        self.pending
    }

    /// Authentication roles completed this link
    pub fn done(&self) -> u8 {
        self.done
    }

    /// Name the peer authenticated as
    pub fn peer_name(&self) -> Option<&str> {
        self.peer_name.as_deref()
    }

    pub fn allowed_addrs(&self) -> Option<&AllowedAddrs> {
        self.allowed.as_ref()
    }

    /// Options following `--` in the peer's secrets entry
    pub fn extra_options(&self) -> &[String] {
        &self.extra_options
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at
    }

    pub fn network_protocols_up(&self) -> u32 {
        self.num_np_up
    }

    fn new_phase(&mut self, phase: Phase, fx: &mut Effects) {
        if self.phase == phase {
            return;
        }
        debug!(from = %self.phase, to = %phase, "phase change");
        self.phase = phase;
        fx.push(Effect::Phase(phase));
    }

    /// Decide which authentication protocols LCP offers, based on the
    /// secrets available. Called before each LCP negotiation.
    pub fn auth_reset(&self, lcp: &mut Lcp, secrets: &dyn SecretSource) {
        let settings = &self.settings;
        let user = settings.user();
        let remote = settings.remote_name.as_deref();
        let have_password = !settings.password.is_empty();

        lcp.allowed.neg_upap = !settings.refuse_pap
            && (have_password || secrets.has_secret(SecretKind::Pap, Some(user), remote));
        lcp.allowed.neg_chap = !settings.refuse_chap
            && secrets.has_secret(SecretKind::Chap, Some(user), settings.explicit_remote_name());

        let (mut want_pap, mut want_chap) = (settings.require_pap, settings.require_chap);
        if settings.auth_required && !want_pap && !want_chap {
            want_pap = true;
            want_chap = true;
        }
        let our_name = Some(settings.our_name.as_str());
        let peer = settings.explicit_remote_name();
        lcp.wanted.neg_upap = want_pap && secrets.has_secret(SecretKind::Pap, peer, our_name);
        lcp.wanted.neg_chap = want_chap && secrets.has_secret(SecretKind::Chap, peer, our_name);
    }

    /// Lower layer is up and LCP is negotiating
    pub fn establish(&mut self, fx: &mut Effects) {
        self.new_phase(Phase::Establish, fx);
    }

    /// LCP came up: start authentication or go straight to the network
    pub fn link_established(
        &mut self,
        layers: &mut Layers<'_>,
        secrets: &dyn SecretSource,
        fx: &mut Effects,
    ) {
        layers.chap.lower_up(fx);
        layers.pap.lower_up(fx);
        layers.ipcp.lower_up(fx);

        let got = layers.lcp.proto().got.clone();
        let his = layers.lcp.proto().his.clone();

        if self.settings.peer_auth_required() && !(got.neg_upap || got.neg_chap) {
            warn!("peer refused to authenticate: terminating link");
            fx.close_link("peer refused to authenticate", ExitStatus::PeerAuthFailed);
            return;
        }

        self.new_phase(Phase::Authenticate, fx);
        let mut auth = 0;
        if got.neg_chap {
            layers.chap.auth_peer(&self.settings.our_name, got.chap_mdtype, fx);
            auth |= CHAP_PEER;
        } else if got.neg_upap {
            layers.pap.auth_peer(&self.settings.our_name, fx);
            auth |= PAP_PEER;
        }
        if his.neg_chap {
            layers.chap.auth_with_peer(
                self.settings.user(),
                self.settings.remote_name.as_deref(),
                self.settings.explicit_remote,
                his.chap_mdtype,
            );
            auth |= CHAP_WITHPEER;
        } else if his.neg_upap {
            let password = self.pap_password(secrets);
            layers.pap.auth_with_peer(self.settings.user(), password, fx);
            auth |= PAP_WITHPEER;
        }
        self.pending = auth;
        self.done = 0;

        if auth == 0 {
            self.network_phase(layers, fx);
        }
    }

    fn pap_password(&self, secrets: &dyn SecretSource) -> Zeroizing<Vec<u8>> {
        if !self.settings.password.is_empty() {
            return self.settings.password.clone();
        }
        match secrets.lookup(
            SecretKind::Pap,
            Some(self.settings.user()),
            self.settings.remote_name.as_deref(),
        ) {
            Some(entry) => entry.secret,
            None => {
                error!(user = self.settings.user(), "no secret found for PAP login");
                Zeroizing::new(Vec::new())
            }
        }
    }

    /// LCP left the opened state
    pub fn link_down(&mut self, layers: &mut Layers<'_>, fx: &mut Effects) {
        layers.chap.lower_down(fx);
        layers.pap.lower_down(fx);
        layers.ipcp.lower_down(fx);
        layers.ipcp.close("LCP down", fx);
        if self.num_np_up > 0 {
            self.num_np_up = 0;
            self.np_all_down(fx);
        }
        self.num_np_open = 0;
        self.pending = 0;
        if self.phase != Phase::Dead {
            self.new_phase(Phase::Establish, fx);
        }
    }

    /// LCP is terminating the link
    pub fn link_terminating(&mut self, fx: &mut Effects) {
        if self.phase != Phase::Dead {
            self.new_phase(Phase::Terminate, fx);
        }
    }

    /// LCP finished: the link is gone
    pub fn link_terminated(&mut self, fx: &mut Effects) {
        if self.phase == Phase::Dead {
            return;
        }
        self.new_phase(Phase::Dead, fx);
        self.peer_name = None;
        self.allowed = None;
        info!("connection terminated");
    }

    /// Route an authentication result
    pub fn handle_outcome(&mut self, outcome: AuthOutcome, layers: &mut Layers<'_>, fx: &mut Effects) {
        match outcome {
            AuthOutcome::PeerSuccess { protocol, name, addrs, options } => {
                self.peer_success(protocol, name, &addrs, options, layers, fx)
            }
            AuthOutcome::PeerFailure { protocol } => self.peer_failure(protocol, fx),
            AuthOutcome::WithPeerSuccess { protocol } => self.withpeer_success(protocol, layers, fx),
            AuthOutcome::WithPeerFailure { protocol } => self.withpeer_failure(protocol, fx),
        }
    }

    fn peer_success(
        &mut self,
        protocol: u16,
        name: String,
        addrs: &[String],
        options: Vec<String>,
        layers: &mut Layers<'_>,
        fx: &mut Effects,
    ) {
        let bit = match protocol {
            protocols::CHAP => CHAP_PEER,
            protocols::PAP => PAP_PEER,
            other => {
                warn!(protocol = other, "peer success for unknown protocol");
                return;
            }
        };
        info!(peer = %name, protocol = protocol_name(protocol), "peer authenticated");
        self.peer_name = Some(name);
        self.set_allowed_addrs(addrs, options, layers.ipcp.proto_mut());
        self.clear_pending(bit, layers, fx);
    }

    fn peer_failure(&mut self, protocol: u16, fx: &mut Effects) {
        warn!(protocol = protocol_name(protocol), "peer failed to authenticate");
        fx.close_link("Authentication failed", ExitStatus::PeerAuthFailed);
    }

    fn withpeer_success(&mut self, protocol: u16, layers: &mut Layers<'_>, fx: &mut Effects) {
        let bit = match protocol {
            protocols::CHAP => CHAP_WITHPEER,
            protocols::PAP => PAP_WITHPEER,
            other => {
                warn!(protocol = other, "auth with peer success for unknown protocol");
                return;
            }
        };
        info!(protocol = protocol_name(protocol), "authenticated to peer");
        self.clear_pending(bit, layers, fx);
    }

    fn withpeer_failure(&mut self, protocol: u16, fx: &mut Effects) {
        warn!(protocol = protocol_name(protocol), "failed to authenticate ourselves to peer");
        fx.close_link(
            "Failed to authenticate ourselves to peer",
            ExitStatus::AuthToPeerFailed,
        );
    }

    fn clear_pending(&mut self, bit: u8, layers: &mut Layers<'_>, fx: &mut Effects) {
        if self.pending & bit == 0 {
            debug!(bit, pending = self.pending, "authentication result not pending");
            return;
        }
        self.done |= bit;
        self.pending &= !bit;
        if self.pending == 0 {
            self.network_phase(layers, fx);
        }
    }

    /// Install the peer's address list and extra options
    fn set_allowed_addrs(&mut self, addrs: &[String], options: Vec<String>, ipcp: &mut Ipcp) {
        self.extra_options = options;
        self.allowed = AllowedAddrs::parse(addrs, self.settings.unit);

        let Some(allowed) = &self.allowed else {
            return;
        };
        let Some(suggested) = allowed.suggested() else {
            return;
        };
        let current = ipcp.wanted.hisaddr;
        if current.is_unspecified() || !self.authorize_ip(current, |_| false) {
            debug!(%suggested, "using peer address from secrets entry");
            ipcp.wanted.hisaddr = suggested;
            if allowed.has_alternatives() {
                ipcp.wanted.accept_remote = true;
            }
        }
    }

    fn network_phase(&mut self, layers: &mut Layers<'_>, fx: &mut Effects) {
        if layers.lcp.proto().got.neg_cbcp {
            self.new_phase(Phase::Callback, fx);
            return;
        }
        self.start_networks(layers, fx);
    }

    /// The callback exchange finished, carry on with the network phase
    pub fn callback_complete(&mut self, layers: &mut Layers<'_>, fx: &mut Effects) {
        if self.phase != Phase::Callback {
            debug!(phase = %self.phase, "callback completion outside callback phase");
            return;
        }
        self.start_networks(layers, fx);
    }

    fn start_networks(&mut self, layers: &mut Layers<'_>, fx: &mut Effects) {
        self.new_phase(Phase::Network, fx);
        if !self.extra_options.is_empty() {
            info!(options = ?self.extra_options, "extra options from secrets entry");
        }
        if self.settings.ipcp_enabled {
            layers.ipcp.open(fx);
            self.num_np_open += 1;
        }
        if self.num_np_open == 0 {
            fx.close_link("No network protocols running", ExitStatus::NegotiationFailed);
        }
    }

    /// A network protocol came up
    pub fn np_up(&mut self, protocol: u16, fx: &mut Effects) {
        if self.num_np_up == 0 {
            fx.push(Effect::Status(ExitStatus::Ok));
            self.new_phase(Phase::Running, fx);
            self.connected_at = Some(Utc::now());
            if let Some(idle) = self.settings.idle_limit {
                fx.arm(TimerPurpose::Idle, idle);
            }
            if let Some(limit) = self.settings.max_connect {
                fx.arm(TimerPurpose::SessionLimit, limit);
            }
        }
        self.num_np_up += 1;
        debug!(protocol = protocol_name(protocol), up = self.num_np_up, "network protocol up");
    }

    /// A network protocol went down
    pub fn np_down(&mut self, protocol: u16, fx: &mut Effects) {
        debug!(protocol = protocol_name(protocol), "network protocol down");
        if self.num_np_up == 0 {
            return;
        }
        self.num_np_up -= 1;
        if self.num_np_up == 0 {
            self.np_all_down(fx);
            if self.phase == Phase::Running {
                self.new_phase(Phase::Network, fx);
            }
        }
    }

    fn np_all_down(&mut self, fx: &mut Effects) {
        fx.cancel(TimerPurpose::Idle);
        fx.cancel(TimerPurpose::SessionLimit);
        if let Some(start) = self.connected_at.take() {
            let elapsed = Utc::now().signed_duration_since(start);
            info!(
                minutes = elapsed.num_minutes(),
                seconds = elapsed.num_seconds() % 60,
                "connect time"
            );
        }
    }

    /// A network protocol finished and no longer needs the link
    pub fn np_finished(&mut self, protocol: u16, fx: &mut Effects) {
        debug!(protocol = protocol_name(protocol), "network protocol finished");
        self.num_np_open = self.num_np_open.saturating_sub(1);
        if self.num_np_open == 0 {
            fx.close_link("No network protocols running", ExitStatus::NegotiationFailed);
        }
    }

    /// Idle timer fired; `idle` is how long the link has been quiet
    pub fn idle_check(&mut self, idle: Duration, fx: &mut Effects) {
        let Some(limit) = self.settings.idle_limit else {
            return;
        };
        if idle >= limit {
            info!(idle_secs = idle.as_secs(), "terminating connection due to lack of activity");
            fx.close_link("Link inactive", ExitStatus::IdleTimeout);
        } else {
            fx.arm(TimerPurpose::Idle, limit - idle);
        }
    }

    /// The session time limit was reached
    pub fn connect_time_expired(&mut self, fx: &mut Effects) {
        info!("connect time expired");
        fx.close_link("Connect time expired", ExitStatus::ConnectTime);
    }

    /// May the peer use `addr`?
    pub fn authorize_ip(&self, addr: Ipv4Addr, have_route_to: impl FnOnce(Ipv4Addr) -> bool) -> bool {
        let policy = AddrPolicy {
            auth_required: self.settings.peer_auth_required(),
            allow_any_ip: self.settings.allow_any_ip,
        };
        addrs::auth_ip_addr(self.allowed.as_ref(), addr, policy, have_route_to)
    }
}
