//! PAP client and server
//!
//! The client sends our credentials until the peer answers; the server
//! checks the peer's credentials against the PAP secrets. Failed checks are
//! counted per session and the link is dropped once the count reaches
//! [`MAX_LOGIN_ATTEMPTS`].

use super::secrets::SecretKind;
use super::AuthContext;
use crate::effects::{AuthOutcome, Effects, ExitStatus};
use crate::protocol::pap::{self as wire, codes, PapMessage};
use crate::protocol::ppp::protocols;
use crate::session::timer::TimerPurpose;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_TRANSMITS: u32 = 10;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Failed logins tolerated before the link is closed
pub const MAX_LOGIN_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Initial,
    Closed,
    Pending,
    /// Authenticate-Request sent
    AuthReq,
    Open,
    BadAuth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Initial,
    Closed,
    Pending,
    /// Waiting for an Authenticate-Request
    Listen,
    Open,
    BadAuth,
}

#[derive(Debug, Clone)]
pub struct PapConfig {
    pub timeout: Duration,
    pub max_transmits: u32,
    /// How long the server waits for a request; `None` waits forever
    pub request_timeout: Option<Duration>,
}

impl Default for PapConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_transmits: DEFAULT_MAX_TRANSMITS,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

/// Checks credentials against the host's login database
pub trait SystemLogin {
    fn check(&self, user: &str, password: &[u8]) -> bool;
}

#[derive(Debug)]
pub struct Pap {
    config: PapConfig,
    client: ClientState,
    server: ServerState,
    user: String,
    our_name: String,
    password: Zeroizing<Vec<u8>>,
    id: u8,
    transmits: u32,
    /// Verdict replayed for duplicate requests
    verdict: Option<(u8, String)>,
    attempts: u32,
}

impl Pap {
    pub fn new(config: PapConfig) -> Self {
        Self {
            config,
            client: ClientState::Initial,
            server: ServerState::Initial,
            user: String::new(),
            our_name: String::new(),
            password: Zeroizing::new(Vec::new()),
            id: 0,
            transmits: 0,
            verdict: None,
            attempts: 0,
        }
    }

    pub fn client_state(&self) -> ClientState {
        self.client
    }

    pub fn server_state(&self) -> ServerState {
        self.server
    }

    /// Consecutive failed logins on this session
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn has_password(&self) -> bool {
        !self.password.is_empty()
    }

    /// Authenticate ourselves to the peer as `user`
    pub fn auth_with_peer(&mut self, user: &str, password: Zeroizing<Vec<u8>>, fx: &mut Effects) {
        self.user = user.to_string();
        self.password = password;
        self.transmits = 0;
        match self.client {
            ClientState::Initial | ClientState::Pending => self.client = ClientState::Pending,
            _ => self.send_request(fx),
        }
    }

    /// Wait for the peer to authenticate itself to `our_name`
    pub fn auth_peer(&mut self, our_name: &str, fx: &mut Effects) {
        self.our_name = our_name.to_string();
        match self.server {
            ServerState::Initial | ServerState::Pending => self.server = ServerState::Pending,
            _ => self.listen(fx),
        }
    }

    pub fn lower_up(&mut self, fx: &mut Effects) {
        match self.client {
            ClientState::Initial => self.client = ClientState::Closed,
            ClientState::Pending => self.send_request(fx),
            _ => {}
        }
        match self.server {
            ServerState::Initial => self.server = ServerState::Closed,
            ServerState::Pending => self.listen(fx),
            _ => {}
        }
    }

    pub fn lower_down(&mut self, fx: &mut Effects) {
        if self.client == ClientState::AuthReq {
            fx.cancel(TimerPurpose::PapRequest);
        }
        if self.server == ServerState::Listen && self.config.request_timeout.is_some() {
            fx.cancel(TimerPurpose::PapListen);
        }
        self.client = ClientState::Initial;
        self.server = ServerState::Initial;
        self.password = Zeroizing::new(Vec::new());
        self.verdict = None;
    }

    /// Peer rejected PAP
    pub fn protocol_reject(&mut self, fx: &mut Effects) {
        if self.client == ClientState::AuthReq {
            warn!("PAP authentication failed due to protocol-reject");
            fx.auth(AuthOutcome::WithPeerFailure { protocol: protocols::PAP });
        }
        if self.server == ServerState::Listen {
            warn!("PAP authentication of peer failed (protocol-reject)");
            fx.auth(AuthOutcome::PeerFailure { protocol: protocols::PAP });
        }
        self.lower_down(fx);
    }

    pub fn timeout(&mut self, purpose: TimerPurpose, fx: &mut Effects) {
        match purpose {
            TimerPurpose::PapRequest => {
                if self.client != ClientState::AuthReq {
                    return;
                }
                if self.transmits >= self.config.max_transmits {
                    warn!("no response to PAP authenticate-requests");
                    self.client = ClientState::BadAuth;
                    self.password = Zeroizing::new(Vec::new());
                    fx.auth(AuthOutcome::WithPeerFailure { protocol: protocols::PAP });
                    return;
                }
                self.send_request(fx);
            }
            TimerPurpose::PapListen => {
                if self.server != ServerState::Listen {
                    return;
                }
                warn!("peer did not send a PAP authenticate-request");
                self.server = ServerState::BadAuth;
                fx.auth(AuthOutcome::PeerFailure { protocol: protocols::PAP });
            }
            other => debug!(?other, "PAP ignoring foreign timer"),
        }
    }

    fn listen(&mut self, fx: &mut Effects) {
        self.server = ServerState::Listen;
        if let Some(timeout) = self.config.request_timeout {
            fx.arm(TimerPurpose::PapListen, timeout);
        }
    }

    fn send_request(&mut self, fx: &mut Effects) {
        self.id = self.id.wrapping_add(1);
        let packet = wire::authenticate_request(self.id, self.user.as_bytes(), &self.password);
        fx.transmit(protocols::PAP, packet);
        fx.arm(TimerPurpose::PapRequest, self.config.timeout);
        self.transmits += 1;
        self.client = ClientState::AuthReq;
    }

    /// Handle a PAP packet. Malformed packets are dropped.
    pub fn input(&mut self, bytes: &[u8], ctx: &AuthContext<'_>, fx: &mut Effects) -> crate::Result<()> {
        match PapMessage::parse(bytes)? {
            PapMessage::Request { id, peer_id, password } => {
                self.receive_request(id, peer_id, password, ctx, fx)
            }
            PapMessage::Ack { id, message } => self.receive_ack(id, message, fx),
            PapMessage::Nak { id, message } => self.receive_nak(id, message, fx),
            PapMessage::Unknown { code, id } => warn!(code, id, "unknown PAP code received"),
        }
        Ok(())
    }

    fn receive_request(
        &mut self,
        id: u8,
        peer_id: &[u8],
        password: &[u8],
        ctx: &AuthContext<'_>,
        fx: &mut Effects,
    ) {
        match self.server {
            ServerState::Initial | ServerState::Closed | ServerState::Pending => {
                debug!(state = ?self.server, "PAP request ignored");
                return;
            }
            ServerState::Open | ServerState::BadAuth => {
                if let Some((code, message)) = &self.verdict {
                    fx.transmit(protocols::PAP, wire::authenticate_reply(*code, id, message));
                }
                return;
            }
            ServerState::Listen => {}
        }

        let user = String::from_utf8_lossy(peer_id).into_owned();
        let verdict = self.check_passwd(&user, password, ctx, fx);

        if self.config.request_timeout.is_some() {
            fx.cancel(TimerPurpose::PapListen);
        }

        match verdict {
            Some((addrs, options)) => {
                let message = "Login ok";
                fx.transmit(
                    protocols::PAP,
                    wire::authenticate_reply(codes::AUTHENTICATE_ACK, id, message),
                );
                self.verdict = Some((codes::AUTHENTICATE_ACK, message.to_string()));
                self.server = ServerState::Open;
                info!(%user, "PAP peer authentication succeeded");
                fx.auth(AuthOutcome::PeerSuccess {
                    protocol: protocols::PAP,
                    name: user,
                    addrs,
                    options,
                });
            }
            None => {
                let message = "Login incorrect";
                fx.transmit(
                    protocols::PAP,
                    wire::authenticate_reply(codes::AUTHENTICATE_NAK, id, message),
                );
                self.verdict = Some((codes::AUTHENTICATE_NAK, message.to_string()));
                self.server = ServerState::BadAuth;
                warn!(%user, attempts = self.attempts, "PAP peer authentication failed");
                fx.auth(AuthOutcome::PeerFailure { protocol: protocols::PAP });
            }
        }
    }

    /// Validate credentials. On success returns the entry's address words
    /// and extra options.
    fn check_passwd(
        &mut self,
        user: &str,
        password: &[u8],
        ctx: &AuthContext<'_>,
        fx: &mut Effects,
    ) -> Option<(Vec<String>, Vec<String>)> {
        let entry = ctx
            .secrets
            .lookup(SecretKind::Pap, Some(user), Some(self.our_name.as_str()));
        let accepted = match &entry {
            None => {
                warn!(%user, "no PAP secret found");
                false
            }
            Some(entry) if entry.is_login() => match ctx.login {
                Some(login) => login.check(user, password),
                None => {
                    warn!(%user, "@login secret but no system login configured");
                    false
                }
            },
            Some(entry) if entry.secret.is_empty() => true,
            Some(entry) => entry.secret.ct_eq(password).into(),
        };

        if accepted {
            self.attempts = 0;
            entry.map(|entry| (entry.addrs, entry.options))
        } else {
            self.attempts += 1;
            if self.attempts >= MAX_LOGIN_ATTEMPTS {
                warn!(attempts = self.attempts, %user, "login failures");
                fx.close_link("login failed", ExitStatus::PeerAuthFailed);
            }
            None
        }
    }

    fn receive_ack(&mut self, id: u8, message: &[u8], fx: &mut Effects) {
        if self.client != ClientState::AuthReq {
            debug!(id, state = ?self.client, "PAP ack ignored");
            return;
        }
        fx.cancel(TimerPurpose::PapRequest);
        self.client = ClientState::Open;
        self.password = Zeroizing::new(Vec::new());
        if !message.is_empty() {
            info!(message = %String::from_utf8_lossy(message), "PAP authentication succeeded");
        }
        fx.auth(AuthOutcome::WithPeerSuccess { protocol: protocols::PAP });
    }

    fn receive_nak(&mut self, id: u8, message: &[u8], fx: &mut Effects) {
        if self.client != ClientState::AuthReq {
            debug!(id, state = ?self.client, "PAP nak ignored");
            return;
        }
        fx.cancel(TimerPurpose::PapRequest);
        self.client = ClientState::BadAuth;
        self.password = Zeroizing::new(Vec::new());
        warn!(message = %String::from_utf8_lossy(message), "PAP authentication failed");
        fx.auth(AuthOutcome::WithPeerFailure { protocol: protocols::PAP });
    }
}

impl Default for Pap {
    fn default() -> Self {
        Self::new(PapConfig::default())
    }
}
