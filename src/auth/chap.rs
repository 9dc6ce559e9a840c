//! CHAP authenticator and peer roles
//!
//! The two roles are independent: we may challenge the peer, answer the
//! peer's challenges, or both. Each role has its own state and timer.

use super::digest::DigestRegistry;
use super::secrets::{SecretKind, SecretSource};
use super::AuthContext;
use crate::effects::{AuthOutcome, Effects};
use crate::protocol::chap::{self as wire, codes, ChapMessage};
use crate::protocol::ppp::protocols;
use crate::session::timer::TimerPurpose;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

pub const MIN_CHALLENGE_LENGTH: usize = 16;
pub const MAX_CHALLENGE_LENGTH: usize = 64;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_TRANSMITS: u32 = 10;

const SUCCESS_MESSAGE: &str = "Welcome to";
const FAILURE_MESSAGE: &str = "I don't like you.  Go 'way.";

/// Authenticator role state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Lower layer down, not asked to authenticate
    Initial,
    /// Lower layer up, not asked to authenticate
    Closed,
    /// Asked to authenticate, lower layer down
    Pending,
    /// First challenge sent
    InitialChal,
    /// Peer authenticated
    Open,
    /// Periodic challenge outstanding
    Rechallenge,
    /// Peer failed, terminal until the link restarts
    BadAuth,
}

/// Peer role state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Initial,
    Closed,
    Pending,
    /// Waiting for a challenge
    Listen,
    /// Response sent
    Response,
    /// Authenticated to the peer
    Open,
}

#[derive(Debug, Clone)]
pub struct ChapConfig {
    /// Retransmit interval for challenges and responses
    pub timeout: Duration,
    /// Challenge transmissions before the peer is failed
    pub max_transmits: u32,
    /// Re-challenge an authenticated peer this often
    pub rechallenge: Option<Duration>,
}

impl Default for ChapConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_transmits: DEFAULT_MAX_TRANSMITS,
            rechallenge: None,
        }
    }
}

#[derive(Debug)]
struct Server {
    state: ServerState,
    our_name: String,
    digest: u8,
    id: u8,
    challenge: Vec<u8>,
    transmits: u32,
}

#[derive(Debug)]
struct Client {
    state: ClientState,
    our_name: String,
    remote_name: Option<String>,
    explicit_remote: bool,
    digest: u8,
    /// Last response sent, retransmitted verbatim
    response: Vec<u8>,
    transmits: u32,
}

#[derive(Debug)]
pub struct Chap {
    config: ChapConfig,
    digests: DigestRegistry,
    server: Server,
    client: Client,
}

impl Chap {
    pub fn new(config: ChapConfig, digests: DigestRegistry) -> Self {
        Self {
            config,
            digests,
            server: Server {
                state: ServerState::Initial,
                our_name: String::new(),
                digest: wire::algorithms::MD5,
                id: rand::random(),
                challenge: Vec::new(),
                transmits: 0,
            },
            client: Client {
                state: ClientState::Initial,
                our_name: String::new(),
                remote_name: None,
                explicit_remote: false,
                digest: wire::algorithms::MD5,
                response: Vec::new(),
                transmits: 0,
            },
        }
    }

    pub fn server_state(&self) -> ServerState {
        self.server.state
    }

    pub fn client_state(&self) -> ClientState {
        self.client.state
    }

    pub fn digests(&self) -> &DigestRegistry {
        &self.digests
    }

    /// Identifier of the outstanding challenge
    pub fn challenge_id(&self) -> u8 {
        self.server.id
    }

    pub fn challenge(&self) -> &[u8] {
        &self.server.challenge
    }

    /// Times the current response has been sent
    pub fn response_transmits(&self) -> u32 {
        self.client.transmits
    }

    /// Start authenticating the peer as `our_name` using `digest`
    pub fn auth_peer(&mut self, our_name: &str, digest: u8, fx: &mut Effects) {
        self.server.our_name = our_name.to_string();
        self.server.digest = digest;
        match self.server.state {
            ServerState::Initial | ServerState::Pending => self.server.state = ServerState::Pending,
            _ => {
                self.new_challenge();
                self.send_challenge(fx);
                self.server.state = ServerState::InitialChal;
            }
        }
    }

    /// Start answering the peer's challenges as `our_name`.
    ///
    /// `remote_name` is used for secret lookups when the challenge carries
    /// no name, or always when `explicit_remote` is set.
    pub fn auth_with_peer(
        &mut self,
        our_name: &str,
        remote_name: Option<&str>,
        explicit_remote: bool,
        digest: u8,
    ) {
        self.client.our_name = our_name.to_string();
        self.client.remote_name = remote_name.map(str::to_string);
        self.client.explicit_remote = explicit_remote;
        self.client.digest = digest;
        self.client.state = match self.client.state {
            ClientState::Initial | ClientState::Pending => ClientState::Pending,
            _ => ClientState::Listen,
        };
    }

    pub fn lower_up(&mut self, fx: &mut Effects) {
        self.client.state = match self.client.state {
            ClientState::Initial => ClientState::Closed,
            ClientState::Pending => ClientState::Listen,
            state => state,
        };
        match self.server.state {
            ServerState::Initial => self.server.state = ServerState::Closed,
            ServerState::Pending => {
                self.new_challenge();
                self.send_challenge(fx);
                self.server.state = ServerState::InitialChal;
            }
            _ => {}
        }
    }

    pub fn lower_down(&mut self, fx: &mut Effects) {
        if matches!(
            self.server.state,
            ServerState::InitialChal | ServerState::Rechallenge
        ) {
            fx.cancel(TimerPurpose::ChapChallenge);
        }
        if self.server.state == ServerState::Open {
            fx.cancel(TimerPurpose::ChapRechallenge);
        }
        if self.client.state == ClientState::Response {
            fx.cancel(TimerPurpose::ChapResponse);
        }
        self.server.state = ServerState::Initial;
        self.server.challenge.clear();
        self.client.state = ClientState::Initial;
        self.client.response.clear();
    }

    /// Peer rejected CHAP: fail every active role
    pub fn protocol_reject(&mut self, fx: &mut Effects) {
        if !matches!(self.server.state, ServerState::Initial | ServerState::Closed) {
            fx.auth(AuthOutcome::PeerFailure { protocol: protocols::CHAP });
        }
        if !matches!(self.client.state, ClientState::Initial | ClientState::Closed) {
            fx.auth(AuthOutcome::WithPeerFailure { protocol: protocols::CHAP });
        }
        self.lower_down(fx);
    }

    pub fn timeout(&mut self, purpose: TimerPurpose, fx: &mut Effects) {
        match purpose {
            TimerPurpose::ChapChallenge => self.challenge_timeout(fx),
            TimerPurpose::ChapResponse => self.response_timeout(fx),
            TimerPurpose::ChapRechallenge => self.rechallenge(fx),
            other => debug!(?other, "CHAP ignoring foreign timer"),
        }
    }

    fn challenge_timeout(&mut self, fx: &mut Effects) {
        if !matches!(
            self.server.state,
            ServerState::InitialChal | ServerState::Rechallenge
        ) {
            return;
        }
        if self.server.transmits >= self.config.max_transmits {
            warn!(transmits = self.server.transmits, "peer failed to respond to CHAP challenge");
            self.server.state = ServerState::BadAuth;
            fx.auth(AuthOutcome::PeerFailure { protocol: protocols::CHAP });
            return;
        }
        self.send_challenge(fx);
    }

    fn response_timeout(&mut self, fx: &mut Effects) {
        if self.client.state != ClientState::Response {
            return;
        }
        self.send_response(fx);
    }

    fn rechallenge(&mut self, fx: &mut Effects) {
        if self.server.state != ServerState::Open {
            return;
        }
        self.new_challenge();
        self.send_challenge(fx);
        self.server.state = ServerState::Rechallenge;
    }

    fn new_challenge(&mut self) {
        let mut rng = rand::thread_rng();
        let len = rng.gen_range(MIN_CHALLENGE_LENGTH..=MAX_CHALLENGE_LENGTH);
        self.server.challenge = (0..len).map(|_| rng.gen()).collect();
        self.server.id = self.server.id.wrapping_add(1);
        self.server.transmits = 0;
    }

    fn send_challenge(&mut self, fx: &mut Effects) {
        let packet = wire::challenge(self.server.id, &self.server.challenge, &self.server.our_name);
        fx.transmit(protocols::CHAP, packet);
        fx.arm(TimerPurpose::ChapChallenge, self.config.timeout);
        self.server.transmits += 1;
        debug!(id = self.server.id, len = self.server.challenge.len(), "CHAP challenge sent");
    }

    fn send_response(&mut self, fx: &mut Effects) {
        fx.transmit(protocols::CHAP, self.client.response.clone());
        fx.arm(TimerPurpose::ChapResponse, self.config.timeout);
        self.client.transmits += 1;
    }

    fn send_status(&self, code: u8, fx: &mut Effects) {
        let message = if code == codes::SUCCESS {
            format!("{} {}.", SUCCESS_MESSAGE, self.server.our_name)
        } else {
            FAILURE_MESSAGE.to_string()
        };
        fx.transmit(protocols::CHAP, wire::status(code, self.server.id, &message));
    }

    /// Handle a CHAP packet. Malformed packets are dropped.
    pub fn input(&mut self, bytes: &[u8], ctx: &AuthContext<'_>, fx: &mut Effects) -> crate::Result<()> {
        match ChapMessage::parse(bytes)? {
            ChapMessage::Challenge { id, value, name } => {
                self.receive_challenge(id, value, name, ctx.secrets, fx)
            }
            ChapMessage::Response { id, value, name } => {
                self.receive_response(id, value, name, ctx.secrets, fx)
            }
            ChapMessage::Success { id, message } => self.receive_success(id, message, fx),
            ChapMessage::Failure { id, message } => self.receive_failure(id, message, fx),
            ChapMessage::Unknown { code, id } => {
                warn!(code, id, "unknown CHAP code received");
            }
        }
        Ok(())
    }

    fn receive_challenge(
        &mut self,
        id: u8,
        value: &[u8],
        name: &[u8],
        secrets: &dyn SecretSource,
        fx: &mut Effects,
    ) {
        if matches!(
            self.client.state,
            ClientState::Initial | ClientState::Closed | ClientState::Pending
        ) {
            debug!(state = ?self.client.state, "CHAP challenge ignored");
            return;
        }

        let mut remote = String::from_utf8_lossy(name).into_owned();
        if let Some(remote_name) = &self.client.remote_name {
            if self.client.explicit_remote || remote.is_empty() {
                remote = remote_name.clone();
            }
        }

        let secret = match secrets.lookup(
            SecretKind::Chap,
            Some(self.client.our_name.as_str()),
            Some(remote.as_str()),
        ) {
            Some(entry) => entry.secret,
            None => {
                warn!(%remote, "no CHAP secret found for authenticating us");
                Zeroizing::new(Vec::new())
            }
        };

        let Some(digest) = self.digests.get(self.client.digest) else {
            warn!(digest = self.client.digest, "CHAP digest not available");
            return;
        };

        if self.client.state == ClientState::Response {
            fx.cancel(TimerPurpose::ChapResponse);
        }

        let value = Zeroizing::new(digest.make_response(id, &secret, value));
        self.client.response = wire::response(id, &value, &self.client.our_name);
        self.client.transmits = 0;
        self.send_response(fx);
        self.client.state = ClientState::Response;
        debug!(id, %remote, "CHAP response sent");
    }

    fn receive_response(
        &mut self,
        id: u8,
        value: &[u8],
        name: &[u8],
        secrets: &dyn SecretSource,
        fx: &mut Effects,
    ) {
        if matches!(
            self.server.state,
            ServerState::Initial | ServerState::Closed | ServerState::Pending
        ) {
            debug!(state = ?self.server.state, "CHAP response ignored");
            return;
        }
        if id != self.server.id {
            debug!(id, expected = self.server.id, "stale CHAP response");
            return;
        }

        // Duplicate of a response we already judged
        match self.server.state {
            ServerState::Open => return self.send_status(codes::SUCCESS, fx),
            ServerState::BadAuth => return self.send_status(codes::FAILURE, fx),
            _ => {}
        }

        fx.cancel(TimerPurpose::ChapChallenge);

        let peer = String::from_utf8_lossy(name).into_owned();
        let entry = secrets.lookup(
            SecretKind::Chap,
            Some(peer.as_str()),
            Some(self.server.our_name.as_str()),
        );
        let verified = match (&entry, self.digests.get(self.server.digest)) {
            (None, _) => {
                warn!(%peer, "no CHAP secret found for authenticating peer");
                false
            }
            (Some(_), None) => {
                warn!(digest = self.server.digest, "CHAP digest not available");
                false
            }
            (Some(entry), Some(digest)) => {
                digest.verify_response(id, &entry.secret, &self.server.challenge, value)
            }
        };

        if verified {
            self.send_status(codes::SUCCESS, fx);
            let previous = self.server.state;
            self.server.state = ServerState::Open;
            if previous == ServerState::InitialChal {
                let (addrs, options) = entry
                    .map(|entry| (entry.addrs, entry.options))
                    .unwrap_or_default();
                fx.auth(AuthOutcome::PeerSuccess {
                    protocol: protocols::CHAP,
                    name: peer.clone(),
                    addrs,
                    options,
                });
            }
            if let Some(interval) = self.config.rechallenge {
                fx.arm(TimerPurpose::ChapRechallenge, interval);
            }
            info!(%peer, "CHAP peer authentication succeeded");
        } else {
            self.send_status(codes::FAILURE, fx);
            self.server.state = ServerState::BadAuth;
            fx.auth(AuthOutcome::PeerFailure { protocol: protocols::CHAP });
            warn!(%peer, "CHAP peer authentication failed");
        }
    }

    fn receive_success(&mut self, id: u8, message: &[u8], fx: &mut Effects) {
        if self.client.state != ClientState::Response {
            debug!(id, state = ?self.client.state, "CHAP success ignored");
            return;
        }
        fx.cancel(TimerPurpose::ChapResponse);
        self.client.state = ClientState::Open;
        self.client.response.clear();
        if !message.is_empty() {
            info!(message = %String::from_utf8_lossy(message), "CHAP success");
        }
        fx.auth(AuthOutcome::WithPeerSuccess { protocol: protocols::CHAP });
    }

    fn receive_failure(&mut self, id: u8, message: &[u8], fx: &mut Effects) {
        if self.client.state != ClientState::Response {
            debug!(id, state = ?self.client.state, "CHAP failure ignored");
            return;
        }
        fx.cancel(TimerPurpose::ChapResponse);
        self.client.response.clear();
        warn!(message = %String::from_utf8_lossy(message), "CHAP authentication failed");
        fx.auth(AuthOutcome::WithPeerFailure { protocol: protocols::CHAP });
    }
}

impl Default for Chap {
    fn default() -> Self {
        Self::new(ChapConfig::default(), DigestRegistry::default())
    }
}
