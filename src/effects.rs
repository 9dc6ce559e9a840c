//! Side effects requested by the protocol engines.
//!
//! The FSM, LCP, IPCP, CHAP and PAP never touch the link, timers or the
//! orchestrator directly. They push [`Effect`]s into an [`Effects`] queue
//! and the owning session executes them in order once the current event
//! has run to completion.

use crate::auth::Phase;
use crate::session::timer::TimerPurpose;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Final status of a link, stored on the session when it closes.
///
/// Numeric values follow the conventional PPP daemon exit codes so callers can
/// use them directly as process exit statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitStatus {
    Ok,
    Fatal,
    UserRequest,
    #[default]
    NegotiationFailed,
    PeerAuthFailed,
    IdleTimeout,
    ConnectTime,
    Callback,
    PeerDead,
    Hangup,
    Loopback,
    AuthToPeerFailed,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Ok => 0,
            ExitStatus::Fatal => 1,
            ExitStatus::UserRequest => 5,
            ExitStatus::NegotiationFailed => 10,
            ExitStatus::PeerAuthFailed => 11,
            ExitStatus::IdleTimeout => 12,
            ExitStatus::ConnectTime => 13,
            ExitStatus::Callback => 14,
            ExitStatus::PeerDead => 15,
            ExitStatus::Hangup => 16,
            ExitStatus::Loopback => 17,
            ExitStatus::AuthToPeerFailed => 19,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ExitStatus::Ok => "ok",
            ExitStatus::Fatal => "fatal error",
            ExitStatus::UserRequest => "user request",
            ExitStatus::NegotiationFailed => "negotiation failed",
            ExitStatus::PeerAuthFailed => "peer authentication failed",
            ExitStatus::IdleTimeout => "idle timeout",
            ExitStatus::ConnectTime => "connect time expired",
            ExitStatus::Callback => "callback",
            ExitStatus::PeerDead => "peer not responding",
            ExitStatus::Hangup => "hangup",
            ExitStatus::Loopback => "loopback detected",
            ExitStatus::AuthToPeerFailed => "authentication to peer failed",
        };
        write!(f, "{} ({})", text, self.code())
    }
}

/// Upcalls from an FSM to the layer above it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerEvent {
    /// This layer needs the lower layer brought up
    Starting,
    /// Negotiation finished, the protocol is open
    Up,
    /// The protocol left the opened state
    Down,
    /// This layer no longer needs the lower layer
    Finished,
}

/// Result of an authentication exchange, reported to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// We authenticated the peer
    PeerSuccess {
        protocol: u16,
        name: String,
        /// Address authorization words from the matching secrets entry
        addrs: Vec<String>,
        /// Words following `--` in the matching secrets entry
        options: Vec<String>,
    },
    /// The peer failed to authenticate to us
    PeerFailure { protocol: u16 },
    /// The peer accepted our credentials
    WithPeerSuccess { protocol: u16 },
    /// The peer rejected our credentials or stopped answering
    WithPeerFailure { protocol: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send a control packet
    Transmit { protocol: u16, packet: Vec<u8> },
    /// Arm (or re-arm) the timer for a purpose
    ArmTimer { purpose: TimerPurpose, delay: Duration },
    /// Cancel the timer for a purpose, if armed
    CancelTimer(TimerPurpose),
    /// FSM upcall
    Layer { protocol: u16, event: LayerEvent },
    /// An FSM ran out of Configure-Request retransmissions
    ConfigTimeout { protocol: u16 },
    /// Record the link status
    Status(ExitStatus),
    /// Close the link (LCP) with a reason
    CloseLink { reason: String },
    /// The peer sent Protocol-Reject for one of our protocols
    ProtocolRejected(u16),
    /// Authentication result
    Auth(AuthOutcome),
    /// The link entered a new phase
    Phase(Phase),
}

/// FIFO of pending effects
#[derive(Debug, Default)]
pub struct Effects {
    queue: VecDeque<Effect>,
}

impl Effects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, effect: Effect) {
        self.queue.push_back(effect);
    }

    pub fn transmit(&mut self, protocol: u16, packet: Vec<u8>) {
        self.push(Effect::Transmit { protocol, packet });
    }

    pub fn arm(&mut self, purpose: TimerPurpose, delay: Duration) {
        self.push(Effect::ArmTimer { purpose, delay });
    }

    pub fn cancel(&mut self, purpose: TimerPurpose) {
        self.push(Effect::CancelTimer(purpose));
    }

    pub fn layer(&mut self, protocol: u16, event: LayerEvent) {
        self.push(Effect::Layer { protocol, event });
    }

    pub fn auth(&mut self, outcome: AuthOutcome) {
        self.push(Effect::Auth(outcome));
    }

    /// Close the link and record why
    pub fn close_link(&mut self, reason: impl Into<String>, status: ExitStatus) {
        self.push(Effect::Status(status));
        self.push(Effect::CloseLink { reason: reason.into() });
    }

    pub fn pop(&mut self) -> Option<Effect> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Effect> {
        self.queue.iter()
    }

    /// Take every queued effect
    pub fn drain(&mut self) -> Vec<Effect> {
        self.queue.drain(..).collect()
    }

    /// Packets queued for transmission, in order
    pub fn transmitted(&self) -> Vec<(u16, &[u8])> {
        self.queue
            .iter()
            .filter_map(|effect| match effect {
                Effect::Transmit { protocol, packet } => Some((*protocol, packet.as_slice())),
                _ => None,
            })
            .collect()
    }
}
