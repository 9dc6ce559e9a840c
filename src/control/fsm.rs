//! Option negotiation automaton - RFC 1661 section 4
//!
//! One [`Fsm`] drives one control protocol. The protocol supplies its
//! option handling through [`ControlProtocol`]; the automaton owns the
//! state, identifiers, retransmission and nak-loop counters, and reports
//! everything it wants done through [`Effects`].

use super::ci::ReqResponse;
use crate::effects::{Effect, Effects, ExitStatus, LayerEvent};
use crate::protocol::lcp::DEFAULT_MRU;
use crate::protocol::packet::{
    codes, encode_cis, parse_cis, ControlBuilder, ControlPacket, HEADER_SIZE,
};
use crate::protocol::Ci;
use crate::session::timer::TimerPurpose;
use crate::Result;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default restart timer
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default Configure-Request budget
pub const DEFAULT_MAX_CONFIGURE: u32 = 10;

/// Default Terminate-Request budget
pub const DEFAULT_MAX_TERMINATE: u32 = 2;

/// Default number of Naks before disagreement turns into Reject
pub const DEFAULT_MAX_NAK_LOOPS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Down, not opened
    Initial,
    /// Down, opened
    Starting,
    /// Up, not opened
    Closed,
    /// Up, opened but not negotiating
    Stopped,
    /// Terminating, will end up closed
    Closing,
    /// Terminating, will end up stopped
    Stopping,
    /// Configure-Request sent
    ReqSent,
    /// Configure-Ack received
    AckRcvd,
    /// Configure-Ack sent
    AckSent,
    Opened,
}

impl State {
    /// Configure-Request exchange in progress
    pub fn is_negotiating(self) -> bool {
        matches!(self, State::ReqSent | State::AckRcvd | State::AckSent)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Initial => "initial",
            State::Starting => "starting",
            State::Closed => "closed",
            State::Stopped => "stopped",
            State::Closing => "closing",
            State::Stopping => "stopping",
            State::ReqSent => "req-sent",
            State::AckRcvd => "ack-rcvd",
            State::AckSent => "ack-sent",
            State::Opened => "opened",
        };
        f.write_str(name)
    }
}

/// Timing and behaviour knobs for one automaton
#[derive(Debug, Clone)]
pub struct FsmConfig {
    pub timeout: Duration,
    pub max_configure: u32,
    pub max_terminate: u32,
    pub max_nak_loops: u32,
    /// Wait for the peer's Configure-Request instead of giving up
    pub passive: bool,
    /// Never send the first Configure-Request
    pub silent: bool,
    /// Restart negotiation when opened again while stopped or opened
    pub restart: bool,
}

impl Default for FsmConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_configure: DEFAULT_MAX_CONFIGURE,
            max_terminate: DEFAULT_MAX_TERMINATE,
            max_nak_loops: DEFAULT_MAX_NAK_LOOPS,
            passive: false,
            silent: false,
            restart: false,
        }
    }
}

/// What to do after a Configure-Nak has been applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NakOutcome {
    /// Send a fresh Configure-Request
    Continue,
    /// Give up on the link
    Close { reason: String, status: ExitStatus },
}

/// Per-protocol option handling
pub trait ControlProtocol {
    /// PPP protocol number
    const PROTOCOL: u16;
    const NAME: &'static str;
    /// Timer slot used for retransmissions
    const TIMER: TimerPurpose;

    /// Reset negotiated state before a new negotiation round
    fn reset_ci(&mut self);

    /// CIs for our next Configure-Request
    fn add_ci(&mut self) -> Vec<Ci>;

    /// Validate a Configure-Ack against the request it acknowledges.
    ///
    /// The Ack must repeat our request byte for byte.
    fn ack_ci(&mut self, sent: &[u8], acked: &[u8]) -> bool {
        sent == acked
    }

    /// Apply a Configure-Nak. `None` means the Nak is bogus.
    fn nak_ci(
        &mut self,
        sent: &[Ci],
        naked: &[Ci],
        treat_as_reject: bool,
        opened: bool,
    ) -> Option<NakOutcome>;

    /// Apply a Configure-Reject. `false` means the Reject is bogus.
    fn rej_ci(&mut self, sent: &[Ci], rejected: &[Ci], opened: bool) -> bool;

    /// Judge the peer's Configure-Request
    fn req_ci(&mut self, cis: &[Ci], reject_if_disagree: bool) -> ReqResponse;

    /// Handle a code the automaton does not know. Returns false to have
    /// the packet Code-Rejected.
    fn ext_code(
        &mut self,
        _state: State,
        _code: u8,
        _id: u8,
        _data: &[u8],
        _fx: &mut Effects,
    ) -> bool {
        false
    }
}

#[derive(Debug)]
pub struct Fsm<P: ControlProtocol> {
    proto: P,
    config: FsmConfig,
    state: State,
    /// Last identifier used for an outgoing request
    id: u8,
    /// Identifier of our outstanding Configure-Request
    reqid: u8,
    /// A reply to the outstanding request has been processed
    seen_ack: bool,
    retransmits: u32,
    /// Naks we sent in a row
    nakloops: u32,
    /// Naks we received in a row
    rnakloops: u32,
    term_reason: Option<String>,
    last_request: Vec<Ci>,
    /// Outgoing packets are clipped to this
    peer_mru: u16,
}

impl<P: ControlProtocol> Fsm<P> {
    pub fn new(proto: P, config: FsmConfig) -> Self {
        Self {
            proto,
            config,
            state: State::Initial,
            id: 0,
            reqid: 0,
            seen_ack: false,
            retransmits: 0,
            nakloops: 0,
            rnakloops: 0,
            term_reason: None,
            last_request: Vec::new(),
            peer_mru: DEFAULT_MRU,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn proto(&self) -> &P {
        &self.proto
    }

    pub fn proto_mut(&mut self) -> &mut P {
        &mut self.proto
    }

    pub fn config(&self) -> &FsmConfig {
        &self.config
    }

    pub fn is_opened(&self) -> bool {
        self.state == State::Opened
    }

    /// Reason given for the last close, if any
    pub fn term_reason(&self) -> Option<&str> {
        self.term_reason.as_deref()
    }

    /// MRU the peer will accept, once LCP has negotiated it
    pub fn set_peer_mru(&mut self, mru: u16) {
        self.peer_mru = mru;
    }

    /// Next identifier for a protocol-specific request
    pub(crate) fn next_id(&mut self) -> u8 {
        self.id = self.id.wrapping_add(1);
        self.id
    }

    /// The lower layer is up
    pub fn lower_up(&mut self, fx: &mut Effects) {
        match self.state {
            State::Initial => self.state = State::Closed,
            State::Starting => {
                if self.config.silent {
                    self.state = State::Stopped;
                } else {
                    self.send_configure_request(false, fx);
                    self.state = State::ReqSent;
                }
            }
            state => debug!(protocol = P::NAME, %state, "up event in unexpected state"),
        }
    }

    /// The lower layer went down
    pub fn lower_down(&mut self, fx: &mut Effects) {
        match self.state {
            State::Closed => self.state = State::Initial,
            State::Stopped => {
                self.state = State::Starting;
                fx.layer(P::PROTOCOL, LayerEvent::Starting);
            }
            State::Closing => {
                self.state = State::Initial;
                fx.cancel(P::TIMER);
            }
            State::Stopping | State::ReqSent | State::AckRcvd | State::AckSent => {
                self.state = State::Starting;
                fx.cancel(P::TIMER);
            }
            State::Opened => {
                fx.layer(P::PROTOCOL, LayerEvent::Down);
                self.state = State::Starting;
            }
            state => debug!(protocol = P::NAME, %state, "down event in unexpected state"),
        }
    }

    /// Administrative open
    pub fn open(&mut self, fx: &mut Effects) {
        match self.state {
            State::Initial => {
                self.state = State::Starting;
                fx.layer(P::PROTOCOL, LayerEvent::Starting);
            }
            State::Closed => {
                if self.config.silent {
                    self.state = State::Stopped;
                } else {
                    self.send_configure_request(false, fx);
                    self.state = State::ReqSent;
                }
            }
            State::Closing => {
                self.state = State::Stopping;
                self.restart_if_configured(fx);
            }
            State::Stopped | State::Opened => self.restart_if_configured(fx),
            _ => {}
        }
    }

    fn restart_if_configured(&mut self, fx: &mut Effects) {
        if self.config.restart {
            self.lower_down(fx);
            self.lower_up(fx);
        }
    }

    /// Administrative close.
    ///
    /// A close that arrives while already closing keeps the reason
    /// carried by the Terminate-Requests in flight.
    pub fn close(&mut self, reason: impl Into<String>, fx: &mut Effects) {
        if self.state != State::Closing || self.term_reason.is_none() {
            self.term_reason = Some(reason.into());
        }
        match self.state {
            State::Starting => self.state = State::Initial,
            State::Stopped => self.state = State::Closed,
            State::Stopping => self.state = State::Closing,
            State::ReqSent | State::AckRcvd | State::AckSent | State::Opened => {
                self.terminate_layer(State::Closing, fx)
            }
            _ => {}
        }
    }

    fn terminate_layer(&mut self, next: State, fx: &mut Effects) {
        if self.state != State::Opened {
            fx.cancel(P::TIMER);
        } else {
            fx.layer(P::PROTOCOL, LayerEvent::Down);
        }

        self.retransmits = self.config.max_terminate;
        self.send_terminate_request(fx);

        if self.retransmits == 0 {
            self.state = if next == State::Closing {
                State::Closed
            } else {
                State::Stopped
            };
            fx.layer(P::PROTOCOL, LayerEvent::Finished);
            return;
        }

        fx.arm(P::TIMER, self.config.timeout);
        self.retransmits -= 1;
        self.state = next;
    }

    /// The retransmission timer expired
    pub fn timeout(&mut self, fx: &mut Effects) {
        match self.state {
            State::Closing | State::Stopping => {
                if self.retransmits == 0 {
                    self.state = if self.state == State::Closing {
                        State::Closed
                    } else {
                        State::Stopped
                    };
                    fx.layer(P::PROTOCOL, LayerEvent::Finished);
                } else {
                    self.send_terminate_request(fx);
                    fx.arm(P::TIMER, self.config.timeout);
                    self.retransmits -= 1;
                }
            }
            State::ReqSent | State::AckRcvd | State::AckSent => {
                if self.retransmits == 0 {
                    warn!(protocol = P::NAME, "timeout sending Config-Requests");
                    self.term_reason = Some("timeout sending Config-Requests".into());
                    self.state = State::Stopped;
                    fx.push(Effect::ConfigTimeout { protocol: P::PROTOCOL });
                    if !self.config.passive {
                        fx.layer(P::PROTOCOL, LayerEvent::Finished);
                    }
                } else {
                    self.send_configure_request(true, fx);
                    if self.state == State::AckRcvd {
                        self.state = State::ReqSent;
                    }
                }
            }
            state => debug!(protocol = P::NAME, %state, "timeout in unexpected state"),
        }
    }

    /// The peer rejected this protocol
    pub fn protocol_reject(&mut self, fx: &mut Effects) {
        match self.state {
            State::Closing | State::Closed => {
                if self.state == State::Closing {
                    fx.cancel(P::TIMER);
                }
                self.state = State::Closed;
                fx.layer(P::PROTOCOL, LayerEvent::Finished);
            }
            State::Stopping | State::ReqSent | State::AckRcvd | State::AckSent | State::Stopped => {
                if self.state != State::Stopped {
                    fx.cancel(P::TIMER);
                }
                self.state = State::Stopped;
                fx.layer(P::PROTOCOL, LayerEvent::Finished);
            }
            State::Opened => self.terminate_layer(State::Stopping, fx),
            state => debug!(protocol = P::NAME, %state, "protocol-reject in unexpected state"),
        }
    }

    /// Process a received packet.
    ///
    /// Malformed packets are returned as errors and leave the automaton
    /// untouched.
    pub fn input(&mut self, bytes: &[u8], fx: &mut Effects) -> Result<()> {
        let packet = ControlPacket::parse(bytes)?;
        let code = packet.code();
        let id = packet.identifier();
        let data = packet.data();

        if matches!(self.state, State::Initial | State::Starting) {
            debug!(protocol = P::NAME, code, state = %self.state, "packet received before lower layer is up");
            return Ok(());
        }

        match code {
            codes::CONFIGURE_REQUEST => self.recv_configure_request(id, data, fx)?,
            codes::CONFIGURE_ACK => self.recv_configure_ack(id, data, fx),
            codes::CONFIGURE_NAK | codes::CONFIGURE_REJECT => {
                self.recv_nak_or_reject(code, id, data, fx)?
            }
            codes::TERMINATE_REQUEST => self.recv_terminate_request(id, data, fx),
            codes::TERMINATE_ACK => self.recv_terminate_ack(fx),
            codes::CODE_REJECT => self.recv_code_reject(data),
            _ => {
                if !self.proto.ext_code(self.state, code, id, data, fx) {
                    let id = self.next_id();
                    self.send(codes::CODE_REJECT, id, packet.as_bytes(), fx);
                }
            }
        }
        Ok(())
    }

    fn recv_configure_request(&mut self, id: u8, data: &[u8], fx: &mut Effects) -> Result<()> {
        let cis = parse_cis(data)?;

        match self.state {
            State::Closed => {
                self.send(codes::TERMINATE_ACK, id, &[], fx);
                return Ok(());
            }
            State::Closing | State::Stopping => return Ok(()),
            State::Opened => {
                fx.layer(P::PROTOCOL, LayerEvent::Down);
                self.send_configure_request(false, fx);
                self.state = State::ReqSent;
            }
            State::Stopped => {
                self.send_configure_request(false, fx);
                self.state = State::ReqSent;
            }
            _ => {}
        }

        let reject_if_disagree = self.nakloops >= self.config.max_nak_loops;
        let reply = self.proto.req_ci(&cis, reject_if_disagree);
        debug!(
            protocol = P::NAME,
            id,
            reply = crate::protocol::packet::code_name(reply.code),
            cis = reply.cis.len(),
            "answering Configure-Request"
        );
        self.send(reply.code, id, &encode_cis(&reply.cis), fx);

        if reply.code == codes::CONFIGURE_ACK {
            if self.state == State::AckRcvd {
                fx.cancel(P::TIMER);
                self.state = State::Opened;
                fx.layer(P::PROTOCOL, LayerEvent::Up);
            } else {
                self.state = State::AckSent;
            }
            self.nakloops = 0;
        } else {
            if self.state != State::AckRcvd {
                self.state = State::ReqSent;
            }
            if reply.code == codes::CONFIGURE_NAK {
                self.nakloops += 1;
            }
        }
        Ok(())
    }

    fn recv_configure_ack(&mut self, id: u8, data: &[u8], fx: &mut Effects) {
        if id != self.reqid || self.seen_ack {
            debug!(protocol = P::NAME, id, expected = self.reqid, "unexpected Configure-Ack");
            return;
        }
        let sent = encode_cis(&self.last_request);
        if !self.proto.ack_ci(&sent, data) {
            warn!(protocol = P::NAME, id, "received bad Configure-Ack");
            return;
        }
        self.seen_ack = true;
        self.rnakloops = 0;

        match self.state {
            State::Closed | State::Stopped => self.send(codes::TERMINATE_ACK, id, &[], fx),
            State::ReqSent => {
                self.state = State::AckRcvd;
                self.retransmits = self.config.max_configure;
            }
            State::AckRcvd => {
                // An extra valid Ack: start over
                fx.cancel(P::TIMER);
                self.send_configure_request(false, fx);
                self.state = State::ReqSent;
            }
            State::AckSent => {
                fx.cancel(P::TIMER);
                self.state = State::Opened;
                self.retransmits = self.config.max_configure;
                fx.layer(P::PROTOCOL, LayerEvent::Up);
            }
            State::Opened => {
                fx.layer(P::PROTOCOL, LayerEvent::Down);
                self.send_configure_request(false, fx);
                self.state = State::ReqSent;
            }
            _ => {}
        }
    }

    fn recv_nak_or_reject(&mut self, code: u8, id: u8, data: &[u8], fx: &mut Effects) -> Result<()> {
        if id != self.reqid || self.seen_ack {
            debug!(protocol = P::NAME, id, expected = self.reqid, "unexpected Configure-Nak/Reject");
            return Ok(());
        }
        let cis = parse_cis(data)?;
        let opened = self.state == State::Opened;

        let outcome = if code == codes::CONFIGURE_NAK {
            self.rnakloops += 1;
            let treat_as_reject = self.rnakloops >= self.config.max_nak_loops;
            match self.proto.nak_ci(&self.last_request, &cis, treat_as_reject, opened) {
                Some(outcome) => outcome,
                None => {
                    warn!(protocol = P::NAME, id, "received bad Configure-Nak");
                    return Ok(());
                }
            }
        } else {
            self.rnakloops = 0;
            if !self.proto.rej_ci(&self.last_request, &cis, opened) {
                warn!(protocol = P::NAME, id, "received bad Configure-Reject");
                return Ok(());
            }
            NakOutcome::Continue
        };

        self.seen_ack = true;

        if let NakOutcome::Close { reason, status } = outcome {
            fx.push(Effect::Status(status));
            self.close(reason, fx);
            return Ok(());
        }

        match self.state {
            State::Closed | State::Stopped => self.send(codes::TERMINATE_ACK, id, &[], fx),
            State::ReqSent | State::AckSent => {
                fx.cancel(P::TIMER);
                self.send_configure_request(false, fx);
            }
            State::AckRcvd => {
                fx.cancel(P::TIMER);
                self.send_configure_request(false, fx);
                self.state = State::ReqSent;
            }
            State::Opened => {
                fx.layer(P::PROTOCOL, LayerEvent::Down);
                self.send_configure_request(false, fx);
                self.state = State::ReqSent;
            }
            _ => {}
        }
        Ok(())
    }

    fn recv_terminate_request(&mut self, id: u8, data: &[u8], fx: &mut Effects) {
        match self.state {
            State::AckRcvd | State::AckSent => self.state = State::ReqSent,
            State::Opened => {
                if data.is_empty() {
                    info!(protocol = P::NAME, "terminated by peer");
                } else {
                    info!(
                        protocol = P::NAME,
                        reason = %String::from_utf8_lossy(data),
                        "terminated by peer"
                    );
                }
                fx.layer(P::PROTOCOL, LayerEvent::Down);
                self.retransmits = 0;
                self.state = State::Stopping;
                fx.arm(P::TIMER, self.config.timeout);
            }
            _ => {}
        }
        self.send(codes::TERMINATE_ACK, id, &[], fx);
    }

    fn recv_terminate_ack(&mut self, fx: &mut Effects) {
        match self.state {
            State::Closing => {
                fx.cancel(P::TIMER);
                self.state = State::Closed;
                fx.layer(P::PROTOCOL, LayerEvent::Finished);
            }
            State::Stopping => {
                fx.cancel(P::TIMER);
                self.state = State::Stopped;
                fx.layer(P::PROTOCOL, LayerEvent::Finished);
            }
            State::AckRcvd => self.state = State::ReqSent,
            State::Opened => {
                fx.layer(P::PROTOCOL, LayerEvent::Down);
                self.send_configure_request(false, fx);
                self.state = State::ReqSent;
            }
            _ => {}
        }
    }

    fn recv_code_reject(&mut self, data: &[u8]) {
        if data.len() < 2 {
            debug!(protocol = P::NAME, "short Code-Reject");
            return;
        }
        warn!(
            protocol = P::NAME,
            code = data[0],
            id = data[1],
            "peer sent Code-Reject"
        );
        if self.state == State::AckRcvd {
            self.state = State::ReqSent;
        }
    }

    fn send_configure_request(&mut self, retransmit: bool, fx: &mut Effects) {
        if !self.state.is_negotiating() {
            // Not currently negotiating: start a fresh round
            self.proto.reset_ci();
            self.nakloops = 0;
            self.rnakloops = 0;
        }

        if !retransmit {
            self.retransmits = self.config.max_configure;
            self.reqid = self.next_id();
        }

        self.seen_ack = false;
        self.last_request = self.proto.add_ci();
        let data = encode_cis(&self.last_request);
        self.send(codes::CONFIGURE_REQUEST, self.reqid, &data, fx);

        self.retransmits = self.retransmits.saturating_sub(1);
        fx.arm(P::TIMER, self.config.timeout);
    }

    fn send_terminate_request(&mut self, fx: &mut Effects) {
        self.reqid = self.next_id();
        let reason = self.term_reason.clone().unwrap_or_default();
        self.send(codes::TERMINATE_REQUEST, self.reqid, reason.as_bytes(), fx);
    }

    /// Send a packet of this protocol
    pub(crate) fn send(&self, code: u8, id: u8, data: &[u8], fx: &mut Effects) {
        let limit = usize::from(self.peer_mru).saturating_sub(HEADER_SIZE);
        let data = &data[..data.len().min(limit)];
        let packet = ControlBuilder::new(code, id).raw_data(data).build();
        fx.transmit(P::PROTOCOL, packet);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::control::ci::{match_naked, match_rejected, ReqBuilder};
    use crate::protocol::packet::MAX_DATA_LEN;

    /// Minimal protocol negotiating a single MRU-like short option
    #[derive(Debug, Default)]
    pub(crate) struct Toy {
        pub want: u16,
        pub send_option: bool,
        pub peer_min: u16,
        pub resets: u32,
    }

    impl ControlProtocol for Toy {
        const PROTOCOL: u16 = 0x8099;
        const NAME: &'static str = "TOY";
        const TIMER: TimerPurpose = TimerPurpose::Ipcp;

        fn reset_ci(&mut self) {
            self.resets += 1;
        }

        fn add_ci(&mut self) -> Vec<Ci> {
            if self.send_option {
                vec![Ci::short(1, self.want)]
            } else {
                Vec::new()
            }
        }

        fn nak_ci(
            &mut self,
            sent: &[Ci],
            naked: &[Ci],
            treat_as_reject: bool,
            _opened: bool,
        ) -> Option<NakOutcome> {
            let (answers, _) = match_naked(sent, naked)?;
            for ci in answers {
                if treat_as_reject {
                    self.send_option = false;
                } else {
                    self.want = ci.as_short()?;
                }
            }
            Some(NakOutcome::Continue)
        }

        fn rej_ci(&mut self, sent: &[Ci], rejected: &[Ci], _opened: bool) -> bool {
            match match_rejected(sent, rejected) {
                Some(kinds) => {
                    if kinds.contains(&1) {
                        self.send_option = false;
                    }
                    true
                }
                None => false,
            }
        }

        fn req_ci(&mut self, cis: &[Ci], reject_if_disagree: bool) -> ReqResponse {
            let mut reply = ReqBuilder::new(reject_if_disagree);
            for ci in cis {
                match (ci.kind, ci.as_short()) {
                    (1, Some(value)) if value >= self.peer_min => reply.ack(ci),
                    (1, Some(_)) => reply.nak(ci, Ci::short(1, self.peer_min)),
                    _ => reply.reject(ci),
                }
            }
            reply.finish()
        }
    }

    fn toy() -> Fsm<Toy> {
        Fsm::new(
            Toy {
                want: 1000,
                send_option: true,
                peer_min: 500,
                resets: 0,
            },
            FsmConfig::default(),
        )
    }

    fn packet(code: u8, id: u8, cis: &[Ci]) -> Vec<u8> {
        ControlBuilder::new(code, id).cis(cis).build()
    }

    fn last_sent(fx: &Effects) -> ControlPacket<'_> {
        let sent = fx.transmitted();
        let (_, bytes) = sent.last().copied().unwrap();
        ControlPacket::parse(bytes).unwrap()
    }

    fn layer_events(fx: &mut Effects) -> Vec<LayerEvent> {
        fx.drain()
            .into_iter()
            .filter_map(|effect| match effect {
                Effect::Layer { event, .. } => Some(event),
                _ => None,
            })
            .collect()
    }

    fn opened_toy() -> Fsm<Toy> {
        let mut fsm = toy();
        let mut fx = Effects::new();
        fsm.open(&mut fx);
        fsm.lower_up(&mut fx);
        let reqid = last_sent(&fx).identifier();
        fsm.input(&packet(codes::CONFIGURE_ACK, reqid, &[Ci::short(1, 1000)]), &mut fx)
            .unwrap();
        fsm.input(&packet(codes::CONFIGURE_REQUEST, 1, &[]), &mut fx)
            .unwrap();
        assert_eq!(fsm.state(), State::Opened);
        fsm
    }

    #[test]
    fn test_open_then_up_sends_request() {
        let mut fsm = toy();
        let mut fx = Effects::new();

        fsm.open(&mut fx);
        assert_eq!(fsm.state(), State::Starting);
        fsm.lower_up(&mut fx);
        assert_eq!(fsm.state(), State::ReqSent);

        let request = last_sent(&fx);
        assert_eq!(request.code(), codes::CONFIGURE_REQUEST);
        assert_eq!(request.data(), &[0x01, 0x04, 0x03, 0xe8]);
        assert!(fx.iter().any(|e| matches!(
            e,
            Effect::ArmTimer { purpose: TimerPurpose::Ipcp, .. }
        )));
        assert_eq!(layer_events(&mut fx), vec![LayerEvent::Starting]);
        assert_eq!(fsm.proto().resets, 1);
    }

    #[test]
    fn test_up_while_initial_goes_closed() {
        let mut fsm = toy();
        let mut fx = Effects::new();
        fsm.lower_up(&mut fx);
        assert_eq!(fsm.state(), State::Closed);
        assert!(fx.is_empty());

        // Packets in Closed are answered with Terminate-Ack
        fsm.input(&packet(codes::CONFIGURE_REQUEST, 4, &[]), &mut fx)
            .unwrap();
        let reply = last_sent(&fx);
        assert_eq!(reply.code(), codes::TERMINATE_ACK);
        assert_eq!(reply.identifier(), 4);
    }

    #[test]
    fn test_silent_waits_for_peer() {
        let mut fsm = toy();
        fsm.config.silent = true;
        let mut fx = Effects::new();
        fsm.open(&mut fx);
        fsm.lower_up(&mut fx);
        assert_eq!(fsm.state(), State::Stopped);
        assert!(fx.transmitted().is_empty());

        fsm.input(&packet(codes::CONFIGURE_REQUEST, 1, &[Ci::short(1, 600)]), &mut fx)
            .unwrap();
        // Our request followed by the Ack
        let sent = fx.transmitted();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1[0], codes::CONFIGURE_REQUEST);
        assert_eq!(sent[1].1[0], codes::CONFIGURE_ACK);
        assert_eq!(fsm.state(), State::AckSent);
    }

    #[test]
    fn test_full_negotiation_reaches_opened() {
        let mut fsm = toy();
        let mut fx = Effects::new();
        fsm.open(&mut fx);
        fsm.lower_up(&mut fx);
        let reqid = last_sent(&fx).identifier();

        fsm.input(&packet(codes::CONFIGURE_REQUEST, 7, &[Ci::short(1, 600)]), &mut fx)
            .unwrap();
        assert_eq!(fsm.state(), State::AckSent);

        fsm.input(&packet(codes::CONFIGURE_ACK, reqid, &[Ci::short(1, 1000)]), &mut fx)
            .unwrap();
        assert_eq!(fsm.state(), State::Opened);
        assert!(fx.iter().any(|e| *e == Effect::CancelTimer(TimerPurpose::Ipcp)));
        assert!(layer_events(&mut fx).contains(&LayerEvent::Up));
    }

    #[test]
    fn test_ack_must_match_request_bytes() {
        let mut fsm = toy();
        let mut fx = Effects::new();
        fsm.open(&mut fx);
        fsm.lower_up(&mut fx);
        let reqid = last_sent(&fx).identifier();

        // Value differs from what we sent
        fsm.input(&packet(codes::CONFIGURE_ACK, reqid, &[Ci::short(1, 999)]), &mut fx)
            .unwrap();
        assert_eq!(fsm.state(), State::ReqSent);

        // Wrong identifier
        fsm.input(
            &packet(codes::CONFIGURE_ACK, reqid.wrapping_add(1), &[Ci::short(1, 1000)]),
            &mut fx,
        )
        .unwrap();
        assert_eq!(fsm.state(), State::ReqSent);

        fsm.input(&packet(codes::CONFIGURE_ACK, reqid, &[Ci::short(1, 1000)]), &mut fx)
            .unwrap();
        assert_eq!(fsm.state(), State::AckRcvd);
    }

    #[test]
    fn test_nak_resends_with_new_value() {
        let mut fsm = toy();
        let mut fx = Effects::new();
        fsm.open(&mut fx);
        fsm.lower_up(&mut fx);
        let reqid = last_sent(&fx).identifier();
        fx.drain();

        fsm.input(&packet(codes::CONFIGURE_NAK, reqid, &[Ci::short(1, 800)]), &mut fx)
            .unwrap();
        let request = last_sent(&fx);
        assert_eq!(request.code(), codes::CONFIGURE_REQUEST);
        assert_ne!(request.identifier(), reqid);
        assert_eq!(request.data(), &[0x01, 0x04, 0x03, 0x20]);
        // Still the same negotiation round
        assert_eq!(fsm.proto().resets, 1);
    }

    #[test]
    fn test_received_naks_become_reject_after_limit() {
        let mut fsm = toy();
        let mut fx = Effects::new();
        fsm.open(&mut fx);
        fsm.lower_up(&mut fx);

        for _ in 0..DEFAULT_MAX_NAK_LOOPS {
            let reqid = last_sent(&fx).identifier();
            let want = fsm.proto().want;
            fsm.input(&packet(codes::CONFIGURE_NAK, reqid, &[Ci::short(1, want + 1)]), &mut fx)
                .unwrap();
        }
        // The last Nak was treated as a Reject: the option is gone
        assert!(!fsm.proto().send_option);
        assert!(last_sent(&fx).data().is_empty());
    }

    #[test]
    fn test_nak_loop_escalates_to_reject() {
        let mut fsm = toy();
        let mut fx = Effects::new();
        fsm.open(&mut fx);
        fsm.lower_up(&mut fx);

        let mut codes_sent = Vec::new();
        for id in 0..(DEFAULT_MAX_NAK_LOOPS as u8 + 2) {
            fsm.input(&packet(codes::CONFIGURE_REQUEST, id, &[Ci::short(1, 100)]), &mut fx)
                .unwrap();
            codes_sent.push(last_sent(&fx).code());
        }

        let naks = codes_sent.iter().filter(|c| **c == codes::CONFIGURE_NAK).count();
        assert_eq!(naks, DEFAULT_MAX_NAK_LOOPS as usize);
        assert_eq!(codes_sent[DEFAULT_MAX_NAK_LOOPS as usize], codes::CONFIGURE_REJECT);
        assert_eq!(codes_sent.last(), Some(&codes::CONFIGURE_REJECT));
    }

    #[test]
    fn test_bogus_reject_ignored() {
        let mut fsm = toy();
        let mut fx = Effects::new();
        fsm.open(&mut fx);
        fsm.lower_up(&mut fx);
        let reqid = last_sent(&fx).identifier();
        fx.drain();

        fsm.input(&packet(codes::CONFIGURE_REJECT, reqid, &[Ci::short(1, 5)]), &mut fx)
            .unwrap();
        assert!(fx.transmitted().is_empty());
        assert!(fsm.proto().send_option);

        fsm.input(&packet(codes::CONFIGURE_REJECT, reqid, &[Ci::short(1, 1000)]), &mut fx)
            .unwrap();
        assert!(!fsm.proto().send_option);
        assert!(last_sent(&fx).data().is_empty());
    }

    #[test]
    fn test_retransmit_budget_exhaustion() {
        let mut fsm = toy();
        let mut fx = Effects::new();
        fsm.open(&mut fx);
        fsm.lower_up(&mut fx);

        for _ in 1..DEFAULT_MAX_CONFIGURE {
            fsm.timeout(&mut fx);
            assert_eq!(fsm.state(), State::ReqSent);
        }
        let requests = fx
            .transmitted()
            .iter()
            .filter(|(_, p)| p[0] == codes::CONFIGURE_REQUEST)
            .count();
        assert_eq!(requests, DEFAULT_MAX_CONFIGURE as usize);

        fx.drain();
        fsm.timeout(&mut fx);
        assert_eq!(fsm.state(), State::Stopped);
        assert_eq!(fsm.term_reason(), Some("timeout sending Config-Requests"));
        let effects = fx.drain();
        assert!(effects.contains(&Effect::ConfigTimeout { protocol: Toy::PROTOCOL }));
        assert!(effects.contains(&Effect::Layer {
            protocol: Toy::PROTOCOL,
            event: LayerEvent::Finished
        }));
    }

    #[test]
    fn test_close_from_opened_terminates() {
        let mut fsm = opened_toy();
        let mut fx = Effects::new();

        fsm.close("admin", &mut fx);
        assert_eq!(fsm.state(), State::Closing);
        let request = last_sent(&fx);
        assert_eq!(request.code(), codes::TERMINATE_REQUEST);
        assert_eq!(request.data(), b"admin");
        assert_eq!(layer_events(&mut fx), vec![LayerEvent::Down]);

        // One retransmission, then give up
        fsm.timeout(&mut fx);
        assert_eq!(fsm.state(), State::Closing);
        fsm.timeout(&mut fx);
        assert_eq!(fsm.state(), State::Closed);
        assert!(layer_events(&mut fx).contains(&LayerEvent::Finished));
    }

    #[test]
    fn test_second_close_keeps_first_reason() {
        let mut fsm = opened_toy();
        let mut fx = Effects::new();

        fsm.close("login failed", &mut fx);
        fsm.close("Authentication failed", &mut fx);
        assert_eq!(fsm.state(), State::Closing);
        assert_eq!(fsm.term_reason(), Some("login failed"));

        fx.drain();
        fsm.timeout(&mut fx);
        assert_eq!(last_sent(&fx).data(), b"login failed");
    }

    #[test]
    fn test_terminate_ack_completes_close() {
        let mut fsm = opened_toy();
        let mut fx = Effects::new();
        fsm.close("bye", &mut fx);
        let id = last_sent(&fx).identifier();
        fx.drain();

        fsm.input(&packet(codes::TERMINATE_ACK, id, &[]), &mut fx)
            .unwrap();
        assert_eq!(fsm.state(), State::Closed);
        let effects = fx.drain();
        assert!(effects.contains(&Effect::CancelTimer(TimerPurpose::Ipcp)));
        assert!(effects.contains(&Effect::Layer {
            protocol: Toy::PROTOCOL,
            event: LayerEvent::Finished
        }));
    }

    #[test]
    fn test_peer_terminate_request() {
        let mut fsm = opened_toy();
        let mut fx = Effects::new();

        fsm.input(
            &ControlBuilder::new(codes::TERMINATE_REQUEST, 9)
                .raw_data(b"going away")
                .build(),
            &mut fx,
        )
        .unwrap();
        assert_eq!(fsm.state(), State::Stopping);
        let reply = last_sent(&fx);
        assert_eq!(reply.code(), codes::TERMINATE_ACK);
        assert_eq!(reply.identifier(), 9);

        fx.drain();
        fsm.timeout(&mut fx);
        assert_eq!(fsm.state(), State::Stopped);
        assert!(layer_events(&mut fx).contains(&LayerEvent::Finished));
    }

    #[test]
    fn test_unknown_code_rejected() {
        let mut fsm = opened_toy();
        let mut fx = Effects::new();
        let odd = ControlBuilder::new(42, 3).raw_data(&[1, 2]).build();

        fsm.input(&odd, &mut fx).unwrap();
        let reply = last_sent(&fx);
        assert_eq!(reply.code(), codes::CODE_REJECT);
        assert_eq!(reply.data(), odd.as_slice());
    }

    #[test]
    fn test_oversized_code_reject_clipped() {
        let mut fsm = toy();
        let mut fx = Effects::new();
        fsm.open(&mut fx);
        fsm.lower_up(&mut fx);
        fx.drain();

        let odd = ControlBuilder::new(0x42, 3)
            .raw_data(&vec![0x55; MAX_DATA_LEN])
            .build();
        assert_eq!(odd.len(), u16::MAX as usize);
        fsm.input(&odd, &mut fx).unwrap();

        let (_, bytes) = fx.transmitted()[0];
        assert_eq!(bytes.len(), usize::from(DEFAULT_MRU));
        let reply = ControlPacket::parse(bytes).unwrap();
        assert_eq!(reply.code(), codes::CODE_REJECT);
        assert_eq!(reply.length(), DEFAULT_MRU);
        assert_eq!(reply.data(), &odd[..usize::from(DEFAULT_MRU) - HEADER_SIZE]);

        fx.drain();
        fsm.set_peer_mru(296);
        fsm.input(&odd, &mut fx).unwrap();
        let (_, bytes) = fx.transmitted()[0];
        assert_eq!(bytes.len(), 296);
    }

    #[test]
    fn test_malformed_dropped() {
        let mut fsm = opened_toy();
        let mut fx = Effects::new();
        assert!(fsm.input(&[0x01, 0x02, 0x00], &mut fx).is_err());
        assert!(fsm.input(&[0x01, 0x02, 0x00, 0x09, 0x01], &mut fx).is_err());
        // CI length runs past the packet
        assert!(fsm
            .input(&[0x01, 0x02, 0x00, 0x07, 0x01, 0x04, 0x00], &mut fx)
            .is_err());
        assert!(fx.is_empty());
        assert_eq!(fsm.state(), State::Opened);
    }

    #[test]
    fn test_lower_down_from_opened() {
        let mut fsm = opened_toy();
        let mut fx = Effects::new();
        fsm.lower_down(&mut fx);
        assert_eq!(fsm.state(), State::Starting);
        assert_eq!(layer_events(&mut fx), vec![LayerEvent::Down]);
    }

    #[test]
    fn test_protocol_reject_when_opened() {
        let mut fsm = opened_toy();
        let mut fx = Effects::new();
        fsm.protocol_reject(&mut fx);
        assert_eq!(fsm.state(), State::Stopping);
        assert_eq!(last_sent(&fx).code(), codes::TERMINATE_REQUEST);
    }

    #[test]
    fn test_code_reject_moves_ackrcvd_back() {
        let mut fsm = toy();
        let mut fx = Effects::new();
        fsm.open(&mut fx);
        fsm.lower_up(&mut fx);
        let reqid = last_sent(&fx).identifier();
        fsm.input(&packet(codes::CONFIGURE_ACK, reqid, &[Ci::short(1, 1000)]), &mut fx)
            .unwrap();
        assert_eq!(fsm.state(), State::AckRcvd);

        fsm.input(&ControlBuilder::new(codes::CODE_REJECT, 1).raw_data(&[9, 9]).build(), &mut fx)
            .unwrap();
        assert_eq!(fsm.state(), State::ReqSent);
    }
}
