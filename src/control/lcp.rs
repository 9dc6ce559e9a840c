//! LCP negotiation and keep-alive
//!
//! Option callbacks for the Link Control Protocol plus the Echo-Request
//! keep-alive that runs while the link is open.

use super::ci::{match_naked, match_rejected, ReqBuilder, ReqResponse};
use super::fsm::{ControlProtocol, Fsm, NakOutcome, State};
use crate::effects::{Effect, Effects, ExitStatus, LayerEvent};
use crate::protocol::chap::algorithms;
use crate::protocol::lcp::{self as wire, codes, lengths, options};
use crate::protocol::packet::ControlBuilder;
use crate::protocol::ppp::protocols;
use crate::protocol::Ci;
use crate::session::timer::TimerPurpose;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Consecutive magic-number Naks before the line is declared looped back
pub const DEFAULT_LOOPBACK_FAIL: u32 = 10;

/// One LCP option set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LcpOptions {
    pub neg_mru: bool,
    pub mru: u16,
    pub neg_asyncmap: bool,
    pub asyncmap: u32,
    pub neg_upap: bool,
    pub neg_chap: bool,
    /// CHAP digest in use
    pub chap_mdtype: u8,
    /// CHAP digests we are willing to use, most preferred first
    pub chap_digests: Vec<u8>,
    pub neg_lqr: bool,
    pub lqr_period: u32,
    pub neg_cbcp: bool,
    pub neg_magicnumber: bool,
    pub magicnumber: u32,
    pub neg_pcompression: bool,
    pub neg_accompression: bool,
}

impl LcpOptions {
    /// What we ask for unless configured otherwise
    pub fn wanted_defaults() -> Self {
        Self {
            mru: wire::DEFAULT_MRU,
            chap_mdtype: algorithms::MD5,
            chap_digests: vec![algorithms::MD5],
            neg_magicnumber: true,
            ..Self::default()
        }
    }

    /// What we let the peer ask for unless configured otherwise
    pub fn allowed_defaults() -> Self {
        Self {
            neg_mru: true,
            mru: wire::MAX_MRU,
            neg_asyncmap: true,
            neg_upap: true,
            neg_chap: true,
            chap_mdtype: algorithms::MD5,
            chap_digests: vec![algorithms::MD5],
            neg_magicnumber: true,
            neg_pcompression: true,
            neg_accompression: true,
            ..Self::default()
        }
    }

    fn chap_preferred(&self) -> u8 {
        self.chap_digests
            .first()
            .copied()
            .unwrap_or(algorithms::MD5)
    }
}

/// Keep-alive and loopback knobs
#[derive(Debug, Clone)]
pub struct LcpSettings {
    /// Echo-Request interval, zero disables the keep-alive
    pub echo_interval: Duration,
    /// Unanswered Echo-Requests before the peer is declared dead, zero never
    pub echo_failure: u32,
    pub loopback_fail: u32,
}

impl Default for LcpSettings {
    fn default() -> Self {
        Self {
            echo_interval: Duration::ZERO,
            echo_failure: 0,
            loopback_fail: DEFAULT_LOOPBACK_FAIL,
        }
    }
}

/// Framing parameters for one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framing {
    pub mru: u16,
    pub asyncmap: u32,
    pub pcomp: bool,
    pub accomp: bool,
}

impl Default for Framing {
    fn default() -> Self {
        Self {
            mru: wire::DEFAULT_MRU,
            asyncmap: wire::DEFAULT_ASYNCMAP,
            pcomp: false,
            accomp: false,
        }
    }
}

/// Framing installed on the link when LCP comes up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramingParams {
    pub send: Framing,
    pub recv: Framing,
}

#[derive(Debug, Default)]
struct EchoState {
    pending: u32,
    number: u8,
}

#[derive(Debug)]
pub struct Lcp {
    pub wanted: LcpOptions,
    pub allowed: LcpOptions,
    pub got: LcpOptions,
    pub his: LcpOptions,
    settings: LcpSettings,
    numloops: u32,
    echo: EchoState,
}

impl Lcp {
    pub fn new(wanted: LcpOptions, allowed: LcpOptions, settings: LcpSettings) -> Self {
        Self {
            got: wanted.clone(),
            wanted,
            allowed,
            his: LcpOptions::default(),
            settings,
            numloops: 0,
            echo: EchoState::default(),
        }
    }

    pub fn settings(&self) -> &LcpSettings {
        &self.settings
    }

    /// Magic-number Naks seen in a row
    pub fn loopback_count(&self) -> u32 {
        self.numloops
    }

    /// Echo-Requests sent without a reply
    pub fn echos_pending(&self) -> u32 {
        self.echo.pending
    }

    /// Our magic number, zero when not negotiated
    pub fn our_magic(&self) -> u32 {
        if self.got.neg_magicnumber {
            self.got.magicnumber
        } else {
            0
        }
    }

    /// Peer's MRU, or the default when it did not negotiate one
    pub fn peer_mru(&self) -> u16 {
        if self.his.neg_mru {
            self.his.mru
        } else {
            wire::DEFAULT_MRU
        }
    }

    /// Framing for both directions from the negotiated options
    pub fn framing(&self) -> FramingParams {
        let send = Framing {
            mru: self.allowed.mru.min(self.peer_mru()),
            asyncmap: if self.his.neg_asyncmap {
                self.his.asyncmap
            } else {
                wire::DEFAULT_ASYNCMAP
            },
            pcomp: self.his.neg_pcompression,
            accomp: self.his.neg_accompression,
        };
        let recv = Framing {
            mru: if self.got.neg_mru {
                self.wanted.mru.max(self.got.mru)
            } else {
                wire::DEFAULT_MRU
            },
            asyncmap: if self.got.neg_asyncmap {
                self.got.asyncmap
            } else {
                wire::DEFAULT_ASYNCMAP
            },
            pcomp: self.got.neg_pcompression,
            accomp: self.got.neg_accompression,
        };
        FramingParams { send, recv }
    }

    /// Forget what was negotiated once the link goes down
    pub fn clear_negotiated(&mut self) {
        self.his = LcpOptions::default();
    }

    fn handle_echo_request(&self, state: State, id: u8, data: &[u8], fx: &mut Effects) {
        if state != State::Opened {
            return;
        }
        if data.len() < 4 {
            debug!("short Echo-Request");
            return;
        }
        let mut reply = self.our_magic().to_be_bytes().to_vec();
        reply.extend_from_slice(&data[4..]);
        let packet = ControlBuilder::new(codes::ECHO_REPLY, id)
            .raw_data(&reply)
            .build();
        fx.transmit(protocols::LCP, packet);
    }

    fn handle_echo_reply(&mut self, data: &[u8]) {
        let Some(magic) = data.get(..4) else {
            debug!("short Echo-Reply");
            return;
        };
        let magic = u32::from_be_bytes([magic[0], magic[1], magic[2], magic[3]]);
        if self.got.neg_magicnumber && magic == self.got.magicnumber {
            warn!("appear to have received our own echo-reply");
            return;
        }
        self.echo.pending = 0;
    }

    fn handle_protocol_reject(&self, state: State, data: &[u8], fx: &mut Effects) {
        let Some(protocol) = data.get(..2) else {
            debug!("short Protocol-Reject");
            return;
        };
        let protocol = u16::from_be_bytes([protocol[0], protocol[1]]);
        if state != State::Opened {
            debug!(protocol, "Protocol-Reject discarded: LCP not open");
            return;
        }
        if protocol == protocols::LCP {
            warn!("received Protocol-Reject for LCP");
            return;
        }
        fx.push(Effect::ProtocolRejected(protocol));
    }
}

fn new_magic() -> u32 {
    rand::random()
}

impl ControlProtocol for Lcp {
    const PROTOCOL: u16 = protocols::LCP;
    const NAME: &'static str = "LCP";
    const TIMER: TimerPurpose = TimerPurpose::Lcp;

    fn reset_ci(&mut self) {
        self.wanted.magicnumber = new_magic();
        self.numloops = 0;
        self.got = self.wanted.clone();
    }

    fn add_ci(&mut self) -> Vec<Ci> {
        let go = &self.got;
        let mut cis = Vec::new();

        if go.neg_mru {
            cis.push(wire::mru(go.mru));
        }
        if go.neg_asyncmap {
            cis.push(wire::asyncmap(go.asyncmap));
        }
        if go.neg_chap {
            cis.push(wire::auth_chap(go.chap_mdtype));
        } else if go.neg_upap {
            cis.push(wire::auth_pap());
        }
        if go.neg_lqr {
            cis.push(wire::quality_lqr(go.lqr_period));
        }
        if go.neg_cbcp {
            cis.push(wire::callback_cbcp());
        }
        if go.neg_magicnumber {
            cis.push(wire::magic_number(go.magicnumber));
        }
        if go.neg_pcompression {
            cis.push(Ci::void(options::PFC));
        }
        if go.neg_accompression {
            cis.push(Ci::void(options::ACFC));
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
        let mut attempt = self.got.clone();
        let mut looped_back = false;

        for ci in answers {
            match ci.kind {
                options::MRU => {
                    let value = ci.as_short()?;
                    if treat_as_reject {
                        attempt.neg_mru = false;
                    } else if value <= self.wanted.mru || value <= wire::DEFAULT_MRU {
                        attempt.mru = value;
                    }
                }
                options::ASYNCMAP => {
                    let value = ci.as_long()?;
                    if treat_as_reject {
                        attempt.neg_asyncmap = false;
                    } else {
                        attempt.asyncmap = self.got.asyncmap | value;
                    }
                }
                options::AUTH_PROTOCOL => self.nak_auth(ci, &mut attempt)?,
                options::QUALITY_PROTOCOL => {
                    if ci.len() != lengths::LQR {
                        return None;
                    }
                    let mut reader = ci.reader();
                    let protocol = reader.u16().ok()?;
                    let period = reader.u32().ok()?;
                    if treat_as_reject || protocol != protocols::LQR {
                        attempt.neg_lqr = false;
                    } else {
                        attempt.lqr_period = period;
                    }
                }
                options::CALLBACK => attempt.neg_cbcp = false,
                options::MAGIC_NUMBER => {
                    ci.as_long()?;
                    if treat_as_reject {
                        attempt.neg_magicnumber = false;
                    } else {
                        attempt.magicnumber = new_magic();
                        looped_back = true;
                    }
                }
                options::PFC => attempt.neg_pcompression = false,
                options::ACFC => attempt.neg_accompression = false,
                _ => return None,
            }
        }

        // Options the peer would like us to ask for
        let mut seen = Vec::new();
        for ci in extra {
            if seen.contains(&ci.kind) {
                return None;
            }
            seen.push(ci.kind);
            if ci.kind == options::MRU {
                let value = ci.as_short()?;
                if value < wire::DEFAULT_MRU {
                    attempt.neg_mru = true;
                    attempt.mru = value;
                }
            }
        }

        if opened {
            return Some(NakOutcome::Continue);
        }

        self.got = attempt;
        if looped_back {
            self.numloops += 1;
            debug!(loops = self.numloops, "magic number Nak");
            if self.numloops >= self.settings.loopback_fail {
                warn!("serial line is looped back");
                return Some(NakOutcome::Close {
                    reason: "Loopback detected".into(),
                    status: ExitStatus::Loopback,
                });
            }
        } else {
            self.numloops = 0;
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
                options::MRU => attempt.neg_mru = false,
                options::ASYNCMAP => attempt.neg_asyncmap = false,
                options::AUTH_PROTOCOL => {
                    if attempt.neg_chap {
                        attempt.neg_chap = false;
                    } else {
                        attempt.neg_upap = false;
                    }
                }
                options::QUALITY_PROTOCOL => attempt.neg_lqr = false,
                options::CALLBACK => attempt.neg_cbcp = false,
                options::MAGIC_NUMBER => attempt.neg_magicnumber = false,
                options::PFC => attempt.neg_pcompression = false,
                options::ACFC => attempt.neg_accompression = false,
                _ => {}
            }
        }

        if !opened {
            self.got = attempt;
        }
        true
    }

    /// A magic number equal to ours is always Nak'd with a fresh value,
    /// even past the nak-loop limit. Looped-back lines are bounded by
    /// `loopback_fail`, counted in `nak_ci` as our own magic Naks come back.
    fn req_ci(&mut self, cis: &[Ci], reject_if_disagree: bool) -> ReqResponse {
        let mut reply = ReqBuilder::new(reject_if_disagree);
        let mut his = LcpOptions::default();
        let ao = &self.allowed;
        let go = &self.got;

        for ci in cis {
            match ci.kind {
                options::MRU => match ci.as_short() {
                    Some(value) if ao.neg_mru && value >= wire::MIN_MRU => {
                        his.neg_mru = true;
                        his.mru = value;
                        reply.ack(ci);
                    }
                    _ => reply.reject(ci),
                },
                options::ASYNCMAP => match ci.as_long() {
                    Some(value) if ao.neg_asyncmap => {
                        if ao.asyncmap & !value != 0 {
                            reply.nak(ci, wire::asyncmap(ao.asyncmap | value));
                        } else {
                            his.neg_asyncmap = true;
                            his.asyncmap = value;
                            reply.ack(ci);
                        }
                    }
                    _ => reply.reject(ci),
                },
                options::AUTH_PROTOCOL => {
                    if ci.data.len() < 2 || !(ao.neg_upap || ao.neg_chap) {
                        reply.reject(ci);
                        continue;
                    }
                    // Only one authentication protocol per request
                    if his.neg_upap || his.neg_chap {
                        reply.reject(ci);
                        continue;
                    }
                    let protocol = u16::from_be_bytes([ci.data[0], ci.data[1]]);
                    match protocol {
                        protocols::PAP => {
                            if ci.len() != lengths::SHORT {
                                reply.reject(ci);
                            } else if !ao.neg_upap {
                                reply.nak(ci, wire::auth_chap(ao.chap_preferred()));
                            } else {
                                his.neg_upap = true;
                                reply.ack(ci);
                            }
                        }
                        protocols::CHAP => {
                            if ci.len() != lengths::CHAP {
                                reply.reject(ci);
                            } else if !ao.neg_chap {
                                reply.nak(ci, wire::auth_pap());
                            } else if !ao.chap_digests.contains(&ci.data[2]) {
                                reply.nak(ci, wire::auth_chap(ao.chap_preferred()));
                            } else {
                                his.neg_chap = true;
                                his.chap_mdtype = ci.data[2];
                                reply.ack(ci);
                            }
                        }
                        _ => {
                            let suggestion = if ao.neg_chap {
                                wire::auth_chap(ao.chap_preferred())
                            } else {
                                wire::auth_pap()
                            };
                            reply.nak(ci, suggestion);
                        }
                    }
                }
                options::QUALITY_PROTOCOL => {
                    let mut reader = ci.reader();
                    match (reader.u16(), reader.u32()) {
                        (Ok(protocols::LQR), Ok(period))
                            if ao.neg_lqr && ci.len() == lengths::LQR =>
                        {
                            his.neg_lqr = true;
                            his.lqr_period = period;
                            reply.ack(ci);
                        }
                        _ => reply.reject(ci),
                    }
                }
                options::CALLBACK => {
                    if ao.neg_cbcp && ci.data == [wire::CBCP_OPT] {
                        his.neg_cbcp = true;
                        reply.ack(ci);
                    } else {
                        reply.reject(ci);
                    }
                }
                options::MAGIC_NUMBER => match ci.as_long() {
                    Some(value) if ao.neg_magicnumber || go.neg_magicnumber => {
                        if go.neg_magicnumber && value == go.magicnumber {
                            debug!(magic = value, "peer's magic number matches ours");
                            reply.nak_firm(wire::magic_number(new_magic()));
                        } else {
                            his.neg_magicnumber = true;
                            his.magicnumber = value;
                            reply.ack(ci);
                        }
                    }
                    _ => reply.reject(ci),
                },
                options::PFC => {
                    if ao.neg_pcompression && ci.is_empty() {
                        his.neg_pcompression = true;
                        reply.ack(ci);
                    } else {
                        reply.reject(ci);
                    }
                }
                options::ACFC => {
                    if ao.neg_accompression && ci.is_empty() {
                        his.neg_accompression = true;
                        reply.ack(ci);
                    } else {
                        reply.reject(ci);
                    }
                }
                _ => {
                    debug!(kind = ci.kind, "rejecting unknown LCP option");
                    reply.reject(ci);
                }
            }
        }

        self.his = his;
        reply.finish()
    }

    fn ext_code(&mut self, state: State, code: u8, id: u8, data: &[u8], fx: &mut Effects) -> bool {
        match code {
            codes::PROTOCOL_REJECT => self.handle_protocol_reject(state, data, fx),
            codes::ECHO_REQUEST => self.handle_echo_request(state, id, data, fx),
            codes::ECHO_REPLY => self.handle_echo_reply(data),
            codes::DISCARD_REQUEST => {}
            _ => return false,
        }
        true
    }
}

impl Lcp {
    fn nak_auth(&self, ci: &Ci, attempt: &mut LcpOptions) -> Option<()> {
        let protocol = ci.reader().u16().ok()?;
        match protocol {
            protocols::PAP if ci.len() == lengths::SHORT => {
                // Peer prefers PAP: stop asking for CHAP
                if self.got.neg_chap {
                    attempt.neg_chap = false;
                } else {
                    return None;
                }
            }
            protocols::CHAP if ci.len() == lengths::CHAP => {
                let digest = ci.data[2];
                if self.got.neg_chap {
                    if digest == self.got.chap_mdtype {
                        return None;
                    }
                    if self.wanted.chap_digests.contains(&digest) {
                        attempt.chap_mdtype = digest;
                    } else {
                        attempt.chap_digests.retain(|d| *d != self.got.chap_mdtype);
                        match attempt.chap_digests.first() {
                            Some(next) => attempt.chap_mdtype = *next,
                            None => attempt.neg_chap = false,
                        }
                    }
                } else {
                    attempt.neg_upap = false;
                }
            }
            _ => {
                if self.got.neg_chap {
                    attempt.neg_chap = false;
                } else {
                    attempt.neg_upap = false;
                }
            }
        }
        Some(())
    }
}

impl Fsm<Lcp> {
    /// Close the link. A passive or silent LCP sitting in Stopped has no
    /// Terminate exchange to wait for, so it finishes immediately.
    pub fn close_link(&mut self, reason: impl Into<String>, fx: &mut Effects) {
        let old = self.state();
        self.close(reason, fx);
        if old == State::Stopped && (self.config().passive || self.config().silent) {
            fx.layer(protocols::LCP, LayerEvent::Finished);
        }
    }

    /// Reject a frame for a protocol we do not run
    pub fn send_protocol_reject(&mut self, protocol: u16, payload: &[u8], fx: &mut Effects) {
        if !self.is_opened() {
            debug!(protocol, "dropping frame for unknown protocol");
            return;
        }
        let mut data = protocol.to_be_bytes().to_vec();
        data.extend_from_slice(payload);
        let id = self.next_id();
        self.send(codes::PROTOCOL_REJECT, id, &data, fx);
    }

    /// Start the keep-alive once LCP is open
    pub fn echo_lower_up(&mut self, fx: &mut Effects) {
        self.proto_mut().echo = EchoState::default();
        self.echo_check(fx);
    }

    pub fn echo_lower_down(&mut self, fx: &mut Effects) {
        fx.cancel(TimerPurpose::Echo);
    }

    /// The echo interval elapsed
    pub fn echo_timeout(&mut self, fx: &mut Effects) {
        self.echo_check(fx);
    }

    fn echo_check(&mut self, fx: &mut Effects) {
        let interval = self.proto().settings.echo_interval;
        if interval.is_zero() {
            return;
        }
        self.send_echo_request(fx);
        if self.is_opened() {
            fx.arm(TimerPurpose::Echo, interval);
        }
    }

    fn send_echo_request(&mut self, fx: &mut Effects) {
        let failure = self.proto().settings.echo_failure;
        if failure != 0 && self.proto().echo.pending >= failure {
            if self.is_opened() {
                info!(pending = self.proto().echo.pending, "no response to echo-requests");
                warn!("link appears to be disconnected");
                fx.push(Effect::Status(ExitStatus::PeerDead));
                self.close_link("Peer not responding", fx);
            }
            self.proto_mut().echo.pending = 0;
        }

        if self.is_opened() {
            let magic = self.proto().our_magic();
            let echo = &mut self.proto_mut().echo;
            let id = echo.number;
            echo.number = echo.number.wrapping_add(1);
            echo.pending += 1;
            self.send(codes::ECHO_REQUEST, id, &magic.to_be_bytes(), fx);
        }
    }
}
