//! Helpers shared by the LCP and IPCP option callbacks.
//!
//! [`ReqBuilder`] folds per-CI verdicts on a peer's Configure-Request into a
//! single reply: one Reject outranks any number of Naks, and a Nak outranks
//! Acks. [`match_rejected`] and [`match_naked`] check that a peer's
//! Configure-Reject / Configure-Nak refers to what we actually sent, in the
//! order we sent it.

use crate::protocol::packet::codes;
use crate::protocol::Ci;

/// Reply to a Configure-Request: code plus the CIs it carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReqResponse {
    pub code: u8,
    pub cis: Vec<Ci>,
}

/// Accumulates the reply to a Configure-Request
#[derive(Debug)]
pub struct ReqBuilder {
    reject_if_disagree: bool,
    code: u8,
    cis: Vec<Ci>,
}

impl ReqBuilder {
    /// `reject_if_disagree` turns every escalatable Nak into a Reject
    pub fn new(reject_if_disagree: bool) -> Self {
        Self {
            reject_if_disagree,
            code: codes::CONFIGURE_ACK,
            cis: Vec::new(),
        }
    }

    /// Reply code so far
    pub fn code(&self) -> u8 {
        self.code
    }

    pub fn reject_if_disagree(&self) -> bool {
        self.reject_if_disagree
    }

    /// Acceptable CI, echoed only while the reply is still an Ack
    pub fn ack(&mut self, ci: &Ci) {
        if self.code == codes::CONFIGURE_ACK {
            self.cis.push(ci.clone());
        }
    }

    /// Disagreement: Nak with `suggestion`, or Reject the original once the
    /// nak-loop limit has been reached
    pub fn nak(&mut self, ci: &Ci, suggestion: Ci) {
        if self.reject_if_disagree {
            self.reject(ci);
        } else {
            self.nak_firm(suggestion);
        }
    }

    /// Nak that is never escalated to a Reject
    pub fn nak_firm(&mut self, suggestion: Ci) {
        match self.code {
            codes::CONFIGURE_REJECT => {}
            codes::CONFIGURE_NAK => self.cis.push(suggestion),
            _ => {
                self.code = codes::CONFIGURE_NAK;
                self.cis.clear();
                self.cis.push(suggestion);
            }
        }
    }

    pub fn reject(&mut self, ci: &Ci) {
        if self.code != codes::CONFIGURE_REJECT {
            self.code = codes::CONFIGURE_REJECT;
            self.cis.clear();
        }
        self.cis.push(ci.clone());
    }

    /// Append a Nak for an option the peer did not include. Ignored when the
    /// reply is already a Reject. Returns true if the reply turned from Ack
    /// into Nak.
    pub fn append_nak(&mut self, suggestion: Ci) -> bool {
        match self.code {
            codes::CONFIGURE_REJECT => false,
            codes::CONFIGURE_NAK => {
                self.cis.push(suggestion);
                false
            }
            _ => {
                self.code = codes::CONFIGURE_NAK;
                self.cis.clear();
                self.cis.push(suggestion);
                true
            }
        }
    }

    pub fn finish(self) -> ReqResponse {
        ReqResponse {
            code: self.code,
            cis: self.cis,
        }
    }
}

/// Check a Configure-Reject against the CIs we sent.
///
/// Rejected CIs must appear in the order we sent them with unchanged
/// values, and nothing else may be present. Returns the rejected option
/// types, or `None` if the Reject is bogus.
pub fn match_rejected(sent: &[Ci], rejected: &[Ci]) -> Option<Vec<u8>> {
    let mut received = rejected.iter().peekable();
    let mut kinds = Vec::new();

    for ci in sent {
        if let Some(next) = received.peek() {
            if next.kind == ci.kind {
                if *next != ci {
                    return None;
                }
                kinds.push(ci.kind);
                received.next();
            }
        }
    }

    if received.next().is_some() {
        return None;
    }
    Some(kinds)
}

/// Split a Configure-Nak into CIs answering ones we sent and extra CIs the
/// peer would like us to request.
///
/// Answers must follow the order we sent. Extra CIs must not name an option
/// type we already sent; otherwise the Nak is bogus and `None` is returned.
pub fn match_naked<'a>(sent: &[Ci], naked: &'a [Ci]) -> Option<(Vec<&'a Ci>, &'a [Ci])> {
    let mut pos = 0;
    let mut answers = Vec::new();

    for ci in sent {
        if let Some(next) = naked.get(pos) {
            if next.kind == ci.kind {
                answers.push(next);
                pos += 1;
            }
        }
    }

    let extra = &naked[pos..];
    if extra.iter().any(|ci| sent.iter().any(|s| s.kind == ci.kind)) {
        return None;
    }
    Some((answers, extra))
}
