//! Timer scheduling contract.
//!
//! A session owns at most one armed timer per [`TimerPurpose`]. Arming a
//! purpose that is already armed cancels the previous timer first. When a
//! timer fires the service delivers a [`TimerFired`] carrying the handle it
//! returned from `schedule`; the session ignores deliveries whose handle no
//! longer matches its slot, so late firings of cancelled timers are harmless.

use super::SessionId;
use std::collections::BTreeMap;
use std::time::Duration;

/// What a timer is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerPurpose {
    /// LCP Configure/Terminate-Request retransmission
    Lcp,
    /// IPCP Configure/Terminate-Request retransmission
    Ipcp,
    /// LCP Echo-Request interval
    Echo,
    /// CHAP Challenge retransmission
    ChapChallenge,
    /// CHAP Response retransmission
    ChapResponse,
    /// Periodic CHAP re-authentication
    ChapRechallenge,
    /// PAP Authenticate-Request retransmission
    PapRequest,
    /// PAP authenticator waiting for a request
    PapListen,
    /// Link idle check
    Idle,
    /// Maximum connect time
    SessionLimit,
}

impl TimerPurpose {
    pub const COUNT: usize = 10;

    pub const ALL: [TimerPurpose; Self::COUNT] = [
        TimerPurpose::Lcp,
        TimerPurpose::Ipcp,
        TimerPurpose::Echo,
        TimerPurpose::ChapChallenge,
        TimerPurpose::ChapResponse,
        TimerPurpose::ChapRechallenge,
        TimerPurpose::PapRequest,
        TimerPurpose::PapListen,
        TimerPurpose::Idle,
        TimerPurpose::SessionLimit,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Opaque handle returned by [`TimerService::schedule`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A timer expiry delivered back to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub session: SessionId,
    pub purpose: TimerPurpose,
    pub handle: TimerHandle,
}

/// Something that can run timers on behalf of sessions
pub trait TimerService {
    /// Schedule a one-shot timer
    fn schedule(&mut self, session: SessionId, purpose: TimerPurpose, delay: Duration)
        -> TimerHandle;

    /// Cancel a timer. Cancelling an expired or unknown handle is a no-op.
    fn cancel(&mut self, handle: TimerHandle);
}

/// Per-session table of armed timers, one slot per purpose
#[derive(Debug, Default)]
pub struct TimerSlots {
    slots: [Option<TimerHandle>; TimerPurpose::COUNT],
}

impl TimerSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `purpose`, replacing any timer already armed for it
    pub fn arm(
        &mut self,
        timers: &mut dyn TimerService,
        session: SessionId,
        purpose: TimerPurpose,
        delay: Duration,
    ) {
        if let Some(old) = self.slots[purpose.index()].take() {
            timers.cancel(old);
        }
        let handle = timers.schedule(session, purpose, delay);
        self.slots[purpose.index()] = Some(handle);
    }

    pub fn cancel(&mut self, timers: &mut dyn TimerService, purpose: TimerPurpose) {
        if let Some(handle) = self.slots[purpose.index()].take() {
            timers.cancel(handle);
        }
    }

    pub fn cancel_all(&mut self, timers: &mut dyn TimerService) {
        for purpose in TimerPurpose::ALL {
            self.cancel(timers, purpose);
        }
    }

    /// Accept a firing if it belongs to the currently armed timer, clearing
    /// the slot. Stale handles return false.
    pub fn fire(&mut self, purpose: TimerPurpose, handle: TimerHandle) -> bool {
        let slot = &mut self.slots[purpose.index()];
        if *slot == Some(handle) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self, purpose: TimerPurpose) -> bool {
        self.slots[purpose.index()].is_some()
    }

    pub fn armed_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingTimer {
    deadline: Duration,
    session: SessionId,
    purpose: TimerPurpose,
}

/// Timer service driven by hand, with a virtual clock.
///
/// Used by tests and simulations: nothing fires until the caller asks.
#[derive(Debug, Default)]
pub struct ManualTimers {
    now: Duration,
    next_handle: u64,
    pending: BTreeMap<TimerHandle, PendingTimer>,
}

impl ManualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed so far
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Number of armed timers across all sessions
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Remaining delay of the timer armed for (session, purpose)
    pub fn remaining(&self, session: SessionId, purpose: TimerPurpose) -> Option<Duration> {
        self.pending
            .values()
            .find(|timer| timer.session == session && timer.purpose == purpose)
            .map(|timer| timer.deadline.saturating_sub(self.now))
    }

    pub fn is_pending(&self, session: SessionId, purpose: TimerPurpose) -> bool {
        self.remaining(session, purpose).is_some()
    }

    /// Pop the earliest timer, moving the clock to its deadline
    pub fn fire_next(&mut self) -> Option<TimerFired> {
        let (&handle, timer) = self
            .pending
            .iter()
            .min_by_key(|(handle, timer)| (timer.deadline, **handle))?;
        let fired = TimerFired {
            session: timer.session,
            purpose: timer.purpose,
            handle,
        };
        self.now = self.now.max(timer.deadline);
        self.pending.remove(&handle);
        Some(fired)
    }

    /// Pop the earliest timer armed for `purpose`
    pub fn fire_purpose(&mut self, purpose: TimerPurpose) -> Option<TimerFired> {
        let (&handle, timer) = self
            .pending
            .iter()
            .filter(|(_, timer)| timer.purpose == purpose)
            .min_by_key(|(handle, timer)| (timer.deadline, **handle))?;
        let fired = TimerFired {
            session: timer.session,
            purpose,
            handle,
        };
        self.now = self.now.max(timer.deadline);
        self.pending.remove(&handle);
        Some(fired)
    }

    /// Advance the clock and return every timer that expired, earliest first
    pub fn advance(&mut self, by: Duration) -> Vec<TimerFired> {
        let target = self.now + by;
        let mut fired = Vec::new();
        loop {
            let next = self
                .pending
                .iter()
                .filter(|(_, timer)| timer.deadline <= target)
                .min_by_key(|(handle, timer)| (timer.deadline, **handle))
                .map(|(handle, _)| *handle);
            let Some(next) = next else { break };
            if let Some(timer) = self.pending.remove(&next) {
                fired.push(TimerFired {
                    session: timer.session,
                    purpose: timer.purpose,
                    handle: next,
                });
            }
        }
        self.now = target;
        fired
    }
}

impl TimerService for ManualTimers {
    fn schedule(
        &mut self,
        session: SessionId,
        purpose: TimerPurpose,
        delay: Duration,
    ) -> TimerHandle {
        self.next_handle += 1;
        let handle = TimerHandle(self.next_handle);
        self.pending.insert(
            handle,
            PendingTimer {
                deadline: self.now + delay,
                session,
                purpose,
            },
        );
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.pending.remove(&handle);
    }
}
