//! Sessions
//!
//! One [`Session`] per link, kept in a bounded [`SessionRegistry`]. The
//! session wires the protocol engines to its [`Link`], its timers and the
//! secrets they consult.

mod dispatch;
mod engine;
mod link;
mod registry;
pub mod timer;

pub use engine::{Session, SessionSettings};
pub use link::{Link, RecordingLink};
pub use registry::{SessionId, SessionRegistry};
pub use timer::{ManualTimers, TimerFired, TimerHandle, TimerPurpose, TimerService, TimerSlots};

use crate::auth::{SecretSource, SystemLogin};

/// Collaborators shared by every session, borrowed for one event
pub struct Context<'a> {
    pub timers: &'a mut dyn TimerService,
    pub secrets: &'a dyn SecretSource,
    pub login: Option<&'a dyn SystemLogin>,
}

impl<'a> Context<'a> {
    pub fn new(timers: &'a mut dyn TimerService, secrets: &'a dyn SecretSource) -> Self {
        Self {
            timers,
            secrets,
            login: None,
        }
    }

    pub fn with_login(mut self, login: &'a dyn SystemLogin) -> Self {
        self.login = Some(login);
        self
    }
}
