//! Tokio runtime driver
//!
//! Runs sessions on a single task. Commands and timer expiries are handled
//! one at a time, so every event runs to completion before the next starts.

use crate::auth::{SecretSource, SystemLogin};
use crate::protocol::ppp::PppFrame;
use crate::session::{
    Context, Link, SessionId, SessionRegistry, TimerFired, TimerHandle, TimerPurpose,
    TimerService,
};
use crate::Result;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Requests to the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    LowerUp(SessionId),
    LowerDown(SessionId),
    Open(SessionId),
    Close(SessionId, String),
    /// A received PPP frame: protocol field then information field
    Frame(SessionId, Vec<u8>),
    /// Drop a session, cancelling its timers
    Remove(SessionId),
    Shutdown,
}

/// Timer service backed by tokio sleep tasks
pub struct TokioTimers {
    next: u64,
    tasks: HashMap<TimerHandle, JoinHandle<()>>,
    tx: mpsc::UnboundedSender<TimerFired>,
}

impl TokioTimers {
    /// Timer service and the channel its expiries arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let timers = Self {
            next: 0,
            tasks: HashMap::new(),
            tx,
        };
        (timers, rx)
    }

    /// Number of timers not yet fired or cancelled
    pub fn active(&self) -> usize {
        self.tasks.len()
    }

    /// Drop the task of a timer that has fired
    pub fn forget(&mut self, handle: TimerHandle) {
        self.tasks.remove(&handle);
    }
}

impl TimerService for TokioTimers {
    fn schedule(&mut self, session: SessionId, purpose: TimerPurpose, delay: Duration) -> TimerHandle {
        self.next += 1;
        let handle = TimerHandle::new(self.next);
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(TimerFired {
                session,
                purpose,
                handle,
            });
        });
        self.tasks.insert(handle, task);
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if let Some(task) = self.tasks.remove(&handle) {
            task.abort();
        }
    }
}

pub struct Driver<'a, L: Link> {
    registry: SessionRegistry<L>,
    secrets: &'a dyn SecretSource,
    login: Option<&'a dyn SystemLogin>,
    timers: TokioTimers,
    fired: mpsc::UnboundedReceiver<TimerFired>,
}

impl<'a, L: Link> Driver<'a, L> {
    /// Timers are spawned on the runtime `run` is polled on
    pub fn new(registry: SessionRegistry<L>, secrets: &'a dyn SecretSource) -> Self {
        let (timers, fired) = TokioTimers::new();
        Self {
            registry,
            secrets,
            login: None,
            timers,
            fired,
        }
    }

    pub fn with_login(mut self, login: &'a dyn SystemLogin) -> Self {
        self.login = Some(login);
        self
    }

    pub fn registry(&self) -> &SessionRegistry<L> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SessionRegistry<L> {
        &mut self.registry
    }

    pub fn timers(&self) -> &TokioTimers {
        &self.timers
    }

    /// Handle commands and timer expiries until `Shutdown` or until every
    /// command sender is gone. Timers of remaining sessions are cancelled
    /// on the way out.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<Command>) -> Result<()> {
        info!(sessions = self.registry.len(), "driver started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => self.handle(command),
                },
                Some(fired) = self.fired.recv() => {
                    self.timers.forget(fired.handle);
                    let mut ctx = Context {
                        timers: &mut self.timers,
                        secrets: self.secrets,
                        login: self.login,
                    };
                    self.registry.timer_fired(fired, &mut ctx);
                }
            }
        }

        let ids: Vec<SessionId> = self.registry.ids().collect();
        for id in ids {
            if let Ok(session) = self.registry.get_mut(id) {
                session.release(&mut self.timers);
            }
        }
        info!("driver stopped");
        Ok(())
    }

    fn handle(&mut self, command: Command) {
        debug!(?command, "command");
        if let Command::Remove(id) = command {
            if let Err(e) = self.registry.remove(id, &mut self.timers) {
                warn!(session = %id, error = %e, "cannot remove session");
            }
            return;
        }

        let mut ctx = Context {
            timers: &mut self.timers,
            secrets: self.secrets,
            login: self.login,
        };
        let id = match &command {
            Command::LowerUp(id)
            | Command::LowerDown(id)
            | Command::Open(id)
            | Command::Close(id, _)
            | Command::Frame(id, _) => *id,
            Command::Remove(_) | Command::Shutdown => return,
        };
        let session = match self.registry.get_mut(id) {
            Ok(session) => session,
            Err(e) => {
                warn!(session = %id, error = %e, "command for unknown session");
                return;
            }
        };

        match command {
            Command::LowerUp(_) => session.lower_up(&mut ctx),
            Command::LowerDown(_) => session.lower_down(&mut ctx),
            Command::Open(_) => session.open(&mut ctx),
            Command::Close(_, reason) => session.close(&reason, &mut ctx),
            Command::Frame(_, bytes) => match PppFrame::parse(&bytes) {
                Ok(frame) => session.input(frame.protocol(), frame.payload(), &mut ctx),
                Err(e) => {
                    session.stats().record_malformed();
                    debug!(session = %id, error = %e, "dropping short frame");
                }
            },
            Command::Remove(_) | Command::Shutdown => {}
        }
    }
}
