//! Two sessions wired back to back

use pppcp::auth::InlineSecrets;
use pppcp::session::{
    Context, ManualTimers, RecordingLink, Session, SessionId, SessionRegistry, SessionSettings,
    TimerFired, TimerPurpose,
};

/// Upper bound on exchange rounds before a pump is considered stuck
const MAX_ROUNDS: usize = 200;

/// Client `a` and server `b` sharing one virtual clock
pub struct Pair {
    pub timers: ManualTimers,
    pub registry: SessionRegistry<RecordingLink>,
    pub a: SessionId,
    pub b: SessionId,
    secrets_a: InlineSecrets,
    secrets_b: InlineSecrets,
    /// Lose every frame travelling from b to a
    pub cut_b_to_a: bool,
}

impl Pair {
    pub fn new(
        a: SessionSettings,
        secrets_a: InlineSecrets,
        b: SessionSettings,
        secrets_b: InlineSecrets,
    ) -> Self {
        let mut registry = SessionRegistry::new(2);
        let a = registry
            .insert(|id| Session::new(id, RecordingLink::new(), a))
            .expect("registry has room for a");
        let b = registry
            .insert(|id| Session::new(id, RecordingLink::new(), b))
            .expect("registry has room for b");
        Self {
            timers: ManualTimers::new(),
            registry,
            a,
            b,
            secrets_a,
            secrets_b,
            cut_b_to_a: false,
        }
    }

    pub fn session(&self, id: SessionId) -> &Session<RecordingLink> {
        self.registry.get(id).expect("session exists")
    }

    pub fn a(&self) -> &Session<RecordingLink> {
        self.session(self.a)
    }

    pub fn b(&self) -> &Session<RecordingLink> {
        self.session(self.b)
    }

    /// Run `f` on one session with its own secrets
    pub fn with<R>(
        &mut self,
        id: SessionId,
        f: impl FnOnce(&mut Session<RecordingLink>, &mut Context<'_>) -> R,
    ) -> R {
        let secrets = if id == self.a {
            &self.secrets_a
        } else {
            &self.secrets_b
        };
        let mut ctx = Context::new(&mut self.timers, secrets);
        let session = self.registry.get_mut(id).expect("session exists");
        f(session, &mut ctx)
    }

    /// Open both sides and bring their lower layers up
    pub fn open_both(&mut self) {
        for id in [self.a, self.b] {
            self.with(id, |session, ctx| {
                session.open(ctx);
                session.lower_up(ctx);
            });
        }
    }

    /// Move frames between the two sides until neither has anything to
    /// send. Returns the number of frames delivered.
    pub fn pump(&mut self) -> usize {
        let mut delivered = 0;
        for _ in 0..MAX_ROUNDS {
            let moved = self.deliver(self.a, self.b) + self.deliver(self.b, self.a);
            if moved == 0 {
                return delivered;
            }
            delivered += moved;
        }
        panic!("sessions still exchanging frames after {} rounds", MAX_ROUNDS);
    }

    fn deliver(&mut self, from: SessionId, to: SessionId) -> usize {
        let frames = self
            .registry
            .get_mut(from)
            .expect("session exists")
            .link_mut()
            .take_sent();
        let count = frames.len();
        if from == self.b && self.cut_b_to_a {
            return count;
        }
        for (protocol, packet) in frames {
            self.with(to, |session, ctx| session.input(protocol, &packet, ctx));
        }
        count
    }

    /// Fire the earliest pending timer. Returns its purpose.
    pub fn fire_next(&mut self) -> Option<TimerPurpose> {
        let fired = self.timers.fire_next()?;
        self.deliver_timer(fired);
        Some(fired.purpose)
    }

    /// Fire the earliest timer armed for `purpose`
    pub fn fire(&mut self, purpose: TimerPurpose) -> bool {
        match self.timers.fire_purpose(purpose) {
            Some(fired) => {
                self.deliver_timer(fired);
                true
            }
            None => false,
        }
    }

    fn deliver_timer(&mut self, fired: TimerFired) {
        let secrets = if fired.session == self.a {
            &self.secrets_a
        } else {
            &self.secrets_b
        };
        let mut ctx = Context::new(&mut self.timers, secrets);
        self.registry.timer_fired(fired, &mut ctx);
    }

    /// Exchange frames and fire timers until `done` holds.
    /// Panics when `max_timers` timers fire first.
    pub fn run_until(&mut self, max_timers: usize, done: impl Fn(&Pair) -> bool) {
        self.pump();
        for _ in 0..max_timers {
            if done(self) {
                return;
            }
            if self.fire_next().is_none() {
                break;
            }
            self.pump();
        }
        assert!(done(self), "condition not reached at {:?}", self.timers.now());
    }
}
