//! Wait policies and the sessions they start.
//!
//! A [`Wait`] describes how long a subscription is willing to wait and what
//! it receives if that time runs out. Each subscription starts its own
//! [`WaitSession`]; a session expires at most once.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::timer::{Timer, TimerHandle};
use crate::Outcome;

type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone)]
enum Expiry {
    Never,
    After(Duration),
    Manual(WaitTrigger),
}

/// Timeout strategy for a subscription.
///
/// ```
/// use std::time::Duration;
/// use promise_out::{Outcome, Wait};
///
/// let wait = Wait::for_duration(Duration::from_millis(50)).or_value(0);
/// assert!(matches!(wait.expired_outcome("unused"), Outcome::Value(0)));
/// ```
#[derive(Debug, Clone)]
pub struct Wait<T> {
    expiry: Expiry,
    default: Option<Outcome<T>>,
    message: Option<String>,
}

impl<T> Default for Wait<T> {
    fn default() -> Self {
        Self::forever()
    }
}

impl<T> Wait<T> {
    /// Never expires on its own.
    pub fn forever() -> Self {
        Self {
            expiry: Expiry::Never,
            default: None,
            message: None,
        }
    }

    /// Expires `timeout` after the subscription is made.
    pub fn for_duration(timeout: Duration) -> Self {
        Self {
            expiry: Expiry::After(timeout),
            default: None,
            message: None,
        }
    }

    /// Expires when `trigger` fires.
    pub fn manual(trigger: &WaitTrigger) -> Self {
        Self {
            expiry: Expiry::Manual(trigger.clone()),
            default: None,
            message: None,
        }
    }

    /// Delivers `Value(value)` on expiry instead of a cancellation.
    pub fn or_value(self, value: T) -> Self {
        self.or_outcome(Outcome::Value(value))
    }

    pub fn or_outcome(mut self, outcome: Outcome<T>) -> Self {
        self.default = Some(outcome);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_bounded(&self) -> bool {
        !matches!(self.expiry, Expiry::Never)
    }

    /// Starts a session for one subscription on the global timer.
    pub fn start(&self) -> WaitSession {
        self.start_on(&Timer::global())
    }

    /// Starts a session whose duration, if any, is counted by `timer`.
    pub fn start_on(&self, timer: &Timer) -> WaitSession {
        let session = WaitSession::new();
        match &self.expiry {
            Expiry::Never => {}
            Expiry::After(timeout) => {
                let weak = Arc::downgrade(&session.inner);
                let handle = timer.schedule_after(*timeout, move || {
                    if let Some(inner) = weak.upgrade() {
                        WaitSession { inner }.expire();
                    }
                });
                session.attach_timer(handle);
            }
            Expiry::Manual(trigger) => trigger.register(&session),
        }
        session
    }
}

impl<T: Clone> Wait<T> {
    /// What a consumer receives when its session expires.
    pub fn expired_outcome(&self, fallback_message: &str) -> Outcome<T> {
        match &self.default {
            Some(outcome) => outcome.clone(),
            None => Outcome::cancelled(self.message.as_deref().unwrap_or(fallback_message)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Armed,
    Expired,
    Disarmed,
}

struct SessionState {
    phase: Phase,
    callbacks: Vec<Callback>,
    timer: Option<TimerHandle>,
}

struct SessionInner {
    state: Mutex<SessionState>,
}

/// The live countdown of one subscription.
#[derive(Clone)]
pub struct WaitSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for WaitSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("WaitSession")
            .field("phase", &state.phase)
            .field("callbacks", &state.callbacks.len())
            .finish()
    }
}

impl WaitSession {
    fn new() -> Self {
        Self {
            inner: Arc::new(SessionInner {
                state: Mutex::new(SessionState {
                    phase: Phase::Armed,
                    callbacks: Vec::new(),
                    timer: None,
                }),
            }),
        }
    }

    fn attach_timer(&self, handle: TimerHandle) {
        let mut state = self.inner.state.lock();
        if state.phase == Phase::Armed {
            state.timer = Some(handle);
        } else {
            handle.cancel();
        }
    }

    /// Registers a callback for expiry. Runs it immediately if the session
    /// already expired; drops it if the session was disarmed.
    pub fn on_expire(&self, callback: impl FnOnce() + Send + 'static) {
        let mut state = self.inner.state.lock();
        match state.phase {
            Phase::Armed => state.callbacks.push(Box::new(callback)),
            Phase::Expired => {
                drop(state);
                callback();
            }
            Phase::Disarmed => {}
        }
    }

    /// Expires the session. Only the first call (and only if the session was
    /// not disarmed) runs the callbacks.
    pub fn expire(&self) -> bool {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if state.phase != Phase::Armed {
                return false;
            }
            state.phase = Phase::Expired;
            if let Some(timer) = state.timer.take() {
                timer.cancel();
            }
            std::mem::take(&mut state.callbacks)
        };
        tracing::debug!(callbacks = callbacks.len(), "wait session expired");
        for callback in callbacks {
            callback();
        }
        true
    }

    /// Closes the session without firing and releases its timer entry.
    pub fn disarm(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.phase != Phase::Armed {
            return false;
        }
        state.phase = Phase::Disarmed;
        state.callbacks.clear();
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
        true
    }

    pub fn is_expired(&self) -> bool {
        self.inner.state.lock().phase == Phase::Expired
    }

    pub fn is_armed(&self) -> bool {
        self.inner.state.lock().phase == Phase::Armed
    }
}

struct TriggerState {
    fired: bool,
    sessions: Vec<Weak<SessionInner>>,
}

/// Expires every session started from a [`Wait::manual`] policy.
///
/// Sessions started after the trigger fired expire right away.
#[derive(Clone)]
pub struct WaitTrigger {
    state: Arc<Mutex<TriggerState>>,
}

impl std::fmt::Debug for WaitTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitTrigger")
            .field("fired", &self.is_fired())
            .finish()
    }
}

impl Default for WaitTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitTrigger {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TriggerState {
                fired: false,
                sessions: Vec::new(),
            })),
        }
    }

    fn register(&self, session: &WaitSession) {
        let mut state = self.state.lock();
        if state.fired {
            drop(state);
            session.expire();
            return;
        }
        state.sessions.retain(|weak| weak.strong_count() > 0);
        state.sessions.push(Arc::downgrade(&session.inner));
    }

    /// Expires all registered sessions. Returns how many actually expired.
    pub fn fire(&self) -> usize {
        let sessions = {
            let mut state = self.state.lock();
            state.fired = true;
            std::mem::take(&mut state.sessions)
        };
        sessions
            .into_iter()
            .filter_map(|weak| weak.upgrade())
            .filter(|inner| {
                WaitSession {
                    inner: Arc::clone(inner),
                }
                .expire()
            })
            .count()
    }

    pub fn is_fired(&self) -> bool {
        self.state.lock().fired
    }
}
