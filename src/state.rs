// Generic finite-state-machine substrate shared by the connection and
// channel engines.
//
// Each engine declares its states as an enum implementing [`State`], which
// supplies the legal-transition predicate, a distinguished Exception
// terminal and a diagnostic label. The machine enforces transitions,
// latches one error, and serves as a rendezvous: tasks wait for a state
// set and are woken event-driven when the owner enters one of them.
//
// Single writer, many waiters. Waiters are keyed by a monotonic id so a
// cancelled wait unregisters itself without disturbing anyone else.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::errors::{Error, Result};

/// A state identifier usable with [`StateMachine`].
pub trait State: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// The distinguished terminal any state may transition into.
    const EXCEPTION: Self;

    /// Whether `next` is a legal successor of `self`.
    fn permits(self, next: Self) -> bool;

    /// Human-readable label. Diagnostics only, never parsed.
    fn description(self) -> &'static str;
}

struct Waiter<S: State> {
    states: Vec<S>,
    tx: oneshot::Sender<Result<S>>,
}

struct Inner<S: State> {
    state: S,
    error: Option<Error>,
    waiters: HashMap<u64, Waiter<S>>,
    next_waiter_id: u64,
}

/// Transition-enforcing state cell with event-driven waiters.
pub struct StateMachine<S: State> {
    inner: Mutex<Inner<S>>,
}

impl<S: State> StateMachine<S> {
    pub fn new(initial: S) -> Self {
        StateMachine {
            inner: Mutex::new(Inner {
                state: initial,
                error: None,
                waiters: HashMap::new(),
                next_waiter_id: 0,
            }),
        }
    }

    /// The current state.
    pub fn current(&self) -> S {
        self.lock().state
    }

    /// Transition to `next`.
    ///
    /// Re-entering the current state is a no-op that preserves any latched
    /// error. Entering [`State::EXCEPTION`] is always legal; any other
    /// state must be a declared successor or the call fails with
    /// [`Error::StateTransition`]. Waiters registered for `next` are woken.
    pub fn set(&self, next: S) -> Result<()> {
        let mut inner = self.lock();
        if next == inner.state {
            return Ok(());
        }
        if next != S::EXCEPTION && !inner.state.permits(next) {
            return Err(Error::StateTransition(format!(
                "invalid transition from {:?} ({}) to {:?} ({})",
                inner.state,
                inner.state.description(),
                next,
                next.description()
            )));
        }
        debug!(
            from = inner.state.description(),
            to = next.description(),
            "state transition"
        );
        inner.state = next;
        let woken: Vec<u64> = inner
            .waiters
            .iter()
            .filter(|(_, waiter)| waiter.states.contains(&next))
            .map(|(id, _)| *id)
            .collect();
        for id in woken {
            if let Some(waiter) = inner.waiters.remove(&id) {
                let _ = waiter.tx.send(Ok(next));
            }
        }
        Ok(())
    }

    /// Latch `error` and force the Exception state.
    ///
    /// Every waiter currently registered is woken with a clone of the
    /// error; if none is waiting, the error is kept for exactly one
    /// subsequent [`StateMachine::wait`].
    pub fn set_error(&self, error: Error) {
        let mut inner = self.lock();
        debug!(state = inner.state.description(), %error, "latching error");
        inner.state = S::EXCEPTION;
        if inner.waiters.is_empty() {
            inner.error = Some(error);
            return;
        }
        let ids: Vec<u64> = inner.waiters.keys().copied().collect();
        for id in ids {
            if let Some(waiter) = inner.waiters.remove(&id) {
                let _ = waiter.tx.send(Err(error.clone()));
            }
        }
    }

    /// Take the latched error, if any, leaving the state untouched.
    pub fn take_error(&self) -> Option<Error> {
        self.lock().error.take()
    }

    /// Register a waiter for `states` without suspending yet.
    ///
    /// Registration is synchronous, so a caller can arm the watch, then
    /// emit the frame whose reply will satisfy it, then await - a reply
    /// processed in between cannot be missed. If the current state
    /// already matches, or an error is latched, the watch resolves
    /// immediately when awaited. Dropping an unresolved watch
    /// unregisters its waiter id.
    pub fn watch(&self, states: &[S]) -> StateWatch<'_, S> {
        let mut inner = self.lock();
        if let Some(error) = inner.error.take() {
            return StateWatch {
                kind: WatchKind::Ready(Err(error)),
            };
        }
        if states.contains(&inner.state) {
            return StateWatch {
                kind: WatchKind::Ready(Ok(inner.state)),
            };
        }
        let id = inner.next_waiter_id;
        inner.next_waiter_id += 1;
        let (tx, rx) = oneshot::channel();
        inner.waiters.insert(
            id,
            Waiter {
                states: states.to_vec(),
                tx,
            },
        );
        StateWatch {
            kind: WatchKind::Waiting(WaitGuard {
                machine: self,
                id,
                rx,
            }),
        }
    }

    /// Suspend until the machine enters one of `states`, returning the
    /// state that matched. Returns immediately when the current state
    /// already matches. A latched error propagates instead (and is
    /// cleared). Dropping the returned future unregisters the waiter.
    pub async fn wait(&self, states: &[S]) -> Result<S> {
        self.watch(states).resolve().await
    }

    /// Drop all waiters and start over in `initial`, clearing any latched
    /// error. Used when a connection is being re-established.
    pub fn reset(&self, initial: S) {
        let mut inner = self.lock();
        debug!(
            from = inner.state.description(),
            to = initial.description(),
            waiting = inner.waiters.len(),
            "state reset"
        );
        inner.state = initial;
        inner.error = None;
        inner.waiters.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<S>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<S: State> fmt::Debug for StateMachine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("state", &self.current())
            .finish()
    }
}

/// An armed waiter returned by [`StateMachine::watch`].
pub struct StateWatch<'a, S: State> {
    kind: WatchKind<'a, S>,
}

enum WatchKind<'a, S: State> {
    Ready(Result<S>),
    Waiting(WaitGuard<'a, S>),
}

impl<S: State> StateWatch<'_, S> {
    /// Suspend until the watched state set is entered or an error is
    /// latched.
    pub async fn resolve(self) -> Result<S> {
        match self.kind {
            WatchKind::Ready(result) => result,
            WatchKind::Waiting(mut guard) => match (&mut guard.rx).await {
                Ok(result) => result,
                Err(_) => Err(Error::StateTransition(
                    "state machine dropped while waiting".into(),
                )),
            },
        }
    }
}

struct WaitGuard<'a, S: State> {
    machine: &'a StateMachine<S>,
    id: u64,
    rx: oneshot::Receiver<Result<S>>,
}

impl<S: State> Drop for WaitGuard<'_, S> {
    fn drop(&mut self) {
        self.machine.lock().waiters.remove(&self.id);
    }
}
