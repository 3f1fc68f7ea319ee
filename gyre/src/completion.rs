//! One-shot completion tokens.
//!
//! Every channel operation (`register`, `connect`, `flush`, `close`, ...)
//! returns a [`Completion`]: a future-like value that starts out pending and
//! is completed exactly once by the channel's event loop, either with
//! success or with a failure cause. Completion is one-shot: when several
//! parties race to complete the same token, only the first wins and the
//! rest are ignored.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::Error;

#[derive(Clone)]
enum Outcome {
    Success,
    Failure(Arc<Error>),
}

type Callback = Box<dyn FnOnce(&Completion) + Send>;

struct State {
    outcome: Option<Outcome>,
    callbacks: Vec<Callback>,
}

struct Inner {
    state: Mutex<State>,
    cond: Condvar,
}

/// A one-shot, thread-safe completion token.
///
/// Cloning a `Completion` yields another handle to the same underlying
/// state; any clone may complete it or wait on it.
#[derive(Clone)]
pub struct Completion {
    inner: Arc<Inner>,
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl Completion {
    /// Creates a pending token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    outcome: None,
                    callbacks: Vec::new(),
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Creates a token that is already successful.
    pub fn succeeded() -> Self {
        let token = Self::new();
        token.try_success();
        token
    }

    /// Creates a token that has already failed with `cause`.
    pub fn failed(cause: Error) -> Self {
        let token = Self::new();
        token.try_failure(cause);
        token
    }

    /// Marks the token successful. Returns `false` if it was already
    /// completed (by anyone, with any outcome).
    pub fn try_success(&self) -> bool {
        self.complete(Outcome::Success)
    }

    /// Fails the token with `cause`. Returns `false` if it was already
    /// completed.
    pub fn try_failure(&self, cause: Error) -> bool {
        self.complete(Outcome::Failure(Arc::new(cause)))
    }

    /// Fails the token with a shared cause.
    pub fn try_failure_arc(&self, cause: Arc<Error>) -> bool {
        self.complete(Outcome::Failure(cause))
    }

    fn complete(&self, outcome: Outcome) -> bool {
        let callbacks = {
            let mut state = self.inner.state.lock().unwrap();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome);
            self.inner.cond.notify_all();
            std::mem::take(&mut state.callbacks)
        };
        for callback in callbacks {
            callback(self);
        }
        true
    }

    /// Whether the token has been completed.
    pub fn is_done(&self) -> bool {
        self.inner.state.lock().unwrap().outcome.is_some()
    }

    /// Whether the token completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(
            self.inner.state.lock().unwrap().outcome,
            Some(Outcome::Success)
        )
    }

    /// The failure cause, if the token failed.
    pub fn cause(&self) -> Option<Arc<Error>> {
        match &self.inner.state.lock().unwrap().outcome {
            Some(Outcome::Failure(cause)) => Some(Arc::clone(cause)),
            _ => None,
        }
    }

    /// Registers a callback invoked exactly once when the token completes.
    /// If the token is already done the callback runs immediately on the
    /// calling thread.
    pub fn on_complete(&self, callback: impl FnOnce(&Completion) + Send + 'static) {
        let run_now = {
            let mut state = self.inner.state.lock().unwrap();
            if state.outcome.is_some() {
                true
            } else {
                state.callbacks.push(Box::new(callback));
                return;
            }
        };
        if run_now {
            callback(self);
        }
    }

    /// Blocks until the token completes.
    pub fn wait(&self) {
        let mut state = self.inner.state.lock().unwrap();
        while state.outcome.is_none() {
            state = self.inner.cond.wait(state).unwrap();
        }
    }

    /// Blocks until the token completes or `timeout` elapses. Returns
    /// whether the token is done.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let state = self.inner.state.lock().unwrap();
        let (state, _) = self
            .inner
            .cond
            .wait_timeout_while(state, timeout, |s| s.outcome.is_none())
            .unwrap();
        state.outcome.is_some()
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock().unwrap();
        match &state.outcome {
            None => write!(f, "Completion(pending)"),
            Some(Outcome::Success) => write!(f, "Completion(success)"),
            Some(Outcome::Failure(cause)) => write!(f, "Completion(failure: {})", cause),
        }
    }
}
