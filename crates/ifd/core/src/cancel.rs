//! Cooperative cancellation
//!
//! Blocking operations receive a [`CancellationToken`] and check it at their
//! polling points. Sleeping through [`CancellationToken::sleep`] wakes up as
//! soon as the token is cancelled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::IfdError;

/// Why a token was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// A caller asked for cancellation
    User,
    /// The owning context was torn down
    Teardown,
}

#[derive(Debug, Default)]
struct Inner {
    reason: Mutex<Option<CancelReason>>,
    wakeup: Condvar,
}

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Create a fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel on behalf of a caller
    pub fn cancel(&self) {
        self.cancel_with(CancelReason::User);
    }

    /// Cancel with an explicit reason. The first reason wins.
    pub fn cancel_with(&self, reason: CancelReason) {
        let mut guard = self.inner.reason.lock();
        if guard.is_none() {
            *guard = Some(reason);
        }
        self.inner.wakeup.notify_all();
    }

    /// Whether the token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.inner.reason.lock().is_some()
    }

    /// Cancellation reason, if cancelled
    pub fn reason(&self) -> Option<CancelReason> {
        *self.inner.reason.lock()
    }

    /// Return the matching error if the token has been cancelled
    pub fn check(&self) -> Result<(), IfdError> {
        match self.reason() {
            None => Ok(()),
            Some(CancelReason::User) => Err(IfdError::CancellationByUser),
            Some(CancelReason::Teardown) => Err(IfdError::SessionTerminated),
        }
    }

    /// Sleep for `duration` unless cancelled first
    pub fn sleep(&self, duration: Duration) -> Result<(), IfdError> {
        let deadline = Instant::now() + duration;
        let mut guard = self.inner.reason.lock();
        while guard.is_none() {
            if self.inner.wakeup.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        drop(guard);
        self.check()
    }
}
