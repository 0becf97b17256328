//! Lifecycle state of a client instance.

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::error::Error;

/// Lifecycle of a client instance.
///
/// `Initialized → Connecting → Connected → Disconnecting → Disconnected →
/// Destructing → Destructed`; `Connecting` may fall back to `Disconnected`
/// and `Disconnected` may go back to `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    Initialized,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    Destructing,
    Destructed,
}

/// The single source of truth for legality checks.
///
/// Reads and transitions happen inside one critical section so that a check
/// and the following transition cannot interleave with another task.
pub(crate) struct StateCell {
    inner: Mutex<CriticalSectionRawMutex, Cell<SessionState>>,
}

impl StateCell {
    pub(crate) const fn new() -> Self {
        Self {
            inner: Mutex::new(Cell::new(SessionState::Initialized)),
        }
    }

    pub(crate) fn get(&self) -> SessionState {
        self.inner.lock(|s| s.get())
    }

    pub(crate) fn set(&self, next: SessionState) {
        self.inner.lock(|s| s.set(next));
    }

    /// Fails with [`Error::State`] unless the current state is one of `allowed`.
    pub(crate) fn require(&self, allowed: &[SessionState]) -> Result<SessionState, Error> {
        let current = self.get();
        if allowed.contains(&current) {
            Ok(current)
        } else {
            Err(Error::State(current))
        }
    }

    /// Atomically moves to `next` if the current state is one of `allowed`.
    pub(crate) fn transition(
        &self,
        allowed: &[SessionState],
        next: SessionState,
    ) -> Result<SessionState, Error> {
        self.inner.lock(|s| {
            let current = s.get();
            if allowed.contains(&current) {
                s.set(next);
                Ok(current)
            } else {
                Err(Error::State(current))
            }
        })
    }
}
