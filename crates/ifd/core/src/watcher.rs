//! Terminal and card presence watching
//!
//! [`EventWatcher`] polls the terminal backend and turns the difference between
//! two snapshots into [`StatusChange`]s. Changes are queued and handed out one
//! per [`EventWatcher::wait_for_change`] call.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::cancel::CancellationToken;
use crate::error::{IfdError, Result};
use crate::terminal::TerminalFactory;

/// Presence state of one terminal
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TerminalStatus {
    /// Terminal name
    pub terminal: String,
    /// Whether a card is inserted
    pub card_present: bool,
}

impl TerminalStatus {
    /// Status of `terminal`
    pub fn new(terminal: impl Into<String>, card_present: bool) -> Self {
        Self {
            terminal: terminal.into(),
            card_present,
        }
    }
}

/// Kind of a detected change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum StatusChangeKind {
    /// A terminal was attached
    #[display("TERMINAL_ADDED")]
    TerminalAdded,
    /// A terminal was detached
    #[display("TERMINAL_REMOVED")]
    TerminalRemoved,
    /// A card was inserted
    #[display("CARD_INSERTED")]
    CardInserted,
    /// A card was removed
    #[display("CARD_REMOVED")]
    CardRemoved,
}

/// One detected change
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusChange {
    /// Affected terminal
    pub terminal: String,
    /// What happened
    pub kind: StatusChangeKind,
}

/// Result of waiting for a change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A change was detected
    Changed(StatusChange),
    /// The timeout elapsed, carrying the current snapshot
    TimedOut(Vec<TerminalStatus>),
}

/// Poll presence of every terminal, or only of `only`
///
/// Transient card errors count as "no card". Any other backend error aborts the
/// sweep.
pub fn status_sweep(factory: &dyn TerminalFactory, only: Option<&str>) -> Result<Vec<TerminalStatus>> {
    let terminals = factory.list_terminals()?;
    if let Some(name) = only {
        if !terminals.iter().any(|t| t == name) {
            return Err(IfdError::NoSuchTerminal(name.to_string()));
        }
    }

    let mut statuses = Vec::with_capacity(terminals.len());
    for terminal in terminals {
        if only.is_some_and(|name| name != terminal) {
            continue;
        }
        let card_present = match factory.is_card_present(&terminal) {
            Ok(present) => present,
            Err(e) if e.code().is_some_and(|c| c.is_transient_card_state()) => {
                debug!(%terminal, error = %e, "Ignoring transient card state");
                false
            }
            Err(e) => return Err(e.with_terminal(terminal).into()),
        };
        statuses.push(TerminalStatus { terminal, card_present });
    }
    Ok(statuses)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatcherState {
    Uninitialized,
    Started,
    Terminated,
}

/// Stateful presence poller
pub struct EventWatcher {
    factory: Arc<dyn TerminalFactory>,
    poll_interval: Duration,
    state: WatcherState,
    current: BTreeMap<String, bool>,
    pending: VecDeque<StatusChange>,
}

impl std::fmt::Debug for EventWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWatcher")
            .field("state", &self.state)
            .field("current", &self.current)
            .field("pending", &self.pending)
            .finish()
    }
}

impl EventWatcher {
    /// Create a watcher that polls every `poll_interval`
    pub fn new(factory: Arc<dyn TerminalFactory>, poll_interval: Duration) -> Self {
        Self {
            factory,
            poll_interval,
            state: WatcherState::Uninitialized,
            current: BTreeMap::new(),
            pending: VecDeque::new(),
        }
    }

    /// Take the initial snapshot and return it
    pub fn start(&mut self) -> Result<Vec<TerminalStatus>> {
        let snapshot = status_sweep(self.factory.as_ref(), None)?;
        self.current = to_map(&snapshot);
        self.pending.clear();
        self.state = WatcherState::Started;
        trace!(terminals = snapshot.len(), "Event watcher started");
        Ok(snapshot)
    }

    /// Start from a caller supplied state instead of polling
    pub fn start_from(&mut self, expected: &[TerminalStatus]) {
        self.current = to_map(expected);
        self.pending.clear();
        self.state = WatcherState::Started;
    }

    /// Stop the watcher. Later waits fail.
    pub fn terminate(&mut self) {
        self.state = WatcherState::Terminated;
        self.pending.clear();
    }

    /// Last known state
    pub fn snapshot(&self) -> Vec<TerminalStatus> {
        self.current
            .iter()
            .map(|(terminal, present)| TerminalStatus::new(terminal.clone(), *present))
            .collect()
    }

    /// Block until the next change, `timeout` or cancellation of `token`
    ///
    /// `None` waits forever, a zero timeout is rejected.
    pub fn wait_for_change(
        &mut self,
        timeout: Option<Duration>,
        token: &CancellationToken,
    ) -> Result<WaitOutcome> {
        if self.state != WatcherState::Started {
            return Err(IfdError::IllegalState("event watcher is not started"));
        }
        if timeout.is_some_and(|t| t.is_zero()) {
            return Err(IfdError::InvalidTimeout);
        }
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        loop {
            if let Some(change) = self.pending.pop_front() {
                debug!(terminal = %change.terminal, kind = %change.kind, "Status change");
                return Ok(WaitOutcome::Changed(change));
            }
            token.check()?;

            let snapshot = status_sweep(self.factory.as_ref(), None)?;
            self.apply(to_map(&snapshot));
            if !self.pending.is_empty() {
                continue;
            }

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(WaitOutcome::TimedOut(self.snapshot()));
                    }
                    self.poll_interval.min(deadline - now)
                }
                None => self.poll_interval,
            };
            token.sleep(pause)?;
        }
    }

    fn apply(&mut self, next: BTreeMap<String, bool>) {
        let prev = std::mem::replace(&mut self.current, next);
        let next = &self.current;
        let mut push = |terminal: &String, kind| {
            self.pending.push_back(StatusChange {
                terminal: terminal.clone(),
                kind,
            });
        };

        for (terminal, _) in prev.iter().filter(|(_, present)| **present) {
            if next.get(terminal) != Some(&true) {
                push(terminal, StatusChangeKind::CardRemoved);
            }
        }
        for terminal in prev.keys().filter(|t| !next.contains_key(*t)) {
            push(terminal, StatusChangeKind::TerminalRemoved);
        }
        for terminal in next.keys().filter(|t| !prev.contains_key(*t)) {
            push(terminal, StatusChangeKind::TerminalAdded);
        }
        for (terminal, _) in next.iter().filter(|(_, present)| **present) {
            if prev.get(terminal) != Some(&true) {
                push(terminal, StatusChangeKind::CardInserted);
            }
        }
    }
}

fn to_map(statuses: &[TerminalStatus]) -> BTreeMap<String, bool> {
    statuses
        .iter()
        .map(|s| (s.terminal.clone(), s.card_present))
        .collect()
}
