//! Background terminal event publication
//!
//! The [`EventManager`] of a context starts polling on the first subscription
//! and publishes every detected change to all subscribers. Card resets done by
//! the channel manager are published through it as well.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::cancel::CancellationToken;
use crate::error::{IfdError, Result};
use crate::pool::WorkerPool;
use crate::terminal::TerminalFactory;
use crate::watcher::{EventWatcher, StatusChange, StatusChangeKind, WaitOutcome};

/// Event published to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IfdEvent {
    /// A terminal was attached
    TerminalAdded(String),
    /// A terminal was detached
    TerminalRemoved(String),
    /// A card was inserted
    CardInserted(String),
    /// A card was removed
    CardRemoved(String),
    /// The card in the terminal was reset
    CardReset(String),
}

impl IfdEvent {
    /// Terminal the event refers to
    pub fn terminal(&self) -> &str {
        match self {
            Self::TerminalAdded(t)
            | Self::TerminalRemoved(t)
            | Self::CardInserted(t)
            | Self::CardRemoved(t)
            | Self::CardReset(t) => t,
        }
    }
}

impl From<StatusChange> for IfdEvent {
    fn from(change: StatusChange) -> Self {
        match change.kind {
            StatusChangeKind::TerminalAdded => Self::TerminalAdded(change.terminal),
            StatusChangeKind::TerminalRemoved => Self::TerminalRemoved(change.terminal),
            StatusChangeKind::CardInserted => Self::CardInserted(change.terminal),
            StatusChangeKind::CardRemoved => Self::CardRemoved(change.terminal),
        }
    }
}

type Subscribers = Arc<Mutex<Vec<Sender<IfdEvent>>>>;

/// Publisher of terminal events for one context
pub struct EventManager {
    factory: Arc<dyn TerminalFactory>,
    pool: Arc<WorkerPool>,
    poll_interval: Duration,
    subscribers: Subscribers,
    running: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("subscribers", &self.subscribers.lock().len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl EventManager {
    /// Create a stopped manager polling on `pool`
    pub fn new(factory: Arc<dyn TerminalFactory>, pool: Arc<WorkerPool>, poll_interval: Duration) -> Self {
        Self {
            factory,
            pool,
            poll_interval,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            running: Mutex::new(None),
        }
    }

    /// Register a subscriber, starting the poller if needed
    pub fn subscribe(&self) -> Result<Receiver<IfdEvent>> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        self.start()?;
        Ok(rx)
    }

    /// Whether the poller is running
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|token| !token.is_cancelled()) {
            return Ok(());
        }

        let token = CancellationToken::new();
        let mut watcher = EventWatcher::new(Arc::clone(&self.factory), self.poll_interval);
        let subscribers = Arc::clone(&self.subscribers);
        let job_token = token.clone();
        let poll_interval = self.poll_interval;

        self.pool.execute(token.clone(), move || {
            if let Err(e) = watcher.start() {
                warn!(error = %e, "Event manager failed to take the initial snapshot");
                return;
            }
            debug!("Event manager started");
            loop {
                match watcher.wait_for_change(None, &job_token) {
                    Ok(WaitOutcome::Changed(change)) => publish_to(&subscribers, change.into()),
                    Ok(WaitOutcome::TimedOut(_)) => {}
                    Err(IfdError::CancellationByUser | IfdError::SessionTerminated) => break,
                    Err(e) => {
                        warn!(error = %e, "Event manager poll failed");
                        if job_token.sleep(poll_interval).is_err() {
                            break;
                        }
                    }
                }
            }
            watcher.terminate();
            debug!("Event manager stopped");
        })?;
        *running = Some(token);
        Ok(())
    }

    /// Send `event` to every live subscriber
    pub fn publish(&self, event: IfdEvent) {
        publish_to(&self.subscribers, event);
    }

    /// Stop polling and drop all subscribers
    pub fn terminate(&self) {
        if let Some(token) = self.running.lock().take() {
            token.cancel();
        }
        self.subscribers.lock().clear();
    }
}

fn publish_to(subscribers: &Subscribers, event: IfdEvent) {
    let mut subscribers = subscribers.lock();
    trace!(?event, subscribers = subscribers.len(), "Publishing event");
    subscribers.retain(|tx| tx.send(event.clone()).is_ok());
}
