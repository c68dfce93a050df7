//! Reference counted IFD context
//!
//! All clients of one [`ContextRegistry`] share a single context. The first
//! establish allocates the handle, channel manager, worker pool and event
//! manager; the last release tears them down.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::cancel::{CancelReason, CancellationToken};
use crate::channel::ChannelManager;
use crate::config::IfdConfig;
use crate::error::{IfdError, Result};
use crate::events::EventManager;
use crate::handle::{ContextHandle, SessionId};
use crate::pool::WorkerPool;
use crate::terminal::TerminalFactory;

/// Outstanding waits of a context
#[derive(Debug, Default)]
pub(crate) struct WaitSessions {
    next_sync: AtomicU64,
    sync: Mutex<HashMap<u64, (Vec<String>, CancellationToken)>>,
    sessions: Mutex<HashMap<SessionId, CancellationToken>>,
}

impl WaitSessions {
    pub(crate) fn add_sync(&self, terminals: Vec<String>, token: CancellationToken) -> u64 {
        let id = self.next_sync.fetch_add(1, Ordering::Relaxed);
        self.sync.lock().insert(id, (terminals, token));
        id
    }

    pub(crate) fn remove_sync(&self, id: u64) {
        self.sync.lock().remove(&id);
    }

    /// Cancel synchronous waits watching `terminal`. Waits without a terminal
    /// list watch every terminal.
    pub(crate) fn cancel_sync(&self, terminal: &str) -> bool {
        let sync = self.sync.lock();
        let mut cancelled = false;
        for (terminals, token) in sync.values() {
            if terminals.is_empty() || terminals.iter().any(|t| t == terminal) {
                token.cancel();
                cancelled = true;
            }
        }
        cancelled
    }

    pub(crate) fn add_session(&self, id: SessionId, token: CancellationToken) {
        self.sessions.lock().insert(id, token);
    }

    pub(crate) fn remove_session(&self, id: &SessionId) -> Option<CancellationToken> {
        self.sessions.lock().remove(id)
    }

    fn cancel_all(&self) {
        for (_, (_, token)) in self.sync.lock().drain() {
            token.cancel_with(CancelReason::Teardown);
        }
        for (_, token) in self.sessions.lock().drain() {
            token.cancel_with(CancelReason::Teardown);
        }
    }
}

/// Resources of the established context
#[derive(Debug)]
pub(crate) struct ActiveContext {
    pub(crate) handle: ContextHandle,
    pub(crate) channels: Arc<ChannelManager>,
    pub(crate) pool: Arc<WorkerPool>,
    pub(crate) events: Arc<EventManager>,
    pub(crate) waits: Arc<WaitSessions>,
}

impl ActiveContext {
    fn teardown(&self) {
        self.waits.cancel_all();
        self.pool.shutdown();
        self.events.terminate();
        self.channels.close_all();
    }
}

/// Owner of the shared context
pub struct ContextRegistry {
    factory: Arc<dyn TerminalFactory>,
    config: IfdConfig,
    active: Mutex<Option<Arc<ActiveContext>>>,
    clients: AtomicUsize,
}

impl std::fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextRegistry")
            .field("active", &self.active.lock().as_ref().map(|c| c.handle.clone()))
            .field("clients", &self.client_count())
            .finish()
    }
}

impl ContextRegistry {
    /// Create a registry without an established context
    pub fn new(factory: Arc<dyn TerminalFactory>, config: IfdConfig) -> Self {
        Self {
            factory,
            config,
            active: Mutex::new(None),
            clients: AtomicUsize::new(0),
        }
    }

    /// Establish the context, or join the existing one
    pub fn establish(&self) -> ContextHandle {
        let mut active = self.active.lock();
        let context = active.get_or_insert_with(|| {
            let handle = ContextHandle::random(self.config.handle_length);
            let pool = Arc::new(WorkerPool::new(
                self.config.max_workers,
                self.config.worker_keep_alive,
            ));
            info!(%handle, "Established IFD context");
            Arc::new(ActiveContext {
                channels: Arc::new(ChannelManager::new(
                    Arc::clone(&self.factory),
                    self.config.handle_length,
                )),
                events: Arc::new(EventManager::new(
                    Arc::clone(&self.factory),
                    Arc::clone(&pool),
                    self.config.poll_interval,
                )),
                pool,
                waits: Arc::new(WaitSessions::default()),
                handle,
            })
        });
        let clients = self.clients.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(handle = %context.handle, clients, "Context client added");
        context.handle.clone()
    }

    /// Drop one client of `handle`. The last release tears the context down.
    pub fn release(&self, handle: &ContextHandle) -> Result<()> {
        let mut active = self.active.lock();
        match active.as_ref() {
            Some(context) if context.handle == *handle => {}
            _ => return Err(IfdError::InvalidContextHandle),
        }

        let clients = self.clients.fetch_sub(1, Ordering::AcqRel) - 1;
        debug!(%handle, clients, "Context client released");
        if clients == 0 {
            if let Some(context) = active.take() {
                context.teardown();
                info!(%handle, "Released IFD context");
            }
        }
        Ok(())
    }

    /// Resources of the context named by `handle`
    pub(crate) fn get(&self, handle: &ContextHandle) -> Result<Arc<ActiveContext>> {
        self.active
            .lock()
            .as_ref()
            .filter(|context| context.handle == *handle)
            .cloned()
            .ok_or(IfdError::InvalidContextHandle)
    }

    /// Resources of the established context, if any
    pub(crate) fn current(&self) -> Option<Arc<ActiveContext>> {
        self.active.lock().clone()
    }

    /// Number of clients of the current context
    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Acquire)
    }

    /// Whether a context is established
    pub fn is_established(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Terminal backend shared by the context
    pub fn factory(&self) -> &Arc<dyn TerminalFactory> {
        &self.factory
    }

    /// Configuration of the context
    pub const fn config(&self) -> &IfdConfig {
        &self.config
    }
}

impl Drop for ContextRegistry {
    fn drop(&mut self) {
        if let Some(context) = self.active.get_mut().take() {
            context.teardown();
        }
    }
}
