//! In-memory terminals for tests
//!
//! [`MockTerminals`] implements [`TerminalFactory`] on top of a shared state
//! that tests mutate while the IFD is running: attach and detach terminals,
//! insert cards, script presence polls and inject backend errors.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::terminal::{CardConnection, ScardCode, TerminalError, TerminalFactory, TerminalResult};

type Responder = Arc<dyn Fn(&[u8]) -> Bytes + Send + Sync>;
type ControlResponder = Arc<dyn Fn(u32, &[u8]) -> TerminalResult<Bytes> + Send + Sync>;

/// A simulated card
#[derive(Clone)]
pub struct MockCard {
    atr: Bytes,
    responses: HashMap<Vec<u8>, Bytes>,
    responder: Option<Responder>,
    failing_reconnect: bool,
}

impl fmt::Debug for MockCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockCard")
            .field("atr", &hex::encode(&self.atr))
            .field("responses", &self.responses.len())
            .field("failing_reconnect", &self.failing_reconnect)
            .finish()
    }
}

impl MockCard {
    /// Card with the given ATR answering `90 00` to everything
    pub fn new(atr: impl AsRef<[u8]>) -> Self {
        Self {
            atr: Bytes::copy_from_slice(atr.as_ref()),
            responses: HashMap::new(),
            responder: None,
            failing_reconnect: false,
        }
    }

    /// Answer `command` with `response`
    pub fn with_response(mut self, command: impl AsRef<[u8]>, response: impl AsRef<[u8]>) -> Self {
        self.responses.insert(
            command.as_ref().to_vec(),
            Bytes::copy_from_slice(response.as_ref()),
        );
        self
    }

    /// Answer commands without a fixed response through `responder`
    pub fn with_responder(mut self, responder: impl Fn(&[u8]) -> Bytes + Send + Sync + 'static) -> Self {
        self.responder = Some(Arc::new(responder));
        self
    }

    /// Make in-place reconnects fail
    pub const fn with_failing_reconnect(mut self) -> Self {
        self.failing_reconnect = true;
        self
    }

    fn respond(&self, command: &[u8]) -> Bytes {
        if let Some(response) = self.responses.get(command) {
            return response.clone();
        }
        match &self.responder {
            Some(responder) => responder(command),
            None => Bytes::from_static(&[0x90, 0x00]),
        }
    }
}

#[derive(Default)]
struct MockTerminal {
    card: Option<MockCard>,
    script: VecDeque<bool>,
    status_error: Option<TerminalError>,
    features: Bytes,
    control: Option<ControlResponder>,
    connects: usize,
    resets: usize,
    transmitted: Vec<Bytes>,
    controls: Vec<(u32, Bytes)>,
    exclusive: Option<u64>,
}

#[derive(Default)]
struct State {
    terminals: BTreeMap<String, MockTerminal>,
}

/// Shared in-memory terminal backend
#[derive(Clone, Default)]
pub struct MockTerminals {
    state: Arc<Mutex<State>>,
    next_connection: Arc<AtomicU64>,
}

impl fmt::Debug for MockTerminals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.state.lock().terminals.keys())
            .finish()
    }
}

impl MockTerminals {
    /// Backend without terminals
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an empty terminal
    pub fn add_terminal(&self, name: &str) {
        self.state
            .lock()
            .terminals
            .entry(name.to_string())
            .or_default();
    }

    /// Detach a terminal together with its card
    pub fn remove_terminal(&self, name: &str) {
        self.state.lock().terminals.remove(name);
    }

    /// Insert `card` into `terminal`
    pub fn insert_card(&self, terminal: &str, card: MockCard) {
        self.with_terminal(terminal, |t| t.card = Some(card));
    }

    /// Remove the card from `terminal`
    pub fn remove_card(&self, terminal: &str) {
        self.with_terminal(terminal, |t| {
            t.card = None;
            t.exclusive = None;
        });
    }

    /// Answer the next presence polls of `terminal` from `presence`
    ///
    /// The last value repeats once the script is exhausted.
    pub fn script_presence(&self, terminal: &str, presence: impl IntoIterator<Item = bool>) {
        self.with_terminal(terminal, |t| t.script = presence.into_iter().collect());
    }

    /// Fail every presence poll of `terminal` with `error`
    pub fn fail_status(&self, terminal: &str, error: TerminalError) {
        self.with_terminal(terminal, |t| t.status_error = Some(error));
    }

    /// Stop failing presence polls of `terminal`
    pub fn clear_status_error(&self, terminal: &str) {
        self.with_terminal(terminal, |t| t.status_error = None);
    }

    /// Set the raw GET_FEATURE_REQUEST answer of `terminal`
    pub fn set_features(&self, terminal: &str, features: impl AsRef<[u8]>) {
        let features = Bytes::copy_from_slice(features.as_ref());
        self.with_terminal(terminal, |t| t.features = features);
    }

    /// Answer control commands on `terminal` through `responder`
    pub fn set_control_responder(
        &self,
        terminal: &str,
        responder: impl Fn(u32, &[u8]) -> TerminalResult<Bytes> + Send + Sync + 'static,
    ) {
        let responder: ControlResponder = Arc::new(responder);
        self.with_terminal(terminal, |t| t.control = Some(responder));
    }

    /// Number of connections opened to `terminal`
    pub fn connect_count(&self, terminal: &str) -> usize {
        self.read_terminal(terminal, |t| t.connects)
    }

    /// Number of card resets performed on `terminal`
    pub fn reset_count(&self, terminal: &str) -> usize {
        self.read_terminal(terminal, |t| t.resets)
    }

    /// Command APDUs sent to the card in `terminal`
    pub fn transmitted(&self, terminal: &str) -> Vec<Bytes> {
        self.read_terminal(terminal, |t| t.transmitted.clone())
    }

    /// Control commands sent to `terminal`
    pub fn controls(&self, terminal: &str) -> Vec<(u32, Bytes)> {
        self.read_terminal(terminal, |t| t.controls.clone())
    }

    /// Whether a connection holds exclusive access to `terminal`
    pub fn is_exclusive(&self, terminal: &str) -> bool {
        self.read_terminal(terminal, |t| t.exclusive.is_some())
    }

    fn with_terminal(&self, terminal: &str, f: impl FnOnce(&mut MockTerminal)) {
        if let Some(t) = self.state.lock().terminals.get_mut(terminal) {
            f(t);
        }
    }

    fn read_terminal<T: Default>(&self, terminal: &str, f: impl FnOnce(&MockTerminal) -> T) -> T {
        self.state
            .lock()
            .terminals
            .get(terminal)
            .map(f)
            .unwrap_or_default()
    }

    fn on_card<T>(
        &self,
        terminal: &str,
        f: impl FnOnce(&mut MockTerminal) -> TerminalResult<T>,
    ) -> TerminalResult<T> {
        let mut state = self.state.lock();
        let t = state
            .terminals
            .get_mut(terminal)
            .ok_or_else(|| TerminalError::new(ScardCode::ReaderUnavailable).with_terminal(terminal))?;
        if t.card.is_none() {
            return Err(TerminalError::new(ScardCode::RemovedCard).with_terminal(terminal));
        }
        f(t)
    }
}

impl TerminalFactory for MockTerminals {
    fn list_terminals(&self) -> TerminalResult<Vec<String>> {
        Ok(self.state.lock().terminals.keys().cloned().collect())
    }

    fn is_card_present(&self, terminal: &str) -> TerminalResult<bool> {
        let mut state = self.state.lock();
        let t = state
            .terminals
            .get_mut(terminal)
            .ok_or_else(|| TerminalError::new(ScardCode::UnknownReader).with_terminal(terminal))?;
        if let Some(error) = &t.status_error {
            return Err(error.clone());
        }
        let scripted = if t.script.len() > 1 {
            t.script.pop_front()
        } else {
            t.script.front().copied()
        };
        Ok(scripted.unwrap_or(t.card.is_some()))
    }

    fn connect(&self, terminal: &str) -> TerminalResult<Box<dyn CardConnection>> {
        let mut state = self.state.lock();
        let t = state
            .terminals
            .get_mut(terminal)
            .ok_or_else(|| TerminalError::new(ScardCode::UnknownReader).with_terminal(terminal))?;
        let card = t
            .card
            .as_ref()
            .ok_or_else(|| TerminalError::new(ScardCode::NoSmartcard).with_terminal(terminal))?;
        let atr = card.atr.clone();
        t.connects += 1;
        Ok(Box::new(MockConnection {
            terminals: self.clone(),
            terminal: terminal.to_string(),
            id: self.next_connection.fetch_add(1, Ordering::Relaxed),
            atr,
        }))
    }
}

struct MockConnection {
    terminals: MockTerminals,
    terminal: String,
    id: u64,
    atr: Bytes,
}

impl CardConnection for MockConnection {
    fn atr(&self) -> Bytes {
        self.atr.clone()
    }

    fn transmit(&mut self, command: &[u8]) -> TerminalResult<Bytes> {
        self.terminals.on_card(&self.terminal, |t| {
            t.transmitted.push(Bytes::copy_from_slice(command));
            Ok(t.card.as_ref().map(|c| c.respond(command)).unwrap_or_default())
        })
    }

    fn control(&mut self, code: u32, data: &[u8]) -> TerminalResult<Bytes> {
        let responder = self.terminals.on_card(&self.terminal, |t| {
            t.controls.push((code, Bytes::copy_from_slice(data)));
            Ok(t.control.clone())
        })?;
        match responder {
            Some(responder) => responder(code, data),
            None => Err(TerminalError::new(ScardCode::UnsupportedFeature)),
        }
    }

    fn feature_request(&mut self) -> TerminalResult<Bytes> {
        self.terminals.on_card(&self.terminal, |t| Ok(t.features.clone()))
    }

    fn begin_exclusive(&mut self) -> TerminalResult<()> {
        let id = self.id;
        self.terminals.on_card(&self.terminal, |t| match t.exclusive {
            Some(holder) if holder != id => Err(TerminalError::new(ScardCode::SharingViolation)),
            _ => {
                t.exclusive = Some(id);
                Ok(())
            }
        })
    }

    fn end_exclusive(&mut self) -> TerminalResult<()> {
        let id = self.id;
        self.terminals.on_card(&self.terminal, |t| {
            if t.exclusive == Some(id) {
                t.exclusive = None;
            }
            Ok(())
        })
    }

    fn reconnect(&mut self, reset: bool) -> TerminalResult<()> {
        self.terminals.on_card(&self.terminal, |t| {
            if t.card.as_ref().is_some_and(|c| c.failing_reconnect) {
                return Err(TerminalError::new(ScardCode::UnresponsiveCard));
            }
            t.exclusive = None;
            if reset {
                t.resets += 1;
            }
            Ok(())
        })
    }

    fn disconnect(self: Box<Self>, reset: bool) -> TerminalResult<()> {
        let id = self.id;
        self.terminals.on_card(&self.terminal, |t| {
            if t.exclusive == Some(id) {
                t.exclusive = None;
            }
            if reset {
                t.resets += 1;
            }
            Ok(())
        })
    }
}
