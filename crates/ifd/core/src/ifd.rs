//! The interface device facade
//!
//! [`Ifd`] exposes the ISO/IEC 24727 IFD operations on top of a terminal
//! backend: context management, terminal status and waits, card connections,
//! APDU transmission and secure channel establishment.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, bounded};
use eidcard_apdu_core::{AcceptableStatus, Command, StatusWord};
use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancellationToken;
use crate::channel::ResetOutcome;
use crate::config::IfdConfig;
use crate::context::{ActiveContext, ContextRegistry};
use crate::error::{IfdError, Result};
use crate::events::IfdEvent;
use crate::features::FeatureCodes;
use crate::handle::{ContextHandle, SessionId, SlotHandle};
use crate::pace::{PaceCapabilities, PaceCapability, PaceInput, PaceOutput};
use crate::protocol::{ProtocolFactories, ProtocolFactory};
use crate::terminal::{TerminalError, TerminalFactory};
use crate::watcher::{EventWatcher, TerminalStatus, WaitOutcome, status_sweep};

/// Protocol URI of the PIN compare protocol every terminal supports
pub const PIN_COMPARE_PROTOCOL_URI: &str = "urn:oid:1.3.162.15480.3.0.9";

/// Action performed on the card when disconnecting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisconnectAction {
    /// Leave the card as it is
    #[default]
    Leave,
    /// Reset the card
    Reset,
}

/// One command of a transmit batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputApdu {
    /// Encoded command APDU
    pub command: Bytes,
    /// Accepted status codes: one byte matches SW1, two bytes the status word.
    /// An empty list accepts everything.
    pub acceptable: Vec<Bytes>,
}

impl InputApdu {
    /// Command accepting every status word
    pub fn new(command: impl Into<Bytes>) -> Self {
        Self {
            command: command.into(),
            acceptable: Vec::new(),
        }
    }

    /// Add an accepted status code
    pub fn accept(mut self, code: impl Into<Bytes>) -> Self {
        self.acceptable.push(code.into());
        self
    }

    fn acceptable(&self) -> Result<Vec<AcceptableStatus>> {
        self.acceptable
            .iter()
            .map(|code| {
                AcceptableStatus::from_bytes(code).map_err(|_| {
                    IfdError::InvalidParameter(format!(
                        "acceptable status code of {} bytes",
                        code.len()
                    ))
                })
            })
            .collect()
    }
}

/// Parameters of a wait
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitRequest {
    /// Maximum time to wait. `None` uses the configured default.
    pub timeout: Option<Duration>,
    /// State to detect changes against instead of the current one
    pub expected: Vec<TerminalStatus>,
}

impl WaitRequest {
    /// Wait with the configured default timeout
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait at most `timeout`
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Detect changes against `expected`
    pub fn with_expected(mut self, expected: Vec<TerminalStatus>) -> Self {
        self.expected = expected;
        self
    }
}

/// What [`Ifd::cancel`] cancels
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelTarget {
    /// An asynchronous wait
    Session(SessionId),
    /// The synchronous wait watching this terminal
    Terminal(String),
}

/// Capabilities of one terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdCapabilities {
    /// Terminal name
    pub terminal: String,
    /// Whether a card is inserted
    pub card_present: bool,
    /// PC/SC part 10 features, empty without a card
    pub features: FeatureCodes,
    /// Native PACE capabilities
    pub pace: PaceCapabilities,
    /// Protocol URIs usable on this terminal
    pub protocols: Vec<String>,
}

/// ISO/IEC 24727 interface device
pub struct Ifd {
    registry: ContextRegistry,
    protocols: RwLock<ProtocolFactories>,
}

impl std::fmt::Debug for Ifd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ifd")
            .field("registry", &self.registry)
            .field("protocols", &*self.protocols.read())
            .finish()
    }
}

impl Ifd {
    /// Create an IFD over `factory`
    pub fn new(factory: Arc<dyn TerminalFactory>, config: IfdConfig) -> Self {
        Self {
            registry: ContextRegistry::new(factory, config),
            protocols: RwLock::new(ProtocolFactories::new()),
        }
    }

    /// Register a software protocol. Returns `false` if its URI is taken.
    pub fn register_protocol(&self, factory: Arc<dyn ProtocolFactory>) -> bool {
        let uri = factory.protocol_uri().to_string();
        self.protocols.write().register(uri, factory)
    }

    /// URIs of all registered software protocols
    pub fn registered_protocols(&self) -> Vec<String> {
        self.protocols.read().list()
    }

    /// Establish or join the context
    pub fn establish_context(&self) -> ContextHandle {
        self.registry.establish()
    }

    /// Release one client of the context
    pub fn release_context(&self, ctx: &ContextHandle) -> Result<()> {
        self.registry.release(ctx)
    }

    /// Number of clients of the context
    pub fn client_count(&self) -> usize {
        self.registry.client_count()
    }

    /// Names of all attached terminals
    pub fn list_ifds(&self, ctx: &ContextHandle) -> Result<Vec<String>> {
        self.registry.get(ctx)?;
        Ok(self.registry.factory().list_terminals()?)
    }

    /// Presence state of every terminal, or only of `ifd`
    pub fn get_status(&self, ctx: &ContextHandle, ifd: Option<&str>) -> Result<Vec<TerminalStatus>> {
        self.registry.get(ctx)?;
        status_sweep(self.registry.factory().as_ref(), ifd)
    }

    /// Capabilities of terminal `ifd`
    #[instrument(skip(self, ctx))]
    pub fn get_ifd_capabilities(&self, ctx: &ContextHandle, ifd: &str) -> Result<IfdCapabilities> {
        let context = self.registry.get(ctx)?;
        let card_present = status_sweep(self.registry.factory().as_ref(), Some(ifd))?
            .first()
            .is_some_and(|s| s.card_present);

        let (features, pace) = if card_present {
            context.channels.open_master_channel(ifd)?;
            (
                context.channels.terminal_features(ifd)?,
                context.channels.terminal_pace_capabilities(ifd)?,
            )
        } else {
            (FeatureCodes::default(), PaceCapabilities::default())
        };

        let mut protocols = pace.protocols();
        for uri in self.registered_protocols() {
            if !protocols.contains(&uri) {
                protocols.push(uri);
            }
        }
        protocols.push(PIN_COMPARE_PROTOCOL_URI.to_string());

        Ok(IfdCapabilities {
            terminal: ifd.to_string(),
            card_present,
            features,
            pace,
            protocols,
        })
    }

    /// Connect to the card in `ifd`, optionally beginning a transaction
    #[instrument(skip(self, ctx))]
    pub fn connect(&self, ctx: &ContextHandle, ifd: &str, exclusive: bool) -> Result<SlotHandle> {
        let context = self.registry.get(ctx)?;
        let slot = context.channels.open_slave_channel(ifd)?;
        if exclusive {
            if let Err(e) = context.channels.begin_exclusive(&slot) {
                warn!(%slot, error = %e, "Exclusive connect failed");
                context.channels.close_slave_channel(&slot)?;
                return Err(e);
            }
        }
        info!(%slot, ifd, exclusive, "Connected to card");
        Ok(slot)
    }

    /// Close `slot`, ending its transaction and performing `action`
    #[instrument(skip(self))]
    pub fn disconnect(&self, slot: &SlotHandle, action: DisconnectAction) -> Result<()> {
        let context = self.context_of(slot)?;
        let info = context.channels.get_slave_channel(slot)?;
        if info.transacted {
            if let Err(e) = context.channels.end_exclusive(slot) {
                warn!(%slot, error = %e, "Failed to end transaction on disconnect");
            }
        }
        context.channels.close_slave_channel(slot)?;

        if action == DisconnectAction::Reset
            && context.channels.reset_card(&info.terminal)? == ResetOutcome::Reopened
        {
            context.events.publish(IfdEvent::CardReset(info.terminal.clone()));
        }
        info!(%slot, terminal = %info.terminal, ?action, "Disconnected");
        Ok(())
    }

    /// Acquire exclusive access for `slot`
    pub fn begin_transaction(&self, slot: &SlotHandle) -> Result<()> {
        self.context_of(slot)?.channels.begin_exclusive(slot)
    }

    /// Release exclusive access of `slot`
    pub fn end_transaction(&self, slot: &SlotHandle) -> Result<()> {
        self.context_of(slot)?.channels.end_exclusive(slot)
    }

    /// Send a batch of commands on `slot`
    ///
    /// Stops at the first response with an unacceptable status word. The
    /// returned [`IfdError::TransmitError`] carries the responses accepted
    /// before it.
    pub fn transmit(&self, slot: &SlotHandle, commands: &[InputApdu]) -> Result<Vec<Bytes>> {
        let context = self.context_of(slot)?;
        let mut responses = Vec::with_capacity(commands.len());

        for input in commands {
            let acceptable = input.acceptable()?;
            if Command::from_bytes(&input.command)?.is_manage_channel() {
                warn!(%slot, "Refusing MANAGE CHANNEL command");
                return Err(IfdError::InvalidSlotHandle(slot.to_string()));
            }

            match context.channels.transmit(slot, &input.command, &acceptable) {
                Ok(response) => responses.push(response.to_bytes()),
                Err(IfdError::TransmitError { response, status, .. }) => {
                    return Err(IfdError::TransmitError {
                        response,
                        status,
                        accepted: responses,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(responses)
    }

    /// Issue a reader control command on the terminal of `slot`
    ///
    /// The first byte of `command` selects the PC/SC feature, the rest is
    /// sent to its control code.
    pub fn control_ifd(&self, slot: &SlotHandle, command: &[u8]) -> Result<Bytes> {
        let context = self.context_of(slot)?;
        let [tag, data @ ..] = command else {
            return Err(IfdError::InvalidParameter("empty control command".to_string()));
        };
        let code = context
            .channels
            .feature_codes(slot)?
            .get(*tag)
            .ok_or_else(|| IfdError::InvalidParameter(format!("feature {tag:#04x} not supported")))?;

        let response = context.channels.transmit_control_command(slot, code, data)?;
        let status = match response.as_ref() {
            [.., sw1, sw2] => StatusWord::new(*sw1, *sw2),
            _ => {
                return Err(IfdError::Io(TerminalError::message(
                    "control response without result code",
                )));
            }
        };
        match status.to_u16() {
            0x9000 => Ok(response),
            0x6400 => Err(IfdError::Timeout),
            _ => Err(IfdError::Io(TerminalError::message(format!(
                "control command failed with {status}"
            )))),
        }
    }

    /// Block until a terminal or card change, the timeout or cancellation
    pub fn wait(&self, ctx: &ContextHandle, request: WaitRequest) -> Result<WaitOutcome> {
        let context = self.registry.get(ctx)?;
        let timeout = self.checked_timeout(&request)?;
        let mut watcher = self.start_watcher(&request)?;

        let token = CancellationToken::new();
        let interest = request.expected.iter().map(|s| s.terminal.clone()).collect();
        let id = context.waits.add_sync(interest, token.clone());

        let (tx, rx) = bounded(1);
        let job_token = token.clone();
        let scheduled = context.pool.execute(token, move || {
            let _ = tx.send(watcher.wait_for_change(timeout, &job_token));
        });
        let outcome = scheduled.and_then(|()| rx.recv().map_err(|_| IfdError::SessionTerminated)?);
        context.waits.remove_sync(id);
        outcome
    }

    /// Start a wait whose outcome is sent to `callback`
    ///
    /// Returns the session id to cancel the wait with.
    pub fn wait_async(
        &self,
        ctx: &ContextHandle,
        request: WaitRequest,
        callback: Sender<Result<WaitOutcome>>,
    ) -> Result<SessionId> {
        let context = self.registry.get(ctx)?;
        let timeout = self.checked_timeout(&request)?;
        let mut watcher = self.start_watcher(&request)?;

        let session = SessionId::random(self.registry.config().handle_length);
        let token = CancellationToken::new();
        context.waits.add_session(session.clone(), token.clone());

        let waits = Arc::clone(&context.waits);
        let job_session = session.clone();
        let job_token = token.clone();
        let scheduled = context.pool.execute(token, move || {
            let outcome = watcher.wait_for_change(timeout, &job_token);
            waits.remove_session(&job_session);
            if callback.send(outcome).is_err() {
                debug!(session = %job_session, "Wait callback dropped");
            }
        });
        if let Err(e) = scheduled {
            context.waits.remove_session(&session);
            return Err(e);
        }
        debug!(%session, "Started asynchronous wait");
        Ok(session)
    }

    /// Cancel a pending wait
    pub fn cancel(&self, ctx: &ContextHandle, target: &CancelTarget) -> Result<()> {
        let context = self.registry.get(ctx)?;
        match target {
            CancelTarget::Session(session) => match context.waits.remove_session(session) {
                Some(token) => {
                    token.cancel();
                    debug!(%session, "Cancelled asynchronous wait");
                    Ok(())
                }
                None => Err(IfdError::CancelNotPossible(format!(
                    "no wait pending for session {session}"
                ))),
            },
            CancelTarget::Terminal(terminal) => {
                if !self.registry.factory().list_terminals()?.contains(terminal) {
                    return Err(IfdError::CancelNotPossible(format!("unknown terminal {terminal}")));
                }
                if context.waits.cancel_sync(terminal) {
                    debug!(terminal, "Cancelled synchronous wait");
                    Ok(())
                } else {
                    Err(IfdError::CancelNotPossible(
                        "no synchronous wait to cancel".to_string(),
                    ))
                }
            }
        }
    }

    /// Receive terminal events of the context
    pub fn subscribe(&self, ctx: &ContextHandle) -> Result<Receiver<IfdEvent>> {
        self.registry.get(ctx)?.events.subscribe()
    }

    /// Establish the secure channel `protocol` on `slot`
    ///
    /// A terminal that implements the protocol natively runs it itself and a
    /// native failure is final. Otherwise a registered software protocol is
    /// installed as the channel's secure messaging layer.
    #[instrument(skip(self, input), fields(password = %input.password_id))]
    pub fn establish_channel(&self, slot: &SlotHandle, protocol: &str, input: &PaceInput) -> Result<PaceOutput> {
        if protocol.is_empty() {
            return Err(IfdError::InvalidParameter("empty protocol URI".to_string()));
        }
        let context = self.context_of(slot)?;
        let capabilities = context.channels.pace_capabilities(slot)?;

        let native = capabilities
            .protocols()
            .first()
            .is_some_and(|uri| uri.starts_with(protocol));
        if capabilities.supports_pace() && native && input.is_supported_by(capabilities) {
            info!(%slot, "Establishing PACE in the terminal");
            return context.channels.execute_native_pace(slot, input);
        }

        let factory = self.protocols.read().get(protocol);
        match factory {
            Some(factory) => {
                info!(%slot, protocol, "Establishing software protocol");
                context
                    .channels
                    .establish_software_protocol(slot, factory.as_ref(), input)
            }
            None => Err(IfdError::UnknownProtocol(protocol.to_string())),
        }
    }

    /// Tear down the secure channel of `slot`
    ///
    /// The secure messaging layer is always removed. Fails only if the
    /// terminal reported an error destroying its native channel.
    pub fn destroy_channel(&self, slot: &SlotHandle) -> Result<()> {
        let context = self.context_of(slot)?;
        let capabilities = context.channels.pace_capabilities(slot)?;
        let native = if capabilities.contains(PaceCapability::DestroyPaceChannel) {
            context.channels.destroy_native_pace(slot)
        } else {
            Ok(())
        };
        context.channels.remove_secure_messaging(slot)?;
        native
    }

    fn context_of(&self, slot: &SlotHandle) -> Result<Arc<ActiveContext>> {
        self.registry
            .current()
            .ok_or_else(|| IfdError::InvalidSlotHandle(slot.to_string()))
    }

    fn checked_timeout(&self, request: &WaitRequest) -> Result<Option<Duration>> {
        let timeout = request.timeout.or(self.registry.config().default_wait_timeout);
        if timeout.is_some_and(|t| t.is_zero()) {
            return Err(IfdError::InvalidTimeout);
        }
        Ok(timeout)
    }

    fn start_watcher(&self, request: &WaitRequest) -> Result<EventWatcher> {
        let mut watcher = EventWatcher::new(
            Arc::clone(self.registry.factory()),
            self.registry.config().poll_interval,
        );
        if request.expected.is_empty() {
            watcher.start()?;
        } else {
            watcher.start_from(&request.expected);
        }
        Ok(watcher)
    }
}
