//! Channel management
//!
//! A master channel is the shared connection to the card in one terminal. Slave
//! channels are identified by a [`SlotHandle`], reference a master channel and
//! carry their own transaction flag and secure messaging layer. All channel
//! state is mutated through [`ChannelManager`].
//!
//! Locks are always taken slave first, master second.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use eidcard_apdu_core::{AcceptableStatus, Response};
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::error::{IfdError, Result};
use crate::features::{FEATURE_EXECUTE_PACE, FeatureCodes};
use crate::handle::SlotHandle;
use crate::pace::{self, PaceCapabilities, PaceFunction, PaceInput, PaceOutput};
use crate::protocol::{ApduChannel, ProtocolFactory, SecureChannelProtocol};
use crate::terminal::{CardConnection, ScardCode, TerminalError, TerminalFactory};

struct MasterChannel {
    terminal: String,
    connection: Option<Box<dyn CardConnection>>,
    features: Option<FeatureCodes>,
    pace: Option<PaceCapabilities>,
    exclusive_owner: Option<SlotHandle>,
}

impl MasterChannel {
    fn connection(&mut self) -> Result<&mut Box<dyn CardConnection>> {
        let terminal = &self.terminal;
        self.connection
            .as_mut()
            .ok_or_else(|| IfdError::NoCardPresent(terminal.clone()))
    }

    fn terminal_error(&self, err: TerminalError) -> IfdError {
        if err.terminal().is_some() {
            err.into()
        } else {
            err.with_terminal(self.terminal.clone()).into()
        }
    }

    fn feature_codes(&mut self) -> Result<FeatureCodes> {
        if let Some(features) = &self.features {
            return Ok(features.clone());
        }
        let features = match self.connection()?.feature_request() {
            Ok(raw) => FeatureCodes::parse(&raw),
            Err(e) if e.code() == Some(ScardCode::UnsupportedFeature) => FeatureCodes::default(),
            Err(e) => return Err(self.terminal_error(e)),
        };
        debug!(terminal = %self.terminal, features = ?features, "Read reader feature codes");
        self.features = Some(features.clone());
        Ok(features)
    }

    fn control(&mut self, code: u32, data: &[u8]) -> Result<Bytes> {
        trace!(terminal = %self.terminal, code = format_args!("{code:#010X}"), data = %hex::encode(data), "Control command");
        let result = self.connection()?.control(code, data);
        let response = result.map_err(|e| self.terminal_error(e))?;
        trace!(terminal = %self.terminal, response = %hex::encode(&response), "Control response");
        Ok(response)
    }

    fn pace_capabilities(&mut self) -> Result<PaceCapabilities> {
        if let Some(capabilities) = self.pace {
            return Ok(capabilities);
        }
        let capabilities = match self.feature_codes()?.get(FEATURE_EXECUTE_PACE) {
            Some(code) => {
                let request = pace::execute_pace_request(PaceFunction::GetReaderPaceCapabilities, &[])?;
                let response = self.control(code, &request)?;
                PaceCapabilities::parse(&pace::parse_execute_pace_response(&response)?)
            }
            None => PaceCapabilities::default(),
        };
        debug!(terminal = %self.terminal, bitmap = format_args!("{:#04x}", capabilities.bitmap()), "Read PACE capabilities");
        self.pace = Some(capabilities);
        Ok(capabilities)
    }

    fn check_owner(&self, slot: &SlotHandle) -> Result<()> {
        match &self.exclusive_owner {
            Some(owner) if owner != slot => {
                Err(IfdError::IllegalState("card is locked by another slot handle"))
            }
            _ => Ok(()),
        }
    }
}

impl ApduChannel for MasterChannel {
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes> {
        trace!(terminal = %self.terminal, command = %hex::encode(command), "Transmitting APDU");
        let result = self.connection()?.transmit(command);
        let response = result.map_err(|e| self.terminal_error(e))?;
        trace!(terminal = %self.terminal, response = %hex::encode(&response), "Received APDU");
        Ok(response)
    }
}

struct SlaveChannel {
    terminal: String,
    transacted: bool,
    secure_messaging: Option<Box<dyn SecureChannelProtocol>>,
}

/// Snapshot of a slave channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Slot handle of the channel
    pub slot: SlotHandle,
    /// Terminal the channel belongs to
    pub terminal: String,
    /// Whether the channel holds an exclusive transaction
    pub transacted: bool,
    /// URI of the active secure messaging protocol
    pub secure_messaging: Option<String>,
}

/// How a card reset was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// The connection was reset in place
    InPlace,
    /// The master channel was closed and opened again
    Reopened,
    /// Neither terminal nor card were available
    Unavailable,
}

/// Owner of all open channels of one context
pub struct ChannelManager {
    factory: Arc<dyn TerminalFactory>,
    handle_length: usize,
    masters: Mutex<HashMap<String, Arc<Mutex<MasterChannel>>>>,
    slaves: Mutex<HashMap<SlotHandle, Arc<Mutex<SlaveChannel>>>>,
}

impl fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelManager")
            .field("masters", &self.masters.lock().keys().collect::<Vec<_>>())
            .field("slaves", &self.slaves.lock().len())
            .finish()
    }
}

impl ChannelManager {
    /// Create a manager without open channels
    pub fn new(factory: Arc<dyn TerminalFactory>, handle_length: usize) -> Self {
        Self {
            factory,
            handle_length,
            masters: Mutex::new(HashMap::new()),
            slaves: Mutex::new(HashMap::new()),
        }
    }

    /// Terminal backend used by this manager
    pub fn factory(&self) -> &Arc<dyn TerminalFactory> {
        &self.factory
    }

    /// Open the shared connection to the card in `terminal`
    ///
    /// Opening an already open master channel is a no-op.
    pub fn open_master_channel(&self, terminal: &str) -> Result<()> {
        let mut masters = self.masters.lock();
        if masters.contains_key(terminal) {
            return Ok(());
        }

        let known = self.factory.list_terminals().map_err(IfdError::from)?;
        if !known.iter().any(|t| t == terminal) {
            return Err(IfdError::NoSuchTerminal(terminal.to_string()));
        }
        let present = self
            .factory
            .is_card_present(terminal)
            .map_err(|e| IfdError::from(e.with_terminal(terminal)))?;
        if !present {
            return Err(IfdError::NoCardPresent(terminal.to_string()));
        }

        let connection = self
            .factory
            .connect(terminal)
            .map_err(|e| IfdError::from(e.with_terminal(terminal)))?;
        debug!(terminal, atr = %hex::encode(connection.atr()), "Opened master channel");

        masters.insert(
            terminal.to_string(),
            Arc::new(Mutex::new(MasterChannel {
                terminal: terminal.to_string(),
                connection: Some(connection),
                features: None,
                pace: None,
                exclusive_owner: None,
            })),
        );
        Ok(())
    }

    /// Close the master channel of `terminal` and every slave channel using it
    pub fn close_master_channel(&self, terminal: &str) -> Result<()> {
        let slots: Vec<SlotHandle> = {
            let slaves = self.slaves.lock();
            slaves
                .iter()
                .filter(|(_, s)| s.lock().terminal == terminal)
                .map(|(slot, _)| slot.clone())
                .collect()
        };
        for slot in slots {
            self.close_slave_channel(&slot)?;
        }

        let master = self.masters.lock().remove(terminal);
        let Some(master) = master else {
            return Err(IfdError::NoSuchTerminal(terminal.to_string()));
        };
        let connection = master.lock().connection.take();
        if let Some(connection) = connection {
            if let Err(e) = connection.disconnect(false) {
                warn!(terminal, error = %e, "Failed to disconnect master channel");
            }
        }
        debug!(terminal, "Closed master channel");
        Ok(())
    }

    /// Open a new logical channel to the card in `terminal`
    pub fn open_slave_channel(&self, terminal: &str) -> Result<SlotHandle> {
        self.open_master_channel(terminal)?;

        let slot = SlotHandle::random(self.handle_length);
        self.slaves.lock().insert(
            slot.clone(),
            Arc::new(Mutex::new(SlaveChannel {
                terminal: terminal.to_string(),
                transacted: false,
                secure_messaging: None,
            })),
        );
        debug!(terminal, %slot, "Opened slave channel");
        Ok(slot)
    }

    /// Snapshot of the slave channel `slot`
    pub fn get_slave_channel(&self, slot: &SlotHandle) -> Result<ChannelInfo> {
        let slave = self.slave(slot)?;
        let slave = slave.lock();
        Ok(ChannelInfo {
            slot: slot.clone(),
            terminal: slave.terminal.clone(),
            transacted: slave.transacted,
            secure_messaging: slave
                .secure_messaging
                .as_ref()
                .map(|sm| sm.protocol_uri().to_string()),
        })
    }

    /// Close the slave channel `slot`, ending its transaction first
    pub fn close_slave_channel(&self, slot: &SlotHandle) -> Result<()> {
        let slave = self
            .slaves
            .lock()
            .remove(slot)
            .ok_or_else(|| IfdError::InvalidSlotHandle(slot.to_string()))?;
        let mut slave = slave.lock();

        if let Some(mut sm) = slave.secure_messaging.take() {
            if let Err(e) = sm.destroy() {
                warn!(%slot, error = %e, "Failed to destroy secure messaging");
            }
        }

        if slave.transacted {
            if let Some(master) = self.master(&slave.terminal) {
                let mut master = master.lock();
                if master.exclusive_owner.as_ref() == Some(slot) {
                    master.exclusive_owner = None;
                    if let Some(connection) = master.connection.as_mut() {
                        if let Err(e) = connection.end_exclusive() {
                            warn!(%slot, error = %e, "Failed to end transaction while closing channel");
                        }
                    }
                }
            }
            slave.transacted = false;
        }
        debug!(%slot, terminal = %slave.terminal, "Closed slave channel");
        Ok(())
    }

    /// Number of open slave channels
    pub fn slave_count(&self) -> usize {
        self.slaves.lock().len()
    }

    /// Acquire exclusive access for `slot`. Already transacted handles succeed.
    pub fn begin_exclusive(&self, slot: &SlotHandle) -> Result<()> {
        let slave = self.slave(slot)?;
        let mut slave = slave.lock();
        if slave.transacted {
            trace!(%slot, "Transaction already active");
            return Ok(());
        }

        let master = self.master_for(slot, &slave.terminal)?;
        let mut master = master.lock();
        master.check_owner(slot)?;
        let result = master.connection()?.begin_exclusive();
        result.map_err(|e| match master.terminal_error(e) {
            IfdError::Io(_) => IfdError::InvalidSlotHandle(slot.to_string()),
            other => other,
        })?;
        master.exclusive_owner = Some(slot.clone());
        slave.transacted = true;
        debug!(%slot, "Began exclusive transaction");
        Ok(())
    }

    /// Release exclusive access of `slot`
    pub fn end_exclusive(&self, slot: &SlotHandle) -> Result<()> {
        let slave = self.slave(slot)?;
        let mut slave = slave.lock();
        if !slave.transacted {
            return Err(IfdError::IllegalState("no transaction active on slot handle"));
        }

        let master = self.master_for(slot, &slave.terminal)?;
        let mut master = master.lock();
        master.exclusive_owner = None;
        slave.transacted = false;
        let result = master.connection()?.end_exclusive();
        result.map_err(|e| master.terminal_error(e))?;
        debug!(%slot, "Ended exclusive transaction");
        Ok(())
    }

    /// Send `command` on `slot` through its secure messaging layer
    ///
    /// Fails with [`IfdError::TransmitError`] when the status word is not in
    /// `acceptable`. An empty list accepts every status word.
    pub fn transmit(
        &self,
        slot: &SlotHandle,
        command: &[u8],
        acceptable: &[AcceptableStatus],
    ) -> Result<Response> {
        let slave = self.slave(slot)?;
        let mut slave = slave.lock();
        let master = self.master_for(slot, &slave.terminal)?;
        let mut master = master.lock();
        master.check_owner(slot)?;

        let raw = match slave.secure_messaging.as_mut() {
            Some(sm) => {
                let protected = sm.wrap(Bytes::copy_from_slice(command))?;
                let raw = master.transmit_raw(&protected)?;
                sm.unwrap(raw)?
            }
            None => master.transmit_raw(command)?,
        };

        let response = Response::from_bytes(&raw)?;
        let status = response.status();
        trace!(%slot, %status, description = status.description(), "Card status");
        if !response.is_acceptable(acceptable) {
            debug!(%slot, %status, "Status word not acceptable");
            return Err(IfdError::TransmitError {
                response: raw,
                status,
                accepted: Vec::new(),
            });
        }
        Ok(response)
    }

    /// Issue the reader control command `feature_code` on the terminal of `slot`
    pub fn transmit_control_command(&self, slot: &SlotHandle, feature_code: u32, data: &[u8]) -> Result<Bytes> {
        let slave = self.slave(slot)?;
        let slave = slave.lock();
        let master = self.master_for(slot, &slave.terminal)?;
        let mut master = master.lock();
        master.control(feature_code, data)
    }

    /// PC/SC part 10 features of the terminal of `slot`
    pub fn feature_codes(&self, slot: &SlotHandle) -> Result<FeatureCodes> {
        let slave = self.slave(slot)?;
        let slave = slave.lock();
        let master = self.master_for(slot, &slave.terminal)?;
        let mut master = master.lock();
        master.feature_codes()
    }

    /// PACE capabilities of the terminal of `slot`
    pub fn pace_capabilities(&self, slot: &SlotHandle) -> Result<PaceCapabilities> {
        let slave = self.slave(slot)?;
        let slave = slave.lock();
        let master = self.master_for(slot, &slave.terminal)?;
        let mut master = master.lock();
        master.pace_capabilities()
    }

    /// Feature codes of an open master channel
    pub fn terminal_features(&self, terminal: &str) -> Result<FeatureCodes> {
        let master = self
            .master(terminal)
            .ok_or_else(|| IfdError::NoSuchTerminal(terminal.to_string()))?;
        let mut master = master.lock();
        master.feature_codes()
    }

    /// PACE capabilities of an open master channel
    pub fn terminal_pace_capabilities(&self, terminal: &str) -> Result<PaceCapabilities> {
        let master = self
            .master(terminal)
            .ok_or_else(|| IfdError::NoSuchTerminal(terminal.to_string()))?;
        let mut master = master.lock();
        master.pace_capabilities()
    }

    /// Answer to reset of the card behind `slot`
    pub fn atr(&self, slot: &SlotHandle) -> Result<Bytes> {
        let slave = self.slave(slot)?;
        let slave = slave.lock();
        let master = self.master_for(slot, &slave.terminal)?;
        let mut master = master.lock();
        Ok(master.connection()?.atr())
    }

    /// Run PACE inside the reader of `slot`
    pub fn execute_native_pace(&self, slot: &SlotHandle, input: &PaceInput) -> Result<PaceOutput> {
        let slave = self.slave(slot)?;
        let slave = slave.lock();
        let master = self.master_for(slot, &slave.terminal)?;
        let mut master = master.lock();

        let code = master
            .feature_codes()?
            .get(FEATURE_EXECUTE_PACE)
            .ok_or(IfdError::IllegalState("terminal has no EXECUTE_PACE feature"))?;
        let request = pace::execute_pace_request(PaceFunction::EstablishPaceChannel, &input.to_establish_bytes()?)?;
        let response = master.control(code, &request)?;
        let data = pace::parse_execute_pace_response(&response).map_err(|e| match e {
            IfdError::NoCardPresent(_) => IfdError::NoCardPresent(master.terminal.clone()),
            other => other,
        })?;
        PaceOutput::parse_establish(&data)
    }

    /// Tear down a PACE channel inside the reader of `slot`
    pub fn destroy_native_pace(&self, slot: &SlotHandle) -> Result<()> {
        let slave = self.slave(slot)?;
        let slave = slave.lock();
        let master = self.master_for(slot, &slave.terminal)?;
        let mut master = master.lock();

        let code = master
            .feature_codes()?
            .get(FEATURE_EXECUTE_PACE)
            .ok_or(IfdError::IllegalState("terminal has no EXECUTE_PACE feature"))?;
        let request = pace::execute_pace_request(PaceFunction::DestroyPaceChannel, &[])?;
        let response = master.control(code, &request)?;
        pace::parse_execute_pace_response(&response).map(|_| ())
    }

    /// Establish a software protocol from `factory` on `slot`
    ///
    /// On success the protocol instance becomes the secure messaging layer of
    /// the channel, replacing any previous one.
    pub fn establish_software_protocol(
        &self,
        slot: &SlotHandle,
        factory: &dyn ProtocolFactory,
        input: &PaceInput,
    ) -> Result<PaceOutput> {
        let slave = self.slave(slot)?;
        let mut slave = slave.lock();
        let master = self.master_for(slot, &slave.terminal)?;
        let mut master = master.lock();
        master.check_owner(slot)?;

        let mut protocol = factory.create();
        let output = protocol.establish(&mut *master, input)?;
        if let Some(mut previous) = slave.secure_messaging.replace(protocol) {
            if let Err(e) = previous.destroy() {
                warn!(%slot, error = %e, "Failed to destroy replaced secure messaging");
            }
        }
        debug!(%slot, protocol = factory.protocol_uri(), "Installed secure messaging");
        Ok(output)
    }

    /// Remove the secure messaging layer of `slot`. Returns whether one was active.
    pub fn remove_secure_messaging(&self, slot: &SlotHandle) -> Result<bool> {
        let slave = self.slave(slot)?;
        let mut slave = slave.lock();
        match slave.secure_messaging.take() {
            Some(mut sm) => {
                if let Err(e) = sm.destroy() {
                    warn!(%slot, error = %e, "Failed to destroy secure messaging");
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Reset the card in `terminal`
    ///
    /// Tries an in-place reconnect first, then closes and reopens the master
    /// channel. A missing terminal or card is logged but not treated as a
    /// failure.
    pub fn reset_card(&self, terminal: &str) -> Result<ResetOutcome> {
        let reconnected = match self.master(terminal) {
            Some(master) => {
                let mut master = master.lock();
                master.exclusive_owner = None;
                master.pace = None;
                match master.connection.as_mut().map(|c| c.reconnect(true)) {
                    Some(Ok(())) => true,
                    Some(Err(e)) => {
                        debug!(terminal, error = %e, "In-place reconnect failed");
                        false
                    }
                    None => false,
                }
            }
            None => false,
        };
        self.drop_secure_messaging_of(terminal);

        if reconnected {
            debug!(terminal, "Card reset in place");
            return Ok(ResetOutcome::InPlace);
        }

        if let Some(master) = self.masters.lock().remove(terminal) {
            let connection = master.lock().connection.take();
            if let Some(connection) = connection {
                if let Err(e) = connection.disconnect(true) {
                    debug!(terminal, error = %e, "Disconnect with reset failed");
                }
            }
        }

        match self.open_master_channel(terminal) {
            Ok(()) => {
                debug!(terminal, "Card reset by reopening the master channel");
                Ok(ResetOutcome::Reopened)
            }
            Err(IfdError::NoSuchTerminal(_) | IfdError::NoCardPresent(_)) => {
                error!(terminal, "No terminal or card present to reset");
                Ok(ResetOutcome::Unavailable)
            }
            Err(e) => Err(e),
        }
    }

    fn drop_secure_messaging_of(&self, terminal: &str) {
        let slaves: Vec<_> = self
            .slaves
            .lock()
            .iter()
            .map(|(slot, slave)| (slot.clone(), Arc::clone(slave)))
            .collect();
        for (slot, slave) in slaves {
            let mut slave = slave.lock();
            if slave.terminal != terminal {
                continue;
            }
            slave.transacted = false;
            if let Some(mut sm) = slave.secure_messaging.take() {
                if let Err(e) = sm.destroy() {
                    warn!(%slot, error = %e, "Failed to destroy secure messaging");
                }
            }
        }
    }

    /// Close every channel
    pub fn close_all(&self) {
        let slaves: Vec<_> = self.slaves.lock().drain().collect();
        for (slot, slave) in slaves {
            if let Some(mut sm) = slave.lock().secure_messaging.take() {
                if let Err(e) = sm.destroy() {
                    warn!(%slot, error = %e, "Failed to destroy secure messaging");
                }
            }
        }

        let masters: Vec<_> = self.masters.lock().drain().collect();
        for (terminal, master) in masters {
            let mut master = master.lock();
            if master.exclusive_owner.take().is_some() {
                if let Some(connection) = master.connection.as_mut() {
                    if let Err(e) = connection.end_exclusive() {
                        warn!(%terminal, error = %e, "Failed to end exclusive access");
                    }
                }
            }
            if let Some(connection) = master.connection.take() {
                if let Err(e) = connection.disconnect(false) {
                    warn!(%terminal, error = %e, "Failed to disconnect master channel");
                }
            }
        }
        debug!("Closed all channels");
    }

    fn slave(&self, slot: &SlotHandle) -> Result<Arc<Mutex<SlaveChannel>>> {
        self.slaves
            .lock()
            .get(slot)
            .cloned()
            .ok_or_else(|| IfdError::InvalidSlotHandle(slot.to_string()))
    }

    fn master(&self, terminal: &str) -> Option<Arc<Mutex<MasterChannel>>> {
        self.masters.lock().get(terminal).cloned()
    }

    fn master_for(&self, slot: &SlotHandle, terminal: &str) -> Result<Arc<Mutex<MasterChannel>>> {
        self.master(terminal)
            .ok_or_else(|| IfdError::InvalidSlotHandle(slot.to_string()))
    }
}
