//! Terminal factory over a PC/SC context

use std::ffi::CString;
use std::fmt;

use eidcard_ifd::{CardConnection, ScardCode, TerminalError, TerminalFactory, TerminalResult};
use pcsc::{Context, ReaderState, Scope, State};
use tracing::{debug, trace};

use crate::config::PcscBackendConfig;
use crate::connection::PcscConnection;
use crate::error::PcscError;

/// Terminals known to the PC/SC resource manager
pub struct PcscTerminals {
    context: Context,
    config: PcscBackendConfig,
}

impl fmt::Debug for PcscTerminals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscTerminals")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PcscTerminals {
    /// Establish a user scope PC/SC context
    pub fn new() -> Result<Self, PcscError> {
        Self::with_config(PcscBackendConfig::default())
    }

    /// Establish a user scope PC/SC context using `config` for connections
    pub fn with_config(config: PcscBackendConfig) -> Result<Self, PcscError> {
        let context = Context::establish(Scope::User)?;
        debug!("Established PC/SC context");
        Ok(Self { context, config })
    }

    /// Configuration used for new connections
    pub const fn config(&self) -> &PcscBackendConfig {
        &self.config
    }

    fn reader_name(terminal: &str) -> TerminalResult<CString> {
        CString::new(terminal).map_err(|_| PcscError::InvalidReaderName(terminal.to_string()).into())
    }

    fn error(terminal: &str, err: pcsc::Error) -> TerminalError {
        TerminalError::from(PcscError::from(err)).with_terminal(terminal)
    }
}

impl TerminalFactory for PcscTerminals {
    fn list_terminals(&self) -> TerminalResult<Vec<String>> {
        match self.context.list_readers_owned() {
            Ok(readers) => Ok(readers
                .into_iter()
                .map(|r| r.to_string_lossy().into_owned())
                .collect()),
            Err(pcsc::Error::NoReadersAvailable) => Ok(Vec::new()),
            Err(e) => Err(PcscError::from(e).into()),
        }
    }

    fn is_card_present(&self, terminal: &str) -> TerminalResult<bool> {
        let mut states = [ReaderState::new(Self::reader_name(terminal)?, State::UNAWARE)];
        self.context
            .get_status_change(Some(self.config.status_timeout), &mut states)
            .or_else(|e| match e {
                pcsc::Error::Timeout => Ok(()),
                e => Err(Self::error(terminal, e)),
            })?;

        let state = states[0].event_state();
        trace!(terminal, ?state, "Reader state");
        if state.contains(State::UNKNOWN) || state.contains(State::UNAVAILABLE) {
            return Err(TerminalError::new(ScardCode::ReaderUnavailable).with_terminal(terminal));
        }
        if state.contains(State::PRESENT) && state.contains(State::MUTE) {
            return Err(TerminalError::new(ScardCode::UnresponsiveCard).with_terminal(terminal));
        }
        Ok(state.contains(State::PRESENT) && !state.contains(State::EMPTY))
    }

    fn connect(&self, terminal: &str) -> TerminalResult<Box<dyn CardConnection>> {
        let reader = Self::reader_name(terminal)?;
        let card = self
            .context
            .connect(&reader, self.config.share_mode.into(), self.config.protocols)
            .map_err(|e| Self::error(terminal, e))?;
        Ok(Box::new(PcscConnection::new(card, terminal, self.config.clone())))
    }
}
