//! Terminal and card capability abstraction
//!
//! The IFD never talks to reader hardware directly. A backend implements
//! [`TerminalFactory`] (enumerating terminals and polling card presence) and
//! [`CardConnection`] (one low-level connection to an inserted card). The
//! PC/SC backend lives in `eidcard-ifd-pcsc`; tests use the in-memory
//! terminals from [`crate::mock`].

use std::fmt;

use bytes::Bytes;

/// PC/SC style error codes a backend reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScardCode {
    /// No card in the reader
    NoSmartcard,
    /// Card was removed while connected
    RemovedCard,
    /// Card was reset by another party
    ResetCard,
    /// Card is not powered
    UnpoweredCard,
    /// Card does not answer to reset
    UnresponsiveCard,
    /// Card is not supported by the reader
    UnsupportedCard,
    /// Requested protocol differs from the active one
    ProtoMismatch,
    /// Reader name is unknown
    UnknownReader,
    /// Reader went away
    ReaderUnavailable,
    /// Operation timed out
    Timeout,
    /// Operation was cancelled
    Cancelled,
    /// Card is used exclusively by someone else
    SharingViolation,
    /// Reader does not support the requested control code
    UnsupportedFeature,
}

impl ScardCode {
    /// Card state errors that a status sweep treats as "no usable card"
    pub const fn is_transient_card_state(self) -> bool {
        matches!(
            self,
            Self::UnpoweredCard | Self::UnresponsiveCard | Self::UnsupportedCard | Self::ProtoMismatch
        )
    }
}

/// Error reported by a terminal backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalError {
    code: Option<ScardCode>,
    terminal: Option<String>,
    message: Option<String>,
}

impl TerminalError {
    /// Error with a PC/SC style code
    pub const fn new(code: ScardCode) -> Self {
        Self {
            code: Some(code),
            terminal: None,
            message: None,
        }
    }

    /// Error without a code
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            terminal: None,
            message: Some(message.into()),
        }
    }

    /// Attach the affected terminal name
    pub fn with_terminal(mut self, terminal: impl Into<String>) -> Self {
        self.terminal = Some(terminal.into());
        self
    }

    /// Attach a human readable message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// PC/SC style code, if any
    pub const fn code(&self) -> Option<ScardCode> {
        self.code
    }

    /// Affected terminal, if known
    pub fn terminal(&self) -> Option<&str> {
        self.terminal.as_deref()
    }
}

impl fmt::Display for TerminalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, &self.message) {
            (Some(code), Some(msg)) => write!(f, "{code:?}: {msg}")?,
            (Some(code), None) => write!(f, "{code:?}")?,
            (None, Some(msg)) => write!(f, "{msg}")?,
            (None, None) => write!(f, "unknown terminal error")?,
        }
        if let Some(terminal) = &self.terminal {
            write!(f, " (terminal {terminal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for TerminalError {}

/// Result alias for backend calls
pub type TerminalResult<T> = std::result::Result<T, TerminalError>;

/// Source of terminals and card connections
pub trait TerminalFactory: Send + Sync + 'static {
    /// Names of all terminals currently attached
    fn list_terminals(&self) -> TerminalResult<Vec<String>>;

    /// Whether a card is inserted in `terminal`
    fn is_card_present(&self, terminal: &str) -> TerminalResult<bool>;

    /// Open a shared connection to the card in `terminal`
    fn connect(&self, terminal: &str) -> TerminalResult<Box<dyn CardConnection>>;
}

/// Low-level connection to one inserted card
pub trait CardConnection: Send {
    /// Answer to reset of the connected card
    fn atr(&self) -> Bytes;

    /// Exchange one raw command APDU
    fn transmit(&mut self, command: &[u8]) -> TerminalResult<Bytes>;

    /// Issue a reader control command
    fn control(&mut self, code: u32, data: &[u8]) -> TerminalResult<Bytes>;

    /// Raw TLV list answered to GET_FEATURE_REQUEST
    fn feature_request(&mut self) -> TerminalResult<Bytes>;

    /// Acquire exclusive access to the card
    fn begin_exclusive(&mut self) -> TerminalResult<()>;

    /// Release exclusive access to the card
    fn end_exclusive(&mut self) -> TerminalResult<()>;

    /// Reconnect in place, optionally resetting the card
    fn reconnect(&mut self, reset: bool) -> TerminalResult<()>;

    /// Close the connection, optionally resetting the card
    fn disconnect(self: Box<Self>, reset: bool) -> TerminalResult<()>;
}
