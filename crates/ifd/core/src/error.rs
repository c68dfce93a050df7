//! Error types for the interface device layer
//!
//! Every public operation of the IFD returns [`IfdError`]. Driver errors are
//! converted at the entry points, so callers only ever see these variants.
//! Each variant carries a machine-checkable [`ErrorKind`] and the ISO/IEC 24727
//! result minor URI it is reported with.

use bytes::Bytes;
use eidcard_apdu_core::StatusWord;

use crate::terminal::{ScardCode, TerminalError};

/// Result alias for IFD operations
pub type Result<T> = std::result::Result<T, IfdError>;

const MINOR_BASE: &str = "http://www.bsi.bund.de/ecard/api/1.1/resultminor/";

/// Machine-checkable classification of an [`IfdError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ErrorKind {
    /// Unknown or released context handle
    #[display("invalid context handle")]
    InvalidContextHandle,
    /// Unknown or closed slot handle
    #[display("invalid slot handle")]
    InvalidSlotHandle,
    /// Terminal name not known to the backend
    #[display("no such terminal")]
    NoSuchTerminal,
    /// No card in the terminal
    #[display("no card present")]
    NoCardPresent,
    /// APDU bytes could not be decoded
    #[display("malformed APDU")]
    MalformedApdu,
    /// Card answered with an unacceptable status word
    #[display("transmit error")]
    TransmitError,
    /// Operation was cancelled by the caller
    #[display("cancellation by user")]
    CancellationByUser,
    /// Nothing to cancel
    #[display("cancel not possible")]
    CancelNotPossible,
    /// Neither the terminal nor a registered factory provides the protocol
    #[display("unknown protocol")]
    UnknownProtocol,
    /// Native PACE execution in the terminal failed
    #[display("native PACE error")]
    NativePaceError,
    /// Opaque hardware or driver failure
    #[display("underlying I/O error")]
    UnderlyingIoError,
    /// Operation not valid in the current state
    #[display("illegal state")]
    IllegalState,
    /// Timeout of zero requested
    #[display("invalid timeout")]
    InvalidTimeout,
    /// Request parameter rejected
    #[display("invalid parameter")]
    InvalidParameter,
    /// Terminal reported a timeout
    #[display("timeout")]
    Timeout,
    /// Context released while the operation was running
    #[display("session terminated")]
    SessionTerminated,
}

/// Native PACE failure reasons reported in `dwResult`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum PaceFailure {
    /// Input data rejected by the reader (`0xD000000x`)
    #[display("inconsistent input data ({_0:#010X})")]
    InputData(u32),
    /// Reader specific protocol failure (`0xE000000x`)
    #[display("reader protocol failure ({_0:#010X})")]
    Protocol(u32),
    /// Card answered with an error status word
    #[display("card returned {_0}")]
    Card(StatusWord),
    /// The reader timed out waiting for input
    #[display("reader timeout")]
    Timeout,
    /// Any other result code
    #[display("unknown result {_0:#010X}")]
    Unknown(u32),
}

/// Errors returned by the interface device layer
#[derive(Debug, thiserror::Error)]
pub enum IfdError {
    /// Unknown or released context handle
    #[error("Invalid context handle")]
    InvalidContextHandle,

    /// Unknown or closed slot handle
    #[error("Invalid slot handle: {0}")]
    InvalidSlotHandle(String),

    /// Terminal name not known to the backend
    #[error("No such terminal: {0}")]
    NoSuchTerminal(String),

    /// No card in the terminal
    #[error("No card present in terminal: {0}")]
    NoCardPresent(String),

    /// APDU bytes could not be decoded or encoded
    #[error("Malformed APDU: {0}")]
    MalformedApdu(#[from] eidcard_apdu_core::Error),

    /// Card answered with an unacceptable status word
    #[error("Unexpected status word {status} in response")]
    TransmitError {
        /// The complete response APDU including the status word
        response: Bytes,
        /// The offending status word
        status: StatusWord,
        /// Responses of the batch that were accepted before the failure
        accepted: Vec<Bytes>,
    },

    /// Operation was cancelled by the caller
    #[error("Cancellation by user")]
    CancellationByUser,

    /// Nothing to cancel
    #[error("Cancel not possible: {0}")]
    CancelNotPossible(String),

    /// Neither the terminal nor a registered factory provides the protocol
    #[error("No such protocol available in this IFD: {0}")]
    UnknownProtocol(String),

    /// Native PACE execution in the terminal failed
    #[error("Native PACE failed: {0}")]
    NativePace(PaceFailure),

    /// Opaque hardware or driver failure
    #[error("Terminal error: {0}")]
    Io(#[source] TerminalError),

    /// Operation not valid in the current state
    #[error("Illegal state: {0}")]
    IllegalState(&'static str),

    /// Timeout of zero requested
    #[error("Timeout must be greater than zero")]
    InvalidTimeout,

    /// Request parameter rejected
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Terminal reported a timeout
    #[error("Timeout")]
    Timeout,

    /// Context released while the operation was running
    #[error("Session terminated")]
    SessionTerminated,
}

impl IfdError {
    /// Machine-checkable classification
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidContextHandle => ErrorKind::InvalidContextHandle,
            Self::InvalidSlotHandle(_) => ErrorKind::InvalidSlotHandle,
            Self::NoSuchTerminal(_) => ErrorKind::NoSuchTerminal,
            Self::NoCardPresent(_) => ErrorKind::NoCardPresent,
            Self::MalformedApdu(_) => ErrorKind::MalformedApdu,
            Self::TransmitError { .. } => ErrorKind::TransmitError,
            Self::CancellationByUser => ErrorKind::CancellationByUser,
            Self::CancelNotPossible(_) => ErrorKind::CancelNotPossible,
            Self::UnknownProtocol(_) => ErrorKind::UnknownProtocol,
            Self::NativePace(_) => ErrorKind::NativePaceError,
            Self::Io(_) => ErrorKind::UnderlyingIoError,
            Self::IllegalState(_) => ErrorKind::IllegalState,
            Self::InvalidTimeout => ErrorKind::InvalidTimeout,
            Self::InvalidParameter(_) => ErrorKind::InvalidParameter,
            Self::Timeout => ErrorKind::Timeout,
            Self::SessionTerminated => ErrorKind::SessionTerminated,
        }
    }

    /// Result minor URI reported for this error
    pub fn result_minor(&self) -> String {
        let fragment = match self.kind() {
            ErrorKind::InvalidContextHandle => "ifdl/common#invalidContextHandle",
            ErrorKind::InvalidSlotHandle | ErrorKind::IllegalState => {
                "ifdl/common#invalidSlotHandle"
            }
            ErrorKind::NoSuchTerminal => "ifdl/terminal#unknownIFD",
            ErrorKind::NoCardPresent => "ifdl/terminal#noCard",
            ErrorKind::CancellationByUser => "ifdl#cancellationByUser",
            ErrorKind::CancelNotPossible => "ifdl/IO#cancelNotPossible",
            ErrorKind::UnknownProtocol => "sal#protocolNotRecognized",
            ErrorKind::Timeout => "ifdl/common#timeoutError",
            ErrorKind::InvalidTimeout | ErrorKind::InvalidParameter => {
                "al/common#incorrectParameter"
            }
            ErrorKind::NativePaceError => match self {
                Self::NativePace(PaceFailure::Timeout) => "ifdl/common#timeoutError",
                _ => "ifdl/IO#unknownError",
            },
            ErrorKind::SessionTerminated => "al/common#sessionTerminated",
            ErrorKind::MalformedApdu
            | ErrorKind::TransmitError
            | ErrorKind::UnderlyingIoError => "al/common#unknownError",
        };
        format!("{MINOR_BASE}{fragment}")
    }

    /// Whether this is a cancellation raised by the caller
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::CancellationByUser)
    }
}

impl From<TerminalError> for IfdError {
    fn from(err: TerminalError) -> Self {
        match err.code() {
            Some(ScardCode::UnknownReader | ScardCode::ReaderUnavailable) => {
                Self::NoSuchTerminal(err.terminal().unwrap_or_default().to_string())
            }
            Some(ScardCode::NoSmartcard | ScardCode::RemovedCard) => {
                Self::NoCardPresent(err.terminal().unwrap_or_default().to_string())
            }
            Some(ScardCode::Cancelled) => Self::CancellationByUser,
            Some(ScardCode::Timeout) => Self::Timeout,
            _ => Self::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_error_mapping() {
        let err: IfdError = TerminalError::new(ScardCode::NoSmartcard).with_terminal("Reader 0").into();
        assert_eq!(err.kind(), ErrorKind::NoCardPresent);
        assert_eq!(err.to_string(), "No card present in terminal: Reader 0");

        let err: IfdError = TerminalError::new(ScardCode::UnknownReader).into();
        assert_eq!(err.kind(), ErrorKind::NoSuchTerminal);

        let err: IfdError = TerminalError::new(ScardCode::Cancelled).into();
        assert!(err.is_cancellation());

        let err: IfdError = TerminalError::message("driver exploded").into();
        assert_eq!(err.kind(), ErrorKind::UnderlyingIoError);
    }

    #[test]
    fn test_result_minor() {
        assert!(
            IfdError::InvalidContextHandle
                .result_minor()
                .ends_with("ifdl/common#invalidContextHandle")
        );
        assert!(
            IfdError::NativePace(PaceFailure::Timeout)
                .result_minor()
                .ends_with("#timeoutError")
        );
        assert_eq!(ErrorKind::CancelNotPossible.to_string(), "cancel not possible");
    }
}
