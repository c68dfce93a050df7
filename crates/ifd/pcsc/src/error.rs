//! Error types for the PC/SC backend

use eidcard_ifd::{ScardCode, TerminalError};

/// PC/SC-specific errors
#[derive(Debug, thiserror::Error)]
pub enum PcscError {
    /// PC/SC error
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),

    /// Reader name is not a valid C string
    #[error("Invalid reader name: {0}")]
    InvalidReaderName(String),
}

/// Classify a PC/SC error by its IFD error code
pub const fn scard_code(err: pcsc::Error) -> Option<ScardCode> {
    Some(match err {
        pcsc::Error::NoSmartcard => ScardCode::NoSmartcard,
        pcsc::Error::RemovedCard => ScardCode::RemovedCard,
        pcsc::Error::ResetCard => ScardCode::ResetCard,
        pcsc::Error::UnpoweredCard => ScardCode::UnpoweredCard,
        pcsc::Error::UnresponsiveCard => ScardCode::UnresponsiveCard,
        pcsc::Error::UnsupportedCard => ScardCode::UnsupportedCard,
        pcsc::Error::ProtoMismatch => ScardCode::ProtoMismatch,
        pcsc::Error::UnknownReader => ScardCode::UnknownReader,
        pcsc::Error::ReaderUnavailable | pcsc::Error::NoReadersAvailable => {
            ScardCode::ReaderUnavailable
        }
        pcsc::Error::Timeout => ScardCode::Timeout,
        pcsc::Error::Cancelled => ScardCode::Cancelled,
        pcsc::Error::SharingViolation => ScardCode::SharingViolation,
        pcsc::Error::UnsupportedFeature => ScardCode::UnsupportedFeature,
        _ => return None,
    })
}

impl From<PcscError> for TerminalError {
    fn from(err: PcscError) -> Self {
        match err {
            PcscError::Pcsc(e) => match scard_code(e) {
                Some(code) => Self::new(code).with_message(e.to_string()),
                None => Self::message(format!("PC/SC error: {e}")),
            },
            PcscError::InvalidReaderName(name) => Self::new(ScardCode::UnknownReader)
                .with_terminal(name)
                .with_message("reader name contains a NUL byte"),
        }
    }
}
