//! Error types for the EAC step

use eidcard_ifd::IfdError;
use iso7816_tlv::TlvError;

use crate::dispatch::{
    MINOR_CANCELLATION_BY_USER, MINOR_INCORRECT_PARAMETER, MINOR_UNKNOWN_ERROR, ResultStatus,
};

/// Result alias for EAC operations
pub type Result<T> = std::result::Result<T, EacError>;

/// Errors raised while running the EAC1 step
#[derive(Debug, thiserror::Error)]
pub enum EacError {
    /// A TLV structure could not be parsed
    #[error("TlvError: {0}")]
    TlvError(TlvError),

    /// A structure was parsed but its content is invalid
    #[error("Invalid data: {0}")]
    InvalidData(&'static str),

    /// A mandatory element of the authentication data is missing
    #[error("Missing element: {0}")]
    MissingElement(&'static str),

    /// An element of the authentication data is not valid hex
    #[error("Invalid hex in {element}: {source}")]
    InvalidHex {
        /// Element name
        element: String,
        /// Decoding failure
        source: hex::FromHexError,
    },

    /// The DID name does not name a PACE password
    #[error("Unknown password type: {0}")]
    UnknownPasswordId(String),

    /// The selected CHAT grants rights that were not requested or drops
    /// required ones
    #[error("Selected CHAT not allowed: {0}")]
    ChatNotAllowed(&'static str),

    /// The user consent was cancelled or aborted
    #[error("User consent failed: {0}")]
    Consent(#[source] IfdError),

    /// The dispatcher answered with an error result
    #[error("Dispatch failed: {0}")]
    Dispatch(ResultStatus),

    /// The EAC session state is missing or in the wrong stage
    #[error("Illegal state: {0}")]
    IllegalState(&'static str),
}

impl From<TlvError> for EacError {
    fn from(error: TlvError) -> Self {
        Self::TlvError(error)
    }
}

impl EacError {
    /// Whether the step ended because the user or the session cancelled it
    pub const fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Self::Consent(IfdError::CancellationByUser | IfdError::SessionTerminated)
        )
    }

    /// Result major/minor reported for this error
    pub fn result_status(&self) -> ResultStatus {
        match self {
            Self::Dispatch(status) => status.clone(),
            Self::Consent(IfdError::CancellationByUser) => {
                ResultStatus::error(MINOR_CANCELLATION_BY_USER, self.to_string())
            }
            Self::Consent(e) => ResultStatus::from(e),
            Self::TlvError(_)
            | Self::InvalidData(_)
            | Self::MissingElement(_)
            | Self::InvalidHex { .. }
            | Self::UnknownPasswordId(_)
            | Self::ChatNotAllowed(_) => {
                ResultStatus::error(MINOR_INCORRECT_PARAMETER, self.to_string())
            }
            Self::IllegalState(_) => ResultStatus::error(MINOR_UNKNOWN_ERROR, self.to_string()),
        }
    }
}
