//! Error type for APDU encoding and decoding

use crate::response::status::StatusWord;

/// Result alias used throughout the codec
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building, encoding or decoding APDUs
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// Encoded command shorter than the 4 byte header
    #[error("Invalid command length: {0}")]
    InvalidCommandLength(usize),

    /// Body bytes do not match any ISO 7816-4 case
    #[error("Malformed APDU: {0}")]
    MalformedApdu(&'static str),

    /// Expected length outside of 0..=65536
    #[error("Expected length {0} out of range")]
    InvalidExpectedLength(u32),

    /// Command data longer than an extended Lc can describe
    #[error("Command data too long: {0} bytes")]
    DataTooLong(usize),

    /// Response shorter than a status word
    #[error("Response too short: {0} bytes")]
    ResponseTooShort(usize),

    /// Acceptable status pattern that is neither 1 nor 2 bytes long
    #[error("Invalid acceptable status code of length {0}")]
    InvalidStatusPattern(usize),

    /// Card returned a status word the caller did not accept
    #[error("Unexpected status {0} ({desc})", desc = .0.description())]
    UnexpectedStatus(StatusWord),
}
