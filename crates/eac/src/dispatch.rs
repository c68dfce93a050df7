//! Dispatching channel requests to the IFD
//!
//! The EAC step never calls the IFD directly. It sends typed requests through
//! a [`Dispatcher`] and reads the result major/minor of the response, the same
//! way a remote IFD would answer.

use std::fmt;
use std::sync::Arc;

use eidcard_ifd::{Ifd, IfdError, PaceInput, PaceOutput, SlotHandle};
use tracing::{debug, warn};

/// Result major URIs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ResultMajor {
    /// Request succeeded
    #[display("http://www.bsi.bund.de/ecard/api/1.1/resultmajor#ok")]
    Ok,
    /// Request failed
    #[display("http://www.bsi.bund.de/ecard/api/1.1/resultmajor#error")]
    Error,
    /// Request succeeded with a warning
    #[display("http://www.bsi.bund.de/ecard/api/1.1/resultmajor#warning")]
    Warning,
}

/// Result minor of an unexpected failure
pub const MINOR_UNKNOWN_ERROR: &str = "http://www.bsi.bund.de/ecard/api/1.1/resultminor/al/common#unknownError";
/// Result minor of a rejected parameter
pub const MINOR_INCORRECT_PARAMETER: &str =
    "http://www.bsi.bund.de/ecard/api/1.1/resultminor/al/common#incorrectParameter";
/// Result minor of a cancelled user interaction
pub const MINOR_CANCELLATION_BY_USER: &str =
    "http://www.bsi.bund.de/ecard/api/1.1/resultminor/sal#cancellationByUser";

/// Result of a dispatched request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultStatus {
    /// Result major
    pub major: ResultMajor,
    /// Result minor URI, absent on success
    pub minor: Option<String>,
    /// Human readable message
    pub message: Option<String>,
}

impl ResultStatus {
    /// Success
    pub const fn ok() -> Self {
        Self {
            major: ResultMajor::Ok,
            minor: None,
            message: None,
        }
    }

    /// Failure with `minor` and `message`
    pub fn error(minor: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            major: ResultMajor::Error,
            minor: Some(minor.into()),
            message: Some(message.into()),
        }
    }

    /// Whether the major is not an error
    pub fn is_ok(&self) -> bool {
        self.major != ResultMajor::Error
    }
}

impl From<&IfdError> for ResultStatus {
    fn from(err: &IfdError) -> Self {
        Self::error(err.result_minor(), err.to_string())
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.major)?;
        if let Some(minor) = &self.minor {
            write!(f, " ({minor})")?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

/// Request delivered through a [`Dispatcher`]
#[derive(Debug, Clone)]
pub enum DispatchRequest {
    /// Establish a secure channel on a slot
    EstablishChannel {
        /// Connected slot
        slot: SlotHandle,
        /// Protocol URI
        protocol: String,
        /// Channel parameters
        input: PaceInput,
    },
    /// Tear down the secure channel of a slot
    DestroyChannel {
        /// Connected slot
        slot: SlotHandle,
    },
}

/// Response to a [`DispatchRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResponse {
    /// Result major/minor
    pub result: ResultStatus,
    /// Output of a successful channel establishment
    pub pace_output: Option<PaceOutput>,
}

impl DispatchResponse {
    /// Successful response without output
    pub const fn ok() -> Self {
        Self {
            result: ResultStatus::ok(),
            pace_output: None,
        }
    }

    /// Failed response
    pub const fn error(result: ResultStatus) -> Self {
        Self {
            result,
            pace_output: None,
        }
    }
}

/// Delivers requests to the component handling them
pub trait Dispatcher: Send + Sync {
    /// Deliver `request` and wait for its response. Failures are reported in
    /// the result, never as a panic.
    fn deliver(&self, request: DispatchRequest) -> DispatchResponse;
}

/// [`Dispatcher`] executing requests on a local [`Ifd`]
#[derive(Debug, Clone)]
pub struct IfdDispatcher {
    ifd: Arc<Ifd>,
}

impl IfdDispatcher {
    /// Dispatch to `ifd`
    pub const fn new(ifd: Arc<Ifd>) -> Self {
        Self { ifd }
    }
}

impl Dispatcher for IfdDispatcher {
    fn deliver(&self, request: DispatchRequest) -> DispatchResponse {
        match request {
            DispatchRequest::EstablishChannel {
                slot,
                protocol,
                input,
            } => match self.ifd.establish_channel(&slot, &protocol, &input) {
                Ok(output) => {
                    debug!(%slot, native = output.native, "Channel established");
                    DispatchResponse {
                        result: ResultStatus::ok(),
                        pace_output: Some(output),
                    }
                }
                Err(e) => {
                    warn!(%slot, error = %e, "EstablishChannel failed");
                    DispatchResponse::error(ResultStatus::from(&e))
                }
            },
            DispatchRequest::DestroyChannel { slot } => match self.ifd.destroy_channel(&slot) {
                Ok(()) => DispatchResponse::ok(),
                Err(e) => {
                    warn!(%slot, error = %e, "DestroyChannel failed");
                    DispatchResponse::error(ResultStatus::from(&e))
                }
            },
        }
    }
}
