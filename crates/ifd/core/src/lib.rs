//! ISO/IEC 24727 interface device layer
//!
//! This crate implements the IFD of an eID client: it manages a shared
//! context, channels to inserted cards, terminal and card events, and the
//! establishment of PACE secure channels either inside the reader or through a
//! registered software protocol.
//!
//! ## Overview
//!
//! - [`Ifd`] is the facade exposing the IFD operations.
//! - [`TerminalFactory`] and [`CardConnection`] abstract the reader backend.
//!   The PC/SC backend lives in `eidcard-ifd-pcsc`.
//! - [`ChannelManager`] owns master and slave channels and their transactions.
//! - [`EventWatcher`] and [`EventManager`] detect terminal and card changes.
//! - [`ProtocolFactories`] holds software secure channel protocols by URI.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod cancel;
pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod features;
pub mod handle;
pub mod ifd;
pub mod pace;
pub mod pool;
pub mod protocol;
pub mod terminal;
pub mod watcher;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use cancel::{CancelReason, CancellationToken};
pub use channel::{ChannelInfo, ChannelManager, ResetOutcome};
pub use config::IfdConfig;
pub use context::ContextRegistry;
pub use error::{ErrorKind, IfdError, PaceFailure, Result};
pub use events::{EventManager, IfdEvent};
pub use features::FeatureCodes;
pub use handle::{ContextHandle, SessionId, SlotHandle};
pub use ifd::{
    CancelTarget, DisconnectAction, Ifd, IfdCapabilities, InputApdu, PIN_COMPARE_PROTOCOL_URI,
    WaitRequest,
};
pub use pace::{
    PACE_PROTOCOL_URI, PaceCapabilities, PaceCapability, PaceFunction, PaceInput, PaceOutput,
    PasswordId,
};
pub use protocol::{ApduChannel, ProtocolFactories, ProtocolFactory, SecureChannelProtocol};
pub use terminal::{CardConnection, ScardCode, TerminalError, TerminalFactory, TerminalResult};
pub use watcher::{
    EventWatcher, StatusChange, StatusChangeKind, TerminalStatus, WaitOutcome, status_sweep,
};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        CancelTarget, ContextHandle, DisconnectAction, Ifd, IfdConfig, IfdError, InputApdu,
        PaceInput, PaceOutput, PasswordId, SlotHandle, TerminalFactory, WaitOutcome, WaitRequest,
    };
}
