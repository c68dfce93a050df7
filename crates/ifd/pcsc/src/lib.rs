//! PC/SC backend for the eidcard interface device layer
//!
//! This crate implements [`TerminalFactory`](eidcard_ifd::TerminalFactory) and
//! [`CardConnection`](eidcard_ifd::CardConnection) on top of the system PC/SC
//! resource manager, including reader control commands used for PC/SC part 10
//! features such as EXECUTE_PACE.
//!
//! # Examples
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use eidcard_ifd::{Ifd, IfdConfig};
//! use eidcard_ifd_pcsc::PcscTerminals;
//!
//! let ifd = Ifd::new(Arc::new(PcscTerminals::new()?), IfdConfig::default());
//! let ctx = ifd.establish_context();
//! for status in ifd.get_status(&ctx, None)? {
//!     println!("{}: card present = {}", status.terminal, status.card_present);
//! }
//! ifd.release_context(&ctx)?;
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![warn(missing_docs)]

mod config;
mod connection;
mod error;
mod terminals;

pub use config::{PcscBackendConfig, ShareMode};
pub use connection::PcscConnection;
pub use error::{PcscError, scard_code};
pub use terminals::PcscTerminals;

// Re-export some pcsc types for convenience
pub use pcsc::{Protocol, Protocols};
