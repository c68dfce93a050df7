//! Command and response APDU codec
//!
//! This crate implements the binary encoding of smart card command and response
//! APDUs according to ISO/IEC 7816-4, including the short and extended length
//! forms used by eID cards.
//!
//! ## Overview
//!
//! - [`Command`] builds and encodes command APDUs, choosing short or extended
//!   length fields as required.
//! - [`Command::from_bytes`] and [`classify_body`] resolve the ISO 7816-4 body
//!   cases of an encoded command.
//! - [`Response`] splits a card answer into data and [`StatusWord`].
//! - [`AcceptableStatus`] expresses the status words a caller is willing to accept.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod command;
pub mod error;
pub mod response;

pub use command::{BodyCase, Command, CommandBody, ExpectedLength, classify_body};
pub use error::{Error, Result};
pub use response::Response;
pub use response::status::{AcceptableStatus, StatusWord};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{Bytes, BytesMut, Error};

    pub use crate::Command;
    pub use crate::command::{BodyCase, CommandBody, ExpectedLength};

    pub use crate::Response;
    pub use crate::response::status::{AcceptableStatus, StatusWord, common as status};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexports() {
        let cmd = Command::new(0x00, 0xA4, 0x04, 0x0C);
        assert_eq!(cmd.cla, 0x00);
        assert_eq!(cmd.ins, 0xA4);

        let resp = Response::success(Bytes::from_static(&[0x01, 0x02]));
        assert!(resp.is_success());
        assert_eq!(resp.status(), StatusWord::new(0x90, 0x00));
    }
}
