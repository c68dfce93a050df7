//! EAC1 step of the eID authentication
//!
//! Before an eService may read data from an eID card, the user agrees to the
//! requested access rights and the client establishes PACE with the card. This
//! crate implements that step on top of `eidcard-ifd`:
//!
//! - [`Eac1Input`] parses the certificates, the certificate description and
//!   the requested [`Chat`]s of the DIDAuthenticate request.
//! - [`UserConsent`] asks the user for the rights to grant and the password.
//! - [`PaceStep`] drives the exchange and dispatches EstablishChannel through
//!   a [`Dispatcher`], usually an [`IfdDispatcher`].
//! - [`EacSessionStore`] keeps the state later authentication steps need.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod auth_data;
pub mod chat;
pub mod consent;
pub mod cvc;
pub mod description;
pub mod dispatch;
mod eac1;
mod error;
pub mod oid;
pub mod security_info;
pub mod session;
pub mod step;
mod tlv;

pub use auth_data::AuthenticationData;
pub use chat::{AccessRight, Chat, Role, TerminalType};
pub use consent::{
    ChannelConsent, ConsentAnswer, ConsentContent, ConsentPrompt, ConsentResponse, UserConsent,
};
pub use cvc::{CardVerifiableCertificate, CertificateChain, CvcDate};
pub use description::{CertificateDescription, TermsOfUsage};
pub use dispatch::{
    DispatchRequest, DispatchResponse, Dispatcher, IfdDispatcher, ResultMajor, ResultStatus,
};
pub use eac1::{EAC_PROTOCOL_URI, Eac1Input, Eac1Output};
pub use error::{EacError, Result};
pub use oid::ObjectIdentifier;
pub use security_info::{SecurityInfo, SecurityInfos};
pub use session::{EacSession, EacSessionStore, EacStage, SessionTicket};
pub use step::{DidAuthenticate, DidAuthenticateResponse, PaceStep};
