//! EAC1 input and output messages

use bytes::Bytes;
use eidcard_ifd::PaceOutput;

use crate::auth_data::{AuthenticationData, decode_hex};
use crate::chat::Chat;
use crate::cvc::{CardVerifiableCertificate, CertificateChain};
use crate::description::CertificateDescription;
use crate::error::{EacError, Result};

/// Protocol URI of EAC
pub const EAC_PROTOCOL_URI: &str = "urn:oid:1.3.162.15480.3.0.14";

const CERTIFICATE: &str = "Certificate";
const CERTIFICATE_DESCRIPTION: &str = "CertificateDescription";
const REQUIRED_CHAT: &str = "RequiredCHAT";
const OPTIONAL_CHAT: &str = "OptionalCHAT";
const AUTHENTICATED_AUXILIARY_DATA: &str = "AuthenticatedAuxiliaryData";

const EF_CARD_ACCESS: &str = "EFCardAccess";
const RETRY_COUNTER: &str = "RetryCounter";
const ID_PICC: &str = "IDPICC";
const CHAT: &str = "CHAT";
const CAR: &str = "CertificationAuthorityReference";

/// Parsed EAC1 input of a DIDAuthenticate request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eac1Input {
    /// Certificates of the eService
    pub certificates: CertificateChain,
    /// Certificate description of the terminal certificate
    pub certificate_description: CertificateDescription,
    /// Rights the eService needs
    pub required_chat: Chat,
    /// Rights the user may grant additionally
    pub optional_chat: Option<Chat>,
    /// Auxiliary data for age, validity or community checks
    pub authenticated_auxiliary_data: Option<Bytes>,
}

impl Eac1Input {
    /// Parse and validate the input elements. Any malformed element fails the
    /// whole input.
    pub fn from_auth_data(data: &AuthenticationData) -> Result<Self> {
        let certificates = data
            .get_all(CERTIFICATE)
            .map(|value| CardVerifiableCertificate::from_bytes(&decode_hex(CERTIFICATE, value)?))
            .collect::<Result<Vec<_>>>()?;
        let certificates = CertificateChain::new(certificates)?;

        let description = data
            .get_bytes(CERTIFICATE_DESCRIPTION)?
            .ok_or(EacError::MissingElement("CertificateDescription"))?;
        let required_chat = data
            .get_bytes(REQUIRED_CHAT)?
            .ok_or(EacError::MissingElement("RequiredCHAT"))?;

        Ok(Self {
            certificates,
            certificate_description: CertificateDescription::from_bytes(&description)?,
            required_chat: Chat::from_bytes(&required_chat)?,
            optional_chat: data
                .get_bytes(OPTIONAL_CHAT)?
                .map(|chat| Chat::from_bytes(&chat))
                .transpose()?,
            authenticated_auxiliary_data: data.get_bytes(AUTHENTICATED_AUXILIARY_DATA)?,
        })
    }
}

/// EAC1 output returned after PACE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eac1Output {
    /// Content of EF.CardAccess
    pub ef_card_access: Bytes,
    /// Remaining password tries
    pub retry_counter: u8,
    /// Identifier of the card
    pub id_picc: Option<Bytes>,
    /// CHAT the user agreed to
    pub chat: Chat,
    /// Most recent certification authority reference of the card
    pub car: Option<Bytes>,
}

impl Eac1Output {
    /// Output for a successful PACE run with `chat` selected
    pub fn from_pace(output: &PaceOutput, chat: Chat) -> Self {
        Self {
            ef_card_access: output.ef_card_access.clone(),
            retry_counter: output.retry_counter,
            id_picc: output.id_icc.clone(),
            chat,
            car: output.car_current.clone(),
        }
    }

    /// Encode as authentication data
    pub fn to_auth_data(&self) -> AuthenticationData {
        let mut data = AuthenticationData::new(EAC_PROTOCOL_URI);
        data.push_bytes(EF_CARD_ACCESS, &self.ef_card_access);
        data.push(RETRY_COUNTER, self.retry_counter.to_string());
        if let Some(id_picc) = &self.id_picc {
            data.push_bytes(ID_PICC, id_picc);
        }
        data.push_bytes(CHAT, &self.chat.to_bytes());
        if let Some(car) = &self.car {
            data.push_bytes(CAR, car);
        }
        data
    }
}
