//! Card verifiable certificates
//!
//! Only the fields the EAC1 step consumes are decoded. Signatures and public
//! keys are kept as raw bytes; chain validation happens on the card during
//! terminal authentication.

use std::fmt;

use bytes::Bytes;
use iso7816_tlv::ber::Tlv;

use crate::chat::{CHAT_TAG, Chat, Role};
use crate::error::{EacError, Result};
use crate::tlv;

const CVC_TAG: &[u8] = &[0x7F, 0x21];
const BODY_TAG: &[u8] = &[0x7F, 0x4E];
const PROFILE_TAG: &[u8] = &[0x5F, 0x29];
const CAR_TAG: &[u8] = &[0x42];
const PUBLIC_KEY_TAG: &[u8] = &[0x7F, 0x49];
const CHR_TAG: &[u8] = &[0x5F, 0x20];
const EFFECTIVE_DATE_TAG: &[u8] = &[0x5F, 0x25];
const EXPIRATION_DATE_TAG: &[u8] = &[0x5F, 0x24];
const EXTENSIONS_TAG: &[u8] = &[0x65];
const SIGNATURE_TAG: &[u8] = &[0x5F, 0x37];

/// Calendar date encoded as six unpacked BCD digits `YYMMDD`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
#[display("{year:04}-{month:02}-{day:02}")]
pub struct CvcDate {
    /// Four digit year
    pub year: u16,
    /// Month 1 to 12
    pub month: u8,
    /// Day 1 to 31
    pub day: u8,
}

impl CvcDate {
    fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() != 6 || raw.iter().any(|digit| *digit > 9) {
            return Err(EacError::InvalidData("certificate date is not six digits"));
        }
        let year = 2000 + u16::from(raw[0] * 10 + raw[1]);
        let month = raw[2] * 10 + raw[3];
        let day = raw[4] * 10 + raw[5];
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return Err(EacError::InvalidData("certificate date out of range"));
        }
        Ok(Self { year, month, day })
    }
}

/// A card verifiable certificate (`7F21`)
#[derive(Clone, PartialEq, Eq)]
pub struct CardVerifiableCertificate {
    raw: Bytes,
    body: Bytes,
    profile_identifier: u8,
    car: Bytes,
    public_key: Bytes,
    chr: Bytes,
    chat: Chat,
    effective_date: CvcDate,
    expiration_date: CvcDate,
    extensions: Option<Bytes>,
    signature: Bytes,
}

impl fmt::Debug for CardVerifiableCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardVerifiableCertificate")
            .field("car", &String::from_utf8_lossy(&self.car))
            .field("chr", &String::from_utf8_lossy(&self.chr))
            .field("chat", &self.chat)
            .field("effective_date", &self.effective_date)
            .field("expiration_date", &self.expiration_date)
            .finish_non_exhaustive()
    }
}

impl CardVerifiableCertificate {
    /// Parse an encoded certificate
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let tlv = tlv::parse_single(data)?;
        Self::from_tlv(&tlv)
    }

    fn from_tlv(certificate: &Tlv) -> Result<Self> {
        let children = tlv::constructed(certificate, CVC_TAG, "expected CV certificate")?;
        let body_tlv =
            tlv::find(children, BODY_TAG).ok_or(EacError::MissingElement("certificate body"))?;
        let body = tlv::constructed(body_tlv, BODY_TAG, "expected certificate body")?;
        let signature = tlv::require_primitive(children, SIGNATURE_TAG, "certificate signature")?;

        let profile = tlv::require_primitive(body, PROFILE_TAG, "certificate profile identifier")?;
        let profile_identifier = match profile {
            [id] => *id,
            _ => return Err(EacError::InvalidData("certificate profile identifier length")),
        };
        let public_key = tlv::find(body, PUBLIC_KEY_TAG)
            .ok_or(EacError::MissingElement("certificate public key"))?;
        let chat = tlv::find(body, CHAT_TAG).ok_or(EacError::MissingElement("certificate CHAT"))?;
        let extensions = tlv::find(body, EXTENSIONS_TAG).map(tlv::encoded);

        let car = tlv::require_primitive(body, CAR_TAG, "certification authority reference")?;
        let chr = tlv::require_primitive(body, CHR_TAG, "certificate holder reference")?;
        let effective = tlv::require_primitive(body, EFFECTIVE_DATE_TAG, "certificate effective date")?;
        let expiration =
            tlv::require_primitive(body, EXPIRATION_DATE_TAG, "certificate expiration date")?;

        Ok(Self {
            raw: tlv::encoded(certificate),
            body: tlv::encoded(body_tlv),
            profile_identifier,
            car: Bytes::copy_from_slice(car),
            public_key: tlv::encoded(public_key),
            chr: Bytes::copy_from_slice(chr),
            chat: Chat::from_tlv(chat)?,
            effective_date: CvcDate::parse(effective)?,
            expiration_date: CvcDate::parse(expiration)?,
            extensions,
            signature: Bytes::copy_from_slice(signature),
        })
    }

    /// Complete encoding
    pub fn as_bytes(&self) -> &Bytes {
        &self.raw
    }

    /// Encoded certificate body (`7F4E`)
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Certificate profile identifier
    pub const fn profile_identifier(&self) -> u8 {
        self.profile_identifier
    }

    /// Certification authority reference
    pub const fn car(&self) -> &Bytes {
        &self.car
    }

    /// Certificate holder reference
    pub const fn chr(&self) -> &Bytes {
        &self.chr
    }

    /// Encoded public key (`7F49`)
    pub const fn public_key(&self) -> &Bytes {
        &self.public_key
    }

    /// Authorization template of the holder
    pub const fn chat(&self) -> &Chat {
        &self.chat
    }

    /// Role of the holder
    pub fn role(&self) -> Role {
        self.chat.role()
    }

    /// First day the certificate is valid
    pub const fn effective_date(&self) -> CvcDate {
        self.effective_date
    }

    /// Last day the certificate is valid
    pub const fn expiration_date(&self) -> CvcDate {
        self.expiration_date
    }

    /// Encoded certificate extensions (`65`)
    pub const fn extensions(&self) -> Option<&Bytes> {
        self.extensions.as_ref()
    }

    /// Signature over the body
    pub const fn signature(&self) -> &Bytes {
        &self.signature
    }
}

/// Certificates sent by the eService, grouped by role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateChain {
    certificates: Vec<CardVerifiableCertificate>,
    terminal: usize,
}

impl CertificateChain {
    /// Build a chain. It must contain exactly one terminal certificate.
    pub fn new(certificates: Vec<CardVerifiableCertificate>) -> Result<Self> {
        let mut terminals = certificates
            .iter()
            .enumerate()
            .filter(|(_, cvc)| cvc.role() == Role::Terminal)
            .map(|(i, _)| i);
        let found = (terminals.next(), terminals.next());
        match found {
            (None, _) => Err(EacError::MissingElement("terminal certificate")),
            (Some(terminal), None) => Ok(Self {
                certificates,
                terminal,
            }),
            (Some(_), Some(_)) => Err(EacError::InvalidData("more than one terminal certificate")),
        }
    }

    /// All certificates in the order received
    pub fn certificates(&self) -> &[CardVerifiableCertificate] {
        &self.certificates
    }

    /// The terminal certificate
    pub fn terminal_certificate(&self) -> &CardVerifiableCertificate {
        &self.certificates[self.terminal]
    }

    /// Document verifier certificates
    pub fn dv_certificates(&self) -> impl Iterator<Item = &CardVerifiableCertificate> {
        self.certificates.iter().filter(|cvc| cvc.role().is_dv())
    }

    /// Link certificates of the country verifying CA
    pub fn cvca_certificates(&self) -> impl Iterator<Item = &CardVerifiableCertificate> {
        self.certificates.iter().filter(|cvc| cvc.role() == Role::Cvca)
    }

    /// Certificates needed to reach the terminal certificate from a CAR the
    /// card trusts, issuer first
    pub fn path_from(&self, car: &[u8]) -> Option<Vec<&CardVerifiableCertificate>> {
        let mut path = Vec::new();
        let mut current = self.terminal_certificate();
        loop {
            path.push(current);
            if current.car().as_ref() == car {
                path.reverse();
                return Some(path);
            }
            current = self
                .certificates
                .iter()
                .find(|cvc| cvc.chr() == current.car() && !path.contains(cvc))?;
        }
    }
}
