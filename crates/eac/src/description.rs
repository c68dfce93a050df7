//! Certificate description of the eService (BSI TR-03110 part 4)

use bytes::Bytes;
use iso7816_tlv::ber::Tlv;

use crate::error::{EacError, Result};
use crate::oid::ObjectIdentifier;
use crate::tlv;

const SEQUENCE_TAG: &[u8] = &[0x30];
const SET_TAG: &[u8] = &[0x31];
const OID_TAG: &[u8] = &[0x06];
const OCTET_STRING_TAG: &[u8] = &[0x04];

/// `id-plainFormat` (0.4.0.127.0.7.3.1.3.1.1)
const ID_PLAIN_FORMAT: &[u8] = &[0x04, 0x00, 0x7F, 0x00, 0x07, 0x03, 0x01, 0x03, 0x01, 0x01];
/// `id-htmlFormat` (0.4.0.127.0.7.3.1.3.1.2)
const ID_HTML_FORMAT: &[u8] = &[0x04, 0x00, 0x7F, 0x00, 0x07, 0x03, 0x01, 0x03, 0x01, 0x02];
/// `id-pdfFormat` (0.4.0.127.0.7.3.1.3.1.3)
const ID_PDF_FORMAT: &[u8] = &[0x04, 0x00, 0x7F, 0x00, 0x07, 0x03, 0x01, 0x03, 0x01, 0x03];

/// Terms of usage in the format named by the description type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermsOfUsage {
    /// Plain text
    Plain(String),
    /// HTML document
    Html(String),
    /// PDF document
    Pdf(Bytes),
}

/// Parsed certificate description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateDescription {
    raw: Bytes,
    description_type: ObjectIdentifier,
    issuer_name: String,
    issuer_url: Option<String>,
    subject_name: String,
    subject_url: Option<String>,
    terms_of_usage: TermsOfUsage,
    redirect_url: Option<String>,
    comm_certificates: Vec<Bytes>,
}

fn explicit<'a>(fields: &'a [Tlv], tag: u8) -> Option<&'a Tlv> {
    fields
        .iter()
        .find(|f| tlv::has_tag(f, &[tag]))
        .and_then(|f| match f.value() {
            iso7816_tlv::ber::Value::Constructed(inner) => inner.first(),
            iso7816_tlv::ber::Value::Primitive(_) => None,
        })
}

fn string(fields: &[Tlv], tag: u8, what: &'static str) -> Result<Option<String>> {
    explicit(fields, tag)
        .map(|inner| {
            let value = tlv::primitive(inner)?;
            String::from_utf8(value.to_vec()).map_err(|_| EacError::InvalidData(what))
        })
        .transpose()
}

impl CertificateDescription {
    /// Parse the DER encoded description
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let tlv = tlv::parse_single(data)?;
        let fields = tlv::constructed(&tlv, SEQUENCE_TAG, "expected certificate description")?;

        let description_type = ObjectIdentifier::new(Bytes::copy_from_slice(
            tlv::require_primitive(fields, OID_TAG, "description type")?,
        ));
        let issuer_name = string(fields, 0xA1, "issuer name")?
            .ok_or(EacError::MissingElement("issuer name"))?;
        let subject_name = string(fields, 0xA3, "subject name")?
            .ok_or(EacError::MissingElement("subject name"))?;

        let terms = explicit(fields, 0xA5).ok_or(EacError::MissingElement("terms of usage"))?;
        let terms = tlv::primitive(terms)?;
        let terms_of_usage = match description_type.as_bytes() {
            ID_PLAIN_FORMAT => TermsOfUsage::Plain(
                String::from_utf8(terms.to_vec()).map_err(|_| EacError::InvalidData("terms of usage"))?,
            ),
            ID_HTML_FORMAT => TermsOfUsage::Html(
                String::from_utf8(terms.to_vec()).map_err(|_| EacError::InvalidData("terms of usage"))?,
            ),
            ID_PDF_FORMAT => TermsOfUsage::Pdf(Bytes::copy_from_slice(terms)),
            _ => return Err(EacError::InvalidData("unknown description type")),
        };

        let comm_certificates = match explicit(fields, 0xA7) {
            Some(set) => tlv::constructed(set, SET_TAG, "expected set of communication certificates")?
                .iter()
                .filter(|hash| tlv::has_tag(hash, OCTET_STRING_TAG))
                .map(|hash| tlv::primitive(hash).map(Bytes::copy_from_slice))
                .collect::<Result<_>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            raw: Bytes::copy_from_slice(data),
            description_type,
            issuer_name,
            issuer_url: string(fields, 0xA2, "issuer URL")?,
            subject_name,
            subject_url: string(fields, 0xA4, "subject URL")?,
            terms_of_usage,
            redirect_url: string(fields, 0xA6, "redirect URL")?,
            comm_certificates,
        })
    }

    /// Encoded description
    pub const fn as_bytes(&self) -> &Bytes {
        &self.raw
    }

    /// Format of the terms of usage
    pub const fn description_type(&self) -> &ObjectIdentifier {
        &self.description_type
    }

    /// Name of the certificate issuer
    pub fn issuer_name(&self) -> &str {
        &self.issuer_name
    }

    /// URL of the certificate issuer
    pub fn issuer_url(&self) -> Option<&str> {
        self.issuer_url.as_deref()
    }

    /// Name of the eService provider
    pub fn subject_name(&self) -> &str {
        &self.subject_name
    }

    /// URL of the eService provider
    pub fn subject_url(&self) -> Option<&str> {
        self.subject_url.as_deref()
    }

    /// Terms of usage
    pub const fn terms_of_usage(&self) -> &TermsOfUsage {
        &self.terms_of_usage
    }

    /// Redirect URL after authentication
    pub fn redirect_url(&self) -> Option<&str> {
        self.redirect_url.as_deref()
    }

    /// Hashes of the TLS certificates of the eService
    pub fn comm_certificates(&self) -> &[Bytes] {
        &self.comm_certificates
    }
}
