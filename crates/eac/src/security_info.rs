//! SecurityInfos read from EF.CardAccess

use bytes::Bytes;
use iso7816_tlv::ber::Value;

use crate::error::{EacError, Result};
use crate::oid::{self, ObjectIdentifier};
use crate::tlv;

const SET_TAG: &[u8] = &[0x31];
const SEQUENCE_TAG: &[u8] = &[0x30];
const OID_TAG: &[u8] = &[0x06];
const INTEGER_TAG: &[u8] = &[0x02];

/// One `SecurityInfo ::= SEQUENCE { protocol, requiredData, optionalData }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityInfo {
    /// Protocol OID
    pub protocol: ObjectIdentifier,
    /// Version, when the required data is an integer
    pub version: Option<u32>,
    /// Parameter id, when the optional data is an integer
    pub parameter_id: Option<u32>,
    /// Encoded SEQUENCE
    pub raw: Bytes,
}

impl SecurityInfo {
    /// Whether the protocol belongs to PACE
    pub fn is_pace(&self) -> bool {
        self.protocol.starts_with(oid::ID_PACE)
    }

    /// Whether the protocol belongs to chip authentication
    pub fn is_chip_authentication(&self) -> bool {
        self.protocol.starts_with(oid::ID_CA)
    }

    /// Whether the protocol belongs to terminal authentication
    pub fn is_terminal_authentication(&self) -> bool {
        self.protocol.starts_with(oid::ID_TA)
    }
}

/// `SecurityInfos ::= SET OF SecurityInfo`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityInfos {
    raw: Bytes,
    infos: Vec<SecurityInfo>,
}

fn integer(value: Option<&iso7816_tlv::ber::Tlv>) -> Option<u32> {
    let value = value?;
    if !tlv::has_tag(value, INTEGER_TAG) {
        return None;
    }
    match value.value() {
        Value::Primitive(bytes) => tlv::unsigned(bytes).ok(),
        Value::Constructed(_) => None,
    }
}

impl SecurityInfos {
    /// Parse the content of EF.CardAccess
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let set = tlv::parse_single(data)?;
        let entries = tlv::constructed(&set, SET_TAG, "expected SET of SecurityInfo")?;

        let mut infos = Vec::with_capacity(entries.len());
        for entry in entries {
            let fields = tlv::constructed(entry, SEQUENCE_TAG, "expected SecurityInfo sequence")?;
            let protocol = match fields.first() {
                Some(first) if tlv::has_tag(first, OID_TAG) => {
                    ObjectIdentifier::new(Bytes::copy_from_slice(tlv::primitive(first)?))
                }
                _ => return Err(EacError::MissingElement("SecurityInfo protocol")),
            };
            if fields.len() < 2 {
                return Err(EacError::MissingElement("SecurityInfo required data"));
            }
            infos.push(SecurityInfo {
                protocol,
                version: integer(fields.get(1)),
                parameter_id: integer(fields.get(2)),
                raw: tlv::encoded(entry),
            });
        }

        Ok(Self {
            raw: Bytes::copy_from_slice(data),
            infos,
        })
    }

    /// Encoded EF.CardAccess
    pub const fn as_bytes(&self) -> &Bytes {
        &self.raw
    }

    /// All entries
    pub fn infos(&self) -> &[SecurityInfo] {
        &self.infos
    }

    /// PACEInfo and PACEDomainParameterInfo entries
    pub fn pace_infos(&self) -> impl Iterator<Item = &SecurityInfo> {
        self.infos.iter().filter(|info| info.is_pace())
    }

    /// Chip authentication entries
    pub fn chip_authentication_infos(&self) -> impl Iterator<Item = &SecurityInfo> {
        self.infos.iter().filter(|info| info.is_chip_authentication())
    }

    /// Terminal authentication entries
    pub fn terminal_authentication_infos(&self) -> impl Iterator<Item = &SecurityInfo> {
        self.infos.iter().filter(|info| info.is_terminal_authentication())
    }
}
