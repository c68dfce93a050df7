//! Certificate Holder Authorization Template
//!
//! A CHAT (`7F4C`) names a terminal type by OID and carries a bitmap of
//! access rights. The two most significant bits of the bitmap encode the
//! role of the certificate holder; the remaining bits are rights whose meaning
//! depends on the terminal type.

use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::error::{EacError, Result};
use crate::oid::{self, ObjectIdentifier};
use crate::tlv;

/// Tag of a CHAT
pub const CHAT_TAG: &[u8] = &[0x7F, 0x4C];
const OID_TAG: &[u8] = &[0x06];
const DISCRETIONARY_DATA_TAG: &[u8] = &[0x53];

/// Terminal type named by the CHAT OID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum TerminalType {
    /// Inspection system
    #[display("IS")]
    InspectionSystem,
    /// Authentication terminal
    #[display("AT")]
    AuthenticationTerminal,
    /// Signature terminal
    #[display("ST")]
    SignatureTerminal,
}

impl TerminalType {
    fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        match oid.as_bytes() {
            oid::ID_IS => Some(Self::InspectionSystem),
            oid::ID_AT => Some(Self::AuthenticationTerminal),
            oid::ID_ST => Some(Self::SignatureTerminal),
            _ => None,
        }
    }

    /// Length of the rights bitmap for this terminal type
    pub const fn rights_len(self) -> usize {
        match self {
            Self::AuthenticationTerminal => 5,
            Self::InspectionSystem | Self::SignatureTerminal => 1,
        }
    }
}

/// Role of the certificate holder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Role {
    /// Country verifying certification authority
    #[display("CVCA")]
    Cvca,
    /// Official domestic document verifier
    #[display("DV (official domestic)")]
    DvOfficialDomestic,
    /// Non-official or foreign document verifier
    #[display("DV (non-official / foreign)")]
    DvNonOfficial,
    /// Terminal
    #[display("Terminal")]
    Terminal,
}

impl Role {
    const fn from_bits(bits: u8) -> Self {
        match bits >> 6 {
            0b11 => Self::Cvca,
            0b10 => Self::DvOfficialDomestic,
            0b01 => Self::DvNonOfficial,
            _ => Self::Terminal,
        }
    }

    /// Whether the holder is a document verifier
    pub const fn is_dv(self) -> bool {
        matches!(self, Self::DvOfficialDomestic | Self::DvNonOfficial)
    }
}

/// Access rights of an authentication terminal, by bit position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum AccessRight {
    /// Age verification
    #[display("Age verification")]
    AgeVerification,
    /// Community ID verification
    #[display("Community ID verification")]
    CommunityIdVerification,
    /// Restricted identification
    #[display("Restricted identification")]
    RestrictedIdentification,
    /// Privileged terminal
    #[display("Privileged terminal")]
    PrivilegedTerminal,
    /// PACE with CAN allowed
    #[display("CAN allowed")]
    CanAllowed,
    /// PIN management
    #[display("PIN management")]
    PinManagement,
    /// Install certificate
    #[display("Install certificate")]
    InstallCertificate,
    /// Install qualified certificate
    #[display("Install qualified certificate")]
    InstallQualifiedCertificate,
    /// Read access to a data group (1 to 21)
    #[display("Read DG{_0}")]
    ReadDataGroup(u8),
    /// Write access to a data group (17 to 22)
    #[display("Write DG{_0}")]
    WriteDataGroup(u8),
}

impl AccessRight {
    /// Bit position counted from the least significant bit of the bitmap
    pub const fn bit(self) -> u32 {
        match self {
            Self::AgeVerification => 0,
            Self::CommunityIdVerification => 1,
            Self::RestrictedIdentification => 2,
            Self::PrivilegedTerminal => 3,
            Self::CanAllowed => 4,
            Self::PinManagement => 5,
            Self::InstallCertificate => 6,
            Self::InstallQualifiedCertificate => 7,
            Self::ReadDataGroup(dg) => 7 + dg as u32,
            Self::WriteDataGroup(dg) => 32 + (22 - dg as u32),
        }
    }

    fn from_bit(bit: u32) -> Option<Self> {
        Some(match bit {
            0 => Self::AgeVerification,
            1 => Self::CommunityIdVerification,
            2 => Self::RestrictedIdentification,
            3 => Self::PrivilegedTerminal,
            4 => Self::CanAllowed,
            5 => Self::PinManagement,
            6 => Self::InstallCertificate,
            7 => Self::InstallQualifiedCertificate,
            8..=28 => Self::ReadDataGroup((bit - 7) as u8),
            32..=37 => Self::WriteDataGroup((22 - (bit - 32)) as u8),
            _ => return None,
        })
    }
}

/// Parsed CHAT
#[derive(Clone, PartialEq, Eq)]
pub struct Chat {
    oid: ObjectIdentifier,
    terminal_type: TerminalType,
    bitmap: Bytes,
}

impl fmt::Debug for Chat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chat")
            .field("terminal_type", &self.terminal_type)
            .field("role", &self.role())
            .field("bitmap", &hex::encode_upper(&self.bitmap))
            .finish()
    }
}

impl Chat {
    /// Parse the encoded `7F4C` template
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let tlv = tlv::parse_single(data)?;
        Self::from_tlv(&tlv)
    }

    pub(crate) fn from_tlv(tlv: &iso7816_tlv::ber::Tlv) -> Result<Self> {
        let children = tlv::constructed(tlv, CHAT_TAG, "expected CHAT template")?;
        let oid = ObjectIdentifier::new(Bytes::copy_from_slice(tlv::require_primitive(
            children,
            OID_TAG,
            "CHAT terminal type",
        )?));
        let terminal_type =
            TerminalType::from_oid(&oid).ok_or(EacError::InvalidData("unknown CHAT terminal type"))?;
        let bitmap = tlv::require_primitive(children, DISCRETIONARY_DATA_TAG, "CHAT access rights")?;
        if bitmap.len() != terminal_type.rights_len() {
            return Err(EacError::InvalidData("CHAT bitmap length does not fit terminal type"));
        }
        Ok(Self {
            oid,
            terminal_type,
            bitmap: Bytes::copy_from_slice(bitmap),
        })
    }

    /// CHAT of `terminal_type` with the given bitmap
    pub fn new(terminal_type: TerminalType, bitmap: impl Into<Bytes>) -> Result<Self> {
        let bitmap = bitmap.into();
        if bitmap.len() != terminal_type.rights_len() {
            return Err(EacError::InvalidData("CHAT bitmap length does not fit terminal type"));
        }
        let oid = match terminal_type {
            TerminalType::InspectionSystem => oid::ID_IS,
            TerminalType::AuthenticationTerminal => oid::ID_AT,
            TerminalType::SignatureTerminal => oid::ID_ST,
        };
        Ok(Self {
            oid: ObjectIdentifier::new(oid),
            terminal_type,
            bitmap,
        })
    }

    /// Encode the `7F4C` template
    pub fn to_bytes(&self) -> Bytes {
        let mut inner = BytesMut::new();
        tlv::encode(OID_TAG, self.oid.as_bytes(), &mut inner);
        tlv::encode(DISCRETIONARY_DATA_TAG, &self.bitmap, &mut inner);
        let mut out = BytesMut::with_capacity(inner.len() + 4);
        tlv::encode(CHAT_TAG, &inner, &mut out);
        out.freeze()
    }

    /// Terminal type OID
    pub const fn oid(&self) -> &ObjectIdentifier {
        &self.oid
    }

    /// Terminal type
    pub const fn terminal_type(&self) -> TerminalType {
        self.terminal_type
    }

    /// Role encoded in the two most significant bits
    pub fn role(&self) -> Role {
        Role::from_bits(self.bitmap.first().copied().unwrap_or_default())
    }

    /// Raw bitmap including the role bits
    pub fn bitmap(&self) -> &[u8] {
        &self.bitmap
    }

    fn rights_value(&self) -> u64 {
        let value = self.bitmap.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        let role_shift = self.bitmap.len() as u32 * 8 - 2;
        value & ((1u64 << role_shift) - 1)
    }

    /// Whether the right at bit `bit` is granted
    pub fn has_bit(&self, bit: u32) -> bool {
        self.rights_value() & (1u64 << bit) != 0
    }

    /// Whether `right` is granted. Only meaningful for authentication terminals.
    pub fn has_right(&self, right: AccessRight) -> bool {
        self.terminal_type == TerminalType::AuthenticationTerminal && self.has_bit(right.bit())
    }

    /// Named access rights of an authentication terminal
    pub fn access_rights(&self) -> Vec<AccessRight> {
        if self.terminal_type != TerminalType::AuthenticationTerminal {
            return Vec::new();
        }
        let value = self.rights_value();
        (0..38)
            .filter(|bit| value & (1u64 << bit) != 0)
            .filter_map(AccessRight::from_bit)
            .collect()
    }

    /// Copy with `right` granted or revoked. Rights outside the bitmap of
    /// this terminal type leave it unchanged.
    pub fn with_right(&self, right: AccessRight, granted: bool) -> Self {
        let mut bitmap = self.bitmap.to_vec();
        let bit = right.bit() as usize;
        let Some(index) = (bitmap.len() - 1).checked_sub(bit / 8) else {
            return self.clone();
        };
        let mask = 1u8 << (bit % 8);
        if granted {
            bitmap[index] |= mask;
        } else {
            bitmap[index] &= !mask;
        }
        Self {
            oid: self.oid.clone(),
            terminal_type: self.terminal_type,
            bitmap: Bytes::from(bitmap),
        }
    }

    /// Check a CHAT selected by the user against the requested ones.
    ///
    /// The selection must keep every right of `required` and may only add
    /// rights contained in `optional`.
    pub fn validate_selection(&self, required: &Self, optional: Option<&Self>) -> Result<()> {
        if self.terminal_type != required.terminal_type
            || optional.is_some_and(|o| o.terminal_type != required.terminal_type)
        {
            return Err(EacError::ChatNotAllowed("terminal types differ"));
        }
        let selected = self.rights_value();
        let required_rights = required.rights_value();
        let allowed = required_rights | optional.map_or(0, Self::rights_value);

        if selected & required_rights != required_rights {
            return Err(EacError::ChatNotAllowed("required right deselected"));
        }
        if selected & !allowed != 0 {
            return Err(EacError::ChatNotAllowed("right not requested"));
        }
        Ok(())
    }
}

impl fmt::Display for Chat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.terminal_type, hex::encode_upper(&self.bitmap))
    }
}
