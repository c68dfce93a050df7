//! PACE data structures and the PC/SC ExecutePACE codec
//!
//! Readers with an integrated PACE implementation expose the EXECUTE_PACE
//! feature. Requests are `bFunction(1) wLengthInputData(2, LE) data`, answers
//! are `dwResult(4, LE) wLengthOutputData(2, LE) data`.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use eidcard_apdu_core::StatusWord;
use zeroize::Zeroizing;

use crate::error::{IfdError, PaceFailure, Result};
use crate::terminal::TerminalError;

/// Protocol URI of PACE
pub const PACE_PROTOCOL_URI: &str = "urn:oid:0.4.0.127.0.7.2.2.4";

/// ExecutePACE function selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PaceFunction {
    /// Query the reader's PACE capabilities
    GetReaderPaceCapabilities = 0x01,
    /// Run PACE with the card
    EstablishPaceChannel = 0x02,
    /// Tear down the PACE secure messaging
    DestroyPaceChannel = 0x03,
}

/// Capability bits returned by GetReaderPACECapabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PaceCapability {
    /// PACE for qualified electronic signatures
    Qes,
    /// PACE with the eID application
    EId,
    /// Generic PACE
    GenericPace,
    /// Reader can destroy the PACE channel
    DestroyPaceChannel,
}

impl PaceCapability {
    const ALL: [Self; 4] = [Self::Qes, Self::EId, Self::GenericPace, Self::DestroyPaceChannel];

    /// Bit of this capability in the bitmap
    pub const fn bit(self) -> u8 {
        match self {
            Self::Qes => 0x10,
            Self::EId => 0x20,
            Self::GenericPace => 0x40,
            Self::DestroyPaceChannel => 0x80,
        }
    }
}

/// Set of PACE capabilities a reader advertises
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaceCapabilities(u8);

impl PaceCapabilities {
    /// Build from the capability bitmap
    pub const fn from_bitmap(bitmap: u8) -> Self {
        Self(bitmap)
    }

    /// Parse the output of GetReaderPACECapabilities (`len(1) bitmap`)
    pub fn parse(data: &[u8]) -> Self {
        match data {
            [_, bitmap, ..] | [bitmap] => Self(*bitmap),
            [] => Self(0),
        }
    }

    /// Raw bitmap
    pub const fn bitmap(self) -> u8 {
        self.0
    }

    /// Whether `capability` is advertised
    pub const fn contains(self, capability: PaceCapability) -> bool {
        self.0 & capability.bit() != 0
    }

    /// Whether any PACE mechanism is available
    pub const fn supports_pace(self) -> bool {
        self.contains(PaceCapability::GenericPace)
            || self.contains(PaceCapability::EId)
            || self.contains(PaceCapability::Qes)
    }

    /// Protocol URIs this reader implements natively
    pub fn protocols(self) -> Vec<String> {
        if self.supports_pace() {
            vec![PACE_PROTOCOL_URI.to_string()]
        } else {
            Vec::new()
        }
    }

    /// Advertised capabilities
    pub fn iter(self) -> impl Iterator<Item = PaceCapability> {
        PaceCapability::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

/// PACE password types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[repr(u8)]
pub enum PasswordId {
    /// Machine readable zone
    #[display("MRZ")]
    Mrz = 0x01,
    /// Card access number
    #[display("CAN")]
    Can = 0x02,
    /// eID PIN
    #[display("PIN")]
    Pin = 0x03,
    /// PIN unblocking key
    #[display("PUK")]
    Puk = 0x04,
}

impl PasswordId {
    /// Password id for its numeric reference
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Mrz),
            0x02 => Some(Self::Can),
            0x03 => Some(Self::Pin),
            0x04 => Some(Self::Puk),
            _ => None,
        }
    }

    /// Password id named by a DID (`"PIN"`, `"CAN"`, ...)
    pub fn from_did_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "MRZ" => Some(Self::Mrz),
            "CAN" => Some(Self::Can),
            "PIN" => Some(Self::Pin),
            "PUK" => Some(Self::Puk),
            _ => None,
        }
    }
}

/// Input of a PACE channel establishment
#[derive(Clone)]
pub struct PaceInput {
    /// Password type
    pub password_id: PasswordId,
    /// Requested access rights
    pub chat: Option<Bytes>,
    /// Password, `None` lets the reader ask on its pinpad
    pub pin: Option<Zeroizing<Vec<u8>>>,
    /// Certificate description shown by readers with a display
    pub certificate_description: Option<Bytes>,
}

impl fmt::Debug for PaceInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaceInput")
            .field("password_id", &self.password_id)
            .field("chat", &self.chat.as_ref().map(hex::encode))
            .field("pin", &self.pin.as_ref().map(|_| "<redacted>"))
            .field(
                "certificate_description_len",
                &self.certificate_description.as_ref().map(Bytes::len),
            )
            .finish()
    }
}

impl PaceInput {
    /// Input for `password_id` without optional fields
    pub const fn new(password_id: PasswordId) -> Self {
        Self {
            password_id,
            chat: None,
            pin: None,
            certificate_description: None,
        }
    }

    /// Set the CHAT
    pub fn with_chat(mut self, chat: impl Into<Bytes>) -> Self {
        self.chat = Some(chat.into());
        self
    }

    /// Set the password
    pub fn with_pin(mut self, pin: impl Into<Vec<u8>>) -> Self {
        self.pin = Some(Zeroizing::new(pin.into()));
        self
    }

    /// Set the certificate description
    pub fn with_certificate_description(mut self, description: impl Into<Bytes>) -> Self {
        self.certificate_description = Some(description.into());
        self
    }

    /// Whether a reader with `capabilities` can run this input natively
    pub const fn is_supported_by(&self, capabilities: PaceCapabilities) -> bool {
        if capabilities.contains(PaceCapability::GenericPace) {
            return true;
        }
        match self.password_id {
            PasswordId::Pin | PasswordId::Can | PasswordId::Puk => {
                capabilities.contains(PaceCapability::EId)
                    || capabilities.contains(PaceCapability::Qes)
            }
            PasswordId::Mrz => false,
        }
    }

    /// Encode the EstablishPACEChannel input data
    pub fn to_establish_bytes(&self) -> Result<Bytes> {
        let chat = self.chat.as_deref().unwrap_or_default();
        let pin = self.pin.as_deref().map(Vec::as_slice).unwrap_or_default();
        let desc = self.certificate_description.as_deref().unwrap_or_default();

        let chat_len = u8::try_from(chat.len())
            .map_err(|_| IfdError::InvalidParameter(format!("CHAT too long: {}", chat.len())))?;
        let pin_len = u8::try_from(pin.len())
            .map_err(|_| IfdError::InvalidParameter("PIN too long".to_string()))?;
        let desc_len = u16::try_from(desc.len()).map_err(|_| {
            IfdError::InvalidParameter(format!("certificate description too long: {}", desc.len()))
        })?;

        let mut buf = BytesMut::with_capacity(5 + chat.len() + pin.len() + desc.len());
        buf.put_u8(self.password_id as u8);
        buf.put_u8(chat_len);
        buf.put_slice(chat);
        buf.put_u8(pin_len);
        buf.put_slice(pin);
        buf.put_u16_le(desc_len);
        buf.put_slice(desc);
        Ok(buf.freeze())
    }
}

/// Result of a successful PACE establishment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaceOutput {
    /// Remaining password tries
    pub retry_counter: u8,
    /// Content of EF.CardAccess
    pub ef_card_access: Bytes,
    /// Most recent certification authority reference of the card
    pub car_current: Option<Bytes>,
    /// Previous certification authority reference of the card
    pub car_previous: Option<Bytes>,
    /// Identifier of the card for terminal authentication
    pub id_icc: Option<Bytes>,
    /// Whether the reader executed PACE itself
    pub native: bool,
}

impl PaceOutput {
    /// Parse the EstablishPACEChannel output data
    pub fn parse_establish(data: &[u8]) -> Result<Self> {
        let mut reader = FieldReader(data);
        let status = reader.take(2)?;
        let status = StatusWord::new(status[0], status[1]);
        let card_access_len = reader.u16_le()? as usize;
        let ef_card_access = Bytes::copy_from_slice(reader.take(card_access_len)?);

        let mut car_current = None;
        let mut car_previous = None;
        let mut id_icc = None;
        if !reader.is_empty() {
            let len = reader.u8()? as usize;
            car_current = reader.optional(len)?;
        }
        if !reader.is_empty() {
            let len = reader.u8()? as usize;
            car_previous = reader.optional(len)?;
        }
        if !reader.is_empty() {
            let len = reader.u16_le()? as usize;
            id_icc = reader.optional(len)?;
        }

        Ok(Self {
            retry_counter: retry_counter(status),
            ef_card_access,
            car_current,
            car_previous,
            id_icc,
            native: true,
        })
    }
}

/// Remaining password tries encoded in the MSE:Set AT status word
pub const fn retry_counter(status: StatusWord) -> u8 {
    if status.is_success() {
        3
    } else {
        match status.counter_value() {
            Some(tries) => tries,
            None => 0,
        }
    }
}

struct FieldReader<'a>(&'a [u8]);

impl<'a> FieldReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.0.len() < len {
            return Err(IfdError::Io(TerminalError::message(
                "truncated ExecutePACE response",
            )));
        }
        let (head, tail) = self.0.split_at(len);
        self.0 = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16_le(&mut self) -> Result<u16> {
        let raw = self.take(2)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    fn optional(&mut self, len: usize) -> Result<Option<Bytes>> {
        let raw = self.take(len)?;
        Ok((!raw.is_empty()).then(|| Bytes::copy_from_slice(raw)))
    }

    const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Encode an ExecutePACE request
pub fn execute_pace_request(function: PaceFunction, input: &[u8]) -> Result<Bytes> {
    let len = u16::try_from(input.len())
        .map_err(|_| IfdError::InvalidParameter("ExecutePACE input too long".to_string()))?;
    let mut buf = BytesMut::with_capacity(3 + input.len());
    buf.put_u8(function as u8);
    buf.put_u16_le(len);
    buf.put_slice(input);
    Ok(buf.freeze())
}

/// Decode an ExecutePACE answer, mapping `dwResult` to a typed error
pub fn parse_execute_pace_response(raw: &[u8]) -> Result<Bytes> {
    let mut reader = FieldReader(raw);
    let result = reader.take(4)?;
    let result = u32::from_le_bytes([result[0], result[1], result[2], result[3]]);
    if result != 0 {
        return Err(map_pace_result(result));
    }
    let len = reader.u16_le()? as usize;
    Ok(Bytes::copy_from_slice(reader.take(len)?))
}

/// Map a non-zero `dwResult` to an [`IfdError`]
pub fn map_pace_result(result: u32) -> IfdError {
    match result {
        0xF010_0001 | 0xF010_0002 => IfdError::NoCardPresent(String::new()),
        0xF020_0001 => IfdError::CancellationByUser,
        0xF020_0002 => IfdError::NativePace(PaceFailure::Timeout),
        r if r & 0xFFFF_0000 == 0xF000_0000 => {
            IfdError::NativePace(PaceFailure::Card(StatusWord::from_u16(r as u16)))
        }
        r if r & 0xFFFF_FFF0 == 0xD000_0000 => IfdError::NativePace(PaceFailure::InputData(r)),
        r if r & 0xFFFF_FFF0 == 0xE000_0000 => IfdError::NativePace(PaceFailure::Protocol(r)),
        r => IfdError::NativePace(PaceFailure::Unknown(r)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use hex_literal::hex;

    #[test]
    fn test_capabilities() {
        let caps = PaceCapabilities::parse(&hex!("01 E0"));
        assert!(caps.contains(PaceCapability::EId));
        assert!(caps.contains(PaceCapability::GenericPace));
        assert!(caps.contains(PaceCapability::DestroyPaceChannel));
        assert!(!caps.contains(PaceCapability::Qes));
        assert_eq!(caps.protocols(), vec![PACE_PROTOCOL_URI.to_string()]);

        let caps = PaceCapabilities::from_bitmap(0x80);
        assert!(!caps.supports_pace());
        assert!(caps.protocols().is_empty());
    }

    #[test]
    fn test_establish_request_layout() {
        let input = PaceInput::new(PasswordId::Pin)
            .with_chat(hex!("7F4C 12 060904007F000703010202 53050000000004").to_vec())
            .with_pin(b"123456".to_vec())
            .with_certificate_description(hex!("3003020101").to_vec());
        let data = input.to_establish_bytes().unwrap();

        assert_eq!(data[0], 0x03);
        assert_eq!(data[1], 0x15);
        let pin_offset = 2 + 0x15;
        assert_eq!(data[pin_offset], 6);
        assert_eq!(&data[pin_offset + 1..pin_offset + 7], b"123456");
        assert_eq!(&data[pin_offset + 7..pin_offset + 9], &[0x05, 0x00]);
        assert_eq!(&data[pin_offset + 9..], &hex!("3003020101"));

        let request = execute_pace_request(PaceFunction::EstablishPaceChannel, &data).unwrap();
        assert_eq!(request[0], 0x02);
        assert_eq!(u16::from_le_bytes([request[1], request[2]]) as usize, data.len());
    }

    #[test]
    fn test_empty_establish_request() {
        let data = PaceInput::new(PasswordId::Can).to_establish_bytes().unwrap();
        assert_eq!(data.as_ref(), &hex!("02 00 00 0000"));
    }

    #[test]
    fn test_parse_establish_output() {
        let data = hex!(
            "9000"
            "0300" "310100"
            "05" "4445435643"
            "00"
            "0200" "AABB"
        );
        let output = PaceOutput::parse_establish(&data).unwrap();
        assert_eq!(output.retry_counter, 3);
        assert_eq!(output.ef_card_access.as_ref(), &hex!("310100"));
        assert_eq!(output.car_current.as_deref(), Some(&b"DECVC"[..]));
        assert!(output.car_previous.is_none());
        assert_eq!(output.id_icc.as_deref(), Some(&hex!("AABB")[..]));
    }

    #[test]
    fn test_retry_counter() {
        assert_eq!(retry_counter(StatusWord::new(0x90, 0x00)), 3);
        assert_eq!(retry_counter(StatusWord::new(0x63, 0xC2)), 2);
        assert_eq!(retry_counter(StatusWord::new(0x69, 0x83)), 0);
    }

    #[test]
    fn test_execute_pace_response() {
        let data = parse_execute_pace_response(&hex!("00000000 0200 01E0")).unwrap();
        assert_eq!(data.as_ref(), &hex!("01E0"));

        let err = parse_execute_pace_response(&hex!("010020F0 0000")).unwrap_err();
        assert!(err.is_cancellation());

        let err = parse_execute_pace_response(&hex!("020020F0 0000")).unwrap_err();
        assert!(matches!(err, IfdError::NativePace(PaceFailure::Timeout)));

        let err = parse_execute_pace_response(&hex!("C26300F0 0000")).unwrap_err();
        assert!(matches!(
            err,
            IfdError::NativePace(PaceFailure::Card(sw)) if sw == StatusWord::new(0x63, 0xC2)
        ));

        let err = parse_execute_pace_response(&hex!("020000D0 0000")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NativePaceError);

        let err = parse_execute_pace_response(&hex!("010010F0 0000")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoCardPresent);
    }

    #[test]
    fn test_native_support_check() {
        let eid_only = PaceCapabilities::from_bitmap(0x20);
        assert!(PaceInput::new(PasswordId::Pin).is_supported_by(eid_only));
        assert!(!PaceInput::new(PasswordId::Mrz).is_supported_by(eid_only));
        assert!(PaceInput::new(PasswordId::Mrz).is_supported_by(PaceCapabilities::from_bitmap(0x40)));
    }

    #[test]
    fn test_password_id_from_did_name() {
        assert_eq!(PasswordId::from_did_name("PIN"), Some(PasswordId::Pin));
        assert_eq!(PasswordId::from_did_name("can"), Some(PasswordId::Can));
        assert_eq!(PasswordId::from_did_name("QES"), None);
        assert_eq!(PasswordId::from_u8(4), Some(PasswordId::Puk));
    }
}
