//! APDU command definitions
//!
//! This module provides the command APDU type and the ISO/IEC 7816-4 body
//! case resolution used to decode encoded commands.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::{Error, Result};

/// Expected length type for APDU commands
///
/// Valid values are `1..=65536`. The encoded Le byte `00` stands for 256 and the
/// extended encoding `00 00` stands for 65536.
pub type ExpectedLength = u32;

/// Largest expected length an extended Le field can express
pub const MAX_EXPECTED_LENGTH: ExpectedLength = 65536;

/// Largest data field an extended Lc field can describe
pub const MAX_DATA_LENGTH: usize = 65535;

/// Instruction byte of MANAGE CHANNEL
pub const INS_MANAGE_CHANNEL: u8 = 0x70;

/// Generic APDU command structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (optional)
    pub data: Option<Bytes>,
    /// Expected length (optional)
    pub le: Option<ExpectedLength>,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Create a new command with expected response length (Le)
    pub const fn new_with_le(cla: u8, ins: u8, p1: u8, p2: u8, le: ExpectedLength) -> Self {
        Self::new(cla, ins, p1, p2).with_le(le)
    }

    /// Create a new command with data payload
    pub fn new_with_data<T: Into<Bytes>>(cla: u8, ins: u8, p1: u8, p2: u8, data: T) -> Self {
        Self::new(cla, ins, p1, p2).with_data(data)
    }

    /// Create a new command with both data and expected length
    pub fn new_with_data_and_le<T: Into<Bytes>>(
        cla: u8,
        ins: u8,
        p1: u8,
        p2: u8,
        data: T,
        le: ExpectedLength,
    ) -> Self {
        Self::new(cla, ins, p1, p2).with_data(data).with_le(le)
    }

    /// Set the data field. An empty payload clears it.
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        let data = data.into();
        self.data = (!data.is_empty()).then_some(data);
        self
    }

    /// Set the expected length field. Zero means no Le field.
    pub const fn with_le(mut self, le: ExpectedLength) -> Self {
        self.le = if le == 0 { None } else { Some(le) };
        self
    }

    /// Length of the data field
    pub fn lc(&self) -> usize {
        self.data.as_ref().map_or(0, Bytes::len)
    }

    /// Whether this command needs extended length fields
    pub fn is_extended(&self) -> bool {
        self.lc() > 255 || self.le.is_some_and(|le| le > 256)
    }

    /// Whether the class byte indicates secure messaging
    pub const fn is_secure_messaging(&self) -> bool {
        self.cla & 0x0F == 0x0C
    }

    /// Mark the command as secure messaging protected
    pub const fn with_secure_messaging(mut self) -> Self {
        self.cla |= 0x0C;
        self
    }

    /// Mark the command as part of a command chain
    pub const fn with_chaining(mut self) -> Self {
        self.cla |= 0x10;
        self
    }

    /// Whether this is a MANAGE CHANNEL command
    pub const fn is_manage_channel(&self) -> bool {
        self.ins == INS_MANAGE_CHANNEL
    }

    /// Calculate length of serialized command
    pub fn command_length(&self) -> usize {
        let lc = self.lc();
        let mut length = 4;

        if lc > 0 {
            length += if lc > 255 { 3 } else { 1 } + lc;
        }

        if let Some(le) = self.le {
            length += match (lc > 255, le > 256) {
                (true, _) => 2,
                (false, true) => 3,
                (false, false) => 1,
            };
        }

        length
    }

    /// Encode to raw APDU bytes
    ///
    /// Short fields are used when both Lc and Le fit in one byte. An extended
    /// Lc is written as `00 hi lo`. When Lc is short or absent, an extended Le
    /// is preceded by a `00` byte.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let lc = self.lc();
        if lc > MAX_DATA_LENGTH {
            return Err(Error::DataTooLong(lc));
        }
        if let Some(le) = self.le {
            if le > MAX_EXPECTED_LENGTH {
                return Err(Error::InvalidExpectedLength(le));
            }
        }

        let mut buffer = BytesMut::with_capacity(self.command_length());

        // Header: CLA, INS, P1, P2
        buffer.put_u8(self.cla);
        buffer.put_u8(self.ins);
        buffer.put_u8(self.p1);
        buffer.put_u8(self.p2);

        if let Some(data) = &self.data {
            if lc > 255 {
                buffer.put_u8(0x00);
                buffer.put_u16(lc as u16);
            } else {
                buffer.put_u8(lc as u8);
            }
            buffer.put_slice(data);
        }

        if let Some(le) = self.le {
            if lc > 255 || le > 256 {
                if lc <= 255 {
                    buffer.put_u8(0x00);
                }
                // 65536 wraps to 00 00
                buffer.put_u16(le as u16);
            } else {
                // 256 wraps to 00
                buffer.put_u8(le as u8);
            }
        }

        let bytes = buffer.freeze();
        trace!(apdu = %hex::encode(&bytes), extended = self.is_extended(), "Encoded command APDU");
        Ok(bytes)
    }

    /// Parse a command from raw bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::InvalidCommandLength(data.len()));
        }

        let body = classify_body(&data[4..])?;
        trace!(case = ?body.case, lc = body.lc, le = ?body.le, "Classified command body");

        Ok(Self {
            cla: data[0],
            ins: data[1],
            p1: data[2],
            p2: data[3],
            data: (!body.data.is_empty()).then_some(body.data),
            le: body.le,
        })
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = Error;

    fn try_from(data: &[u8]) -> Result<Self> {
        Self::from_bytes(data)
    }
}

/// The ISO/IEC 7816-4 body cases, including the mixed length forms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyCase {
    /// Case 1: no body
    NoBody,
    /// Case 2: short Le
    ShortLe,
    /// Case 2E: extended Le
    ExtendedLe,
    /// Case 3: short Lc and data
    ShortData,
    /// Case 3E: extended Lc and data
    ExtendedData,
    /// Case 4: short Lc, data, short Le
    ShortDataShortLe,
    /// Short Lc, data, extended Le
    ShortDataExtendedLe,
    /// Extended Lc, data, short Le
    ExtendedDataShortLe,
    /// Case 4E: extended Lc, data, extended Le
    ExtendedDataExtendedLe,
}

/// Decoded body of a command APDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBody {
    /// Resolved body case
    pub case: BodyCase,
    /// Length of the data field, zero when absent
    pub lc: usize,
    /// Expected length, if present
    pub le: Option<ExpectedLength>,
    /// Data field, empty when absent
    pub data: Bytes,
}

impl CommandBody {
    const fn empty() -> Self {
        Self {
            case: BodyCase::NoBody,
            lc: 0,
            le: None,
            data: Bytes::new(),
        }
    }
}

const fn short_le(byte: u8) -> ExpectedLength {
    if byte == 0 { 256 } else { byte as ExpectedLength }
}

const fn extended_le(hi: u8, lo: u8) -> ExpectedLength {
    let value = ((hi as ExpectedLength) << 8) | lo as ExpectedLength;
    if value == 0 { MAX_EXPECTED_LENGTH } else { value }
}

/// Resolve the body (everything after the 4 byte header) of a command APDU
///
/// The cases are tried in a fixed order: a single byte is a short Le, a
/// leading `00` announces extended fields, any other first byte is a short Lc.
pub fn classify_body(body: &[u8]) -> Result<CommandBody> {
    match body {
        [] => Ok(CommandBody::empty()),
        [le] => Ok(CommandBody {
            case: BodyCase::ShortLe,
            le: Some(short_le(*le)),
            ..CommandBody::empty()
        }),
        [0x00, rest @ ..] => classify_extended(rest),
        [lc, rest @ ..] => {
            let lc = *lc as usize;
            if rest.len() < lc {
                return Err(Error::MalformedApdu("data shorter than Lc"));
            }
            let (data, trailer) = rest.split_at(lc);
            let data = Bytes::copy_from_slice(data);
            match trailer {
                [] => Ok(CommandBody {
                    case: BodyCase::ShortData,
                    lc,
                    le: None,
                    data,
                }),
                [le] => Ok(CommandBody {
                    case: BodyCase::ShortDataShortLe,
                    lc,
                    le: Some(short_le(*le)),
                    data,
                }),
                [0x00, hi, lo] => Ok(CommandBody {
                    case: BodyCase::ShortDataExtendedLe,
                    lc,
                    le: Some(extended_le(*hi, *lo)),
                    data,
                }),
                _ => Err(Error::MalformedApdu("unexpected bytes after short Lc data")),
            }
        }
    }
}

fn classify_extended(rest: &[u8]) -> Result<CommandBody> {
    match rest {
        [hi, lo] => Ok(CommandBody {
            case: BodyCase::ExtendedLe,
            le: Some(extended_le(*hi, *lo)),
            ..CommandBody::empty()
        }),
        [hi, lo, tail @ ..] if !tail.is_empty() => {
            let lc = ((*hi as usize) << 8) | *lo as usize;
            if lc == 0 {
                return Err(Error::MalformedApdu("extended Lc of zero"));
            }
            if tail.len() < lc {
                return Err(Error::MalformedApdu("data shorter than extended Lc"));
            }
            let (data, trailer) = tail.split_at(lc);
            let data = Bytes::copy_from_slice(data);
            let (case, le) = match trailer {
                [] => (BodyCase::ExtendedData, None),
                [le] => (BodyCase::ExtendedDataShortLe, Some(short_le(*le))),
                [hi, lo] | [0x00, hi, lo] => {
                    (BodyCase::ExtendedDataExtendedLe, Some(extended_le(*hi, *lo)))
                }
                _ => {
                    return Err(Error::MalformedApdu(
                        "unexpected bytes after extended Lc data",
                    ));
                }
            };
            Ok(CommandBody { case, lc, le, data })
        }
        _ => Err(Error::MalformedApdu("truncated extended length field")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_command_serialization() {
        let data = Bytes::from_static(&[0xA0, 0x00, 0x00, 0x01, 0x51, 0x00]);
        let cmd = Command::new_with_data_and_le(0x00, 0xA4, 0x04, 0x00, data, 256);
        let bytes = cmd.to_bytes().unwrap();

        assert_eq!(bytes[0], 0x00); // CLA
        assert_eq!(bytes[1], 0xA4); // INS
        assert_eq!(bytes[2], 0x04); // P1
        assert_eq!(bytes[3], 0x00); // P2
        assert_eq!(bytes[4], 0x06); // Lc
        assert_eq!(&bytes[5..11], &[0xA0, 0x00, 0x00, 0x01, 0x51, 0x00]);
        assert_eq!(bytes[11], 0x00); // Le = 256
        assert_eq!(bytes.len(), cmd.command_length());
    }

    #[test]
    fn test_short_lc_boundaries() {
        let cmd = Command::new_with_data(0x00, 0xD6, 0x00, 0x00, vec![0xAB; 1]);
        assert_eq!(cmd.to_bytes().unwrap().as_ref(), &hex!("00D6000001AB"));

        let cmd = Command::new_with_data(0x00, 0xD6, 0x00, 0x00, vec![0xAB; 255]);
        let bytes = cmd.to_bytes().unwrap();
        assert_eq!(bytes[4], 0xFF);
        assert_eq!(bytes.len(), 4 + 1 + 255);
    }

    #[test]
    fn test_extended_lc() {
        let cmd = Command::new_with_data(0x00, 0xD6, 0x00, 0x00, vec![0x11; 256]);
        let bytes = cmd.to_bytes().unwrap();
        assert_eq!(&bytes[4..7], &hex!("000100"));
        assert_eq!(bytes.len(), 4 + 3 + 256);

        let cmd = Command::new_with_data(0x00, 0xD6, 0x00, 0x00, vec![0x11; 65535]);
        let bytes = cmd.to_bytes().unwrap();
        assert_eq!(&bytes[4..7], &hex!("00FFFF"));

        let cmd = Command::new_with_data(0x00, 0xD6, 0x00, 0x00, vec![0x11; 65536]);
        assert_eq!(cmd.to_bytes(), Err(Error::DataTooLong(65536)));
    }

    #[test]
    fn test_extended_le_encoding() {
        let cmd = Command::new_with_le(0x00, 0xB0, 0x00, 0x00, 257);
        assert_eq!(cmd.to_bytes().unwrap().as_ref(), &hex!("00B00000000101"));

        let cmd = Command::new_with_le(0x00, 0xB0, 0x00, 0x00, 65536);
        assert_eq!(cmd.to_bytes().unwrap().as_ref(), &hex!("00B00000000000"));

        // short Lc followed by extended Le keeps the padding byte
        let cmd = Command::new_with_data_and_le(0x00, 0xB0, 0x00, 0x00, vec![0x01], 1000);
        assert_eq!(cmd.to_bytes().unwrap().as_ref(), &hex!("00B000000101" "0003E8"));

        let cmd = Command::new_with_le(0x00, 0xB0, 0x00, 0x00, 65537);
        assert_eq!(cmd.to_bytes(), Err(Error::InvalidExpectedLength(65537)));
    }

    #[test]
    fn test_extended_lc_forces_two_byte_le() {
        let cmd = Command::new_with_data_and_le(0x00, 0x2A, 0x00, 0xBE, vec![0x22; 300], 256);
        let bytes = cmd.to_bytes().unwrap();
        assert_eq!(&bytes[bytes.len() - 2..], &hex!("0100"));
        assert_eq!(Command::from_bytes(&bytes).unwrap(), cmd);
    }

    #[test]
    fn test_zero_le_means_absent() {
        let cmd = Command::new_with_le(0x00, 0xB0, 0x00, 0x00, 0);
        assert!(cmd.le.is_none());
        assert_eq!(cmd.to_bytes().unwrap().as_ref(), &hex!("00B00000"));
    }

    #[test]
    fn test_le_zero_byte_decodes_to_256() {
        let cmd = Command::from_bytes(&hex!("00B0000000")).unwrap();
        assert_eq!(cmd.le, Some(256));

        let cmd = Command::from_bytes(&hex!("00B00000020102" "00")).unwrap();
        assert_eq!(cmd.le, Some(256));
    }

    #[test]
    fn test_extended_le_zero_decodes_to_65536() {
        let cmd = Command::from_bytes(&hex!("00B00000000000")).unwrap();
        assert_eq!(cmd.le, Some(65536));

        let body = classify_body(&hex!("000001AA0000")).unwrap();
        assert_eq!(body.case, BodyCase::ExtendedDataExtendedLe);
        assert_eq!(body.le, Some(65536));
    }

    #[test]
    fn test_classify_body_cases() {
        assert_eq!(classify_body(&[]).unwrap().case, BodyCase::NoBody);
        assert_eq!(classify_body(&hex!("10")).unwrap().case, BodyCase::ShortLe);
        assert_eq!(classify_body(&hex!("000100")).unwrap().case, BodyCase::ExtendedLe);

        let body = classify_body(&hex!("03010203")).unwrap();
        assert_eq!(body.case, BodyCase::ShortData);
        assert_eq!(body.lc, 3);
        assert_eq!(body.data.as_ref(), &hex!("010203"));
        assert!(body.le.is_none());

        let body = classify_body(&hex!("0301020310")).unwrap();
        assert_eq!(body.case, BodyCase::ShortDataShortLe);
        assert_eq!(body.le, Some(0x10));

        let body = classify_body(&hex!("0301020300" "0200")).unwrap();
        assert_eq!(body.case, BodyCase::ShortDataExtendedLe);
        assert_eq!(body.le, Some(0x200));

        let body = classify_body(&hex!("000002AABB")).unwrap();
        assert_eq!(body.case, BodyCase::ExtendedData);
        assert_eq!(body.lc, 2);

        let body = classify_body(&hex!("000002AABB20")).unwrap();
        assert_eq!(body.case, BodyCase::ExtendedDataShortLe);
        assert_eq!(body.le, Some(0x20));

        let body = classify_body(&hex!("000002AABB0120")).unwrap();
        assert_eq!(body.case, BodyCase::ExtendedDataExtendedLe);
        assert_eq!(body.le, Some(0x120));

        let body = classify_body(&hex!("000002AABB000120")).unwrap();
        assert_eq!(body.case, BodyCase::ExtendedDataExtendedLe);
        assert_eq!(body.le, Some(0x120));
    }

    #[test]
    fn test_malformed_bodies() {
        // more than three bytes after extended data
        assert!(matches!(
            classify_body(&hex!("000001AA01020304")),
            Err(Error::MalformedApdu(_))
        ));
        // two trailing bytes after short data
        assert!(matches!(
            classify_body(&hex!("01AA0102")),
            Err(Error::MalformedApdu(_))
        ));
        // three trailing bytes without the padding byte
        assert!(matches!(
            classify_body(&hex!("01AA010203")),
            Err(Error::MalformedApdu(_))
        ));
        // Lc larger than the remaining data
        assert!(matches!(classify_body(&hex!("05AABB")), Err(Error::MalformedApdu(_))));
        // lone padding byte
        assert!(matches!(classify_body(&hex!("0001")), Err(Error::MalformedApdu(_))));

        assert_eq!(
            Command::from_bytes(&hex!("00A4")),
            Err(Error::InvalidCommandLength(2))
        );
    }

    #[test]
    fn test_round_trip_selected_commands() {
        let commands = [
            Command::new(0x00, 0x84, 0x00, 0x00),
            Command::new_with_le(0x00, 0x84, 0x00, 0x00, 8),
            Command::new_with_le(0x00, 0xB0, 0x00, 0x00, 256),
            Command::new_with_le(0x00, 0xB0, 0x00, 0x00, 65536),
            Command::new_with_data(0x00, 0x22, 0xC1, 0xA4, vec![0x80, 0x01, 0x02]),
            Command::new_with_data_and_le(0x10, 0x86, 0x00, 0x00, vec![0x7C, 0x00], 256),
            Command::new_with_data_and_le(0x0C, 0xB0, 0x00, 0x00, vec![0x5A; 400], 4000),
        ];

        for cmd in commands {
            let bytes = cmd.to_bytes().unwrap();
            assert_eq!(bytes.len(), cmd.command_length());
            assert_eq!(Command::from_bytes(&bytes).unwrap(), cmd);
        }
    }

    #[test]
    fn test_round_trip_length_boundaries() {
        for lc in [0usize, 1, 255, 256, MAX_DATA_LENGTH] {
            for le in [0, 1, 256, 257, MAX_EXPECTED_LENGTH] {
                let data: Vec<u8> = (0..lc).map(|i| i as u8).collect();
                let cmd = Command::new_with_data_and_le(0x00, 0xB0, 0x01, 0x02, data, le);
                let bytes = cmd.to_bytes().unwrap();
                assert_eq!(bytes.len(), cmd.command_length(), "lc={lc} le={le}");
                assert_eq!(Command::from_bytes(&bytes).unwrap(), cmd, "lc={lc} le={le}");
            }
        }
    }

    #[test]
    fn test_class_byte_helpers() {
        let cmd = Command::new(0x00, 0xB0, 0x00, 0x00).with_secure_messaging();
        assert!(cmd.is_secure_messaging());
        assert_eq!(cmd.with_chaining().cla, 0x1C);
        assert!(Command::new(0x00, 0x70, 0x00, 0x00).is_manage_channel());
    }
}
