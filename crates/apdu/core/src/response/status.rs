//! Status word definitions for APDU responses

use std::fmt;

use tracing::Level;

use crate::{Error, Result};

/// Status Word (SW1-SW2) from an APDU response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// First status byte (SW1)
    pub sw1: u8,
    /// Second status byte (SW2)
    pub sw2: u8,
}

impl StatusWord {
    /// Create a new status word
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Create from a u16 value (SW1 | SW2)
    pub const fn from_u16(status: u16) -> Self {
        Self {
            sw1: (status >> 8) as u8,
            sw2: status as u8,
        }
    }

    /// Convert to a u16 value (SW1 | SW2)
    pub const fn to_u16(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Big endian byte representation
    pub const fn to_bytes(&self) -> [u8; 2] {
        [self.sw1, self.sw2]
    }

    /// Check if this status word indicates success (90 00)
    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Check if this status word indicates more data is available (61 XX)
    pub const fn is_more_data_available(&self) -> bool {
        self.sw1 == 0x61
    }

    /// Check if this status word indicates a warning (62 XX or 63 XX)
    pub const fn is_warning(&self) -> bool {
        self.sw1 == 0x62 || self.sw1 == 0x63
    }

    /// Remaining tries reported by a `63 CX` counter status
    pub const fn counter_value(&self) -> Option<u8> {
        if self.sw1 == 0x63 && (self.sw2 & 0xF0) == 0xC0 {
            Some(self.sw2 & 0x0F)
        } else {
            None
        }
    }

    /// Password is blocked (63 C0 or 69 83)
    pub const fn is_password_blocked(&self) -> bool {
        matches!((self.sw1, self.sw2), (0x63, 0xC0) | (0x69, 0x83))
    }

    /// Password is suspended and needs the CAN first (63 C1)
    pub const fn is_password_suspended(&self) -> bool {
        self.sw1 == 0x63 && self.sw2 == 0xC1
    }

    /// Password is deactivated (62 83)
    pub const fn is_password_deactivated(&self) -> bool {
        self.sw1 == 0x62 && self.sw2 == 0x83
    }

    /// Check if this status word indicates a security condition not satisfied (69 82)
    pub const fn is_security_condition_not_satisfied(&self) -> bool {
        self.sw1 == 0x69 && self.sw2 == 0x82
    }

    /// Get the appropriate tracing level for this status word
    pub const fn tracing_level(&self) -> Level {
        if self.is_success() || self.is_more_data_available() {
            Level::DEBUG
        } else if self.is_warning() {
            Level::INFO
        } else {
            Level::WARN
        }
    }

    /// Get a description of this status word
    pub const fn description(&self) -> &'static str {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) => "Success",
            (0x61, _) => "More data available",
            (0x62, 0x82) => "End of file reached before reading Le bytes",
            (0x62, 0x83) => "Selected file or password deactivated",
            (0x63, 0x00) => "Authentication failed",
            (0x63, 0xC0) => "Password blocked",
            (0x63, 0xC1) => "Password suspended",
            (0x63, n) if (n & 0xF0) == 0xC0 => "Counter value",
            (0x64, 0x00) => "State of non-volatile memory unchanged",
            (0x65, 0x81) => "Memory failure",
            (0x67, 0x00) => "Wrong length",
            (0x68, 0x82) => "Secure messaging not supported",
            (0x69, 0x82) => "Security status not satisfied",
            (0x69, 0x83) => "Authentication method blocked",
            (0x69, 0x84) => "Reference data not usable",
            (0x69, 0x85) => "Conditions of use not satisfied",
            (0x69, 0x86) => "Command not allowed",
            (0x69, 0x87) => "Expected secure messaging data objects missing",
            (0x69, 0x88) => "Secure messaging data objects incorrect",
            (0x6A, 0x80) => "Incorrect parameters in the data field",
            (0x6A, 0x82) => "File not found",
            (0x6A, 0x86) => "Incorrect parameters P1-P2",
            (0x6A, 0x88) => "Referenced data not found",
            (0x6C, _) => "Wrong Le field",
            (0x6D, 0x00) => "Instruction code not supported or invalid",
            (0x6E, 0x00) => "Class not supported",
            (0x6F, 0x00) => "No precise diagnosis",
            _ => "Unknown status word",
        }
    }
}

impl From<(u8, u8)> for StatusWord {
    fn from(tuple: (u8, u8)) -> Self {
        Self::new(tuple.0, tuple.1)
    }
}

impl From<u16> for StatusWord {
    fn from(status: u16) -> Self {
        Self::from_u16(status)
    }
}

impl From<StatusWord> for u16 {
    fn from(status: StatusWord) -> Self {
        status.to_u16()
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} {:02X}", self.sw1, self.sw2)
    }
}

/// A status word, or a status byte class, a caller accepts from the card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcceptableStatus {
    /// Any status word with this SW1
    Sw1(u8),
    /// Exactly this status word
    Exact(StatusWord),
}

impl AcceptableStatus {
    /// Parse from the 1 or 2 byte wire representation
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        match raw {
            [sw1] => Ok(Self::Sw1(*sw1)),
            [sw1, sw2] => Ok(Self::Exact(StatusWord::new(*sw1, *sw2))),
            _ => Err(Error::InvalidStatusPattern(raw.len())),
        }
    }

    /// Whether `status` satisfies this pattern
    pub const fn matches(&self, status: StatusWord) -> bool {
        match self {
            Self::Sw1(sw1) => status.sw1 == *sw1,
            Self::Exact(expected) => expected.sw1 == status.sw1 && expected.sw2 == status.sw2,
        }
    }
}

impl From<StatusWord> for AcceptableStatus {
    fn from(status: StatusWord) -> Self {
        Self::Exact(status)
    }
}

/// Common status words
pub mod common {
    use super::StatusWord;

    /// Success (90 00)
    pub const SUCCESS: StatusWord = StatusWord::new(0x90, 0x00);

    /// Wrong length (67 00)
    pub const WRONG_LENGTH: StatusWord = StatusWord::new(0x67, 0x00);

    /// Security condition not satisfied (69 82)
    pub const SECURITY_CONDITION_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x82);

    /// Authentication method blocked (69 83)
    pub const AUTHENTICATION_BLOCKED: StatusWord = StatusWord::new(0x69, 0x83);

    /// Command not allowed (69 86)
    pub const COMMAND_NOT_ALLOWED: StatusWord = StatusWord::new(0x69, 0x86);

    /// File not found (6A 82)
    pub const FILE_NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x82);

    /// Referenced data not found (6A 88)
    pub const REFERENCE_NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x88);

    /// Timeout reported by a reader for a control command (64 00)
    pub const READER_TIMEOUT: StatusWord = StatusWord::new(0x64, 0x00);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_word_from_to_u16() {
        let sw = StatusWord::from_u16(0x63C2);
        assert_eq!(sw.sw1, 0x63);
        assert_eq!(sw.sw2, 0xC2);
        assert_eq!(sw.to_u16(), 0x63C2);
        assert_eq!(sw.to_string(), "63 C2");
    }

    #[test]
    fn test_counter_value() {
        assert_eq!(StatusWord::new(0x63, 0xC2).counter_value(), Some(2));
        assert_eq!(StatusWord::new(0x63, 0x00).counter_value(), None);
        assert_eq!(StatusWord::new(0x90, 0x00).counter_value(), None);
        assert!(StatusWord::new(0x63, 0xC0).is_password_blocked());
        assert!(StatusWord::new(0x63, 0xC1).is_password_suspended());
        assert!(StatusWord::new(0x62, 0x83).is_password_deactivated());
    }

    #[test]
    fn test_tracing_level() {
        assert_eq!(common::SUCCESS.tracing_level(), Level::DEBUG);
        assert_eq!(StatusWord::new(0x63, 0xC2).tracing_level(), Level::INFO);
        assert_eq!(common::FILE_NOT_FOUND.tracing_level(), Level::WARN);
    }

    #[test]
    fn test_acceptable_status_from_bytes() {
        assert_eq!(AcceptableStatus::from_bytes(&[0x63]).unwrap(), AcceptableStatus::Sw1(0x63));
        assert_eq!(
            AcceptableStatus::from_bytes(&[0x90, 0x00]).unwrap(),
            AcceptableStatus::Exact(common::SUCCESS)
        );
        assert_eq!(
            AcceptableStatus::from_bytes(&[0x90, 0x00, 0x00]),
            Err(Error::InvalidStatusPattern(3))
        );
        assert_eq!(AcceptableStatus::from_bytes(&[]), Err(Error::InvalidStatusPattern(0)));

        assert!(AcceptableStatus::Sw1(0x63).matches(StatusWord::new(0x63, 0xC1)));
        assert!(!AcceptableStatus::Exact(common::SUCCESS).matches(common::FILE_NOT_FOUND));
    }
}
