//! APDU response definitions
//!
//! This module provides the response APDU type according to ISO/IEC 7816-4.

pub mod status;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::{Error, Result};
use status::{AcceptableStatus, StatusWord};

/// Basic APDU response structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response data, possibly empty
    data: Bytes,
    /// Status word
    status: StatusWord,
}

impl Response {
    /// Create a new response with payload and status
    pub fn new(data: impl Into<Bytes>, status: impl Into<StatusWord>) -> Self {
        Self {
            data: data.into(),
            status: status.into(),
        }
    }

    /// Create a success response
    pub const fn success(data: Bytes) -> Self {
        Self {
            data,
            status: StatusWord::new(0x90, 0x00),
        }
    }

    /// Create an error response from a status word
    pub fn error(status: impl Into<StatusWord>) -> Self {
        Self {
            data: Bytes::new(),
            status: status.into(),
        }
    }

    /// Parse response from raw bytes (including status word)
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let Some(split) = raw.len().checked_sub(2) else {
            debug!("Response too short: {} bytes", raw.len());
            return Err(Error::ResponseTooShort(raw.len()));
        };
        let status = StatusWord::new(raw[split], raw[split + 1]);
        let data = Bytes::copy_from_slice(&raw[..split]);

        trace!(
            sw1 = format_args!("{:#04x}", status.sw1),
            sw2 = format_args!("{:#04x}", status.sw2),
            payload_len = data.len(),
            "Parsed APDU response"
        );

        Ok(Self { data, status })
    }

    /// Response data without the status word
    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    /// Status word
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// Check if the response indicates success
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Whether the status word matches one of `acceptable`
    ///
    /// An empty list accepts every status word.
    pub fn is_acceptable(&self, acceptable: &[AcceptableStatus]) -> bool {
        acceptable.is_empty() || acceptable.iter().any(|a| a.matches(self.status))
    }

    /// Fail with [`Error::UnexpectedStatus`] unless the status word is acceptable
    pub fn require(self, acceptable: &[AcceptableStatus]) -> Result<Self> {
        if self.is_acceptable(acceptable) {
            Ok(self)
        } else {
            Err(Error::UnexpectedStatus(self.status))
        }
    }

    /// Encode data followed by the status word
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.data.len() + 2);
        buf.put_slice(&self.data);
        buf.put_u8(self.status.sw1);
        buf.put_u8(self.status.sw2);
        buf.freeze()
    }
}

impl TryFrom<&[u8]> for Response {
    type Error = Error;

    fn try_from(raw: &[u8]) -> Result<Self> {
        Self::from_bytes(raw)
    }
}

impl From<Response> for Bytes {
    fn from(response: Response) -> Self {
        response.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_response_from_bytes() {
        let resp = Response::from_bytes(&hex!("0102039000")).unwrap();
        assert_eq!(resp.data().as_ref(), &hex!("010203"));
        assert_eq!(resp.status(), StatusWord::new(0x90, 0x00));
        assert!(resp.is_success());

        let resp = Response::from_bytes(&hex!("6982")).unwrap();
        assert!(resp.data().is_empty());
        assert!(!resp.is_success());

        assert_eq!(Response::from_bytes(&[0x01]), Err(Error::ResponseTooShort(1)));
    }

    #[test]
    fn test_response_to_bytes() {
        let resp = Response::new(Bytes::from_static(&[0xAA]), (0x63, 0xC2));
        assert_eq!(resp.to_bytes().as_ref(), &hex!("AA63C2"));
    }

    #[test]
    fn test_acceptable_status() {
        let resp = Response::error(0x6982_u16);
        assert!(resp.is_acceptable(&[]));
        assert!(!resp.is_acceptable(&[AcceptableStatus::Exact(StatusWord::from_u16(0x9000))]));
        assert!(resp.is_acceptable(&[AcceptableStatus::Sw1(0x69)]));

        let err = resp.require(&[AcceptableStatus::Exact(StatusWord::from_u16(0x9000))]).unwrap_err();
        assert_eq!(err, Error::UnexpectedStatus(StatusWord::new(0x69, 0x82)));
    }
}
