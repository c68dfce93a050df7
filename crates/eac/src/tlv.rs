//! BER-TLV helpers shared by the certificate and security info parsers

use bytes::{BufMut, Bytes, BytesMut};
use iso7816_tlv::ber::{Tlv, Value};

use crate::error::{EacError, Result};

/// Parse one TLV and require the input to hold nothing else
pub(crate) fn parse_single(data: &[u8]) -> Result<Tlv> {
    let (tlv, rest) = Tlv::parse(data);
    let tlv = tlv?;
    if !rest.is_empty() {
        return Err(EacError::InvalidData("trailing bytes after TLV"));
    }
    Ok(tlv)
}

/// Parse a concatenation of TLVs
pub(crate) fn parse_all(mut data: &[u8]) -> Result<Vec<Tlv>> {
    let mut tlvs = Vec::new();
    while !data.is_empty() {
        let (tlv, rest) = Tlv::parse(data);
        tlvs.push(tlv?);
        data = rest;
    }
    Ok(tlvs)
}

pub(crate) fn has_tag(tlv: &Tlv, tag: &[u8]) -> bool {
    tlv.tag().to_bytes() == tag
}

/// Children of a constructed TLV carrying `tag`
pub(crate) fn constructed<'a>(tlv: &'a Tlv, tag: &[u8], what: &'static str) -> Result<&'a [Tlv]> {
    if !has_tag(tlv, tag) {
        return Err(EacError::InvalidData(what));
    }
    match tlv.value() {
        Value::Constructed(children) => Ok(children),
        Value::Primitive(_) => Err(EacError::InvalidData(what)),
    }
}

/// Value of a primitive TLV
pub(crate) fn primitive(tlv: &Tlv) -> Result<&[u8]> {
    match tlv.value() {
        Value::Primitive(bytes) => Ok(bytes.as_slice()),
        Value::Constructed(_) => Err(EacError::InvalidData("expected primitive TLV")),
    }
}

/// First child with `tag`
pub(crate) fn find<'a>(children: &'a [Tlv], tag: &[u8]) -> Option<&'a Tlv> {
    children.iter().find(|child| has_tag(child, tag))
}

/// Primitive value of the first child with `tag`
pub(crate) fn find_primitive<'a>(children: &'a [Tlv], tag: &[u8]) -> Result<Option<&'a [u8]>> {
    find(children, tag).map(primitive).transpose()
}

/// Primitive value of the mandatory child with `tag`
pub(crate) fn require_primitive<'a>(
    children: &'a [Tlv],
    tag: &[u8],
    what: &'static str,
) -> Result<&'a [u8]> {
    find_primitive(children, tag)?.ok_or(EacError::MissingElement(what))
}

/// Raw encoding of a TLV
pub(crate) fn encoded(tlv: &Tlv) -> Bytes {
    Bytes::from(tlv.to_vec())
}

/// Encode `tag || length || value` with a DER length
pub(crate) fn encode(tag: &[u8], value: &[u8], out: &mut BytesMut) {
    out.put_slice(tag);
    let len = value.len();
    match len {
        0..=0x7F => out.put_u8(len as u8),
        0x80..=0xFF => {
            out.put_u8(0x81);
            out.put_u8(len as u8);
        }
        _ => {
            out.put_u8(0x82);
            out.put_u16(len as u16);
        }
    }
    out.put_slice(value);
}

/// Big endian unsigned integer of at most four bytes
pub(crate) fn unsigned(value: &[u8]) -> Result<u32> {
    let value = match value {
        [0, rest @ ..] if !rest.is_empty() => rest,
        v => v,
    };
    if value.is_empty() || value.len() > 4 {
        return Err(EacError::InvalidData("integer out of range"));
    }
    Ok(value.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_encode_lengths() {
        let mut out = BytesMut::new();
        encode(&[0x53], &[0xAA; 3], &mut out);
        assert_eq!(&out[..2], &hex!("5303"));

        let mut out = BytesMut::new();
        encode(&[0x5F, 0x37], &[0; 0x90], &mut out);
        assert_eq!(&out[..4], &hex!("5F378190"));

        let mut out = BytesMut::new();
        encode(&[0x7F, 0x21], &[0; 0x1A0], &mut out);
        assert_eq!(&out[..5], &hex!("7F218201A0"));
    }

    #[test]
    fn test_parse_all() {
        let tlvs = parse_all(&hex!("020101 020102")).unwrap();
        assert_eq!(tlvs.len(), 2);
        assert_eq!(primitive(&tlvs[1]).unwrap(), &[0x02]);

        assert!(parse_single(&hex!("020101 00")).is_err());
    }

    #[test]
    fn test_unsigned() {
        assert_eq!(unsigned(&[0x0D]).unwrap(), 13);
        assert_eq!(unsigned(&[0x00, 0x80]).unwrap(), 128);
        assert!(unsigned(&[]).is_err());
        assert!(unsigned(&[1, 2, 3, 4, 5]).is_err());
    }
}
