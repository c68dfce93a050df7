//! Object identifiers of the BSI TR-03110 protocols

use std::fmt;

use bytes::Bytes;

/// DER encoded object identifier
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ObjectIdentifier(Bytes);

/// `id-PACE` (0.4.0.127.0.7.2.2.4)
pub const ID_PACE: &[u8] = &[0x04, 0x00, 0x7F, 0x00, 0x07, 0x02, 0x02, 0x04];
/// `id-CA` (0.4.0.127.0.7.2.2.3)
pub const ID_CA: &[u8] = &[0x04, 0x00, 0x7F, 0x00, 0x07, 0x02, 0x02, 0x03];
/// `id-TA` (0.4.0.127.0.7.2.2.2)
pub const ID_TA: &[u8] = &[0x04, 0x00, 0x7F, 0x00, 0x07, 0x02, 0x02, 0x02];
/// Inspection system role (0.4.0.127.0.7.3.1.2.1)
pub const ID_IS: &[u8] = &[0x04, 0x00, 0x7F, 0x00, 0x07, 0x03, 0x01, 0x02, 0x01];
/// Authentication terminal role (0.4.0.127.0.7.3.1.2.2)
pub const ID_AT: &[u8] = &[0x04, 0x00, 0x7F, 0x00, 0x07, 0x03, 0x01, 0x02, 0x02];
/// Signature terminal role (0.4.0.127.0.7.3.1.2.3)
pub const ID_ST: &[u8] = &[0x04, 0x00, 0x7F, 0x00, 0x07, 0x03, 0x01, 0x02, 0x03];

impl ObjectIdentifier {
    /// Wrap the content octets of a DER OID
    pub fn new(der: impl Into<Bytes>) -> Self {
        Self(der.into())
    }

    /// Content octets
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether this OID equals `prefix` or lies below it
    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }

    /// Sub-identifiers in order
    pub fn arcs(&self) -> Vec<u64> {
        let mut arcs = Vec::new();
        let mut value = 0u64;
        for byte in self.0.iter() {
            value = (value << 7) | u64::from(byte & 0x7F);
            if byte & 0x80 != 0 {
                continue;
            }
            if arcs.is_empty() {
                let first = (value / 40).min(2);
                arcs.push(first);
                arcs.push(value - first * 40);
            } else {
                arcs.push(value);
            }
            value = 0;
        }
        arcs
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arcs = self.arcs();
        for (i, arc) in arcs.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{arc}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectIdentifier({self})")
    }
}
