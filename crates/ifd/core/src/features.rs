//! PC/SC part 10 reader features
//!
//! A reader announces its optional features in the answer to
//! `GET_FEATURE_REQUEST`: a list of `tag(1) len(1)=4 controlCode(4, BE)` entries.

use std::collections::BTreeMap;

use tracing::warn;

/// Feature tag of VERIFY_PIN_DIRECT
pub const FEATURE_VERIFY_PIN_DIRECT: u8 = 0x06;
/// Feature tag of MODIFY_PIN_DIRECT
pub const FEATURE_MODIFY_PIN_DIRECT: u8 = 0x07;
/// Feature tag of GET_TLV_PROPERTIES
pub const FEATURE_GET_TLV_PROPERTIES: u8 = 0x12;
/// Feature tag of EXECUTE_PACE
pub const FEATURE_EXECUTE_PACE: u8 = 0x20;

/// Feature tag to control code map of one reader
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureCodes(BTreeMap<u8, u32>);

impl FeatureCodes {
    /// Parse the answer to GET_FEATURE_REQUEST
    ///
    /// Entries with a length other than 4 are skipped, a truncated trailing
    /// entry ends parsing.
    pub fn parse(raw: &[u8]) -> Self {
        let mut codes = BTreeMap::new();
        let mut rest = raw;
        while let [tag, len, tail @ ..] = rest {
            let len = *len as usize;
            if tail.len() < len {
                warn!(tag, len, "Truncated feature entry");
                break;
            }
            let (value, next) = tail.split_at(len);
            match <[u8; 4]>::try_from(value) {
                Ok(code) => {
                    codes.insert(*tag, u32::from_be_bytes(code));
                }
                Err(_) => warn!(tag, len, "Ignoring feature with unexpected length"),
            }
            rest = next;
        }
        Self(codes)
    }

    /// Control code of `tag`, if the reader supports it
    pub fn get(&self, tag: u8) -> Option<u32> {
        self.0.get(&tag).copied()
    }

    /// Whether the reader supports `tag`
    pub fn contains(&self, tag: u8) -> bool {
        self.0.contains_key(&tag)
    }

    /// Whether no features are announced
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(tag, control code)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (u8, u32)> + '_ {
        self.0.iter().map(|(tag, code)| (*tag, *code))
    }
}

impl FromIterator<(u8, u32)> for FeatureCodes {
    fn from_iter<T: IntoIterator<Item = (u8, u32)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_parse_feature_list() {
        let raw = hex!("06 04 42330006" "20 04 42330020" "12 04 42330012");
        let codes = FeatureCodes::parse(&raw);
        assert_eq!(codes.get(FEATURE_VERIFY_PIN_DIRECT), Some(0x4233_0006));
        assert_eq!(codes.get(FEATURE_EXECUTE_PACE), Some(0x4233_0020));
        assert!(codes.contains(FEATURE_GET_TLV_PROPERTIES));
        assert!(!codes.contains(FEATURE_MODIFY_PIN_DIRECT));
    }

    #[test]
    fn test_parse_skips_odd_entries() {
        let raw = hex!("07 02 0102" "20 04 00000020" "06 04 0000");
        let codes = FeatureCodes::parse(&raw);
        assert_eq!(codes.iter().collect::<Vec<_>>(), vec![(0x20, 0x20)]);
        assert!(FeatureCodes::parse(&[]).is_empty());
    }
}
