//! Authentication protocol data exchanged with DIDAuthenticate
//!
//! Protocol messages arrive as an ordered list of named hex or text elements.
//! Element names are matched exactly; an element may occur more than once.

use bytes::Bytes;

use crate::error::{EacError, Result};

/// Ordered key/value authentication data of one protocol message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthenticationData {
    /// Protocol URI the data belongs to
    pub protocol: String,
    elements: Vec<(String, String)>,
}

impl AuthenticationData {
    /// Empty data for `protocol`
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            elements: Vec::new(),
        }
    }

    /// Append an element
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    /// Append an element
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.elements.push((name.into(), value.into()));
    }

    /// Append a binary element as upper case hex
    pub fn push_bytes(&mut self, name: impl Into<String>, value: &[u8]) {
        self.push(name, hex::encode_upper(value));
    }

    /// First value of `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.elements
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// All values of `name` in order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.elements
            .iter()
            .filter(move |(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// First value of `name` decoded from hex
    pub fn get_bytes(&self, name: &str) -> Result<Option<Bytes>> {
        self.get(name).map(|value| decode_hex(name, value)).transpose()
    }

    /// All elements in order
    pub fn elements(&self) -> impl Iterator<Item = (&str, &str)> {
        self.elements
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

pub(crate) fn decode_hex(name: &str, value: &str) -> Result<Bytes> {
    let cleaned: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(cleaned)
        .map(Bytes::from)
        .map_err(|source| EacError::InvalidHex {
            element: name.to_string(),
            source,
        })
}
