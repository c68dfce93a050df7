//! Software secure channel protocols
//!
//! Protocols the reader does not implement natively are provided by
//! [`ProtocolFactory`] instances registered by URI. A successfully established
//! [`SecureChannelProtocol`] becomes the secure messaging layer of its channel
//! and wraps every later command and response.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::error::Result;
use crate::pace::{PaceInput, PaceOutput};

/// Raw APDU exchange used by protocols during establishment
pub trait ApduChannel {
    /// Send one command APDU and return the complete response
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes>;
}

/// A secure channel protocol instance bound to one channel
pub trait SecureChannelProtocol: Send {
    /// URI identifying the protocol
    fn protocol_uri(&self) -> &str;

    /// Run the protocol handshake over `channel`
    fn establish(&mut self, channel: &mut dyn ApduChannel, input: &PaceInput) -> Result<PaceOutput>;

    /// Forget the session keys
    fn destroy(&mut self) -> Result<()> {
        Ok(())
    }

    /// Protect an outgoing command APDU
    fn wrap(&mut self, command: Bytes) -> Result<Bytes> {
        Ok(command)
    }

    /// Verify and unprotect an incoming response APDU
    fn unwrap(&mut self, response: Bytes) -> Result<Bytes> {
        Ok(response)
    }
}

/// Creates fresh protocol instances
pub trait ProtocolFactory: Send + Sync {
    /// URI of the protocols this factory creates
    fn protocol_uri(&self) -> &str;

    /// Create a new, not yet established instance
    fn create(&self) -> Box<dyn SecureChannelProtocol>;
}

/// Registry of protocol factories keyed by URI
#[derive(Default, Clone)]
pub struct ProtocolFactories {
    factories: BTreeMap<String, Arc<dyn ProtocolFactory>>,
}

impl fmt::Debug for ProtocolFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

impl ProtocolFactories {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `uri`. Returns `false` if the URI is taken.
    pub fn register(&mut self, uri: impl Into<String>, factory: Arc<dyn ProtocolFactory>) -> bool {
        let uri = uri.into();
        if self.factories.contains_key(&uri) {
            debug!(%uri, "Protocol factory already registered");
            return false;
        }
        debug!(%uri, "Registered protocol factory");
        self.factories.insert(uri, factory);
        true
    }

    /// Factory registered for `uri`
    pub fn get(&self, uri: &str) -> Option<Arc<dyn ProtocolFactory>> {
        self.factories.get(uri).cloned()
    }

    /// Whether a factory is registered for `uri`
    pub fn contains(&self, uri: &str) -> bool {
        self.factories.contains_key(uri)
    }

    /// All registered URIs in lexical order
    pub fn list(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}
