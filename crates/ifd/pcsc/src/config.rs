//! Configuration options for the PC/SC backend

use std::time::Duration;

use pcsc::{Protocols as PcscProtocols, ShareMode as PcscShareMode};

/// Sharing mode of the slave channels opened by the IFD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareMode {
    /// No other application may use the card
    Exclusive,
    /// Other applications may use the card between transactions (default)
    Shared,
    /// Reader access without a card, for control commands only
    Direct,
}

impl From<ShareMode> for PcscShareMode {
    fn from(mode: ShareMode) -> Self {
        match mode {
            ShareMode::Exclusive => Self::Exclusive,
            ShareMode::Shared => Self::Shared,
            ShareMode::Direct => Self::Direct,
        }
    }
}

/// Configuration options for [`PcscTerminals`](crate::PcscTerminals)
#[derive(Debug, Clone)]
pub struct PcscBackendConfig {
    /// Sharing mode of new connections
    pub share_mode: ShareMode,

    /// Preferred protocols for card communication
    pub protocols: PcscProtocols,

    /// Reconnect and retry once when the card was reset by another party
    pub auto_reconnect: bool,

    /// How long a presence query waits for the resource manager. Zero reads
    /// the current reader state without blocking.
    pub status_timeout: Duration,
}

impl Default for PcscBackendConfig {
    fn default() -> Self {
        Self {
            share_mode: ShareMode::Shared,
            protocols: PcscProtocols::ANY,
            auto_reconnect: true,
            status_timeout: Duration::ZERO,
        }
    }
}

impl PcscBackendConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sharing mode
    pub const fn with_share_mode(mut self, mode: ShareMode) -> Self {
        self.share_mode = mode;
        self
    }

    /// Set the preferred protocols
    pub const fn with_protocols(mut self, protocols: PcscProtocols) -> Self {
        self.protocols = protocols;
        self
    }

    /// Set whether a reset card is reconnected transparently
    pub const fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    /// Set the presence query timeout
    pub const fn with_status_timeout(mut self, timeout: Duration) -> Self {
        self.status_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = PcscBackendConfig::new()
            .with_share_mode(ShareMode::Exclusive)
            .with_auto_reconnect(false)
            .with_status_timeout(Duration::from_millis(20));
        assert_eq!(config.share_mode, ShareMode::Exclusive);
        assert!(!config.auto_reconnect);
        assert_eq!(config.status_timeout, Duration::from_millis(20));
        assert_eq!(PcscShareMode::from(ShareMode::Direct), PcscShareMode::Direct);
    }
}
