//! Card connection over PC/SC

use std::fmt;

use bytes::Bytes;
use eidcard_ifd::{CardConnection, TerminalError, TerminalResult};
use pcsc::{Attribute, Card, Disposition, MAX_BUFFER_SIZE_EXTENDED};
use tracing::{debug, trace};

use crate::config::{PcscBackendConfig, ShareMode};
use crate::error::PcscError;

/// Control code of `CM_IOCTL_GET_FEATURE_REQUEST`
const IOCTL_GET_FEATURE_REQUEST: u32 = 3400;

/// One shared connection to a card
pub struct PcscConnection {
    card: Card,
    reader_name: String,
    atr: Bytes,
    config: PcscBackendConfig,
    exclusive: bool,
}

impl fmt::Debug for PcscConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscConnection")
            .field("reader_name", &self.reader_name)
            .field("atr", &hex::encode_upper(&self.atr))
            .field("config", &self.config)
            .field("exclusive", &self.exclusive)
            .finish()
    }
}

impl PcscConnection {
    pub(crate) fn new(card: Card, reader_name: &str, config: PcscBackendConfig) -> Self {
        let atr = card
            .get_attribute_owned(Attribute::AtrString)
            .map(Bytes::from)
            .unwrap_or_default();
        debug!(reader = reader_name, atr = %hex::encode_upper(&atr), "Connected to card");
        Self {
            card,
            reader_name: reader_name.to_string(),
            atr,
            config,
            exclusive: false,
        }
    }

    /// Name of the reader holding the card
    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    fn error(&self, err: pcsc::Error) -> TerminalError {
        TerminalError::from(PcscError::from(err)).with_terminal(self.reader_name.clone())
    }

    fn share_mode(&self) -> ShareMode {
        if self.exclusive {
            ShareMode::Exclusive
        } else {
            self.config.share_mode
        }
    }

    fn reconnect_with(&mut self, mode: ShareMode, disposition: Disposition) -> TerminalResult<()> {
        self.card
            .reconnect(mode.into(), self.config.protocols, disposition)
            .map_err(|e| self.error(e))?;
        if let Ok(atr) = self.card.get_attribute_owned(Attribute::AtrString) {
            self.atr = Bytes::from(atr);
        }
        Ok(())
    }
}

impl CardConnection for PcscConnection {
    fn atr(&self) -> Bytes {
        self.atr.clone()
    }

    fn transmit(&mut self, command: &[u8]) -> TerminalResult<Bytes> {
        let mut buffer = vec![0u8; MAX_BUFFER_SIZE_EXTENDED];
        trace!(reader = %self.reader_name, command = %hex::encode(command), "SCardTransmit");
        match self.card.transmit(command, &mut buffer) {
            Ok(response) => Ok(Bytes::copy_from_slice(response)),
            Err(pcsc::Error::ResetCard) if self.config.auto_reconnect => {
                debug!(reader = %self.reader_name, "Card was reset, reconnecting");
                self.reconnect_with(self.share_mode(), Disposition::LeaveCard)?;
                let response = self
                    .card
                    .transmit(command, &mut buffer)
                    .map_err(|e| self.error(e))?;
                Ok(Bytes::copy_from_slice(response))
            }
            Err(e) => Err(self.error(e)),
        }
    }

    fn control(&mut self, code: u32, data: &[u8]) -> TerminalResult<Bytes> {
        let mut buffer = vec![0u8; MAX_BUFFER_SIZE_EXTENDED];
        trace!(reader = %self.reader_name, code = format_args!("{code:#010X}"), "SCardControl");
        let response = self
            .card
            .control(code as _, data, &mut buffer)
            .map_err(|e| self.error(e))?;
        Ok(Bytes::copy_from_slice(response))
    }

    fn feature_request(&mut self) -> TerminalResult<Bytes> {
        let code = pcsc::ctl_code(IOCTL_GET_FEATURE_REQUEST as _);
        self.control(code as u32, &[])
    }

    fn begin_exclusive(&mut self) -> TerminalResult<()> {
        if self.exclusive {
            return Ok(());
        }
        self.reconnect_with(ShareMode::Exclusive, Disposition::LeaveCard)?;
        self.exclusive = true;
        Ok(())
    }

    fn end_exclusive(&mut self) -> TerminalResult<()> {
        if !self.exclusive {
            return Ok(());
        }
        self.exclusive = false;
        self.reconnect_with(self.config.share_mode, Disposition::LeaveCard)
    }

    fn reconnect(&mut self, reset: bool) -> TerminalResult<()> {
        let disposition = if reset {
            Disposition::ResetCard
        } else {
            Disposition::LeaveCard
        };
        self.exclusive = false;
        self.reconnect_with(self.config.share_mode, disposition)
    }

    fn disconnect(self: Box<Self>, reset: bool) -> TerminalResult<()> {
        let disposition = if reset {
            Disposition::ResetCard
        } else {
            Disposition::LeaveCard
        };
        let reader = self.reader_name.clone();
        self.card.disconnect(disposition).map_err(|(_, e)| {
            TerminalError::from(PcscError::from(e)).with_terminal(reader)
        })
    }
}
