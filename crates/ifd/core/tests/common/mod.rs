//! Common test utilities
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use eidcard_ifd::mock::{MockCard, MockTerminals};
use eidcard_ifd::{Ifd, IfdConfig, TerminalResult};
use tracing_subscriber::EnvFilter;

/// Name of the default test terminal
pub const READER: &str = "Test Reader 0";

/// Control code announced for EXECUTE_PACE
pub const EXECUTE_PACE_CODE: u32 = 0x4233_0020;

/// Control code announced for VERIFY_PIN_DIRECT
pub const VERIFY_PIN_CODE: u32 = 0x4233_0006;

/// Install a test subscriber honouring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Configuration with a short poll interval
pub fn test_config() -> IfdConfig {
    IfdConfig::default()
        .with_poll_interval(Duration::from_millis(5))
        .with_max_workers(4)
}

/// An IFD over one terminal holding `card`
pub fn ifd_with_card(card: MockCard) -> (MockTerminals, Ifd) {
    init_tracing();
    let terminals = MockTerminals::new();
    terminals.add_terminal(READER);
    terminals.insert_card(READER, card);
    let ifd = Ifd::new(Arc::new(terminals.clone()), test_config());
    (terminals, ifd)
}

/// An IFD over one empty terminal
pub fn ifd_without_card() -> (MockTerminals, Ifd) {
    init_tracing();
    let terminals = MockTerminals::new();
    terminals.add_terminal(READER);
    let ifd = Ifd::new(Arc::new(terminals.clone()), test_config());
    (terminals, ifd)
}

/// Announce EXECUTE_PACE and VERIFY_PIN_DIRECT on the test terminal
pub fn announce_features(terminals: &MockTerminals) {
    let mut raw = vec![0x20, 0x04];
    raw.extend_from_slice(&EXECUTE_PACE_CODE.to_be_bytes());
    raw.extend_from_slice(&[0x06, 0x04]);
    raw.extend_from_slice(&VERIFY_PIN_CODE.to_be_bytes());
    terminals.set_features(READER, raw);
}

/// Encode an ExecutePACE answer
pub fn pace_answer(result: u32, data: &[u8]) -> Bytes {
    let mut raw = result.to_le_bytes().to_vec();
    raw.extend_from_slice(&(data.len() as u16).to_le_bytes());
    raw.extend_from_slice(data);
    Bytes::from(raw)
}

/// A reader implementing PACE with capability `bitmap` whose establishment
/// answers with `establish`
pub fn pace_reader(
    terminals: &MockTerminals,
    bitmap: u8,
    establish: impl Fn(&[u8]) -> TerminalResult<Bytes> + Send + Sync + 'static,
) {
    announce_features(terminals);
    terminals.set_control_responder(READER, move |code, data| match (code, data.first()) {
        (EXECUTE_PACE_CODE, Some(0x01)) => Ok(pace_answer(0, &[0x01, bitmap])),
        (EXECUTE_PACE_CODE, Some(0x02)) => establish(data),
        (EXECUTE_PACE_CODE, Some(0x03)) => Ok(pace_answer(0, &[])),
        (VERIFY_PIN_CODE, _) => Ok(Bytes::from_static(&[0x90, 0x00])),
        _ => Ok(Bytes::from_static(&[0x6A, 0x81])),
    });
}
