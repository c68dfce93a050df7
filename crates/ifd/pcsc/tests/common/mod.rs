//! Common test utilities

use std::sync::Arc;

use eidcard_ifd::{Ifd, IfdConfig, TerminalFactory};
use eidcard_ifd_pcsc::PcscTerminals;

/// Initialize test logging once
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Try to get real PC/SC terminals for tests
pub fn get_terminals() -> Option<PcscTerminals> {
    init_tracing();
    PcscTerminals::new().ok()
}

/// Try to get an IFD with a reader holding a card
pub fn get_ifd_with_card() -> Option<(Ifd, String)> {
    let terminals = get_terminals()?;
    let reader = terminals
        .list_terminals()
        .ok()?
        .into_iter()
        .find(|t| terminals.is_card_present(t).unwrap_or(false))?;
    Some((Ifd::new(Arc::new(terminals), IfdConfig::default()), reader))
}
