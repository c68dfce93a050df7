//! Exchange scoped EAC state
//!
//! The PACE step stores what the later terminal and chip authentication steps
//! need. State lives from the first step of a DIDAuthenticate exchange until
//! the exchange completes, fails or is cancelled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use eidcard_ifd::{CancelReason, CancellationToken};
use parking_lot::Mutex;
use tracing::debug;

use crate::cvc::CertificateChain;
use crate::security_info::SecurityInfos;

/// Stages of the EAC1 step in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
pub enum EacStage {
    /// Parsing the EAC1 input
    #[display("ReceiveEAC1Input")]
    ReceiveInput,
    /// Waiting for the user
    #[display("PresentUserConsent")]
    UserConsent,
    /// Building the PACE parameters
    #[display("BuildPaceRequest")]
    BuildPaceRequest,
    /// Running PACE
    #[display("EstablishChannel")]
    EstablishChannel,
    /// Parsing EF.CardAccess
    #[display("ExtractSecurityInfos")]
    ExtractSecurityInfos,
    /// Building the EAC1 output
    #[display("ProduceEAC1Output")]
    ProduceOutput,
    /// EAC1 finished, state is ready for the next step
    #[display("Completed")]
    Completed,
}

/// State of one DIDAuthenticate exchange
#[derive(Debug, Clone)]
pub struct EacSession {
    /// Last stage entered
    pub stage: EacStage,
    /// SecurityInfos of EF.CardAccess
    pub security_infos: Option<SecurityInfos>,
    /// Authenticated auxiliary data of the EAC1 input
    pub auxiliary_data: Option<Bytes>,
    /// Certificates of the eService
    pub certificates: Option<CertificateChain>,
    generation: u64,
    token: CancellationToken,
}

impl EacSession {
    fn new(generation: u64) -> Self {
        Self {
            stage: EacStage::ReceiveInput,
            security_infos: None,
            auxiliary_data: None,
            certificates: None,
            generation,
            token: CancellationToken::new(),
        }
    }

    /// Token cancelled when the exchange is torn down
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Run of the exchange this session belongs to
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

/// One run of an exchange, handed out by [`EacSessionStore::begin`]
///
/// Updates and removal through a ticket only touch the session of the same
/// run. A run that was replaced by a newer one for the same exchange id can
/// no longer modify the store.
#[derive(Debug, Clone)]
pub struct SessionTicket {
    exchange: String,
    generation: u64,
    token: CancellationToken,
}

impl SessionTicket {
    /// Exchange id of the run
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Generation of the run
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Token cancelled when the run is torn down
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// EAC sessions by exchange id
#[derive(Debug, Default)]
pub struct EacSessionStore {
    sessions: Mutex<HashMap<String, EacSession>>,
    next_generation: AtomicU64,
}

impl EacSessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh session for `exchange`, cancelling one left over under
    /// the same id
    pub fn begin(&self, exchange: &str) -> SessionTicket {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let session = EacSession::new(generation);
        let ticket = SessionTicket {
            exchange: exchange.to_string(),
            generation,
            token: session.token.clone(),
        };
        if let Some(stale) = self.sessions.lock().insert(exchange.to_string(), session) {
            debug!(exchange, stale = stale.generation, generation, "Replacing stale EAC session");
            stale.token.cancel_with(CancelReason::Teardown);
        }
        ticket
    }

    /// Snapshot of the session of `exchange`
    pub fn get(&self, exchange: &str) -> Option<EacSession> {
        self.sessions.lock().get(exchange).cloned()
    }

    /// Modify the session of the run `ticket`. Returns `false` if the run was
    /// torn down or replaced.
    pub fn update(&self, ticket: &SessionTicket, f: impl FnOnce(&mut EacSession)) -> bool {
        match self.sessions.lock().get_mut(&ticket.exchange) {
            Some(session) if session.generation == ticket.generation => {
                f(session);
                true
            }
            _ => false,
        }
    }

    /// Remove the session of the run `ticket` once the run is over
    pub fn finish(&self, ticket: &SessionTicket) -> Option<EacSession> {
        let mut sessions = self.sessions.lock();
        match sessions.get(&ticket.exchange) {
            Some(session) if session.generation == ticket.generation => {
                sessions.remove(&ticket.exchange)
            }
            _ => None,
        }
    }

    /// Tear down the session of `exchange`, cancelling a pending user consent
    pub fn cancel(&self, exchange: &str) -> bool {
        match self.sessions.lock().remove(exchange) {
            Some(session) => {
                session.token.cancel_with(CancelReason::Teardown);
                true
            }
            None => false,
        }
    }

    /// Tear down all sessions
    pub fn cancel_all(&self) {
        for (_, session) in self.sessions.lock().drain() {
            session.token.cancel_with(CancelReason::Teardown);
        }
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no session is live
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
