//! The PACE step of EAC
//!
//! One call of [`PaceStep::perform`] runs the EAC1 part of a DIDAuthenticate
//! exchange:
//!
//! `ReceiveEAC1Input → PresentUserConsent → BuildPaceRequest →
//! EstablishChannel → ExtractSecurityInfos → ProduceEAC1Output`
//!
//! Every failure ends up in the result of the returned response.

use std::sync::Arc;

use eidcard_ifd::{PACE_PROTOCOL_URI, PaceInput, PasswordId, SlotHandle};
use tracing::{debug, error, info, instrument};

use crate::auth_data::AuthenticationData;
use crate::consent::{ConsentContent, UserConsent};
use crate::dispatch::{DispatchRequest, Dispatcher, ResultStatus};
use crate::eac1::{Eac1Input, Eac1Output};
use crate::error::{EacError, Result};
use crate::security_info::SecurityInfos;
use crate::session::{EacSessionStore, EacStage, SessionTicket};

/// A DIDAuthenticate request carrying EAC1 input
#[derive(Debug, Clone)]
pub struct DidAuthenticate {
    /// Identifies the exchange across its steps
    pub exchange_id: String,
    /// Slot of the connected card
    pub slot: SlotHandle,
    /// Name of the PIN DID (`PIN`, `CAN`, ...)
    pub did_name: String,
    /// EAC1 input elements
    pub data: AuthenticationData,
}

/// Response to a [`DidAuthenticate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DidAuthenticateResponse {
    /// Result major/minor
    pub result: ResultStatus,
    /// EAC1 output elements on success
    pub data: Option<AuthenticationData>,
}

/// Runs the PACE step of EAC
pub struct PaceStep {
    dispatcher: Arc<dyn Dispatcher>,
    consent: Arc<dyn UserConsent>,
    sessions: Arc<EacSessionStore>,
}

impl std::fmt::Debug for PaceStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaceStep")
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

impl PaceStep {
    /// Create the step
    pub fn new(
        dispatcher: Arc<dyn Dispatcher>,
        consent: Arc<dyn UserConsent>,
        sessions: Arc<EacSessionStore>,
    ) -> Self {
        Self {
            dispatcher,
            consent,
            sessions,
        }
    }

    /// Session store shared with the later steps
    pub const fn sessions(&self) -> &Arc<EacSessionStore> {
        &self.sessions
    }

    /// Run the step. Errors are reported in the response.
    #[instrument(skip_all, fields(exchange = %request.exchange_id, slot = %request.slot))]
    pub fn perform(&self, request: &DidAuthenticate) -> DidAuthenticateResponse {
        let ticket = self.sessions.begin(&request.exchange_id);
        match self.run(request, &ticket) {
            Ok(output) => {
                info!("EAC1 step completed");
                DidAuthenticateResponse {
                    result: ResultStatus::ok(),
                    data: Some(output.to_auth_data()),
                }
            }
            Err(e) => {
                error!(error = %e, "EAC1 step failed");
                self.sessions.finish(&ticket);
                DidAuthenticateResponse {
                    result: e.result_status(),
                    data: None,
                }
            }
        }
    }

    fn enter(&self, ticket: &SessionTicket, stage: EacStage) {
        debug!(%stage, "Entering stage");
        self.sessions.update(ticket, |s| s.stage = stage);
    }

    fn run(&self, request: &DidAuthenticate, ticket: &SessionTicket) -> Result<Eac1Output> {
        let token = ticket.token();
        self.enter(ticket, EacStage::ReceiveInput);
        let input = Eac1Input::from_auth_data(&request.data)?;
        let password_id = PasswordId::from_did_name(&request.did_name)
            .ok_or_else(|| EacError::UnknownPasswordId(request.did_name.clone()))?;

        self.enter(ticket, EacStage::UserConsent);
        let content = ConsentContent {
            terminal_certificate: input.certificates.terminal_certificate().clone(),
            certificate_description: input.certificate_description.clone(),
            required_chat: input.required_chat.clone(),
            optional_chat: input.optional_chat.clone(),
            selected_chat: input.required_chat.clone(),
            password_id,
        };
        let consent = self
            .consent
            .request(&content, token)
            .map_err(EacError::Consent)?;
        consent
            .selected_chat
            .validate_selection(&input.required_chat, input.optional_chat.as_ref())?;

        self.enter(ticket, EacStage::BuildPaceRequest);
        let mut pace_input = PaceInput::new(password_id)
            .with_chat(consent.selected_chat.to_bytes())
            .with_certificate_description(input.certificate_description.as_bytes().clone());
        if let Some(pin) = &consent.pin {
            pace_input = pace_input.with_pin(pin.to_vec());
        }

        self.enter(ticket, EacStage::EstablishChannel);
        token.check().map_err(EacError::Consent)?;
        let response = self.dispatcher.deliver(DispatchRequest::EstablishChannel {
            slot: request.slot.clone(),
            protocol: PACE_PROTOCOL_URI.to_string(),
            input: pace_input,
        });
        if !response.result.is_ok() {
            return Err(EacError::Dispatch(response.result));
        }
        let pace = response
            .pace_output
            .ok_or(EacError::InvalidData("EstablishChannel response without PACE output"))?;
        debug!(retry_counter = pace.retry_counter, native = pace.native, "PACE established");

        self.enter(ticket, EacStage::ExtractSecurityInfos);
        let security_infos = SecurityInfos::from_bytes(&pace.ef_card_access)?;

        self.enter(ticket, EacStage::ProduceOutput);
        let output = Eac1Output::from_pace(&pace, consent.selected_chat);
        let stored = self.sessions.update(ticket, |s| {
            s.security_infos = Some(security_infos);
            s.auxiliary_data = input.authenticated_auxiliary_data;
            s.certificates = Some(input.certificates);
            s.stage = EacStage::Completed;
        });
        if !stored {
            // The run was torn down or replaced while PACE was running
            return Err(EacError::IllegalState("EAC session was cancelled"));
        }
        Ok(output)
    }
}
