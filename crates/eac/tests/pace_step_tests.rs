//! EAC1 step tests against a native PACE reader

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use eidcard_eac::{
    AuthenticationData, ChannelConsent, Chat, ConsentAnswer, ConsentResponse, DidAuthenticate,
    DispatchRequest, DispatchResponse, Dispatcher, EAC_PROTOCOL_URI, EacSessionStore, EacStage,
    IfdDispatcher, PaceStep, ResultMajor, ResultStatus, UserConsent,
};
use eidcard_ifd::{PACE_PROTOCOL_URI, PasswordId, SlotHandle};
use hex_literal::hex;
use parking_lot::Mutex;

use common::{EXECUTE_PACE_CODE, READER};

const EXCHANGE: &str = "exchange-1";

fn request(slot: &SlotHandle, did_name: &str, data: AuthenticationData) -> DidAuthenticate {
    DidAuthenticate {
        exchange_id: EXCHANGE.to_string(),
        slot: slot.clone(),
        did_name: did_name.to_string(),
        data,
    }
}

fn pace_step(ifd_result: u32, consent: impl UserConsent + 'static) -> (PaceStep, SlotHandle) {
    let (_terminals, ifd, slot) = common::ifd_with_pace_reader(ifd_result);
    let step = PaceStep::new(
        Arc::new(IfdDispatcher::new(ifd)),
        Arc::new(consent),
        Arc::new(EacSessionStore::new()),
    );
    (step, slot)
}

fn assert_minor(result: &ResultStatus, fragment: &str) {
    assert_eq!(result.major, ResultMajor::Error);
    let minor = result.minor.as_deref().unwrap_or_default();
    assert!(minor.ends_with(fragment), "unexpected minor {minor}");
}

#[test]
fn test_native_pace_step() {
    let (terminals, ifd, slot) = common::ifd_with_pace_reader(0);
    let sessions = Arc::new(EacSessionStore::new());
    let step = PaceStep::new(
        Arc::new(IfdDispatcher::new(ifd)),
        Arc::new(common::accept_all()),
        sessions.clone(),
    );

    let response = step.perform(&request(&slot, "PIN", common::eac1_input()));
    assert!(response.result.is_ok(), "{}", response.result);

    let data = response.data.unwrap();
    assert_eq!(data.protocol, EAC_PROTOCOL_URI);
    assert_eq!(data.get("RetryCounter"), Some("3"));
    assert_eq!(
        data.get_bytes("EFCardAccess").unwrap().unwrap().as_ref(),
        common::EF_CARD_ACCESS.as_slice()
    );
    assert_eq!(data.get_bytes("IDPICC").unwrap().unwrap().as_ref(), &hex!("CAFE"));
    assert_eq!(
        data.get_bytes("CertificationAuthorityReference").unwrap().unwrap().as_ref(),
        b"DECVCAeID00102"
    );
    assert_eq!(
        data.get_bytes("CHAT").unwrap().unwrap().as_ref(),
        hex::decode(common::REQUIRED_CHAT).unwrap().as_slice()
    );

    let session = sessions.get(EXCHANGE).unwrap();
    assert_eq!(session.stage, EacStage::Completed);
    assert_eq!(session.security_infos.unwrap().pace_infos().count(), 2);
    assert_eq!(session.certificates.unwrap().certificates().len(), 2);

    let establish = terminals
        .controls(READER)
        .into_iter()
        .find(|(code, data)| *code == EXECUTE_PACE_CODE && data.first() == Some(&0x02))
        .unwrap();
    let chat = hex::decode(common::REQUIRED_CHAT).unwrap();
    assert!(establish.1.windows(chat.len()).any(|w| w == chat.as_slice()));
    assert!(establish.1.windows(6).any(|w| w == b"123456"));
}

#[test]
fn test_optional_rights_selected() {
    let selected = Chat::from_bytes(&hex!("7F4C12060904007F00070301020253050000000901")).unwrap();
    let (step, slot) = pace_step(0, common::select(selected.clone()));

    let response = step.perform(&request(&slot, "CAN", common::eac1_input()));
    assert!(response.result.is_ok(), "{}", response.result);
    assert_eq!(
        response.data.unwrap().get_bytes("CHAT").unwrap().unwrap().as_ref(),
        selected.to_bytes().as_ref()
    );
}

#[test]
fn test_selection_outside_requested_rights() {
    // ReadDG5 was never requested
    let selected = Chat::from_bytes(&hex!("7F4C12060904007F00070301020253050000001801")).unwrap();
    let (terminals, ifd, slot) = common::ifd_with_pace_reader(0);
    let sessions = Arc::new(EacSessionStore::new());
    let step = PaceStep::new(
        Arc::new(IfdDispatcher::new(ifd)),
        Arc::new(common::select(selected)),
        sessions.clone(),
    );

    let response = step.perform(&request(&slot, "PIN", common::eac1_input()));
    assert_minor(&response.result, "al/common#incorrectParameter");
    assert!(response.data.is_none());
    assert!(sessions.is_empty());
    assert!(
        !terminals
            .controls(READER)
            .iter()
            .any(|(_, data)| data.first() == Some(&0x02))
    );
}

#[test]
fn test_required_right_deselected() {
    let selected = Chat::from_bytes(&hex!("7F4C12060904007F00070301020253050000000800")).unwrap();
    let (step, slot) = pace_step(0, common::select(selected));

    let response = step.perform(&request(&slot, "PIN", common::eac1_input()));
    assert_minor(&response.result, "al/common#incorrectParameter");
}

#[test]
fn test_consent_declined() {
    let (step, slot) = pace_step(0, common::decline());

    let response = step.perform(&request(&slot, "PIN", common::eac1_input()));
    assert_minor(&response.result, "sal#cancellationByUser");
    assert!(step.sessions().is_empty());
}

#[test]
fn test_unknown_did_name() {
    let (step, slot) = pace_step(0, common::accept_all());

    let response = step.perform(&request(&slot, "TAN", common::eac1_input()));
    assert_minor(&response.result, "al/common#incorrectParameter");
    assert!(response.result.message.unwrap().contains("TAN"));
}

#[test]
fn test_malformed_input() {
    let (step, slot) = pace_step(0, common::accept_all());

    let missing_chat = AuthenticationData::new(EAC_PROTOCOL_URI)
        .with("Certificate", hex::encode(common::certificate("DEDV1", "DETERM1", &hex!("0000000B01"))))
        .with("CertificateDescription", hex::encode(common::description("I", "S", "T")));
    let response = step.perform(&request(&slot, "PIN", missing_chat));
    assert_minor(&response.result, "al/common#incorrectParameter");

    let broken_certificate = common::eac1_input().with("Certificate", "7F2103AABB");
    let response = step.perform(&request(&slot, "PIN", broken_certificate));
    assert_minor(&response.result, "al/common#incorrectParameter");
    assert!(step.sessions().is_empty());
}

#[test]
fn test_native_failure_is_reported() {
    let (step, slot) = pace_step(0xF020_0002, common::accept_all());

    let response = step.perform(&request(&slot, "PIN", common::eac1_input()));
    assert_minor(&response.result, "ifdl/common#timeoutError");
    assert!(step.sessions().is_empty());
}

/// Records the requests and answers with a fixed response
struct RecordingDispatcher {
    requests: Mutex<Vec<DispatchRequest>>,
    response: DispatchResponse,
}

impl Dispatcher for RecordingDispatcher {
    fn deliver(&self, request: DispatchRequest) -> DispatchResponse {
        self.requests.lock().push(request);
        self.response.clone()
    }
}

#[test]
fn test_dispatch_error_passthrough() {
    let (_terminals, _ifd, slot) = common::ifd_with_pace_reader(0);
    let status = ResultStatus::error(
        "http://www.bsi.bund.de/ecard/api/1.1/resultminor/sal#protocolNotRecognized",
        "no PACE",
    );
    let dispatcher = Arc::new(RecordingDispatcher {
        requests: Mutex::new(Vec::new()),
        response: DispatchResponse::error(status.clone()),
    });
    let step = PaceStep::new(
        dispatcher.clone(),
        Arc::new(common::accept_all()),
        Arc::new(EacSessionStore::new()),
    );

    let response = step.perform(&request(&slot, "can", common::eac1_input()));
    assert_eq!(response.result, status);

    let requests = dispatcher.requests.lock();
    assert_eq!(requests.len(), 1);
    match &requests[0] {
        DispatchRequest::EstablishChannel {
            slot: target,
            protocol,
            input,
        } => {
            assert_eq!(target, &slot);
            assert_eq!(protocol, PACE_PROTOCOL_URI);
            assert_eq!(input.password_id, PasswordId::Can);
            assert_eq!(input.pin.as_ref().map(|pin| pin.as_slice()), Some(&b"123456"[..]));
            assert!(input.certificate_description.is_some());
        }
        other => panic!("unexpected request {other:?}"),
    }
}

#[test]
fn test_channel_consent_accepted() {
    let (consent, prompts) = ChannelConsent::new();
    let (step, slot) = pace_step(0, consent.with_poll_interval(Duration::from_millis(5)));
    let step = Arc::new(step);

    let worker = {
        let step = step.clone();
        let request = request(&slot, "PIN", common::eac1_input());
        thread::spawn(move || step.perform(&request))
    };

    let prompt = prompts.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(prompt.content.terminal_certificate.chr().as_ref(), b"DETERM00001");
    assert_eq!(prompt.content.certificate_description.subject_name(), "Demo eService");
    assert_eq!(prompt.content.password_id, PasswordId::Pin);
    assert_eq!(step.sessions().get(EXCHANGE).unwrap().stage, EacStage::UserConsent);

    let selected = prompt.content.selected_chat.clone();
    assert!(prompt.answer(ConsentAnswer::Accept(ConsentResponse::new(
        selected,
        Some(b"123456".to_vec())
    ))));

    let response = worker.join().unwrap();
    assert!(response.result.is_ok(), "{}", response.result);
}

#[test]
fn test_teardown_during_consent() {
    let (consent, prompts) = ChannelConsent::new();
    let (step, slot) = pace_step(0, consent.with_poll_interval(Duration::from_millis(5)));
    let step = Arc::new(step);

    let worker = {
        let step = step.clone();
        let request = request(&slot, "PIN", common::eac1_input());
        thread::spawn(move || step.perform(&request))
    };

    let _prompt = prompts.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(step.sessions().cancel(EXCHANGE));

    let response = worker.join().unwrap();
    assert_minor(&response.result, "al/common#sessionTerminated");
    assert!(step.sessions().is_empty());
}

#[test]
fn test_replaced_run_keeps_new_session() {
    let (consent, prompts) = ChannelConsent::new();
    let (step, slot) = pace_step(0, consent.with_poll_interval(Duration::from_millis(5)));
    let step = Arc::new(step);
    let spawn_run = || {
        let step = step.clone();
        let request = request(&slot, "PIN", common::eac1_input());
        thread::spawn(move || step.perform(&request))
    };

    let first = spawn_run();
    let _first_prompt = prompts.recv_timeout(Duration::from_secs(5)).unwrap();
    let second = spawn_run();

    let response = first.join().unwrap();
    assert_minor(&response.result, "al/common#sessionTerminated");
    let session = step.sessions().get(EXCHANGE).unwrap();
    assert!(!session.token().is_cancelled());

    let prompt = prompts.recv_timeout(Duration::from_secs(5)).unwrap();
    let selected = prompt.content.selected_chat.clone();
    assert!(prompt.answer(ConsentAnswer::Accept(ConsentResponse::new(
        selected,
        Some(b"123456".to_vec())
    ))));

    let response = second.join().unwrap();
    assert!(response.result.is_ok(), "{}", response.result);
    let completed = step.sessions().get(EXCHANGE).unwrap();
    assert_eq!(completed.stage, EacStage::Completed);
    assert_eq!(completed.generation(), session.generation());
    assert!(completed.security_infos.is_some());
}

#[test]
fn test_consent_without_user_interface() {
    let (consent, prompts) = ChannelConsent::new();
    drop(prompts);
    let (step, slot) = pace_step(0, consent);

    let response = step.perform(&request(&slot, "PIN", common::eac1_input()));
    assert_minor(&response.result, "sal#cancellationByUser");
}
