//! Common test utilities
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use eidcard_eac::{
    AuthenticationData, Chat, ConsentContent, ConsentResponse, EAC_PROTOCOL_URI, UserConsent,
};
use eidcard_ifd::mock::{MockCard, MockTerminals};
use eidcard_ifd::{CancellationToken, Ifd, IfdConfig, IfdError, SlotHandle};
use hex_literal::hex;
use tracing_subscriber::EnvFilter;

/// Name of the test terminal
pub const READER: &str = "Test Reader 0";

/// Control code announced for EXECUTE_PACE
pub const EXECUTE_PACE_CODE: u32 = 0x4233_0020;

/// Age verification and ReadDG4
pub const REQUIRED_CHAT: &str = "7F4C12060904007F00070301020253050000000801";

/// ReadDG1 and ReadDG2
pub const OPTIONAL_CHAT: &str = "7F4C12060904007F00070301020253050000000300";

/// EF.CardAccess with two PACEInfos and one TA info
pub const EF_CARD_ACCESS: [u8; 54] = hex!(
    "3134"
    "300F 060A04007F00070202040202 020102"
    "3012 060A04007F00070202040202 020102 02010D"
    "300D 060804007F00070202 02 020102"
);

/// Install a test subscriber honouring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// BER-TLV with a definite length
pub fn tlv(tag: &[u8], value: &[u8]) -> Vec<u8> {
    let mut out = tag.to_vec();
    match value.len() {
        len @ 0..=0x7F => out.push(len as u8),
        len @ 0x80..=0xFF => out.extend_from_slice(&[0x81, len as u8]),
        len => {
            out.push(0x82);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
    }
    out.extend_from_slice(value);
    out
}

/// Card verifiable certificate from `car` to `chr` with an authentication
/// terminal CHAT of `bitmap`
pub fn certificate(car: &str, chr: &str, bitmap: &[u8]) -> Vec<u8> {
    let chat = [
        tlv(&[0x06], &hex!("04007F000703010202")),
        tlv(&[0x53], bitmap),
    ]
    .concat();
    let body = [
        tlv(&[0x5F, 0x29], &[0x00]),
        tlv(&[0x42], car.as_bytes()),
        tlv(&[0x7F, 0x49], &hex!("060A04007F00070202020203 860104")),
        tlv(&[0x5F, 0x20], chr.as_bytes()),
        tlv(&[0x7F, 0x4C], &chat),
        tlv(&[0x5F, 0x25], &hex!("010200090103")),
        tlv(&[0x5F, 0x24], &hex!("010200090203")),
    ]
    .concat();
    let inner = [tlv(&[0x7F, 0x4E], &body), tlv(&[0x5F, 0x37], &[0xAB; 64])].concat();
    tlv(&[0x7F, 0x21], &inner)
}

/// Plain text certificate description
pub fn description(issuer: &str, subject: &str, terms: &str) -> Vec<u8> {
    let utf8 = |tag: u8, text: &str| tlv(&[tag], &tlv(&[0x0C], text.as_bytes()));
    let fields = [
        tlv(&[0x06], &hex!("04007F00070301030101")),
        utf8(0xA1, issuer),
        utf8(0xA3, subject),
        utf8(0xA5, terms),
    ]
    .concat();
    tlv(&[0x30], &fields)
}

/// EAC1 input of a DIDAuthenticate request
pub fn eac1_input() -> AuthenticationData {
    AuthenticationData::new(EAC_PROTOCOL_URI)
        .with("Certificate", hex::encode_upper(certificate("DECVCA00001", "DEDV00001", &hex!("8000000000"))))
        .with("Certificate", hex::encode_upper(certificate("DEDV00001", "DETERM00001", &hex!("0000000B01"))))
        .with(
            "CertificateDescription",
            hex::encode_upper(description("Issuer", "Demo eService", "Demo terms")),
        )
        .with("RequiredCHAT", REQUIRED_CHAT)
        .with("OptionalCHAT", OPTIONAL_CHAT)
}

/// Output of a successful ExecutePACE establishment
pub fn establish_output() -> Vec<u8> {
    let mut data = hex!("9000").to_vec();
    data.extend_from_slice(&(EF_CARD_ACCESS.len() as u16).to_le_bytes());
    data.extend_from_slice(&EF_CARD_ACCESS);
    data.push(14);
    data.extend_from_slice(b"DECVCAeID00102");
    data.push(0);
    data.extend_from_slice(&[0x02, 0x00, 0xCA, 0xFE]);
    data
}

/// Encode an ExecutePACE answer
pub fn pace_answer(result: u32, data: &[u8]) -> Bytes {
    let mut raw = result.to_le_bytes().to_vec();
    raw.extend_from_slice(&(data.len() as u16).to_le_bytes());
    raw.extend_from_slice(data);
    Bytes::from(raw)
}

/// An IFD over a reader with native PACE, a connected card and its slot
pub fn ifd_with_pace_reader(establish_result: u32) -> (MockTerminals, Arc<Ifd>, SlotHandle) {
    init_tracing();
    let terminals = MockTerminals::new();
    terminals.add_terminal(READER);
    terminals.insert_card(READER, MockCard::new(hex!("3B8A80")));

    let mut features = vec![0x20, 0x04];
    features.extend_from_slice(&EXECUTE_PACE_CODE.to_be_bytes());
    terminals.set_features(READER, features);
    terminals.set_control_responder(READER, move |code, data| match (code, data.first()) {
        (EXECUTE_PACE_CODE, Some(0x01)) => Ok(pace_answer(0, &[0x01, 0x60])),
        (EXECUTE_PACE_CODE, Some(0x02)) if establish_result == 0 => {
            Ok(pace_answer(0, &establish_output()))
        }
        (EXECUTE_PACE_CODE, Some(0x02)) => Ok(pace_answer(establish_result, &[])),
        (EXECUTE_PACE_CODE, Some(0x03)) => Ok(pace_answer(0, &[])),
        _ => Ok(Bytes::from_static(&[0x6A, 0x81])),
    });

    let config = IfdConfig::default().with_poll_interval(Duration::from_millis(5));
    let ifd = Arc::new(Ifd::new(Arc::new(terminals.clone()), config));
    let ctx = ifd.establish_context();
    let slot = ifd
        .connect(&ctx, READER, false)
        .expect("connect to the test reader");
    (terminals, ifd, slot)
}

type Answer = dyn Fn(&ConsentContent) -> Result<ConsentResponse, IfdError> + Send + Sync;

/// [`UserConsent`] answering every request with a closure
pub struct FnConsent(Box<Answer>);

impl FnConsent {
    /// Answer with `answer`
    pub fn new(
        answer: impl Fn(&ConsentContent) -> Result<ConsentResponse, IfdError> + Send + Sync + 'static,
    ) -> Self {
        Self(Box::new(answer))
    }
}

impl UserConsent for FnConsent {
    fn request(
        &self,
        content: &ConsentContent,
        token: &CancellationToken,
    ) -> Result<ConsentResponse, IfdError> {
        token.check()?;
        (self.0)(content)
    }
}

/// Consent accepting the preselected rights with PIN `123456`
pub fn accept_all() -> FnConsent {
    FnConsent::new(|content| {
        Ok(ConsentResponse::new(content.selected_chat.clone(), Some(b"123456".to_vec())))
    })
}

/// Consent selecting `chat`
pub fn select(chat: Chat) -> FnConsent {
    FnConsent::new(move |_| Ok(ConsentResponse::new(chat.clone(), None)))
}

/// Consent declined by the user
pub fn decline() -> FnConsent {
    FnConsent::new(|_| Err(IfdError::CancellationByUser))
}
