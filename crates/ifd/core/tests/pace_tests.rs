//! Secure channel establishment tests

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use eidcard_ifd::mock::MockCard;
use eidcard_ifd::{
    ApduChannel, ErrorKind, IfdError, InputApdu, PACE_PROTOCOL_URI, PaceFailure, PaceInput,
    PaceOutput, PasswordId, ProtocolFactory, Result, SecureChannelProtocol, TerminalError,
};
use hex_literal::hex;

use common::READER;

const CHAT: [u8; 21] = hex!("7F4C 12 060904007F000703010202 53050000000004");

/// Software PACE double that runs one MSE:Set AT and then prefixes every
/// command with `0C`.
struct XorPace {
    created: Arc<AtomicUsize>,
}

struct XorPaceSession;

impl ProtocolFactory for XorPace {
    fn protocol_uri(&self) -> &str {
        PACE_PROTOCOL_URI
    }

    fn create(&self) -> Box<dyn SecureChannelProtocol> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Box::new(XorPaceSession)
    }
}

impl SecureChannelProtocol for XorPaceSession {
    fn protocol_uri(&self) -> &str {
        PACE_PROTOCOL_URI
    }

    fn establish(&mut self, channel: &mut dyn ApduChannel, input: &PaceInput) -> Result<PaceOutput> {
        let mse = [0x00, 0x22, 0xC1, 0xA4, 0x03, 0x83, 0x01, input.password_id as u8];
        let response = channel.transmit_raw(&mse)?;
        let status = eidcard_apdu_core::Response::from_bytes(&response)?.status();
        Ok(PaceOutput {
            retry_counter: eidcard_ifd::pace::retry_counter(status),
            ef_card_access: Bytes::copy_from_slice(&hex!("3100")),
            car_current: None,
            car_previous: None,
            id_icc: None,
            native: false,
        })
    }

    fn wrap(&mut self, command: Bytes) -> Result<Bytes> {
        let mut wrapped = command.to_vec();
        wrapped[0] |= 0x0C;
        Ok(Bytes::from(wrapped))
    }
}

fn software_factory() -> (Arc<AtomicUsize>, Arc<XorPace>) {
    let created = Arc::new(AtomicUsize::new(0));
    (created.clone(), Arc::new(XorPace { created }))
}

fn establish_output() -> Vec<u8> {
    let mut data = hex!("63C2 0300 310100").to_vec();
    data.extend_from_slice(&hex!("05 4445435643 00 0000"));
    data
}

#[test]
fn test_native_pace() {
    let (terminals, ifd) = common::ifd_with_card(MockCard::new(hex!("3B00")));
    common::pace_reader(&terminals, 0x60, |request| {
        assert_eq!(request[3], PasswordId::Pin as u8);
        Ok(common::pace_answer(0, &establish_output()))
    });
    let ctx = ifd.establish_context();
    let slot = ifd.connect(&ctx, READER, false).unwrap();

    let caps = ifd.get_ifd_capabilities(&ctx, READER).unwrap();
    assert!(caps.card_present);
    assert_eq!(caps.protocols[0], PACE_PROTOCOL_URI);

    let input = PaceInput::new(PasswordId::Pin).with_chat(CHAT.to_vec());
    let output = ifd.establish_channel(&slot, PACE_PROTOCOL_URI, &input).unwrap();
    assert!(output.native);
    assert_eq!(output.retry_counter, 2);
    assert_eq!(output.ef_card_access.as_ref(), &hex!("310100"));
    assert_eq!(output.car_current.as_deref(), Some(&b"DECVC"[..]));
    assert!(terminals.transmitted(READER).is_empty());
}

#[test]
fn test_native_failure_never_falls_through() {
    let (terminals, ifd) = common::ifd_with_card(MockCard::new(hex!("3B00")));
    common::pace_reader(&terminals, 0x40, |_| Ok(common::pace_answer(0xF020_0002, &[])));
    let (created, factory) = software_factory();
    assert!(ifd.register_protocol(factory));
    let ctx = ifd.establish_context();
    let slot = ifd.connect(&ctx, READER, false).unwrap();

    let err = ifd
        .establish_channel(&slot, PACE_PROTOCOL_URI, &PaceInput::new(PasswordId::Can))
        .unwrap_err();
    assert!(matches!(err, IfdError::NativePace(PaceFailure::Timeout)));
    assert_eq!(created.load(Ordering::SeqCst), 0);
}

#[test]
fn test_native_cancellation() {
    let (terminals, ifd) = common::ifd_with_card(MockCard::new(hex!("3B00")));
    common::pace_reader(&terminals, 0x40, |_| Ok(common::pace_answer(0xF020_0001, &[])));
    let ctx = ifd.establish_context();
    let slot = ifd.connect(&ctx, READER, false).unwrap();

    let err = ifd
        .establish_channel(&slot, PACE_PROTOCOL_URI, &PaceInput::new(PasswordId::Pin))
        .unwrap_err();
    assert!(err.is_cancellation());
}

#[test]
fn test_native_driver_error() {
    let (terminals, ifd) = common::ifd_with_card(MockCard::new(hex!("3B00")));
    common::pace_reader(&terminals, 0x40, |_| Err(TerminalError::message("reader crashed")));
    let ctx = ifd.establish_context();
    let slot = ifd.connect(&ctx, READER, false).unwrap();

    let err = ifd
        .establish_channel(&slot, PACE_PROTOCOL_URI, &PaceInput::new(PasswordId::Pin))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnderlyingIoError);
}

#[test]
fn test_software_pace_installs_secure_messaging() {
    let card = MockCard::new(hex!("3B00")).with_response(hex!("0022C1A4 03 830103"), hex!("63C1"));
    let (terminals, ifd) = common::ifd_with_card(card);
    let (created, factory) = software_factory();
    assert!(ifd.register_protocol(factory.clone()));
    assert!(!ifd.register_protocol(factory));
    let ctx = ifd.establish_context();
    let slot = ifd.connect(&ctx, READER, false).unwrap();

    let output = ifd
        .establish_channel(&slot, PACE_PROTOCOL_URI, &PaceInput::new(PasswordId::Pin))
        .unwrap();
    assert!(!output.native);
    assert_eq!(output.retry_counter, 1);
    assert_eq!(created.load(Ordering::SeqCst), 1);

    ifd.transmit(&slot, &[InputApdu::new(hex!("00B0000000").to_vec())]).unwrap();
    assert_eq!(terminals.transmitted(READER).last().unwrap()[0], 0x0C);

    ifd.destroy_channel(&slot).unwrap();
    ifd.transmit(&slot, &[InputApdu::new(hex!("00B0000000").to_vec())]).unwrap();
    assert_eq!(terminals.transmitted(READER).last().unwrap()[0], 0x00);
}

#[test]
fn test_unsupported_password_uses_software() {
    let (terminals, ifd) = common::ifd_with_card(MockCard::new(hex!("3B00")));
    common::pace_reader(&terminals, 0x20, |_| panic!("native PACE must not run for MRZ"));
    let (created, factory) = software_factory();
    ifd.register_protocol(factory);
    let ctx = ifd.establish_context();
    let slot = ifd.connect(&ctx, READER, false).unwrap();

    let output = ifd
        .establish_channel(&slot, PACE_PROTOCOL_URI, &PaceInput::new(PasswordId::Mrz))
        .unwrap();
    assert!(!output.native);
    assert_eq!(created.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unknown_protocol() {
    let (_, ifd) = common::ifd_with_card(MockCard::new(hex!("3B00")));
    let ctx = ifd.establish_context();
    let slot = ifd.connect(&ctx, READER, false).unwrap();

    let err = ifd
        .establish_channel(&slot, PACE_PROTOCOL_URI, &PaceInput::new(PasswordId::Pin))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownProtocol);

    let err = ifd
        .establish_channel(&slot, "", &PaceInput::new(PasswordId::Pin))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);
}

#[test]
fn test_destroy_native_channel() {
    let (terminals, ifd) = common::ifd_with_card(MockCard::new(hex!("3B00")));
    common::pace_reader(&terminals, 0xC0, |_| Ok(common::pace_answer(0, &establish_output())));
    let ctx = ifd.establish_context();
    let slot = ifd.connect(&ctx, READER, false).unwrap();

    ifd.establish_channel(&slot, PACE_PROTOCOL_URI, &PaceInput::new(PasswordId::Can))
        .unwrap();
    ifd.destroy_channel(&slot).unwrap();
    let last = terminals.controls(READER).last().cloned().unwrap();
    assert_eq!(last.0, common::EXECUTE_PACE_CODE);
    assert_eq!(last.1.as_ref(), &[0x03, 0x00, 0x00]);
}
