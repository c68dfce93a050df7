//! Tests against the system PC/SC service. They skip when no service, reader
//! or card is available.

mod common;

use eidcard_apdu_core::{Command, Response};
use eidcard_ifd::{DisconnectAction, IfdError, InputApdu, TerminalFactory};
use hex_literal::hex;

use common::{get_ifd_with_card, get_terminals};

#[test]
fn test_list_terminals() {
    let Some(terminals) = get_terminals() else {
        println!("Skipping test: PC/SC service not available");
        return;
    };

    let readers = terminals.list_terminals().expect("list readers");
    for reader in &readers {
        // Presence must be reported for every listed reader
        let present = terminals.is_card_present(reader);
        println!("{reader}: {present:?}");
    }
}

#[test]
fn test_unknown_terminal() {
    let Some(terminals) = get_terminals() else {
        println!("Skipping test: PC/SC service not available");
        return;
    };

    assert!(terminals.is_card_present("no such reader 0").is_err());
    assert!(terminals.connect("no such reader 0").is_err());
    assert!(terminals.connect("bad\0name").is_err());
}

#[test]
fn test_select_master_file() {
    let Some((ifd, reader)) = get_ifd_with_card() else {
        println!("Skipping test: no reader with a card available");
        return;
    };

    let ctx = ifd.establish_context();
    let slot = ifd.connect(&ctx, &reader, false).expect("connect");

    let select = Command::new_with_data(0x00, 0xA4, 0x00, 0x0C, hex!("3F00").to_vec())
        .to_bytes()
        .expect("encode");
    let responses = ifd
        .transmit(&slot, &[InputApdu::new(select)])
        .expect("transmit");
    let response = Response::from_bytes(&responses[0]).expect("response");
    println!("SELECT MF: {}", response.status());

    ifd.disconnect(&slot, DisconnectAction::Leave).expect("disconnect");
    ifd.release_context(&ctx).expect("release");
}

#[test]
fn test_transaction() {
    let Some((ifd, reader)) = get_ifd_with_card() else {
        println!("Skipping test: no reader with a card available");
        return;
    };

    let ctx = ifd.establish_context();
    let first = ifd.connect(&ctx, &reader, false).expect("connect");
    let second = ifd.connect(&ctx, &reader, false).expect("connect");

    ifd.begin_transaction(&first).expect("begin");
    assert!(matches!(
        ifd.begin_transaction(&second),
        Err(IfdError::IllegalState(_))
    ));
    ifd.end_transaction(&first).expect("end");

    // GET CHALLENGE is answered by most eID cards
    let challenge = InputApdu::new(hex!("0084000008").to_vec());
    let _ = ifd.transmit(&second, &[challenge]);

    ifd.release_context(&ctx).expect("release");
}
