//! Example establishing a PACE channel in a reader with a pinpad
//!
//! ```sh
//! RUST_LOG=debug cargo run --example establish_pace -- --reader "REINER SCT cyberJack RFID komfort" --password-id PIN
//! ```

use std::sync::Arc;

use clap::Parser;
use eidcard_ifd::{DisconnectAction, Ifd, IfdConfig, PACE_PROTOCOL_URI, PaceInput, PasswordId};
use eidcard_ifd_pcsc::PcscTerminals;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Establish a PACE channel with an eID card")]
struct Args {
    /// Reader name, defaults to the first reader with a card
    #[arg(short, long)]
    reader: Option<String>,

    /// Password type: MRZ, CAN, PIN or PUK
    #[arg(short, long, default_value = "PIN")]
    password_id: String,

    /// Password, omit to enter it on the reader's pinpad
    #[arg(long)]
    pin: Option<String>,

    /// CHAT as hex
    #[arg(long)]
    chat: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let password_id = PasswordId::from_did_name(&args.password_id)
        .ok_or_else(|| format!("unknown password type {}", args.password_id))?;
    let mut input = PaceInput::new(password_id);
    if let Some(pin) = args.pin {
        input = input.with_pin(pin.into_bytes());
    }
    if let Some(chat) = args.chat {
        input = input.with_chat(hex::decode(chat)?);
    }

    let ifd = Ifd::new(Arc::new(PcscTerminals::new()?), IfdConfig::default());
    let ctx = ifd.establish_context();

    let reader = match args.reader {
        Some(reader) => reader,
        None => ifd
            .get_status(&ctx, None)?
            .into_iter()
            .find(|s| s.card_present)
            .map(|s| s.terminal)
            .ok_or("no reader with a card found")?,
    };
    println!("Using reader: {reader}");

    let slot = ifd.connect(&ctx, &reader, false)?;
    match ifd.establish_channel(&slot, PACE_PROTOCOL_URI, &input) {
        Ok(output) => {
            println!("PACE established (native: {})", output.native);
            println!("Retry counter: {}", output.retry_counter);
            println!("EF.CardAccess: {}", hex::encode_upper(&output.ef_card_access));
            if let Some(car) = &output.car_current {
                println!("Current CAR: {}", String::from_utf8_lossy(car));
            }
            ifd.destroy_channel(&slot)?;
        }
        Err(e) => println!("PACE failed: {e}"),
    }

    ifd.disconnect(&slot, DisconnectAction::Leave)?;
    ifd.release_context(&ctx)?;
    Ok(())
}
