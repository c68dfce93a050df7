//! Example showing how to follow terminal and card events

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eidcard_ifd::{Ifd, IfdConfig, IfdEvent};
use eidcard_ifd_pcsc::PcscTerminals;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Print terminal and card events")]
struct Args {
    /// Poll interval in milliseconds
    #[arg(long, default_value_t = 500)]
    poll_ms: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let config = IfdConfig::new().with_poll_interval(Duration::from_millis(args.poll_ms));
    let ifd = Ifd::new(Arc::new(PcscTerminals::new()?), config);
    let ctx = ifd.establish_context();
    let events = ifd.subscribe(&ctx)?;

    println!("Monitoring for reader and card events. Press Ctrl+C to exit.");
    for event in events {
        match event {
            IfdEvent::TerminalAdded(t) => println!("Reader added: {t}"),
            IfdEvent::TerminalRemoved(t) => println!("Reader removed: {t}"),
            IfdEvent::CardInserted(t) => println!("Card inserted in reader '{t}'"),
            IfdEvent::CardRemoved(t) => println!("Card removed from reader '{t}'"),
            IfdEvent::CardReset(t) => println!("Card reset in reader '{t}'"),
        }
    }

    ifd.release_context(&ctx)?;
    Ok(())
}
