//! Example showing how to enumerate terminals and their capabilities

use std::sync::Arc;

use eidcard_ifd::{Ifd, IfdConfig};
use eidcard_ifd_pcsc::PcscTerminals;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let ifd = Ifd::new(Arc::new(PcscTerminals::new()?), IfdConfig::default());
    let ctx = ifd.establish_context();

    let terminals = ifd.list_ifds(&ctx)?;
    println!("Found {} readers:", terminals.len());

    for (i, terminal) in terminals.iter().enumerate() {
        println!("{}. Reader: {}", i + 1, terminal);

        match ifd.get_ifd_capabilities(&ctx, terminal) {
            Ok(caps) if caps.card_present => {
                println!("   Card present");
                println!("   PACE capabilities: {:#04X}", caps.pace.bitmap());
                for protocol in &caps.protocols {
                    println!("   Protocol: {protocol}");
                }
            }
            Ok(_) => println!("   No card present"),
            Err(e) => println!("   Error: {e}"),
        }
    }

    ifd.release_context(&ctx)?;
    Ok(())
}
