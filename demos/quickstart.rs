//! # Quickstart Example
//!
//! Minimal example demonstrating the basics of korri-j1939:
//! - Build a J1939 NAME
//! - Claim an address against a shared directory
//! - Move a multi-packet message through the transport protocol
//!
//! The CAN bus is simulated in-process, so the example runs anywhere.
//!
//! ```bash
//! cargo run --example quickstart
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use korri_j1939::protocol::j1939::ADDRESS_GLOBAL;
use korri_j1939::protocol::management::address_claimer::AddressClaimer;
use korri_j1939::protocol::management::name::Name;
use korri_j1939::protocol::management::network::Network;
use korri_j1939::protocol::transport::frame::Frame;
use korri_j1939::protocol::transport::frame_header::FrameHeader;
use korri_j1939::protocol::transport::traits::bus::Bus;
use korri_j1939::protocol::transport::transport_protocol::TransportProtocol;
use tokio::runtime::Handle;

/// Loopback bus printing everything that would go on the wire.
#[derive(Clone)]
struct PrintingBus {
    source: u8,
    log: Arc<Mutex<Vec<Frame>>>,
}

impl Bus for PrintingBus {
    fn send(&self, frame: &Frame) -> bool {
        println!("   TX {frame}");
        self.log.lock().unwrap().push(*frame);
        true
    }

    fn source_address(&self) -> u8 {
        self.source
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    println!("=== korri-j1939 Quickstart ===\n");

    // ======================================================================
    // 1. Create a NAME identity
    // ======================================================================
    println!("1. Building a J1939 NAME");

    let name = Name::builder()
        .identity_number(12345) // Unique serial number
        .manufacturer_code(229) // Manufacturer code
        .function(130) // Function: off-board diagnostics
        .device_class(25) // Vehicle system
        .industry_group(0) // Global
        .self_config_address(true) // May fall back to another address
        .build();

    println!("   NAME: {}", name);
    println!("   Raw:  {:#018x}\n", name.raw());

    // ======================================================================
    // 2. Claim an address
    // ======================================================================
    println!("2. Claiming source address 0x42");

    let network = Arc::new(Network::new());
    let claimer = AddressClaimer::new(&Handle::current(), name, Arc::clone(&network));
    claimer.on_frame(Box::new(|frame| println!("   TX {frame}")));
    claimer.on_log(Box::new(|line| println!("      {line}")));
    claimer.start_address_claim(0x42);

    // Wait out the 250 ms contention window.
    tokio::time::sleep(Duration::from_millis(300)).await;
    println!("   Claimed: {:#04x}\n", network.get_address(name));

    // ======================================================================
    // 3. Send a multi-packet message (BAM broadcast)
    // ======================================================================
    println!("3. Broadcasting 20 bytes through the transport protocol");

    let bus = PrintingBus {
        source: network.get_address(name),
        log: Arc::new(Mutex::new(Vec::new())),
    };
    let mut transport = TransportProtocol::new(bus.clone());
    let payload: Vec<u8> = (0..20).collect();
    transport.send(&payload, ADDRESS_GLOBAL, 0xFECA);
    println!("   {} frames on the wire\n", bus.log.lock().unwrap().len());

    // ======================================================================
    // 4. Answer a request for the address claimed PGN
    // ======================================================================
    println!("4. Answering a global request");
    claimer.process(&Frame::make_address_request(ADDRESS_GLOBAL));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let header = FrameHeader::from_pgn(6, 0xFECA, network.get_address(name), 8);
    println!("\n   A broadcast header for PGN 0xFECA: {:08x}", header.id());
    println!("\nQuickstart complete.");
}
