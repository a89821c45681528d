//! Transport protocol integration tests driven by real time: watchdog
//! expiry through the periodic ticker and remote aborts.
mod helpers {
    include!("../../helpers/mod.rs");
}

use std::sync::{Arc, Mutex};
use std::time::Duration;

use helpers::{error_collector, wait_until, RecordingBus};
use korri_j1939::error::J1939Error;
use korri_j1939::protocol::j1939::PGN_TP_CM;
use korri_j1939::protocol::transport::frame::Frame;
use korri_j1939::protocol::transport::frame_header::FrameHeader;
use korri_j1939::protocol::transport::transport_protocol::TransportProtocol;
use korri_j1939::protocol::transport::{AbortCode, Control};
use tokio::runtime::Handle;

const OUR_SA: u8 = 0x01;
const PEER_SA: u8 = 0x90;

fn abort_from(remote: u8, local: u8, code: AbortCode) -> Frame {
    let mut header = FrameHeader::new();
    header
        .set_priority(7)
        .set_pgn(PGN_TP_CM)
        .set_pdu_specific(local)
        .set_source_address(remote)
        .set_payload_length(8);
    let mut payload = [0xFF; 8];
    payload[0] = Control::Abort as u8;
    payload[1] = code as u8;
    Frame::new(header, payload)
}

#[tokio::test]
async fn test_rts_without_cts_times_out_through_ticker() {
    let bus = RecordingBus::new(OUR_SA);
    let transport = Arc::new(Mutex::new(TransportProtocol::new(bus.clone())));
    let (errors, on_error) = error_collector();
    transport.lock().unwrap().set_error_handler(on_error);

    assert!(transport.lock().unwrap().send(&vec![0x42; 20], PEER_SA, 0x1234));
    let announced = bus.take();
    assert_eq!(announced.len(), 1);
    assert_eq!(announced[0].payload[0], Control::Rts as u8);

    let ticker = TransportProtocol::start_tick(
        &transport,
        &Handle::current(),
        Duration::from_millis(100),
    );

    // No CTS ever arrives: T3 (1250 ms) expires and the session aborts.
    assert!(
        wait_until(Duration::from_millis(2000), || !errors.lock().unwrap().is_empty()).await
    );
    ticker.abort();

    let reported = errors.lock().unwrap();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].1, J1939Error::Timeout);

    let aborts = bus.take();
    assert_eq!(aborts.len(), 1);
    assert_eq!(aborts[0].payload[0], Control::Abort as u8);
    assert_eq!(aborts[0].payload[1], 0x03);
    assert_eq!(aborts[0].header.pdu_specific(), PEER_SA);
    assert_eq!(transport.lock().unwrap().session_count(), 0);
}

#[tokio::test]
async fn test_remote_abort_halts_the_send() {
    let bus = RecordingBus::new(OUR_SA);
    let transport = Arc::new(Mutex::new(TransportProtocol::new(bus.clone())));
    let (errors, on_error) = error_collector();
    transport.lock().unwrap().set_error_handler(on_error);

    assert!(transport.lock().unwrap().send(&vec![0x42; 20], PEER_SA, 0x1234));
    bus.take();

    transport
        .lock()
        .unwrap()
        .on_can_frame(&abort_from(PEER_SA, OUR_SA, AbortCode::AlreadyInSession));

    let reported = errors.lock().unwrap().clone();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].1, J1939Error::RemoteAbort(AbortCode::AlreadyInSession));
    drop(reported);

    // Ticking afterwards produces no further outbound frames.
    let ticker = TransportProtocol::start_tick(
        &transport,
        &Handle::current(),
        Duration::from_millis(100),
    );
    tokio::time::sleep(Duration::from_millis(1500)).await;
    ticker.abort();

    assert!(bus.take().is_empty());
    assert!(errors.lock().unwrap().len() == 1);
}

#[tokio::test]
async fn test_completed_exchange_outlives_the_ticker() {
    // A full RTS/CTS/DT/EOM exchange leaves no session for the ticker to
    // expire.
    let bus = RecordingBus::new(OUR_SA);
    let transport = Arc::new(Mutex::new(TransportProtocol::new(bus.clone())));
    let (errors, on_error) = error_collector();
    transport.lock().unwrap().set_error_handler(on_error);

    assert!(transport.lock().unwrap().send(&vec![0x42; 20], PEER_SA, 0x1234));
    bus.take();

    let mut header = FrameHeader::new();
    header
        .set_priority(7)
        .set_pgn(PGN_TP_CM)
        .set_pdu_specific(OUR_SA)
        .set_source_address(PEER_SA)
        .set_payload_length(8);

    let mut cts = [0xFF; 8];
    cts[0] = Control::Cts as u8;
    cts[1] = 3;
    cts[2] = 1;
    transport.lock().unwrap().on_can_frame(&Frame::new(header, cts));
    assert_eq!(bus.take().len(), 3);

    let mut eom = [0xFF; 8];
    eom[0] = Control::Eom as u8;
    transport.lock().unwrap().on_can_frame(&Frame::new(header, eom));
    assert_eq!(transport.lock().unwrap().session_count(), 0);

    let ticker = TransportProtocol::start_tick(
        &transport,
        &Handle::current(),
        Duration::from_millis(100),
    );
    tokio::time::sleep(Duration::from_millis(1500)).await;
    ticker.abort();
    assert!(errors.lock().unwrap().is_empty());
    assert!(bus.take().is_empty());
}
