//! Connection tests: the inbound acceptance gate, directory-resolved send
//! paths, and a full transport exchange between two connections.
mod helpers {
    include!("../helpers/mod.rs");
}

use std::sync::{Arc, Mutex};
use std::time::Duration;

use helpers::{error_collector, wait_until, MockSocket};
use korri_j1939::error::J1939Error;
use korri_j1939::protocol::connection::Connection;
use korri_j1939::protocol::j1939::{ADDRESS_GLOBAL, PGN_TP_CM, PGN_TP_DT};
use korri_j1939::protocol::management::name::Name;
use korri_j1939::protocol::management::network::Network;
use korri_j1939::protocol::transport::frame::{Data, Frame};
use korri_j1939::protocol::transport::frame_header::FrameHeader;
use korri_j1939::protocol::transport::traits::can_socket::CanSocket;
use korri_j1939::protocol::transport::transport_protocol::TICK_PERIOD;
use tokio::runtime::Handle;

const LOCAL_NAME: u64 = 0x10;
const TARGET_NAME: u64 = 0x20;
const LOCAL_SA: u8 = 0x31;
const TARGET_SA: u8 = 0x32;

/// Directory with the local and target controllers already bound.
fn bound_network() -> Arc<Network> {
    let network = Arc::new(Network::new());
    assert!(network.try_address_claim(Name::from_raw(LOCAL_NAME), LOCAL_SA));
    assert!(network.try_address_claim(Name::from_raw(TARGET_NAME), TARGET_SA));
    network
}

fn broadcast_frame(source: u8) -> Frame {
    let mut frame = Frame::default();
    frame
        .header
        .set_priority(6)
        .set_pgn(0xFECA)
        .set_source_address(source)
        .set_payload_length(8);
    frame
}

fn peer_frame(source: u8, destination: u8) -> Frame {
    let mut frame = Frame::default();
    frame
        .header
        .set_priority(6)
        .set_pdu_format(0xE0)
        .set_pdu_specific(destination)
        .set_source_address(source)
        .set_payload_length(8);
    frame
}

/// Collector for the accepted (gated) side of a connection.
fn data_collector() -> (Arc<Mutex<Vec<Data>>>, korri_j1939::protocol::j1939::OnData) {
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&messages);
    let callback: korri_j1939::protocol::j1939::OnData = Box::new(move |data| {
        sink.lock().unwrap().push(data);
    });
    (messages, callback)
}

#[tokio::test]
async fn test_open_reports_success() {
    let (socket, _host) = MockSocket::create_pair();
    let connection = Connection::new(&Handle::current(), bound_network(), socket);
    assert!(connection.open("vcan0"));
}

#[tokio::test]
async fn test_unscoped_connection_accepts_everything() {
    let (socket, host) = MockSocket::create_pair();
    let connection = Connection::new(&Handle::current(), bound_network(), socket);
    let (messages, on_data) = data_collector();
    connection.on_data(on_data);
    connection.start();

    host.send(&broadcast_frame(0x55)).unwrap();
    host.send(&peer_frame(0x55, 0x66)).unwrap();

    assert!(
        wait_until(Duration::from_millis(300), || messages.lock().unwrap().len() == 2).await
    );
}

#[tokio::test]
async fn test_gate_filters_by_target_and_local_name() {
    let (socket, host) = MockSocket::create_pair();
    let connection = Connection::with_names(
        &Handle::current(),
        bound_network(),
        socket,
        Some(Name::from_raw(LOCAL_NAME)),
        Some(Name::from_raw(TARGET_NAME)),
    );
    let (messages, on_data) = data_collector();
    connection.on_data(on_data);

    let reads = Arc::new(Mutex::new(0usize));
    let read_counter = Arc::clone(&reads);
    connection.on_read(Box::new(move |_frame| {
        *read_counter.lock().unwrap() += 1;
    }));
    connection.start();

    // From the target to us: accepted.
    host.send(&peer_frame(TARGET_SA, LOCAL_SA)).unwrap();
    // From the target to someone else: rejected.
    host.send(&peer_frame(TARGET_SA, 0x66)).unwrap();
    // From a stranger to us: rejected.
    host.send(&peer_frame(0x77, LOCAL_SA)).unwrap();
    // Broadcast from the target: accepted.
    host.send(&broadcast_frame(TARGET_SA)).unwrap();
    // Broadcast from a stranger: rejected (a target is bound).
    host.send(&broadcast_frame(0x77)).unwrap();

    assert!(
        wait_until(Duration::from_millis(300), || *reads.lock().unwrap() == 5).await,
        "raw read callback must see every frame"
    );
    let accepted = messages.lock().unwrap();
    assert_eq!(accepted.len(), 2);
    assert_eq!(accepted[0].header.pdu_specific(), LOCAL_SA);
    assert!(accepted[1].header.is_broadcast());
}

#[tokio::test]
async fn test_send_frame_stamps_source_on_broadcast() {
    let (socket, host) = MockSocket::create_pair();
    let connection = Connection::with_names(
        &Handle::current(),
        bound_network(),
        socket,
        Some(Name::from_raw(LOCAL_NAME)),
        None,
    );

    assert!(connection.send_frame(&broadcast_frame(0x00)));
    let sent = host.recv_timeout(Duration::from_millis(200)).await.unwrap();
    assert_eq!(sent.header.source_address(), LOCAL_SA);
    assert_eq!(sent.header.pgn(), 0xFECA);
}

#[tokio::test]
async fn test_send_to_resolves_both_addresses() {
    let (socket, host) = MockSocket::create_pair();
    let connection = Connection::with_names(
        &Handle::current(),
        bound_network(),
        socket,
        Some(Name::from_raw(LOCAL_NAME)),
        None,
    );

    assert!(connection.send_to(Name::from_raw(TARGET_NAME), &peer_frame(0x00, 0x00)));
    let sent = host.recv_timeout(Duration::from_millis(200)).await.unwrap();
    assert_eq!(sent.header.source_address(), LOCAL_SA);
    assert_eq!(sent.header.pdu_specific(), TARGET_SA);
}

#[tokio::test]
async fn test_send_without_claimed_address_reports() {
    let (socket, _host) = MockSocket::create_pair();
    let network = Arc::new(Network::new());
    // Registered but idle: no source address to stamp.
    network.try_emplace(Name::from_raw(LOCAL_NAME));
    let connection = Connection::with_names(
        &Handle::current(),
        network,
        socket,
        Some(Name::from_raw(LOCAL_NAME)),
        None,
    );
    let (errors, on_error) = error_collector();
    connection.on_error(on_error);

    assert!(!connection.send_frame(&broadcast_frame(0x00)));
    let reported = errors.lock().unwrap();
    assert_eq!(reported[0].1, J1939Error::NoSourceAddress);
}

#[tokio::test]
async fn test_send_peer_frame_without_target_reports() {
    let (socket, _host) = MockSocket::create_pair();
    let connection = Connection::with_names(
        &Handle::current(),
        bound_network(),
        socket,
        Some(Name::from_raw(LOCAL_NAME)),
        None,
    );
    let (errors, on_error) = error_collector();
    connection.on_error(on_error);

    assert!(!connection.send_frame(&peer_frame(0x00, 0x00)));
    assert_eq!(errors.lock().unwrap()[0].1, J1939Error::NoTargetName);
}

#[tokio::test]
async fn test_small_data_goes_out_as_single_frame() {
    let (socket, host) = MockSocket::create_pair();
    let connection = Connection::with_names(
        &Handle::current(),
        bound_network(),
        socket,
        Some(Name::from_raw(LOCAL_NAME)),
        None,
    );

    let mut header = FrameHeader::new();
    header.set_priority(6).set_pgn(0xFECA);
    let data = Data::new(header, vec![1, 2, 3, 4]);
    assert!(connection.send(&data));

    let sent = host.recv_timeout(Duration::from_millis(200)).await.unwrap();
    assert_eq!(sent.header.pgn(), 0xFECA);
    assert_eq!(sent.header.payload_length(), 4);
    assert_eq!(&sent.payload[..4], &[1, 2, 3, 4]);
    assert_eq!(sent.header.source_address(), LOCAL_SA);
}

#[tokio::test]
async fn test_large_data_crosses_the_transport_protocol() {
    // Two connections wired back-to-back: the message leaves one side
    // through RTS/CTS and surfaces whole on the other side's data
    // callback.
    let network = bound_network();
    let (local_socket, target_socket) = MockSocket::create_pair();

    let sender = Connection::with_names(
        &Handle::current(),
        Arc::clone(&network),
        local_socket,
        Some(Name::from_raw(LOCAL_NAME)),
        Some(Name::from_raw(TARGET_NAME)),
    );
    let receiver = Connection::with_names(
        &Handle::current(),
        Arc::clone(&network),
        target_socket,
        Some(Name::from_raw(TARGET_NAME)),
        Some(Name::from_raw(LOCAL_NAME)),
    );

    let (messages, on_data) = data_collector();
    receiver.on_data(on_data);
    sender.start();
    receiver.start();
    sender.start_tick(TICK_PERIOD);
    receiver.start_tick(TICK_PERIOD);

    let message: Vec<u8> = (0..100u8).collect();
    let mut header = FrameHeader::new();
    header.set_priority(6).set_pdu_format(0xE0).set_pdu_specific(TARGET_SA);
    assert!(sender.send(&Data::new(header, message.clone())));

    assert!(
        wait_until(Duration::from_millis(1000), || {
            messages
                .lock()
                .unwrap()
                .iter()
                .any(|data| data.payload == message)
        })
        .await,
        "reassembled message never arrived"
    );
    let delivered = messages.lock().unwrap();
    let reassembled = delivered.iter().find(|data| data.payload == message).unwrap();
    assert_eq!(reassembled.header.source_address(), LOCAL_SA);
    assert_eq!(reassembled.header.payload_length(), 100);
}

#[tokio::test]
async fn test_broadcast_data_uses_bam() {
    let network = bound_network();
    let (local_socket, host) = MockSocket::create_pair();
    let connection = Connection::with_names(
        &Handle::current(),
        network,
        local_socket,
        Some(Name::from_raw(LOCAL_NAME)),
        None,
    );

    let mut header = FrameHeader::new();
    header.set_priority(6).set_pgn(0xFECA);
    assert!(connection.send(&Data::new(header, vec![0x42; 20])));

    // One BAM announce plus three data packets, all to the global address.
    let announce = host.recv_timeout(Duration::from_millis(200)).await.unwrap();
    assert_eq!(announce.header.pgn(), PGN_TP_CM);
    assert_eq!(announce.header.pdu_specific(), ADDRESS_GLOBAL);
    assert_eq!(announce.payload[0], 0x20);
    for expected_seq in 1..=3u8 {
        let packet = host.recv_timeout(Duration::from_millis(200)).await.unwrap();
        assert_eq!(packet.header.pgn(), PGN_TP_DT);
        assert_eq!(packet.payload[0], expected_seq);
        assert_eq!(packet.header.source_address(), LOCAL_SA);
    }
}
