//! Network manager tests: directory bookkeeping, new-controller
//! announcements, and unicast/global dispatch of claims and requests.
mod helpers {
    include!("../../helpers/mod.rs");
}

use std::sync::{Arc, Mutex};
use std::time::Duration;

use helpers::{frame_collector, wait_for_frames, wait_until};
use korri_j1939::protocol::j1939::{ADDRESS_GLOBAL, ADDRESS_IDLE};
use korri_j1939::protocol::management::address_claimer::AddressClaimer;
use korri_j1939::protocol::management::name::Name;
use korri_j1939::protocol::management::network::Network;
use korri_j1939::protocol::management::network_manager::NetworkManager;
use korri_j1939::protocol::transport::frame::Frame;
use korri_j1939::protocol::transport::frame_header::FrameHeader;
use tokio::runtime::Handle;

/// A request frame with an explicit destination in PS.
fn request_to(destination: u8) -> Frame {
    Frame::make_address_request(destination)
}

/// A claim frame rewritten to target a specific destination address.
fn claim_to(name: Name, address: u8, destination: u8) -> Frame {
    let mut frame = Frame::make_address_claim(name, address);
    frame.header.set_pdu_specific(destination);
    frame
}

struct Controller {
    claimer: AddressClaimer,
    frames: Arc<Mutex<Vec<Frame>>>,
}

/// Spawn a claimer, drive it to own `address`, and clear its frame log.
async fn settled_controller(network: &Arc<Network>, raw_name: u64, address: u8) -> Controller {
    let name = Name::from_raw(raw_name);
    let claimer = AddressClaimer::new(&Handle::current(), name, Arc::clone(network));
    let (frames, on_frame) = frame_collector();
    claimer.on_frame(on_frame);
    claimer.start_address_claim(address);
    assert!(
        wait_until(Duration::from_millis(500), || network.get_address(name) == address).await,
        "claimer {raw_name:#x} never settled on {address:#x}"
    );
    frames.lock().unwrap().clear();
    Controller { claimer, frames }
}

#[tokio::test]
async fn test_claim_from_unknown_controller_is_registered_and_announced() {
    let network = Arc::new(Network::new());
    let mut manager = NetworkManager::new(Arc::clone(&network));

    let announced = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&announced);
    manager.set_on_new_controller(Box::new(move |name, address| {
        sink.lock().unwrap().push((name, address));
    }));

    let newcomer = Name::from_raw(0x0000_0000_0000_4242);
    manager.process(&Frame::make_address_claim(newcomer, 0x33));
    assert_eq!(network.get_address(newcomer), 0x33);
    assert_eq!(announced.lock().unwrap().as_slice(), &[(newcomer, 0x33)]);

    // A second claim from the same controller is not announced again.
    manager.process(&Frame::make_address_claim(newcomer, 0x34));
    assert_eq!(announced.lock().unwrap().len(), 1);
    assert_eq!(network.get_address(newcomer), 0x34);
}

#[tokio::test]
async fn test_global_request_reaches_every_claimer() {
    let network = Arc::new(Network::new());
    let first = settled_controller(&network, 0x10, 0x01).await;
    let second = settled_controller(&network, 0x20, 0x02).await;

    let mut manager = NetworkManager::new(Arc::clone(&network));
    manager.insert(&first.claimer);
    manager.insert(&second.claimer);
    assert_eq!(manager.len(), 2);

    manager.process(&request_to(ADDRESS_GLOBAL));

    let from_first = wait_for_frames(&first.frames, 1, Duration::from_millis(200)).await;
    let from_second = wait_for_frames(&second.frames, 1, Duration::from_millis(200)).await;
    assert_eq!(from_first.len(), 1);
    assert_eq!(from_first[0].header.source_address(), 0x01);
    assert_eq!(from_second.len(), 1);
    assert_eq!(from_second[0].header.source_address(), 0x02);
}

#[tokio::test]
async fn test_unicast_request_reaches_only_the_holder() {
    let network = Arc::new(Network::new());
    let first = settled_controller(&network, 0x10, 0x01).await;
    let second = settled_controller(&network, 0x20, 0x02).await;

    let mut manager = NetworkManager::new(Arc::clone(&network));
    manager.insert(&first.claimer);
    manager.insert(&second.claimer);

    manager.process(&request_to(0x01));

    let from_first = wait_for_frames(&first.frames, 1, Duration::from_millis(200)).await;
    assert_eq!(from_first.len(), 1);
    assert_eq!(from_first[0].header.source_address(), 0x01);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(second.frames.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_global_claim_conflict_reaches_all_but_moves_only_the_victim() {
    let network = Arc::new(Network::new());
    let first = settled_controller(&network, 0x8000_0000_0000_0010, 0x01).await;
    let second = settled_controller(&network, 0x8000_0000_0000_0020, 0x02).await;

    let mut manager = NetworkManager::new(Arc::clone(&network));
    manager.insert(&first.claimer);
    manager.insert(&second.claimer);

    // A lower NAME takes first's address; the claim fans out to everyone,
    // but only the evicted claimer has a conflict to react to.
    let challenger = Name::from_raw(0x01);
    manager.process(&Frame::make_address_claim(challenger, 0x01));

    let from_first = wait_for_frames(&first.frames, 1, Duration::from_millis(300)).await;
    assert!(!from_first.is_empty());
    assert_ne!(from_first[0].header.source_address(), 0x01);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(second.frames.lock().unwrap().is_empty());
    assert_eq!(network.get_name(0x01), Some(challenger));
}

#[tokio::test]
async fn test_targeted_claim_resolves_destination_after_arbitration() {
    let network = Arc::new(Network::new());
    let controller = settled_controller(&network, 0x8000_0000_0000_0010, 0x01).await;

    let mut manager = NetworkManager::new(Arc::clone(&network));
    manager.insert(&controller.claimer);

    // The challenger wins the directory arbitration first, so the unicast
    // destination now resolves to the challenger itself, which has no
    // local claimer: the event is dropped and the victim stays quiet.
    let challenger = Name::from_raw(0x01);
    manager.process(&claim_to(challenger, 0x01, 0x01));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(controller.frames.lock().unwrap().is_empty());
    assert_eq!(network.get_name(0x01), Some(challenger));
    assert_eq!(network.get_address(controller.claimer.name()), ADDRESS_IDLE);
}

#[tokio::test]
async fn test_remove_stops_routing() {
    let network = Arc::new(Network::new());
    let controller = settled_controller(&network, 0x10, 0x01).await;

    let mut manager = NetworkManager::new(Arc::clone(&network));
    manager.insert(&controller.claimer);
    manager.remove(controller.claimer.name());
    assert!(manager.is_empty());

    manager.process(&request_to(ADDRESS_GLOBAL));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(controller.frames.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_non_claim_frames_are_ignored() {
    let network = Arc::new(Network::new());
    let mut manager = NetworkManager::new(Arc::clone(&network));

    let mut frame = Frame::default();
    frame.header = *FrameHeader::new().set_pgn(0xF004).set_source_address(0x55);
    manager.process(&frame);
    assert_eq!(network.name_size(), 0);
}
