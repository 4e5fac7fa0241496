//! Two overlay nodes talking through linked in-memory radios.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use digimesh_rs::at::DeliveryStatus;
use digimesh_rs::{
    FrameType, ItemId, MeshAddress, MeshError, MeshOverlay, MockTransport, OverlayConfig,
    RadioClient,
};

const ADDR_A: MeshAddress = MeshAddress(0x0013_A200_4000_000A);
const ADDR_B: MeshAddress = MeshAddress(0x0013_A200_4000_000B);
const VEHICLE: &str = "Vehicle";
const WAIT: Duration = Duration::from_secs(2);

/// Two radios in range of each other. B reports `b_delivery` for every
/// transmission.
fn radios(b_delivery: DeliveryStatus) -> (Arc<MockTransport>, Arc<MockTransport>) {
    let a = Arc::new(MockTransport::new());
    let b = Arc::new(MockTransport::new());
    a.acknowledge_at_commands();
    b.acknowledge_at_commands();
    a.acknowledge_transmits(DeliveryStatus::Success);
    b.acknowledge_transmits(b_delivery);
    a.deliver_to(ADDR_A, &b, ADDR_B);
    b.deliver_to(ADDR_B, &a, ADDR_A);
    (a, b)
}

fn start(mock: &Arc<MockTransport>) -> MeshOverlay {
    let config = OverlayConfig::new([VEHICLE]);
    let radio = RadioClient::connect_shared(mock.clone(), config.radio.clone()).unwrap();
    MeshOverlay::start(radio, config).unwrap()
}

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_item_presence_propagates() {
    let (mock_a, mock_b) = radios(DeliveryStatus::Success);
    let node_a = start(&mock_a);
    let node_b = start(&mock_b);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    node_b
        .add_new_item_handler(VEHICLE, move |id, addr| log.lock().unwrap().push((id, addr)))
        .unwrap();

    node_a.add_item(VEHICLE, ItemId(7)).unwrap();
    wait_until("presence at B", || !seen.lock().unwrap().is_empty());

    assert_eq!(*seen.lock().unwrap(), vec![(ItemId(7), ADDR_A)]);
    assert_eq!(node_b.resolve(VEHICLE, ItemId(7)).unwrap(), ADDR_A);

    let announced = mock_a
        .sent_frames()
        .into_iter()
        .filter_map(|frame| frame.transmit_data().map(<[u8]>::to_vec))
        .any(|data| data == b"\x02Vehicle\x00\x00\x00\x00\x07");
    assert!(announced);
}

#[test]
fn test_send_data_between_nodes() {
    let (mock_a, mock_b) = radios(DeliveryStatus::Success);
    let node_a = start(&mock_a);
    let node_b = start(&mock_b);

    let received = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&received);
    node_a.add_data_handler(move |payload: &[u8], source| {
        log.lock().unwrap().push((payload.to_vec(), source))
    });

    node_a.add_item(VEHICLE, ItemId(7)).unwrap();
    wait_until("presence at B", || node_b.resolve(VEHICLE, ItemId(7)).is_ok());

    node_b.send_data(VEHICLE, ItemId(7), &[0x01, 0x02]).unwrap();
    wait_until("data at A", || !received.lock().unwrap().is_empty());

    assert_eq!(*received.lock().unwrap(), vec![(vec![0x01, 0x02], ADDR_B)]);
    let request = mock_b
        .sent_frames()
        .into_iter()
        .filter(|frame| frame.frame_type == FrameType::TransmitRequest)
        .find(|frame| frame.destination() == Some(ADDR_A))
        .unwrap();
    assert_eq!(request.transmit_data().unwrap(), &[0x01, 0x01, 0x02]);
}

#[test]
fn test_transmit_error_fires_once() {
    let (mock_a, mock_b) = radios(DeliveryStatus::NetworkAckFailure);
    let node_a = start(&mock_a);
    let node_b = start(&mock_b);

    let failures = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&failures);
    node_b
        .add_transmit_error_handler(VEHICLE, move |id, status| {
            log.lock().unwrap().push((id, status.delivery))
        })
        .unwrap();

    node_a.add_item(VEHICLE, ItemId(7)).unwrap();
    wait_until("presence at B", || node_b.resolve(VEHICLE, ItemId(7)).is_ok());

    node_b.send_data(VEHICLE, ItemId(7), &[0x01, 0x02]).unwrap();
    wait_until("transmit error", || !failures.lock().unwrap().is_empty());
    thread::sleep(Duration::from_millis(50));

    assert_eq!(
        *failures.lock().unwrap(),
        vec![(ItemId(7), DeliveryStatus::NetworkAckFailure)]
    );
}

#[test]
fn test_late_joiner_learns_items() {
    let (mock_a, mock_b) = radios(DeliveryStatus::Success);
    let node_a = start(&mock_a);
    node_a.add_item(VEHICLE, ItemId(1)).unwrap();
    node_a.add_item(VEHICLE, ItemId(2)).unwrap();

    // B starts after the announcements and asks for them.
    let node_b = start(&mock_b);
    wait_until("items at B", || node_b.known_items(VEHICLE).unwrap().len() == 2);

    assert_eq!(
        node_b.known_items(VEHICLE).unwrap(),
        vec![(ItemId(1), ADDR_A), (ItemId(2), ADDR_A)]
    );
}

#[test]
fn test_remove_item_propagates() {
    let (mock_a, mock_b) = radios(DeliveryStatus::Success);
    let node_a = start(&mock_a);
    let node_b = start(&mock_b);

    let removed = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&removed);
    node_b.add_generic_item_removed_handler(move |component: &str, id| {
        log.lock().unwrap().push((component.to_string(), id))
    });

    node_a.add_item(VEHICLE, ItemId(7)).unwrap();
    wait_until("presence at B", || node_b.resolve(VEHICLE, ItemId(7)).is_ok());

    assert!(node_a.remove_item(VEHICLE, ItemId(7)).unwrap());
    wait_until("removal at B", || !removed.lock().unwrap().is_empty());

    assert_eq!(*removed.lock().unwrap(), vec![(VEHICLE.to_string(), ItemId(7))]);
    assert!(matches!(
        node_b.resolve(VEHICLE, ItemId(7)),
        Err(MeshError::UnknownIdentity { .. })
    ));
}

#[test]
fn test_duplicate_claim_rejected() {
    let (mock_a, mock_b) = radios(DeliveryStatus::Success);
    let node_a = start(&mock_a);
    let node_b = start(&mock_b);

    node_a.add_item(VEHICLE, ItemId(7)).unwrap();
    wait_until("presence at B", || node_b.resolve(VEHICLE, ItemId(7)).is_ok());

    let err = node_b.add_item(VEHICLE, ItemId(7)).unwrap_err();
    assert!(matches!(
        err,
        MeshError::DuplicateIdentity { existing: ADDR_A, claimed: MeshAddress::LOCAL, .. }
    ));
    assert!(node_b.local_items(VEHICLE).unwrap().is_empty());
}
