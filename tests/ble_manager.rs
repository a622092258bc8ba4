use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rstest::rstest;
use spa_sim::{
    BleError, BleManager, CharacteristicKey, ConnectOptions, ConnectionEvent, DiscoverableDevice,
    ErrorKind, PowerState, Restoration, RestorationStore, SimulatedError, SimulatorConfig,
    Subscription,
};

fn device(id: &str) -> DiscoverableDevice {
    DiscoverableDevice::builder().id(id).name(id).rssi(-50).build()
}

fn key(device_id: &str) -> CharacteristicKey {
    CharacteristicKey::new(device_id, "180d", "2a37")
}

fn quiet_manager() -> BleManager {
    BleManager::new(
        SimulatorConfig::builder()
            .scan_error_probability(0.0)
            .rng_seed(1)
            .build(),
    )
}

async fn connected_manager(ids: &[&str]) -> BleManager {
    let manager = quiet_manager();
    for id in ids {
        manager.add_device(device(id));
        manager
            .connect(id, ConnectOptions::default())
            .await
            .expect("device should connect");
    }
    manager
}

fn recorder<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(T) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |event| sink.lock().push(event))
}

#[rstest]
#[case("ghost")]
#[case("AA:BB:CC:DD:EE:FF")]
#[tokio::test]
async fn unknown_devices_cannot_connect(#[case] device_id: &str) {
    let manager = quiet_manager();

    let result = manager.connect(device_id, ConnectOptions::default()).await;

    let error = result.expect_err("unknown device should not connect");
    assert_matches!(&error, BleError::DeviceNotFound { device_id: id } if id == device_id);
    assert_eq!(ErrorKind::NotFound, error.kind());
}

#[tokio::test]
async fn non_connectable_devices_leave_the_connected_set_unchanged() {
    let manager = connected_manager(&["a"]).await;
    manager.add_device(DiscoverableDevice::builder().id("beacon").is_connectable(false).build());

    let result = manager.connect("beacon", ConnectOptions::default()).await;

    assert_matches!(result, Err(BleError::NotConnectable { .. }));
    assert_eq!(vec!["a".to_string()], manager.connected_devices());
}

#[tokio::test]
async fn connect_checks_power_before_anything_else() {
    let manager = quiet_manager();
    manager.add_device(DiscoverableDevice::builder().id("beacon").is_connectable(false).build());
    manager.simulate_connection_error("beacon", SimulatedError::new("refused"));
    manager.set_power_state(PowerState::PoweredOff);

    let result = manager.connect("beacon", ConnectOptions::default()).await;

    assert_matches!(
        result,
        Err(BleError::NotPoweredOn {
            state: PowerState::PoweredOff
        })
    );
}

#[tokio::test]
async fn mtu_requests_are_capped_by_the_device_maximum() {
    let manager = connected_manager(&["a"]).await;
    manager.set_device_max_mtu("a", 150);
    let (seen, listener) = recorder();
    let _subscription = manager.on_mtu_changed("a", listener);

    let accepted = manager.request_mtu("a", 1000).expect("mtu should negotiate");

    assert_eq!(150, accepted);
    assert_eq!(vec![150], *seen.lock());
    assert_eq!(Some(150), manager.device("a").map(|device| device.mtu()));
}

#[tokio::test]
async fn powering_off_disconnects_every_device_with_an_error() {
    let ids = ["a", "b", "c"];
    let manager = connected_manager(&ids).await;
    let (seen, listener) = recorder::<ConnectionEvent>();
    let listener = Arc::new(listener);
    let _subscriptions: Vec<Subscription> = ids
        .iter()
        .map(|id| {
            let listener = Arc::clone(&listener);
            manager.on_connection_event(id, move |event| listener(event))
        })
        .collect();

    manager.set_power_state(PowerState::PoweredOff);

    let events = seen.lock().clone();
    assert_eq!(ids.len(), events.len());
    for event in &events {
        assert_matches!(event, ConnectionEvent::Disconnected { .. });
        assert_eq!(
            Some("Bluetooth powered off"),
            event.error().map(SimulatedError::message)
        );
    }
    assert!(manager.connected_devices().is_empty());
}

#[tokio::test]
async fn monitor_removed_in_its_own_callback_sees_one_value() {
    let manager = connected_manager(&["a"]).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
    let subscription = {
        let seen = Arc::clone(&seen);
        let slot = Arc::clone(&slot);
        manager
            .monitor(&key("a"), move |event| {
                seen.lock().push(event);
                if let Some(subscription) = slot.lock().as_ref() {
                    subscription.remove();
                }
            })
            .expect("monitor should start")
    };
    *slot.lock() = Some(subscription);

    manager.set_value(&key("a"), "AQ==", true);
    manager.set_value(&key("a"), "Ag==", true);

    let seen = seen.lock();
    assert_eq!(1, seen.len());
    assert_matches!(&seen[0], Ok(characteristic) if characteristic.value() == Some("AQ=="));
}

#[tokio::test]
async fn monitor_removed_by_an_earlier_listener_misses_the_same_fan_out() {
    let manager = connected_manager(&["a"]).await;
    let victim_slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
    let _remover = {
        let victim_slot = Arc::clone(&victim_slot);
        manager
            .monitor(&key("a"), move |_event| {
                if let Some(victim) = victim_slot.lock().as_ref() {
                    victim.remove();
                }
            })
            .expect("monitor should start")
    };
    let (seen, listener) = recorder();
    *victim_slot.lock() = Some(
        manager
            .monitor(&key("a"), listener)
            .expect("monitor should start"),
    );

    manager.set_value(&key("a"), "AQ==", true);

    assert!(seen.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn armed_read_error_rejects_after_the_read_delay() {
    let manager = connected_manager(&["a"]).await;
    manager.set_characteristic_read_delay(&key("a"), Duration::from_millis(500));
    manager.simulate_characteristic_read_error(&key("a"), SimulatedError::new("read failed"));

    let started = tokio::time::Instant::now();
    let result = manager.read(&key("a")).await;

    assert_matches!(result, Err(BleError::Injected(error)) if error.message() == "read failed");
    assert!(started.elapsed() >= Duration::from_millis(500));

    manager.clear_characteristic_read_error(&key("a"));
    manager.set_value_for_reading(&key("a"), "AQ==");
    let read = manager.read(&key("a")).await.expect("read should succeed");
    assert_eq!(Some("AQ=="), read.value());
}

#[tokio::test]
async fn failed_writes_leave_the_stored_value_untouched() {
    let manager = connected_manager(&["a"]).await;
    manager.set_value_for_reading(&key("a"), "AQ==");
    manager.simulate_characteristic_write_error(
        &key("a"),
        spa_sim::WriteMode::WithResponse,
        SimulatedError::new("write failed"),
    );

    let failed = manager.write_with_response(&key("a"), "Ag==").await;
    let unaffected = manager.write_without_response(&key("a"), "Aw==").await;

    assert_matches!(failed, Err(BleError::Injected(_)));
    assert_matches!(unaffected, Ok(_));
    let read = manager.read(&key("a")).await.expect("read should succeed");
    assert_eq!(Some("Aw=="), read.value());
}

#[tokio::test]
async fn restored_managers_report_previously_connected_devices() {
    let store = RestorationStore::new();
    let config = || {
        SimulatorConfig::builder()
            .restoration(Restoration::new(store.clone(), "spa-app"))
            .build()
    };
    let first = BleManager::new(config());
    first.add_device(device("a"));
    first
        .connect("a", ConnectOptions::default())
        .await
        .expect("device should connect");

    let second = BleManager::new(config());

    let restored = second.restored_state().expect("snapshot should exist");
    assert_eq!(
        vec!["a"],
        restored.iter().map(DiscoverableDevice::id).collect::<Vec<_>>()
    );
    assert!(second.is_connected("a"));
}

#[tokio::test]
async fn discovery_requires_a_connection_and_known_services() {
    let manager = connected_manager(&["a"]).await;
    manager.add_device(device("b"));

    assert_matches!(
        manager.discover_services("b"),
        Err(BleError::NotConnected { .. })
    );
    assert_matches!(
        manager.services_for("a"),
        Err(BleError::ServicesNotDiscovered { .. })
    );
    manager.discover_services("a").expect("discovery should run");
    assert_matches!(
        manager.characteristics_for("a", "ffff"),
        Err(BleError::ServiceNotFound { .. })
    );
}
