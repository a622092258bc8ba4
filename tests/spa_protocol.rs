use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rstest::rstest;
use spa_sim::spa::{
    ConnectionPhase, DeviceMode, OperationalPhase, SpaCharacteristic, SpaDevice, frame_value,
};
use spa_sim::{BleManager, ConnectOptions, decode_value, encode_value, spa_key};

const MAC: &str = "AA:BB:CC:DD:EE:01";
const CODE: &str = "AAAAAAAAAAAAAAAA";

async fn paired_manager() -> BleManager {
    let manager = BleManager::default();
    manager.attach_spa_device(SpaDevice::with_mac(MAC));
    manager
        .connect(MAC, ConnectOptions::default())
        .await
        .expect("spa should connect");
    manager
}

async fn write(manager: &BleManager, characteristic: SpaCharacteristic, value: &str) {
    manager
        .write_with_response(&spa_key(MAC, characteristic), encode_value(value))
        .await
        .expect("transport write should succeed");
}

fn mode(manager: &BleManager) -> DeviceMode {
    manager
        .spa_device_state(MAC)
        .expect("spa should be attached")
        .mode()
}

fn value(manager: &BleManager, characteristic: SpaCharacteristic) -> String {
    manager
        .spa_device_state(MAC)
        .expect("spa should be attached")
        .value(characteristic)
        .to_string()
}

#[tokio::test]
async fn chunked_write_lands_once_with_the_full_value() {
    let manager = paired_manager().await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let _subscription = {
        let seen = Arc::clone(&seen);
        manager
            .monitor(&spa_key(MAC, SpaCharacteristic::Session), move |event| {
                if let Ok(characteristic) = event {
                    seen.lock()
                        .extend(characteristic.value().and_then(decode_value));
                }
            })
            .expect("monitor should start")
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    seen.lock().clear();

    for frame in ["0AB", "2CD", "9EF"] {
        write(&manager, SpaCharacteristic::Session, frame).await;
    }

    assert_eq!(vec!["ABCDEF".to_string()], *seen.lock());
    assert_eq!("ABCDEF", value(&manager, SpaCharacteristic::Session));
    let read = manager
        .read(&spa_key(MAC, SpaCharacteristic::Session))
        .await
        .expect("read should succeed");
    assert_eq!(
        Some("ABCDEF".to_string()),
        read.value().and_then(decode_value)
    );
}

#[tokio::test]
async fn continuation_without_a_start_is_a_literal_write() {
    let manager = paired_manager().await;

    write(&manager, SpaCharacteristic::Session, "2XY").await;

    assert_eq!("2XY", value(&manager, SpaCharacteristic::Session));
    assert_eq!(
        OperationalPhase::SessionSet,
        manager
            .spa_device_state(MAC)
            .expect("spa should be attached")
            .operational_phase()
    );
}

#[tokio::test]
async fn set_code_then_clear_code_round_trips_through_master() {
    let manager = paired_manager().await;
    assert_eq!(DeviceMode::Free, mode(&manager));

    write(&manager, SpaCharacteristic::Mcode, &format!("S{CODE}")).await;
    assert_eq!(DeviceMode::Master, mode(&manager));
    assert_eq!("M", value(&manager, SpaCharacteristic::Mmode));

    write(&manager, SpaCharacteristic::Mcode, "C").await;
    assert_eq!(DeviceMode::Free, mode(&manager));
}

#[tokio::test]
async fn clear_code_is_rejected_outside_master_mode() {
    let manager = paired_manager().await;
    write(&manager, SpaCharacteristic::Mcode, &format!("S{CODE}pw")).await;
    write(&manager, SpaCharacteristic::Mcode, "BBBBBBBBBBBBBBBBpw").await;
    assert_eq!(DeviceMode::NonMaster, mode(&manager));

    write(&manager, SpaCharacteristic::Mcode, "C").await;

    assert_eq!(DeviceMode::NonMaster, mode(&manager));
}

#[rstest]
#[case::fits(23, "38.5")]
#[case::chunked(8, "a much longer session payload")]
#[tokio::test]
async fn framed_values_arrive_intact(#[case] mtu: u16, #[case] text: &str) {
    let manager = paired_manager().await;

    for frame in frame_value(text, mtu) {
        write(&manager, SpaCharacteristic::Session, &frame).await;
    }

    assert_eq!(text, value(&manager, SpaCharacteristic::Session));
}

#[tokio::test]
async fn disconnecting_returns_the_spa_to_advertising() {
    let manager = paired_manager().await;
    write(&manager, SpaCharacteristic::Mcode, &format!("S{CODE}")).await;

    manager
        .disconnect(MAC)
        .await
        .expect("disconnect should succeed");

    let state = manager.spa_device_state(MAC).expect("spa should be attached");
    assert_eq!(ConnectionPhase::Advertising, state.connection_phase());
    assert_eq!(DeviceMode::Free, state.mode());
}
