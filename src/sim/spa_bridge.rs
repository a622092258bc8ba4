use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, trace, warn};

use super::manager::BleManager;
use super::model::{Characteristic, CharacteristicKey, DeviceUpdate, DiscoverableDevice};
use crate::error::{BleError, SimulatedError};
use crate::relay::RelayMessage;
use crate::spa::{
    DeviceProtocolState, SPA_SERVICE_UUID, SpaCharacteristic, SpaDevice, WriteOutcome,
    spa_service_metadata,
};

/// Encodes a spa characteristic value the way it travels over the transport.
#[must_use]
pub fn encode_value(value: &str) -> String {
    STANDARD.encode(value)
}

/// Decodes a transport value into spa characteristic text.
#[must_use]
pub fn decode_value(encoded: &str) -> Option<String> {
    let bytes = STANDARD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

/// Transport key of one spa characteristic on one device.
#[must_use]
pub fn spa_key(device_id: &str, characteristic: SpaCharacteristic) -> CharacteristicKey {
    CharacteristicKey::new(device_id, SPA_SERVICE_UUID, characteristic.uuid())
}

type Changes = Vec<(SpaCharacteristic, String)>;

impl BleManager {
    /// Registers a spa controller as a discoverable device keyed by its MAC.
    ///
    /// Writes to the spa operation service of that device are handed to the
    /// controller from then on.
    pub fn attach_spa_device(&self, device: SpaDevice) {
        let device_id = device.mac().to_string();
        let values = device.state().characteristics().clone();
        self.add_device(
            DiscoverableDevice::builder()
                .id(device_id.as_str())
                .name(device.state().value(SpaCharacteristic::BtName))
                .rssi(device.rssi())
                .service_uuids(vec![SPA_SERVICE_UUID.to_string()])
                .build(),
        );
        self.set_device_services(&device_id, vec![spa_service_metadata()]);
        for (characteristic, value) in values {
            self.inner
                .characteristics
                .set_value(&spa_key(&device_id, characteristic), encode_value(&value));
        }
        info!(device_id, area = device.area(), "spa device attached");
        self.inner.spa_devices.lock().insert(device_id, device);
    }

    /// Snapshot of an attached spa controller's state.
    #[must_use]
    pub fn spa_device_state(&self, device_id: &str) -> Option<DeviceProtocolState> {
        self.inner
            .spa_devices
            .lock()
            .get(device_id)
            .map(|device| device.state().clone())
    }

    /// Subscribes to relay events.
    ///
    /// Only events published after this call are observed.
    #[must_use]
    pub fn relay_events(&self) -> BroadcastStream<RelayMessage> {
        BroadcastStream::new(self.inner.relay.subscribe())
    }

    pub(super) fn spa_target(&self, key: &CharacteristicKey) -> Option<SpaCharacteristic> {
        if key.service_uuid() != SPA_SERVICE_UUID {
            return None;
        }
        if !self.inner.spa_devices.lock().contains_key(key.device_id()) {
            return None;
        }
        SpaCharacteristic::from_uuid(key.characteristic_uuid())
    }

    pub(super) fn route_spa_write(
        &self,
        key: &CharacteristicKey,
        characteristic: SpaCharacteristic,
        encoded: &str,
    ) -> Result<WriteOutcome, BleError> {
        let device_id = key.device_id();
        let value = decode_value(encoded).ok_or_else(|| BleError::InvalidValue {
            characteristic_uuid: key.characteristic_uuid().to_string(),
        })?;
        let Some((outcome, changes)) =
            self.mutate_spa_device(device_id, |device| device.handle_write(characteristic, &value))
        else {
            return Err(BleError::device_not_found(device_id));
        };

        if let WriteOutcome::Rejected(reason) = outcome {
            warn!(device_id, %characteristic, %reason, "spa write rejected");
        }
        self.publish_spa_changes(device_id, changes);
        if outcome == WriteOutcome::Disconnect {
            self.simulate_disconnection(device_id, Some(SimulatedError::disconnect_requested()));
        }
        Ok(outcome)
    }

    pub(super) fn on_spa_link_change(&self, device_id: &str, connected: bool) {
        let changes = self.mutate_spa_device(device_id, |device| {
            if connected {
                device.connect();
            } else {
                device.disconnect();
            }
        });
        if let Some(((), changes)) = changes {
            self.publish_spa_changes(device_id, changes);
        }
    }

    fn mutate_spa_device<R>(
        &self,
        device_id: &str,
        mutate: impl FnOnce(&mut SpaDevice) -> R,
    ) -> Option<(R, Changes)> {
        let mut devices = self.inner.spa_devices.lock();
        let device = devices.get_mut(device_id)?;
        let before = device.state().characteristics().clone();
        let result = mutate(device);
        let changes = device
            .state()
            .characteristics()
            .iter()
            .filter(|(characteristic, value)| before.get(characteristic) != Some(*value))
            .map(|(characteristic, value)| (*characteristic, value.clone()))
            .collect();
        Some((result, changes))
    }

    fn publish_spa_changes(&self, device_id: &str, changes: Changes) {
        for (characteristic, value) in changes {
            trace!(device_id, %characteristic, value = value.as_str(), "spa characteristic changed");
            if characteristic == SpaCharacteristic::BtName {
                let renamed = self
                    .inner
                    .scan
                    .update_device(device_id, DeviceUpdate::builder().name(value.as_str()).build());
                if let Err(error) = renamed {
                    debug!(%error, "renamed device is no longer registered");
                }
            }
            self.emit_relay(RelayMessage::state_change(
                device_id,
                characteristic,
                value.as_str(),
            ));

            let key = spa_key(device_id, characteristic);
            let encoded = encode_value(&value);
            let monitors = self
                .inner
                .characteristics
                .set_value_for_notify(&key, encoded.clone());
            self.fan_out(&key, monitors, Characteristic::new(&key, Some(encoded)));
        }
    }

    pub(super) fn relay_notification(&self, key: &CharacteristicKey, current: &Characteristic) {
        let Some(characteristic) = self.spa_target(key) else {
            return;
        };
        let value = current.value().and_then(decode_value).unwrap_or_default();
        self.emit_relay(RelayMessage::notification(
            key.device_id(),
            characteristic,
            value.as_str(),
        ));
    }

    fn emit_relay(&self, message: RelayMessage) {
        if self.inner.relay.send(message).is_err() {
            trace!("no relay subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::sim::ConnectOptions;
    use crate::spa::DeviceMode;

    const MAC: &str = "AA:BB:CC:DD:EE:FF";

    async fn connected_spa() -> BleManager {
        let manager = BleManager::default();
        manager.attach_spa_device(SpaDevice::with_mac(MAC));
        manager
            .connect(MAC, ConnectOptions::default())
            .await
            .expect("spa should connect");
        manager
    }

    #[test]
    fn values_round_trip_through_base64() {
        assert_eq!("MzguNQ==", encode_value("38.5"));
        assert_eq!(Some("38.5".to_string()), decode_value("MzguNQ=="));
        assert_eq!(None, decode_value("not base64!"));
    }

    #[test]
    fn attaching_publishes_initial_values() {
        let manager = BleManager::default();
        manager.attach_spa_device(SpaDevice::with_mac(MAC));

        let device = manager.device(MAC).expect("spa should be discoverable");
        assert_eq!(Some("Spa_DD:EE:FF"), device.name());
        assert_eq!(Some(-70), device.rssi());
        assert_eq!(
            Some(encode_value("20")),
            manager
                .inner
                .characteristics
                .value(&spa_key(MAC, SpaCharacteristic::Temperature))
        );
    }

    #[tokio::test]
    async fn invalid_base64_is_rejected_without_mutation() {
        let manager = connected_spa().await;

        let result = manager
            .write_with_response(&spa_key(MAC, SpaCharacteristic::Temperature), "%%%")
            .await;

        assert_matches!(result, Err(BleError::InvalidValue { .. }));
        let state = manager.spa_device_state(MAC).expect("spa should be attached");
        assert_eq!("20", state.value(SpaCharacteristic::Temperature));
    }

    #[tokio::test]
    async fn connecting_moves_the_device_out_of_advertising() {
        let manager = connected_spa().await;
        let state = manager.spa_device_state(MAC).expect("spa should be attached");

        assert_eq!(crate::spa::ConnectionPhase::Connected, state.connection_phase());
    }

    #[tokio::test]
    async fn renaming_updates_the_advertised_name() {
        let manager = connected_spa().await;

        manager
            .write_with_response(&spa_key(MAC, SpaCharacteristic::BtName), encode_value("Garden"))
            .await
            .expect("write should succeed");

        let device = manager.device(MAC).expect("spa should be discoverable");
        assert_eq!(Some("Garden"), device.name());
    }

    #[tokio::test]
    async fn disconnect_command_drops_the_link() {
        let manager = connected_spa().await;
        manager
            .write_with_response(&spa_key(MAC, SpaCharacteristic::Mcode), encode_value("S1234"))
            .await
            .expect("set code should succeed");
        assert_eq!(
            Some(DeviceMode::Master),
            manager.spa_device_state(MAC).map(|state| state.mode())
        );

        manager
            .write_with_response(&spa_key(MAC, SpaCharacteristic::Mmode), encode_value("D"))
            .await
            .expect("disconnect command should be accepted");

        assert!(!manager.is_connected(MAC));
        assert_eq!(
            Some(DeviceMode::Free),
            manager.spa_device_state(MAC).map(|state| state.mode())
        );
    }
}
