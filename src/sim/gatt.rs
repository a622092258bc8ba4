use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use super::listeners::{Dispatch, Listener, Subscription};
use super::manager::BleManager;
use super::model::{
    Characteristic, CharacteristicKey, CharacteristicMetadata, DiscoverableDevice, MonitorEvent,
    Service, ServiceMetadata, WriteMode,
};
use super::timer::{simulate_latency, spawn_interval};
use crate::error::{BleError, SimulatedError};

/// Service metadata and discovery results per device.
#[derive(Debug, Default)]
pub(super) struct GattState {
    metadata: HashMap<String, Vec<ServiceMetadata>>,
    discovered: HashMap<String, Vec<Service>>,
}

impl BleManager {
    /// Sets the services a device exposes once discovered.
    pub fn set_device_services(&self, device_id: &str, services: Vec<ServiceMetadata>) {
        self.inner
            .gatt
            .lock()
            .metadata
            .insert(device_id.to_string(), services);
    }

    /// Discovers all services and characteristics of a connected device.
    #[instrument(skip(self), level = "debug")]
    pub fn discover_services(&self, device_id: &str) -> Result<DiscoverableDevice, BleError> {
        self.ensure_connected(device_id)?;
        let device = self
            .inner
            .scan
            .device(device_id)
            .ok_or_else(|| BleError::device_not_found(device_id))?;

        let mut gatt = self.inner.gatt.lock();
        let services: Vec<Service> = gatt
            .metadata
            .get(device_id)
            .into_iter()
            .flatten()
            .map(|service| Service::new(service.uuid().to_string(), device_id.to_string()))
            .collect();
        debug!(device_id, services = services.len(), "services discovered");
        gatt.discovered.insert(device_id.to_string(), services);
        Ok(device)
    }

    /// Services found by the last discovery on the current connection.
    pub fn services_for(&self, device_id: &str) -> Result<Vec<Service>, BleError> {
        self.inner
            .gatt
            .lock()
            .discovered
            .get(device_id)
            .cloned()
            .ok_or_else(|| BleError::ServicesNotDiscovered {
                device_id: device_id.to_string(),
            })
    }

    /// Characteristics of a service as registered for the device.
    ///
    /// Reads the registered metadata, so discovery is not required. The
    /// service UUID must match exactly.
    pub fn characteristics_for(
        &self,
        device_id: &str,
        service_uuid: &str,
    ) -> Result<Vec<CharacteristicMetadata>, BleError> {
        self.inner
            .gatt
            .lock()
            .metadata
            .get(device_id)
            .into_iter()
            .flatten()
            .find(|service| service.uuid() == service_uuid)
            .map(|service| service.characteristics().to_vec())
            .ok_or_else(|| BleError::ServiceNotFound {
                device_id: device_id.to_string(),
                service_uuid: service_uuid.to_string(),
            })
    }

    pub(super) fn forget_discovered_services(&self, device_id: &str) {
        self.inner.gatt.lock().discovered.remove(device_id);
    }

    /// Reads a characteristic of a connected device.
    ///
    /// The value is captured when the read starts; an armed read error is
    /// returned once the read delay has elapsed.
    #[instrument(skip(self, key), level = "debug", fields(%key))]
    pub async fn read(&self, key: &CharacteristicKey) -> Result<Characteristic, BleError> {
        self.ensure_connected(key.device_id())?;
        let profile = self.inner.characteristics.read_profile(key);
        let value = self.inner.characteristics.value(key);

        simulate_latency(profile.delay).await;
        if let Some(error) = profile.error {
            warn!(%error, "injected read error");
            return Err(error.into());
        }
        Ok(Characteristic::new(key, value))
    }

    /// Writes a characteristic and waits for the acknowledgement.
    pub async fn write_with_response(
        &self,
        key: &CharacteristicKey,
        value: impl Into<String>,
    ) -> Result<Characteristic, BleError> {
        self.write(key, value.into(), WriteMode::WithResponse).await
    }

    /// Writes a characteristic without acknowledgement.
    pub async fn write_without_response(
        &self,
        key: &CharacteristicKey,
        value: impl Into<String>,
    ) -> Result<Characteristic, BleError> {
        self.write(key, value.into(), WriteMode::WithoutResponse).await
    }

    #[instrument(skip(self, key, value, mode), level = "debug", fields(%key, %mode))]
    async fn write(
        &self,
        key: &CharacteristicKey,
        value: String,
        mode: WriteMode,
    ) -> Result<Characteristic, BleError> {
        self.ensure_connected(key.device_id())?;
        let profile = self.inner.characteristics.write_profile(key, mode);
        if let Some(error) = profile.error {
            simulate_latency(profile.delay).await;
            warn!(%error, "injected write error");
            return Err(error.into());
        }

        match self.spa_target(key) {
            Some(characteristic) => {
                let outcome = self.route_spa_write(key, characteristic, &value)?;
                debug!(?outcome, "spa write routed");
            }
            None => self.inner.characteristics.set_value(key, value.clone()),
        }
        if let Some(listener) = self.inner.characteristics.write_listener(key) {
            listener.deliver(value.clone());
        }

        simulate_latency(profile.delay).await;
        Ok(Characteristic::new(key, Some(value)))
    }

    /// Subscribes to value updates of a characteristic.
    ///
    /// A non-empty current value is delivered from a spawned task shortly
    /// after subscribing.
    pub fn monitor<F>(&self, key: &CharacteristicKey, listener: F) -> Result<Subscription, BleError>
    where
        F: Fn(MonitorEvent) + Send + Sync + 'static,
    {
        self.ensure_connected(key.device_id())?;
        let listener = Listener::new(listener);
        let id = self
            .inner
            .characteristics
            .add_monitor(key, Arc::clone(&listener));

        if let Some(value) = self
            .inner
            .characteristics
            .value(key)
            .filter(|value| !value.is_empty())
        {
            let current = Characteristic::new(key, Some(value));
            let pending = Arc::clone(&listener);
            tokio::spawn(async move { pending.deliver(Ok(current)) });
        }

        let weak = Arc::downgrade(&self.inner);
        let key = key.clone();
        Ok(Subscription::new(move || {
            listener.deactivate();
            if let Some(inner) = weak.upgrade() {
                inner.characteristics.remove_monitor(&key, id);
            }
        }))
    }

    /// Stores a value, optionally pushing it to monitors.
    pub fn set_value(&self, key: &CharacteristicKey, value: impl Into<String>, notify: bool) {
        let value = value.into();
        if notify {
            let monitors = self
                .inner
                .characteristics
                .set_value_for_notify(key, value.clone());
            self.fan_out(key, monitors, Characteristic::new(key, Some(value)));
        } else {
            self.inner.characteristics.set_value(key, value);
        }
    }

    /// Stores a value that later reads return, without notifying monitors.
    pub fn set_value_for_reading(&self, key: &CharacteristicKey, value: impl Into<String>) {
        self.set_value(key, value, false);
    }

    /// Re-sends the current value to monitors every `interval`.
    ///
    /// Uses the configured default interval when `interval` is `None`.
    /// Replaces any running notification timer for the key.
    pub fn start_notifications(&self, key: &CharacteristicKey, interval: Option<Duration>) {
        let interval =
            interval.unwrap_or_else(|| self.inner.config.default_notification_interval());
        let weak = Arc::downgrade(&self.inner);
        let timer_key = key.clone();
        let timer = spawn_interval("notifications", interval, move || {
            if let Some(inner) = weak.upgrade() {
                BleManager::from_inner(inner).notify_current_value(&timer_key);
            }
        });
        self.inner
            .characteristics
            .replace_notification_timer(key, timer);
        debug!(%key, ?interval, "notifications started");
    }

    pub fn stop_notifications(&self, key: &CharacteristicKey) {
        self.inner.characteristics.cancel_notification_timer(key);
    }

    /// Delivers `error` to every monitor of the characteristic.
    pub fn simulate_characteristic_error(&self, key: &CharacteristicKey, error: SimulatedError) {
        self.inner.characteristics.monitors(key).send(Err(error));
    }

    /// Observes writes to a characteristic. Replaces any previous observer.
    pub fn on_characteristic_write<F>(&self, key: &CharacteristicKey, listener: F) -> Subscription
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let listener = Listener::new(listener);
        self.inner
            .characteristics
            .set_write_listener(key, Arc::clone(&listener));
        let weak = Arc::downgrade(&self.inner);
        let key = key.clone();
        Subscription::new(move || {
            listener.deactivate();
            if let Some(inner) = weak.upgrade() {
                inner.characteristics.remove_write_listener(&key, &listener);
            }
        })
    }

    fn notify_current_value(&self, key: &CharacteristicKey) {
        if let Some((monitors, characteristic)) =
            self.inner.characteristics.current_value_fanout(key)
        {
            self.fan_out(key, monitors, characteristic);
        }
    }

    pub(super) fn fan_out(
        &self,
        key: &CharacteristicKey,
        monitors: Dispatch<MonitorEvent>,
        characteristic: Characteristic,
    ) {
        if monitors.is_empty() {
            return;
        }
        self.relay_notification(key, &characteristic);
        monitors.send(Ok(characteristic));
    }

    // Characteristic fault injection

    /// Delays every later read of the characteristic. A zero delay clears it.
    pub fn set_characteristic_read_delay(&self, key: &CharacteristicKey, delay: Duration) {
        self.inner.characteristics.set_read_delay(key, delay);
    }

    pub fn clear_characteristic_read_delay(&self, key: &CharacteristicKey) {
        self.set_characteristic_read_delay(key, Duration::ZERO);
    }

    /// Makes every later read of the characteristic fail with `error`.
    pub fn simulate_characteristic_read_error(&self, key: &CharacteristicKey, error: SimulatedError) {
        self.inner.characteristics.set_read_error(key, Some(error));
    }

    pub fn clear_characteristic_read_error(&self, key: &CharacteristicKey) {
        self.inner.characteristics.set_read_error(key, None);
    }

    /// Delays every later write of the given mode. A zero delay clears it.
    pub fn set_characteristic_write_delay(
        &self,
        key: &CharacteristicKey,
        mode: WriteMode,
        delay: Duration,
    ) {
        self.inner.characteristics.set_write_delay(key, mode, delay);
    }

    pub fn clear_characteristic_write_delay(&self, key: &CharacteristicKey, mode: WriteMode) {
        self.set_characteristic_write_delay(key, mode, Duration::ZERO);
    }

    /// Makes every later write of the given mode fail with `error`.
    pub fn simulate_characteristic_write_error(
        &self,
        key: &CharacteristicKey,
        mode: WriteMode,
        error: SimulatedError,
    ) {
        self.inner
            .characteristics
            .set_write_error(key, mode, Some(error));
    }

    pub fn clear_characteristic_write_error(&self, key: &CharacteristicKey, mode: WriteMode) {
        self.inner.characteristics.set_write_error(key, mode, None);
    }
}
