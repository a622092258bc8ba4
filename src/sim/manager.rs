use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use super::characteristic_store::CharacteristicStore;
use super::config::SimulatorConfig;
use super::connection::ConnectionManager;
use super::gatt::GattState;
use super::listeners::{Listener, ListenerSet, Subscription};
use super::model::{
    ConnectOptions, ConnectionEvent, DeviceUpdate, DiscoverableDevice, PowerState, ScanEvent,
    ScanOptions,
};
use super::restoration::RestorationSnapshot;
use super::scan::{ScanBehaviour, ScanEngine};
use super::timer::simulate_latency;
use crate::error::{BleError, SimulatedError};
use crate::relay::RelayMessage;
use crate::spa::SpaDevice;

const RELAY_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct MtuState {
    max_mtu: HashMap<String, u16>,
    listeners: HashMap<String, ListenerSet<u16>>,
}

pub(super) struct ManagerInner {
    pub(super) config: SimulatorConfig,
    power: Mutex<PowerState>,
    state_listeners: Mutex<ListenerSet<PowerState>>,
    pub(super) scan: ScanEngine,
    pub(super) connections: ConnectionManager,
    pub(super) characteristics: CharacteristicStore,
    pub(super) gatt: Mutex<GattState>,
    mtu: Mutex<MtuState>,
    pub(super) spa_devices: Mutex<HashMap<String, SpaDevice>>,
    pub(super) relay: broadcast::Sender<RelayMessage>,
    restored: Option<RestorationSnapshot>,
}

/// Emulated BLE central.
///
/// Clones share the same emulator. All state lives behind the handle, so
/// several managers can run side by side in one process.
#[derive(Clone)]
pub struct BleManager {
    pub(super) inner: Arc<ManagerInner>,
}

impl Default for BleManager {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

impl fmt::Debug for BleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BleManager")
            .field("state", &self.state())
            .field("connected", &self.inner.connections.connected_ids())
            .field("scanning", &self.inner.scan.is_scanning())
            .finish_non_exhaustive()
    }
}

impl BleManager {
    /// Creates a manager, restoring previously connected devices when a
    /// restoration snapshot exists for the configured identifier.
    #[must_use]
    pub fn new(config: SimulatorConfig) -> Self {
        let scan = ScanEngine::new(
            ScanBehaviour {
                tick_interval: config.scan_tick_interval(),
                duplicate_admission_probability: config.duplicate_admission_probability(),
                error_probability: config.scan_error_probability(),
            },
            config.rng_seed(),
        );
        let connections = ConnectionManager::default();
        let restored = config
            .restoration()
            .and_then(|restoration| restoration.store().get(restoration.identifier()));
        if let Some(snapshot) = &restored {
            for device in snapshot {
                scan.add_device(device.clone());
                connections.mark_connected(device.id());
            }
            info!(devices = snapshot.len(), "restored connected devices");
        }
        let (relay, _) = broadcast::channel(RELAY_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(ManagerInner {
                power: Mutex::new(config.initial_power_state()),
                config,
                state_listeners: Mutex::new(ListenerSet::default()),
                scan,
                connections,
                characteristics: CharacteristicStore::default(),
                gatt: Mutex::new(GattState::default()),
                mtu: Mutex::new(MtuState::default()),
                spa_devices: Mutex::new(HashMap::new()),
                relay,
                restored,
            }),
        }
    }

    pub(super) fn from_inner(inner: Arc<ManagerInner>) -> Self {
        Self { inner }
    }

    /// Devices restored from the configured snapshot at construction.
    #[must_use]
    pub fn restored_state(&self) -> Option<RestorationSnapshot> {
        self.inner.restored.clone()
    }

    // Power

    #[must_use]
    pub fn state(&self) -> PowerState {
        *self.inner.power.lock()
    }

    /// Changes the adapter power state.
    ///
    /// Leaving `PoweredOn` halts any scan. `PoweredOff` also disconnects every
    /// connected device with a "Bluetooth powered off" error.
    #[instrument(skip(self), level = "debug")]
    pub fn set_power_state(&self, state: PowerState) {
        let previous = std::mem::replace(&mut *self.inner.power.lock(), state);
        info!(%previous, %state, "power state changed");
        let listeners = self.inner.state_listeners.lock().snapshot();
        listeners.send(state);

        if state != PowerState::PoweredOn {
            self.stop_scan();
        }
        if state == PowerState::PoweredOff {
            for device_id in self.inner.connections.connected_ids() {
                self.simulate_disconnection(&device_id, Some(SimulatedError::powered_off()));
            }
        }
    }

    /// Observes power state changes.
    ///
    /// With `emit_current`, the current state is delivered from a spawned task
    /// rather than from inside this call. Must be called within a tokio runtime
    /// in that case.
    pub fn on_state_change<F>(&self, listener: F, emit_current: bool) -> Subscription
    where
        F: Fn(PowerState) + Send + Sync + 'static,
    {
        let listener = Listener::new(listener);
        let id = self
            .inner
            .state_listeners
            .lock()
            .insert(Arc::clone(&listener));

        if emit_current {
            let weak = Arc::downgrade(&self.inner);
            let pending = Arc::clone(&listener);
            tokio::spawn(async move {
                if let Some(inner) = weak.upgrade() {
                    let state = *inner.power.lock();
                    pending.deliver(state);
                }
            });
        }

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            listener.deactivate();
            if let Some(inner) = weak.upgrade() {
                inner.state_listeners.lock().remove(id);
            }
        })
    }

    pub(super) fn ensure_powered_on(&self) -> Result<(), BleError> {
        match self.state() {
            PowerState::PoweredOn => Ok(()),
            state => Err(BleError::NotPoweredOn { state }),
        }
    }

    // Registration

    /// Registers a discoverable device, replacing one with the same id.
    pub fn add_device(&self, device: DiscoverableDevice) {
        debug!(device_id = device.id(), "device added");
        self.inner.scan.add_device(device);
    }

    /// Unregisters a device and any spa device attached to it.
    pub fn remove_device(&self, device_id: &str) -> Result<DiscoverableDevice, BleError> {
        let removed = self
            .inner
            .scan
            .remove_device(device_id)
            .ok_or_else(|| BleError::device_not_found(device_id))?;
        self.inner.spa_devices.lock().remove(device_id);
        debug!(device_id, "device removed");
        Ok(removed)
    }

    /// Applies a partial update to a registered device.
    pub fn update_device(
        &self,
        device_id: &str,
        update: DeviceUpdate,
    ) -> Result<DiscoverableDevice, BleError> {
        self.inner.scan.update_device(device_id, update)
    }

    pub fn clear_devices(&self) {
        self.inner.scan.clear_devices();
        self.inner.spa_devices.lock().clear();
    }

    #[must_use]
    pub fn device(&self, device_id: &str) -> Option<DiscoverableDevice> {
        self.inner.scan.device(device_id)
    }

    #[must_use]
    pub fn devices(&self) -> Vec<DiscoverableDevice> {
        self.inner.scan.devices()
    }

    // Scanning

    /// Starts discovery.
    ///
    /// Every registered device advertising one of `service_uuids` (all of them
    /// for an empty filter) is reported before this returns. Afterwards each
    /// scan tick considers one device drawn from the whole catalog until
    /// [`Self::stop_scan`].
    #[instrument(skip(self, listener), level = "debug")]
    pub fn start_scan<F>(
        &self,
        service_uuids: Vec<String>,
        options: ScanOptions,
        listener: F,
    ) -> Result<(), BleError>
    where
        F: Fn(ScanEvent) + Send + Sync + 'static,
    {
        self.ensure_powered_on()?;
        self.inner
            .scan
            .start(service_uuids, options, Listener::new(listener))
    }

    /// Stops discovery. Safe to call when no scan is running.
    pub fn stop_scan(&self) {
        if self.inner.scan.stop() {
            info!("scan stopped");
        }
    }

    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.inner.scan.is_scanning()
    }

    // Connections

    /// Connects to a registered device.
    #[instrument(skip(self), level = "debug")]
    pub async fn connect(
        &self,
        device_id: &str,
        options: ConnectOptions,
    ) -> Result<DiscoverableDevice, BleError> {
        self.ensure_powered_on()?;
        let device = self
            .inner
            .scan
            .device(device_id)
            .ok_or_else(|| BleError::device_not_found(device_id))?;
        if !device.is_connectable() {
            return Err(BleError::NotConnectable {
                device_id: device_id.to_string(),
            });
        }
        if let Some(error) = self.inner.connections.connection_error(device_id) {
            warn!(device_id, %error, "injected connection error");
            return Err(error.into());
        }

        simulate_latency(self.inner.connections.connection_delay(device_id)).await;
        self.ensure_powered_on()?;

        let device = match options.request_mtu {
            Some(requested) => {
                let accepted = requested.min(self.max_mtu(device_id));
                self.inner
                    .scan
                    .with_device_mut(device_id, |known| {
                        known.set_mtu(accepted);
                        known.clone()
                    })
                    .unwrap_or(device)
            }
            None => device,
        };

        if self.inner.connections.mark_connected(device_id) {
            self.on_spa_link_change(device_id, true);
        }
        self.persist_restoration();
        info!(device_id, mtu = device.mtu(), "device connected");
        self.inner
            .connections
            .listeners(device_id)
            .send(ConnectionEvent::Connected(device.clone()));
        Ok(device)
    }

    /// Disconnects a connected device.
    ///
    /// Listeners receive the armed disconnection error, if any.
    #[instrument(skip(self), level = "debug")]
    pub async fn disconnect(&self, device_id: &str) -> Result<DiscoverableDevice, BleError> {
        if self.inner.scan.device(device_id).is_none() {
            return Err(BleError::device_not_found(device_id));
        }
        if !self.inner.connections.mark_disconnected(device_id) {
            return Err(BleError::not_connected(device_id));
        }
        let error = self.inner.connections.disconnection_error(device_id);
        Ok(self.finish_disconnection(device_id, error))
    }

    /// Drops the link from the device side. Does nothing when not connected.
    ///
    /// Without an explicit error, listeners receive "Simulated disconnection".
    #[instrument(skip(self), level = "debug")]
    pub fn simulate_disconnection(&self, device_id: &str, error: Option<SimulatedError>) {
        if !self.inner.connections.mark_disconnected(device_id) {
            debug!(device_id, "not connected; nothing to disconnect");
            return;
        }
        let error = error.unwrap_or_else(SimulatedError::simulated_disconnection);
        self.finish_disconnection(device_id, Some(error));
    }

    fn finish_disconnection(
        &self,
        device_id: &str,
        error: Option<SimulatedError>,
    ) -> DiscoverableDevice {
        self.forget_discovered_services(device_id);
        self.on_spa_link_change(device_id, false);
        self.persist_restoration();

        let device = self
            .inner
            .scan
            .device(device_id)
            .unwrap_or_else(|| DiscoverableDevice::builder().id(device_id).build());
        info!(
            device_id,
            error = error.as_ref().map(SimulatedError::message),
            "device disconnected"
        );
        self.inner
            .connections
            .listeners(device_id)
            .send(ConnectionEvent::Disconnected {
                device: device.clone(),
                error,
            });
        device
    }

    #[must_use]
    pub fn is_connected(&self, device_id: &str) -> bool {
        self.inner.connections.is_connected(device_id)
    }

    /// Ids of connected devices, sorted.
    #[must_use]
    pub fn connected_devices(&self) -> Vec<String> {
        self.inner.connections.connected_ids()
    }

    /// Observes connections and disconnections of one device.
    pub fn on_connection_event<F>(&self, device_id: &str, listener: F) -> Subscription
    where
        F: Fn(ConnectionEvent) + Send + Sync + 'static,
    {
        let listener = Listener::new(listener);
        let id = self
            .inner
            .connections
            .add_listener(device_id, Arc::clone(&listener));
        let weak = Arc::downgrade(&self.inner);
        let device_id = device_id.to_string();
        Subscription::new(move || {
            listener.deactivate();
            if let Some(inner) = weak.upgrade() {
                inner.connections.remove_listener(&device_id, id);
            }
        })
    }

    pub(super) fn ensure_connected(&self, device_id: &str) -> Result<(), BleError> {
        if self.inner.connections.is_connected(device_id) {
            Ok(())
        } else {
            Err(BleError::not_connected(device_id))
        }
    }

    // Connection fault injection

    /// Delays every later connection attempt. A zero delay clears it.
    pub fn set_connection_delay(&self, device_id: &str, delay: Duration) {
        self.inner
            .connections
            .set_connection_delay(device_id, delay);
    }

    pub fn clear_connection_delay(&self, device_id: &str) {
        self.set_connection_delay(device_id, Duration::ZERO);
    }

    /// Makes every later connection attempt fail with `error`.
    pub fn simulate_connection_error(&self, device_id: &str, error: SimulatedError) {
        self.inner
            .connections
            .set_connection_error(device_id, Some(error));
    }

    pub fn clear_connection_error(&self, device_id: &str) {
        self.inner.connections.set_connection_error(device_id, None);
    }

    /// Attaches `error` to every later disconnection through [`Self::disconnect`].
    pub fn simulate_disconnection_error(&self, device_id: &str, error: SimulatedError) {
        self.inner
            .connections
            .set_disconnection_error(device_id, Some(error));
    }

    pub fn clear_disconnection_error(&self, device_id: &str) {
        self.inner
            .connections
            .set_disconnection_error(device_id, None);
    }

    // MTU

    /// Sets the largest MTU the device accepts.
    pub fn set_device_max_mtu(&self, device_id: &str, max_mtu: u16) {
        self.inner
            .mtu
            .lock()
            .max_mtu
            .insert(device_id.to_string(), max_mtu);
    }

    fn max_mtu(&self, device_id: &str) -> u16 {
        self.inner
            .mtu
            .lock()
            .max_mtu
            .get(device_id)
            .copied()
            .unwrap_or_else(|| self.inner.config.default_max_mtu())
    }

    /// Negotiates the MTU of a connected device.
    ///
    /// Returns the accepted value, `min(mtu, device max)`, and reports it to
    /// the device's MTU listeners once.
    #[instrument(skip(self), level = "debug")]
    pub fn request_mtu(&self, device_id: &str, mtu: u16) -> Result<u16, BleError> {
        if self.inner.scan.device(device_id).is_none() {
            return Err(BleError::device_not_found(device_id));
        }
        self.ensure_connected(device_id)?;

        let accepted = mtu.min(self.max_mtu(device_id));
        self.inner
            .scan
            .with_device_mut(device_id, |device| device.set_mtu(accepted));
        debug!(device_id, requested = mtu, accepted, "mtu negotiated");

        let listeners = self
            .inner
            .mtu
            .lock()
            .listeners
            .get(device_id)
            .map(ListenerSet::snapshot);
        if let Some(listeners) = listeners {
            listeners.send(accepted);
        }
        Ok(accepted)
    }

    /// Observes MTU changes of one device.
    pub fn on_mtu_changed<F>(&self, device_id: &str, listener: F) -> Subscription
    where
        F: Fn(u16) + Send + Sync + 'static,
    {
        let listener = Listener::new(listener);
        let id = self
            .inner
            .mtu
            .lock()
            .listeners
            .entry(device_id.to_string())
            .or_default()
            .insert(Arc::clone(&listener));
        let weak = Arc::downgrade(&self.inner);
        let device_id = device_id.to_string();
        Subscription::new(move || {
            listener.deactivate();
            if let Some(inner) = weak.upgrade() {
                let mut mtu = inner.mtu.lock();
                if let Some(listeners) = mtu.listeners.get_mut(&device_id) {
                    listeners.remove(id);
                    if listeners.is_empty() {
                        mtu.listeners.remove(&device_id);
                    }
                }
            }
        })
    }

    // Restoration

    fn persist_restoration(&self) {
        let Some(restoration) = self.inner.config.restoration() else {
            return;
        };
        let snapshot: RestorationSnapshot = self
            .inner
            .connections
            .connected_ids()
            .iter()
            .filter_map(|device_id| self.inner.scan.device(device_id))
            .collect();
        debug!(
            identifier = restoration.identifier(),
            devices = snapshot.len(),
            "restoration snapshot updated"
        );
        restoration.store().set(restoration.identifier(), snapshot);
    }
}
