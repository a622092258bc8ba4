use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use super::listeners::Listener;
use super::model::{DeviceUpdate, DiscoverableDevice, ScanEvent, ScanOptions};
use super::timer::{TimerHandle, spawn_interval};
use crate::error::{BleError, SimulatedError};

/// Randomised behaviour of the discovery loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ScanBehaviour {
    pub(crate) tick_interval: Duration,
    pub(crate) duplicate_admission_probability: f64,
    pub(crate) error_probability: f64,
}

#[derive(Debug)]
struct ActiveScan {
    listener: Arc<Listener<ScanEvent>>,
    options: ScanOptions,
    timer: Option<TimerHandle>,
}

#[derive(Debug)]
struct ScanShared {
    behaviour: ScanBehaviour,
    // Lock order: `active`, then `catalog`, then `rng`.
    active: Mutex<Option<ActiveScan>>,
    catalog: Mutex<Vec<DiscoverableDevice>>,
    rng: Mutex<StdRng>,
}

/// Catalog of discoverable devices plus the periodic discovery loop.
#[derive(Debug)]
pub(crate) struct ScanEngine {
    shared: Arc<ScanShared>,
}

impl ScanEngine {
    pub(crate) fn new(behaviour: ScanBehaviour, seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self {
            shared: Arc::new(ScanShared {
                behaviour,
                active: Mutex::new(None),
                catalog: Mutex::new(Vec::new()),
                rng: Mutex::new(rng),
            }),
        }
    }

    /// Adds a device, replacing any registered device with the same id in place.
    pub(crate) fn add_device(&self, device: DiscoverableDevice) {
        let mut catalog = self.shared.catalog.lock();
        match catalog.iter_mut().find(|known| known.id() == device.id()) {
            Some(known) => *known = device,
            None => catalog.push(device),
        }
    }

    pub(crate) fn remove_device(&self, device_id: &str) -> Option<DiscoverableDevice> {
        let mut catalog = self.shared.catalog.lock();
        let index = catalog.iter().position(|known| known.id() == device_id)?;
        Some(catalog.remove(index))
    }

    pub(crate) fn clear_devices(&self) {
        self.shared.catalog.lock().clear();
    }

    pub(crate) fn update_device(
        &self,
        device_id: &str,
        update: DeviceUpdate,
    ) -> Result<DiscoverableDevice, BleError> {
        self.with_device_mut(device_id, |device| {
            device.apply(update);
            device.clone()
        })
        .ok_or_else(|| BleError::device_not_found(device_id))
    }

    pub(crate) fn device(&self, device_id: &str) -> Option<DiscoverableDevice> {
        self.shared
            .catalog
            .lock()
            .iter()
            .find(|known| known.id() == device_id)
            .cloned()
    }

    pub(crate) fn devices(&self) -> Vec<DiscoverableDevice> {
        self.shared.catalog.lock().clone()
    }

    pub(crate) fn with_device_mut<R>(
        &self,
        device_id: &str,
        mutate: impl FnOnce(&mut DiscoverableDevice) -> R,
    ) -> Option<R> {
        self.shared
            .catalog
            .lock()
            .iter_mut()
            .find(|known| known.id() == device_id)
            .map(mutate)
    }

    pub(crate) fn is_scanning(&self) -> bool {
        self.shared.active.lock().is_some()
    }

    /// Starts a scan: reports every matching device now, then one sighting per tick.
    ///
    /// The filter only applies to the initial burst. Ticks pick from every
    /// registered device.
    pub(crate) fn start(
        &self,
        filter: Vec<String>,
        options: ScanOptions,
        listener: Arc<Listener<ScanEvent>>,
    ) -> Result<(), BleError> {
        let initial = {
            let mut active = self.shared.active.lock();
            if active.is_some() {
                return Err(BleError::ScanInProgress);
            }
            let initial: Vec<DiscoverableDevice> = self
                .shared
                .catalog
                .lock()
                .iter()
                .filter(|device| device.matches_filter(&filter))
                .cloned()
                .collect();
            *active = Some(ActiveScan {
                listener: Arc::clone(&listener),
                options,
                timer: None,
            });
            initial
        };

        debug!(initial_devices = initial.len(), "scan started");
        for device in initial {
            listener.deliver(Ok(device));
        }

        let weak = Arc::downgrade(&self.shared);
        let mut active = self.shared.active.lock();
        if let Some(scan) = active
            .as_mut()
            .filter(|scan| Arc::ptr_eq(&scan.listener, &listener))
        {
            scan.timer = Some(spawn_interval(
                "scan",
                self.shared.behaviour.tick_interval,
                move || tick(&weak),
            ));
        }
        Ok(())
    }

    /// Stops the active scan. Returns `false` when no scan was running.
    pub(crate) fn stop(&self) -> bool {
        let stopped = self.shared.active.lock().take();
        match stopped {
            Some(scan) => {
                scan.listener.deactivate();
                if let Some(timer) = &scan.timer {
                    timer.cancel();
                }
                debug!("scan stopped");
                true
            }
            None => false,
        }
    }
}

fn tick(shared: &Weak<ScanShared>) {
    let Some(shared) = shared.upgrade() else {
        return;
    };

    let (listener, sighting, error) = {
        let mut active = shared.active.lock();
        let Some(scan) = active.as_mut() else {
            return;
        };
        let catalog = shared.catalog.lock();
        let mut rng = shared.rng.lock();

        let sighting = if catalog.is_empty() {
            None
        } else {
            let picked = &catalog[rng.gen_range(0..catalog.len())];
            let admitted = scan.options.allow_duplicates
                || rng.gen_bool(shared.behaviour.duplicate_admission_probability);
            admitted.then(|| picked.clone())
        };
        let error = rng
            .gen_bool(shared.behaviour.error_probability)
            .then(SimulatedError::simulated_scan_error);

        (Arc::clone(&scan.listener), sighting, error)
    };

    trace!(
        sighting = sighting.as_ref().map(DiscoverableDevice::id),
        error = error.is_some(),
        "scan tick"
    );
    if let Some(device) = sighting {
        listener.deliver(Ok(device));
    }
    if let Some(error) = error {
        listener.deliver(Err(error));
    }
}
