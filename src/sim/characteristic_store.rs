use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::listeners::{Dispatch, Listener, ListenerId, ListenerSet};
use super::model::{Characteristic, CharacteristicKey, MonitorEvent, WriteMode};
use super::timer::TimerHandle;
use crate::error::SimulatedError;

/// Latency and fault profile resolved for one operation.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub(crate) struct OperationProfile {
    pub(crate) delay: Duration,
    pub(crate) error: Option<SimulatedError>,
}

#[derive(Debug, Default)]
struct CharacteristicSlot {
    value: Option<String>,
    monitors: ListenerSet<MonitorEvent>,
    write_listener: Option<Arc<Listener<String>>>,
    read_delay: Duration,
    read_error: Option<SimulatedError>,
    write_with_response_delay: Duration,
    write_with_response_error: Option<SimulatedError>,
    write_without_response_delay: Duration,
    write_without_response_error: Option<SimulatedError>,
    notification_timer: Option<TimerHandle>,
}

impl CharacteristicSlot {
    fn write_overrides(&mut self, mode: WriteMode) -> (&mut Duration, &mut Option<SimulatedError>) {
        match mode {
            WriteMode::WithResponse => (
                &mut self.write_with_response_delay,
                &mut self.write_with_response_error,
            ),
            WriteMode::WithoutResponse => (
                &mut self.write_without_response_delay,
                &mut self.write_without_response_error,
            ),
        }
    }

    fn cancel_notifications(&mut self) {
        if let Some(timer) = self.notification_timer.take() {
            timer.cancel();
        }
    }
}

/// Per-characteristic values, listeners and injected faults.
#[derive(Debug, Default)]
pub(crate) struct CharacteristicStore {
    slots: Mutex<HashMap<CharacteristicKey, CharacteristicSlot>>,
}

impl CharacteristicStore {
    pub(crate) fn value(&self, key: &CharacteristicKey) -> Option<String> {
        self.slots
            .lock()
            .get(key)
            .and_then(|slot| slot.value.clone())
    }

    pub(crate) fn set_value(&self, key: &CharacteristicKey, value: String) {
        self.slots.lock().entry(key.clone()).or_default().value = Some(value);
    }

    /// Stores a value and returns the monitors that should observe it.
    pub(crate) fn set_value_for_notify(
        &self,
        key: &CharacteristicKey,
        value: String,
    ) -> Dispatch<MonitorEvent> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.clone()).or_default();
        slot.value = Some(value);
        slot.monitors.snapshot()
    }

    /// Returns the monitor fan-out for the current value.
    ///
    /// Empty when there is no value or no monitor.
    pub(crate) fn current_value_fanout(
        &self,
        key: &CharacteristicKey,
    ) -> Option<(Dispatch<MonitorEvent>, Characteristic)> {
        let slots = self.slots.lock();
        let slot = slots.get(key)?;
        let value = slot.value.clone().filter(|value| !value.is_empty())?;
        if slot.monitors.is_empty() {
            return None;
        }
        Some((
            slot.monitors.snapshot(),
            Characteristic::new(key, Some(value)),
        ))
    }

    pub(crate) fn monitors(&self, key: &CharacteristicKey) -> Dispatch<MonitorEvent> {
        self.slots
            .lock()
            .get(key)
            .map_or_else(Dispatch::empty, |slot| slot.monitors.snapshot())
    }

    pub(crate) fn add_monitor(
        &self,
        key: &CharacteristicKey,
        listener: Arc<Listener<MonitorEvent>>,
    ) -> ListenerId {
        self.slots
            .lock()
            .entry(key.clone())
            .or_default()
            .monitors
            .insert(listener)
    }

    pub(crate) fn monitor(
        &self,
        key: &CharacteristicKey,
        id: ListenerId,
    ) -> Option<Arc<Listener<MonitorEvent>>> {
        self.slots.lock().get(key)?.monitors.get(id)
    }

    /// Removes one monitor, cancelling the notification timer once none remain.
    pub(crate) fn remove_monitor(&self, key: &CharacteristicKey, id: ListenerId) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(key) else {
            return;
        };
        slot.monitors.remove(id);
        if slot.monitors.is_empty() {
            slot.cancel_notifications();
        }
    }

    pub(crate) fn monitor_count(&self, key: &CharacteristicKey) -> usize {
        self.slots
            .lock()
            .get(key)
            .map_or(0, |slot| slot.monitors.len())
    }

    /// Replaces the write observer for a key.
    pub(crate) fn set_write_listener(
        &self,
        key: &CharacteristicKey,
        listener: Arc<Listener<String>>,
    ) {
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.clone()).or_default();
        if let Some(previous) = slot.write_listener.replace(listener) {
            previous.retire();
        }
    }

    /// Removes the write observer if it is still the registered one.
    pub(crate) fn remove_write_listener(
        &self,
        key: &CharacteristicKey,
        listener: &Arc<Listener<String>>,
    ) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(key) else {
            return;
        };
        listener.retire();
        if slot
            .write_listener
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, listener))
        {
            slot.write_listener = None;
        }
    }

    pub(crate) fn write_listener(&self, key: &CharacteristicKey) -> Option<Arc<Listener<String>>> {
        self.slots.lock().get(key)?.write_listener.clone()
    }

    pub(crate) fn read_profile(&self, key: &CharacteristicKey) -> OperationProfile {
        self.slots
            .lock()
            .get(key)
            .map(|slot| OperationProfile {
                delay: slot.read_delay,
                error: slot.read_error.clone(),
            })
            .unwrap_or_default()
    }

    pub(crate) fn write_profile(&self, key: &CharacteristicKey, mode: WriteMode) -> OperationProfile {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(key) else {
            return OperationProfile::default();
        };
        let (delay, error) = slot.write_overrides(mode);
        OperationProfile {
            delay: *delay,
            error: error.clone(),
        }
    }

    pub(crate) fn set_read_delay(&self, key: &CharacteristicKey, delay: Duration) {
        self.slots.lock().entry(key.clone()).or_default().read_delay = delay;
    }

    pub(crate) fn set_read_error(&self, key: &CharacteristicKey, error: Option<SimulatedError>) {
        self.slots.lock().entry(key.clone()).or_default().read_error = error;
    }

    pub(crate) fn set_write_delay(&self, key: &CharacteristicKey, mode: WriteMode, delay: Duration) {
        let mut slots = self.slots.lock();
        let (slot_delay, _error) = slots.entry(key.clone()).or_default().write_overrides(mode);
        *slot_delay = delay;
    }

    pub(crate) fn set_write_error(
        &self,
        key: &CharacteristicKey,
        mode: WriteMode,
        error: Option<SimulatedError>,
    ) {
        let mut slots = self.slots.lock();
        let (_delay, slot_error) = slots.entry(key.clone()).or_default().write_overrides(mode);
        *slot_error = error;
    }

    /// Installs a notification timer, cancelling any previous one for the key.
    pub(crate) fn replace_notification_timer(&self, key: &CharacteristicKey, timer: TimerHandle) {
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.clone()).or_default();
        slot.cancel_notifications();
        slot.notification_timer = Some(timer);
    }

    pub(crate) fn cancel_notification_timer(&self, key: &CharacteristicKey) {
        if let Some(slot) = self.slots.lock().get_mut(key) {
            slot.cancel_notifications();
        }
    }

    pub(crate) fn has_notification_timer(&self, key: &CharacteristicKey) -> bool {
        self.slots
            .lock()
            .get(key)
            .is_some_and(|slot| slot.notification_timer.is_some())
    }
}
