use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::listeners::{Dispatch, Listener, ListenerId, ListenerSet};
use super::model::ConnectionEvent;
use crate::error::SimulatedError;

#[derive(Debug, Default)]
struct ConnectionState {
    connected: BTreeSet<String>,
    connection_delays: HashMap<String, Duration>,
    connection_errors: HashMap<String, SimulatedError>,
    disconnection_errors: HashMap<String, SimulatedError>,
    listeners: HashMap<String, ListenerSet<ConnectionEvent>>,
}

/// Connected-set bookkeeping and per-device connection fault injection.
#[derive(Debug, Default)]
pub(crate) struct ConnectionManager {
    state: Mutex<ConnectionState>,
}

impl ConnectionManager {
    pub(crate) fn is_connected(&self, device_id: &str) -> bool {
        self.state.lock().connected.contains(device_id)
    }

    /// Returns connected device ids in sorted order.
    pub(crate) fn connected_ids(&self) -> Vec<String> {
        self.state.lock().connected.iter().cloned().collect()
    }

    /// Marks a device connected. Returns `false` when it already was.
    pub(crate) fn mark_connected(&self, device_id: &str) -> bool {
        self.state.lock().connected.insert(device_id.to_string())
    }

    /// Marks a device disconnected. Returns `false` when it was not connected.
    pub(crate) fn mark_disconnected(&self, device_id: &str) -> bool {
        self.state.lock().connected.remove(device_id)
    }

    pub(crate) fn connection_delay(&self, device_id: &str) -> Duration {
        self.state
            .lock()
            .connection_delays
            .get(device_id)
            .copied()
            .unwrap_or_default()
    }

    pub(crate) fn set_connection_delay(&self, device_id: &str, delay: Duration) {
        let mut state = self.state.lock();
        if delay.is_zero() {
            state.connection_delays.remove(device_id);
        } else {
            state.connection_delays.insert(device_id.to_string(), delay);
        }
    }

    pub(crate) fn connection_error(&self, device_id: &str) -> Option<SimulatedError> {
        self.state.lock().connection_errors.get(device_id).cloned()
    }

    pub(crate) fn set_connection_error(&self, device_id: &str, error: Option<SimulatedError>) {
        let mut state = self.state.lock();
        match error {
            Some(error) => {
                state.connection_errors.insert(device_id.to_string(), error);
            }
            None => {
                state.connection_errors.remove(device_id);
            }
        }
    }

    pub(crate) fn disconnection_error(&self, device_id: &str) -> Option<SimulatedError> {
        self.state.lock().disconnection_errors.get(device_id).cloned()
    }

    pub(crate) fn set_disconnection_error(&self, device_id: &str, error: Option<SimulatedError>) {
        let mut state = self.state.lock();
        match error {
            Some(error) => {
                state.disconnection_errors.insert(device_id.to_string(), error);
            }
            None => {
                state.disconnection_errors.remove(device_id);
            }
        }
    }

    pub(crate) fn add_listener(
        &self,
        device_id: &str,
        listener: Arc<Listener<ConnectionEvent>>,
    ) -> ListenerId {
        self.state
            .lock()
            .listeners
            .entry(device_id.to_string())
            .or_default()
            .insert(listener)
    }

    /// Removes a listener, pruning the device's list once it is empty.
    pub(crate) fn remove_listener(&self, device_id: &str, id: ListenerId) {
        let mut state = self.state.lock();
        let Some(listeners) = state.listeners.get_mut(device_id) else {
            return;
        };
        listeners.remove(id);
        if listeners.is_empty() {
            state.listeners.remove(device_id);
        }
    }

    pub(crate) fn listeners(&self, device_id: &str) -> Dispatch<ConnectionEvent> {
        self.state
            .lock()
            .listeners
            .get(device_id)
            .map_or_else(Dispatch::empty, ListenerSet::snapshot)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn connected_set_tracks_membership() {
        let connections = ConnectionManager::default();

        assert!(connections.mark_connected("b"));
        assert!(connections.mark_connected("a"));
        assert!(!connections.mark_connected("a"));

        assert_eq!(vec!["a".to_string(), "b".to_string()], connections.connected_ids());
        assert!(connections.mark_disconnected("a"));
        assert!(!connections.mark_disconnected("a"));
        assert!(!connections.is_connected("a"));
    }

    #[test]
    fn overrides_are_independently_clearable() {
        let connections = ConnectionManager::default();
        connections.set_connection_delay("a", Duration::from_millis(300));
        connections.set_connection_error("a", Some(SimulatedError::new("refused")));
        connections.set_disconnection_error("a", Some(SimulatedError::new("lost")));

        connections.set_connection_error("a", None);

        assert_eq!(Duration::from_millis(300), connections.connection_delay("a"));
        assert_eq!(None, connections.connection_error("a"));
        assert_eq!(
            Some(SimulatedError::new("lost")),
            connections.disconnection_error("a")
        );
    }

    #[test]
    fn removing_last_listener_prunes_the_device_entry() {
        let connections = ConnectionManager::default();
        let id = connections.add_listener("a", Listener::new(|_event: ConnectionEvent| {}));

        connections.remove_listener("a", id);

        assert!(connections.listeners("a").is_empty());
        assert!(connections.state.lock().listeners.is_empty());
    }
}
