use thiserror::Error;

use crate::sim::PowerState;

/// A caller-armed fault delivered by the emulator.
///
/// Injected faults are plain values so the same error can be armed once and
/// delivered to every matching operation until it is cleared.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Error)]
#[error("{message}")]
pub struct SimulatedError {
    message: String,
}

impl SimulatedError {
    /// Creates an injected fault with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the fault message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn powered_off() -> Self {
        Self::new("Bluetooth powered off")
    }

    pub(crate) fn simulated_disconnection() -> Self {
        Self::new("Simulated disconnection")
    }

    pub(crate) fn simulated_scan_error() -> Self {
        Self::new("Simulated scan error")
    }

    pub(crate) fn disconnect_requested() -> Self {
        Self::new("Disconnect requested by device")
    }
}

/// Broad classification of emulator failures.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display)]
pub enum ErrorKind {
    /// The operation's preconditions were not met.
    #[display("precondition")]
    Precondition,
    /// A caller-armed fault was delivered.
    #[display("injected_fault")]
    InjectedFault,
    /// The addressed device is unknown.
    #[display("not_found")]
    NotFound,
}

/// Errors returned by the BLE emulator.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum BleError {
    #[error("bluetooth is not powered on (current state: {state})")]
    NotPoweredOn { state: PowerState },
    #[error("device `{device_id}` not found")]
    DeviceNotFound { device_id: String },
    #[error("device `{device_id}` is not connectable")]
    NotConnectable { device_id: String },
    #[error("device `{device_id}` is not connected")]
    NotConnected { device_id: String },
    #[error("scan already in progress")]
    ScanInProgress,
    #[error("services not discovered for device `{device_id}`")]
    ServicesNotDiscovered { device_id: String },
    #[error("service `{service_uuid}` not found on device `{device_id}`")]
    ServiceNotFound {
        device_id: String,
        service_uuid: String,
    },
    #[error("value written to `{characteristic_uuid}` is not valid base64 text")]
    InvalidValue { characteristic_uuid: String },
    #[error(transparent)]
    Injected(#[from] SimulatedError),
}

impl BleError {
    /// Classifies the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Injected(_) => ErrorKind::InjectedFault,
            Self::DeviceNotFound { .. } => ErrorKind::NotFound,
            Self::NotPoweredOn { .. }
            | Self::NotConnectable { .. }
            | Self::NotConnected { .. }
            | Self::ScanInProgress
            | Self::ServicesNotDiscovered { .. }
            | Self::ServiceNotFound { .. }
            | Self::InvalidValue { .. } => ErrorKind::Precondition,
        }
    }

    pub(crate) fn device_not_found(device_id: &str) -> Self {
        Self::DeviceNotFound {
            device_id: device_id.to_string(),
        }
    }

    pub(crate) fn not_connected(device_id: &str) -> Self {
        Self::NotConnected {
            device_id: device_id.to_string(),
        }
    }
}

/// Errors returned while decoding or dispatching relay messages.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay message is not valid JSON")]
    Json(#[from] serde_json::Error),
    #[error("relay message event `{event}` is not a command")]
    NotACommand { event: String },
    #[error("relay command for `{device}` is missing a value")]
    MissingValue { device: String },
    #[error("relay command for `{device}` is missing a characteristic")]
    MissingCharacteristic { device: String },
    #[error(transparent)]
    Ble(#[from] BleError),
}

/// Errors returned when validating runtime CLI options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("probability `{value}` must be between 0 and 1")]
    ProbabilityOutOfRange { value: f64 },
    #[error("at least one simulated device is required")]
    NoDevices,
    #[error("master code must be 1 to {max} characters, and exactly {max} with a password (got {length})")]
    CodeLength { length: usize, max: usize },
    #[error("password must be at most {max} characters")]
    PasswordTooLong { max: usize },
}

/// Errors returned while driving a scripted spa session.
#[derive(Debug, Error)]
pub(crate) enum SessionError {
    #[error("spa `{mac}` was not discovered within {timeout:?}")]
    NotDiscovered {
        mac: String,
        timeout: std::time::Duration,
    },
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
