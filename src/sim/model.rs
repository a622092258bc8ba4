use std::fmt;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::error::SimulatedError;

/// Default ATT MTU of a freshly registered device.
pub const DEFAULT_DEVICE_MTU: u16 = 23;

/// Adapter power state.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Hash, Default, Serialize, Deserialize, derive_more::Display,
)]
pub enum PowerState {
    #[display("Unknown")]
    Unknown,
    #[display("Resetting")]
    Resetting,
    #[display("Unsupported")]
    Unsupported,
    #[display("Unauthorized")]
    Unauthorized,
    #[display("PoweredOff")]
    PoweredOff,
    #[default]
    #[display("PoweredOn")]
    PoweredOn,
}

/// A simulated peripheral that can be discovered by scanning.
#[derive(Debug, Clone, Eq, PartialEq, Builder, Serialize, Deserialize)]
pub struct DiscoverableDevice {
    #[builder(into)]
    id: String,
    #[builder(into)]
    name: Option<String>,
    rssi: Option<i16>,
    #[builder(default = DEFAULT_DEVICE_MTU)]
    mtu: u16,
    #[builder(into)]
    manufacturer_data: Option<String>,
    #[builder(default)]
    service_uuids: Vec<String>,
    #[builder(default = true)]
    is_connectable: bool,
}

impl DiscoverableDevice {
    /// Returns the device identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the advertised name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the advertised signal strength, if any.
    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    /// Returns the current MTU.
    #[must_use]
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// Returns encoded manufacturer data, if any.
    #[must_use]
    pub fn manufacturer_data(&self) -> Option<&str> {
        self.manufacturer_data.as_deref()
    }

    /// Returns the advertised service UUIDs.
    #[must_use]
    pub fn service_uuids(&self) -> &[String] {
        &self.service_uuids
    }

    /// Returns whether the device accepts connections.
    #[must_use]
    pub fn is_connectable(&self) -> bool {
        self.is_connectable
    }

    /// Returns whether the device advertises any of `filter`.
    ///
    /// An empty filter matches every device.
    pub(crate) fn matches_filter(&self, filter: &[String]) -> bool {
        filter.is_empty()
            || self
                .service_uuids
                .iter()
                .any(|uuid| filter.iter().any(|wanted| wanted.eq_ignore_ascii_case(uuid)))
    }

    pub(crate) fn set_mtu(&mut self, mtu: u16) {
        self.mtu = mtu;
    }

    pub(crate) fn apply(&mut self, update: DeviceUpdate) {
        let DeviceUpdate {
            name,
            rssi,
            mtu,
            manufacturer_data,
            service_uuids,
            is_connectable,
        } = update;

        if let Some(name) = name {
            self.name = Some(name);
        }
        if let Some(rssi) = rssi {
            self.rssi = Some(rssi);
        }
        if let Some(mtu) = mtu {
            self.mtu = mtu;
        }
        if let Some(manufacturer_data) = manufacturer_data {
            self.manufacturer_data = Some(manufacturer_data);
        }
        if let Some(service_uuids) = service_uuids {
            self.service_uuids = service_uuids;
        }
        if let Some(is_connectable) = is_connectable {
            self.is_connectable = is_connectable;
        }
    }
}

/// Partial update applied to a registered device.
#[derive(Debug, Clone, Default, Eq, PartialEq, Builder)]
pub struct DeviceUpdate {
    #[builder(into)]
    name: Option<String>,
    rssi: Option<i16>,
    mtu: Option<u16>,
    #[builder(into)]
    manufacturer_data: Option<String>,
    service_uuids: Option<Vec<String>>,
    is_connectable: Option<bool>,
}

/// Options for a device scan.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ScanOptions {
    /// Reports every sighting instead of suppressing repeats.
    pub allow_duplicates: bool,
}

/// Options for a connection attempt.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ConnectOptions {
    /// Not used by the emulator; kept for call-shape compatibility.
    pub auto_connect: bool,
    /// MTU to negotiate during connection.
    pub request_mtu: Option<u16>,
}

/// Static description of one characteristic.
#[derive(Debug, Clone, Eq, PartialEq, Builder, Serialize, Deserialize)]
pub struct CharacteristicMetadata {
    #[builder(into)]
    uuid: String,
    #[builder(default)]
    is_readable: bool,
    #[builder(default)]
    is_writable_with_response: bool,
    #[builder(default)]
    is_writable_without_response: bool,
    #[builder(default)]
    is_notifiable: bool,
}

impl CharacteristicMetadata {
    /// Returns the characteristic UUID.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    #[must_use]
    pub fn is_readable(&self) -> bool {
        self.is_readable
    }

    #[must_use]
    pub fn is_writable_with_response(&self) -> bool {
        self.is_writable_with_response
    }

    #[must_use]
    pub fn is_writable_without_response(&self) -> bool {
        self.is_writable_without_response
    }

    #[must_use]
    pub fn is_notifiable(&self) -> bool {
        self.is_notifiable
    }
}

/// Static description of one service.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetadata {
    uuid: String,
    characteristics: Vec<CharacteristicMetadata>,
}

impl ServiceMetadata {
    /// Creates a service description.
    #[must_use]
    pub fn new(uuid: impl Into<String>, characteristics: Vec<CharacteristicMetadata>) -> Self {
        Self {
            uuid: uuid.into(),
            characteristics,
        }
    }

    /// Returns the service UUID.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Returns the characteristics of this service.
    #[must_use]
    pub fn characteristics(&self) -> &[CharacteristicMetadata] {
        &self.characteristics
    }

    pub(crate) fn characteristic(&self, uuid: &str) -> Option<&CharacteristicMetadata> {
        self.characteristics
            .iter()
            .find(|characteristic| characteristic.uuid.eq_ignore_ascii_case(uuid))
    }
}

/// A service reported by discovery.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Service {
    uuid: String,
    device_id: String,
}

impl Service {
    pub(crate) fn new(uuid: String, device_id: String) -> Self {
        Self { uuid, device_id }
    }

    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

/// Address of one characteristic on one device.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct CharacteristicKey {
    device_id: String,
    service_uuid: String,
    characteristic_uuid: String,
}

impl CharacteristicKey {
    /// Creates a key. UUIDs are compared case-insensitively.
    #[must_use]
    pub fn new(
        device_id: impl Into<String>,
        service_uuid: impl AsRef<str>,
        characteristic_uuid: impl AsRef<str>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            service_uuid: service_uuid.as_ref().to_ascii_lowercase(),
            characteristic_uuid: characteristic_uuid.as_ref().to_ascii_lowercase(),
        }
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    #[must_use]
    pub fn service_uuid(&self) -> &str {
        &self.service_uuid
    }

    #[must_use]
    pub fn characteristic_uuid(&self) -> &str {
        &self.characteristic_uuid
    }
}

impl fmt::Display for CharacteristicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}",
            self.device_id, self.service_uuid, self.characteristic_uuid
        )
    }
}

/// A characteristic value as seen by the client.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Characteristic {
    uuid: String,
    service_uuid: String,
    device_id: String,
    value: Option<String>,
    is_notifiable: bool,
    is_indicatable: bool,
}

impl Characteristic {
    pub(crate) fn new(key: &CharacteristicKey, value: Option<String>) -> Self {
        Self {
            uuid: key.characteristic_uuid.clone(),
            service_uuid: key.service_uuid.clone(),
            device_id: key.device_id.clone(),
            value,
            is_notifiable: true,
            is_indicatable: false,
        }
    }

    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    #[must_use]
    pub fn service_uuid(&self) -> &str {
        &self.service_uuid
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns the encoded value, if any.
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    #[must_use]
    pub fn is_notifiable(&self) -> bool {
        self.is_notifiable
    }

    #[must_use]
    pub fn is_indicatable(&self) -> bool {
        self.is_indicatable
    }
}

/// Event delivered to characteristic monitors.
pub type MonitorEvent = Result<Characteristic, SimulatedError>;

/// Event delivered to the active scan listener.
pub type ScanEvent = Result<DiscoverableDevice, SimulatedError>;

/// Connection lifecycle notification for one device.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ConnectionEvent {
    /// The device connected.
    Connected(DiscoverableDevice),
    /// The device disconnected, optionally with the error that caused it.
    Disconnected {
        device: DiscoverableDevice,
        error: Option<SimulatedError>,
    },
}

impl ConnectionEvent {
    /// Returns the device the event refers to.
    #[must_use]
    pub fn device(&self) -> &DiscoverableDevice {
        match self {
            Self::Connected(device) | Self::Disconnected { device, .. } => device,
        }
    }

    /// Returns the error carried by a disconnection, if any.
    #[must_use]
    pub fn error(&self) -> Option<&SimulatedError> {
        match self {
            Self::Connected(_) => None,
            Self::Disconnected { error, .. } => error.as_ref(),
        }
    }
}

/// Write acknowledgement mode.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, derive_more::Display)]
pub enum WriteMode {
    #[display("with_response")]
    WithResponse,
    #[display("without_response")]
    WithoutResponse,
}
