//! In-process emulation of a BLE central's view of simulated peripherals.

mod characteristic_store;
mod config;
mod connection;
mod gatt;
mod listeners;
mod manager;
mod model;
mod restoration;
mod scan;
mod spa_bridge;
mod timer;

pub use self::config::{
    DEFAULT_DUPLICATE_ADMISSION_PROBABILITY, DEFAULT_MAX_MTU, DEFAULT_NOTIFICATION_INTERVAL,
    DEFAULT_SCAN_ERROR_PROBABILITY, DEFAULT_SCAN_TICK_INTERVAL, Restoration, SimulatorConfig,
};
pub use self::listeners::Subscription;
pub use self::manager::BleManager;
pub use self::model::{
    Characteristic, CharacteristicKey, CharacteristicMetadata, ConnectOptions, ConnectionEvent,
    DEFAULT_DEVICE_MTU, DeviceUpdate, DiscoverableDevice, MonitorEvent, PowerState, ScanEvent,
    ScanOptions, Service, ServiceMetadata, WriteMode,
};
pub use self::restoration::{RestorationSnapshot, RestorationStore};
pub use self::spa_bridge::{decode_value, encode_value, spa_key};
