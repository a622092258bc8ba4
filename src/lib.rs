mod app;
mod cli;
mod error;
mod relay;
mod sim;
pub mod spa;
mod telemetry;
mod terminal;

pub use app::{run, run_with_clients, run_with_clients_and_log_level, run_with_log_level};
pub use cli::{Args, Command, LogLevel, OutputFormat, ScanArgs, SessionArgs};
pub use error::{BleError, ErrorKind, RelayError, SimulatedError};
pub use relay::{
    CommandTarget, RelayAction, RelayEvent, RelayMessage, RelayTarget, dispatch, parse_message,
};
pub use sim::{
    BleManager, Characteristic, CharacteristicKey, CharacteristicMetadata, ConnectOptions,
    ConnectionEvent, DEFAULT_DEVICE_MTU, DEFAULT_DUPLICATE_ADMISSION_PROBABILITY,
    DEFAULT_MAX_MTU, DEFAULT_NOTIFICATION_INTERVAL, DEFAULT_SCAN_ERROR_PROBABILITY,
    DEFAULT_SCAN_TICK_INTERVAL, DeviceUpdate, DiscoverableDevice, MonitorEvent, PowerState,
    Restoration, RestorationSnapshot, RestorationStore, ScanEvent, ScanOptions, Service,
    ServiceMetadata, SimulatorConfig, Subscription, WriteMode, decode_value, encode_value,
    spa_key,
};
pub use terminal::{SystemTerminalClient, TerminalClient};
