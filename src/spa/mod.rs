//! Application protocol of a spa controller.

mod characteristic;
mod device;
mod mode;
mod reassembly;

pub use self::characteristic::{SPA_SERVICE_UUID, SpaCharacteristic, spa_service_metadata};
pub use self::device::{
    ConnectionPhase, DEFAULT_AREA, DEFAULT_RSSI, DEFAULT_VERSION, DeviceProtocolState,
    OperationalPhase, SpaDevice, SpaDeviceConfig, WriteOutcome, WriteRejection,
};
pub use self::mode::{CODE_LENGTH, Credentials, DeviceMode, MAX_PASSWORD_LENGTH, ModeCommand};
pub use self::reassembly::{ChunkFlag, PartialWrite, frame_value};
