use std::collections::BTreeMap;

use bon::Builder;
use serde::Serialize;
use strum::IntoEnumIterator;
use strum_macros::Display;
use thiserror::Error;
use tracing::{debug, info, instrument};

use super::characteristic::SpaCharacteristic;
use super::mode::{Credentials, DeviceMode, ModeCommand};
use super::reassembly::{ChunkFlag, PartialWrite};

/// Default advertising area of a spa device.
pub const DEFAULT_AREA: &str = "default";
/// Default advertised RSSI of a spa device.
pub const DEFAULT_RSSI: i16 = -70;
/// Firmware version document reported through VERSION.
pub const DEFAULT_VERSION: &str = r#"{"v":"1.0.0"}"#;

/// Link state of the device as seen by its firmware.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    #[default]
    #[strum(to_string = "advertising")]
    Advertising,
    #[strum(to_string = "connected")]
    Connected,
    /// Reserved for state snapshots from other sources. No transition here
    /// produces it: disconnecting returns the device to `Advertising`.
    #[strum(to_string = "disconnected")]
    Disconnected,
}

/// Last operation the device carried out.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationalPhase {
    #[default]
    #[strum(to_string = "idle")]
    Idle,
    #[strum(to_string = "temperature_set")]
    TemperatureSet,
    #[strum(to_string = "time_set")]
    TimeSet,
    #[strum(to_string = "session_set")]
    SessionSet,
    #[strum(to_string = "wifi_config")]
    WifiConfig,
}

/// Why a complete write was refused.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
pub enum WriteRejection {
    #[error("characteristic `{0}` is read-only")]
    ReadOnly(SpaCharacteristic),
    #[error("command `{0}` requires master mode")]
    RequiresMaster(ModeCommand),
    #[error("mode `{mode}` may not write `{characteristic}`")]
    NotPermitted {
        characteristic: SpaCharacteristic,
        mode: DeviceMode,
    },
    #[error("master code does not match")]
    CodeMismatch,
    #[error("credentials are malformed")]
    MalformedCredentials,
    #[error("value is not a mode command")]
    UnknownCommand,
    #[error("temperature must be numeric")]
    InvalidTemperature,
}

/// Result of one write handed to the device.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WriteOutcome {
    /// A chunk was accepted and the value is not complete yet.
    Buffered,
    /// The complete value was applied to the characteristic.
    Applied(SpaCharacteristic),
    /// The complete value was refused; no state changed.
    Rejected(WriteRejection),
    /// The device asked the link to be dropped.
    Disconnect,
}

/// Application state of one spa controller.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct DeviceProtocolState {
    mode: DeviceMode,
    connection_phase: ConnectionPhase,
    operational_phase: OperationalPhase,
    characteristics: BTreeMap<SpaCharacteristic, String>,
    #[serde(skip)]
    credentials: Option<Credentials>,
    partial_write: PartialWrite,
}

impl DeviceProtocolState {
    #[must_use]
    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    #[must_use]
    pub fn connection_phase(&self) -> ConnectionPhase {
        self.connection_phase
    }

    #[must_use]
    pub fn operational_phase(&self) -> OperationalPhase {
        self.operational_phase
    }

    /// Current value of every characteristic.
    #[must_use]
    pub fn characteristics(&self) -> &BTreeMap<SpaCharacteristic, String> {
        &self.characteristics
    }

    /// Current value of one characteristic.
    #[must_use]
    pub fn value(&self, characteristic: SpaCharacteristic) -> &str {
        self.characteristics
            .get(&characteristic)
            .map_or("", String::as_str)
    }

    #[must_use]
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    #[must_use]
    pub fn partial_write(&self) -> &PartialWrite {
        &self.partial_write
    }
}

/// Construction parameters of a spa device.
#[derive(Debug, Clone, Builder)]
pub struct SpaDeviceConfig {
    #[builder(into)]
    mac: String,
    #[builder(into, default = DEFAULT_AREA.to_string())]
    area: String,
    #[builder(default = DEFAULT_RSSI)]
    rssi: i16,
    #[builder(into)]
    name: Option<String>,
    #[builder(into, default = "20".to_string())]
    temperature: String,
}

/// A simulated spa controller.
#[derive(Debug, Clone)]
pub struct SpaDevice {
    mac: String,
    area: String,
    rssi: i16,
    state: DeviceProtocolState,
}

impl SpaDevice {
    /// Creates an advertising device in Free mode.
    #[must_use]
    pub fn new(config: SpaDeviceConfig) -> Self {
        let name = config
            .name
            .unwrap_or_else(|| default_name(&config.mac));
        let characteristics = SpaCharacteristic::iter()
            .map(|characteristic| {
                let value = match characteristic {
                    SpaCharacteristic::Mmode => DeviceMode::Free.to_string(),
                    SpaCharacteristic::Mcode => String::new(),
                    SpaCharacteristic::BtName => name.clone(),
                    SpaCharacteristic::Temperature => config.temperature.clone(),
                    SpaCharacteristic::Time => "00:00".to_string(),
                    SpaCharacteristic::Session => "0".to_string(),
                    SpaCharacteristic::WifiCreds => String::new(),
                    SpaCharacteristic::Version => DEFAULT_VERSION.to_string(),
                    SpaCharacteristic::WifiMac => config.mac.replace(':', ""),
                };
                (characteristic, value)
            })
            .collect();

        Self {
            mac: config.mac,
            area: config.area,
            rssi: config.rssi,
            state: DeviceProtocolState {
                mode: DeviceMode::Free,
                connection_phase: ConnectionPhase::Advertising,
                operational_phase: OperationalPhase::Idle,
                characteristics,
                credentials: None,
                partial_write: PartialWrite::default(),
            },
        }
    }

    /// Creates a device with default settings.
    #[must_use]
    pub fn with_mac(mac: impl Into<String>) -> Self {
        Self::new(SpaDeviceConfig::builder().mac(mac).build())
    }

    #[must_use]
    pub fn mac(&self) -> &str {
        &self.mac
    }

    #[must_use]
    pub fn area(&self) -> &str {
        &self.area
    }

    #[must_use]
    pub fn rssi(&self) -> i16 {
        self.rssi
    }

    #[must_use]
    pub fn state(&self) -> &DeviceProtocolState {
        &self.state
    }

    /// Moves from advertising to connected, resetting authentication.
    ///
    /// Does nothing unless the device is advertising.
    pub fn connect(&mut self) {
        if self.state.connection_phase != ConnectionPhase::Advertising {
            debug!(mac = %self.mac, phase = %self.state.connection_phase, "connect ignored");
            return;
        }
        self.state.connection_phase = ConnectionPhase::Connected;
        self.state.credentials = None;
        self.state
            .characteristics
            .insert(SpaCharacteristic::Mcode, String::new());
        self.set_mode(DeviceMode::Free);
        self.state.partial_write.reset();
        info!(mac = %self.mac, "spa device connected");
    }

    /// Returns to advertising and Free mode.
    pub fn disconnect(&mut self) {
        self.state.connection_phase = ConnectionPhase::Advertising;
        self.set_mode(DeviceMode::Free);
        self.state.partial_write.reset();
        info!(mac = %self.mac, "spa device disconnected");
    }

    /// Handles one write from the phone: a chunk, or a complete value.
    #[instrument(skip(self), level = "debug", fields(mac = %self.mac))]
    pub fn handle_write(&mut self, characteristic: SpaCharacteristic, value: &str) -> WriteOutcome {
        if let Some(outcome) = self.reassemble(characteristic, value) {
            return outcome;
        }
        let outcome = self
            .apply(characteristic, value)
            .unwrap_or_else(WriteOutcome::Rejected);
        debug!(?outcome, "write handled");
        outcome
    }

    /// Offers a value to the chunk reassembler. Returns whether it was consumed.
    pub fn handle_partial_write(&mut self, characteristic: SpaCharacteristic, value: &str) -> bool {
        self.reassemble(characteristic, value).is_some()
    }

    // Frames that are not accepted here fall through as literal writes,
    // flag character included.
    fn reassemble(&mut self, characteristic: SpaCharacteristic, value: &str) -> Option<WriteOutcome> {
        let mut chars = value.chars();
        let flag = chars.next().and_then(ChunkFlag::from_char)?;
        let payload = chars.as_str();
        let pending = self.state.partial_write.characteristic();

        match flag {
            ChunkFlag::Start if pending.is_none() => {
                self.state.partial_write.begin(characteristic, payload);
                Some(WriteOutcome::Buffered)
            }
            ChunkFlag::Continue if pending == Some(characteristic) => {
                self.state.partial_write.append(payload);
                Some(WriteOutcome::Buffered)
            }
            ChunkFlag::End if pending == Some(characteristic) => {
                let full = self.state.partial_write.assembled(payload);
                debug!(%characteristic, len = full.len(), "chunked write complete");
                let outcome = self.handle_write(characteristic, &full);
                self.state.partial_write.reset();
                Some(outcome)
            }
            _ => None,
        }
    }

    fn apply(
        &mut self,
        characteristic: SpaCharacteristic,
        value: &str,
    ) -> Result<WriteOutcome, WriteRejection> {
        use DeviceMode::{Free, Master, NonMaster};

        match characteristic {
            SpaCharacteristic::Mmode => self.apply_command(characteristic, value),
            SpaCharacteristic::Mcode => match ModeCommand::split(value) {
                Some(_) => self.apply_command(characteristic, value),
                None => self.authenticate(value),
            },
            SpaCharacteristic::Temperature => {
                self.ensure_mode(characteristic, &[Free, Master, NonMaster])?;
                value
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|temperature| temperature.is_finite())
                    .ok_or(WriteRejection::InvalidTemperature)?;
                Ok(self.store(characteristic, value, OperationalPhase::TemperatureSet))
            }
            SpaCharacteristic::Time => {
                self.ensure_mode(characteristic, &[Free, Master, NonMaster])?;
                Ok(self.store(characteristic, value, OperationalPhase::TimeSet))
            }
            SpaCharacteristic::Session => {
                self.ensure_mode(characteristic, &[Free, Master, NonMaster])?;
                Ok(self.store(characteristic, value, OperationalPhase::SessionSet))
            }
            SpaCharacteristic::WifiCreds => {
                self.ensure_mode(characteristic, &[Free, Master])?;
                Ok(self.store(characteristic, value, OperationalPhase::WifiConfig))
            }
            SpaCharacteristic::BtName => {
                self.ensure_mode(characteristic, &[Free, Master])?;
                let phase = self.state.operational_phase;
                Ok(self.store(characteristic, value, phase))
            }
            SpaCharacteristic::Version | SpaCharacteristic::WifiMac => {
                Err(WriteRejection::ReadOnly(characteristic))
            }
        }
    }

    fn apply_command(
        &mut self,
        characteristic: SpaCharacteristic,
        value: &str,
    ) -> Result<WriteOutcome, WriteRejection> {
        let (command, payload) = ModeCommand::split(value).ok_or(WriteRejection::UnknownCommand)?;
        let in_master = self.state.mode == DeviceMode::Master;
        match command {
            ModeCommand::SetCode => {
                let credentials = Credentials::parse(payload)?;
                let code_matches = self
                    .state
                    .credentials
                    .as_ref()
                    .is_some_and(|stored| stored.code() == credentials.code());
                if self.state.mode != DeviceMode::Free && !code_matches {
                    return Err(WriteRejection::CodeMismatch);
                }
                self.state.credentials = Some(credentials);
                self.set_mode(DeviceMode::Master);
            }
            ModeCommand::ClearCode => {
                if !in_master {
                    return Err(WriteRejection::RequiresMaster(command));
                }
                self.state.credentials = None;
                self.set_mode(DeviceMode::Free);
            }
            ModeCommand::WifiStatus => {
                if !in_master {
                    return Err(WriteRejection::RequiresMaster(command));
                }
                debug!(mac = %self.mac, "wifi status requested");
            }
            ModeCommand::WifiScan => {
                if !in_master {
                    return Err(WriteRejection::RequiresMaster(command));
                }
                self.state.operational_phase = OperationalPhase::WifiConfig;
            }
            ModeCommand::Disconnect => {
                self.disconnect();
                return Ok(WriteOutcome::Disconnect);
            }
        }
        Ok(WriteOutcome::Applied(characteristic))
    }

    fn authenticate(&mut self, value: &str) -> Result<WriteOutcome, WriteRejection> {
        let attempt = Credentials::parse(value)?;
        let mode = self
            .state
            .credentials
            .as_ref()
            .map_or(DeviceMode::Free, |stored| stored.authenticate(&attempt));
        self.set_mode(mode);
        Ok(WriteOutcome::Applied(SpaCharacteristic::Mcode))
    }

    fn ensure_mode(
        &self,
        characteristic: SpaCharacteristic,
        allowed: &[DeviceMode],
    ) -> Result<(), WriteRejection> {
        if self.state.mode.is_any_of(allowed) {
            Ok(())
        } else {
            Err(WriteRejection::NotPermitted {
                characteristic,
                mode: self.state.mode,
            })
        }
    }

    fn store(
        &mut self,
        characteristic: SpaCharacteristic,
        value: &str,
        phase: OperationalPhase,
    ) -> WriteOutcome {
        self.state
            .characteristics
            .insert(characteristic, value.to_string());
        self.state.operational_phase = phase;
        WriteOutcome::Applied(characteristic)
    }

    fn set_mode(&mut self, mode: DeviceMode) {
        self.state.mode = mode;
        self.state
            .characteristics
            .insert(SpaCharacteristic::Mmode, mode.to_string());
    }
}

fn default_name(mac: &str) -> String {
    let suffix = mac.get(9..).unwrap_or(mac);
    format!("Spa_{suffix}")
}
