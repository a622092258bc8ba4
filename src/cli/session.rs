use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, instrument, trace, warn};

use crate::cli::{OutputFormat, write_json_line};
use crate::error::{CliConfigError, SessionError};
use crate::relay::RelayMessage;
use crate::sim::{
    BleManager, ConnectOptions, DEFAULT_DEVICE_MTU, DiscoverableDevice, ScanOptions, decode_value,
    encode_value, spa_key,
};
use crate::spa::{
    CODE_LENGTH, DeviceMode, MAX_PASSWORD_LENGTH, ModeCommand, SPA_SERVICE_UUID,
    SpaCharacteristic, SpaDevice, SpaDeviceConfig, frame_value,
};
use crate::terminal::TerminalClient;

use super::ui::{Painter, SessionReportView};

const DEFAULT_SESSION_MAC: &str = "AA:BB:CC:DD:EE:FF";
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
const RELAY_DRAIN_TIMEOUT: Duration = Duration::from_millis(20);

/// Arguments for the `session` command.
#[derive(Debug, Args)]
pub struct SessionArgs {
    /// MAC address of the simulated spa.
    #[arg(long, default_value = DEFAULT_SESSION_MAC)]
    mac: String,
    /// Master code to set. Must be exactly 16 characters when a password is given.
    #[arg(long)]
    code: String,
    /// Password stored alongside the master code.
    #[arg(long)]
    password: Option<String>,
    /// Target temperature written once paired.
    #[arg(long)]
    temperature: Option<String>,
    /// MTU to negotiate after connecting.
    #[arg(long, default_value_t = DEFAULT_DEVICE_MTU)]
    mtu: u16,
}

impl SessionArgs {
    /// Creates session arguments that pair with the default spa using `code`.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            mac: DEFAULT_SESSION_MAC.to_string(),
            code: code.into(),
            password: None,
            temperature: None,
            mtu: DEFAULT_DEVICE_MTU,
        }
    }

    #[must_use]
    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac = mac.into();
        self
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: impl Into<String>) -> Self {
        self.temperature = Some(temperature.into());
        self
    }

    #[must_use]
    pub fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu;
        self
    }

    /// The `S` command value that installs the code and password.
    fn set_code_value(&self) -> Result<String, CliConfigError> {
        let length = self.code.chars().count();
        let password = self.password.as_deref().unwrap_or_default();
        if length == 0 || length > CODE_LENGTH || (!password.is_empty() && length != CODE_LENGTH) {
            return Err(CliConfigError::CodeLength {
                length,
                max: CODE_LENGTH,
            });
        }
        if password.chars().count() > MAX_PASSWORD_LENGTH {
            return Err(CliConfigError::PasswordTooLong {
                max: MAX_PASSWORD_LENGTH,
            });
        }
        Ok(format!("{}{}{password}", ModeCommand::SetCode, self.code))
    }
}

/// Everything observed during one session.
#[derive(Debug, Serialize)]
pub(crate) struct SessionReport {
    pub(crate) device: DiscoverableDevice,
    pub(crate) mtu: u16,
    pub(crate) characteristics: usize,
    pub(crate) frames_written: usize,
    pub(crate) mode: DeviceMode,
    pub(crate) temperature: Option<String>,
    pub(crate) mode_notifications: Vec<String>,
    pub(crate) relay_events: Vec<RelayMessage>,
}

/// Executes the `session` command.
#[instrument(
    skip(manager, args, out, terminal_client),
    level = "info",
    fields(mac = %args.mac, mtu = args.mtu, ?output_format)
)]
pub(crate) async fn run<W>(
    manager: &BleManager,
    args: &SessionArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let set_code = args.set_code_value()?;
    manager.attach_spa_device(SpaDevice::new(
        SpaDeviceConfig::builder().mac(args.mac.as_str()).build(),
    ));
    let mut relay = manager.relay_events();

    let device = find_device(manager, &args.mac).await?;
    manager.connect(device.id(), ConnectOptions::default()).await?;

    let session_result = run_connected(manager, args, &set_code).await;
    if manager.is_connected(&args.mac) {
        if let Err(error) = manager.disconnect(&args.mac).await {
            if session_result.is_ok() {
                return Err(error.into());
            }
            trace!(%error, "failed to close session cleanly");
        }
    }
    let mut report = session_result?;
    report.relay_events = drain_relay(&mut relay).await;

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", SessionReportView::new(&report, &painter))?;
        }
        OutputFormat::Json => write_json_line(out, &report)?,
    }
    Ok(())
}

async fn find_device(manager: &BleManager, mac: &str) -> Result<DiscoverableDevice> {
    let (sender, mut receiver) = mpsc::unbounded_channel();
    manager.start_scan(
        vec![SPA_SERVICE_UUID.to_string()],
        ScanOptions::default(),
        move |event| {
            if sender.send(event).is_err() {
                trace!("scan output closed");
            }
        },
    )?;

    let found = timeout(DISCOVERY_TIMEOUT, async {
        while let Some(event) = receiver.recv().await {
            match event {
                Ok(device) if device.id() == mac => return Some(device),
                Ok(other) => trace!(device_id = other.id(), "skipping other spa"),
                Err(error) => debug!(%error, "scan error while looking for spa"),
            }
        }
        None
    })
    .await;
    manager.stop_scan();

    match found {
        Ok(Some(device)) => Ok(device),
        Ok(None) | Err(_) => Err(SessionError::NotDiscovered {
            mac: mac.to_string(),
            timeout: DISCOVERY_TIMEOUT,
        }
        .into()),
    }
}

async fn run_connected(
    manager: &BleManager,
    args: &SessionArgs,
    set_code: &str,
) -> Result<SessionReport> {
    let mac = args.mac.as_str();
    let mtu = manager.request_mtu(mac, args.mtu)?;
    let device = manager.discover_services(mac)?;
    let characteristics = manager.characteristics_for(mac, SPA_SERVICE_UUID)?.len();

    let mode_notifications = Arc::new(Mutex::new(Vec::new()));
    let subscription = {
        let mode_notifications = Arc::clone(&mode_notifications);
        manager.monitor(&spa_key(mac, SpaCharacteristic::Mmode), move |event| {
            match event {
                Ok(characteristic) => {
                    if let Some(mode) = characteristic.value().and_then(decode_value) {
                        mode_notifications.lock().push(mode);
                    }
                }
                Err(error) => warn!(%error, "mode monitor failed"),
            }
        })?
    };
    // Let the monitor receive the current mode before anything changes it.
    tokio::task::yield_now().await;

    let mut frames_written =
        write_framed(manager, mac, SpaCharacteristic::Mmode, set_code, mtu).await?;
    let temperature = match &args.temperature {
        Some(temperature) => {
            frames_written +=
                write_framed(manager, mac, SpaCharacteristic::Temperature, temperature, mtu)
                    .await?;
            let read = manager
                .read(&spa_key(mac, SpaCharacteristic::Temperature))
                .await?;
            read.value().and_then(decode_value)
        }
        None => None,
    };
    let mode = manager
        .spa_device_state(mac)
        .map(|state| state.mode())
        .unwrap_or_default();
    subscription.remove();

    let mode_notifications = mode_notifications.lock().clone();
    Ok(SessionReport {
        device,
        mtu,
        characteristics,
        frames_written,
        mode,
        temperature,
        mode_notifications,
        relay_events: Vec::new(),
    })
}

/// Writes `value` framed for `mtu`. Returns the number of frames sent.
async fn write_framed(
    manager: &BleManager,
    mac: &str,
    characteristic: SpaCharacteristic,
    value: &str,
    mtu: u16,
) -> Result<usize> {
    let key = spa_key(mac, characteristic);
    let frames = frame_value(value, mtu);
    for frame in &frames {
        manager.write_with_response(&key, encode_value(frame)).await?;
    }
    debug!(%characteristic, frames = frames.len(), "value written");
    Ok(frames.len())
}

async fn drain_relay(relay: &mut BroadcastStream<RelayMessage>) -> Vec<RelayMessage> {
    let mut events = Vec::new();
    while let Ok(Some(item)) = timeout(RELAY_DRAIN_TIMEOUT, relay.next()).await {
        match item {
            Ok(message) => events.push(message),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "relay events dropped");
            }
        }
    }
    events
}
