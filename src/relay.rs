//! Messages exchanged with an external relay (HTTP/WebSocket) layer.

use std::fmt::{self, Formatter};
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use strum_macros::Display;
use time::OffsetDateTime;
use tracing::{debug, instrument};

use crate::error::{BleError, RelayError};
use crate::sim::{BleManager, ConnectOptions, encode_value, spa_key};
use crate::spa::SpaCharacteristic;

const CONNECT_TARGET: &str = "CONNECT";
const DISCONNECT_TARGET: &str = "DISCONNECT";

/// Kind of relay message.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayEvent {
    /// A spa characteristic changed on the device.
    #[strum(to_string = "state_change")]
    StateChange,
    /// An inbound request from a client.
    #[strum(to_string = "command")]
    Command,
    /// A value was pushed to monitors.
    #[strum(to_string = "notification")]
    Notification,
}

/// The `characteristic` field of a relay message.
///
/// Commands use the pseudo characteristics `CONNECT` and `DISCONNECT` to
/// drive the connection; every other name is a spa characteristic.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, SerializeDisplay, DeserializeFromStr)]
pub enum RelayTarget {
    Connect,
    Disconnect,
    Characteristic(SpaCharacteristic),
}

impl RelayTarget {
    /// Returns the spa characteristic, if this target names one.
    #[must_use]
    pub fn characteristic(self) -> Option<SpaCharacteristic> {
        match self {
            Self::Characteristic(characteristic) => Some(characteristic),
            Self::Connect | Self::Disconnect => None,
        }
    }
}

impl From<SpaCharacteristic> for RelayTarget {
    fn from(characteristic: SpaCharacteristic) -> Self {
        Self::Characteristic(characteristic)
    }
}

impl fmt::Display for RelayTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => f.write_str(CONNECT_TARGET),
            Self::Disconnect => f.write_str(DISCONNECT_TARGET),
            Self::Characteristic(characteristic) => write!(f, "{characteristic}"),
        }
    }
}

impl FromStr for RelayTarget {
    type Err = strum::ParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.eq_ignore_ascii_case(CONNECT_TARGET) {
            Ok(Self::Connect)
        } else if raw.eq_ignore_ascii_case(DISCONNECT_TARGET) {
            Ok(Self::Disconnect)
        } else {
            raw.parse().map(Self::Characteristic)
        }
    }
}

/// One relay message as carried over the wire.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    event: RelayEvent,
    device: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    characteristic: Option<RelayTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    /// Milliseconds since the Unix epoch.
    timestamp: i64,
}

impl RelayMessage {
    pub(crate) fn state_change(
        device: &str,
        characteristic: SpaCharacteristic,
        value: &str,
    ) -> Self {
        Self::now(
            RelayEvent::StateChange,
            device,
            Some(characteristic.into()),
            Some(value.to_string()),
        )
    }

    pub(crate) fn notification(
        device: &str,
        characteristic: SpaCharacteristic,
        value: &str,
    ) -> Self {
        Self::now(
            RelayEvent::Notification,
            device,
            Some(characteristic.into()),
            Some(value.to_string()),
        )
    }

    /// Builds an inbound command.
    #[must_use]
    pub fn command(
        device: impl Into<String>,
        target: impl Into<RelayTarget>,
        value: impl Into<String>,
    ) -> Self {
        Self::now(
            RelayEvent::Command,
            device,
            Some(target.into()),
            Some(value.into()),
        )
    }

    fn now(
        event: RelayEvent,
        device: impl Into<String>,
        characteristic: Option<RelayTarget>,
        value: Option<String>,
    ) -> Self {
        Self {
            event,
            device: device.into(),
            characteristic,
            value,
            timestamp: unix_millis(OffsetDateTime::now_utc()),
        }
    }

    /// Replaces the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn event(&self) -> RelayEvent {
        self.event
    }

    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    #[must_use]
    pub fn target(&self) -> Option<RelayTarget> {
        self.characteristic
    }

    /// Returns the spa characteristic, skipping `CONNECT`/`DISCONNECT`.
    #[must_use]
    pub fn characteristic(&self) -> Option<SpaCharacteristic> {
        self.characteristic.and_then(RelayTarget::characteristic)
    }

    #[must_use]
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Serialises the message as JSON.
    pub fn to_json(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }
}

fn unix_millis(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

/// Parses one inbound relay message.
pub fn parse_message(raw: &str) -> Result<RelayMessage, RelayError> {
    Ok(serde_json::from_str(raw)?)
}

/// Calls made by the relay layer on the transport.
#[async_trait]
pub trait CommandTarget: Send + Sync {
    async fn connect_device(&self, device: &str) -> Result<(), BleError>;

    async fn disconnect_device(&self, device: &str) -> Result<(), BleError>;

    /// Writes a plain-text value to a spa characteristic.
    async fn write_characteristic(
        &self,
        device: &str,
        characteristic: SpaCharacteristic,
        value: &str,
    ) -> Result<(), BleError>;
}

#[async_trait]
impl CommandTarget for BleManager {
    async fn connect_device(&self, device: &str) -> Result<(), BleError> {
        self.connect(device, ConnectOptions::default()).await?;
        Ok(())
    }

    async fn disconnect_device(&self, device: &str) -> Result<(), BleError> {
        self.disconnect(device).await?;
        Ok(())
    }

    async fn write_characteristic(
        &self,
        device: &str,
        characteristic: SpaCharacteristic,
        value: &str,
    ) -> Result<(), BleError> {
        self.write_with_response(&spa_key(device, characteristic), encode_value(value))
            .await?;
        Ok(())
    }
}

/// What an inbound command did.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display)]
pub enum RelayAction {
    #[display("connected")]
    Connected,
    #[display("disconnected")]
    Disconnected,
    #[display("wrote {_0}")]
    Wrote(SpaCharacteristic),
}

/// Turns an inbound `command` message into a transport call.
///
/// Both `characteristic` and `value` must be present. `CONNECT` and
/// `DISCONNECT` ignore the value; any spa characteristic receives it as a
/// write.
#[instrument(skip(target), level = "debug", fields(device = message.device()))]
pub async fn dispatch(
    target: &dyn CommandTarget,
    message: &RelayMessage,
) -> Result<RelayAction, RelayError> {
    if message.event != RelayEvent::Command {
        return Err(RelayError::NotACommand {
            event: message.event.to_string(),
        });
    }
    let relay_target = message
        .characteristic
        .ok_or_else(|| RelayError::MissingCharacteristic {
            device: message.device.clone(),
        })?;
    let value = message.value().ok_or_else(|| RelayError::MissingValue {
        device: message.device.clone(),
    })?;

    let action = match relay_target {
        RelayTarget::Connect => {
            target.connect_device(&message.device).await?;
            RelayAction::Connected
        }
        RelayTarget::Disconnect => {
            target.disconnect_device(&message.device).await?;
            RelayAction::Disconnected
        }
        RelayTarget::Characteristic(characteristic) => {
            target
                .write_characteristic(&message.device, characteristic, value)
                .await?;
            RelayAction::Wrote(characteristic)
        }
    };
    debug!(%action, "relay command dispatched");
    Ok(action)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use insta::assert_snapshot;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[derive(Debug, Default)]
    struct RecordingTarget {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandTarget for RecordingTarget {
        async fn connect_device(&self, device: &str) -> Result<(), BleError> {
            self.calls.lock().push(format!("connect {device}"));
            Ok(())
        }

        async fn disconnect_device(&self, device: &str) -> Result<(), BleError> {
            self.calls.lock().push(format!("disconnect {device}"));
            Ok(())
        }

        async fn write_characteristic(
            &self,
            device: &str,
            characteristic: SpaCharacteristic,
            value: &str,
        ) -> Result<(), BleError> {
            self.calls
                .lock()
                .push(format!("write {device} {characteristic} {value}"));
            Ok(())
        }
    }

    #[test]
    fn state_change_serialises_with_snake_case_event() {
        let message = RelayMessage::state_change("spa-1", SpaCharacteristic::Temperature, "38")
            .with_timestamp(1_700_000_000_000);

        assert_snapshot!(
            message.to_json().expect("message should serialise"),
            @r#"{"event":"state_change","device":"spa-1","characteristic":"TEMPERATURE","value":"38","timestamp":1700000000000}"#
        );
    }

    #[rstest]
    #[case::connect("CONNECT", RelayTarget::Connect)]
    #[case::disconnect("DISCONNECT", RelayTarget::Disconnect)]
    #[case::lowercase("connect", RelayTarget::Connect)]
    #[case::characteristic("TEMPERATURE", RelayTarget::Characteristic(SpaCharacteristic::Temperature))]
    fn parse_accepts_connection_pseudo_characteristics(
        #[case] name: &str,
        #[case] expected: RelayTarget,
    ) {
        let message = parse_message(&format!(
            r#"{{"event":"command","device":"spa-1","characteristic":"{name}","value":"","timestamp":1}}"#
        ))
        .expect("message should parse");

        assert_eq!(RelayEvent::Command, message.event());
        assert_eq!(Some(expected), message.target());
        assert_eq!(Some(""), message.value());
    }

    #[test]
    fn connect_commands_serialise_their_pseudo_characteristic() {
        let message = RelayMessage::command("spa-1", RelayTarget::Connect, "").with_timestamp(5);

        assert_snapshot!(
            message.to_json().expect("message should serialise"),
            @r#"{"event":"command","device":"spa-1","characteristic":"CONNECT","value":"","timestamp":5}"#
        );
        assert_eq!(None, message.characteristic());
    }

    #[test]
    fn parse_rejects_unknown_characteristics() {
        let result = parse_message(
            r#"{"event":"command","device":"spa-1","characteristic":"COLOUR","value":"1","timestamp":1}"#,
        );

        assert_matches!(result, Err(RelayError::Json(_)));
    }

    #[rstest]
    #[case::connect(RelayMessage::command("spa-1", RelayTarget::Connect, ""), RelayAction::Connected, "connect spa-1")]
    #[case::disconnect(RelayMessage::command("spa-1", RelayTarget::Disconnect, ""), RelayAction::Disconnected, "disconnect spa-1")]
    #[case::write(
        RelayMessage::command("spa-1", SpaCharacteristic::Time, "12:00"),
        RelayAction::Wrote(SpaCharacteristic::Time),
        "write spa-1 TIME 12:00"
    )]
    #[tokio::test]
    async fn commands_map_onto_target_calls(
        #[case] message: RelayMessage,
        #[case] expected: RelayAction,
        #[case] call: &str,
    ) {
        let target = RecordingTarget::default();

        let action = dispatch(&target, &message)
            .await
            .expect("command should dispatch");

        assert_eq!(expected, action);
        assert_eq!(vec![call.to_string()], *target.calls.lock());
    }

    #[tokio::test]
    async fn non_commands_are_refused() {
        let target = RecordingTarget::default();
        let message = RelayMessage::notification("spa-1", SpaCharacteristic::Mmode, "M");

        let result = dispatch(&target, &message).await;

        assert_matches!(result, Err(RelayError::NotACommand { event }) if event == "notification");
        assert!(target.calls.lock().is_empty());
    }

    #[rstest]
    #[case::no_characteristic(
        r#"{"event":"command","device":"spa-1","value":"connect","timestamp":1}"#
    )]
    #[case::no_value(
        r#"{"event":"command","device":"spa-1","characteristic":"CONNECT","timestamp":1}"#
    )]
    #[tokio::test]
    async fn incomplete_commands_are_refused(#[case] raw: &str) {
        let target = RecordingTarget::default();
        let message = parse_message(raw).expect("message should parse");

        let result = dispatch(&target, &message).await;

        assert_matches!(
            result,
            Err(RelayError::MissingCharacteristic { .. } | RelayError::MissingValue { .. })
        );
        assert!(target.calls.lock().is_empty());
    }
}
