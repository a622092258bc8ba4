use serde::Serialize;
use strum_macros::Display;

use super::device::WriteRejection;

/// Maximum length of the master code inside a credentials payload.
pub const CODE_LENGTH: usize = 16;
/// Maximum length of the password inside a credentials payload.
pub const MAX_PASSWORD_LENGTH: usize = 8;

/// Authentication mode reported through MMODE.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default, Display, Serialize)]
pub enum DeviceMode {
    /// No code defined.
    #[default]
    #[strum(to_string = "F")]
    #[serde(rename = "F")]
    Free,
    /// Code and password matched.
    #[strum(to_string = "M")]
    #[serde(rename = "M")]
    Master,
    /// Only the password matched.
    #[strum(to_string = "N")]
    #[serde(rename = "N")]
    NonMaster,
    /// Nothing matched.
    #[strum(to_string = "B")]
    #[serde(rename = "B")]
    Blocked,
}

impl DeviceMode {
    /// Returns whether the mode is one of `allowed`.
    pub(crate) fn is_any_of(self, allowed: &[Self]) -> bool {
        allowed.contains(&self)
    }
}

/// Command letter written by the phone to MMODE (or MCODE).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum ModeCommand {
    /// `S`: set code and password.
    #[strum(to_string = "S")]
    SetCode,
    /// `C`: clear the stored code.
    #[strum(to_string = "C")]
    ClearCode,
    /// `W`: report Wi-Fi connectivity.
    #[strum(to_string = "W")]
    WifiStatus,
    /// `Z`: start a Wi-Fi scan.
    #[strum(to_string = "Z")]
    WifiScan,
    /// `D`: force disconnect.
    #[strum(to_string = "D")]
    Disconnect,
}

impl ModeCommand {
    pub(crate) fn from_char(letter: char) -> Option<Self> {
        match letter {
            'S' => Some(Self::SetCode),
            'C' => Some(Self::ClearCode),
            'W' => Some(Self::WifiStatus),
            'Z' => Some(Self::WifiScan),
            'D' => Some(Self::Disconnect),
            _ => None,
        }
    }

    /// Splits a written value into its command and payload.
    pub(crate) fn split(value: &str) -> Option<(Self, &str)> {
        let mut chars = value.chars();
        let command = chars.next().and_then(Self::from_char)?;
        Some((command, chars.as_str()))
    }
}

/// Master code and password as stored by the device.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Credentials {
    code: String,
    password: String,
}

impl Credentials {
    /// Parses `<code><password>`: the first 16 characters are the code, the rest the password.
    pub fn parse(payload: &str) -> Result<Self, WriteRejection> {
        if payload.is_empty() {
            return Err(WriteRejection::MalformedCredentials);
        }
        let split = payload
            .char_indices()
            .nth(CODE_LENGTH)
            .map_or(payload.len(), |(index, _)| index);
        let (code, password) = payload.split_at(split);
        if password.chars().count() > MAX_PASSWORD_LENGTH {
            return Err(WriteRejection::MalformedCredentials);
        }
        Ok(Self {
            code: code.to_string(),
            password: password.to_string(),
        })
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Mode granted to an authentication attempt against these credentials.
    pub(crate) fn authenticate(&self, attempt: &Self) -> DeviceMode {
        if self == attempt {
            DeviceMode::Master
        } else if !self.password.is_empty() && self.password == attempt.password {
            DeviceMode::NonMaster
        } else {
            DeviceMode::Blocked
        }
    }
}
