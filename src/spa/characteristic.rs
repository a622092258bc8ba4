use std::collections::HashMap;
use std::sync::LazyLock;

use serde_with::{DeserializeFromStr, SerializeDisplay};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::sim::{CharacteristicMetadata, ServiceMetadata};

/// Spa operation service UUID.
pub const SPA_SERVICE_UUID: &str = "c5a092a5-2202-4ac6-8734-2e8ff796094d";

/// Characteristics exposed by a spa controller.
#[derive(
    Debug,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Hash,
    Ord,
    PartialOrd,
    EnumIter,
    Display,
    EnumString,
    SerializeDisplay,
    DeserializeFromStr,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum SpaCharacteristic {
    /// Mode letter and mode commands.
    Mmode,
    /// Master code and authentication attempts.
    Mcode,
    /// Advertised Bluetooth name.
    BtName,
    Temperature,
    Time,
    Session,
    WifiCreds,
    /// Firmware version document.
    Version,
    /// Wi-Fi MAC without separators.
    WifiMac,
}

/// Whether clients may write a characteristic.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub(crate) enum Access {
    #[strum(to_string = "read_only")]
    ReadOnly,
    #[strum(to_string = "read_write")]
    ReadWrite,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct SpaCharacteristicMetadata {
    uuid: &'static str,
    access: Access,
}

impl SpaCharacteristicMetadata {
    pub(crate) fn uuid(self) -> &'static str {
        self.uuid
    }

    pub(crate) fn access(self) -> Access {
        self.access
    }
}

static CHARACTERISTICS_BY_UUID: LazyLock<HashMap<&'static str, SpaCharacteristic>> =
    LazyLock::new(|| {
        SpaCharacteristic::iter()
            .map(|characteristic| (metadata_for(characteristic).uuid, characteristic))
            .collect()
    });

impl SpaCharacteristic {
    /// Returns the characteristic UUID.
    #[must_use]
    pub fn uuid(self) -> &'static str {
        metadata_for(self).uuid()
    }

    /// Returns whether clients may write this characteristic.
    #[must_use]
    pub fn is_writable(self) -> bool {
        metadata_for(self).access() == Access::ReadWrite
    }

    /// Looks a characteristic up by UUID, ignoring case.
    #[must_use]
    pub fn from_uuid(uuid: &str) -> Option<Self> {
        CHARACTERISTICS_BY_UUID
            .get(uuid.to_ascii_lowercase().as_str())
            .copied()
    }
}

/// GATT metadata of the spa operation service.
#[must_use]
pub fn spa_service_metadata() -> ServiceMetadata {
    let characteristics = SpaCharacteristic::iter()
        .map(|characteristic| {
            let writable = characteristic.is_writable();
            CharacteristicMetadata::builder()
                .uuid(characteristic.uuid())
                .is_readable(true)
                .is_writable_with_response(writable)
                .is_writable_without_response(writable)
                .is_notifiable(true)
                .build()
        })
        .collect();
    ServiceMetadata::new(SPA_SERVICE_UUID, characteristics)
}

fn metadata_for(characteristic: SpaCharacteristic) -> SpaCharacteristicMetadata {
    let (uuid, access) = match characteristic {
        SpaCharacteristic::Mmode => ("984cdbfb-446b-43b2-a879-c857a9a0f638", Access::ReadWrite),
        SpaCharacteristic::Mcode => ("6436e996-e573-4ff7-83fd-d0ea0bd09458", Access::ReadWrite),
        SpaCharacteristic::BtName => ("f8733ee9-6e45-485a-a8a1-9e4e8bdb0536", Access::ReadWrite),
        SpaCharacteristic::Temperature => {
            ("0daecf8f-2352-4ae8-bdb8-4ae862f041e3", Access::ReadWrite)
        }
        SpaCharacteristic::Time => ("8cea517c-2d76-4190-ae05-2e222a3caacb", Access::ReadWrite),
        SpaCharacteristic::Session => ("c67c0b5f-0f50-44fc-a0f9-449ff1f476f1", Access::ReadWrite),
        SpaCharacteristic::WifiCreds => {
            ("5eb76cac-ada4-43c2-9ed0-b80547542e9f", Access::ReadWrite)
        }
        SpaCharacteristic::Version => ("207da212-c2fd-43b5-9664-ac15166364d2", Access::ReadOnly),
        SpaCharacteristic::WifiMac => ("aefc6b90-26f1-4842-b720-3d47f4a087cf", Access::ReadOnly),
    };
    SpaCharacteristicMetadata { uuid, access }
}
