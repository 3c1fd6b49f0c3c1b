use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use super::{mapping::MappingTable, wire::ConfigDocument};
use crate::core::error::ValidationError;

/// Network identity and link parameters of the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub ip: Ipv4Addr,
    #[serde(rename = "gw")]
    pub gateway: Ipv4Addr,
    pub mask: Ipv4Addr,
    /// RS485 link speed
    pub baud: u32,
    /// Modbus-TCP listen port
    pub port: u16,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            ip: Ipv4Addr::new(192, 168, 1, 100),
            gateway: Ipv4Addr::new(192, 168, 1, 1),
            mask: Ipv4Addr::new(255, 255, 255, 0),
            baud: 9600,
            port: 502,
        }
    }
}

impl DeviceSettings {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.baud == 0 {
            return Err(ValidationError::MalformedField {
                field: "baud".to_string(),
                value: self.baud.to_string(),
            });
        }
        if self.port == 0 {
            return Err(ValidationError::MalformedField {
                field: "port".to_string(),
                value: self.port.to_string(),
            });
        }
        // Netmask bits must be contiguous from the top.
        let mask = u32::from(self.mask);
        if mask.leading_ones() + mask.trailing_zeros() != 32 {
            return Err(ValidationError::MalformedField {
                field: "mask".to_string(),
                value: self.mask.to_string(),
            });
        }
        Ok(())
    }
}

/// One complete device configuration: the unit of atomic read and write.
///
/// Serialized through the flat [`ConfigDocument`] layout so the persisted
/// file and `GET /config` share one shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ConfigDocument", from = "ConfigDocument")]
pub struct Configuration {
    pub settings: DeviceSettings,
    pub items: MappingTable,
}

impl Configuration {
    pub fn new(settings: DeviceSettings, items: MappingTable) -> Self {
        Self { settings, items }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.settings.validate()?;
        self.items.validate()
    }
}
