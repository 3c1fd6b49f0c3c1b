//! Wire shapes shared by the web UI and the device
//!
//! Field names are short because the UI script builds and reads them by
//! hand: `s`/`r`/`n`/`t` per mapping row, `gw` for the default gateway.

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, net::Ipv4Addr, str::FromStr};

use super::{
    mapping::{MappingEntry, MappingTable},
    settings::{Configuration, DeviceSettings},
};
use crate::core::error::ValidationError;

/// Flat configuration document returned by `GET /config` and stored on disk.
///
/// `gw`, `mask` and `port` are optional on input so files written before
/// those settings existed still load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub ip: Ipv4Addr,
    #[serde(default = "default_gateway")]
    pub gw: Ipv4Addr,
    #[serde(default = "default_mask")]
    pub mask: Ipv4Addr,
    pub baud: u32,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub items: Vec<MappingEntry>,
    /// Connected Modbus-TCP client count, only present in live responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<usize>,
    /// Last poll cycle duration in milliseconds, only present in live responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle: Option<u64>,
}

fn default_gateway() -> Ipv4Addr {
    DeviceSettings::default().gateway
}

fn default_mask() -> Ipv4Addr {
    DeviceSettings::default().mask
}

fn default_port() -> u16 {
    DeviceSettings::default().port
}

impl ConfigDocument {
    pub fn with_telemetry(mut self, clients: usize, cycle_ms: u64) -> Self {
        self.clients = Some(clients);
        self.cycle = Some(cycle_ms);
        self
    }
}

impl From<Configuration> for ConfigDocument {
    fn from(config: Configuration) -> Self {
        let Configuration { settings, items } = config;
        Self {
            ip: settings.ip,
            gw: settings.gateway,
            mask: settings.mask,
            baud: settings.baud,
            port: settings.port,
            items: items.entries().to_vec(),
            clients: None,
            cycle: None,
        }
    }
}

impl From<ConfigDocument> for Configuration {
    fn from(doc: ConfigDocument) -> Self {
        Configuration {
            settings: DeviceSettings {
                ip: doc.ip,
                gateway: doc.gw,
                mask: doc.mask,
                baud: doc.baud,
                port: doc.port,
            },
            items: MappingTable::new(doc.items),
        }
    }
}

/// Body of every `POST` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    pub message: String,
}

impl StatusResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// `GET /clients`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientsResponse {
    pub count: usize,
    pub ips: Vec<String>,
}

/// Query of `GET /value?t=<tcpAddress>&n=<length>`
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ValueQuery {
    pub t: u16,
    #[serde(default = "default_value_count")]
    pub n: u16,
}

fn default_value_count() -> u16 {
    1
}

/// `GET /value`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueResponse {
    pub t: u16,
    pub n: u16,
    pub values: Vec<u16>,
}

/// A decoded `POST /config` body.
#[derive(Debug, Clone)]
pub struct ConfigSubmission {
    pub configuration: Configuration,
    pub credential: Option<String>,
}

fn required<T: FromStr>(form: &HashMap<String, String>, name: &str) -> Result<T, ValidationError> {
    let raw = form
        .get(name)
        .ok_or_else(|| ValidationError::MissingField {
            field: name.to_string(),
        })?;
    parse_field(name, raw)
}

fn parse_field<T: FromStr>(name: &str, raw: &str) -> Result<T, ValidationError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| ValidationError::MalformedField {
            field: name.to_string(),
            value: raw.to_string(),
        })
}

/// Extracts the credential without decoding anything else.
pub fn form_credential(form: &HashMap<String, String>) -> Option<&str> {
    form.get("pass").map(String::as_str)
}

/// Decodes the `ip, gw, mask, baud, port, count, s0.., r0.., n0.., t0.., pass`
/// form posted by the configuration page.
///
/// Rows are read in index order so the table keeps the order the operator
/// sees. A missing `n{i}` maps one register, matching forms from UI versions
/// that had no length column; an explicit `0` is kept and later rejected by
/// validation.
pub fn decode_config_form(
    form: &HashMap<String, String>,
    max_entries: usize,
) -> Result<ConfigSubmission, ValidationError> {
    let settings = DeviceSettings {
        ip: required(form, "ip")?,
        gateway: required(form, "gw")?,
        mask: required(form, "mask")?,
        baud: required(form, "baud")?,
        port: required(form, "port")?,
    };

    let count: usize = required(form, "count")?;
    if count > max_entries {
        return Err(ValidationError::TooManyEntries {
            count,
            max: max_entries,
        });
    }

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let length_key = format!("n{i}");
        let length = match form.get(&length_key) {
            Some(raw) => parse_field(&length_key, raw)?,
            None => 1,
        };
        entries.push(MappingEntry {
            slave_id: required(form, &format!("s{i}"))?,
            register_address: required(form, &format!("r{i}"))?,
            length,
            tcp_address: required(form, &format!("t{i}"))?,
        });
    }

    Ok(ConfigSubmission {
        configuration: Configuration::new(settings, MappingTable::new(entries)),
        credential: form_credential(form).map(str::to_string),
    })
}
