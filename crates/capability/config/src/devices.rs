//! 设备描述文件加载与校验。
//!
//! 文件格式：
//! ```json
//! {
//!   "devices": [
//!     {
//!       "name": "SimDevice1",
//!       "slave_id": 1,
//!       "host": "127.0.0.1",
//!       "port": 5020,
//!       "polling_interval_ms": 5000,
//!       "register_groups": [
//!         { "name": "setpoints", "kind": "holding_register", "address": 0, "count": 2,
//!           "encoding": "uint32", "word_order": "high_first", "scale": 0.1 }
//!       ]
//!     }
//!   ]
//! }
//! ```

use crate::ConfigError;
use domain::{
    DeviceDescriptor, RegisterEncoding, RegisterGroup, RegisterKind, TransportAddress, WordOrder,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct DeviceFile {
    devices: Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize)]
struct DeviceEntry {
    name: String,
    slave_id: u8,
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_polling_interval_ms")]
    polling_interval_ms: u64,
    #[serde(default)]
    register_groups: Vec<GroupEntry>,
}

#[derive(Debug, Deserialize)]
struct GroupEntry {
    name: String,
    kind: String,
    address: u16,
    count: u16,
    encoding: Option<String>,
    word_order: Option<String>,
    scale: Option<f64>,
}

fn default_port() -> u16 {
    502
}

fn default_polling_interval_ms() -> u64 {
    5_000
}

/// 从文件加载设备描述。
pub fn load_devices(path: impl AsRef<Path>) -> Result<Vec<DeviceDescriptor>, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|err| ConfigError::DeviceFile(format!("{}: {}", path.display(), err)))?;
    parse_devices(&raw)
}

/// 解析并校验设备描述 JSON。
pub fn parse_devices(raw: &str) -> Result<Vec<DeviceDescriptor>, ConfigError> {
    let file: DeviceFile =
        serde_json::from_str(raw).map_err(|err| ConfigError::DeviceFile(err.to_string()))?;

    let mut names = HashSet::new();
    let mut slave_ids = HashSet::new();
    let mut devices = Vec::with_capacity(file.devices.len());
    for entry in file.devices {
        let name = entry.name.trim().to_string();
        if name.is_empty() {
            return Err(ConfigError::InvalidDevice("device name is empty".to_string()));
        }
        if name.contains('/') || name.contains('+') || name.contains('#') {
            return Err(ConfigError::InvalidDevice(format!(
                "{}: name must not contain topic separators or wildcards",
                name
            )));
        }
        if !names.insert(name.clone()) {
            return Err(ConfigError::InvalidDevice(format!(
                "duplicate device name: {}",
                name
            )));
        }
        if !slave_ids.insert(entry.slave_id) {
            return Err(ConfigError::InvalidDevice(format!(
                "duplicate slave_id {} (device {})",
                entry.slave_id, name
            )));
        }
        if entry.polling_interval_ms == 0 {
            return Err(ConfigError::InvalidDevice(format!(
                "{}: polling_interval_ms must be > 0",
                name
            )));
        }

        let mut groups = Vec::with_capacity(entry.register_groups.len());
        for group in entry.register_groups {
            groups.push(build_group(&name, group)?);
        }

        devices.push(DeviceDescriptor {
            name,
            slave_id: entry.slave_id,
            transport: TransportAddress {
                host: entry.host,
                port: entry.port,
            },
            groups,
            polling_interval: Duration::from_millis(entry.polling_interval_ms),
        });
    }
    Ok(devices)
}

fn build_group(device: &str, entry: GroupEntry) -> Result<RegisterGroup, ConfigError> {
    let invalid = |message: String| {
        ConfigError::InvalidDevice(format!("{}/{}: {}", device, entry.name, message))
    };

    let kind = entry.kind.parse::<RegisterKind>().map_err(invalid)?;
    let encoding = match entry.encoding.as_deref() {
        Some(raw) => raw.parse::<RegisterEncoding>().map_err(invalid)?,
        None => RegisterEncoding::default(),
    };
    let word_order = match entry.word_order.as_deref() {
        None => WordOrder::default(),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "high_first" | "big" | "big_endian" => WordOrder::HighFirst,
            "low_first" | "little" | "little_endian" => WordOrder::LowFirst,
            other => return Err(invalid(format!("unknown word order: {}", other))),
        },
    };

    if entry.count == 0 {
        return Err(invalid("count must be > 0".to_string()));
    }
    if u32::from(entry.address) + u32::from(entry.count) > 65_536 {
        return Err(invalid("address range exceeds 65535".to_string()));
    }
    if kind.is_bit() {
        if encoding != RegisterEncoding::default() || entry.scale.is_some() {
            return Err(invalid(
                "bit registers do not accept encoding or scale".to_string(),
            ));
        }
    } else if entry.count % encoding.width() != 0 {
        return Err(invalid(format!(
            "count {} is not a multiple of encoding width {}",
            entry.count,
            encoding.width()
        )));
    }
    if let Some(scale) = entry.scale
        && !scale.is_finite()
    {
        return Err(invalid("scale must be finite".to_string()));
    }

    Ok(RegisterGroup {
        name: entry.name.clone(),
        kind,
        address: entry.address,
        count: entry.count,
        encoding,
        word_order,
        scale: entry.scale,
    })
}
