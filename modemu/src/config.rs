//! JSON configuration of an [`Emulator`](crate::Emulator)
//!
//! ```json
//! {
//!   "transport": "tcp",
//!   "host": "127.0.0.1",
//!   "port": 5020,
//!   "devices": [
//!     { "unitId": 1, "registers": { "holding": { "0": 230 } }, "timing": { "processingDelay": [2, 5] } }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use crate::decode::DecodeLevel;
use crate::error::{ConfigError, DeviceError};
use crate::store::{Device, RegisterBank};
use crate::timing::TimingConfig;
use crate::transport::{DataBits, Parity, RtuSettings, StopBits};
use crate::types::UnitId;

const DEFAULT_TCP_HOST: &str = "0.0.0.0";
const DEFAULT_TCP_PORT: u16 = 502;
const DEFAULT_BAUD_RATE: u32 = 9600;
const DEFAULT_INIT_TIMEOUT_MS: u64 = 5000;

/// Carrier selection and its carrier specific fields
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TransportConfig {
    /// in-process carrier
    #[default]
    Memory,
    /// Modbus TCP listener
    Tcp {
        /// interface to bind
        host: String,
        /// port to bind, 0 picks a free port
        port: u16,
    },
    /// Modbus RTU listener on a serial port
    Rtu(SerialConfig),
}

/// Serial port fields of an RTU carrier, as they appear in the configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerialConfig {
    /// serial device path
    pub path: String,
    /// line speed
    pub baud_rate: u32,
    /// parity
    pub parity: Parity,
    /// 5 to 8
    pub data_bits: u8,
    /// 1 or 2
    pub stop_bits: u8,
    /// open the port exclusively
    pub lock: bool,
    /// unit id filter, 255 accepts every unit id
    pub unit_id: u8,
}

impl SerialConfig {
    /// Default 8N1 settings at 9600 baud for `path`
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            parity: Parity::None,
            data_bits: 8,
            stop_bits: 1,
            lock: true,
            unit_id: UnitId::wildcard().value,
        }
    }

    /// Validate and convert into the settings used by the RTU transport
    pub fn settings(&self) -> Result<RtuSettings, ConfigError> {
        if self.path.is_empty() {
            return Err(ConfigError::InvalidSerialSetting(
                "serial port path is empty".to_string(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::InvalidSerialSetting(
                "baud rate must be positive".to_string(),
            ));
        }
        let data_bits = DataBits::try_from(self.data_bits).map_err(|x| {
            ConfigError::InvalidSerialSetting(format!("data bits must be 5..=8, got {x}"))
        })?;
        let stop_bits = StopBits::try_from(self.stop_bits).map_err(|x| {
            ConfigError::InvalidSerialSetting(format!("stop bits must be 1 or 2, got {x}"))
        })?;
        let unit_id = UnitId::new(self.unit_id);
        if !unit_id.is_wildcard() && !unit_id.is_assignable() {
            return Err(ConfigError::InvalidSerialSetting(format!(
                "unit id filter must be 1..=247 or 255, got {unit_id}"
            )));
        }

        Ok(RtuSettings {
            path: self.path.clone(),
            baud_rate: self.baud_rate,
            parity: self.parity,
            data_bits,
            stop_bits,
            lock: self.lock,
            unit_id,
        })
    }
}

/// Initial register contents keyed by decimal address strings
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterMaps {
    /// holding registers
    #[serde(default)]
    pub holding: BTreeMap<String, u16>,
    /// input registers
    #[serde(default)]
    pub input: BTreeMap<String, u16>,
    /// coils
    #[serde(default)]
    pub coils: BTreeMap<String, bool>,
    /// discrete inputs
    #[serde(default)]
    pub discrete: BTreeMap<String, bool>,
}

/// One virtual device
#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeviceConfig {
    /// 1..=247
    pub unit_id: u8,
    /// initial register contents
    #[serde(default)]
    pub registers: RegisterMaps,
    /// artificial delays, none when absent
    #[serde(default)]
    pub timing: Option<TimingConfig>,
}

impl DeviceConfig {
    /// Build the device definition, validating addresses and timing values
    pub fn to_device(&self) -> Result<Device, ConfigError> {
        let mut bank = RegisterBank::new();
        for (key, value) in &self.registers.holding {
            bank.set_holding(parse_address(key)?, *value);
        }
        for (key, value) in &self.registers.input {
            bank.set_input(parse_address(key)?, *value);
        }
        for (key, value) in &self.registers.coils {
            bank.set_coil(parse_address(key)?, *value);
        }
        for (key, value) in &self.registers.discrete {
            bank.set_discrete(parse_address(key)?, *value);
        }

        let mut device = Device::new(self.unit_id).with_registers(bank);
        if let Some(timing) = &self.timing {
            timing.validate()?;
            device = device.with_timing(timing.clone());
        }
        Ok(device)
    }
}

fn parse_address(key: &str) -> Result<u16, ConfigError> {
    key.trim()
        .parse::<u16>()
        .map_err(|_| ConfigError::InvalidAddress(key.to_string()))
}

/// Complete engine configuration
#[derive(Clone, Debug, PartialEq)]
pub struct EmulatorConfig {
    /// carrier
    pub transport: TransportConfig,
    /// bound on `start()` in milliseconds
    pub init_timeout_ms: u64,
    /// frame logging level
    pub decode_level: DecodeLevel,
    /// virtual devices
    pub devices: Vec<DeviceConfig>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::Memory,
            init_timeout_ms: DEFAULT_INIT_TIMEOUT_MS,
            decode_level: DecodeLevel::Nothing,
            devices: Vec::new(),
        }
    }
}

impl EmulatorConfig {
    /// Read and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        text.parse()
    }

    /// Bound on `start()`
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    /// Check the transport fields and every device definition
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.transport {
            TransportConfig::Memory => {}
            TransportConfig::Tcp { host, .. } => {
                if host.trim().is_empty() {
                    return Err(ConfigError::InvalidSocketAddress(host.clone()));
                }
            }
            TransportConfig::Rtu(serial) => {
                serial.settings()?;
            }
        }

        let mut seen = BTreeSet::new();
        for device in &self.devices {
            let unit_id = UnitId::new(device.unit_id);
            if !unit_id.is_assignable() {
                return Err(DeviceError::InvalidUnitId(device.unit_id).into());
            }
            if !seen.insert(unit_id) {
                return Err(DeviceError::DuplicateUnitId(device.unit_id).into());
            }
            device.to_device()?;
        }
        Ok(())
    }
}

impl std::str::FromStr for EmulatorConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: RawConfig = serde_json::from_str(s)?;
        let config = raw.into_config()?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Copy, Clone, Debug, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
enum TransportKind {
    #[default]
    Memory,
    Tcp,
    Rtu,
}

/// TCP uses a number and RTU a device path under the same key
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(untagged)]
enum RawPort {
    Number(u16),
    Path(String),
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    transport: TransportKind,
    host: Option<String>,
    port: Option<RawPort>,
    baud_rate: Option<u32>,
    parity: Option<Parity>,
    data_bits: Option<u8>,
    stop_bits: Option<u8>,
    lock: Option<bool>,
    unit_id: Option<u8>,
    init_timeout_ms: Option<u64>,
    #[serde(default)]
    decode_level: DecodeLevel,
    #[serde(default)]
    devices: Vec<DeviceConfig>,
}

impl RawConfig {
    fn into_config(self) -> Result<EmulatorConfig, ConfigError> {
        let transport = match self.transport {
            TransportKind::Memory => TransportConfig::Memory,
            TransportKind::Tcp => {
                let port = match self.port {
                    None => DEFAULT_TCP_PORT,
                    Some(RawPort::Number(x)) => x,
                    Some(RawPort::Path(x)) => return Err(ConfigError::InvalidSocketAddress(x)),
                };
                TransportConfig::Tcp {
                    host: self.host.unwrap_or_else(|| DEFAULT_TCP_HOST.to_string()),
                    port,
                }
            }
            TransportKind::Rtu => {
                let path = match self.port {
                    Some(RawPort::Path(x)) => x,
                    _ => {
                        return Err(ConfigError::InvalidSerialSetting(
                            "'port' must name the serial device".to_string(),
                        ))
                    }
                };
                let defaults = SerialConfig::new(path);
                TransportConfig::Rtu(SerialConfig {
                    baud_rate: self.baud_rate.unwrap_or(defaults.baud_rate),
                    parity: self.parity.unwrap_or(defaults.parity),
                    data_bits: self.data_bits.unwrap_or(defaults.data_bits),
                    stop_bits: self.stop_bits.unwrap_or(defaults.stop_bits),
                    lock: self.lock.unwrap_or(defaults.lock),
                    unit_id: self.unit_id.unwrap_or(defaults.unit_id),
                    ..defaults
                })
            }
        };

        Ok(EmulatorConfig {
            transport,
            init_timeout_ms: self.init_timeout_ms.unwrap_or(DEFAULT_INIT_TIMEOUT_MS),
            decode_level: self.decode_level,
            devices: self.devices,
        })
    }
}
