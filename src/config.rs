//! TOML configuration.
//!
//! Every table and field has a default, so an absent file or an empty
//! document yields a usable configuration. Serial parity and stop bit
//! values follow the usual `N/E/O/M/S` and `1/1.5/2` notation; values the
//! backing serial stack cannot provide are rejected when the port is
//! opened, not silently substituted.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio_serial::{DataBits, SerialPortBuilder, StopBits};

use crate::iec62056::obis::{ObisDataSetConfig, ObisId};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read the configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse the configuration file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unsupported serial setting: {0}")]
    UnsupportedSerialSetting(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub serial_port: SerialConfig,
    pub mqtt: MqttConfig,
    pub obis: ObisConfig,
}

impl Config {
    /// Load the configuration from a TOML file; `None` yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Ok(toml::from_str(&fs::read_to_string(path)?)?),
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LoggingLevel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    #[default]
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LoggingLevel::Error => log::LevelFilter::Error,
            LoggingLevel::Warn => log::LevelFilter::Warn,
            LoggingLevel::Info => log::LevelFilter::Info,
            LoggingLevel::Debug => log::LevelFilter::Debug,
            LoggingLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port_url: String,
    pub baud_rate: u32,
    pub byte_size: u8,
    pub parity: Parity,
    pub stop_bits: StopBitsConfig,
    /// Pause between readout cycles, in seconds.
    pub polling_delay: f64,
    /// Pause after each dialogue turn, in seconds.
    pub response_delay: f64,
    pub read_timeout: f64,
    pub write_timeout: f64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_url: "/dev/ttyUSB0".into(),
            baud_rate: 9600,
            byte_size: 8,
            parity: Parity::N,
            stop_bits: StopBitsConfig::One,
            polling_delay: 30.0,
            response_delay: 0.5,
            read_timeout: 10.0,
            write_timeout: 10.0,
        }
    }
}

impl SerialConfig {
    /// Port builder with all line settings applied.
    pub fn builder(&self) -> Result<SerialPortBuilder, ConfigError> {
        Ok(tokio_serial::new(&self.port_url, self.baud_rate)
            .data_bits(self.data_bits()?)
            .parity(self.parity.to_serial()?)
            .stop_bits(self.stop_bits.to_serial()?))
    }

    fn data_bits(&self) -> Result<DataBits, ConfigError> {
        match self.byte_size {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(ConfigError::UnsupportedSerialSetting(format!(
                "byte size {other}"
            ))),
        }
    }

    pub fn polling_delay(&self) -> Duration {
        Duration::from_secs_f64(self.polling_delay)
    }

    pub fn response_delay(&self) -> Duration {
        Duration::from_secs_f64(self.response_delay)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.read_timeout)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.write_timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    N,
    E,
    O,
    M,
    S,
}

impl Parity {
    fn to_serial(self) -> Result<tokio_serial::Parity, ConfigError> {
        match self {
            Parity::N => Ok(tokio_serial::Parity::None),
            Parity::E => Ok(tokio_serial::Parity::Even),
            Parity::O => Ok(tokio_serial::Parity::Odd),
            Parity::M => Err(ConfigError::UnsupportedSerialSetting("mark parity".into())),
            Parity::S => Err(ConfigError::UnsupportedSerialSetting("space parity".into())),
        }
    }
}

/// Stop bits as written in configuration files: 1, 1.5 or 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBitsConfig {
    One,
    OnePointFive,
    Two,
}

impl StopBitsConfig {
    fn to_serial(self) -> Result<StopBits, ConfigError> {
        match self {
            StopBitsConfig::One => Ok(StopBits::One),
            StopBitsConfig::Two => Ok(StopBits::Two),
            StopBitsConfig::OnePointFive => Err(ConfigError::UnsupportedSerialSetting(
                "1.5 stop bits".into(),
            )),
        }
    }
}

impl<'de> Deserialize<'de> for StopBitsConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StopBitsVisitor;

        impl serde::de::Visitor<'_> for StopBitsVisitor {
            type Value = StopBitsConfig;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "1, 1.5 or 2")
            }

            fn visit_i64<E: serde::de::Error>(self, value: i64) -> Result<Self::Value, E> {
                match value {
                    1 => Ok(StopBitsConfig::One),
                    2 => Ok(StopBitsConfig::Two),
                    other => Err(E::custom(format!("invalid stop bits: {other}"))),
                }
            }

            fn visit_u64<E: serde::de::Error>(self, value: u64) -> Result<Self::Value, E> {
                self.visit_i64(value as i64)
            }

            fn visit_f64<E: serde::de::Error>(self, value: f64) -> Result<Self::Value, E> {
                if value == 1.0 {
                    Ok(StopBitsConfig::One)
                } else if value == 1.5 {
                    Ok(StopBitsConfig::OnePointFive)
                } else if value == 2.0 {
                    Ok(StopBitsConfig::Two)
                } else {
                    Err(E::custom(format!("invalid stop bits: {value}")))
                }
            }
        }

        deserializer.deserialize_any(StopBitsVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub configuration_topic_template: String,
    pub state_topic_template: String,
    pub broker: MqttBrokerConfig,
    pub device: MqttDeviceConfig,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            configuration_topic_template: "homeassistant/sensor/{entity_id}/config".into(),
            state_topic_template: "homeassistant/sensor/{entity_id}/state".into(),
            broker: MqttBrokerConfig::default(),
            device: MqttDeviceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MqttBrokerConfig {
    pub hostname: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for MqttBrokerConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".into(),
            port: 1883,
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MqttDeviceConfig {
    pub id: String,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
}

impl Default for MqttDeviceConfig {
    fn default() -> Self {
        Self {
            id: "power-meter-0".into(),
            name: "Power Meter 0".into(),
            manufacturer: "Unknown Manufacturer".into(),
            model: "Unknown Model".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ObisConfig {
    pub data_sets: Vec<ObisDataSetConfig>,
}

impl ObisConfig {
    pub fn by_id(&self) -> HashMap<ObisId, ObisDataSetConfig> {
        self.data_sets
            .iter()
            .map(|config| (config.id, config.clone()))
            .collect()
    }
}
