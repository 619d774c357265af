use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Serialize, Deserialize};

use super::{Error, Result, DEFAULT_MAX_FILE_SIZE};

/// Three-bit operation code carried in the header flags byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpCode {
    /// Ordinary data packet, strictly sequential pid
    Data,
    /// Metadata ("init") packet, always pid 0
    Init,
    /// Reserved/control codes 0x2..=0x6, pid forced to 0
    Control(u8),
    /// Last data packet of a stream
    Terminal,
}

impl OpCode {
    /// Returns the 3-bit wire value
    pub fn bits(&self) -> u8 {
        match self {
            OpCode::Data => 0x0,
            OpCode::Init => 0x1,
            OpCode::Control(code) => *code,
            OpCode::Terminal => 0x7,
        }
    }

    /// Parses a 3-bit wire value
    pub fn from_bits(bits: u8) -> Result<Self> {
        match bits {
            0x0 => Ok(OpCode::Data),
            0x1 => Ok(OpCode::Init),
            0x2..=0x6 => Ok(OpCode::Control(bits)),
            0x7 => Ok(OpCode::Terminal),
            other => Err(Error::format(format!("op code {:#x} does not fit in 3 bits", other))),
        }
    }

    /// Creates a control code, rejecting values outside 0x2..=0x6
    pub fn control(code: u8) -> Result<Self> {
        match code {
            0x2..=0x6 => Ok(OpCode::Control(code)),
            other => Err(Error::format(format!("{:#x} is not a control op code", other))),
        }
    }

    /// Whether packets with this code must follow the previous pid
    pub fn is_sequenced(&self) -> bool {
        matches!(self, OpCode::Data | OpCode::Terminal)
    }
}

/// Serial link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial device path
    pub device: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            device: "/dev/serial0".to_string(),
            baud_rate: 115_200,
            timeout: Duration::from_millis(100),
        }
    }
}

/// Configuration for a QUIP node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the packet units
    pub packet_dir: PathBuf,
    /// Directory receiving decoded files
    pub output_dir: PathBuf,
    /// Delete consumed inputs after a successful run
    pub destructive: bool,
    /// Delay between polls of the link
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub poll_interval: Duration,
    /// Consecutive FIFO faults tolerated before the receive cycle fails
    pub fault_tolerance: u32,
    /// Largest file size an init record may declare
    pub max_file_size: u64,
    /// Serial link settings
    pub serial: SerialConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            packet_dir: PathBuf::from("packets"),
            output_dir: PathBuf::from("."),
            destructive: false,
            poll_interval: Duration::from_secs(1),
            fault_tolerance: 2,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            serial: SerialConfig::default(),
        }
    }
}

impl Config {
    /// Loads a configuration from a JSON file, missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&text)
            .map_err(|e| Error::config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the configuration as pretty JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::serialization(format!("Failed to serialize config: {}", e)))
    }

    /// Checks value ranges
    pub fn validate(&self) -> Result<()> {
        if self.fault_tolerance == 0 {
            return Err(Error::config("fault_tolerance must be at least 1"));
        }
        if self.serial.baud_rate == 0 {
            return Err(Error::config("serial.baud_rate must be positive"));
        }
        // a serial read blocks the worker for up to the timeout
        if self.serial.timeout.is_zero() || self.serial.timeout > self.poll_interval {
            return Err(Error::config(format!(
                "serial.timeout must be positive and no longer than poll_interval ({:?})",
                self.poll_interval
            )));
        }
        if self.max_file_size == 0 {
            return Err(Error::config("max_file_size must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_code_bits() {
        for bits in 0..=7u8 {
            let op = OpCode::from_bits(bits).unwrap();
            assert_eq!(op.bits(), bits);
        }
        assert!(OpCode::from_bits(8).is_err());
    }

    #[test]
    fn test_op_code_sequencing() {
        assert!(OpCode::Data.is_sequenced());
        assert!(OpCode::Terminal.is_sequenced());
        assert!(!OpCode::Init.is_sequenced());
        assert!(!OpCode::Control(0x4).is_sequenced());
        assert!(OpCode::control(0x1).is_err());
        assert!(OpCode::control(0x7).is_err());
    }

    #[test]
    fn test_config_json_defaults() {
        let config: Config = serde_json::from_str(r#"{"destructive":true,"poll_interval":0.25}"#).unwrap();
        assert!(config.destructive);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.serial, SerialConfig::default());
        assert_eq!(config.fault_tolerance, 2);
    }

    #[test]
    fn test_config_roundtrip_and_validation() {
        let config = Config::default();
        let json = config.to_json().unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);

        let bad = Config { fault_tolerance: 0, ..Config::default() };
        assert!(matches!(bad.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_serial_timeout_bounded_by_poll_interval() {
        let mut config = Config::default();
        config.serial.timeout = Duration::from_secs(5);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.serial.timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.serial.timeout = config.poll_interval;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_file_size() {
        let config: Config = serde_json::from_str(r#"{"max_file_size":1024}"#).unwrap();
        assert_eq!(config.max_file_size, 1024);
        assert_eq!(Config::default().max_file_size, DEFAULT_MAX_FILE_SIZE);

        let bad = Config { max_file_size: 0, ..Config::default() };
        assert!(matches!(bad.validate(), Err(Error::Config(_))));
    }
}
