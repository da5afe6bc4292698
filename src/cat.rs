//! Radio CAT control.
//!
//! The relay only needs four operations from the radio: open the port, check
//! that a radio answers, send a command, and close. [`CatControl`] captures
//! that; [`KenwoodCat`] implements it for Kenwood-style ASCII CAT
//! (`;`-terminated commands) over a serial port.

use serde::Deserialize;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use thiserror::Error;
use tracing::{debug, info, trace};

/// Kenwood CAT command terminator.
const TERMINATOR: u8 = b';';

/// Errors from the CAT interface.
#[derive(Debug, Error)]
pub enum CatError {
    #[error("Failed to open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Serial port is not open")]
    NotOpen,

    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Radio did not answer")]
    NoResponse,

    #[error("Unexpected radio reply: {0}")]
    UnexpectedReply(String),

    #[error("Invalid serial setting: {0}")]
    InvalidSetting(String),
}

/// Operations the relay needs from a radio.
pub trait CatControl: Send {
    /// Open the port.
    fn open(&mut self) -> Result<(), CatError>;

    /// Close the port. Safe to call when already closed.
    fn close(&mut self);

    /// Ask the radio for its identity. Returns the raw reply.
    fn check_radio(&mut self) -> Result<String, CatError>;

    /// Send one command, without terminator.
    fn send_command(&mut self, command: &str) -> Result<(), CatError>;
}

/// Serial settings for the radio.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Model name, only used in log output.
    pub model: String,
    /// Serial device, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: String,
    pub baud_rate: u32,
    /// 5 to 8.
    pub data_bits: u8,
    /// 1 or 2.
    pub stop_bits: u8,
    /// `"N"`, `"E"` or `"O"`.
    pub parity: String,
    pub xonxoff: bool,
    pub rtscts: bool,
    pub rts: bool,
    pub dtr: bool,
    /// Read/write timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            model: "TS-590".to_string(),
            port: default_port().to_string(),
            baud_rate: 57600,
            data_bits: 8,
            stop_bits: 1,
            parity: "N".to_string(),
            xonxoff: false,
            rtscts: false,
            rts: false,
            dtr: false,
            timeout_ms: 200,
        }
    }
}

#[cfg(windows)]
fn default_port() -> &'static str {
    "COM1"
}

#[cfg(not(windows))]
fn default_port() -> &'static str {
    "/dev/ttyUSB0"
}

impl RadioConfig {
    fn data_bits(&self) -> Result<DataBits, CatError> {
        match self.data_bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            n => Err(CatError::InvalidSetting(format!("data bits {}", n))),
        }
    }

    fn stop_bits(&self) -> Result<StopBits, CatError> {
        match self.stop_bits {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            n => Err(CatError::InvalidSetting(format!("stop bits {}", n))),
        }
    }

    fn parity(&self) -> Result<Parity, CatError> {
        match self.parity.to_ascii_uppercase().as_str() {
            "N" | "NONE" => Ok(Parity::None),
            "E" | "EVEN" => Ok(Parity::Even),
            "O" | "ODD" => Ok(Parity::Odd),
            other => Err(CatError::InvalidSetting(format!("parity {}", other))),
        }
    }

    fn flow_control(&self) -> FlowControl {
        if self.rtscts {
            FlowControl::Hardware
        } else if self.xonxoff {
            FlowControl::Software
        } else {
            FlowControl::None
        }
    }

    /// Check the serial settings without opening anything.
    pub fn validate(&self) -> Result<(), CatError> {
        self.data_bits()?;
        self.stop_bits()?;
        self.parity()?;
        Ok(())
    }
}

/// Names of the serial ports present on this machine.
pub fn available_ports() -> Vec<String> {
    serialport::available_ports()
        .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
        .unwrap_or_default()
}

/// Format a skimmer click frequency (`kHz` with two decimals) as a Kenwood
/// `FB` command: the digits are in 10 Hz units, padded to ten digits, and a
/// trailing zero makes the 11-digit Hz value.
///
/// ```
/// use wintest_bridge::cat::vfo_b_command;
///
/// assert_eq!(vfo_b_command("7024.06"), "FB00007024060");
/// ```
pub fn vfo_b_command(click_khz: &str) -> String {
    format!("FB{:0>10}0", click_khz.replace('.', ""))
}

/// Kenwood ASCII CAT over a serial port.
pub struct KenwoodCat {
    config: RadioConfig,
    port: Option<Box<dyn SerialPort>>,
}

impl KenwoodCat {
    pub fn new(config: RadioConfig) -> Self {
        Self { config, port: None }
    }

    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, CatError> {
        self.port.as_mut().ok_or(CatError::NotOpen)
    }

    /// Read until a terminator or until the port timeout runs out.
    fn read_reply(&mut self) -> Result<String, CatError> {
        let deadline = Instant::now() + Duration::from_millis(self.config.timeout_ms);
        let port = self.port()?;
        let mut reply = Vec::with_capacity(64);
        let mut buf = [0u8; 64];

        while Instant::now() < deadline {
            match port.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    reply.extend_from_slice(&buf[..n]);
                    if reply.contains(&TERMINATOR) {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(CatError::Io(e)),
            }
        }

        if reply.is_empty() {
            return Err(CatError::NoResponse);
        }
        Ok(String::from_utf8_lossy(&reply).trim_end_matches(';').to_string())
    }
}

impl CatControl for KenwoodCat {
    fn open(&mut self) -> Result<(), CatError> {
        let cfg = &self.config;
        let mut port = serialport::new(&cfg.port, cfg.baud_rate)
            .data_bits(cfg.data_bits()?)
            .stop_bits(cfg.stop_bits()?)
            .parity(cfg.parity()?)
            .flow_control(cfg.flow_control())
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .open()
            .map_err(|source| CatError::Open {
                port: cfg.port.clone(),
                source,
            })?;

        if !cfg.rtscts {
            port.write_request_to_send(cfg.rts)
                .map_err(|source| CatError::Open {
                    port: cfg.port.clone(),
                    source,
                })?;
        }
        port.write_data_terminal_ready(cfg.dtr)
            .map_err(|source| CatError::Open {
                port: cfg.port.clone(),
                source,
            })?;

        info!(
            "Radio {} on {} ({} baud, {}{}{})",
            cfg.model,
            cfg.port,
            cfg.baud_rate,
            cfg.data_bits,
            cfg.parity.to_ascii_uppercase(),
            cfg.stop_bits
        );
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Closed radio port {}", self.config.port);
        }
    }

    fn check_radio(&mut self) -> Result<String, CatError> {
        self.send_command("ID")?;
        let reply = self.read_reply()?;
        if !reply.starts_with("ID") {
            return Err(CatError::UnexpectedReply(reply));
        }
        Ok(reply)
    }

    fn send_command(&mut self, command: &str) -> Result<(), CatError> {
        trace!("CAT > {};", command);
        let port = self.port()?;
        port.write_all(command.as_bytes())?;
        port.write_all(&[TERMINATOR])?;
        port.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vfo_b_command() {
        assert_eq!(vfo_b_command("7024.06"), "FB00007024060");
        assert_eq!(vfo_b_command("14025.12"), "FB00014025120");
        assert_eq!(vfo_b_command("7024.06").len(), 13);
    }

    #[test]
    fn test_radio_config_settings() {
        let config = RadioConfig {
            data_bits: 7,
            stop_bits: 2,
            parity: "even".to_string(),
            rtscts: true,
            ..Default::default()
        };
        assert_eq!(config.data_bits().unwrap(), DataBits::Seven);
        assert_eq!(config.stop_bits().unwrap(), StopBits::Two);
        assert_eq!(config.parity().unwrap(), Parity::Even);
        assert_eq!(config.flow_control(), FlowControl::Hardware);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_radio_config_rejects_bad_settings() {
        let config = RadioConfig {
            data_bits: 9,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RadioConfig {
            parity: "X".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_send_without_open() {
        let mut cat = KenwoodCat::new(RadioConfig::default());
        assert!(matches!(cat.send_command("FA"), Err(CatError::NotOpen)));
        cat.close();
    }
}
