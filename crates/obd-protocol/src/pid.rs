//! OBD-II Sensor Definitions and Response Decoding
//!
//! Mode 01 PIDs polled by the diagnostic session and their decoding formulas.

use crate::command::Reply;
use crate::error::DecodeError;
use crate::framer::Frame;
use crate::mode;
use crate::reply;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sensors polled each round, in polling order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SensorKind {
    /// Engine RPM (0x0C)
    Rpm = 0x0C,
    /// Vehicle speed (0x0D)
    Speed = 0x0D,
    /// Fuel tank level input (0x2F)
    FuelLevel = 0x2F,
}

impl SensorKind {
    /// Polling order for one round
    pub const ALL: [SensorKind; 3] = [SensorKind::Rpm, SensorKind::Speed, SensorKind::FuelLevel];

    /// Get the PID hex value
    pub fn pid(&self) -> u8 {
        *self as u8
    }

    /// Get the number of data bytes after the `41 <pid>` header
    pub fn response_bytes(&self) -> usize {
        match self {
            SensorKind::Rpm => 2,
            SensorKind::Speed | SensorKind::FuelLevel => 1,
        }
    }

    /// Request text, e.g. `010C`
    pub fn request(&self) -> String {
        format!("{:02X}{:02X}", mode::CURRENT_DATA, self.pid())
    }

    pub fn unit(&self) -> &'static str {
        match self {
            SensorKind::Rpm => "rpm",
            SensorKind::Speed => "km/h",
            SensorKind::FuelLevel => "%",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SensorKind::Rpm => "RPM",
            SensorKind::Speed => "Speed",
            SensorKind::FuelLevel => "Fuel",
        }
    }

    /// Apply the PID formula to the data bytes
    fn formula(&self, data: &[u8]) -> f64 {
        match self {
            // RPM: ((A*256)+B)/4
            SensorKind::Rpm => ((data[0] as f64 * 256.0) + data[1] as f64) / 4.0,
            // Speed: A (km/h)
            SensorKind::Speed => data[0] as f64,
            // Fuel level: A * 100 / 255 (%)
            SensorKind::FuelLevel => data[0] as f64 * 100.0 / 255.0,
        }
    }

    /// Decode a complete response frame into the sensor value
    pub fn decode(&self, frame: &Frame) -> Result<f64, DecodeError> {
        let bytes = reply::hex_bytes(frame, &self.request())?;
        let header = [mode::CURRENT_DATA + mode::RESPONSE_OFFSET, self.pid()];

        if bytes.len() < 2 || bytes[..2] != header {
            let found = bytes
                .iter()
                .take(2)
                .map(|b| format!("{b:02X}"))
                .collect::<Vec<_>>()
                .join(" ");
            return Err(DecodeError::UnexpectedHeader {
                expected: self.pid(),
                found,
            });
        }

        let data = &bytes[2..];
        let needed = self.response_bytes();
        if data.len() < needed {
            return Err(DecodeError::ShortPayload {
                pid: self.pid(),
                needed,
                got: data.len(),
            });
        }

        Ok(self.formula(&data[..needed]))
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One decoded sensor value.
///
/// Outside this crate a reading can only be built from a [`Reply`], which
/// the pipeline produces once a complete frame has been scanned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Which sensor was queried
    pub kind: SensorKind,
    /// Decoded value, `None` when the reply carried no usable data
    pub value: Option<f64>,
    /// Reply text as received, without the prompt
    pub raw: String,
    /// Timestamp when the frame was received (Unix ms)
    pub timestamp_ms: u64,
}

impl SensorReading {
    /// Reading for a completed sensor exchange; a decode failure leaves
    /// `value` empty
    pub fn from_reply(kind: SensorKind, reply: Reply<f64>) -> Self {
        let raw = reply.raw();
        Self::new(kind, reply.value.ok(), raw)
    }

    pub(crate) fn new(kind: SensorKind, value: Option<f64>, raw: String) -> Self {
        let timestamp_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            kind,
            value,
            raw,
            timestamp_ms,
        }
    }
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(v) if self.kind == SensorKind::Rpm => {
                write!(f, "{}: {:.0} {}", self.kind, v, self.kind.unit())
            }
            Some(v) => write!(f, "{}: {:.1} {}", self.kind, v, self.kind.unit()),
            None => write!(f, "{}: no data", self.kind),
        }
    }
}
