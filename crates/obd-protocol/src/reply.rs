//! Adapter Reply Parsing
//!
//! Turns the text of a frame into raw data bytes, recognising the status
//! replies an ELM327 prints in place of data.

use crate::error::DecodeError;
use crate::framer::Frame;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status replies printed by the adapter instead of vehicle data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterReply {
    /// Vehicle did not answer the request
    NoData,
    /// Adapter did not understand the command
    Unknown,
    /// No protocol could be negotiated with the vehicle
    UnableToConnect,
    /// Request interrupted by incoming bytes
    Stopped,
    /// CAN bus problem
    CanError,
    /// K-line/J1850 bus initialisation failed
    BusInitError,
    /// Adapter receive buffer overflowed
    BufferFull,
}

impl AdapterReply {
    /// Match one line of adapter output against the known status replies
    pub fn from_line(line: &str) -> Option<Self> {
        let compact: String = line
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();

        match compact.as_str() {
            "NODATA" => Some(AdapterReply::NoData),
            "?" => Some(AdapterReply::Unknown),
            "UNABLETOCONNECT" => Some(AdapterReply::UnableToConnect),
            "STOPPED" => Some(AdapterReply::Stopped),
            "CANERROR" => Some(AdapterReply::CanError),
            "BUFFERFULL" => Some(AdapterReply::BufferFull),
            s if s.starts_with("BUSINIT") && s.contains("ERROR") => {
                Some(AdapterReply::BusInitError)
            }
            _ => None,
        }
    }
}

impl fmt::Display for AdapterReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AdapterReply::NoData => "NO DATA",
            AdapterReply::Unknown => "?",
            AdapterReply::UnableToConnect => "UNABLE TO CONNECT",
            AdapterReply::Stopped => "STOPPED",
            AdapterReply::CanError => "CAN ERROR",
            AdapterReply::BusInitError => "BUS INIT: ERROR",
            AdapterReply::BufferFull => "BUFFER FULL",
        };
        f.write_str(text)
    }
}

/// Lines of the frame that carry content.
///
/// Drops blank lines, the `SEARCHING...` progress line printed during
/// automatic protocol detection, and an echo of `request` if echo is still on.
pub fn data_lines<'a>(text: &'a str, request: &str) -> Vec<&'a str> {
    text.split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.eq_ignore_ascii_case("SEARCHING..."))
        .filter(|line| !line.eq_ignore_ascii_case(request))
        .collect()
}

/// Parse the hex payload of a data frame into bytes
pub fn hex_bytes(frame: &Frame, request: &str) -> Result<Vec<u8>, DecodeError> {
    let text = frame.text();
    let lines = data_lines(&text, request);

    if let Some(status) = lines.iter().find_map(|line| AdapterReply::from_line(line)) {
        return Err(DecodeError::Adapter(status));
    }

    let digits: String = lines
        .concat()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    if digits.is_empty() {
        return Err(DecodeError::Empty);
    }
    if digits.len() % 2 != 0 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DecodeError::NotHex(digits));
    }

    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| DecodeError::NotHex(digits.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_replies() {
        assert_eq!(AdapterReply::from_line("NO DATA"), Some(AdapterReply::NoData));
        assert_eq!(AdapterReply::from_line(" ? "), Some(AdapterReply::Unknown));
        assert_eq!(
            AdapterReply::from_line("BUS INIT: ...ERROR"),
            Some(AdapterReply::BusInitError)
        );
        assert_eq!(AdapterReply::from_line("41 0C 1A F8"), None);
    }

    #[test]
    fn test_hex_bytes_skips_searching_and_echo() {
        let frame = Frame::from("010C\rSEARCHING...\r41 0C 1A F8\r\r");
        assert_eq!(hex_bytes(&frame, "010C").unwrap(), vec![0x41, 0x0C, 0x1A, 0xF8]);
    }

    #[test]
    fn test_hex_bytes_reports_no_data() {
        let frame = Frame::from("NO DATA\r\r");
        assert_eq!(
            hex_bytes(&frame, "010D"),
            Err(DecodeError::Adapter(AdapterReply::NoData))
        );
    }

    #[test]
    fn test_hex_bytes_rejects_garbage() {
        assert!(matches!(
            hex_bytes(&Frame::from("41 0Z"), "010C"),
            Err(DecodeError::NotHex(_))
        ));
        assert_eq!(hex_bytes(&Frame::from("\r\r"), "010C"), Err(DecodeError::Empty));
    }
}
