//! Command Descriptors
//!
//! A command pairs the request text with a response deadline and the
//! decoder applied to its reply frame. Descriptors are reusable.

use crate::error::DecodeError;
use crate::framer::Frame;
use crate::pid::SensorKind;
use crate::protocol::ObdProtocol;
use crate::reply::{self, AdapterReply};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type Decoder<T> = Arc<dyn Fn(&Frame) -> Result<T, DecodeError> + Send + Sync>;

/// A request/response exchange with the adapter
pub struct Command<T> {
    request: String,
    timeout: Duration,
    decoder: Decoder<T>,
}

impl<T> Command<T> {
    pub fn new<F>(request: impl Into<String>, timeout: Duration, decoder: F) -> Self
    where
        F: Fn(&Frame) -> Result<T, DecodeError> + Send + Sync + 'static,
    {
        Self {
            request: request.into(),
            timeout,
            decoder: Arc::new(decoder),
        }
    }

    pub fn request(&self) -> &str {
        &self.request
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Same command with a different deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn decode(&self, frame: &Frame) -> Result<T, DecodeError> {
        (self.decoder)(frame)
    }
}

impl Command<String> {
    /// Adapter configuration command; decodes to the acknowledgement text
    pub fn at(request: impl Into<String>, timeout: Duration) -> Self {
        let request = request.into();
        let echo = request.clone();
        Self::new(request, timeout, move |frame| {
            let text = frame.text();
            let lines = reply::data_lines(&text, &echo);
            if let Some(status) = lines.iter().find_map(|l| AdapterReply::from_line(l)) {
                return Err(DecodeError::Adapter(status));
            }
            match lines.last() {
                Some(last) => Ok(last.to_string()),
                None => Err(DecodeError::Empty),
            }
        })
    }

    /// `ATE0`: stop echoing requests
    pub fn echo_off(timeout: Duration) -> Self {
        Self::at("ATE0", timeout)
    }

    /// `ATL0`: no linefeed after carriage returns
    pub fn linefeed_off(timeout: Duration) -> Self {
        Self::at("ATL0", timeout)
    }

    /// `ATST<hh>`: adapter-side response timeout in units of 4 ms
    pub fn adapter_timeout(units: u8, timeout: Duration) -> Self {
        Self::at(format!("ATST{units:02X}"), timeout)
    }

    /// `ATSP<n>`: select the vehicle bus protocol
    pub fn select_protocol(protocol: ObdProtocol, timeout: Duration) -> Self {
        Self::at(protocol.to_elm_command(), timeout)
    }
}

impl Command<f64> {
    /// Mode 01 query for one sensor
    pub fn sensor(kind: SensorKind, timeout: Duration) -> Self {
        Self::new(kind.request(), timeout, move |frame| kind.decode(frame))
    }
}

impl<T> Clone for Command<T> {
    fn clone(&self) -> Self {
        Self {
            request: self.request.clone(),
            timeout: self.timeout,
            decoder: Arc::clone(&self.decoder),
        }
    }
}

impl<T> fmt::Debug for Command<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("request", &self.request)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Outcome of one exchange: the frame as received plus its decode result
#[derive(Debug, Clone)]
pub struct Reply<T> {
    pub frame: Frame,
    pub value: Result<T, DecodeError>,
}

impl<T> Reply<T> {
    /// Reply text, trimmed of surrounding line breaks
    pub fn raw(&self) -> String {
        self.frame.text().trim().to_string()
    }

    pub fn into_result(self) -> Result<T, DecodeError> {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_millis(500);

    #[test]
    fn test_init_requests() {
        assert_eq!(Command::echo_off(T).request(), "ATE0");
        assert_eq!(Command::linefeed_off(T).request(), "ATL0");
        assert_eq!(Command::adapter_timeout(10, T).request(), "ATST0A");
        assert_eq!(Command::select_protocol(ObdProtocol::Auto, T).request(), "ATSP0");
    }

    #[test]
    fn test_at_acknowledgement() {
        let cmd = Command::echo_off(T);
        assert_eq!(cmd.decode(&Frame::from("ATE0\rOK\r\r")).unwrap(), "OK");
        assert_eq!(
            cmd.decode(&Frame::from("?\r")),
            Err(DecodeError::Adapter(AdapterReply::Unknown))
        );
    }

    #[test]
    fn test_sensor_command_reusable() {
        let cmd = Command::sensor(SensorKind::Speed, T);
        let copy = cmd.clone().with_timeout(Duration::from_secs(1));
        assert_eq!(cmd.decode(&Frame::from("41 0D 10")).unwrap(), 16.0);
        assert_eq!(copy.decode(&Frame::from("41 0D 11")).unwrap(), 17.0);
        assert_eq!(copy.timeout(), Duration::from_secs(1));
        assert_eq!(cmd.timeout(), T);
    }

    #[test]
    fn test_reply_raw_trims() {
        let reply: Reply<f64> = Reply {
            frame: Frame::from("41 0D 32\r\r"),
            value: Ok(50.0),
        };
        assert_eq!(reply.raw(), "41 0D 32");
        assert_eq!(reply.into_result(), Ok(50.0));
    }
}
