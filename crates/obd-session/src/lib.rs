//! OBD-II Diagnostic Session
//!
//! Connects to the selected adapter, runs the ELM327 initialisation
//! sequence and polls engine speed, vehicle speed and fuel level.

mod diagnostic;
mod error;
mod settings;

pub use diagnostic::DiagnosticSession;
pub use error::{ConfigError, SessionError};
pub use settings::{load_config, SessionConfig};
