//! # Serial Device Communication Module
//!
//! This module owns the physical link to the microcontroller. A [`Session`]
//! holds at most one open handle, tracks its [`LinkState`], and turns every
//! expected device failure (missing port, busy port, write or read error)
//! into a typed error instead of a panic.
//!
//! ## Layers
//!
//! - [`Connector`] opens a handle for a [`SessionConfig`]; [`SerialConnector`]
//!   is the `serialport` backed implementation.
//! - [`DeviceIo`] is the byte-level handle the session talks to.
//! - [`Session`] implements connect, write, response drain and close.
//!
//! ## Configuration
//!
//! ```toml
//! [device]
//! port = "/dev/ttyACM0"
//! baud_rate = 9600
//! settle_delay_ms = 2000
//! drain_window_ms = 500
//! ```

use std::io::{self, Read, Write};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

mod serial;
mod session;

pub use serial::SerialConnector;
pub use session::Session;

/// Link state of the session's handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// No open handle.
    Disconnected,
    /// Handle open and the last operation succeeded.
    Connected,
    /// Handle open but the last write or read failed.
    Degraded,
}

/// Immutable device parameters, supplied once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    /// Wait after opening the port; boards reset when the port opens.
    pub settle_delay: Duration,
    /// Wait after a write before looking for a reply.
    pub response_delay: Duration,
    /// Upper bound for one response drain.
    pub drain_window: Duration,
    pub max_response_lines: usize,
    pub capture_responses: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 9600,
            read_timeout: Duration::from_millis(2000),
            settle_delay: Duration::from_millis(2000),
            response_delay: Duration::from_millis(100),
            drain_window: Duration::from_millis(500),
            max_response_lines: 32,
            capture_responses: true,
        }
    }
}

/// Failure to open the configured port.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("serial port {port} not found")]
    NotFound { port: String },

    #[error("serial port {port} is busy or unavailable")]
    Busy { port: String },

    #[error("permission denied opening {port}")]
    PermissionDenied { port: String },

    #[error("serial support not compiled in (port {port})")]
    Unsupported { port: String },

    #[error("failed to open {port}: {message}")]
    Other { port: String, message: String },
}

/// Failure on an established link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("no open serial handle")]
    NotConnected,

    #[error("serial i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Byte-level access to an open device handle.
pub trait DeviceIo: Read + Write + Send {
    /// Number of bytes that can be read without blocking.
    fn bytes_to_read(&self) -> io::Result<u32>;
}

/// Opens device handles. Kept behind a trait so the session can be driven
/// by something other than real hardware.
pub trait Connector: Send + Sync {
    fn open(&self, config: &SessionConfig) -> Result<Box<dyn DeviceIo>, ConnectError>;
}
