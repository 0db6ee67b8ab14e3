use std::io::{ErrorKind, Read, Write};

use log::{debug, info, trace, warn};
use tokio::time::{sleep, Duration, Instant};

use super::{ConnectError, Connector, DeviceIo, LinkError, LinkState, SessionConfig};
use crate::color::ColorCommand;
use crate::logutil::{escape_log, hex_snippet};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const READ_CHUNK: usize = 256;
const STALE_INPUT_LIMIT: usize = 4096;

/// One serial handle to one configured device.
///
/// The session never panics on device errors: opening failures come back as
/// [`ConnectError`], write failures as [`LinkError`], and read trouble while
/// draining is folded into the returned lines and the [`LinkState`].
pub struct Session {
    config: SessionConfig,
    connector: Box<dyn Connector>,
    port: Option<Box<dyn DeviceIo>>,
    state: LinkState,
}

impl Session {
    pub fn new<C: Connector + 'static>(config: SessionConfig, connector: C) -> Self {
        Self {
            config,
            connector: Box::new(connector),
            port: None,
            state: LinkState::Disconnected,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Open the configured port, replacing any handle still held.
    ///
    /// On success the session waits the settle delay before it reports
    /// `Connected`, then discards whatever the firmware printed while booting.
    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        if self.port.take().is_some() {
            debug!("Releasing previous handle on {} before reconnecting", self.config.port);
        }
        info!(
            "Opening serial device on {} at {} baud",
            self.config.port, self.config.baud_rate
        );
        match self.connector.open(&self.config) {
            Ok(port) => {
                self.port = Some(port);
                if !self.config.settle_delay.is_zero() {
                    debug!("Waiting {:?} for device to settle", self.config.settle_delay);
                    sleep(self.config.settle_delay).await;
                }
                self.purge_startup_output();
                self.state = LinkState::Connected;
                info!("Connected to device on {}", self.config.port);
                Ok(())
            }
            Err(e) => {
                self.state = LinkState::Disconnected;
                warn!("Failed to connect to device: {}", e);
                Err(e)
            }
        }
    }

    /// Write one framed command.
    ///
    /// Input still waiting from an earlier exchange is discarded first so it
    /// cannot be mistaken for the reply to this command.
    pub fn write_command(&mut self, cmd: &ColorCommand) -> Result<(), LinkError> {
        let stale = self.take_pending_input(STALE_INPUT_LIMIT);
        if !stale.is_empty() {
            debug!(
                "Discarded {} stale bytes before write: {}",
                stale.len(),
                escape_log(&String::from_utf8_lossy(&stale))
            );
        }
        let Some(port) = self.port.as_mut() else {
            return Err(LinkError::NotConnected);
        };
        let frame = cmd.frame();
        match port
            .write_all(frame.as_bytes())
            .and_then(|_| port.flush())
        {
            Ok(()) => {
                self.state = LinkState::Connected;
                debug!("Sent to device: {}", escape_log(&frame));
                Ok(())
            }
            Err(e) => {
                self.state = LinkState::Degraded;
                warn!("Error writing to {}: {}", self.config.port, e);
                Err(LinkError::Io(e))
            }
        }
    }

    /// Collect the device's reply lines after a write.
    ///
    /// Waits the configured response delay, then reads while input keeps
    /// arriving. Stops at `max_wait` or once no input is pending. Lines past
    /// the configured limit are read and dropped so they do not leak into
    /// the next exchange. A read error ends the drain and degrades the link.
    pub async fn drain_responses(&mut self, max_wait: Duration) -> Vec<String> {
        let mut lines = Vec::new();
        if self.port.is_none() {
            return lines;
        }
        if !self.config.response_delay.is_zero() {
            sleep(self.config.response_delay).await;
        }

        let deadline = Instant::now() + max_wait;
        let max_lines = self.config.max_response_lines;
        let mut pending: Vec<u8> = Vec::new();
        let mut dropped = 0usize;
        let mut buf = [0u8; READ_CHUNK];

        loop {
            let Some(port) = self.port.as_mut() else {
                break;
            };
            let full = lines.len() >= max_lines;
            let available = match port.bytes_to_read() {
                Ok(n) => n as usize,
                Err(e) => {
                    self.state = LinkState::Degraded;
                    warn!("Error polling {}: {}", self.config.port, e);
                    break;
                }
            };
            if available == 0 {
                // A partial line may still be in flight; give it until the deadline.
                if full || pending.is_empty() || Instant::now() >= deadline {
                    break;
                }
                sleep(POLL_INTERVAL).await;
                continue;
            }
            let want = available.min(READ_CHUNK);
            match port.read(&mut buf[..want]) {
                Ok(n) => {
                    trace!("RAW {} bytes: {}", n, hex_snippet(&buf[..n], 32));
                    if full {
                        dropped += n;
                    } else {
                        pending.extend_from_slice(&buf[..n]);
                        split_lines(&mut pending, &mut lines, max_lines);
                        if lines.len() >= max_lines {
                            dropped += pending.len();
                            pending.clear();
                        }
                    }
                }
                Err(ref e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {}
                Err(e) => {
                    self.state = LinkState::Degraded;
                    warn!("Error reading from {}: {}", self.config.port, e);
                    break;
                }
            }
            if Instant::now() >= deadline {
                debug!("Response drain window of {:?} elapsed", max_wait);
                break;
            }
        }

        if dropped > 0 {
            debug!(
                "Dropped {} bytes past the {}-line response limit",
                dropped, max_lines
            );
        }
        if let Some(line) = decode_line(&pending) {
            lines.push(line);
        }
        for line in &lines {
            info!("Device says: {}", escape_log(line));
        }
        lines
    }

    /// Release the handle. Safe to call any number of times.
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Serial connection on {} closed", self.config.port);
        }
        self.state = LinkState::Disconnected;
    }

    fn purge_startup_output(&mut self) {
        let boot = self.take_pending_input(STALE_INPUT_LIMIT);
        if !boot.is_empty() {
            info!(
                "Device startup output: {}",
                escape_log(&String::from_utf8_lossy(&boot))
            );
        }
    }

    /// Read and return input that is already waiting, up to `limit` bytes.
    fn take_pending_input(&mut self, limit: usize) -> Vec<u8> {
        let mut taken = Vec::new();
        let Some(port) = self.port.as_mut() else {
            return taken;
        };
        let mut buf = [0u8; READ_CHUNK];
        while taken.len() < limit {
            let available = match port.bytes_to_read() {
                Ok(0) => break,
                Ok(n) => n as usize,
                Err(e) => {
                    debug!("Could not poll {} for pending input: {}", self.config.port, e);
                    break;
                }
            };
            let want = available.min(READ_CHUNK).min(limit - taken.len());
            match port.read(&mut buf[..want]) {
                Ok(0) => break,
                Ok(n) => taken.extend_from_slice(&buf[..n]),
                Err(e) => {
                    debug!("Could not read pending input from {}: {}", self.config.port, e);
                    break;
                }
            }
        }
        taken
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("port", &self.config.port)
            .field("state", &self.state)
            .finish()
    }
}

/// Move every complete line out of `pending` into `lines`, up to `max`.
fn split_lines(pending: &mut Vec<u8>, lines: &mut Vec<String>, max: usize) {
    while lines.len() < max {
        let Some(pos) = pending.iter().position(|&b| b == b'\n') else {
            break;
        };
        let raw: Vec<u8> = pending.drain(..=pos).collect();
        if let Some(line) = decode_line(&raw) {
            lines.push(line);
        }
    }
}

/// Decode one line; blank lines yield `None`, undecodable bytes a diagnostic.
fn decode_line(raw: &[u8]) -> Option<String> {
    match std::str::from_utf8(raw) {
        Ok(text) => {
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        }
        Err(_) => {
            let trimmed = raw
                .strip_suffix(b"\n")
                .unwrap_or(raw);
            let trimmed = trimmed.strip_suffix(b"\r").unwrap_or(trimmed);
            warn!("Received non-UTF-8 data from device ({} bytes)", trimmed.len());
            Some(format!(
                "<non-UTF-8 data: {} bytes: {}>",
                trimmed.len(),
                hex_snippet(trimmed, 16)
            ))
        }
    }
}
