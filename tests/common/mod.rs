#![allow(dead_code)]
//! Scripted stand-in for a serial-attached board.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use colorlink::device::{ConnectError, Connector, DeviceIo, Session, SessionConfig};

#[derive(Default)]
struct FakeState {
    fail_opens: usize,
    fail_writes: usize,
    fail_polls: usize,
    fail_reads: usize,
    banner: Vec<u8>,
    replies: VecDeque<Vec<u8>>,
    stream: Option<Vec<u8>>,
    rx: VecDeque<u8>,
    written: Vec<u8>,
    opens: usize,
    write_calls: usize,
    failed_writes: usize,
    open_handles: usize,
}

#[derive(Clone, Default)]
pub struct FakeDevice {
    inner: Arc<Mutex<FakeState>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector(self.clone())
    }

    pub fn session(&self, config: SessionConfig) -> Session {
        Session::new(config, self.connector())
    }

    pub fn fail_next_opens(&self, n: usize) {
        self.inner.lock().unwrap().fail_opens = n;
    }

    pub fn fail_next_writes(&self, n: usize) {
        self.inner.lock().unwrap().fail_writes = n;
    }

    pub fn fail_next_polls(&self, n: usize) {
        self.inner.lock().unwrap().fail_polls = n;
    }

    pub fn fail_next_reads(&self, n: usize) {
        self.inner.lock().unwrap().fail_reads = n;
    }

    /// Bytes that arrive on their own, outside any exchange.
    pub fn push_input(&self, bytes: &[u8]) {
        self.inner.lock().unwrap().rx.extend(bytes.iter().copied());
    }

    /// Bytes the board prints right after the port opens.
    pub fn set_banner(&self, bytes: &[u8]) {
        self.inner.lock().unwrap().banner = bytes.to_vec();
    }

    /// Queue the reply to the next complete frame written.
    pub fn reply_with(&self, bytes: &[u8]) {
        self.inner.lock().unwrap().replies.push_back(bytes.to_vec());
    }

    /// Make the board print `chunk` forever.
    pub fn stream_forever(&self, chunk: &[u8]) {
        self.inner.lock().unwrap().stream = Some(chunk.to_vec());
    }

    pub fn opens(&self) -> usize {
        self.inner.lock().unwrap().opens
    }

    pub fn write_calls(&self) -> usize {
        self.inner.lock().unwrap().write_calls
    }

    pub fn failed_writes(&self) -> usize {
        self.inner.lock().unwrap().failed_writes
    }

    pub fn open_handles(&self) -> usize {
        self.inner.lock().unwrap().open_handles
    }

    pub fn written_text(&self) -> String {
        String::from_utf8(self.inner.lock().unwrap().written.clone()).unwrap()
    }
}

pub struct FakeConnector(FakeDevice);

impl Connector for FakeConnector {
    fn open(&self, config: &SessionConfig) -> Result<Box<dyn DeviceIo>, ConnectError> {
        let mut state = self.0.inner.lock().unwrap();
        state.opens += 1;
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(ConnectError::NotFound {
                port: config.port.clone(),
            });
        }
        let banner = std::mem::take(&mut state.banner);
        state.rx.extend(banner);
        state.open_handles += 1;
        Ok(Box::new(FakePort {
            device: self.0.clone(),
        }))
    }
}

struct FakePort {
    device: FakeDevice,
}

impl Write for FakePort {
    /// Accepts one to three bytes per call, like a UART with a tiny buffer,
    /// so `write_all` has to loop.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.device.inner.lock().unwrap();
        state.write_calls += 1;
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            state.failed_writes += 1;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        let accepted = &buf[..buf.len().min(1 + state.write_calls % 3)];
        state.written.extend_from_slice(accepted);
        if accepted.ends_with(b"\n") {
            if let Some(reply) = state.replies.pop_front() {
                state.rx.extend(reply);
            }
        }
        Ok(accepted.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for FakePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.device.inner.lock().unwrap();
        if state.fail_reads > 0 {
            state.fail_reads -= 1;
            return Err(io::Error::new(io::ErrorKind::Other, "read failed"));
        }
        let n = buf.len().min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl DeviceIo for FakePort {
    fn bytes_to_read(&self) -> io::Result<u32> {
        let mut state = self.device.inner.lock().unwrap();
        if state.fail_polls > 0 {
            state.fail_polls -= 1;
            return Err(io::Error::new(io::ErrorKind::Other, "poll failed"));
        }
        if state.rx.is_empty() {
            if let Some(chunk) = state.stream.clone() {
                state.rx.extend(chunk);
            }
        }
        Ok(state.rx.len() as u32)
    }
}

impl Drop for FakePort {
    fn drop(&mut self) {
        self.device.inner.lock().unwrap().open_handles -= 1;
    }
}

/// Timing suitable for tests: no settle or response delay, short drain.
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        port: "/dev/ttyFAKE0".to_string(),
        settle_delay: Duration::ZERO,
        response_delay: Duration::ZERO,
        drain_window: Duration::from_millis(50),
        ..SessionConfig::default()
    }
}
