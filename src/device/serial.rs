use super::{ConnectError, Connector, DeviceIo, SessionConfig};

/// Opens the configured port through the `serialport` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

#[cfg(feature = "serial")]
impl DeviceIo for Box<dyn serialport::SerialPort> {
    fn bytes_to_read(&self) -> std::io::Result<u32> {
        serialport::SerialPort::bytes_to_read(&**self).map_err(std::io::Error::from)
    }
}

#[cfg(feature = "serial")]
impl Connector for SerialConnector {
    fn open(&self, config: &SessionConfig) -> Result<Box<dyn DeviceIo>, ConnectError> {
        let mut builder =
            serialport::new(config.port.as_str(), config.baud_rate).timeout(config.read_timeout);
        // Some USB serial adapters need explicit settings
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let mut port = builder
            .open()
            .map_err(|e| classify(&config.port, e))?;
        let _ = port.write_data_terminal_ready(true);
        let _ = port.write_request_to_send(true);
        Ok(Box::new(port))
    }
}

#[cfg(feature = "serial")]
fn classify(port: &str, err: serialport::Error) -> ConnectError {
    use serialport::ErrorKind;
    let port = port.to_string();
    match err.kind() {
        ErrorKind::NoDevice => ConnectError::Busy { port },
        ErrorKind::Io(std::io::ErrorKind::NotFound) => ConnectError::NotFound { port },
        ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            ConnectError::PermissionDenied { port }
        }
        _ => ConnectError::Other {
            port,
            message: err.to_string(),
        },
    }
}

#[cfg(not(feature = "serial"))]
impl Connector for SerialConnector {
    fn open(&self, config: &SessionConfig) -> Result<Box<dyn DeviceIo>, ConnectError> {
        log::warn!("Serial support not compiled in; cannot open {}", config.port);
        Err(ConnectError::Unsupported {
            port: config.port.clone(),
        })
    }
}
