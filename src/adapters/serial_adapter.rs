//! RS-232 SCPI transport.
//!
//! The 2400 can be driven over its rear RS-232 port instead of GPIB. Built only
//! with `--features instrument_serial`.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::{AppResult, MpptError};
use crate::instrument::ScpiTransport;

#[cfg(feature = "instrument_serial")]
use anyhow::{anyhow, Context};
#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;
#[cfg(feature = "instrument_serial")]
use std::sync::{Arc, Mutex, PoisonError};
#[cfg(feature = "instrument_serial")]
use tracing::debug;

/// Serial adapter for RS-232 communication
///
/// Wraps the serialport crate and runs its blocking I/O on Tokio's blocking pool.
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// Baud rate (e.g., 9600, 19200)
    baud_rate: u32,

    /// Read timeout for a whole response
    timeout: Duration,

    /// Line terminator for commands
    line_terminator: String,

    /// Response line ending character
    response_delimiter: u8,

    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialAdapter {
    /// Create a new serial adapter with default settings
    ///
    /// # Arguments
    /// * `port_name` - Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    /// * `baud_rate` - Communication speed, must match the instrument's RS-232 menu
    pub fn new(port_name: String, baud_rate: u32) -> Self {
        Self {
            port_name,
            baud_rate,
            timeout: Duration::from_secs(1),
            line_terminator: "\r".to_string(),
            response_delimiter: b'\r',
            #[cfg(feature = "instrument_serial")]
            port: None,
        }
    }

    /// Set the per-call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the command terminator
    pub fn with_line_terminator(mut self, terminator: String) -> Self {
        self.line_terminator = terminator;
        self
    }

    /// Set the byte that ends a response
    pub fn with_response_delimiter(mut self, delimiter: u8) -> Self {
        self.response_delimiter = delimiter;
        self
    }

    /// Open the serial port.
    #[cfg(feature = "instrument_serial")]
    pub async fn open(&mut self) -> AppResult<()> {
        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(Duration::from_millis(100)) // Internal read timeout
            .open()
            .with_context(|| {
                format!(
                    "Failed to open serial port '{}' at {} baud",
                    self.port_name, self.baud_rate
                )
            })?;

        self.port = Some(Arc::new(Mutex::new(port)));
        debug!(
            "Serial port '{}' opened at {} baud",
            self.port_name, self.baud_rate
        );
        Ok(())
    }

    /// Always fails: serial support is compiled out.
    #[cfg(not(feature = "instrument_serial"))]
    pub async fn open(&mut self) -> AppResult<()> {
        Err(MpptError::FeatureNotEnabled("instrument_serial".to_string()))
    }

    /// Close the port. Closing an unopened adapter is a no-op.
    pub async fn close(&mut self) -> AppResult<()> {
        #[cfg(feature = "instrument_serial")]
        {
            if self.port.take().is_some() {
                debug!("Serial port '{}' closed", self.port_name);
            }
        }
        Ok(())
    }

    #[cfg(feature = "instrument_serial")]
    fn port(&self) -> Result<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port
            .clone()
            .ok_or_else(|| anyhow::Error::new(MpptError::NotConnected))
    }
}

#[cfg(feature = "instrument_serial")]
fn write_line(port: &mut dyn SerialPort, line: &str) -> Result<()> {
    use std::io::Write;

    port.write_all(line.as_bytes())
        .context("Failed to write to serial port")?;
    port.flush().context("Failed to flush serial port")?;
    Ok(())
}

#[cfg(feature = "instrument_serial")]
fn read_until(port: &mut dyn SerialPort, delimiter: u8, timeout: Duration) -> Result<String> {
    use std::io::Read;
    use std::time::Instant;

    let start = Instant::now();
    let mut response = Vec::new();
    let mut buf = [0u8; 256];

    loop {
        if start.elapsed() > timeout {
            return Err(anyhow!("Serial read timeout after {:?}", timeout));
        }
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                response.extend_from_slice(&buf[..n]);
                if buf[..n].contains(&delimiter) {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => return Err(e).context("Failed to read from serial port"),
        }
    }

    Ok(String::from_utf8_lossy(&response).trim().to_string())
}

#[async_trait]
impl ScpiTransport for SerialAdapter {
    #[cfg(feature = "instrument_serial")]
    async fn write(&mut self, cmd: &str) -> Result<()> {
        let port = self.port()?;
        let line = format!("{}{}", cmd, self.line_terminator);
        let cmd = cmd.to_string();

        tokio::task::spawn_blocking(move || {
            let mut guard = port.lock().unwrap_or_else(PoisonError::into_inner);
            write_line(&mut **guard, &line)?;
            debug!("Sent serial command: {}", cmd);
            Ok(())
        })
        .await
        .context("Serial I/O task panicked")?
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn write(&mut self, _cmd: &str) -> Result<()> {
        Err(MpptError::FeatureNotEnabled("instrument_serial".to_string()).into())
    }

    #[cfg(feature = "instrument_serial")]
    async fn query(&mut self, cmd: &str) -> Result<String> {
        let port = self.port()?;
        let line = format!("{}{}", cmd, self.line_terminator);
        let cmd = cmd.to_string();
        let delimiter = self.response_delimiter;
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || {
            let mut guard = port.lock().unwrap_or_else(PoisonError::into_inner);
            write_line(&mut **guard, &line)?;
            let response = read_until(&mut **guard, delimiter, timeout)
                .with_context(|| format!("No response to '{}'", cmd))?;
            debug!("Serial query '{}' -> '{}'", cmd, response);
            Ok(response)
        })
        .await
        .context("Serial I/O task panicked")?
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn query(&mut self, _cmd: &str) -> Result<String> {
        Err(MpptError::FeatureNotEnabled("instrument_serial".to_string()).into())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn info(&self) -> String {
        format!("SerialAdapter({} @ {} baud)", self.port_name, self.baud_rate)
    }
}
