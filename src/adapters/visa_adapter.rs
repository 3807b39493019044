//! VISA Hardware Adapter for GPIB/USB/Ethernet instruments
//!
//! Provides a [`ScpiTransport`] over the VISA library, supporting instruments via
//! GPIB, USB, Ethernet, etc. Built only with `--features instrument_visa`; without
//! it the adapter can still be constructed but refuses to open.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::{AppResult, MpptError};
use crate::instrument::ScpiTransport;

#[cfg(feature = "instrument_visa")]
use anyhow::{anyhow, Context};
#[cfg(feature = "instrument_visa")]
use std::sync::{Arc, Mutex, PoisonError};
#[cfg(feature = "instrument_visa")]
use tracing::debug;
#[cfg(feature = "instrument_visa")]
use visa_rs::prelude::*;

/// VISA transport for SCPI instruments
///
/// VISA calls block, so every operation runs on Tokio's blocking pool.
///
/// Supports resource strings like:
/// - "GPIB0::24::INSTR" (GPIB interface)
/// - "USB0::0x05E6::0x2400::SERIAL::INSTR" (USB)
/// - "TCPIP0::192.168.1.100::INSTR" (Ethernet/LXI)
pub struct VisaAdapter {
    /// VISA resource string (e.g., "GPIB0::24::INSTR")
    pub(crate) resource_string: String,

    /// Read/write timeout
    pub(crate) timeout: Duration,

    /// Line terminator for commands (typically "\n" for SCPI)
    pub(crate) line_terminator: String,

    #[cfg(feature = "instrument_visa")]
    instrument: Option<Arc<Mutex<Instrument>>>,
}

impl VisaAdapter {
    /// Create a new, unopened VISA adapter with default settings
    pub fn new(resource_string: String) -> Self {
        Self {
            resource_string,
            timeout: Duration::from_secs(5),
            line_terminator: "\n".to_string(),
            #[cfg(feature = "instrument_visa")]
            instrument: None,
        }
    }

    /// Set read/write timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set line terminator for commands
    pub fn with_line_terminator(mut self, terminator: String) -> Self {
        self.line_terminator = terminator;
        self
    }

    /// Whether a session is currently held.
    pub fn is_open(&self) -> bool {
        #[cfg(feature = "instrument_visa")]
        {
            self.instrument.is_some()
        }

        #[cfg(not(feature = "instrument_visa"))]
        {
            false
        }
    }

    /// Open the VISA session.
    #[cfg(feature = "instrument_visa")]
    pub async fn open(&mut self) -> AppResult<()> {
        let resource = self.resource_string.clone();
        let timeout = self.timeout;

        let instrument = tokio::task::spawn_blocking(move || -> Result<Instrument> {
            let rm = DefaultRM::new().map_err(|e| anyhow!("Failed to create VISA resource manager: {:?}", e))?;
            let name = std::ffi::CString::new(resource.clone())
                .with_context(|| format!("Invalid VISA resource string: {}", resource))?;
            let instrument = rm
                .open(&name.into(), AccessMode::NO_LOCK, timeout)
                .map_err(|e| anyhow!("Failed to open VISA resource '{}': {:?}", resource, e))?;

            // Session I/O timeout, separate from the open timeout above
            let timeout_ms = session_timeout_ms(timeout);
            let attr = AttrTmoValue::new_checked(timeout_ms)
                .ok_or_else(|| anyhow!("VISA timeout {}ms out of range", timeout_ms))?;
            instrument
                .set_attr(attr)
                .map_err(|e| anyhow!("Failed to set VISA timeout to {}ms: {:?}", timeout_ms, e))?;
            Ok(instrument)
        })
        .await
        .context("VISA open task panicked")??;

        self.instrument = Some(Arc::new(Mutex::new(instrument)));
        debug!(
            "VISA resource '{}' opened with {}ms timeout",
            self.resource_string,
            self.timeout.as_millis()
        );
        Ok(())
    }

    /// Always fails: VISA support is compiled out.
    #[cfg(not(feature = "instrument_visa"))]
    pub async fn open(&mut self) -> AppResult<()> {
        Err(MpptError::FeatureNotEnabled("instrument_visa".to_string()))
    }

    /// Close the VISA session. Closing an unopened adapter is a no-op.
    pub async fn close(&mut self) -> AppResult<()> {
        #[cfg(feature = "instrument_visa")]
        {
            if self.instrument.take().is_some() {
                debug!("VISA resource '{}' closed", self.resource_string);
            }
        }
        Ok(())
    }

    #[cfg(feature = "instrument_visa")]
    fn session(&self) -> Result<Arc<Mutex<Instrument>>> {
        self.instrument
            .clone()
            .ok_or_else(|| anyhow::Error::new(MpptError::NotConnected))
    }
}

/// `VI_ATTR_TMO_VALUE` in milliseconds. Never zero, which VISA reads as "fail immediately".
fn session_timeout_ms(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX).max(1)
}

#[async_trait]
impl ScpiTransport for VisaAdapter {
    #[cfg(feature = "instrument_visa")]
    async fn write(&mut self, cmd: &str) -> Result<()> {
        use std::io::Write;

        let session = self.session()?;
        let line = format!("{}{}", cmd, self.line_terminator);
        let cmd = cmd.to_string();

        tokio::task::spawn_blocking(move || {
            let mut instr = session.lock().unwrap_or_else(PoisonError::into_inner);
            instr
                .write_all(line.as_bytes())
                .with_context(|| format!("VISA write failed for: {}", cmd))?;
            debug!("VISA write sent: {}", cmd);
            Ok(())
        })
        .await
        .context("VISA write task panicked")?
    }

    #[cfg(not(feature = "instrument_visa"))]
    async fn write(&mut self, _cmd: &str) -> Result<()> {
        Err(MpptError::FeatureNotEnabled("instrument_visa".to_string()).into())
    }

    #[cfg(feature = "instrument_visa")]
    async fn query(&mut self, cmd: &str) -> Result<String> {
        use std::io::{BufRead, BufReader, Write};

        let session = self.session()?;
        let line = format!("{}{}", cmd, self.line_terminator);
        let cmd = cmd.to_string();

        tokio::task::spawn_blocking(move || {
            let mut instr = session.lock().unwrap_or_else(PoisonError::into_inner);
            instr
                .write_all(line.as_bytes())
                .with_context(|| format!("VISA write failed for: {}", cmd))?;

            let mut response = String::new();
            BufReader::new(&*instr)
                .read_line(&mut response)
                .with_context(|| format!("VISA read failed for: {}", cmd))?;

            let response = response.trim().to_string();
            debug!("VISA query '{}' -> '{}'", cmd, response);
            Ok(response)
        })
        .await
        .context("VISA query task panicked")?
    }

    #[cfg(not(feature = "instrument_visa"))]
    async fn query(&mut self, _cmd: &str) -> Result<String> {
        Err(MpptError::FeatureNotEnabled("instrument_visa".to_string()).into())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn info(&self) -> String {
        format!(
            "VisaAdapter({} @ {}ms timeout)",
            self.resource_string,
            session_timeout_ms(self.timeout)
        )
    }
}
