//! Bus-level SCPI transport.
//!
//! Hardware-agnostic interface for SCPI command execution. Implementations in
//! [`crate::adapters`] handle protocol-specific details (VISA, RS-232, scripted
//! mock). Transports do not retry: a retry would silently stretch the sampling
//! period of whatever loop sits on top.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// Line-oriented command/response channel to one instrument.
#[async_trait]
pub trait ScpiTransport: Send {
    /// Send a command without reading a response (e.g. "*RST", "OUTP ON").
    async fn write(&mut self, cmd: &str) -> Result<()>;

    /// Send a query and return the trimmed response (e.g. "*IDN?").
    async fn query(&mut self, cmd: &str) -> Result<String>;

    /// Per-call timeout. Drivers also bound each call by it.
    fn timeout(&self) -> Duration;

    /// Short human-readable description, for logs.
    fn info(&self) -> String;
}

#[async_trait]
impl<T: ScpiTransport + ?Sized> ScpiTransport for Box<T> {
    async fn write(&mut self, cmd: &str) -> Result<()> {
        (**self).write(cmd).await
    }

    async fn query(&mut self, cmd: &str) -> Result<String> {
        (**self).query(cmd).await
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn info(&self) -> String {
        (**self).info()
    }
}
