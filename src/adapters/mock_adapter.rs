//! Mock SCPI transport for testing
//!
//! Stands in for a bus connection when exercising instrument drivers without
//! hardware. It provides:
//! - Scripted query responses
//! - Controllable failure injection
//! - Command logging for test verification

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::instrument::ScpiTransport;

#[derive(Debug, Default)]
struct MockState {
    responses: HashMap<String, String>,
    written: Vec<String>,
    queried: Vec<String>,
    fail_next: bool,
    latency: Duration,
}

/// Mock SCPI transport
///
/// Clones share state, so a test can hand one clone to a driver and inspect
/// the traffic through another.
///
/// # Example
///
/// ```
/// use mppt_tracker::adapters::MockAdapter;
///
/// let adapter = MockAdapter::new();
/// adapter.respond_to("*IDN?", "KEITHLEY INSTRUMENTS INC.,MODEL 2400,0,C30");
/// assert!(adapter.written().is_empty());
/// ```
#[derive(Clone, Default)]
pub struct MockAdapter {
    state: Arc<Mutex<MockState>>,
}

impl MockAdapter {
    /// Create a new mock adapter with no scripted responses
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated round-trip time applied to every call
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state().latency = latency;
        self
    }

    /// Answer `query` with `response` from now on
    pub fn respond_to(&self, query: &str, response: &str) {
        self.state()
            .responses
            .insert(query.to_string(), response.to_string());
    }

    /// Inject a failure for the next operation
    pub fn inject_next_failure(&self) {
        self.state().fail_next = true;
    }

    /// Commands sent with `write`, in order
    pub fn written(&self) -> Vec<String> {
        self.state().written.clone()
    }

    /// Commands sent with `query`, in order
    pub fn queried(&self) -> Vec<String> {
        self.state().queried.clone()
    }

    /// Clear both logs
    pub fn clear_log(&self) {
        let mut state = self.state();
        state.written.clear();
        state.queried.clear();
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_latency(&self) {
        let latency = self.state().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ScpiTransport for MockAdapter {
    async fn write(&mut self, cmd: &str) -> Result<()> {
        self.simulate_latency().await;
        let mut state = self.state();
        state.written.push(cmd.to_string());
        if std::mem::take(&mut state.fail_next) {
            return Err(anyhow!("Injected failure on write '{}'", cmd));
        }
        Ok(())
    }

    async fn query(&mut self, cmd: &str) -> Result<String> {
        self.simulate_latency().await;
        let mut state = self.state();
        state.queried.push(cmd.to_string());
        if std::mem::take(&mut state.fail_next) {
            return Err(anyhow!("Injected failure on query '{}'", cmd));
        }
        state
            .responses
            .get(cmd)
            .cloned()
            .ok_or_else(|| anyhow!("No scripted response for '{}'", cmd))
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn info(&self) -> String {
        "MockAdapter".to_string()
    }
}
