//! Keithley 2400 SourceMeter driver
//!
//! Implements [`SourceMeter`] for the Keithley 2400 family over any
//! [`ScpiTransport`] (GPIB via VISA, or RS-232).
//!
//! ## Wiring
//!
//! The solar simulator's shutter is driven from the TTL output of source 2.
//! The line is active-low: `:SOUR2:TTL 0` opens the shutter and `:SOUR2:TTL 1`
//! closes it. That polarity is private to this driver.
//!
//! ## Measurement format
//!
//! `:MEAS:CURR?` answers with the default element list
//! `<voltage>,<current>,<resistance>,<timestamp>,<status>`. Only the first two
//! fields are used; anything shorter is rejected, as is a non-finite value or
//! the `+9.91E+37` overflow marker in either of them.
//!
//! Every bus call is bounded by [`ScpiTransport::timeout`].

use anyhow::anyhow;
use async_trait::async_trait;
use tracing::{debug, info};

use super::{ScpiTransport, SourceMeter, SourceSettings};
use crate::error::{AppResult, MpptError};
use crate::measurement::Reading;

/// Combined voltage/current measurement query.
pub const MEASURE_QUERY: &str = ":MEAS:CURR?";

/// Magnitude at or above which a reading is the instrument's overflow marker.
pub const OVERFLOW_THRESHOLD: f64 = 9.9e37;

/// Keithley 2400 instrument implementation
pub struct Keithley2400<T: ScpiTransport> {
    transport: T,
}

impl<T: ScpiTransport> Keithley2400<T> {
    /// Wrap an already opened transport.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Give the transport back, e.g. to close it.
    pub fn into_inner(self) -> T {
        self.transport
    }

    async fn write(&mut self, cmd: &str) -> AppResult<()> {
        let limit = self.transport.timeout();
        match tokio::time::timeout(limit, self.transport.write(cmd)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(anyhow!("Write '{}' timed out after {:?}", cmd, limit).into()),
        }
    }

    async fn query(&mut self, cmd: &str) -> AppResult<String> {
        let limit = self.transport.timeout();
        match tokio::time::timeout(limit, self.transport.query(cmd)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(anyhow!("Query '{}' timed out after {:?}", cmd, limit).into()),
        }
    }

    /// Parse a `:MEAS:CURR?` response into a reading.
    pub fn parse_measurement(response: &str) -> AppResult<Reading> {
        let malformed = || MpptError::MalformedResponse {
            command: MEASURE_QUERY.to_string(),
            response: response.to_string(),
        };

        let mut fields = response
            .trim()
            .split(',')
            .map(|f| f.trim().parse::<f64>().ok())
            .map(|value| value.filter(|x| x.is_finite() && x.abs() < OVERFLOW_THRESHOLD));
        let voltage = fields.next().flatten().ok_or_else(malformed)?;
        let current = fields.next().flatten().ok_or_else(malformed)?;
        Ok(Reading::new(voltage, current))
    }
}

#[async_trait]
impl<T: ScpiTransport> SourceMeter for Keithley2400<T> {
    async fn configure(&mut self, settings: &SourceSettings) -> AppResult<()> {
        info!(
            timeout_ms = self.transport.timeout().as_millis() as u64,
            "Configuring Keithley 2400 on {}",
            self.transport.info()
        );

        self.write("*RST").await?;
        self.write("OUTP OFF").await?;
        self.write(if settings.four_wire {
            ":SYST:RSEN 1"
        } else {
            ":SYST:RSEN 0"
        })
        .await?;
        // Keep the source on between measurements
        self.write(":SOUR:CLE:AUTO OFF").await?;
        self.write(":SOUR:FUNC VOLT").await?;
        self.write(&format!(":SOUR:VOLT:RANG {}", settings.voltage_range))
            .await?;
        self.write(&format!(":SOUR:CURR:RANG {}", settings.current_range))
            .await?;
        self.write(&format!(":SOUR:DEL {}", settings.source_delay().as_secs_f64()))
            .await?;
        self.write(&format!(":SENS:CURR:PROT {}", settings.compliance_current))
            .await?;
        self.write(&format!(":SENS:CURR:NPLC {}", settings.nplc))
            .await?;
        // Display updates slow down every reading
        self.write(":DISP:ENAB 0").await?;

        debug!(?settings, "Keithley 2400 configured");
        Ok(())
    }

    async fn set_output_enabled(&mut self, enabled: bool) -> AppResult<()> {
        self.write(if enabled { "OUTP ON" } else { "OUTP OFF" }).await
    }

    async fn set_shutter_open(&mut self, open: bool) -> AppResult<()> {
        self.write(if open { ":SOUR2:TTL 0" } else { ":SOUR2:TTL 1" })
            .await
    }

    async fn set_voltage(&mut self, voltage: f64) -> AppResult<()> {
        self.write(&format!(":SOUR:VOLT {}", voltage)).await
    }

    async fn measure(&mut self) -> AppResult<Reading> {
        let response = self.query(MEASURE_QUERY).await?;
        Self::parse_measurement(&response)
    }

    async fn set_display_enabled(&mut self, enabled: bool) -> AppResult<()> {
        self.write(if enabled { ":DISP:ENAB 1" } else { ":DISP:ENAB 0" })
            .await
    }

    async fn identify(&mut self) -> AppResult<String> {
        self.query("*IDN?").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;
    use std::time::Duration;

    type Driver = Keithley2400<MockAdapter>;

    #[test]
    fn test_parse_full_element_list() {
        let reading =
            Driver::parse_measurement("+6.440000E-01,-1.000000E-02,+9.910000E+37,+1.2E+02,+4.0E+00\r\n")
                .unwrap();
        assert_eq!(reading.voltage, 0.644);
        assert_eq!(reading.current, -0.01);
    }

    #[test]
    fn test_parse_rejects_single_field() {
        let err = Driver::parse_measurement("+6.44E-01").unwrap_err();
        assert!(matches!(err, MpptError::MalformedResponse { .. }));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Driver::parse_measurement("").is_err());
        assert!(Driver::parse_measurement("0.5,overflow").is_err());
    }

    #[test]
    fn test_parse_rejects_non_finite_fields() {
        for response in ["nan,inf", "NaN,-1.0E-02", "+6.0E-01,infinity", "-inf,-1.0E-02"] {
            let err = Driver::parse_measurement(response).unwrap_err();
            assert!(
                matches!(err, MpptError::MalformedResponse { .. }),
                "{} gave {}",
                response,
                err
            );
        }
    }

    #[test]
    fn test_parse_rejects_overflow_marker() {
        assert!(Driver::parse_measurement("+9.91E+37,-1.0E-02").is_err());
        assert!(Driver::parse_measurement("+6.0E-01,-9.91E+37").is_err());
        // Only the first two fields are checked
        assert!(Driver::parse_measurement("+6.0E-01,-1.0E-02,+9.91E+37").is_ok());
    }

    #[tokio::test]
    async fn test_configure_sequence() {
        let adapter = MockAdapter::new();
        let mut keithley = Keithley2400::new(adapter.clone());

        keithley.configure(&SourceSettings::default()).await.unwrap();

        assert_eq!(
            adapter.written(),
            vec![
                "*RST",
                "OUTP OFF",
                ":SYST:RSEN 1",
                ":SOUR:CLE:AUTO OFF",
                ":SOUR:FUNC VOLT",
                ":SOUR:VOLT:RANG 2",
                ":SOUR:CURR:RANG 0.1",
                ":SOUR:DEL 0",
                ":SENS:CURR:PROT 0.1",
                ":SENS:CURR:NPLC 0.01",
                ":DISP:ENAB 0",
            ]
        );
    }

    #[tokio::test]
    async fn test_shutter_polarity_is_inverted() {
        let adapter = MockAdapter::new();
        let mut keithley = Keithley2400::new(adapter.clone());

        keithley.set_shutter_open(true).await.unwrap();
        keithley.set_shutter_open(false).await.unwrap();
        keithley.set_output_enabled(true).await.unwrap();

        assert_eq!(adapter.written(), vec![":SOUR2:TTL 0", ":SOUR2:TTL 1", "OUTP ON"]);
    }

    #[tokio::test]
    async fn test_measure_uses_combined_query() {
        let adapter = MockAdapter::new();
        adapter.respond_to(MEASURE_QUERY, "0.5,-0.002,9.9E37,1.0,0");
        let mut keithley = Keithley2400::new(adapter.clone());

        keithley.set_voltage(0.5).await.unwrap();
        let reading = keithley.measure().await.unwrap();

        assert_eq!(reading, Reading::new(0.5, -0.002));
        assert_eq!(adapter.written(), vec![":SOUR:VOLT 0.5"]);
        assert_eq!(adapter.queried(), vec![MEASURE_QUERY]);
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let adapter = MockAdapter::new();
        adapter.inject_next_failure();
        let mut keithley = Keithley2400::new(adapter);

        let err = keithley.measure().await.unwrap_err();
        assert!(matches!(err, MpptError::Transport(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_transport_times_out() {
        // MockAdapter reports a 1 s timeout
        let adapter = MockAdapter::new().with_latency(Duration::from_secs(2));
        adapter.respond_to(MEASURE_QUERY, "0.5,-0.002");
        let mut keithley = Keithley2400::new(adapter.clone());

        let start = tokio::time::Instant::now();
        let err = keithley.measure().await.unwrap_err();
        assert!(matches!(err, MpptError::Transport(_)));
        assert!(err.to_string().contains("timed out"), "{}", err);
        assert!(start.elapsed() < Duration::from_secs(2));

        let err = keithley.set_voltage(0.5).await.unwrap_err();
        assert!(matches!(err, MpptError::Transport(_)));
        assert!(adapter.written().is_empty());
    }

    #[tokio::test]
    async fn test_source_delay_is_written_in_seconds() {
        let adapter = MockAdapter::new();
        let mut keithley = Keithley2400::new(adapter.clone());
        let settings = SourceSettings {
            source_delay_s: 0.05,
            ..SourceSettings::default()
        };

        keithley.configure(&settings).await.unwrap();

        assert!(adapter.written().contains(&":SOUR:DEL 0.05".to_string()));
    }
}
