//! Full tracking runs through the Keithley 2400 driver over the mock bus.

use std::time::Duration;

use mppt_tracker::adapters::MockAdapter;
use mppt_tracker::instrument::Keithley2400;
use mppt_tracker::{MpptError, PowerTracker, TrackerConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;

const IDN: &str = "KEITHLEY INSTRUMENTS INC.,MODEL 2400,1234567,C30";

fn bus() -> MockAdapter {
    let adapter = MockAdapter::new().with_latency(Duration::from_millis(5));
    adapter.respond_to("*IDN?", IDN);
    adapter
}

fn config() -> TrackerConfig {
    TrackerConfig::new(0.6, Duration::from_millis(200), 0.0935, 1.0)
        .with_dark_duration(Duration::from_millis(100))
}

#[tokio::test(start_paused = true)]
async fn test_completed_run_drives_expected_command_sequence() {
    let adapter = bus();
    adapter.respond_to(":MEAS:CURR?", "+6.000000E-01,-1.000000E-02,+9.91E+37,+1.0E+01,+4.0E+00");
    let mut smu = Keithley2400::new(adapter.clone());

    let trace = PowerTracker::with_rng(&mut smu, config(), StdRng::seed_from_u64(5))
        .run()
        .await
        .unwrap();
    assert!(trace.len() > 3);
    assert!(trace.iter().all(|s| s.current == -0.01));

    let written = adapter.written();
    assert_eq!(written[0], "*RST");
    assert_eq!(written[10], ":DISP:ENAB 0");
    // Dark phase: shutter closed (TTL high), 0 V, output on
    assert_eq!(&written[11..14], &[":SOUR2:TTL 1", ":SOUR:VOLT 0", "OUTP ON"]);
    assert!(written.contains(&":SOUR2:TTL 0".to_string()));
    assert!(written.contains(&":SOUR:VOLT 0.58".to_string()));
    assert!(written.contains(&":SOUR:VOLT 0.62".to_string()));

    let n = written.len();
    assert_eq!(&written[n - 3..], &["OUTP OFF", ":SOUR2:TTL 1", ":DISP:ENAB 1"]);
    assert_eq!(adapter.queried()[0], "*IDN?");
}

#[tokio::test(start_paused = true)]
async fn test_malformed_measurement_aborts_with_cleanup() {
    let adapter = bus();
    adapter.respond_to(":MEAS:CURR?", "-221,\"Settings conflict\"");
    let mut smu = Keithley2400::new(adapter.clone());

    let err = PowerTracker::with_rng(&mut smu, config(), StdRng::seed_from_u64(5))
        .run()
        .await
        .unwrap_err();

    let (partial, cause) = err.into_partial().unwrap();
    assert!(partial.is_empty());
    match cause {
        MpptError::MalformedResponse { command, response } => {
            assert_eq!(command, ":MEAS:CURR?");
            assert!(response.contains("Settings conflict"));
        }
        other => panic!("unexpected error: {}", other),
    }

    let written = adapter.written();
    let n = written.len();
    assert_eq!(&written[n - 3..], &["OUTP OFF", ":SOUR2:TTL 1", ":DISP:ENAB 1"]);
}

#[tokio::test(start_paused = true)]
async fn test_non_finite_measurement_aborts_before_any_voltage_is_derived() {
    let adapter = bus();
    adapter.respond_to(":MEAS:CURR?", "NaN,-1.0E-02");
    let mut smu = Keithley2400::new(adapter.clone());

    let err = PowerTracker::with_rng(&mut smu, config(), StdRng::seed_from_u64(5))
        .run()
        .await
        .unwrap_err();

    let (partial, cause) = err.into_partial().unwrap();
    assert!(partial.is_empty());
    assert!(matches!(cause, MpptError::MalformedResponse { .. }), "{}", cause);

    let written = adapter.written();
    assert!(!written.iter().any(|cmd| cmd.contains("NaN")), "{:?}", written);
    assert_eq!(adapter.queried().iter().filter(|q| *q == ":MEAS:CURR?").count(), 1);
    let n = written.len();
    assert_eq!(&written[n - 3..], &["OUTP OFF", ":SOUR2:TTL 1", ":DISP:ENAB 1"]);
}

#[tokio::test(start_paused = true)]
async fn test_identification_failure_is_not_fatal() {
    let adapter = bus();
    adapter.respond_to(":MEAS:CURR?", "+5.0E-01,-8.0E-03,+9.91E+37,+1.0E+01,+4.0E+00");
    adapter.inject_next_failure();
    let mut smu = Keithley2400::new(adapter.clone());

    let trace = PowerTracker::with_rng(&mut smu, config(), StdRng::seed_from_u64(5))
        .run()
        .await
        .unwrap();

    assert!(!trace.is_empty());
    assert_eq!(adapter.written()[0], "*RST");
}
