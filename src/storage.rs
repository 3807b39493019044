//! Flat tab-delimited trace files.
//!
//! One header line, then one row per sample with the columns time (s),
//! voltage (V), current (A), current density (mA/cm^2), power (W) and
//! efficiency (%). Numbers are fixed-point with nine decimals and every line,
//! the header included, ends in CRLF.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, Terminator, WriterBuilder};
use tracing::{debug, info, warn};

use crate::error::{AppResult, MpptError};
use crate::measurement::{Sample, Trace};

/// Column titles in file order.
pub const HEADER: [&str; 6] = ["Time (s)", "V", "I (A)", "J (mA/cm^2)", "P (W)", "PCE (%)"];

const PARTIAL_SUFFIX: &str = ".partial";
const TEMP_SUFFIX: &str = ".tmp";

/// `<folder>/<file_name>`
pub fn output_path(folder: impl AsRef<Path>, file_name: &str) -> PathBuf {
    folder.as_ref().join(file_name)
}

/// `<path>.partial`, the name an aborted run's samples are written under.
pub fn partial_path(path: impl AsRef<Path>) -> PathBuf {
    with_suffix(path.as_ref(), PARTIAL_SUFFIX)
}

/// `<path>.tmp`, where a trace is staged before being renamed into place.
pub fn temp_path(path: impl AsRef<Path>) -> PathBuf {
    with_suffix(path.as_ref(), TEMP_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Serialize `trace` into any writer.
pub fn write_trace_to<W: Write>(writer: W, trace: &Trace) -> AppResult<()> {
    let mut wtr = WriterBuilder::new()
        .delimiter(b'\t')
        .terminator(Terminator::CRLF)
        .from_writer(writer);

    wtr.write_record(HEADER)?;
    for sample in trace {
        wtr.write_record(sample.columns().iter().map(|v| format!("{:.9}", v)))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write a completed trace, creating the folder if needed.
///
/// The file is staged under [`temp_path`] and renamed over `path` only once
/// fully written, so `path` never holds a truncated trace.
pub fn write_trace(path: impl AsRef<Path>, trace: &Trace) -> AppResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let staged = temp_path(path);
    let result = stage(&staged, trace).and_then(|()| fs::rename(&staged, path).map_err(MpptError::from));
    if let Err(e) = result {
        if let Err(cleanup) = fs::remove_file(&staged) {
            if cleanup.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", staged.display(), cleanup);
            }
        }
        return Err(e);
    }

    info!("Wrote {} samples to {}", trace.len(), path.display());
    Ok(())
}

fn stage(path: &Path, trace: &Trace) -> AppResult<()> {
    let mut writer = io::BufWriter::new(File::create(path)?);
    write_trace_to(&mut writer, trace)?;
    let file = writer.into_inner().map_err(io::IntoInnerError::into_error)?;
    file.sync_all()?;
    Ok(())
}

/// Write an aborted run's samples next to where the full trace would have
/// gone, under [`partial_path`]. Returns the path written.
pub fn write_partial_trace(path: impl AsRef<Path>, trace: &Trace) -> AppResult<PathBuf> {
    let partial = partial_path(path);
    write_trace(&partial, trace)?;
    Ok(partial)
}

/// Parse a trace file. The header is skipped, as is any row with a NaN field.
pub fn read_trace_from<R: io::Read>(reader: R) -> AppResult<Trace> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(reader);

    let mut trace = Trace::new();
    let mut skipped = 0usize;
    for (row, record) in rdr.records().enumerate() {
        let record = record?;
        if record.len() != HEADER.len() {
            return Err(invalid_row(row, format!("expected 6 fields, found {}", record.len())));
        }

        let mut columns = [0.0; 6];
        for (slot, field) in columns.iter_mut().zip(record.iter()) {
            *slot = field
                .trim()
                .parse::<f64>()
                .map_err(|e| invalid_row(row, format!("'{}': {}", field, e)))?;
        }
        if columns.iter().any(|v| v.is_nan()) {
            skipped += 1;
            continue;
        }
        trace.push(Sample::from_columns(columns));
    }

    if skipped > 0 {
        debug!("Skipped {} rows containing NaN", skipped);
    }
    Ok(trace)
}

/// [`read_trace_from`] on a file.
pub fn read_trace(path: impl AsRef<Path>) -> AppResult<Trace> {
    read_trace_from(File::open(path)?)
}

fn invalid_row(row: usize, detail: String) -> MpptError {
    MpptError::Io(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("Trace row {}: {}", row + 1, detail),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Reading;
    use tempfile::tempdir;

    fn trace() -> Trace {
        Trace::from(vec![
            Sample::from_reading(0.0, Reading::new(0.0, 1e-9), 0.0935, 1.0),
            Sample::from_reading(3.01, Reading::new(0.624, -0.01), 0.0935, 1.0),
            Sample::from_reading(3.02, Reading::new(0.664, -0.0095), 0.0935, 1.0),
        ])
    }

    #[test]
    fn test_format_uses_tabs_crlf_and_nine_decimals() {
        let mut buf = Vec::new();
        write_trace_to(&mut buf, &trace()).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let lines: Vec<&str> = text.split("\r\n").collect();
        assert_eq!(lines[0], "Time (s)\tV\tI (A)\tJ (mA/cm^2)\tP (W)\tPCE (%)");
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[4], "");
        assert!(lines[2].starts_with("3.010000000\t0.624000000\t-0.010000000\t"));
        assert!(!text.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = output_path(dir.path().join("run1"), "cell_A");
        write_trace(&path, &trace()).unwrap();

        let back = read_trace(&path).unwrap();
        assert_eq!(back.len(), 3);
        for (a, b) in back.iter().zip(trace().iter()) {
            for (x, y) in a.columns().iter().zip(b.columns().iter()) {
                assert!((x - y).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_nan_rows_skipped() {
        let text = "Time (s)\tV\tI (A)\tJ (mA/cm^2)\tP (W)\tPCE (%)\r\n\
                    0.1\t0.5\t-0.01\t-106.9\t-0.005\t5.3\r\n\
                    0.2\tNaN\t-0.01\t-106.9\t-0.005\t5.3\r\n\
                    0.3\t0.5\t-0.01\t-106.9\t-0.005\tnan\r\n\
                    0.4\t0.5\t-0.01\t-106.9\t-0.005\t5.3\r\n";
        let trace = read_trace_from(text.as_bytes()).unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.samples()[1].time, 0.4);
    }

    #[test]
    fn test_garbage_field_is_an_error() {
        let text = "Time (s)\tV\tI (A)\tJ (mA/cm^2)\tP (W)\tPCE (%)\r\n0.1\tabc\t0\t0\t0\t0\r\n";
        let err = read_trace_from(text.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("Trace row 1"));
    }

    #[test]
    fn test_partial_naming() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cell_A.txt");
        let written = write_partial_trace(&path, &trace()).unwrap();
        assert_eq!(written, dir.path().join("cell_A.txt.partial"));
        assert!(written.exists());
        assert!(!path.exists());
    }

    #[test]
    fn test_write_replaces_existing_file_and_leaves_no_staging_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cell_A.txt");
        fs::write(&path, "stale").unwrap();

        write_trace(&path, &trace()).unwrap();

        assert!(!temp_path(&path).exists());
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("cell_A.txt")]);

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Time (s)\t"));
        assert!(text.ends_with("\r\n"));
        assert_eq!(read_trace(&path).unwrap().len(), 3);
    }

    #[test]
    fn test_failed_rename_removes_staging_file() {
        let dir = tempdir().unwrap();
        // A directory in the way makes the final rename fail
        let path = dir.path().join("cell_A.txt");
        fs::create_dir(&path).unwrap();

        assert!(write_trace(&path, &trace()).is_err());

        assert!(path.is_dir());
        assert!(!temp_path(&path).exists());
    }
}
