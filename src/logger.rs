use crate::error::PzemError;
use crate::measurement::Measurement;
use crate::session::DeviceSession;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

pub const HEADER: [&str; 4] = ["timestamp", "voltage", "current", "frequency"];

/// Sortable local time with microseconds, e.g. `2024-05-01T13:45:10.123456`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("reading the meter failed: {0}")]
    Device(#[from] PzemError),

    #[error("writing the log failed: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One row of the log file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub voltage: f64,
    pub current: f64,
    pub frequency: f64,
}

impl LogRecord {
    pub fn new(time: DateTime<Local>, measurement: &Measurement) -> Self {
        Self {
            timestamp: time.format(TIMESTAMP_FORMAT).to_string(),
            voltage: measurement.voltage,
            current: measurement.current,
            frequency: measurement.frequency,
        }
    }
}

/// Delimited rows, flushed one at a time.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
}

impl CsvSink<File> {
    /// Opens the log at `path`. The header is written unless rows are being
    /// appended to a file that already has content.
    pub fn open(path: &Path, append: bool) -> Result<Self, LoggerError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)?;

        let write_header = !append || file.metadata()?.len() == 0;
        Self::new(file, write_header)
    }
}

impl<W: Write> CsvSink<W> {
    pub fn new(inner: W, write_header: bool) -> Result<Self, LoggerError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(inner);

        if write_header {
            writer.write_record(HEADER)?;
            writer.flush()?;
        }

        Ok(Self { writer })
    }

    pub fn append(&mut self, record: &LogRecord) -> Result<(), LoggerError> {
        self.writer.serialize(record)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), LoggerError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LoggerOptions {
    pub interval: Duration,
    /// Echo every sample to stdout.
    pub verbose: bool,
    /// Stop after this many samples.
    pub max_samples: Option<u64>,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            verbose: false,
            max_samples: None,
        }
    }
}

/// Polls a meter at a fixed interval and writes every sample to a sink.
pub struct Logger<W: Write> {
    sink: CsvSink<W>,
    options: LoggerOptions,
}

impl<W: Write> Logger<W> {
    pub fn new(sink: CsvSink<W>, options: LoggerOptions) -> Self {
        Self { sink, options }
    }

    /// Runs until `cancel` fires, the sample limit is reached or a read
    /// fails. In every case the sink is flushed and the session closed
    /// before returning. Returns the number of rows written.
    ///
    /// Cancellation is checked between exchanges and also interrupts the
    /// interval sleep; an exchange in progress always runs to completion.
    #[instrument(skip_all, fields(interval = ?self.options.interval))]
    pub async fn run<T>(
        mut self,
        mut session: DeviceSession<T>,
        cancel: CancellationToken,
    ) -> Result<u64, LoggerError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        info!("Logging started");
        let result = self.poll(&mut session, &cancel).await;

        let flushed = self.sink.flush();
        let closed = session.close().await;

        match &result {
            Ok(samples) => info!("Logging stopped after {} samples", samples),
            Err(e) => error!(error = %e, "Logging aborted"),
        }

        let samples = result?;
        flushed?;
        closed?;
        Ok(samples)
    }

    async fn poll<T>(
        &mut self,
        session: &mut DeviceSession<T>,
        cancel: &CancellationToken,
    ) -> Result<u64, LoggerError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut samples = 0;

        loop {
            if cancel.is_cancelled() {
                info!("Cancellation requested");
                break;
            }

            let measurement = session.read_measurements().await?;
            let record = LogRecord::new(Local::now(), &measurement);
            self.sink.append(&record)?;
            samples += 1;

            debug!(?record, "Sample written");
            if self.options.verbose {
                println!(
                    "[{}] V={:.1}V  I={:.3}A  F={:.1}Hz",
                    record.timestamp, record.voltage, record.current, record.frequency
                );
            }

            if self.options.max_samples.is_some_and(|max| samples >= max) {
                break;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Cancellation requested during the interval wait");
                    break;
                }
                _ = time::sleep(self.options.interval) => {}
            }
        }

        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::crc;
    use chrono::TimeZone;
    use std::fs;
    use tokio_test::io::Builder;

    const READ_REQUEST: [u8; 8] = [0x01, 0x04, 0x00, 0x00, 0x00, 0x0A, 0x70, 0x0D];

    fn measurement_response(words: [u16; 10]) -> Vec<u8> {
        let mut frame = vec![0x01, 0x04, 0x14];
        for word in words {
            frame.extend_from_slice(&word.to_be_bytes());
        }
        let checksum = crc::checksum(&frame);
        frame.extend_from_slice(&checksum);
        frame
    }

    fn rows(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn record_uses_sortable_timestamps() {
        let time = Local.with_ymd_and_hms(2024, 5, 1, 13, 45, 10).unwrap();
        let measurement = Measurement {
            voltage: 230.0,
            current: 1.0,
            power: 50.0,
            energy: 12345,
            frequency: 50.0,
            power_factor: 0.95,
            alarm: false,
        };

        let record = LogRecord::new(time, &measurement);
        assert_eq!(record.timestamp, "2024-05-01T13:45:10.000000");
        assert_eq!(record.voltage, 230.0);
        assert_eq!(record.frequency, 50.0);
    }

    #[test]
    fn new_file_gets_a_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");

        CsvSink::open(&path, false).unwrap();
        assert_eq!(rows(&path), vec!["timestamp,voltage,current,frequency"]);
    }

    #[test]
    fn appending_to_existing_log_skips_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(&path, "timestamp,voltage,current,frequency\nearlier,1.0,2.0,3.0\n").unwrap();

        let mut sink = CsvSink::open(&path, true).unwrap();
        sink.append(&LogRecord {
            timestamp: "later".to_string(),
            voltage: 230.5,
            current: 0.25,
            frequency: 49.9,
        })
        .unwrap();

        assert_eq!(
            rows(&path),
            vec![
                "timestamp,voltage,current,frequency",
                "earlier,1.0,2.0,3.0",
                "later,230.5,0.25,49.9",
            ]
        );
    }

    #[test]
    fn appending_to_missing_file_writes_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.csv");

        CsvSink::open(&path, true).unwrap();
        assert_eq!(rows(&path), vec!["timestamp,voltage,current,frequency"]);
    }

    #[test]
    fn overwriting_truncates_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(&path, "old,stuff\n").unwrap();

        CsvSink::open(&path, false).unwrap();
        assert_eq!(rows(&path), vec!["timestamp,voltage,current,frequency"]);
    }

    #[tokio::test(start_paused = true)]
    async fn logs_until_the_sample_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let response = measurement_response([2300, 1000, 0, 500, 0, 12345, 0, 500, 95, 0]);
        let mock = Builder::new()
            .write(&READ_REQUEST)
            .read(&response)
            .write(&READ_REQUEST)
            .read(&response)
            .build();

        let logger = Logger::new(
            CsvSink::open(&path, false).unwrap(),
            LoggerOptions {
                interval: Duration::from_secs(1),
                verbose: false,
                max_samples: Some(2),
            },
        );
        let samples = logger
            .run(DeviceSession::new(mock, 0x01), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(samples, 2);
        let rows = rows(&path);
        assert_eq!(rows.len(), 3);
        for row in &rows[1..] {
            assert!(row.ends_with(",230.0,1.0,50.0"), "unexpected row {row}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_performs_no_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let logger = Logger::new(CsvSink::open(&path, false).unwrap(), LoggerOptions::default());
        let samples = logger
            .run(DeviceSession::new(Builder::new().build(), 0x01), cancel)
            .await
            .unwrap();

        assert_eq!(samples, 0);
        assert_eq!(rows(&path).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_interval_wait() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mock = Builder::new()
            .write(&READ_REQUEST)
            .read(&measurement_response([2300, 0, 0, 0, 0, 0, 0, 500, 100, 0]))
            .build();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let started = time::Instant::now();
        let logger = Logger::new(
            CsvSink::open(&path, false).unwrap(),
            LoggerOptions {
                interval: Duration::from_secs(60),
                ..LoggerOptions::default()
            },
        );
        let samples = logger
            .run(DeviceSession::new(mock, 0x01), cancel)
            .await
            .unwrap();

        assert_eq!(samples, 1);
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(rows(&path).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn read_failure_stops_the_run_after_flushing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mut exception = vec![0x01, 0x84, 0x04];
        let checksum = crc::checksum(&exception);
        exception.extend_from_slice(&checksum);

        let mock = Builder::new()
            .write(&READ_REQUEST)
            .read(&measurement_response([2300, 0, 0, 0, 0, 0, 0, 500, 100, 0]))
            .write(&READ_REQUEST)
            .read(&exception)
            .build();

        let logger = Logger::new(
            CsvSink::open(&path, false).unwrap(),
            LoggerOptions {
                interval: Duration::from_millis(10),
                ..LoggerOptions::default()
            },
        );
        let err = logger
            .run(DeviceSession::new(mock, 0x01), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LoggerError::Device(PzemError::ExceptionResponse {
                code: Some(0x04),
                ..
            })
        ));
        assert_eq!(rows(&path).len(), 2);
    }
}
