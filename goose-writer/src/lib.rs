//! Append-only CSV sink for engine performance time series.
//!
//! Every data point is a `(timestamp, category, value)` triple; each CSV row
//! carries the value in the column matching its category and leaves the
//! other column empty.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use goose_core::{
    service::completed_signal, LifecycleSignal, Price, Service, ServiceError,
};

/// Name of the CSV file created inside the configured output directory.
pub const OUTPUT_FILE_NAME: &str = "goose.csv";

/// Rows buffered before the sink forces a flush to disk.
const MAX_FILL: usize = 1000;

/// Full-precision timestamp layout: date, time with nanoseconds, zone.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f %Z";

/// The kind of data point a row records.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Category {
    ClosingPrice,
    GrossMockEarnings,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClosingPrice => f.write_str("ClosingPrice"),
            Self::GrossMockEarnings => f.write_str("GrossMockEarnings"),
        }
    }
}

/// Failures surfaced by [`RecordSink::write`]. Write failures are logged and
/// returned but are not fatal to the pipeline.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("writer service is not running")]
    NotRunning,
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Seam depended on by the broker and monitor so tests can capture records
/// without touching the filesystem.
pub trait RecordSink: Send + Sync {
    fn write(
        &self,
        timestamp: DateTime<Utc>,
        category: Category,
        value: Price,
    ) -> Result<(), WriteError>;
}

struct Sink {
    writer: csv::Writer<File>,
    fill: usize,
}

/// Service owning the output CSV file from start to stop.
pub struct WriterService {
    output_dir: PathBuf,
    sink: Mutex<Option<Sink>>,
}

impl WriterService {
    /// Build a writer that emits into `output_dir/goose.csv`.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            sink: Mutex::new(None),
        }
    }

    /// The full path of the output file.
    #[must_use]
    pub fn output_path(&self) -> PathBuf {
        Path::new(&self.output_dir).join(OUTPUT_FILE_NAME)
    }
}

impl RecordSink for WriterService {
    fn write(
        &self,
        timestamp: DateTime<Utc>,
        category: Category,
        value: Price,
    ) -> Result<(), WriteError> {
        let mut guard = self.sink.lock().expect("writer mutex poisoned");
        let sink = guard.as_mut().ok_or(WriteError::NotRunning)?;

        let stamp = timestamp.format(TIMESTAMP_FORMAT).to_string();
        let row = match category {
            Category::ClosingPrice => [stamp, value.to_string(), String::new()],
            Category::GrossMockEarnings => [stamp, String::new(), value.to_string()],
        };

        if let Err(err) = sink.writer.write_record(&row) {
            warn!(
                %timestamp,
                %category,
                %value,
                error = %err,
                "failed to write data point"
            );
            return Err(err.into());
        }

        sink.fill += 1;
        if sink.fill >= MAX_FILL {
            sink.fill = 0;
            if let Err(err) = sink.writer.flush() {
                warn!(error = %err, "failed to flush output file");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Service for WriterService {
    fn name(&self) -> &'static str {
        "writer-service"
    }

    async fn start(&self) -> Result<LifecycleSignal, ServiceError> {
        let mut guard = self.sink.lock().expect("writer mutex poisoned");
        if guard.is_some() {
            return Err(ServiceError::AlreadyRunning);
        }

        let path = self.output_path();
        let file = File::create(&path)
            .map_err(|err| ServiceError::StartupFailed(format!("create {path:?}: {err}")))?;

        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record([
                "Timestamp".to_string(),
                Category::ClosingPrice.to_string(),
                Category::GrossMockEarnings.to_string(),
            ])
            .map_err(|err| ServiceError::StartupFailed(format!("write header: {err}")))?;

        *guard = Some(Sink { writer, fill: 0 });

        info!(service = self.name(), path = %path.display(), "started");

        Ok(completed_signal())
    }

    async fn stop(&self) -> Result<LifecycleSignal, ServiceError> {
        let mut guard = self.sink.lock().expect("writer mutex poisoned");
        let mut sink = guard.take().ok_or(ServiceError::NotRunning)?;

        if let Err(err) = sink.writer.flush() {
            warn!(error = %err, "failed to flush output file during shutdown");
        }
        // Dropping the csv writer releases the file handle.
        drop(sink);

        info!(service = self.name(), "stopped");

        Ok(completed_signal())
    }
}
