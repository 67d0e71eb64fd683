//! Run log: every step goes to stderr and to a durable file in the work
//! directory, both with ISO-8601 nanosecond timestamps, so a crashed pod
//! leaves a postmortem trail behind on its volume.

use crate::common::Result;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Same shape as `date --iso-8601=ns`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9f%:z";

/// Append-only run log file
pub struct RunLog {
    path: PathBuf,
    file: File,
}

impl RunLog {
    /// Open (or create) the run log, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A second handle on the log, handed to the engine child for its output.
    pub fn handle(&self) -> Result<File> {
        Ok(self.file.try_clone()?)
    }
}

/// Install the global subscriber: stderr plus the run log.
pub fn init_logging(level: &str, run_log: &RunLog) -> Result<()> {
    let file = run_log.handle()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.to_string().into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_timer(ChronoUtc::new(TIMESTAMP_FORMAT.to_string())),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_timer(ChronoUtc::new(TIMESTAMP_FORMAT.to_string())),
        )
        .try_init()
        .map_err(|e| crate::Error::Other(format!("failed to install logger: {}", e)))
}
