//! Credential store
//!
//! `credentials.txt` holds the admin username on the first line and the
//! password on the last. The file records what the cluster accepts, which
//! may lag behind the desired credentials until reconciliation confirms a
//! change.

use crate::common::{Credentials, Error, Result};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Seed the store with `desired` on first run, then read it back.
    pub fn bootstrap(&self, desired: &Credentials) -> Result<Credentials> {
        if !self.exists() {
            tracing::info!("Creating credentials file {}", self.path.display());
            self.write(desired)?;
        }
        self.load()
    }

    pub fn load(&self) -> Result<Credentials> {
        let raw = fs::read_to_string(&self.path)?;
        let lines: Vec<&str> = raw
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty())
            .collect();

        match (lines.first(), lines.last()) {
            (Some(username), Some(password)) if lines.len() >= 2 => {
                Ok(Credentials::new(*username, *password))
            }
            _ => Err(Error::CredentialsCorrupted(format!(
                "{}: expected username and password lines",
                self.path.display()
            ))),
        }
    }

    /// Replace the stored credentials.
    pub fn update(&self, credentials: &Credentials) -> Result<()> {
        tracing::info!("Updating stored credentials for {}", credentials.username);
        self.write(credentials)
    }

    /// Temp file, fsync, rename: a crash leaves either the old or the new file.
    fn write(&self, credentials: &Credentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = self.path.with_extension("txt.tmp");

        let mut options = OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", credentials.username)?;
        writeln!(writer, "{}", credentials.password)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}
