//! Supervised engine process
//!
//! The engine runs as a child of the coordinator. [`EngineProcess::shutdown`]
//! consumes the handle, so the stop sequence runs at most once; the child is
//! spawned with `kill_on_drop` so a handle lost to a panic still takes the
//! engine down with it.

use crate::common::{Credentials, Error, Result};
use crate::common::logging::RunLog;
use crate::engine::admin::{AdminClient, Target};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};

/// Handle on the running engine
pub struct EngineProcess {
    child: Child,
    pid: Option<u32>,
}

/// What the stop sequence managed to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReport {
    /// Exited on its own after the shutdown command
    Graceful(Option<i32>),
    /// Had to be killed after the timeout
    Killed,
    /// Was already gone when the sequence started
    AlreadyExited(Option<i32>),
}

impl EngineProcess {
    /// Start `<engine_bin> --config <config_file>`, output appended to the run log.
    pub fn spawn(engine_bin: &str, config_file: &Path, run_log: &RunLog) -> Result<Self> {
        tracing::info!("Starting a MongoDB instance...");
        let child = Command::new(engine_bin)
            .arg("--config")
            .arg(config_file)
            .stdin(Stdio::null())
            .stdout(Stdio::from(run_log.handle()?))
            .stderr(Stdio::from(run_log.handle()?))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::EngineExited(format!("failed to start {}: {}", engine_bin, e)))?;

        let pid = child.id();
        tracing::info!("Engine started (pid {:?})", pid);
        Ok(Self { child, pid })
    }

    /// Wrap an already spawned child.
    pub fn from_child(child: Child) -> Self {
        let pid = child.id();
        Self { child, pid }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Resolves when the engine exits on its own.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Orderly stop: fsync+lock, unlock, shutdown, then wait or kill.
    ///
    /// Failures are logged and never returned; the orchestrator tears the
    /// container down if this leaves something behind.
    pub async fn shutdown<C: AdminClient + ?Sized>(
        mut self,
        client: &C,
        auth: Option<&Credentials>,
        timeout: Duration,
    ) -> StopReport {
        if let Ok(Some(status)) = self.child.try_wait() {
            tracing::warn!("Engine already exited: {}", status);
            return StopReport::AlreadyExited(status.code());
        }

        tracing::info!("Running fsync...");
        match client.fsync_lock(&Target::Local, auth).await {
            Ok(reply) if reply.ok => {}
            Ok(reply) => tracing::warn!("fsync lock failed: {}", reply.reason()),
            Err(e) => tracing::warn!("fsync lock failed: {}", e),
        }

        tracing::info!("Running fsync unlock...");
        match client.fsync_unlock(&Target::Local, auth).await {
            Ok(reply) if reply.ok => {}
            Ok(reply) => tracing::warn!("fsync unlock failed: {}", reply.reason()),
            Err(e) => tracing::warn!("fsync unlock failed: {}", e),
        }

        tracing::info!("Shutting down MongoDB...");
        // The engine drops the connection while shutting down, so an error
        // reply here is normal.
        match client.shutdown(&Target::Local, auth, timeout).await {
            Ok(reply) => tracing::debug!("shutdown reply: {}", reply.reason()),
            Err(e) => tracing::debug!("shutdown command: {}", e),
        }

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!("Engine stopped: {}", status);
                StopReport::Graceful(status.code())
            }
            Ok(Err(e)) => {
                tracing::error!("Failed to wait for engine: {}", e);
                self.kill().await
            }
            Err(_) => {
                tracing::error!("Engine did not stop within {:?}, killing it", timeout);
                self.kill().await
            }
        }
    }

    async fn kill(&mut self) -> StopReport {
        if let Err(e) = self.child.kill().await {
            tracing::error!("Failed to kill engine (pid {:?}): {}", self.pid, e);
        }
        StopReport::Killed
    }
}
