//! Configuration for the bootstrap coordinator
//!
//! Settings come from the environment the orchestrator injects (`REPLICA_SET`,
//! `AUTH`, `ADMIN_USER`, ...), optionally layered over a TOML file. Keys are
//! unprefixed on purpose: the pod spec contract predates this binary.

use crate::common::utils::RetryPolicy;
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Replica set name used when initiating a new set
    #[serde(default = "default_replica_set")]
    pub replica_set: String,

    /// Authentication enabled on the engine
    #[serde(default)]
    pub auth: bool,

    /// Desired admin account
    #[serde(default)]
    pub admin_user: Option<String>,
    #[serde(default)]
    pub admin_password: Option<String>,

    /// Monitoring account provisioning
    #[serde(default)]
    pub metrics: bool,
    #[serde(default)]
    pub metrics_user: Option<String>,
    #[serde(default)]
    pub metrics_password: Option<String>,

    /// Pod hostname; falls back to the kernel hostname when unset
    #[serde(default)]
    pub hostname: Option<String>,

    /// Engine port, used to build member host strings
    #[serde(default = "default_port")]
    pub port: u16,

    /// Work directory (credentials, run log, generated key material)
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Configuration volume (engine config, optional CA pair)
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Engine binary
    #[serde(default = "default_engine_bin")]
    pub engine_bin: String,

    /// Administrative shell binary
    #[serde(default = "default_shell_bin")]
    pub shell_bin: String,

    /// Cluster service alias added to the node certificate
    #[serde(default = "default_service_alias")]
    pub service_alias: String,

    /// Pass `--ipv6` on remote administrative calls
    #[serde(default = "default_true")]
    pub ipv6: bool,

    /// Readiness probe interval
    #[serde(default = "default_readiness_interval")]
    pub readiness_interval_ms: u64,

    /// Interval of role / catch-up polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Cap on every role / catch-up / readiness poll (unbounded when unset)
    #[serde(default)]
    pub max_poll_attempts: Option<u32>,

    /// Pause after initiate / add-member before polling
    #[serde(default = "default_settle")]
    pub settle_ms: u64,

    /// Pause after a password change before re-checking drift
    #[serde(default = "default_password_settle")]
    pub password_settle_ms: u64,

    /// Anti double-initiation backoff
    #[serde(default = "default_race_backoff")]
    pub race_backoff_ms: u64,

    /// Outer iterations of the primary probe
    #[serde(default = "default_max_probe_iterations")]
    pub max_probe_iterations: u32,

    /// Graceful shutdown budget for the engine
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_replica_set() -> String {
    "rs0".to_string()
}
fn default_port() -> u16 {
    27017
}
fn default_work_dir() -> PathBuf {
    PathBuf::from("/work-dir")
}
fn default_config_dir() -> PathBuf {
    PathBuf::from("/data/configdb")
}
fn default_engine_bin() -> String {
    "mongod".to_string()
}
fn default_shell_bin() -> String {
    "mongo".to_string()
}
fn default_service_alias() -> String {
    "mongodb".to_string()
}
fn default_true() -> bool {
    true
}
fn default_readiness_interval() -> u64 {
    2_000
}
fn default_poll_interval() -> u64 {
    1_000
}
fn default_settle() -> u64 {
    3_000
}
fn default_password_settle() -> u64 {
    10_000
}
fn default_race_backoff() -> u64 {
    30_000
}
fn default_max_probe_iterations() -> u32 {
    5
}
fn default_shutdown_timeout() -> u64 {
    60
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            replica_set: default_replica_set(),
            auth: false,
            admin_user: None,
            admin_password: None,
            metrics: false,
            metrics_user: None,
            metrics_password: None,
            hostname: None,
            port: default_port(),
            work_dir: default_work_dir(),
            config_dir: default_config_dir(),
            engine_bin: default_engine_bin(),
            shell_bin: default_shell_bin(),
            service_alias: default_service_alias(),
            ipv6: true,
            readiness_interval_ms: default_readiness_interval(),
            poll_interval_ms: default_poll_interval(),
            max_poll_attempts: None,
            settle_ms: default_settle(),
            password_settle_ms: default_password_settle(),
            race_backoff_ms: default_race_backoff(),
            max_probe_iterations: default_max_probe_iterations(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

/// Username/password pair
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl BootstrapConfig {
    /// Load from the process environment, optionally layered over a TOML file.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_with_env(file, None)
    }

    /// Load with an explicit environment map instead of the process one.
    pub fn load_with_env(
        file: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(config::Environment::default().source(env));

        let conf: BootstrapConfig = builder.build()?.try_deserialize()?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn validate(&self) -> Result<()> {
        if self.replica_set.trim().is_empty() {
            return Err(Error::InvalidConfig("replica set name is empty".into()));
        }
        if self.auth && (self.admin_user.is_none() || self.admin_password.is_none()) {
            return Err(Error::InvalidConfig(
                "AUTH is enabled but ADMIN_USER / ADMIN_PASSWORD are missing".into(),
            ));
        }
        if self.auth
            && self.metrics
            && (self.metrics_user.is_none() || self.metrics_password.is_none())
        {
            return Err(Error::InvalidConfig(
                "METRICS is enabled but METRICS_USER / METRICS_PASSWORD are missing".into(),
            ));
        }
        if self.max_probe_iterations == 0 {
            return Err(Error::InvalidConfig(
                "max_probe_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Desired admin credentials, when authentication is enabled.
    pub fn desired_admin(&self) -> Option<Credentials> {
        if !self.auth {
            return None;
        }
        match (&self.admin_user, &self.admin_password) {
            (Some(user), Some(password)) => Some(Credentials::new(user, password)),
            _ => None,
        }
    }

    /// Desired monitoring credentials, when both auth and metrics are enabled.
    pub fn desired_metrics(&self) -> Option<Credentials> {
        if !(self.auth && self.metrics) {
            return None;
        }
        match (&self.metrics_user, &self.metrics_password) {
            (Some(user), Some(password)) => Some(Credentials::new(user, password)),
            _ => None,
        }
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.work_dir.join("credentials.txt")
    }

    pub fn run_log_path(&self) -> PathBuf {
        self.work_dir.join("log.txt")
    }

    pub fn engine_config_path(&self) -> PathBuf {
        self.config_dir.join("mongod.conf")
    }

    pub fn readiness_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.readiness_interval_ms),
            self.max_poll_attempts,
        )
    }

    pub fn role_poll_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.poll_interval_ms),
            self.max_poll_attempts,
        )
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn password_settle(&self) -> Duration {
        Duration::from_millis(self.password_settle_ms)
    }

    pub fn race_backoff(&self) -> Duration {
        Duration::from_millis(self.race_backoff_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
