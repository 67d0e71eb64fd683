//! Shared fixtures for integration tests

#![allow(dead_code)]

use replset_bootstrap::common::BootstrapConfig;
use replset_bootstrap::coordinator::{BootstrapReport, Bootstrapper, PeerSet};
use replset_bootstrap::engine::mock::MockCluster;
use replset_bootstrap::Result;
use std::path::Path;

pub const ADMIN_USER: &str = "admin";
pub const ADMIN_PASSWORD: &str = "secret";

/// Test configuration rooted in `work_dir`, with bounded polls.
pub fn config(work_dir: &Path, auth: bool) -> BootstrapConfig {
    let mut conf = BootstrapConfig::load_with_env(None, Some(Default::default())).unwrap();
    conf.work_dir = work_dir.to_path_buf();
    conf.config_dir = work_dir.join("configdb");
    conf.max_poll_attempts = Some(60);
    if auth {
        conf.auth = true;
        conf.admin_user = Some(ADMIN_USER.into());
        conf.admin_password = Some(ADMIN_PASSWORD.into());
    }
    conf
}

pub fn with_metrics(mut conf: BootstrapConfig) -> BootstrapConfig {
    conf.metrics = true;
    conf.metrics_user = Some("metrics".into());
    conf.metrics_password = Some("metrics-pw".into());
    conf
}

/// One bootstrap run of `hostname` against the shared cluster.
pub async fn run_node(
    cluster: &MockCluster,
    conf: &BootstrapConfig,
    peers: &PeerSet,
    hostname: &str,
) -> Result<BootstrapReport> {
    let identity = peers.resolve(hostname);
    let local = identity
        .service_address
        .clone()
        .unwrap_or_else(|| hostname.to_string());
    let client = cluster.client(&local);
    Bootstrapper::new(conf, &client, peers, &identity).run().await
}
