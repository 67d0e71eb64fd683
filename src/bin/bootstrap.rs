//! Bootstrap coordinator binary

use clap::Parser;
use replset_bootstrap::common::{init_logging, local_hostname, BootstrapConfig, RunLog};
use replset_bootstrap::coordinator::{BootstrapReport, Bootstrapper, CredentialStore, PeerSet};
use replset_bootstrap::engine::{EngineProcess, ShellAdminClient};
use replset_bootstrap::tls::CertificateProvisioner;
use replset_bootstrap::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::BufReader;
use tokio::signal;

#[derive(Parser)]
#[command(name = "replset-bootstrap")]
#[command(about = "Bootstrap a MongoDB replica-set member", version)]
struct Cli {
    /// Optional TOML file; environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Work directory (credentials, run log, node certificate)
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Configuration volume (mongod.conf, tls.crt, tls.key)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Stop the engine and exit once bootstrapped (init-container mode)
    #[arg(long)]
    exit_after_bootstrap: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = BootstrapConfig::load(cli.config.as_deref())?;
    if let Some(work_dir) = cli.work_dir {
        config.work_dir = work_dir;
    }
    if let Some(config_dir) = cli.config_dir {
        config.config_dir = config_dir;
    }

    let run_log = RunLog::open(config.run_log_path())?;
    init_logging(&cli.log_level, &run_log)?;

    let hostname = match &config.hostname {
        Some(name) => name.clone(),
        None => local_hostname()?,
    };

    let peers = PeerSet::read_from(BufReader::new(tokio::io::stdin())).await?;
    let identity = peers.resolve(&hostname);
    if identity.service_address.is_none() {
        tracing::warn!("Hostname {} not found in peer list", hostname);
    }

    let tls = CertificateProvisioner::new(&config.config_dir, &config.work_dir, &config.service_alias)
        .provision(&hostname, identity.service_address.as_deref())?;
    let client = ShellAdminClient::new(&config.shell_bin, config.port, config.ipv6, tls.as_ref());

    let mut engine =
        EngineProcess::spawn(&config.engine_bin, &config.engine_config_path(), &run_log)?;

    let bootstrapper = Bootstrapper::new(&config, &client, &peers, &identity);
    let result = tokio::select! {
        res = bootstrapper.run() => res,
        status = engine.wait() => Err(match status {
            Ok(status) => Error::EngineExited(status.to_string()),
            Err(e) => e,
        }),
        _ = shutdown_signal() => Err(Error::Terminated),
    };

    match &result {
        Ok(report) if report.negotiation.outcome.is_fatal() => {
            tracing::error!("Bootstrap failed: {}", report.negotiation.outcome);
        }
        Ok(report) => {
            tracing::info!("Bootstrap finished: {}", report.negotiation.outcome);
        }
        Err(Error::Terminated) => {
            tracing::info!("Termination requested during bootstrap");
        }
        Err(e) => {
            tracing::error!("Bootstrap failed: {}", e);
        }
    }

    let mut exit = exit_code(&result);
    let supervise =
        exit == 0 && !matches!(result, Err(Error::Terminated)) && !cli.exit_after_bootstrap;

    if supervise {
        tracing::info!("Supervising engine (pid {:?})", engine.pid());
        tokio::select! {
            status = engine.wait() => {
                tracing::error!("Engine exited: {:?}", status);
                exit = 1;
            }
            _ = shutdown_signal() => {
                tracing::info!("Termination requested");
            }
        }
    }

    // Whatever reconciliation left in the store is what the cluster accepts now
    let auth = config
        .desired_admin()
        .and_then(|_| CredentialStore::new(config.credentials_path()).load().ok());
    let report = engine
        .shutdown(&client, auth.as_ref(), config.shutdown_timeout())
        .await;
    tracing::info!("Engine stop: {:?}", report);

    Ok(ExitCode::from(exit))
}

/// Process exit status for a bootstrap result.
///
/// Termination by signal and a run that found no primary both exit cleanly;
/// the orchestrator restarts the container either way.
fn exit_code(result: &replset_bootstrap::Result<BootstrapReport>) -> u8 {
    match result {
        Ok(report) if report.negotiation.outcome.is_fatal() => 1,
        Ok(_) => 0,
        Err(Error::Terminated) => 0,
        Err(_) => 1,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
