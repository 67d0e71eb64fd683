//! Bootstrap sequence
//!
//! readiness → credential store → early drift check → negotiation →
//! reconciliation → metrics user. Strictly sequential; the caller races the
//! whole future against termination and engine exit.

use crate::common::{BootstrapConfig, Credentials, Result};
use crate::coordinator::credentials::CredentialStore;
use crate::coordinator::metrics_user::{ensure_metrics_user, MetricsUserOutcome};
use crate::coordinator::negotiator::{Negotiation, Negotiator, NegotiatorSettings};
use crate::coordinator::peers::{NodeIdentity, PeerSet};
use crate::coordinator::reconciler::{CredentialReconciler, ReconcileOutcome};
use crate::engine::admin::{AdminClient, Target};
use crate::engine::readiness::wait_until_ready;

/// Everything one run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub negotiation: Negotiation,
    pub credentials: Option<ReconcileOutcome>,
    pub metrics_user: Option<MetricsUserOutcome>,
}

pub struct Bootstrapper<'a, C: AdminClient + ?Sized> {
    config: &'a BootstrapConfig,
    client: &'a C,
    peers: &'a PeerSet,
    identity: &'a NodeIdentity,
}

impl<'a, C: AdminClient + ?Sized> Bootstrapper<'a, C> {
    pub fn new(
        config: &'a BootstrapConfig,
        client: &'a C,
        peers: &'a PeerSet,
        identity: &'a NodeIdentity,
    ) -> Self {
        Self {
            config,
            client,
            peers,
            identity,
        }
    }

    pub fn credential_store(&self) -> CredentialStore {
        CredentialStore::new(self.config.credentials_path())
    }

    pub async fn run(&self) -> Result<BootstrapReport> {
        tracing::info!("Bootstrapping a MongoDB replica");
        tracing::info!("  Work dir: {}", self.config.work_dir.display());
        tracing::info!("  Peers: {}", self.peers);
        tracing::info!(
            "  Service address: {}",
            self.identity.service_address.as_deref().unwrap_or("<unknown>")
        );

        wait_until_ready(self.client, self.config.readiness_policy()).await?;

        let store = self.credential_store();
        let reconciler =
            CredentialReconciler::new(self.client, &store, self.config.password_settle());
        let desired_admin = self.config.desired_admin();

        let stored = match &desired_admin {
            Some(desired) => {
                store.bootstrap(desired)?;
                self.early_drift_check(&reconciler, desired).await;
                Some(store.load()?)
            }
            None => None,
        };

        let negotiation = Negotiator::new(
            self.client,
            self.peers,
            self.identity,
            NegotiatorSettings::from_config(self.config),
        )
        .negotiate(stored.as_ref(), desired_admin.as_ref())
        .await?;
        tracing::info!("Negotiation finished: {}", negotiation.outcome);

        let mut report = BootstrapReport {
            negotiation,
            credentials: None,
            metrics_user: None,
        };
        if report.negotiation.outcome.is_fatal() {
            return Ok(report);
        }

        let (Some(primary), Some(desired)) = (report.negotiation.primary.clone(), desired_admin)
        else {
            return Ok(report);
        };
        let primary = Target::peer(primary);

        // Membership already converged; a flaky primary only defers the check
        let credentials = match reconciler.reconcile(&primary, &desired).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_retryable() => {
                tracing::warn!("Credential check against {} failed: {}", primary, e);
                ReconcileOutcome::Unconfirmed
            }
            Err(e) => return Err(e),
        };
        report.credentials = Some(credentials);

        if let Some(metrics) = self.config.desired_metrics() {
            let admin = store.load()?;
            report.metrics_user =
                Some(ensure_metrics_user(self.client, &primary, &admin, &metrics).await);
        }

        tracing::info!("Bootstrap complete");
        Ok(report)
    }

    /// Adopt the desired password early if the local node already takes it.
    async fn early_drift_check(
        &self,
        reconciler: &CredentialReconciler<'_, C>,
        desired: &Credentials,
    ) {
        match reconciler.adopt_if_live(&Target::Local, desired).await {
            Ok(outcome) => tracing::debug!("Early drift check: {:?}", outcome),
            Err(e) => tracing::warn!("Early drift check failed: {}", e),
        }
    }
}
