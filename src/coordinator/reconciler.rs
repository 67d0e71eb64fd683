//! Admin password drift repair
//!
//! The store is only rewritten once the desired password is proven to
//! authenticate, so a crash anywhere in here is repaired by the next run:
//! either the change never happened (stored password still works) or it did
//! (desired password works and is adopted without a second change).

use crate::common::{Credentials, Result};
use crate::coordinator::credentials::CredentialStore;
use crate::engine::admin::{AdminClient, Target};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Stored password already equals the desired one
    InSync,
    /// The cluster already accepted the desired password; store updated
    AdoptedDesired,
    /// Password changed on the cluster, confirmed, store updated
    Changed,
    /// Drift remains; the stored credentials are left untouched
    Unconfirmed,
}

pub struct CredentialReconciler<'a, C: AdminClient + ?Sized> {
    client: &'a C,
    store: &'a CredentialStore,
    password_settle: Duration,
}

impl<'a, C: AdminClient + ?Sized> CredentialReconciler<'a, C> {
    pub fn new(client: &'a C, store: &'a CredentialStore, password_settle: Duration) -> Self {
        Self {
            client,
            store,
            password_settle,
        }
    }

    /// Adopt the desired password if `target` already accepts it.
    ///
    /// Never changes anything on the cluster.
    pub async fn adopt_if_live(
        &self,
        target: &Target,
        desired: &Credentials,
    ) -> Result<ReconcileOutcome> {
        let stored = self.store.load()?;
        if stored.username != desired.username {
            tracing::warn!(
                "Desired admin user {} differs from stored user {}, keeping {}",
                desired.username,
                stored.username,
                stored.username
            );
        }
        if stored.password == desired.password {
            return Ok(ReconcileOutcome::InSync);
        }

        let candidate = Credentials::new(stored.username, desired.password.as_str());
        if self.client.authenticate(target, &candidate).await? {
            tracing::info!("Desired admin password is already live on {}", target);
            self.store.update(&candidate)?;
            return Ok(ReconcileOutcome::AdoptedDesired);
        }
        Ok(ReconcileOutcome::Unconfirmed)
    }

    /// Detect drift against the primary and repair it.
    pub async fn reconcile(
        &self,
        primary: &Target,
        desired: &Credentials,
    ) -> Result<ReconcileOutcome> {
        match self.adopt_if_live(primary, desired).await? {
            ReconcileOutcome::Unconfirmed => {}
            outcome => return Ok(outcome),
        }

        let stored = self.store.load()?;
        tracing::info!("Changing password of {} on {}", stored.username, primary);
        let reply = self
            .client
            .change_password(primary, Some(&stored), &stored.username, &desired.password)
            .await?;
        if !reply.ok {
            tracing::warn!("Password change rejected: {}", reply.reason());
        }

        tokio::time::sleep(self.password_settle).await;

        match self.adopt_if_live(primary, desired).await? {
            ReconcileOutcome::AdoptedDesired => Ok(ReconcileOutcome::Changed),
            outcome => {
                tracing::warn!("New admin password could not be confirmed, keeping stored one");
                Ok(outcome)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockCluster;
    use tempfile::TempDir;

    fn setup(stored: &str, live: &str) -> (TempDir, CredentialStore, MockCluster) {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.txt"));
        store.bootstrap(&Credentials::new("admin", stored)).unwrap();

        let cluster = MockCluster::new(["node-0.svc"]);
        cluster.form_set("rs0", "node-0.svc", &[]);
        cluster.put_user(&Credentials::new("admin", live));
        (dir, store, cluster)
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_sync_issues_nothing() {
        let (_dir, store, cluster) = setup("same", "same");
        let client = cluster.client("node-0.svc");
        let reconciler = CredentialReconciler::new(&client, &store, Duration::from_secs(10));

        let outcome = reconciler
            .reconcile(&Target::peer("node-0.svc"), &Credentials::new("admin", "same"))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::InSync);
        assert!(cluster.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_change_keeps_store() {
        let (_dir, store, cluster) = setup("old", "old");
        cluster.ignore_password_changes(true);
        let client = cluster.client("node-0.svc");
        let reconciler = CredentialReconciler::new(&client, &store, Duration::from_secs(10));

        let outcome = reconciler
            .reconcile(&Target::peer("node-0.svc"), &Credentials::new("admin", "new"))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Unconfirmed);
        assert_eq!(store.load().unwrap().password, "old");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stored_username_wins() {
        let (_dir, store, cluster) = setup("old", "new");
        let client = cluster.client("node-0.svc");
        let reconciler = CredentialReconciler::new(&client, &store, Duration::from_secs(10));

        let outcome = reconciler
            .adopt_if_live(&Target::Local, &Credentials::new("root", "new"))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::AdoptedDesired);
        assert_eq!(store.load().unwrap(), Credentials::new("admin", "new"));
    }
}
