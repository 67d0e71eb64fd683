//! Monitoring account provisioning
//!
//! Best effort: every failure is logged and swallowed.

use crate::common::Credentials;
use crate::engine::admin::{AdminClient, Target, UserSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsUserOutcome {
    AlreadyExists,
    Created,
    Failed,
}

/// Ensure the monitoring account exists on the primary.
pub async fn ensure_metrics_user<C: AdminClient + ?Sized>(
    client: &C,
    primary: &Target,
    admin: &Credentials,
    metrics: &Credentials,
) -> MetricsUserOutcome {
    let username = metrics.username.as_str();

    match client.count_users(primary, Some(admin), username).await {
        Ok(0) => {}
        Ok(_) => {
            tracing::info!("Metrics user {} already exists", username);
            return MetricsUserOutcome::AlreadyExists;
        }
        Err(e) => {
            tracing::warn!("Could not look up metrics user {}: {}", username, e);
            return MetricsUserOutcome::Failed;
        }
    }

    tracing::info!("Creating metrics user {}", username);
    match client
        .create_user(primary, Some(admin), &UserSpec::metrics(metrics.clone()))
        .await
    {
        Ok(reply) if !reply.ok => {
            // A concurrent run may have created it first
            tracing::warn!("createUser for {} failed: {}", username, reply.reason());
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("createUser for {} failed: {}", username, e),
    }

    match client.count_users(primary, Some(admin), username).await {
        Ok(n) if n > 0 => {
            tracing::info!("Metrics user {} is present", username);
            MetricsUserOutcome::Created
        }
        Ok(_) => {
            tracing::warn!("Metrics user {} is still missing", username);
            MetricsUserOutcome::Failed
        }
        Err(e) => {
            tracing::warn!("Could not verify metrics user {}: {}", username, e);
            MetricsUserOutcome::Failed
        }
    }
}
