//! Readiness probe for the local engine

use crate::common::utils::{poll_until, RetryPolicy};
use crate::common::Result;
use crate::engine::admin::{AdminClient, Target};

/// Ping the local engine until it answers.
pub async fn wait_until_ready<C: AdminClient + ?Sized>(client: &C, policy: RetryPolicy) -> Result<u32> {
    tracing::info!("Waiting for MongoDB to be ready...");
    let attempts = poll_until(policy, "engine readiness", || async move {
        let ready = client.ping(&Target::Local).await?;
        if !ready {
            tracing::info!("Retrying...");
        }
        Ok(ready)
    })
    .await?;
    tracing::info!("Initialized.");
    Ok(attempts)
}
