//! Membership negotiation
//!
//! Decides whether this node is already the primary, should join the set a
//! peer is running, or should found a new set, and then acts on it:
//!
//! ```text
//! Init → ProbeExistingPrimary ─┬─ SelfIsPrimary ─────────────┐
//!                              ├─ JoinPeer ──── rs.add ───────┼─→ Converged
//!                              │                └→ QuorumFailed
//!                              └─ NoReplSetYet ─ initiate ────┘
//! ```
//!
//! On a brand-new multi-node cluster every node sees "no primary" at once.
//! Only the designated founder (the first reachable unconfigured node in peer
//! order) initiates; every other node backs off and joins whatever set the
//! founder forms.

use crate::common::utils::{poll_until, poll_value, RetryPolicy};
use crate::common::{BootstrapConfig, Credentials, Error, Result};
use crate::coordinator::peers::{NodeIdentity, PeerSet};
use crate::engine::admin::{AddMemberReply, AdminClient, ReplicaSetRole, Target, UserSpec};
use std::time::Duration;

/// How the negotiation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    AlreadyPrimary,
    JoinedAsSecondary,
    InitiatedNewSet,
    /// The primary could not reach a majority to add us: fatal
    QuorumFailed,
    /// No primary found and not allowed to found one; retried next run
    RetryExhausted,
}

impl BootstrapOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, BootstrapOutcome::QuorumFailed)
    }
}

impl std::fmt::Display for BootstrapOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootstrapOutcome::AlreadyPrimary => write!(f, "already primary"),
            BootstrapOutcome::JoinedAsSecondary => write!(f, "joined as secondary"),
            BootstrapOutcome::InitiatedNewSet => write!(f, "initiated new replica set"),
            BootstrapOutcome::QuorumFailed => write!(f, "quorum check failed"),
            BootstrapOutcome::RetryExhausted => write!(f, "no primary found"),
        }
    }
}

/// Result of [`Negotiator::negotiate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    pub outcome: BootstrapOutcome,
    /// Peer address of the primary, when one is known
    pub primary: Option<String>,
}

impl Negotiation {
    fn new(outcome: BootstrapOutcome, primary: Option<String>) -> Self {
        Self { outcome, primary }
    }
}

#[derive(Debug, Clone)]
pub struct NegotiatorSettings {
    pub replica_set: String,
    pub port: u16,
    pub role_poll: RetryPolicy,
    pub settle: Duration,
    pub race_backoff: Duration,
    pub max_probe_iterations: u32,
}

impl NegotiatorSettings {
    pub fn from_config(config: &BootstrapConfig) -> Self {
        Self {
            replica_set: config.replica_set.clone(),
            port: config.port,
            role_poll: config.role_poll_policy(),
            settle: config.settle(),
            race_backoff: config.race_backoff(),
            max_probe_iterations: config.max_probe_iterations,
        }
    }
}

/// What one pass over the peer list found
#[derive(Debug, Default)]
struct Survey {
    primary: Option<String>,
    /// Some peer answered Secondary, so a set exists somewhere
    configured_peer: bool,
    /// Per peer, in input order: did it answer at all?
    reachable: Vec<bool>,
}

pub struct Negotiator<'a, C: AdminClient + ?Sized> {
    client: &'a C,
    peers: &'a PeerSet,
    identity: &'a NodeIdentity,
    settings: NegotiatorSettings,
}

impl<'a, C: AdminClient + ?Sized> Negotiator<'a, C> {
    pub fn new(
        client: &'a C,
        peers: &'a PeerSet,
        identity: &'a NodeIdentity,
        settings: NegotiatorSettings,
    ) -> Self {
        Self {
            client,
            peers,
            identity,
            settings,
        }
    }

    /// Converge into the right role.
    ///
    /// `auth` is the stored admin credentials (`None` with auth disabled);
    /// `desired_admin` is the account created when founding a new set.
    pub async fn negotiate(
        &self,
        auth: Option<&Credentials>,
        desired_admin: Option<&Credentials>,
    ) -> Result<Negotiation> {
        let multi_node = self.peers.len() > 1;
        let mut iteration: u32 = 0;

        let (survey, local_role, founder) = loop {
            iteration += 1;
            let survey = self.survey(auth).await?;
            if survey.primary.is_some() {
                break (survey, None, false);
            }

            let local_role = self.client.replica_set_role(&Target::Local, None).await?;
            tracing::debug!("Local replica set role: {}", local_role);
            if !multi_node || local_role != ReplicaSetRole::NoConfigYet {
                break (survey, Some(local_role), false);
            }

            if self.is_designated_founder(&survey) {
                tracing::info!("No primary and no reachable peer ahead of us, founding the set");
                break (survey, Some(local_role), true);
            }
            if iteration >= self.settings.max_probe_iterations {
                tracing::warn!(
                    "No primary after {} probe iterations, giving up for this run",
                    iteration
                );
                break (survey, Some(local_role), false);
            }

            tracing::info!(
                "No primary yet, backing off {:?} (iteration {}/{})",
                self.settings.race_backoff,
                iteration,
                self.settings.max_probe_iterations
            );
            tokio::time::sleep(self.settings.race_backoff).await;
        };

        match survey.primary {
            Some(primary) if self.identity.is(&primary) => {
                tracing::info!("This node is already PRIMARY");
                Ok(Negotiation::new(BootstrapOutcome::AlreadyPrimary, Some(primary)))
            }
            Some(primary) => self.join(primary, auth).await,
            None if local_role == Some(ReplicaSetRole::NoConfigYet)
                && (!multi_node || founder) =>
            {
                self.initiate(desired_admin).await
            }
            None => {
                if survey.configured_peer {
                    tracing::warn!("Peers are configured but none is PRIMARY right now");
                }
                tracing::info!(
                    "No primary found (local role {})",
                    local_role.map(|r| r.to_string()).unwrap_or_default()
                );
                Ok(Negotiation::new(BootstrapOutcome::RetryExhausted, None))
            }
        }
    }

    /// Probe every peer in order, stopping at the first primary.
    async fn survey(&self, auth: Option<&Credentials>) -> Result<Survey> {
        let mut survey = Survey::default();

        for peer in self.peers.iter() {
            let target = Target::peer(peer);
            match self.client.replica_set_role(&target, auth).await {
                Ok(ReplicaSetRole::Primary) => {
                    survey.reachable.push(true);
                    tracing::info!("Found primary: {}", peer);
                    self.wait_for_catch_up(&target, auth).await?;
                    survey.primary = Some(peer.to_string());
                    break;
                }
                Ok(role) => {
                    tracing::debug!("Peer {} is {}", peer, role);
                    survey.configured_peer |= role.proves_configured();
                    survey.reachable.push(true);
                }
                Err(e) if e.is_retryable() => {
                    tracing::debug!("Peer {} unreachable: {}", peer, e);
                    survey.reachable.push(false);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(survey)
    }

    fn is_designated_founder(&self, survey: &Survey) -> bool {
        if survey.configured_peer {
            return false;
        }
        let Some(me) = self
            .identity
            .service_address
            .as_deref()
            .and_then(|addr| self.peers.position(addr))
        else {
            return false;
        };
        survey.reachable.iter().take(me).all(|reachable| !reachable)
    }

    async fn wait_for_catch_up(&self, target: &Target, auth: Option<&Credentials>) -> Result<()> {
        tracing::info!("Waiting for {} to leave catch-up mode...", target);
        poll_until(self.settings.role_poll, "primary catch-up", || async move {
            self.client.is_master(target, auth).await
        })
        .await?;
        Ok(())
    }

    async fn wait_for_local_role(
        &self,
        role: ReplicaSetRole,
        auth: Option<&Credentials>,
    ) -> Result<()> {
        tracing::info!("Waiting for this node to become {}...", role);
        let what = format!("local role {}", role);
        poll_until(self.settings.role_poll, &what, || async move {
            Ok(self.client.replica_set_role(&Target::Local, auth).await? == role)
        })
        .await?;
        Ok(())
    }

    async fn join(&self, primary: String, auth: Option<&Credentials>) -> Result<Negotiation> {
        let host = self.identity.member_host(self.settings.port)?;
        let target = Target::peer(primary.as_str());

        let members = poll_value(self.settings.role_poll, "replica set members", || {
            let target = &target;
            async move { self.client.member_hosts(target, auth).await }
        })
        .await?;
        if members.iter().any(|m| m == &host) {
            tracing::info!("{} is already a replica set member", host);
        } else {
            tracing::info!("Adding {} to the replica set via {}", host, primary);
            match self.client.add_member(&target, auth, &host).await? {
                AddMemberReply::Added => {}
                AddMemberReply::QuorumCheckFailed(reason) => {
                    tracing::error!("Quorum check failed, not retrying: {}", reason);
                    return Ok(Negotiation::new(
                        BootstrapOutcome::QuorumFailed,
                        Some(primary),
                    ));
                }
                AddMemberReply::Rejected(reason) => {
                    return Err(Error::MembershipRejected {
                        primary,
                        host,
                        reason,
                    });
                }
            }
            tokio::time::sleep(self.settings.settle).await;
        }

        self.wait_for_local_role(ReplicaSetRole::Secondary, auth)
            .await?;
        tracing::info!("Joined as SECONDARY");
        Ok(Negotiation::new(
            BootstrapOutcome::JoinedAsSecondary,
            Some(primary),
        ))
    }

    async fn initiate(&self, desired_admin: Option<&Credentials>) -> Result<Negotiation> {
        let service = self.identity.require_service_address()?;
        tracing::info!(
            "Initiating replica set {} with {}",
            self.settings.replica_set,
            service
        );

        let reply = self
            .client
            .initiate(&Target::Local, &self.settings.replica_set, service)
            .await?;
        if !reply.ok {
            return Err(Error::CommandRejected {
                command: "replSetInitiate".into(),
                reason: reply.reason(),
            });
        }

        tokio::time::sleep(self.settings.settle).await;
        self.wait_for_local_role(ReplicaSetRole::Primary, None)
            .await?;
        self.wait_for_catch_up(&Target::Local, None).await?;

        if let Some(admin) = desired_admin {
            tokio::time::sleep(self.settings.settle).await;
            tracing::info!("Creating admin user {}", admin.username);
            let reply = self
                .client
                .create_user(&Target::Local, None, &UserSpec::admin(admin.clone()))
                .await?;
            if !reply.ok {
                return Err(Error::CommandRejected {
                    command: "createUser".into(),
                    reason: reply.reason(),
                });
            }
        }

        tracing::info!("Initiated new replica set, this node is PRIMARY");
        Ok(Negotiation::new(
            BootstrapOutcome::InitiatedNewSet,
            Some(service.to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockCluster;

    fn settings() -> NegotiatorSettings {
        NegotiatorSettings {
            replica_set: "rs0".into(),
            port: 27017,
            role_poll: RetryPolicy::bounded(Duration::from_secs(1), 30),
            settle: Duration::from_secs(3),
            race_backoff: Duration::from_secs(30),
            max_probe_iterations: 5,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_founder_is_first_reachable_unconfigured() {
        let cluster = MockCluster::new(["node-0.svc", "node-1.svc", "node-2.svc"]);
        cluster.set_down("node-0.svc", true);
        let client = cluster.client("node-1.svc");
        let peers = PeerSet::new(["node-0.svc", "node-1.svc", "node-2.svc"]);
        let identity = peers.resolve("node-1");
        let negotiator = Negotiator::new(&client, &peers, &identity, settings());

        let started = tokio::time::Instant::now();
        let result = negotiator.negotiate(None, None).await.unwrap();
        assert_eq!(result.outcome, BootstrapOutcome::InitiatedNewSet);
        assert_eq!(result.primary.as_deref(), Some("node-1.svc"));
        // No anti-race backoff, just the settle delay
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reachable_peer_ahead_blocks_founding() {
        let cluster = MockCluster::new(["node-0.svc", "node-1.svc"]);
        let client = cluster.client("node-1.svc");
        let peers = PeerSet::new(["node-0.svc", "node-1.svc"]);
        let identity = peers.resolve("node-1");
        let negotiator = Negotiator::new(&client, &peers, &identity, settings());

        let started = tokio::time::Instant::now();
        let result = negotiator.negotiate(None, None).await.unwrap();
        assert_eq!(result.outcome, BootstrapOutcome::RetryExhausted);
        assert_eq!(result.primary, None);
        assert_eq!(cluster.initiations(), 0);
        // Four backoffs between five iterations
        assert!(started.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_but_leaderless_is_not_fatal() {
        let cluster = MockCluster::new(["node-0.svc", "node-1.svc"]);
        cluster.form_set("rs0", "node-0.svc", &["node-1.svc"]);
        cluster.set_down("node-0.svc", true);
        let client = cluster.client("node-1.svc");
        let peers = PeerSet::new(["node-0.svc", "node-1.svc"]);
        let identity = peers.resolve("node-1");
        let negotiator = Negotiator::new(&client, &peers, &identity, settings());

        let result = negotiator.negotiate(None, None).await.unwrap();
        assert_eq!(result.outcome, BootstrapOutcome::RetryExhausted);
        assert_eq!(cluster.initiations(), 0);
        assert!(!result.outcome.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_service_address_fails_initiate() {
        let cluster = MockCluster::new(["node-0.svc"]);
        let client = cluster.client("node-0.svc");
        let peers = PeerSet::new(["node-0.svc"]);
        let identity = peers.resolve("unrelated");
        let negotiator = Negotiator::new(&client, &peers, &identity, settings());

        let err = negotiator.negotiate(None, None).await.unwrap_err();
        assert!(matches!(err, Error::UnknownServiceAddress(_)));
    }
}
