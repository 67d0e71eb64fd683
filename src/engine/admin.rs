//! Administrative protocol seam
//!
//! Everything the coordinator asks of a database engine goes through
//! [`AdminClient`]. Replies are typed: callers branch on roles and reply
//! variants, never on human-readable text.

use crate::common::{Credentials, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which engine a command is sent to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// The engine supervised by this coordinator
    Local,
    /// Another cluster member, by peer address
    Peer(String),
}

impl Target {
    pub fn peer(addr: impl Into<String>) -> Self {
        Target::Peer(addr.into())
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Local => write!(f, "localhost"),
            Target::Peer(addr) => write!(f, "{}", addr),
        }
    }
}

/// Replica-set role as reported by `replSetGetStatus`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaSetRole {
    Unknown,
    Primary,
    Secondary,
    NoConfigYet,
}

impl ReplicaSetRole {
    /// Map a `myState` member state code.
    pub fn from_member_state(state: i64) -> Self {
        match state {
            1 => ReplicaSetRole::Primary,
            2 => ReplicaSetRole::Secondary,
            _ => ReplicaSetRole::Unknown,
        }
    }

    /// Does this role prove that a replica-set configuration exists?
    pub fn proves_configured(&self) -> bool {
        matches!(self, ReplicaSetRole::Primary | ReplicaSetRole::Secondary)
    }
}

impl std::fmt::Display for ReplicaSetRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicaSetRole::Unknown => write!(f, "unknown"),
            ReplicaSetRole::Primary => write!(f, "primary"),
            ReplicaSetRole::Secondary => write!(f, "secondary"),
            ReplicaSetRole::NoConfigYet => write!(f, "no-config-yet"),
        }
    }
}

/// Generic `{ ok, code, codeName, errmsg }` command reply
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandReply {
    pub ok: bool,
    pub code: Option<i64>,
    pub code_name: Option<String>,
    pub errmsg: Option<String>,
}

impl CommandReply {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }

    pub fn failed(code_name: impl Into<String>, errmsg: impl Into<String>) -> Self {
        Self {
            ok: false,
            code: None,
            code_name: Some(code_name.into()),
            errmsg: Some(errmsg.into()),
        }
    }

    /// Human-readable failure reason for logs.
    pub fn reason(&self) -> String {
        match (&self.code_name, &self.errmsg) {
            (Some(name), Some(msg)) => format!("{}: {}", name, msg),
            (None, Some(msg)) => msg.clone(),
            (Some(name), None) => name.clone(),
            (None, None) if self.ok => "ok".to_string(),
            (None, None) => "unspecified failure".to_string(),
        }
    }
}

/// Outcome of an add-member request against the primary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddMemberReply {
    Added,
    /// The reconfiguration could not reach a majority of voting members
    QuorumCheckFailed(String),
    Rejected(String),
}

/// Role grant on a database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub role: String,
    pub db: String,
}

impl RoleGrant {
    pub fn new(role: impl Into<String>, db: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            db: db.into(),
        }
    }
}

/// An account to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSpec {
    pub credentials: Credentials,
    pub roles: Vec<RoleGrant>,
}

impl UserSpec {
    /// Cluster administrator: `root` on `admin`.
    pub fn admin(credentials: Credentials) -> Self {
        Self {
            credentials,
            roles: vec![RoleGrant::new("root", "admin")],
        }
    }

    /// Read-only monitoring account.
    pub fn metrics(credentials: Credentials) -> Self {
        Self {
            credentials,
            roles: vec![
                RoleGrant::new("clusterMonitor", "admin"),
                RoleGrant::new("read", "local"),
            ],
        }
    }
}

/// Administrative client for local and remote engines.
///
/// Transport failures (engine down, peer unreachable) surface as
/// [`crate::Error::ConnectionFailed`]; anything the engine answered, even an
/// authorization failure, is a reply.
#[async_trait]
pub trait AdminClient: Send + Sync {
    /// Liveness command.
    async fn ping(&self, target: &Target) -> Result<bool>;

    async fn replica_set_role(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
    ) -> Result<ReplicaSetRole>;

    /// `isMaster.ismaster`: false while a fresh primary is still catching up.
    async fn is_master(&self, target: &Target, auth: Option<&Credentials>) -> Result<bool>;

    /// Initiate a set with a single founding member.
    async fn initiate(
        &self,
        target: &Target,
        replica_set: &str,
        founding_host: &str,
    ) -> Result<CommandReply>;

    async fn add_member(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
        host: &str,
    ) -> Result<AddMemberReply>;

    /// Hosts listed in the replica-set configuration.
    async fn member_hosts(&self, target: &Target, auth: Option<&Credentials>)
        -> Result<Vec<String>>;

    async fn authenticate(&self, target: &Target, credentials: &Credentials) -> Result<bool>;

    async fn change_password(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
        username: &str,
        new_password: &str,
    ) -> Result<CommandReply>;

    async fn create_user(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
        user: &UserSpec,
    ) -> Result<CommandReply>;

    async fn count_users(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
        username: &str,
    ) -> Result<u64>;

    async fn fsync_lock(&self, target: &Target, auth: Option<&Credentials>)
        -> Result<CommandReply>;

    async fn fsync_unlock(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
    ) -> Result<CommandReply>;

    async fn shutdown(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
        timeout: Duration,
    ) -> Result<CommandReply>;
}
