//! In-memory replica-set cluster for testing.
//!
//! Models just enough of the engine to drive the coordinator: per-node
//! reachability and role, one replica-set configuration, a replicated user
//! list and a log of every command received.
//!
//! Available during unit tests and with the `test-utilities` feature:
//!
//! ```toml
//! [dev-dependencies]
//! replset-bootstrap = { path = ".", features = ["test-utilities"] }
//! ```

use crate::common::{Credentials, Error, Result};
use crate::engine::admin::{
    AddMemberReply, AdminClient, CommandReply, ReplicaSetRole, Target, UserSpec,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const PORT: u16 = 27017;

#[derive(Debug, Clone)]
struct MockNode {
    down: bool,
    configured: bool,
    role: ReplicaSetRole,
    catch_up_remaining: u32,
}

impl Default for MockNode {
    fn default() -> Self {
        Self {
            down: false,
            configured: false,
            role: ReplicaSetRole::NoConfigYet,
            catch_up_remaining: 0,
        }
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    nodes: BTreeMap<String, MockNode>,
    replica_set: Option<String>,
    members: Vec<String>,
    users: BTreeMap<String, String>,
    catch_up_polls: u32,
    quorum_check_fails: bool,
    add_member_rejection: Option<String>,
    ignore_password_changes: bool,
    initiations: u32,
    commands: Vec<(String, String)>,
}

impl ClusterState {
    fn record(&mut self, command: &str, host: &str) {
        self.commands.push((command.to_string(), host.to_string()));
    }

    fn node(&self, host: &str) -> Result<&MockNode> {
        match self.nodes.get(host) {
            Some(node) if !node.down => Ok(node),
            _ => Err(Error::ConnectionFailed(format!("{}: connection refused", host))),
        }
    }

    fn node_mut(&mut self, host: &str) -> Result<&mut MockNode> {
        match self.nodes.get_mut(host) {
            Some(node) if !node.down => Ok(node),
            _ => Err(Error::ConnectionFailed(format!("{}: connection refused", host))),
        }
    }

    /// Users only exist on nodes that hold the replica-set configuration.
    fn users_visible(&self, host: &str) -> bool {
        self.nodes
            .get(host)
            .map(|n| n.configured && !self.users.is_empty())
            .unwrap_or(false)
    }

    fn authorized(&self, host: &str, auth: Option<&Credentials>) -> bool {
        let has_users = self.users_visible(host);
        match auth {
            Some(creds) => {
                has_users && self.users.get(&creds.username) == Some(&creds.password)
            }
            // Localhost exception: open until the first user exists
            None => !has_users,
        }
    }
}

fn with_port(host: &str) -> String {
    if host.contains(':') {
        host.to_string()
    } else {
        format!("{}:{}", host, PORT)
    }
}

fn without_port(host: &str) -> &str {
    host.split(':').next().unwrap_or(host)
}

fn unauthorized() -> CommandReply {
    CommandReply {
        ok: false,
        code: Some(13),
        code_name: Some("Unauthorized".into()),
        errmsg: Some("command requires authentication".into()),
    }
}

/// Shared in-memory cluster
#[derive(Debug, Clone, Default)]
pub struct MockCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MockCluster {
    /// A cluster of fresh, reachable, unconfigured nodes.
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cluster = Self::default();
        {
            let mut state = cluster.state();
            for host in hosts {
                state.nodes.insert(host.into(), MockNode::default());
            }
        }
        cluster
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admin client as seen from `host` (`Target::Local` resolves to it).
    pub fn client(&self, host: &str) -> MockAdminClient {
        MockAdminClient {
            cluster: self.clone(),
            local: host.to_string(),
        }
    }

    pub fn set_down(&self, host: &str, down: bool) {
        self.state().nodes.entry(host.to_string()).or_default().down = down;
    }

    /// Pre-form a set with `primary` as primary and `secondaries` joined.
    pub fn form_set(&self, replica_set: &str, primary: &str, secondaries: &[&str]) {
        let mut state = self.state();
        state.replica_set = Some(replica_set.to_string());
        state.members = std::iter::once(primary)
            .chain(secondaries.iter().copied())
            .map(with_port)
            .collect();

        let node = state.nodes.entry(primary.to_string()).or_default();
        node.configured = true;
        node.role = ReplicaSetRole::Primary;
        for host in secondaries {
            let node = state.nodes.entry(host.to_string()).or_default();
            node.configured = true;
            node.role = ReplicaSetRole::Secondary;
        }
    }

    /// Number of `isMaster` polls answering false after a node becomes primary.
    pub fn set_catch_up_polls(&self, polls: u32) {
        let mut state = self.state();
        state.catch_up_polls = polls;
        for node in state.nodes.values_mut() {
            if node.role == ReplicaSetRole::Primary {
                node.catch_up_remaining = polls;
            }
        }
    }

    pub fn fail_quorum_checks(&self, fail: bool) {
        self.state().quorum_check_fails = fail;
    }

    pub fn reject_add_member(&self, reason: impl Into<String>) {
        self.state().add_member_rejection = Some(reason.into());
    }

    /// Accept password changes without applying them.
    pub fn ignore_password_changes(&self, ignore: bool) {
        self.state().ignore_password_changes = ignore;
    }

    /// Create or overwrite a user, bypassing authorization.
    pub fn put_user(&self, credentials: &Credentials) {
        self.state()
            .users
            .insert(credentials.username.clone(), credentials.password.clone());
    }

    pub fn password_of(&self, username: &str) -> Option<String> {
        self.state().users.get(username).cloned()
    }

    pub fn has_user(&self, username: &str) -> bool {
        self.state().users.contains_key(username)
    }

    pub fn role_of(&self, host: &str) -> ReplicaSetRole {
        self.state()
            .nodes
            .get(host)
            .map(|n| n.role)
            .unwrap_or(ReplicaSetRole::Unknown)
    }

    pub fn members(&self) -> Vec<String> {
        self.state().members.clone()
    }

    pub fn replica_set(&self) -> Option<String> {
        self.state().replica_set.clone()
    }

    pub fn initiations(&self) -> u32 {
        self.state().initiations
    }

    /// Commands received so far, as `(command, host)` pairs.
    pub fn commands(&self) -> Vec<(String, String)> {
        self.state().commands.clone()
    }

    pub fn command_count(&self, command: &str) -> usize {
        self.state()
            .commands
            .iter()
            .filter(|(name, _)| name == command)
            .count()
    }

    pub fn clear_commands(&self) {
        self.state().commands.clear();
    }
}

/// [`AdminClient`] over a [`MockCluster`], bound to one local node
#[derive(Debug, Clone)]
pub struct MockAdminClient {
    cluster: MockCluster,
    local: String,
}

impl MockAdminClient {
    fn host<'a>(&'a self, target: &'a Target) -> &'a str {
        match target {
            Target::Local => &self.local,
            Target::Peer(addr) => without_port(addr),
        }
    }
}

#[async_trait]
impl AdminClient for MockAdminClient {
    async fn ping(&self, target: &Target) -> Result<bool> {
        let host = self.host(target);
        let mut state = self.cluster.state();
        state.record("ping", host);
        state.node(host).map(|_| true)
    }

    async fn replica_set_role(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
    ) -> Result<ReplicaSetRole> {
        let host = self.host(target);
        let mut state = self.cluster.state();
        state.record("replSetGetStatus", host);
        let node = state.node(host)?;
        if !node.configured {
            return Ok(ReplicaSetRole::NoConfigYet);
        }
        let role = node.role;
        if !state.authorized(host, auth) {
            return Ok(ReplicaSetRole::Unknown);
        }
        Ok(role)
    }

    async fn is_master(&self, target: &Target, auth: Option<&Credentials>) -> Result<bool> {
        let host = self.host(target);
        let mut state = self.cluster.state();
        state.record("isMaster", host);
        state.node(host)?;
        let authorized = state.authorized(host, auth);
        let node = state.node_mut(host)?;
        if !authorized || node.role != ReplicaSetRole::Primary {
            return Ok(false);
        }
        if node.catch_up_remaining > 0 {
            node.catch_up_remaining -= 1;
            return Ok(false);
        }
        Ok(true)
    }

    async fn initiate(
        &self,
        target: &Target,
        replica_set: &str,
        founding_host: &str,
    ) -> Result<CommandReply> {
        let host = self.host(target);
        let mut state = self.cluster.state();
        state.record("replSetInitiate", host);
        let catch_up = state.catch_up_polls;
        let node = state.node_mut(host)?;
        if node.configured {
            return Ok(CommandReply::failed(
                "AlreadyInitialized",
                "already initialized",
            ));
        }
        node.configured = true;
        node.role = ReplicaSetRole::Primary;
        node.catch_up_remaining = catch_up;

        state.replica_set = Some(replica_set.to_string());
        state.members = vec![with_port(founding_host)];
        state.initiations += 1;
        Ok(CommandReply::ok())
    }

    async fn add_member(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
        member: &str,
    ) -> Result<AddMemberReply> {
        let host = self.host(target);
        let mut state = self.cluster.state();
        state.record("rs.add", host);
        let role = state.node(host)?.role;
        if !state.authorized(host, auth) {
            return Ok(AddMemberReply::Rejected(unauthorized().reason()));
        }
        if role != ReplicaSetRole::Primary {
            return Ok(AddMemberReply::Rejected(
                "NotMaster: replSetReconfig should only be run on PRIMARY".into(),
            ));
        }
        if state.quorum_check_fails {
            return Ok(AddMemberReply::QuorumCheckFailed(
                "NodeNotFound: Quorum check failed because not all proposed set members responded affirmatively".into(),
            ));
        }
        if let Some(reason) = state.add_member_rejection.clone() {
            return Ok(AddMemberReply::Rejected(reason));
        }

        let member = with_port(member);
        if !state.members.contains(&member) {
            state.members.push(member.clone());
        }
        if let Some(node) = state.nodes.get_mut(without_port(&member)) {
            node.configured = true;
            node.role = ReplicaSetRole::Secondary;
        }
        Ok(AddMemberReply::Added)
    }

    async fn member_hosts(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
    ) -> Result<Vec<String>> {
        let host = self.host(target);
        let mut state = self.cluster.state();
        state.record("replSetGetConfig", host);
        let configured = state.node(host)?.configured;
        if !configured || !state.authorized(host, auth) {
            return Err(Error::MalformedReply {
                target: host.to_string(),
                reason: "replSetGetConfig: no configuration".into(),
            });
        }
        Ok(state.members.clone())
    }

    async fn authenticate(&self, target: &Target, credentials: &Credentials) -> Result<bool> {
        let host = self.host(target);
        let mut state = self.cluster.state();
        state.record("auth", host);
        state.node(host)?;
        Ok(state.authorized(host, Some(credentials)))
    }

    async fn change_password(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
        username: &str,
        new_password: &str,
    ) -> Result<CommandReply> {
        let host = self.host(target);
        let mut state = self.cluster.state();
        state.record("updateUser", host);
        state.node(host)?;
        if !state.authorized(host, auth) {
            return Ok(unauthorized());
        }
        if !state.users.contains_key(username) {
            return Ok(CommandReply::failed("UserNotFound", "Could not find user"));
        }
        if !state.ignore_password_changes {
            state
                .users
                .insert(username.to_string(), new_password.to_string());
        }
        Ok(CommandReply::ok())
    }

    async fn create_user(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
        user: &UserSpec,
    ) -> Result<CommandReply> {
        let host = self.host(target);
        let mut state = self.cluster.state();
        state.record("createUser", host);
        state.node(host)?;
        if !state.authorized(host, auth) {
            return Ok(unauthorized());
        }
        let username = &user.credentials.username;
        if state.users.contains_key(username) {
            return Ok(CommandReply::failed(
                "Location51003",
                format!("User \"{}@admin\" already exists", username),
            ));
        }
        state
            .users
            .insert(username.clone(), user.credentials.password.clone());
        Ok(CommandReply::ok())
    }

    async fn count_users(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
        username: &str,
    ) -> Result<u64> {
        let host = self.host(target);
        let mut state = self.cluster.state();
        state.record("usersInfo", host);
        state.node(host)?;
        if !state.authorized(host, auth) {
            return Err(Error::CommandRejected {
                command: "usersInfo".into(),
                reason: unauthorized().reason(),
            });
        }
        Ok(u64::from(state.users.contains_key(username)))
    }

    async fn fsync_lock(
        &self,
        target: &Target,
        _auth: Option<&Credentials>,
    ) -> Result<CommandReply> {
        let host = self.host(target);
        let mut state = self.cluster.state();
        state.record("fsync", host);
        state.node(host).map(|_| CommandReply::ok())
    }

    async fn fsync_unlock(
        &self,
        target: &Target,
        _auth: Option<&Credentials>,
    ) -> Result<CommandReply> {
        let host = self.host(target);
        let mut state = self.cluster.state();
        state.record("fsyncUnlock", host);
        state.node(host).map(|_| CommandReply::ok())
    }

    async fn shutdown(
        &self,
        target: &Target,
        _auth: Option<&Credentials>,
        _timeout: Duration,
    ) -> Result<CommandReply> {
        let host = self.host(target);
        let mut state = self.cluster.state();
        state.record("shutdown", host);
        state.node_mut(host)?.down = true;
        Ok(CommandReply::ok())
    }
}
