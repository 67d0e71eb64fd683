//! Admin client backed by the engine's command-line shell

use crate::common::{Credentials, Error, Result};
use crate::engine::admin::{AddMemberReply, AdminClient, CommandReply, ReplicaSetRole, Target, UserSpec};
use crate::engine::command::{self, AdminCommand};
use crate::tls::TlsMaterial;
use async_trait::async_trait;
use serde_json::Value;
use std::ffi::OsString;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Runs every administrative command as a one-shot shell invocation.
pub struct ShellAdminClient {
    shell_bin: String,
    port: u16,
    ipv6: bool,
    tls_args: Vec<OsString>,
}

impl ShellAdminClient {
    pub fn new(shell_bin: impl Into<String>, port: u16, ipv6: bool, tls: Option<&TlsMaterial>) -> Self {
        Self {
            shell_bin: shell_bin.into(),
            port,
            ipv6,
            tls_args: tls.map(TlsMaterial::shell_args).unwrap_or_default(),
        }
    }

    /// Arguments for one invocation, program excluded.
    fn connection_args(&self, target: &Target) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["admin".into(), "--quiet".into()];
        match target {
            Target::Local => {
                args.push("--port".into());
                args.push(self.port.to_string().into());
            }
            Target::Peer(host) => {
                args.push("--host".into());
                args.push(host.into());
                if self.ipv6 {
                    args.push("--ipv6".into());
                }
            }
        }
        args.extend(self.tls_args.iter().cloned());
        args
    }

    async fn eval(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
        cmd: &AdminCommand,
    ) -> Result<Value> {
        let program = command::render_program(cmd, auth);

        let output = Command::new(&self.shell_bin)
            .args(self.connection_args(target))
            .arg("--eval")
            .arg(program)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::ConnectionFailed(format!("{}: {}", self.shell_bin, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match command::parse_reply(&stdout) {
            Some(doc) => {
                tracing::trace!("{} on {} -> {}", cmd.name(), target, doc);
                Ok(doc)
            }
            None if !output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let detail = last_line(&stderr).or_else(|| last_line(&stdout)).unwrap_or("no output");
                Err(Error::ConnectionFailed(format!(
                    "{} on {} ({}): {}",
                    cmd.name(),
                    target,
                    output.status,
                    detail
                )))
            }
            None => Err(Error::MalformedReply {
                target: target.to_string(),
                reason: format!("{}: no reply document in shell output", cmd.name()),
            }),
        }
    }

    async fn reply(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
        cmd: AdminCommand,
    ) -> Result<CommandReply> {
        let doc = self.eval(target, auth, &cmd).await?;
        Ok(command::command_reply(&doc))
    }
}

fn last_line(s: &str) -> Option<&str> {
    s.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}

#[async_trait]
impl AdminClient for ShellAdminClient {
    async fn ping(&self, target: &Target) -> Result<bool> {
        Ok(self.reply(target, None, AdminCommand::Ping).await?.ok)
    }

    async fn replica_set_role(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
    ) -> Result<ReplicaSetRole> {
        let doc = self.eval(target, auth, &AdminCommand::ReplSetGetStatus).await?;
        Ok(command::replica_set_role(&doc))
    }

    async fn is_master(&self, target: &Target, auth: Option<&Credentials>) -> Result<bool> {
        let doc = self.eval(target, auth, &AdminCommand::IsMaster).await?;
        Ok(command::is_master(&doc))
    }

    async fn initiate(
        &self,
        target: &Target,
        replica_set: &str,
        founding_host: &str,
    ) -> Result<CommandReply> {
        let cmd = AdminCommand::ReplSetInitiate {
            replica_set: replica_set.to_string(),
            host: founding_host.to_string(),
        };
        self.reply(target, None, cmd).await
    }

    async fn add_member(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
        host: &str,
    ) -> Result<AddMemberReply> {
        let cmd = AdminCommand::ReplSetAdd {
            host: host.to_string(),
        };
        let doc = self.eval(target, auth, &cmd).await?;
        Ok(command::add_member_reply(&doc))
    }

    async fn member_hosts(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
    ) -> Result<Vec<String>> {
        let doc = self.eval(target, auth, &AdminCommand::ReplSetGetConfig).await?;
        command::member_hosts(&doc).ok_or_else(|| Error::MalformedReply {
            target: target.to_string(),
            reason: format!("replSetGetConfig: {}", command::command_reply(&doc).reason()),
        })
    }

    async fn authenticate(&self, target: &Target, credentials: &Credentials) -> Result<bool> {
        let cmd = AdminCommand::Authenticate {
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        };
        Ok(self.reply(target, None, cmd).await?.ok)
    }

    async fn change_password(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
        username: &str,
        new_password: &str,
    ) -> Result<CommandReply> {
        let cmd = AdminCommand::UpdatePassword {
            username: username.to_string(),
            password: new_password.to_string(),
        };
        self.reply(target, auth, cmd).await
    }

    async fn create_user(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
        user: &UserSpec,
    ) -> Result<CommandReply> {
        self.reply(target, auth, AdminCommand::CreateUser(user.clone()))
            .await
    }

    async fn count_users(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
        username: &str,
    ) -> Result<u64> {
        let cmd = AdminCommand::UsersInfo {
            username: username.to_string(),
        };
        let doc = self.eval(target, auth, &cmd).await?;
        command::user_count(&doc).ok_or_else(|| Error::CommandRejected {
            command: cmd.name().to_string(),
            reason: command::command_reply(&doc).reason(),
        })
    }

    async fn fsync_lock(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
    ) -> Result<CommandReply> {
        self.reply(target, auth, AdminCommand::FsyncLock).await
    }

    async fn fsync_unlock(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
    ) -> Result<CommandReply> {
        self.reply(target, auth, AdminCommand::FsyncUnlock).await
    }

    async fn shutdown(
        &self,
        target: &Target,
        auth: Option<&Credentials>,
        timeout: Duration,
    ) -> Result<CommandReply> {
        let cmd = AdminCommand::Shutdown {
            timeout_secs: timeout.as_secs(),
        };
        self.reply(target, auth, cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_connection_args() {
        let client = ShellAdminClient::new("mongo", 27017, true, None);
        let args = client.connection_args(&Target::Local);
        assert_eq!(args, vec!["admin", "--quiet", "--port", "27017"]);
    }

    #[test]
    fn test_peer_connection_args() {
        let client = ShellAdminClient::new("mongo", 27017, true, None);
        let args = client.connection_args(&Target::peer("node-1.svc"));
        assert_eq!(args, vec!["admin", "--quiet", "--host", "node-1.svc", "--ipv6"]);

        let client = ShellAdminClient::new("mongo", 27017, false, None);
        let args = client.connection_args(&Target::peer("node-1.svc"));
        assert_eq!(args, vec!["admin", "--quiet", "--host", "node-1.svc"]);
    }

    #[tokio::test]
    async fn test_missing_shell_is_connection_failure() {
        let client = ShellAdminClient::new("/nonexistent/mongo-shell", 27017, false, None);
        let err = client.ping(&Target::Local).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed(_)));
        assert!(err.is_retryable());
    }
}
