//! Shell command programs and reply decoding
//!
//! Each administrative command is rendered as a small script for the engine's
//! shell. The script prints exactly one line: `JSON.stringify` of the command
//! reply. Shell exceptions and failed authentication are folded into the same
//! `{ ok: 0, code, codeName, errmsg }` shape so that the only non-reply
//! outcome left is a transport failure.

use crate::common::Credentials;
use crate::engine::admin::{AddMemberReply, CommandReply, ReplicaSetRole, UserSpec};
use serde_json::{json, Value};

/// Engine error codes the coordinator branches on
pub mod codes {
    pub const UNAUTHORIZED: i64 = 13;
    pub const AUTHENTICATION_FAILED: i64 = 18;
    pub const NODE_NOT_FOUND: i64 = 74;
    pub const NOT_YET_INITIALIZED: i64 = 94;
}

/// Administrative commands understood by the shell client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Ping,
    ReplSetGetStatus,
    IsMaster,
    ReplSetInitiate { replica_set: String, host: String },
    ReplSetAdd { host: String },
    ReplSetGetConfig,
    Authenticate { username: String, password: String },
    UpdatePassword { username: String, password: String },
    CreateUser(UserSpec),
    UsersInfo { username: String },
    FsyncLock,
    FsyncUnlock,
    Shutdown { timeout_secs: u64 },
}

impl AdminCommand {
    pub fn name(&self) -> &'static str {
        match self {
            AdminCommand::Ping => "ping",
            AdminCommand::ReplSetGetStatus => "replSetGetStatus",
            AdminCommand::IsMaster => "isMaster",
            AdminCommand::ReplSetInitiate { .. } => "replSetInitiate",
            AdminCommand::ReplSetAdd { .. } => "rs.add",
            AdminCommand::ReplSetGetConfig => "replSetGetConfig",
            AdminCommand::Authenticate { .. } => "auth",
            AdminCommand::UpdatePassword { .. } => "updateUser",
            AdminCommand::CreateUser(_) => "createUser",
            AdminCommand::UsersInfo { .. } => "usersInfo",
            AdminCommand::FsyncLock => "fsync",
            AdminCommand::FsyncUnlock => "fsyncUnlock",
            AdminCommand::Shutdown { .. } => "shutdown",
        }
    }

    /// Command document for `runCommand`, if this is a plain database command.
    pub fn document(&self) -> Option<Value> {
        let doc = match self {
            AdminCommand::Ping => json!({ "ping": 1 }),
            AdminCommand::ReplSetGetStatus => json!({ "replSetGetStatus": 1 }),
            AdminCommand::IsMaster => json!({ "isMaster": 1 }),
            AdminCommand::ReplSetInitiate { replica_set, host } => json!({
                "replSetInitiate": {
                    "_id": replica_set,
                    "members": [{ "_id": 0, "host": host }]
                }
            }),
            AdminCommand::ReplSetGetConfig => json!({ "replSetGetConfig": 1 }),
            AdminCommand::UpdatePassword { username, password } => json!({
                "updateUser": username,
                "pwd": password
            }),
            AdminCommand::CreateUser(spec) => json!({
                "createUser": spec.credentials.username,
                "pwd": spec.credentials.password,
                "roles": spec.roles
            }),
            AdminCommand::UsersInfo { username } => json!({ "usersInfo": username }),
            AdminCommand::FsyncLock => json!({ "fsync": 1, "lock": true }),
            AdminCommand::FsyncUnlock => json!({ "fsyncUnlock": 1 }),
            AdminCommand::Shutdown { timeout_secs } => json!({
                "shutdown": 1,
                "force": true,
                "timeoutSecs": timeout_secs
            }),
            AdminCommand::ReplSetAdd { .. } | AdminCommand::Authenticate { .. } => return None,
        };
        Some(doc)
    }

    /// JavaScript expression producing the reply object.
    fn expression(&self) -> String {
        match self {
            AdminCommand::ReplSetAdd { host } => format!("rs.add({})", js_string(host)),
            AdminCommand::Authenticate { username, password } => format!(
                "{{ ok: admin.auth({}, {}) ? 1 : 0 }}",
                js_string(username),
                js_string(password)
            ),
            _ => match self.document() {
                Some(doc) => format!("admin.runCommand({})", doc),
                None => "{ ok: 0, errmsg: 'unsupported command' }".to_string(),
            },
        }
    }
}

/// Quote a string as a JavaScript literal. JSON string syntax is valid JS.
fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Render the complete `--eval` program for a command.
pub fn render_program(command: &AdminCommand, auth: Option<&Credentials>) -> String {
    let auth_prelude = match auth {
        Some(creds) => format!(
            "try {{ if (!admin.auth({user}, {pwd})) {{ return {{ ok: 0, code: {code}, codeName: 'AuthenticationFailed', errmsg: 'Authentication failed.' }}; }} }} \
             catch (e) {{ return {{ ok: 0, code: {code}, codeName: 'AuthenticationFailed', errmsg: String(e) }}; }} ",
            user = js_string(&creds.username),
            pwd = js_string(&creds.password),
            code = codes::AUTHENTICATION_FAILED,
        ),
        None => String::new(),
    };

    format!(
        "print(JSON.stringify((function () {{ var admin = db.getSiblingDB('admin'); {prelude}\
         try {{ return {expr}; }} \
         catch (e) {{ return {{ ok: 0, code: e.code || null, codeName: e.codeName || null, errmsg: String(e) }}; }} \
         }})()));",
        prelude = auth_prelude,
        expr = command.expression(),
    )
}

/// Find the reply document in shell output: the last line that parses as a
/// JSON object. Shell banners and warnings on other lines are ignored.
pub fn parse_reply(stdout: &str) -> Option<Value> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str::<Value>(line).ok().filter(Value::is_object))
}

fn ok_field(doc: &Value) -> bool {
    match doc.get("ok") {
        Some(Value::Bool(b)) => *b,
        Some(v) => v.as_f64().map(|n| n == 1.0).unwrap_or(false),
        None => false,
    }
}

/// Decode the generic reply fields.
pub fn command_reply(doc: &Value) -> CommandReply {
    CommandReply {
        ok: ok_field(doc),
        code: doc.get("code").and_then(Value::as_i64),
        code_name: doc
            .get("codeName")
            .and_then(Value::as_str)
            .map(str::to_string),
        errmsg: doc.get("errmsg").and_then(Value::as_str).map(str::to_string),
    }
}

/// Decode a `replSetGetStatus` reply.
pub fn replica_set_role(doc: &Value) -> ReplicaSetRole {
    let reply = command_reply(doc);
    if reply.ok {
        return doc
            .get("myState")
            .and_then(Value::as_i64)
            .map(ReplicaSetRole::from_member_state)
            .unwrap_or(ReplicaSetRole::Unknown);
    }

    let not_initialized = reply.code == Some(codes::NOT_YET_INITIALIZED)
        || reply.code_name.as_deref() == Some("NotYetInitialized")
        || reply
            .errmsg
            .as_deref()
            .map(|m| m.contains("no replset config has been received"))
            .unwrap_or(false);

    if not_initialized {
        ReplicaSetRole::NoConfigYet
    } else {
        ReplicaSetRole::Unknown
    }
}

/// Decode an `isMaster` reply.
pub fn is_master(doc: &Value) -> bool {
    doc.get("ismaster").and_then(Value::as_bool).unwrap_or(false)
}

/// Decode the member host list of a `replSetGetConfig` reply.
pub fn member_hosts(doc: &Value) -> Option<Vec<String>> {
    let members = doc.get("config")?.get("members")?.as_array()?;
    Some(
        members
            .iter()
            .filter_map(|m| m.get("host").and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
    )
}

/// Decode an add-member reply.
pub fn add_member_reply(doc: &Value) -> AddMemberReply {
    let reply = command_reply(doc);
    if reply.ok {
        return AddMemberReply::Added;
    }

    let quorum = reply.code == Some(codes::NODE_NOT_FOUND)
        || reply.code_name.as_deref() == Some("NodeNotFound")
        || reply
            .errmsg
            .as_deref()
            .map(|m| m.contains("Quorum check failed"))
            .unwrap_or(false);

    if quorum {
        AddMemberReply::QuorumCheckFailed(reply.reason())
    } else {
        AddMemberReply::Rejected(reply.reason())
    }
}

/// Decode a `usersInfo` reply into a user count.
pub fn user_count(doc: &Value) -> Option<u64> {
    if !ok_field(doc) {
        return None;
    }
    doc.get("users")
        .and_then(Value::as_array)
        .map(|users| users.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_program_without_auth() {
        let program = render_program(&AdminCommand::Ping, None);
        assert!(program.starts_with("print(JSON.stringify("));
        assert!(program.contains(r#"admin.runCommand({"ping":1})"#));
        assert!(!program.contains("admin.auth("));
    }

    #[test]
    fn test_render_program_quotes_credentials() {
        let creds = Credentials::new("admin", "pa'ss\"word");
        let program = render_program(&AdminCommand::ReplSetGetStatus, Some(&creds));
        assert!(program.contains(r#"admin.auth("admin", "pa'ss\"word")"#));
        assert!(program.contains("AuthenticationFailed"));
    }

    #[test]
    fn test_initiate_document() {
        let cmd = AdminCommand::ReplSetInitiate {
            replica_set: "rs0".into(),
            host: "node-0.svc".into(),
        };
        assert_eq!(
            cmd.document().unwrap(),
            json!({"replSetInitiate": {"_id": "rs0", "members": [{"_id": 0, "host": "node-0.svc"}]}})
        );
    }

    #[test]
    fn test_create_user_document_carries_roles() {
        let spec = UserSpec::metrics(Credentials::new("metrics", "pw"));
        let doc = AdminCommand::CreateUser(spec).document().unwrap();
        assert_eq!(doc["createUser"], "metrics");
        assert_eq!(doc["roles"][0], json!({"role": "clusterMonitor", "db": "admin"}));
        assert_eq!(doc["roles"][1], json!({"role": "read", "db": "local"}));
    }

    #[test]
    fn test_parse_reply_skips_noise() {
        let stdout = "WARNING: shell and server versions do not match\n{\"ok\":1,\"myState\":2}\n";
        let doc = parse_reply(stdout).unwrap();
        assert_eq!(replica_set_role(&doc), ReplicaSetRole::Secondary);
        assert!(parse_reply("connecting to: mongodb://127.0.0.1\n").is_none());
    }

    #[test]
    fn test_status_not_initialized() {
        let doc = json!({
            "ok": 0,
            "errmsg": "no replset config has been received",
            "code": 94,
            "codeName": "NotYetInitialized"
        });
        assert_eq!(replica_set_role(&doc), ReplicaSetRole::NoConfigYet);
    }

    #[test]
    fn test_status_unauthorized_is_unknown() {
        let doc = json!({
            "ok": 0,
            "errmsg": "command replSetGetStatus requires authentication",
            "code": 13,
            "codeName": "Unauthorized"
        });
        assert_eq!(replica_set_role(&doc), ReplicaSetRole::Unknown);
    }

    #[test]
    fn test_member_hosts() {
        let doc = json!({"ok": 1, "config": {"_id": "rs0", "members": [
            {"_id": 0, "host": "node-0.svc:27017"},
            {"_id": 1, "host": "node-1.svc:27017"}
        ]}});
        assert_eq!(
            member_hosts(&doc).unwrap(),
            vec!["node-0.svc:27017".to_string(), "node-1.svc:27017".to_string()]
        );
        assert!(member_hosts(&json!({"ok": 0})).is_none());
    }

    #[test]
    fn test_add_member_quorum_failure() {
        let doc = json!({
            "ok": 0,
            "errmsg": "Quorum check failed because not all proposed set members responded affirmatively",
            "code": 74,
            "codeName": "NodeNotFound"
        });
        assert!(matches!(
            add_member_reply(&doc),
            AddMemberReply::QuorumCheckFailed(_)
        ));

        let doc = json!({"ok": 0, "errmsg": "replSetReconfig should only be run on PRIMARY", "code": 10107, "codeName": "NotMaster"});
        assert!(matches!(add_member_reply(&doc), AddMemberReply::Rejected(_)));
        assert_eq!(add_member_reply(&json!({"ok": 1})), AddMemberReply::Added);
    }

    #[test]
    fn test_user_count() {
        assert_eq!(user_count(&json!({"ok": 1, "users": []})), Some(0));
        assert_eq!(user_count(&json!({"ok": 1.0, "users": [{"user": "metrics"}]})), Some(1));
        assert_eq!(user_count(&json!({"ok": 0, "codeName": "Unauthorized"})), None);
    }
}
