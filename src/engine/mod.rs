//! Database engine access
//!
//! - `admin`: the typed administrative protocol ([`AdminClient`])
//! - `command` / `shell`: its implementation over the engine's admin shell
//! - `supervisor`: the engine child process
//! - `readiness`: waiting for the engine to answer

pub mod admin;
pub mod command;
#[cfg(any(test, feature = "test-utilities"))]
pub mod mock;
pub mod readiness;
pub mod shell;
pub mod supervisor;

pub use admin::{
    AddMemberReply, AdminClient, CommandReply, ReplicaSetRole, RoleGrant, Target, UserSpec,
};
pub use readiness::wait_until_ready;
pub use shell::ShellAdminClient;
pub use supervisor::{EngineProcess, StopReport};
