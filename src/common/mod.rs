//! Common utilities and types shared across replset-bootstrap

pub mod config;
pub mod error;
pub mod logging;
pub mod utils;

pub use config::{BootstrapConfig, Credentials};
pub use error::{Error, Result};
pub use logging::{init_logging, RunLog};
pub use utils::{base_workload_name, local_hostname, poll_until, poll_value, RetryPolicy};
