//! # replset-bootstrap
//!
//! Bootstrap coordinator for one MongoDB replica-set member running in an
//! orchestrated container:
//! - Supervises the local `mongod` and stops it in order on exit
//! - Signs a node certificate with the cluster CA, when one is mounted
//! - Discovers peers from stdin and finds its own service address
//! - Joins the existing replica set, or founds a new one exactly once
//! - Repairs admin password drift and provisions a monitoring account
//!
//! ## Architecture
//!
//! ```text
//!   stdin peers ──▶ PeerSet / NodeIdentity
//!                        │
//!   CA pair ──▶ CertificateProvisioner ──▶ TlsMaterial
//!                        │
//!              ┌─────────▼──────────┐        ┌──────────────┐
//!              │    Bootstrapper    │──────▶ │ AdminClient  │──▶ mongo shell
//!              │ readiness          │        └──────────────┘
//!              │ credential store   │
//!              │ negotiator         │        ┌──────────────┐
//!              │ reconciler         │        │EngineProcess │──▶ mongod
//!              │ metrics user       │        └──────────────┘
//!              └────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! peer-finder ... | replset-bootstrap --work-dir /work-dir --config-dir /data/configdb
//!
//! # As an init container: stop the engine once bootstrapped
//! replset-bootstrap --exit-after-bootstrap < peers.txt
//! ```

#![allow(clippy::result_large_err)]

pub mod common;
pub mod coordinator;
pub mod engine;
pub mod tls;

// Re-export commonly used types
pub use common::{BootstrapConfig, Credentials, Error, Result};
pub use coordinator::{BootstrapOutcome, Bootstrapper, Negotiation};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
