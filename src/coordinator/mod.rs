//! Replica-set bootstrap coordinator
//!
//! The coordinator is responsible for:
//! - Peer discovery (stdin peer list, own service address)
//! - Credential persistence and drift repair
//! - Membership negotiation (found, join or confirm primary)
//! - Monitoring account provisioning

pub mod bootstrap;
pub mod credentials;
pub mod metrics_user;
pub mod negotiator;
pub mod peers;
pub mod reconciler;

pub use bootstrap::{BootstrapReport, Bootstrapper};
pub use credentials::CredentialStore;
pub use metrics_user::{ensure_metrics_user, MetricsUserOutcome};
pub use negotiator::{BootstrapOutcome, Negotiation, Negotiator, NegotiatorSettings};
pub use peers::{NodeIdentity, PeerSet};
pub use reconciler::{CredentialReconciler, ReconcileOutcome};
