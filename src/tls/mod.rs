//! Transport security material
//!
//! When the configuration volume carries a cluster CA pair, every node signs
//! its own certificate with it on startup. The result is handed to the admin
//! shell on every call.

pub mod certificate;

pub use certificate::{subject_alt_names, CertificateProvisioner, SanEntry, CERT_VALIDITY_DAYS};

use std::ffi::OsString;
use std::path::PathBuf;

/// Generated key material for this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub ca_cert_path: PathBuf,
    pub ca_key_path: PathBuf,
    pub node_key_path: PathBuf,
    pub node_cert_path: PathBuf,
    /// Certificate followed by key, as the engine and shell expect
    pub combined_pem_path: PathBuf,
    pub subject_alt_names: Vec<SanEntry>,
}

impl TlsMaterial {
    /// Transport arguments for the admin shell.
    pub fn shell_args(&self) -> Vec<OsString> {
        vec![
            "--ssl".into(),
            "--sslCAFile".into(),
            self.ca_cert_path.clone().into(),
            "--sslPEMKeyFile".into(),
            self.combined_pem_path.clone().into(),
        ]
    }
}
