//! Node certificate signing

use crate::common::utils::base_workload_name;
use crate::common::{Error, Result};
use crate::tls::TlsMaterial;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectAlternativeName};
use openssl::x509::{X509NameBuilder, X509Ref, X509Req, X509ReqBuilder, X509};
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

pub const CERT_VALIDITY_DAYS: u32 = 3650;
const NODE_KEY_BITS: u32 = 2048;

/// One subject-alternative-name entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SanEntry {
    Dns(String),
    Ip(IpAddr),
}

impl std::fmt::Display for SanEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SanEntry::Dns(name) => write!(f, "DNS:{}", name),
            SanEntry::Ip(ip) => write!(f, "IP:{}", ip),
        }
    }
}

/// SAN list for a node, in a fixed order with duplicates removed.
pub fn subject_alt_names(
    hostname: &str,
    service_address: Option<&str>,
    service_alias: &str,
) -> Vec<SanEntry> {
    let candidates = [
        Some(SanEntry::Dns(base_workload_name(hostname).to_string())),
        Some(SanEntry::Dns(hostname.to_string())),
        service_address
            .filter(|s| !s.is_empty())
            .map(|s| SanEntry::Dns(s.to_string())),
        Some(SanEntry::Dns("localhost".to_string())),
        Some(SanEntry::Ip(IpAddr::V4(Ipv4Addr::LOCALHOST))),
        Some(SanEntry::Dns(service_alias.to_string())),
    ];

    let mut names = Vec::with_capacity(candidates.len());
    for entry in candidates.into_iter().flatten() {
        if !names.contains(&entry) {
            names.push(entry);
        }
    }
    names
}

/// Signs node certificates with the CA pair from the configuration volume.
pub struct CertificateProvisioner {
    ca_cert_path: PathBuf,
    ca_key_path: PathBuf,
    work_dir: PathBuf,
    service_alias: String,
}

impl CertificateProvisioner {
    pub fn new(config_dir: &Path, work_dir: &Path, service_alias: impl Into<String>) -> Self {
        Self {
            ca_cert_path: config_dir.join("tls.crt"),
            ca_key_path: config_dir.join("tls.key"),
            work_dir: work_dir.to_path_buf(),
            service_alias: service_alias.into(),
        }
    }

    /// Generate and sign the node certificate.
    ///
    /// `Ok(None)` when no usable CA pair is present: the node runs without TLS.
    pub fn provision(
        &self,
        hostname: &str,
        service_address: Option<&str>,
    ) -> Result<Option<TlsMaterial>> {
        if !self.ca_cert_path.exists() {
            tracing::info!(
                "No CA certificate at {}, running without TLS",
                self.ca_cert_path.display()
            );
            return Ok(None);
        }
        if !self.ca_key_path.exists() {
            tracing::warn!(
                "CA certificate present but no CA key at {}, running without TLS",
                self.ca_key_path.display()
            );
            return Ok(None);
        }

        tracing::info!("Generating certificate");
        let ca_cert = X509::from_pem(&std::fs::read(&self.ca_cert_path)?)?;
        let ca_key = PKey::private_key_from_pem(&std::fs::read(&self.ca_key_path)?)?;
        if !ca_cert.public_key()?.public_eq(&ca_key) {
            return Err(Error::InvalidConfig(format!(
                "CA key {} does not match CA certificate {}",
                self.ca_key_path.display(),
                self.ca_cert_path.display()
            )));
        }

        let node_key = PKey::from_rsa(Rsa::generate(NODE_KEY_BITS)?)?;
        let request = build_request(hostname, &node_key)?;

        let sans = subject_alt_names(hostname, service_address, &self.service_alias);
        tracing::debug!(
            "Subject alternative names: {}",
            sans.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        );
        let cert = sign_request(&request, &ca_cert, &ca_key, &sans)?;

        let key_pem = node_key.private_key_to_pem_pkcs8()?;
        let cert_pem = cert.to_pem()?;
        let mut combined = cert_pem.clone();
        combined.extend_from_slice(&key_pem);

        std::fs::create_dir_all(&self.work_dir)?;
        let material = TlsMaterial {
            ca_cert_path: self.ca_cert_path.clone(),
            ca_key_path: self.ca_key_path.clone(),
            node_key_path: self.work_dir.join("mongo.key"),
            node_cert_path: self.work_dir.join("mongo.crt"),
            combined_pem_path: self.work_dir.join("mongo.pem"),
            subject_alt_names: sans,
        };
        write_private(&material.node_key_path, &key_pem)?;
        write_private(&material.node_cert_path, &cert_pem)?;
        write_private(&material.combined_pem_path, &combined)?;

        tracing::info!(
            "Node certificate written to {}",
            material.combined_pem_path.display()
        );
        Ok(Some(material))
    }
}

fn build_request(hostname: &str, key: &PKey<Private>) -> Result<X509Req> {
    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("CN", hostname)?;
    let name = name.build();

    let mut req = X509ReqBuilder::new()?;
    req.set_version(0)?;
    req.set_subject_name(&name)?;
    req.set_pubkey(key)?;
    req.sign(key, MessageDigest::sha256())?;
    Ok(req.build())
}

fn sign_request(
    request: &X509Req,
    ca_cert: &X509,
    ca_key: &PKey<Private>,
    sans: &[SanEntry],
) -> Result<X509> {
    let pubkey = request.public_key()?;
    if !request.verify(&pubkey)? {
        return Err(Error::Other("certificate request signature mismatch".into()));
    }

    let mut builder = X509::builder()?;
    builder.set_version(2)?;

    let mut serial = BigNum::new()?;
    serial.rand(159, MsbOption::MAYBE_ZERO, false)?;
    let serial = serial.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;

    builder.set_subject_name(request.subject_name())?;
    builder.set_issuer_name(ca_cert.subject_name())?;
    builder.set_pubkey(&pubkey)?;
    let not_before = Asn1Time::days_from_now(0)?;
    let not_after = Asn1Time::days_from_now(CERT_VALIDITY_DAYS)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;

    builder.append_extension(BasicConstraints::new().build()?)?;
    builder.append_extension(
        KeyUsage::new()
            .non_repudiation()
            .digital_signature()
            .key_encipherment()
            .build()?,
    )?;

    let mut san = SubjectAlternativeName::new();
    for entry in sans {
        match entry {
            SanEntry::Dns(name) => {
                san.dns(name);
            }
            SanEntry::Ip(ip) => {
                san.ip(&ip.to_string());
            }
        }
    }
    let issuer: &X509Ref = ca_cert;
    let san = san.build(&builder.x509v3_context(Some(issuer), None))?;
    builder.append_extension(san)?;

    builder.sign(ca_key, MessageDigest::sha256())?;
    Ok(builder.build())
}

/// Overwrite `path` with owner-only permissions.
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_san_order() {
        let sans = subject_alt_names("icp-mongodb-1", Some("icp-mongodb-1.icp-mongodb.svc"), "mongodb");
        let rendered: Vec<String> = sans.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "DNS:icp-mongodb",
                "DNS:icp-mongodb-1",
                "DNS:icp-mongodb-1.icp-mongodb.svc",
                "DNS:localhost",
                "IP:127.0.0.1",
                "DNS:mongodb",
            ]
        );
    }

    #[test]
    fn test_san_dedup_and_missing_service() {
        let sans = subject_alt_names("mongodb", None, "mongodb");
        let rendered: Vec<String> = sans.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["DNS:mongodb", "DNS:localhost", "IP:127.0.0.1"]);
    }

    #[test]
    fn test_missing_ca_skips_tls() {
        let dir = tempfile::TempDir::new().unwrap();
        let provisioner =
            CertificateProvisioner::new(&dir.path().join("configdb"), dir.path(), "mongodb");
        assert!(provisioner.provision("node-0", None).unwrap().is_none());
        assert!(!dir.path().join("mongo.pem").exists());
    }

    #[test]
    fn test_ca_without_key_skips_tls() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("tls.crt"), b"not read").unwrap();
        let provisioner = CertificateProvisioner::new(dir.path(), dir.path(), "mongodb");
        assert!(provisioner.provision("node-0", None).unwrap().is_none());
    }

    #[test]
    fn test_garbage_ca_is_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("tls.crt"), b"garbage").unwrap();
        std::fs::write(dir.path().join("tls.key"), b"garbage").unwrap();
        let provisioner = CertificateProvisioner::new(dir.path(), dir.path(), "mongodb");
        assert!(matches!(
            provisioner.provision("node-0", None),
            Err(Error::Tls(_))
        ));
    }
}
