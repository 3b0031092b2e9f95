//! Persisted trust material.
//!
//! The provider owns every on-disk path; the state machine never touches the
//! filesystem directly. Loads return `None` when nothing is persisted and a
//! fatal error when persisted material fails to parse. Writes are atomic
//! (write-temp-then-rename) so a reader never observes a half-written file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::certificate::{
    cert_chain_to_pem, crl_chain_to_pem, parse_cert_chain_pem, parse_crl_chain_pem, Certificate,
    Crl, PrivateKey,
};
use crate::config::Config;
use crate::csr::CertificateRequest;
use crate::Result;

/// Store for the agent's persisted trust material.
pub trait CertProvider: Send + Sync {
    /// Loads the persisted CA chain, if any.
    fn load_cacerts(&self) -> Result<Option<Vec<Certificate>>>;
    /// Persists the CA chain.
    fn save_cacerts(&self, certs: &[Certificate]) -> Result<()>;

    /// Loads the persisted CRL chain, if any.
    fn load_crls(&self) -> Result<Option<Vec<Crl>>>;
    /// Persists the CRL chain.
    fn save_crls(&self, crls: &[Crl]) -> Result<()>;

    /// Loads the agent's private key, if any.
    fn load_private_key(&self) -> Result<Option<PrivateKey>>;
    /// Persists the agent's private key.
    fn save_private_key(&self, key: &PrivateKey) -> Result<()>;

    /// Loads the agent's client certificate, if any.
    fn load_client_cert(&self) -> Result<Option<Certificate>>;
    /// Persists the agent's client certificate.
    fn save_client_cert(&self, cert: &Certificate) -> Result<()>;

    /// Persists a certificate request prior to upload.
    fn save_request(&self, certname: &str, request: &CertificateRequest) -> Result<()>;
}

/// The on-disk layout of the agent's SSL state.
///
/// The standard layout under `ssldir`:
///
/// ```text
/// <ssldir>/certs/ca.pem
/// <ssldir>/crl.pem
/// <ssldir>/private_keys/<certname>.pem
/// <ssldir>/certs/<certname>.pem
/// <ssldir>/certificate_requests/<certname>.pem
/// ```
#[derive(Debug, Clone)]
pub struct SslPaths {
    /// The persisted CA chain.
    pub cacerts: PathBuf,
    /// The persisted CRL chain.
    pub crls: PathBuf,
    /// The agent's private key.
    pub private_key: PathBuf,
    /// The agent's client certificate.
    pub client_cert: PathBuf,
    /// Directory holding persisted certificate requests.
    pub requests: PathBuf,
}

impl SslPaths {
    /// The standard layout under `ssldir` for the given certname.
    pub fn under(ssldir: &Path, certname: &str) -> Self {
        Self {
            cacerts: ssldir.join("certs").join("ca.pem"),
            crls: ssldir.join("crl.pem"),
            private_key: ssldir.join("private_keys").join(format!("{certname}.pem")),
            client_cert: ssldir.join("certs").join(format!("{certname}.pem")),
            requests: ssldir.join("certificate_requests"),
        }
    }

    /// The configured layout: the standard layout under `ssldir`, with any
    /// per-file overrides applied.
    pub fn from_config(config: &Config) -> Self {
        let mut paths = Self::under(&config.ssldir, &config.certname);
        if let Some(p) = &config.localcacert {
            paths.cacerts = p.clone();
        }
        if let Some(p) = &config.hostcrl {
            paths.crls = p.clone();
        }
        if let Some(p) = &config.hostprivkey {
            paths.private_key = p.clone();
        }
        if let Some(p) = &config.hostcert {
            paths.client_cert = p.clone();
        }
        if let Some(p) = &config.requestdir {
            paths.requests = p.clone();
        }
        paths
    }

    fn request(&self, certname: &str) -> PathBuf {
        self.requests.join(format!("{certname}.pem"))
    }
}

/// Disk-backed certificate provider.
#[derive(Debug)]
pub struct DiskCertProvider {
    paths: SslPaths,
}

impl DiskCertProvider {
    /// A provider over the given layout.
    pub fn new(paths: SslPaths) -> Self {
        Self { paths }
    }

    /// A provider over the layout the configuration describes.
    pub fn from_config(config: &Config) -> Self {
        Self::new(SslPaths::from_config(config))
    }

    /// Returns the layout this provider writes to.
    pub fn paths(&self) -> &SslPaths {
        &self.paths
    }

    fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes `contents` to `path` via a temporary file in the same
    /// directory, then renames it into place.
    fn write_atomic(path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl CertProvider for DiskCertProvider {
    fn load_cacerts(&self) -> Result<Option<Vec<Certificate>>> {
        Self::read_if_exists(&self.paths.cacerts)?
            .map(|bytes| parse_cert_chain_pem(&bytes))
            .transpose()
    }

    fn save_cacerts(&self, certs: &[Certificate]) -> Result<()> {
        Self::write_atomic(&self.paths.cacerts, &cert_chain_to_pem(certs))
    }

    fn load_crls(&self) -> Result<Option<Vec<Crl>>> {
        Self::read_if_exists(&self.paths.crls)?
            .map(|bytes| parse_crl_chain_pem(&bytes))
            .transpose()
    }

    fn save_crls(&self, crls: &[Crl]) -> Result<()> {
        Self::write_atomic(&self.paths.crls, &crl_chain_to_pem(crls))
    }

    fn load_private_key(&self) -> Result<Option<PrivateKey>> {
        match Self::read_if_exists(&self.paths.private_key)? {
            None => Ok(None),
            Some(bytes) => {
                let pem = String::from_utf8(bytes).map_err(|e| {
                    crate::Error::Crypto(format!("failed to decode private key: {e}"))
                })?;
                PrivateKey::from_pem(&pem).map(Some)
            }
        }
    }

    fn save_private_key(&self, key: &PrivateKey) -> Result<()> {
        Self::write_atomic(&self.paths.private_key, &key.to_pem()?)
    }

    fn load_client_cert(&self) -> Result<Option<Certificate>> {
        match Self::read_if_exists(&self.paths.client_cert)? {
            None => Ok(None),
            Some(bytes) => {
                // The client certificate file holds exactly one certificate.
                let chain = parse_cert_chain_pem(&bytes)?;
                Ok(chain.into_iter().next())
            }
        }
    }

    fn save_client_cert(&self, cert: &Certificate) -> Result<()> {
        Self::write_atomic(&self.paths.client_cert, &cert.to_pem())
    }

    fn save_request(&self, certname: &str, request: &CertificateRequest) -> Result<()> {
        Self::write_atomic(&self.paths.request(certname), &request.to_pem())
    }
}
