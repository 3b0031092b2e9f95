//! reqwest-backed CA client.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::ca::{CaClient, CaResponse};
use crate::certificate::Certificate;
use crate::config::Config;
use crate::{Error, Result};

const CA_MOUNT: &str = "/puppet-ca/v1";

/// CA client over HTTPS.
///
/// Holds two underlying clients: a pinned-insecure one for the single
/// bootstrap-of-trust download (there is no anchor to validate against yet),
/// and a verified one built from the established CA chain. Until
/// [`CaClient::install_trust_anchors`] runs, verified requests fall back to
/// a client with TLS verification on and an empty root store, so nothing can
/// silently skip validation.
pub struct HttpCaClient {
    base_url: String,
    timeout: Duration,
    insecure: reqwest::Client,
    verified: RwLock<Option<reqwest::Client>>,
}

impl HttpCaClient {
    /// A client for the CA at `base_url`, e.g. `https://ca.warden:8140`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into();
        let insecure = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            insecure,
            verified: RwLock::new(None),
        })
    }

    /// A client for the configured CA server and timeout.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.ca_server, Duration::from_secs(config.http_timeout))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, CA_MOUNT, path)
    }

    fn client_for(&self, verify_peer: bool) -> Result<reqwest::Client> {
        if !verify_peer {
            return Ok(self.insecure.clone());
        }
        let verified = self.verified.read().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = verified.as_ref() {
            return Ok(client.clone());
        }
        drop(verified);
        // No anchors installed yet: verification stays on with an empty
        // root store rather than falling back to the system trust.
        Ok(reqwest::Client::builder()
            .timeout(self.timeout)
            .tls_built_in_root_certs(false)
            .build()?)
    }

    async fn get(&self, path: &str, verify_peer: bool) -> Result<CaResponse> {
        let url = self.url(path);
        debug!(%url, verify_peer, "GET");
        let response = self
            .client_for(verify_peer)?
            .get(&url)
            .header(reqwest::header::ACCEPT, "text/plain")
            .send()
            .await?;
        Self::into_ca_response(response).await
    }

    async fn into_ca_response(response: reqwest::Response) -> Result<CaResponse> {
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok(CaResponse { status, body })
    }
}

#[async_trait]
impl CaClient for HttpCaClient {
    async fn get_ca_certificates(&self, verify_peer: bool) -> Result<CaResponse> {
        self.get("/certificate/ca", verify_peer).await
    }

    async fn get_crls(&self, verify_peer: bool) -> Result<CaResponse> {
        self.get("/certificate_revocation_list/ca", verify_peer)
            .await
    }

    async fn put_csr(&self, certname: &str, csr: &[u8], verify_peer: bool) -> Result<CaResponse> {
        let url = self.url(&format!("/certificate_request/{certname}"));
        debug!(%url, verify_peer, bytes = csr.len(), "PUT");
        let response = self
            .client_for(verify_peer)?
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(csr.to_vec())
            .send()
            .await?;
        Self::into_ca_response(response).await
    }

    async fn get_client_certificate(
        &self,
        certname: &str,
        verify_peer: bool,
    ) -> Result<CaResponse> {
        self.get(&format!("/certificate/{certname}"), verify_peer)
            .await
    }

    fn install_trust_anchors(&self, cacerts: &[Certificate]) -> Result<()> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .tls_built_in_root_certs(false);
        for cert in cacerts {
            let anchor = reqwest::Certificate::from_der(cert.der())
                .map_err(|e| Error::Parse(format!("failed to load trust anchor: {e}")))?;
            builder = builder.add_root_certificate(anchor);
        }
        let client = builder.build()?;

        *self.verified.write().unwrap_or_else(|e| e.into_inner()) = Some(client);
        debug!(anchors = cacerts.len(), "installed trust anchors");
        Ok(())
    }
}

impl std::fmt::Debug for HttpCaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCaClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestCa;

    #[test]
    fn urls_are_rooted_at_the_ca_mount() {
        let client = HttpCaClient::new("https://ca.example:8140/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.url("/certificate/ca"),
            "https://ca.example:8140/puppet-ca/v1/certificate/ca"
        );
        assert_eq!(
            client.url("/certificate_request/agent.local"),
            "https://ca.example:8140/puppet-ca/v1/certificate_request/agent.local"
        );
    }

    #[test]
    fn trust_anchors_install_from_real_certificates() {
        let client = HttpCaClient::new("https://ca.example:8140", Duration::from_secs(5)).unwrap();
        let ca = TestCa::generate();
        client.install_trust_anchors(&[ca.cert().clone()]).unwrap();
        assert!(client.verified.read().unwrap().is_some());
    }
}
