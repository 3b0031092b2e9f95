//! Certificate authority client.
//!
//! The state machine talks to the CA through this trait so tests can inject
//! scripted responses. The `verify_peer` argument on each request selects
//! whether the transport validates the server's certificate against the
//! trust anchors established so far; the state machine is the sole authority
//! on that flag per request.

mod http;

pub use http::HttpCaClient;

use async_trait::async_trait;

use crate::certificate::Certificate;
use crate::Result;

/// An HTTP response from a CA endpoint.
#[derive(Debug, Clone)]
pub struct CaResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl CaResponse {
    /// A response with a UTF-8 body, for tests and scripted clients.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body as text, with invalid UTF-8 replaced.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The canonical reason phrase for the status, e.g. `Internal Server
    /// Error` for 500.
    pub fn reason(&self) -> String {
        reqwest::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", self.status))
    }
}

/// Client for the CA service's certificate endpoints.
#[async_trait]
pub trait CaClient: Send + Sync {
    /// `GET /puppet-ca/v1/certificate/ca` - the CA certificate chain as a
    /// PEM sequence.
    async fn get_ca_certificates(&self, verify_peer: bool) -> Result<CaResponse>;

    /// `GET /puppet-ca/v1/certificate_revocation_list/ca` - the CRL chain as
    /// a PEM sequence.
    async fn get_crls(&self, verify_peer: bool) -> Result<CaResponse>;

    /// `PUT /puppet-ca/v1/certificate_request/<certname>` - upload a
    /// DER-encoded CSR.
    async fn put_csr(&self, certname: &str, csr: &[u8], verify_peer: bool) -> Result<CaResponse>;

    /// `GET /puppet-ca/v1/certificate/<certname>` - the signed client
    /// certificate, once an operator has signed the request.
    async fn get_client_certificate(
        &self,
        certname: &str,
        verify_peer: bool,
    ) -> Result<CaResponse>;

    /// Installs the trust anchors that `verify_peer = true` requests are
    /// validated against. Invoked by the state machine once the CA chain is
    /// established.
    fn install_trust_anchors(&self, cacerts: &[Certificate]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_covers_2xx_only() {
        assert!(CaResponse::new(200, "").is_success());
        assert!(CaResponse::new(204, "").is_success());
        assert!(!CaResponse::new(199, "").is_success());
        assert!(!CaResponse::new(300, "").is_success());
        assert!(!CaResponse::new(404, "").is_success());
    }

    #[test]
    fn reason_uses_canonical_phrases() {
        assert_eq!(CaResponse::new(500, "").reason(), "Internal Server Error");
        assert_eq!(CaResponse::new(404, "").reason(), "Not Found");
        assert_eq!(CaResponse::new(599, "").reason(), "HTTP 599");
    }

    #[test]
    fn body_text_tolerates_invalid_utf8() {
        let response = CaResponse::new(200, vec![0xff, 0xfe]);
        assert!(!response.body_text().is_empty());
    }
}
