//! The trust material accumulated by the bootstrap pipeline.

use crate::certificate::{Certificate, Crl, PrivateKey};

/// Trust material gathered so far.
///
/// Each state of the pipeline produces a new context from its predecessor;
/// a context is never mutated once a state has completed. `verify_peer`
/// reports whether the CA chain is established, which is what later requests
/// use to decide whether the server's certificate must validate.
#[derive(Debug, Clone, Default)]
pub struct SslContext {
    /// The CA chain, agent-facing authority first, in received order.
    pub cacerts: Vec<Certificate>,
    /// CRLs corresponding positionally to the CA chain; empty when
    /// revocation checking is disabled.
    pub crls: Vec<Crl>,
    /// The agent's private key, once established.
    pub private_key: Option<PrivateKey>,
    /// The signed client certificate, once retrieved.
    pub client_cert: Option<Certificate>,
    /// Whether subsequent requests verify the server against `cacerts`.
    pub verify_peer: bool,
}

impl SslContext {
    /// A context holding an established CA chain.
    pub fn with_cacerts(cacerts: Vec<Certificate>) -> Self {
        let verify_peer = !cacerts.is_empty();
        Self {
            cacerts,
            verify_peer,
            ..Self::default()
        }
    }

    /// A copy of this context extended with CRLs.
    pub fn with_crls(self, crls: Vec<Crl>) -> Self {
        Self { crls, ..self }
    }

    /// A copy of this context carrying the agent's private key.
    pub fn with_private_key(self, key: PrivateKey) -> Self {
        Self {
            private_key: Some(key),
            ..self
        }
    }

    /// A copy of this context carrying the signed client certificate.
    pub fn with_client_cert(self, cert: Certificate) -> Self {
        Self {
            client_cert: Some(cert),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestCa;

    #[test]
    fn empty_context_does_not_verify() {
        let context = SslContext::default();
        assert!(!context.verify_peer);
        assert!(context.cacerts.is_empty());
        assert!(context.crls.is_empty());
    }

    #[test]
    fn cacerts_enable_verification() {
        let ca = TestCa::generate();
        let context = SslContext::with_cacerts(vec![ca.cert().clone()]);
        assert!(context.verify_peer);
    }

    #[test]
    fn extension_preserves_earlier_material() {
        let ca = TestCa::generate();
        let key = crate::PrivateKey::generate(2048).unwrap();
        let cert = ca.issue("agent.example.net", &key, 3);

        let context = SslContext::with_cacerts(vec![ca.cert().clone()])
            .with_crls(vec![ca.revoke(&[])])
            .with_private_key(key)
            .with_client_cert(cert);

        assert_eq!(context.cacerts.len(), 1);
        assert_eq!(context.crls.len(), 1);
        assert!(context.private_key.is_some());
        assert!(context.client_cert.is_some());
        assert!(context.verify_peer);
    }
}
