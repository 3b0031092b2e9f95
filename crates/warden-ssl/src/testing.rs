//! Test support: fixture minting and scripted collaborators.
//!
//! Everything here exists so bootstrap flows can be exercised hermetically:
//! [`TestCa`] mints real RSA-signed certificates and CRLs, [`ScriptedCaClient`]
//! plays back queued CA responses while recording every call, and
//! [`MemoryCertProvider`] is an in-memory [`CertProvider`]. Panics on misuse
//! are deliberate; this module is for tests, not production wiring.

use std::collections::{BTreeMap, VecDeque};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use der::asn1::{BitString, UtcTime};
use der::{Decode, Encode};
use rsa::signature::{SignatureEncoding, Signer};
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::crl::{CertificateList, RevokedCert, TbsCertList};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::{Time, Validity};
use x509_cert::Version;

use crate::ca::{CaClient, CaResponse};
use crate::certificate::{Certificate, Crl, PrivateKey};
use crate::csr::CertificateRequest;
use crate::oids;
use crate::provider::CertProvider;
use crate::Result;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

fn sha256_with_rsa() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: oids::SHA_256_WITH_RSA_ENCRYPTION,
        parameters: Some(der::AnyRef::NULL.into()),
    }
}

/// A throwaway certificate authority for tests.
pub struct TestCa {
    key: PrivateKey,
    subject: Name,
    cert: Certificate,
}

impl TestCa {
    /// Generates a fresh RSA root CA.
    pub fn generate() -> Self {
        let key = PrivateKey::generate(2048).expect("generate CA key");
        let subject = Name::from_str("CN=Warden Test CA").expect("CA subject");
        let spki = SubjectPublicKeyInfoOwned::from_der(
            &key.public_key_der().expect("CA public key"),
        )
        .expect("CA public key info");

        let signer = key.signing_key();
        let builder = CertificateBuilder::new(
            Profile::Root,
            SerialNumber::from(1u32),
            Validity::from_now(DAY).expect("CA validity"),
            subject.clone(),
            spki,
            &signer,
        )
        .expect("CA certificate builder");
        let cert = builder
            .build::<rsa::pkcs1v15::Signature>()
            .expect("self-sign CA certificate");

        let cert = Certificate::from_der(cert.to_der().expect("encode CA certificate"))
            .expect("decode CA certificate");
        Self { key, subject, cert }
    }

    /// The CA certificate.
    pub fn cert(&self) -> &Certificate {
        &self.cert
    }

    /// Issues a leaf certificate for `cn` over the public half of `key`.
    pub fn issue(&self, cn: &str, key: &PrivateKey, serial: u32) -> Certificate {
        self.issue_for_public_key(
            cn,
            &key.public_key_der().expect("leaf public key"),
            serial,
        )
    }

    /// Issues a leaf certificate for `cn` over an already-encoded subject
    /// public key info, e.g. one lifted from a CSR.
    pub fn issue_for_public_key(&self, cn: &str, spki_der: &[u8], serial: u32) -> Certificate {
        let subject = Name::from_str(&format!("CN={cn}")).expect("leaf subject");
        let spki = SubjectPublicKeyInfoOwned::from_der(spki_der).expect("leaf public key info");

        let signer = self.key.signing_key();
        let builder = CertificateBuilder::new(
            Profile::Leaf {
                issuer: self.subject.clone(),
                enable_key_agreement: false,
                enable_key_encipherment: true,
            },
            SerialNumber::from(serial),
            Validity::from_now(DAY).expect("leaf validity"),
            subject,
            spki,
            &signer,
        )
        .expect("leaf certificate builder");
        let cert = builder
            .build::<rsa::pkcs1v15::Signature>()
            .expect("sign leaf certificate");

        Certificate::from_der(cert.to_der().expect("encode leaf certificate"))
            .expect("decode leaf certificate")
    }

    /// Issues a CRL revoking the given serial numbers.
    pub fn revoke(&self, serials: &[u32]) -> Crl {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock");
        let this_update =
            Time::UtcTime(UtcTime::from_unix_duration(now).expect("CRL thisUpdate"));
        let next_update =
            Time::UtcTime(UtcTime::from_unix_duration(now + DAY).expect("CRL nextUpdate"));

        let revoked: Vec<RevokedCert> = serials
            .iter()
            .map(|serial| RevokedCert {
                serial_number: SerialNumber::from(*serial),
                revocation_date: this_update.clone(),
                crl_entry_extensions: None,
            })
            .collect();

        let tbs = TbsCertList {
            version: Version::V2,
            signature: sha256_with_rsa(),
            issuer: self.subject.clone(),
            this_update,
            next_update: Some(next_update),
            revoked_certificates: (!revoked.is_empty()).then_some(revoked),
            crl_extensions: None,
        };
        let tbs_der = tbs.to_der().expect("encode CRL");
        let signature = self
            .key
            .signing_key()
            .try_sign(&tbs_der)
            .expect("sign CRL");

        let crl = CertificateList {
            tbs_cert_list: tbs,
            signature_algorithm: sha256_with_rsa(),
            signature: BitString::from_bytes(&signature.to_vec()).expect("CRL signature bits"),
        };
        Crl::from_der(crl.to_der().expect("encode CRL")).expect("decode CRL")
    }
}

#[derive(Default)]
struct MemoryInner {
    cacerts: Option<Vec<Certificate>>,
    crls: Option<Vec<Crl>>,
    private_key: Option<PrivateKey>,
    client_cert: Option<Certificate>,
    requests: BTreeMap<String, String>,
    crl_loads: usize,
}

/// An in-memory [`CertProvider`].
#[derive(Default)]
pub struct MemoryCertProvider {
    inner: Mutex<MemoryInner>,
}

impl MemoryCertProvider {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Preloads a CA chain.
    pub fn set_cacerts(&self, certs: Vec<Certificate>) {
        self.locked().cacerts = Some(certs);
    }

    /// Preloads a CRL chain.
    pub fn set_crls(&self, crls: Vec<Crl>) {
        self.locked().crls = Some(crls);
    }

    /// Preloads a private key.
    pub fn set_private_key(&self, key: PrivateKey) {
        self.locked().private_key = Some(key);
    }

    /// Preloads a client certificate.
    pub fn set_client_cert(&self, cert: Certificate) {
        self.locked().client_cert = Some(cert);
    }

    /// The persisted CA chain, if any.
    pub fn cacerts(&self) -> Option<Vec<Certificate>> {
        self.locked().cacerts.clone()
    }

    /// The persisted CRL chain, if any.
    pub fn crls(&self) -> Option<Vec<Crl>> {
        self.locked().crls.clone()
    }

    /// The persisted client certificate, if any.
    pub fn client_cert(&self) -> Option<Certificate> {
        self.locked().client_cert.clone()
    }

    /// The persisted PEM request for `certname`, if any.
    pub fn saved_request(&self, certname: &str) -> Option<String> {
        self.locked().requests.get(certname).cloned()
    }

    /// How many times `load_crls` was invoked.
    pub fn crl_loads(&self) -> usize {
        self.locked().crl_loads
    }
}

impl CertProvider for MemoryCertProvider {
    fn load_cacerts(&self) -> Result<Option<Vec<Certificate>>> {
        Ok(self.locked().cacerts.clone())
    }

    fn save_cacerts(&self, certs: &[Certificate]) -> Result<()> {
        self.locked().cacerts = Some(certs.to_vec());
        Ok(())
    }

    fn load_crls(&self) -> Result<Option<Vec<Crl>>> {
        let mut inner = self.locked();
        inner.crl_loads += 1;
        Ok(inner.crls.clone())
    }

    fn save_crls(&self, crls: &[Crl]) -> Result<()> {
        self.locked().crls = Some(crls.to_vec());
        Ok(())
    }

    fn load_private_key(&self) -> Result<Option<PrivateKey>> {
        Ok(self.locked().private_key.clone())
    }

    fn save_private_key(&self, key: &PrivateKey) -> Result<()> {
        self.locked().private_key = Some(key.clone());
        Ok(())
    }

    fn load_client_cert(&self) -> Result<Option<Certificate>> {
        Ok(self.locked().client_cert.clone())
    }

    fn save_client_cert(&self, cert: &Certificate) -> Result<()> {
        self.locked().client_cert = Some(cert.clone());
        Ok(())
    }

    fn save_request(&self, certname: &str, request: &CertificateRequest) -> Result<()> {
        self.locked()
            .requests
            .insert(certname.to_string(), request.to_pem());
        Ok(())
    }
}

/// A CA endpoint, for call recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `GET certificate/ca`
    CaCertificates,
    /// `GET certificate_revocation_list/ca`
    Crls,
    /// `PUT certificate_request/<certname>`
    SubmitCsr,
    /// `GET certificate/<certname>`
    ClientCertificate,
}

/// One recorded CA call.
#[derive(Debug, Clone, Copy)]
pub struct RecordedCall {
    /// Which endpoint was hit.
    pub endpoint: Endpoint,
    /// The peer-verification flag the machine chose for the request.
    pub verify_peer: bool,
}

#[derive(Default)]
struct ScriptedInner {
    ca: VecDeque<CaResponse>,
    crls: VecDeque<CaResponse>,
    csr: VecDeque<CaResponse>,
    cert: VecDeque<CaResponse>,
    calls: Vec<RecordedCall>,
    anchors: usize,
    uploaded_csrs: Vec<Vec<u8>>,
}

/// A [`CaClient`] that plays back queued responses and records every call.
///
/// Popping an endpoint with no queued response panics: a test that reaches
/// the network more often than it scripted is broken.
#[derive(Default)]
pub struct ScriptedCaClient {
    inner: Mutex<ScriptedInner>,
}

impl ScriptedCaClient {
    /// A client with empty queues.
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, ScriptedInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues a response for the CA-certificate endpoint.
    pub fn push_ca_response(&self, status: u16, body: impl Into<Vec<u8>>) {
        self.locked().ca.push_back(CaResponse::new(status, body));
    }

    /// Queues a response for the CRL endpoint.
    pub fn push_crl_response(&self, status: u16, body: impl Into<Vec<u8>>) {
        self.locked().crls.push_back(CaResponse::new(status, body));
    }

    /// Queues a response for the CSR-submission endpoint.
    pub fn push_csr_response(&self, status: u16, body: impl Into<Vec<u8>>) {
        self.locked().csr.push_back(CaResponse::new(status, body));
    }

    /// Queues a response for the client-certificate endpoint.
    pub fn push_cert_response(&self, status: u16, body: impl Into<Vec<u8>>) {
        self.locked().cert.push_back(CaResponse::new(status, body));
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.locked().calls.clone()
    }

    /// How many trust anchors the machine installed.
    pub fn installed_anchors(&self) -> usize {
        self.locked().anchors
    }

    /// The DER bodies uploaded to the CSR endpoint, in order.
    pub fn uploaded_csrs(&self) -> Vec<Vec<u8>> {
        self.locked().uploaded_csrs.clone()
    }

    fn pop(&self, endpoint: Endpoint, verify_peer: bool) -> CaResponse {
        let mut inner = self.locked();
        inner.calls.push(RecordedCall {
            endpoint,
            verify_peer,
        });
        let queue = match endpoint {
            Endpoint::CaCertificates => &mut inner.ca,
            Endpoint::Crls => &mut inner.crls,
            Endpoint::SubmitCsr => &mut inner.csr,
            Endpoint::ClientCertificate => &mut inner.cert,
        };
        queue
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted response left for {endpoint:?}"))
    }
}

#[async_trait]
impl CaClient for ScriptedCaClient {
    async fn get_ca_certificates(&self, verify_peer: bool) -> Result<CaResponse> {
        Ok(self.pop(Endpoint::CaCertificates, verify_peer))
    }

    async fn get_crls(&self, verify_peer: bool) -> Result<CaResponse> {
        Ok(self.pop(Endpoint::Crls, verify_peer))
    }

    async fn put_csr(&self, _certname: &str, csr: &[u8], verify_peer: bool) -> Result<CaResponse> {
        self.locked().uploaded_csrs.push(csr.to_vec());
        Ok(self.pop(Endpoint::SubmitCsr, verify_peer))
    }

    async fn get_client_certificate(
        &self,
        _certname: &str,
        verify_peer: bool,
    ) -> Result<CaResponse> {
        Ok(self.pop(Endpoint::ClientCertificate, verify_peer))
    }

    fn install_trust_anchors(&self, cacerts: &[Certificate]) -> Result<()> {
        self.locked().anchors = cacerts.len();
        Ok(())
    }
}
