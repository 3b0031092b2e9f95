//! The bootstrap state machine.
//!
//! A linear pipeline driven by [`SslMachine::next_state`] until a terminal
//! state is reached:
//!
//! ```text
//! NeedCaCerts -> NeedCrls -> NeedKey -> NeedSubmitCsr -> NeedCert -> Done
//!                                 \________________________________/
//!                                   (persisted cert short-circuits)
//!       ^                                                   |
//!       \________________________ Wait <-------------------/
//!                                   (cert not signed yet)
//! ```
//!
//! Each state decides locally whether a failure is fatal (raised out of the
//! driver), recoverable (transition to [`State::Wait`]), or skippable
//! (revocation disabled). `Wait` either sleeps `waitforcert` seconds and
//! restarts from scratch, or, when `waitforcert` is 0, surfaces
//! [`State::ExitRequested`] for the CLI to translate into `exit(1)`.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::ca::CaClient;
use crate::certificate::{parse_cert_chain_pem, parse_crl_chain_pem, PrivateKey};
use crate::config::Config;
use crate::context::SslContext;
use crate::csr::CsrOptions;
use crate::provider::CertProvider;
use crate::{Error, Result};

/// The substrings in a 400 response that mean the CA already holds a
/// request or certificate for this certname, making the submission
/// success-equivalent.
const ALREADY_HAS_CERT: [&str; 3] = [
    "already has a requested certificate",
    "already has a signed certificate",
    "already has a revoked certificate",
];

/// A state of the bootstrap pipeline.
///
/// Non-terminal states carry the trust material accumulated so far; each
/// transition produces a fresh context rather than mutating its
/// predecessor's.
#[derive(Debug)]
pub enum State {
    /// Establish the CA chain.
    NeedCaCerts,
    /// Extend the context with CRLs (or skip when revocation is disabled).
    NeedCrls(SslContext),
    /// Establish the agent's private key; short-circuits to [`State::Done`]
    /// when a matching client certificate is already persisted.
    NeedKey(SslContext),
    /// Build, persist, and upload the certificate signing request.
    NeedSubmitCsr {
        /// Trust material so far (CA chain, CRLs, private key).
        context: SslContext,
        /// The key the request is signed with.
        key: PrivateKey,
    },
    /// Poll for the signed client certificate.
    NeedCert {
        /// Trust material so far (CA chain, CRLs, private key).
        context: SslContext,
        /// The key the certificate must match.
        key: PrivateKey,
    },
    /// Sleep `waitforcert` seconds, then restart from [`State::NeedCaCerts`].
    Wait,
    /// Terminal: the context holds the full set of trust material.
    Done(SslContext),
    /// Terminal: the certificate is unsigned and `waitforcert` is 0; the
    /// embedding CLI decides the process exit.
    ExitRequested,
}

impl State {
    /// Whether this state ends the pipeline.
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Done(_) | State::ExitRequested)
    }
}

/// Outcome of a full bootstrap run.
#[derive(Debug)]
pub enum Bootstrap {
    /// The pipeline completed; the context is mTLS-ready.
    Complete(SslContext),
    /// The certificate is unsigned and `waitforcert` is 0. The caller
    /// should print [`exit_message`] and exit with status 1.
    ExitRequested,
}

/// The message printed to stdout when the pipeline gives up because
/// `waitforcert` is 0.
pub fn exit_message(certname: &str) -> String {
    format!(
        "Couldn't fetch certificate from CA server; you might still need to sign this \
         agent's certificate ({certname}). Exiting now because the waitforcert setting \
         is set to 0."
    )
}

/// The bootstrap state machine.
///
/// Collaborators are injected so tests can run the pipeline against scripted
/// responses and an in-memory store; see [`crate::testing`].
pub struct SslMachine<C, P> {
    config: Config,
    ca: C,
    provider: P,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<C: CaClient, P: CertProvider> SslMachine<C, P> {
    /// A machine over the given configuration and collaborators.
    pub fn new(config: Config, ca: C, provider: P) -> Self {
        Self {
            config,
            ca,
            provider,
            shutdown: None,
        }
    }

    /// Attaches a cancellation signal. The machine checks it between
    /// transitions and inside the `Wait` sleep; cancellation is an immediate
    /// fatal exit, not a transition.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Returns the configuration the machine runs under.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the injected CA client.
    pub fn ca(&self) -> &C {
        &self.ca
    }

    /// Returns the injected certificate provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Runs the pipeline until CA certificates and CRLs are established and
    /// returns the partial context.
    pub async fn ensure_ca_certificates(&self) -> Result<SslContext> {
        let mut state = State::NeedCaCerts;
        loop {
            match self.next_state(state).await? {
                State::NeedKey(context) => return Ok(context),
                next => state = next,
            }
        }
    }

    /// Runs the full pipeline through a signed client certificate.
    pub async fn ensure_client_certificate(&self) -> Result<Bootstrap> {
        let mut state = State::NeedCaCerts;
        loop {
            match self.next_state(state).await? {
                State::Done(context) => return Ok(Bootstrap::Complete(context)),
                State::ExitRequested => return Ok(Bootstrap::ExitRequested),
                next => state = next,
            }
        }
    }

    /// Advances the pipeline by one state.
    ///
    /// # Panics
    ///
    /// Panics when invoked on a terminal state; the drivers never do, so a
    /// panic here is a caller bug.
    pub async fn next_state(&self, state: State) -> Result<State> {
        self.check_cancelled()?;
        match state {
            State::NeedCaCerts => self.establish_cacerts().await,
            State::NeedCrls(context) => self.establish_crls(context).await,
            State::NeedKey(context) => self.establish_key(context),
            State::NeedSubmitCsr { context, key } => self.submit_csr(context, key).await,
            State::NeedCert { context, key } => self.retrieve_cert(context, key).await,
            State::Wait => self.wait().await,
            State::Done(_) | State::ExitRequested => {
                panic!("next_state invoked on a terminal state")
            }
        }
    }

    /// Establishes the CA chain: persisted material when present, otherwise
    /// downloaded with peer verification disabled (the bootstrap-of-trust
    /// exception, there is no anchor to validate against yet).
    async fn establish_cacerts(&self) -> Result<State> {
        let cacerts = match self.provider.load_cacerts()? {
            Some(cacerts) => {
                debug!(count = cacerts.len(), "using persisted CA chain");
                cacerts
            }
            None => {
                let response = self.ca.get_ca_certificates(false).await?;
                if response.status == 404 {
                    return Err(Error::Network(
                        "CA certificate is missing from the server".to_string(),
                    ));
                }
                if !response.is_success() {
                    return Err(Error::Network(format!(
                        "Could not download CA certificate: {}",
                        response.reason()
                    )));
                }
                let cacerts = parse_cert_chain_pem(&response.body)?;
                self.provider.save_cacerts(&cacerts)?;
                info!(count = cacerts.len(), "downloaded CA chain");
                cacerts
            }
        };

        self.ca.install_trust_anchors(&cacerts)?;
        Ok(State::NeedCrls(SslContext::with_cacerts(cacerts)))
    }

    /// Extends the context with CRLs, or skips entirely (no network, no
    /// disk) when revocation checking is disabled.
    async fn establish_crls(&self, context: SslContext) -> Result<State> {
        if !self.config.certificate_revocation.enabled() {
            debug!("certificate revocation disabled; skipping CRLs");
            return Ok(State::NeedKey(context));
        }

        let crls = match self.provider.load_crls()? {
            Some(crls) => {
                debug!(count = crls.len(), "using persisted CRL chain");
                crls
            }
            None => {
                let response = self.ca.get_crls(true).await?;
                if response.status == 404 {
                    return Err(Error::Network(
                        "CRL is missing from the server".to_string(),
                    ));
                }
                if !response.is_success() {
                    return Err(Error::Network(format!(
                        "Could not download CRLs: {}",
                        response.reason()
                    )));
                }
                let crls = parse_crl_chain_pem(&response.body)?;
                self.provider.save_crls(&crls)?;
                info!(count = crls.len(), "downloaded CRL chain");
                crls
            }
        };

        Ok(State::NeedKey(context.with_crls(crls)))
    }

    /// Establishes the private key, generating one when absent, and
    /// short-circuits to `Done` when a matching client certificate is
    /// already persisted.
    fn establish_key(&self, context: SslContext) -> Result<State> {
        let key = match self.provider.load_private_key()? {
            Some(key) => key,
            None => {
                info!(bits = self.config.keylength, "generating RSA private key");
                let key = PrivateKey::generate(self.config.keylength)?;
                self.provider.save_private_key(&key)?;
                key
            }
        };

        match self.provider.load_client_cert()? {
            Some(cert) => {
                if cert.public_key_matches(&key)? {
                    debug!(subject = %cert.subject(), "using persisted client certificate");
                    let context = context.with_private_key(key).with_client_cert(cert);
                    Ok(State::Done(context))
                } else {
                    Err(Error::Verification(format!(
                        "The certificate for '{}' does not match its private key",
                        cert.subject()
                    )))
                }
            }
            None => Ok(State::NeedSubmitCsr {
                context: context.with_private_key(key.clone()),
                key,
            }),
        }
    }

    /// Builds the CSR, persists it, and uploads it.
    async fn submit_csr(&self, context: SslContext, key: PrivateKey) -> Result<State> {
        let request = CsrOptions::from_config(&self.config)?.generate(&key)?;
        self.provider.save_request(&self.config.certname, &request)?;

        let response = self
            .ca
            .put_csr(&self.config.certname, request.der(), true)
            .await?;

        if response.is_success() {
            info!(certname = %self.config.certname, "submitted certificate request");
            return Ok(State::NeedCert { context, key });
        }

        if response.status == 400 {
            let body = response.body_text();
            if ALREADY_HAS_CERT.iter().any(|m| body.contains(m)) {
                info!(
                    certname = %self.config.certname,
                    "CA already has a certificate request for this agent"
                );
                return Ok(State::NeedCert { context, key });
            }
        }

        Err(Error::Network(format!(
            "Failed to submit the CSR, HTTP response was {}",
            response.status
        )))
    }

    /// Retrieves the signed client certificate. Everything that smells like
    /// "server or content not ready" recovers via `Wait`; only provider I/O
    /// failures are fatal here.
    async fn retrieve_cert(&self, context: SslContext, key: PrivateKey) -> Result<State> {
        let response = self
            .ca
            .get_client_certificate(&self.config.certname, true)
            .await?;

        if response.status != 200 {
            debug!(
                certname = %self.config.certname,
                status = response.status,
                "certificate not yet available"
            );
            return Ok(State::Wait);
        }

        let cert = match parse_cert_chain_pem(&response.body) {
            Ok(mut chain) => chain.remove(0),
            Err(e) => {
                warn!(error = %e, "failed to parse certificate from the CA");
                return Ok(State::Wait);
            }
        };

        if !cert.public_key_matches(&key)? {
            warn!(
                subject = %cert.subject_cn().unwrap_or_else(|| cert.subject()),
                "certificate from the CA does not match the agent's private key"
            );
            return Ok(State::Wait);
        }

        if cert.is_revoked_by(&context.crls) {
            warn!(
                subject = %cert.subject_cn().unwrap_or_else(|| cert.subject()),
                "certificate from the CA has been revoked"
            );
            return Ok(State::Wait);
        }

        self.provider.save_client_cert(&cert)?;
        info!(subject = %cert.subject(), "client certificate downloaded and verified");
        Ok(State::Done(context.with_client_cert(cert)))
    }

    /// Sleeps `waitforcert` seconds and restarts from scratch, or surfaces
    /// `ExitRequested` when `waitforcert` is 0. Restarting re-verifies the
    /// persisted material: the CA chain or CRLs could have changed while we
    /// slept.
    async fn wait(&self) -> Result<State> {
        let seconds = self.config.waitforcert;
        if seconds == 0 {
            return Ok(State::ExitRequested);
        }

        info!(
            "Couldn't fetch certificate from CA server; you might still need to sign this \
             agent's certificate ({}). Will try again in {} seconds.",
            self.config.certname, seconds
        );
        self.sleep(Duration::from_secs(seconds)).await?;
        Ok(State::NeedCaCerts)
    }

    /// Sleeps, honoring the cancellation signal promptly.
    async fn sleep(&self, duration: Duration) -> Result<()> {
        match self.shutdown.clone() {
            None => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
            Some(mut shutdown) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => Ok(()),
                    _ = shutdown.changed() => Err(Error::Cancelled),
                }
            }
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if let Some(shutdown) = &self.shutdown {
            if *shutdown.borrow() {
                return Err(Error::Cancelled);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::cert_chain_to_pem;
    use crate::testing::{MemoryCertProvider, ScriptedCaClient, TestCa};

    fn config() -> Config {
        let mut config = Config::new("agent.example.net");
        config.keylength = 2048;
        config
    }

    #[tokio::test]
    async fn missing_ca_certificate_is_fatal() {
        let ca = ScriptedCaClient::new();
        ca.push_ca_response(404, "not found");
        let machine = SslMachine::new(config(), ca, MemoryCertProvider::new());

        let err = machine.ensure_ca_certificates().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "CA certificate is missing from the server"
        );
    }

    #[tokio::test]
    async fn ca_server_error_is_fatal_with_reason() {
        let ca = ScriptedCaClient::new();
        ca.push_ca_response(500, "boom");
        let machine = SslMachine::new(config(), ca, MemoryCertProvider::new());

        let err = machine.ensure_ca_certificates().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Could not download CA certificate: Internal Server Error"
        );
    }

    #[tokio::test]
    async fn unparsable_ca_chain_is_not_persisted() {
        let ca = ScriptedCaClient::new();
        ca.push_ca_response(200, "this is not pem");
        let provider = MemoryCertProvider::new();
        let machine = SslMachine::new(config(), ca, provider);

        let err = machine.ensure_ca_certificates().await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        assert!(machine.provider.cacerts().is_none());
    }

    #[tokio::test]
    async fn peer_verification_disabled_only_for_ca_download() {
        let fixtures = TestCa::generate();
        let ca = ScriptedCaClient::new();
        ca.push_ca_response(200, cert_chain_to_pem(&[fixtures.cert().clone()]));
        ca.push_crl_response(200, fixtures.revoke(&[]).to_pem());
        let machine = SslMachine::new(config(), ca, MemoryCertProvider::new());

        machine.ensure_ca_certificates().await.unwrap();

        let calls = machine.ca.calls();
        assert_eq!(calls.len(), 2);
        assert!(!calls[0].verify_peer, "CA download must not verify");
        assert!(calls[1].verify_peer, "CRL download must verify");
    }

    #[tokio::test]
    async fn persisted_ca_chain_skips_the_network() {
        let fixtures = TestCa::generate();
        let provider = MemoryCertProvider::new();
        provider.set_cacerts(vec![fixtures.cert().clone()]);
        provider.set_crls(vec![fixtures.revoke(&[])]);
        let machine = SslMachine::new(config(), ScriptedCaClient::new(), provider);

        let context = machine.ensure_ca_certificates().await.unwrap();
        assert!(machine.ca.calls().is_empty());
        assert_eq!(context.cacerts.len(), 1);
        assert!(context.verify_peer);
    }

    #[tokio::test]
    async fn trust_anchors_are_installed_from_persisted_material() {
        let fixtures = TestCa::generate();
        let provider = MemoryCertProvider::new();
        provider.set_cacerts(vec![fixtures.cert().clone()]);
        provider.set_crls(vec![fixtures.revoke(&[])]);
        let machine = SslMachine::new(config(), ScriptedCaClient::new(), provider);

        machine.ensure_ca_certificates().await.unwrap();
        assert_eq!(machine.ca.installed_anchors(), 1);
    }

    #[tokio::test]
    async fn disabled_revocation_suppresses_all_crl_io() {
        let fixtures = TestCa::generate();
        let mut config = config();
        config.certificate_revocation = crate::RevocationMode::Disabled;

        let provider = MemoryCertProvider::new();
        provider.set_cacerts(vec![fixtures.cert().clone()]);
        let machine = SslMachine::new(config, ScriptedCaClient::new(), provider);

        let context = machine.ensure_ca_certificates().await.unwrap();
        assert!(context.crls.is_empty());
        assert_eq!(machine.provider.crl_loads(), 0, "provider must not be consulted");
        assert!(machine.ca.calls().is_empty(), "no CRL request may be issued");
    }

    #[tokio::test]
    async fn missing_crl_is_fatal() {
        let fixtures = TestCa::generate();
        let provider = MemoryCertProvider::new();
        provider.set_cacerts(vec![fixtures.cert().clone()]);
        let ca = ScriptedCaClient::new();
        ca.push_crl_response(404, "not found");
        let machine = SslMachine::new(config(), ca, provider);

        let err = machine.ensure_ca_certificates().await.unwrap_err();
        assert_eq!(err.to_string(), "CRL is missing from the server");
    }

    #[tokio::test]
    async fn crl_server_error_is_fatal_with_reason() {
        let fixtures = TestCa::generate();
        let provider = MemoryCertProvider::new();
        provider.set_cacerts(vec![fixtures.cert().clone()]);
        let ca = ScriptedCaClient::new();
        ca.push_crl_response(503, "overloaded");
        let machine = SslMachine::new(config(), ca, provider);

        let err = machine.ensure_ca_certificates().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Could not download CRLs: Service Unavailable"
        );
    }

    #[tokio::test]
    async fn mismatched_persisted_cert_is_fatal() {
        let fixtures = TestCa::generate();
        let key = PrivateKey::generate(2048).unwrap();
        let other_key = PrivateKey::generate(2048).unwrap();
        let cert = fixtures.issue("agent.example.net", &other_key, 31);

        let provider = MemoryCertProvider::new();
        provider.set_cacerts(vec![fixtures.cert().clone()]);
        provider.set_crls(vec![fixtures.revoke(&[])]);
        provider.set_private_key(key);
        provider.set_client_cert(cert);

        let machine = SslMachine::new(config(), ScriptedCaClient::new(), provider);
        let err = machine.ensure_client_certificate().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "The certificate for 'CN=agent.example.net' does not match its private key"
        );
    }

    #[tokio::test]
    async fn csr_submission_failure_is_fatal() {
        let fixtures = TestCa::generate();
        let provider = MemoryCertProvider::new();
        provider.set_cacerts(vec![fixtures.cert().clone()]);
        provider.set_crls(vec![fixtures.revoke(&[])]);
        let ca = ScriptedCaClient::new();
        ca.push_csr_response(403, "forbidden");
        let machine = SslMachine::new(config(), ca, provider);

        let err = machine.ensure_client_certificate().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to submit the CSR, HTTP response was 403"
        );
    }

    #[tokio::test]
    async fn already_submitted_csr_is_success_equivalent() {
        let fixtures = TestCa::generate();
        let key = PrivateKey::generate(2048).unwrap();
        let cert = fixtures.issue("agent.example.net", &key, 8);

        let provider = MemoryCertProvider::new();
        provider.set_cacerts(vec![fixtures.cert().clone()]);
        provider.set_crls(vec![fixtures.revoke(&[])]);
        provider.set_private_key(key);

        let ca = ScriptedCaClient::new();
        ca.push_csr_response(
            400,
            "agent.example.net already has a requested certificate; ignoring certificate request",
        );
        ca.push_cert_response(200, cert.to_pem());
        let machine = SslMachine::new(config(), ca, provider);

        let outcome = machine.ensure_client_certificate().await.unwrap();
        assert!(matches!(outcome, Bootstrap::Complete(_)));
    }

    #[tokio::test]
    async fn unsigned_cert_with_waitforcert_zero_requests_exit() {
        let fixtures = TestCa::generate();
        let key = PrivateKey::generate(2048).unwrap();

        let mut config = config();
        config.waitforcert = 0;

        let provider = MemoryCertProvider::new();
        provider.set_cacerts(vec![fixtures.cert().clone()]);
        provider.set_crls(vec![fixtures.revoke(&[])]);
        provider.set_private_key(key);

        let ca = ScriptedCaClient::new();
        ca.push_csr_response(200, "");
        ca.push_cert_response(404, "not signed yet");
        let machine = SslMachine::new(config, ca, provider);

        let outcome = machine.ensure_client_certificate().await.unwrap();
        assert!(matches!(outcome, Bootstrap::ExitRequested));
        assert!(
            machine.provider.client_cert().is_none(),
            "nothing may be persisted for an unsigned certificate"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wait_retries_the_whole_pipeline() {
        let fixtures = TestCa::generate();
        let key = PrivateKey::generate(2048).unwrap();
        let cert = fixtures.issue("agent.example.net", &key, 44);

        let provider = MemoryCertProvider::new();
        provider.set_cacerts(vec![fixtures.cert().clone()]);
        provider.set_crls(vec![fixtures.revoke(&[])]);
        provider.set_private_key(key);

        let ca = ScriptedCaClient::new();
        // First round: submission accepted but the cert is not signed yet.
        ca.push_csr_response(200, "");
        ca.push_cert_response(404, "not signed yet");
        // Second round after the wait: signed.
        ca.push_csr_response(200, "");
        ca.push_cert_response(200, cert.to_pem());
        let machine = SslMachine::new(config(), ca, provider);

        let outcome = machine.ensure_client_certificate().await.unwrap();
        let Bootstrap::Complete(context) = outcome else {
            panic!("expected a completed bootstrap");
        };
        assert_eq!(
            context.client_cert.as_ref().unwrap().der(),
            cert.der()
        );
    }

    #[tokio::test]
    async fn mismatched_downloaded_cert_is_not_persisted() {
        let fixtures = TestCa::generate();
        let key = PrivateKey::generate(2048).unwrap();
        let other_key = PrivateKey::generate(2048).unwrap();
        let wrong_cert = fixtures.issue("agent.example.net", &other_key, 45);

        let mut config = config();
        config.waitforcert = 0;

        let provider = MemoryCertProvider::new();
        provider.set_cacerts(vec![fixtures.cert().clone()]);
        provider.set_crls(vec![fixtures.revoke(&[])]);
        provider.set_private_key(key);

        let ca = ScriptedCaClient::new();
        ca.push_csr_response(200, "");
        ca.push_cert_response(200, wrong_cert.to_pem());
        let machine = SslMachine::new(config, ca, provider);

        let outcome = machine.ensure_client_certificate().await.unwrap();
        assert!(matches!(outcome, Bootstrap::ExitRequested));
        assert!(machine.provider.client_cert().is_none());
    }

    #[tokio::test]
    async fn revoked_downloaded_cert_is_not_persisted() {
        let fixtures = TestCa::generate();
        let key = PrivateKey::generate(2048).unwrap();
        let cert = fixtures.issue("agent.example.net", &key, 46);

        let mut config = config();
        config.waitforcert = 0;

        let provider = MemoryCertProvider::new();
        provider.set_cacerts(vec![fixtures.cert().clone()]);
        provider.set_crls(vec![fixtures.revoke(&[46])]);
        provider.set_private_key(key);

        let ca = ScriptedCaClient::new();
        ca.push_csr_response(200, "");
        ca.push_cert_response(200, cert.to_pem());
        let machine = SslMachine::new(config, ca, provider);

        let outcome = machine.ensure_client_certificate().await.unwrap();
        assert!(matches!(outcome, Bootstrap::ExitRequested));
        assert!(machine.provider.client_cert().is_none());
    }

    #[tokio::test]
    async fn corrupt_downloaded_cert_recovers_via_wait() {
        let fixtures = TestCa::generate();
        let key = PrivateKey::generate(2048).unwrap();

        let mut config = config();
        config.waitforcert = 0;

        let provider = MemoryCertProvider::new();
        provider.set_cacerts(vec![fixtures.cert().clone()]);
        provider.set_crls(vec![fixtures.revoke(&[])]);
        provider.set_private_key(key);

        let ca = ScriptedCaClient::new();
        ca.push_csr_response(200, "");
        ca.push_cert_response(200, "definitely not a certificate");
        let machine = SslMachine::new(config, ca, provider);

        let outcome = machine.ensure_client_certificate().await.unwrap();
        assert!(matches!(outcome, Bootstrap::ExitRequested));
        assert!(machine.provider.client_cert().is_none());
    }

    #[tokio::test]
    async fn cancellation_stops_the_pipeline() {
        let (tx, rx) = watch::channel(true);
        let machine =
            SslMachine::new(config(), ScriptedCaClient::new(), MemoryCertProvider::new())
                .with_shutdown(rx);
        drop(tx);

        let err = machine.ensure_client_certificate().await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn exit_message_names_the_agent() {
        let message = exit_message("agent.example.net");
        assert!(message.contains("(agent.example.net)"));
        assert!(message.contains("Exiting now because the waitforcert setting is set to 0."));
    }
}
