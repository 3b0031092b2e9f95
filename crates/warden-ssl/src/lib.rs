//! SSL bootstrap for the warden agent.
//!
//! Before a warden agent can talk to its control plane over mutually
//! authenticated TLS it has to acquire three things: the CA trust anchors,
//! a private key, and a client certificate signed by the CA. This crate
//! implements that acquisition as a linear state machine that handles
//! first-run (nothing on disk) and steady-state (everything provisioned)
//! uniformly, and polls the CA until an operator signs the agent's
//! certificate request.
//!
//! # Components
//!
//! - [`machine`] - the bootstrap state machine and its two entry points
//! - [`context`] - the accumulating trust material handed to callers
//! - [`certificate`] - X.509 certificate, CRL, and RSA key wrappers
//! - [`csr`] - certificate signing request construction
//! - [`ca`] - CA client trait and HTTP implementation
//! - [`provider`] - persisted key/cert store trait and disk implementation
//! - [`config`] - agent settings consumed by the pipeline
//! - [`testing`] - scripted collaborators and fixture minting for tests
//!
//! # Example
//!
//! ```ignore
//! use warden_ssl::ca::HttpCaClient;
//! use warden_ssl::config::Config;
//! use warden_ssl::machine::{Bootstrap, SslMachine};
//! use warden_ssl::provider::DiskCertProvider;
//!
//! let config = Config::new("agent.example.net");
//! let ca = HttpCaClient::from_config(&config)?;
//! let provider = DiskCertProvider::from_config(&config);
//!
//! let machine = SslMachine::new(config, ca, provider);
//! match machine.ensure_client_certificate().await? {
//!     Bootstrap::Complete(context) => { /* mTLS-ready */ }
//!     Bootstrap::ExitRequested => { /* waitforcert=0 and cert unsigned */ }
//! }
//! ```

pub mod ca;
pub mod certificate;
pub mod config;
pub mod context;
pub mod csr;
pub mod machine;
pub mod oids;
pub mod provider;
pub mod testing;

pub use ca::{CaClient, CaResponse, HttpCaClient};
pub use certificate::{Certificate, Crl, PrivateKey};
pub use config::{Config, RevocationMode};
pub use context::SslContext;
pub use csr::{CertificateRequest, CsrAttributes, CsrOptions};
pub use machine::{Bootstrap, SslMachine, State};
pub use provider::{CertProvider, DiskCertProvider, SslPaths};

/// Errors raised by the bootstrap pipeline.
///
/// The user-facing variants render their message verbatim: callers and the
/// CLI surface these strings directly, and several of them are stable
/// contract (the CA-missing and CSR-submission messages in particular).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed configuration: bad `dns_alt_names`, bad CSR-attributes
    /// document, unparsable OID.
    #[error("{0}")]
    Config(String),

    /// A CA endpoint answered with a status the current state treats as
    /// fatal.
    #[error("{0}")]
    Network(String),

    /// Malformed PEM or DER where valid trust material was expected.
    #[error("{0}")]
    Parse(String),

    /// Trust material failed verification (key/cert mismatch, revoked cert).
    #[error("{0}")]
    Verification(String),

    /// RSA key decoding or generation failure.
    #[error("{0}")]
    Crypto(String),

    /// Certificate provider I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport failure (connection, DNS, TLS handshake).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The pipeline was cancelled from outside.
    #[error("bootstrap cancelled")]
    Cancelled,
}

/// Result type for bootstrap operations.
pub type Result<T> = std::result::Result<T, Error>;
