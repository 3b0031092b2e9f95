//! Object identifiers emitted by the CSR builder.
//!
//! Everything the builder writes into a certificate request is identified by
//! one of these constants, so the full set of OIDs the agent produces can be
//! audited in one place. Operator-supplied OIDs (custom attributes and
//! extension requests) are parsed at configuration time and validated
//! against [`EXTENSION_REQUEST`] to keep the attribute set well-formed.

use const_oid::ObjectIdentifier;

/// PKCS#9 `extensionRequest` attribute (`1.2.840.113549.1.9.14`).
///
/// Carries the extensions the agent asks the CA to copy into the issued
/// certificate, including the subject alternative names.
pub const EXTENSION_REQUEST: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.14");

/// X.509 `subjectAltName` extension (`2.5.29.17`).
pub const SUBJECT_ALT_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.17");

/// `sha256WithRSAEncryption` signature algorithm (`1.2.840.113549.1.1.11`).
pub const SHA_256_WITH_RSA_ENCRYPTION: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");

/// X.520 `commonName` attribute type (`2.5.4.3`).
pub const COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
