//! Certificate signing request construction.
//!
//! A request carries the agent's certname as its subject common name, the
//! configured subject alternative names, and whatever custom attributes and
//! extension requests the operator put in the CSR-attributes document. The
//! request is signed with the agent's RSA key using SHA-256 and uploaded to
//! the CA in DER form.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use const_oid::ObjectIdentifier;
use der::asn1::{BitString, Ia5String, OctetString, SetOfVec, Utf8StringRef};
use der::{Any, Decode, Encode};
use rsa::signature::{SignatureEncoding, Signer};
use serde::Deserialize;
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::attr::Attribute;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::SubjectAltName;
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::request::{CertReq, CertReqInfo, Version};

use crate::certificate::PrivateKey;
use crate::config::Config;
use crate::oids;
use crate::{Error, Result};

const CSR_TAG: &str = "CERTIFICATE REQUEST";

/// A subject alternative name entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AltName {
    /// A DNS name.
    Dns(String),
    /// An IP address.
    Ip(IpAddr),
}

/// Parses a comma-separated `dns_alt_names` value.
///
/// Entries are `TYPE:VALUE` with `TYPE` one of `DNS` or `IP`; a bare entry is
/// a DNS name. The certname is always appended as a DNS entry unless one of
/// the entries already names it.
pub fn parse_alt_names(raw: &str, certname: &str) -> Result<Vec<AltName>> {
    let mut names: Vec<AltName> = Vec::new();

    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let name = match entry.split_once(':') {
            None => AltName::Dns(entry.to_string()),
            Some((kind, value)) => {
                let value = value.trim();
                if value.is_empty() {
                    return Err(Error::Config(format!(
                        "invalid subject alt name '{entry}': empty value"
                    )));
                }
                match kind.trim() {
                    k if k.eq_ignore_ascii_case("DNS") => AltName::Dns(value.to_string()),
                    k if k.eq_ignore_ascii_case("IP") => {
                        let addr = value.parse::<IpAddr>().map_err(|e| {
                            Error::Config(format!("invalid subject alt name '{entry}': {e}"))
                        })?;
                        AltName::Ip(addr)
                    }
                    other => {
                        return Err(Error::Config(format!(
                            "invalid subject alt name '{entry}': unknown type '{other}'"
                        )))
                    }
                }
            }
        };

        if !names.iter().any(|n| alt_name_eq(n, &name)) {
            names.push(name);
        }
    }

    let certname_entry = AltName::Dns(certname.to_string());
    if !names.iter().any(|n| alt_name_eq(n, &certname_entry)) {
        names.push(certname_entry);
    }
    Ok(names)
}

fn alt_name_eq(a: &AltName, b: &AltName) -> bool {
    match (a, b) {
        (AltName::Dns(x), AltName::Dns(y)) => x.eq_ignore_ascii_case(y),
        (AltName::Ip(x), AltName::Ip(y)) => x == y,
        _ => false,
    }
}

/// The operator-supplied CSR-attributes document.
///
/// A TOML document with two optional tables, both mapping dotted-decimal
/// OIDs to string values:
///
/// ```toml
/// [custom_attributes]
/// "1.3.6.1.4.1.34380.1.2.1" = "build-farm"
///
/// [extension_requests]
/// "1.3.6.1.4.1.34380.1.1.1" = "az-east-2"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsrAttributes {
    /// Attributes emitted verbatim into the CSR's attribute set.
    #[serde(default)]
    pub custom_attributes: BTreeMap<String, String>,
    /// Extensions emitted inside the CSR's `extensionRequest` attribute.
    #[serde(default)]
    pub extension_requests: BTreeMap<String, String>,
}

impl CsrAttributes {
    /// Parses and validates a CSR-attributes document.
    pub fn parse(document: &str) -> Result<Self> {
        let attributes: CsrAttributes = toml::from_str(document)
            .map_err(|e| Error::Config(format!("invalid CSR attributes document: {e}")))?;
        attributes.validate()?;
        Ok(attributes)
    }

    /// Loads a CSR-attributes document; a missing file yields an empty set.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let document = std::fs::read_to_string(path)?;
        Self::parse(&document)
    }

    fn validate(&self) -> Result<()> {
        for key in self.custom_attributes.keys() {
            let oid = parse_oid(key, "custom_attributes")?;
            if oid == oids::EXTENSION_REQUEST {
                return Err(Error::Config(
                    "the extensionRequest OID cannot be used as a custom attribute".to_string(),
                ));
            }
        }
        for key in self.extension_requests.keys() {
            parse_oid(key, "extension_requests")?;
        }
        Ok(())
    }

    /// Whether the document contributes nothing to the CSR.
    pub fn is_empty(&self) -> bool {
        self.custom_attributes.is_empty() && self.extension_requests.is_empty()
    }
}

fn parse_oid(key: &str, section: &str) -> Result<ObjectIdentifier> {
    ObjectIdentifier::new(key)
        .map_err(|e| Error::Config(format!("invalid OID '{key}' in {section}: {e}")))
}

/// Options for generating a certificate signing request.
#[derive(Debug, Clone)]
pub struct CsrOptions {
    certname: String,
    alt_names: Vec<AltName>,
    attributes: CsrAttributes,
}

impl CsrOptions {
    /// Creates options for the given certname, with the certname itself as
    /// the only subject alt name and no extra attributes.
    pub fn new(certname: impl Into<String>) -> Self {
        let certname = certname.into();
        let alt_names = vec![AltName::Dns(certname.clone())];
        Self {
            certname,
            alt_names,
            attributes: CsrAttributes::default(),
        }
    }

    /// Builds options from the agent configuration: `dns_alt_names` plus the
    /// CSR-attributes document, if one is configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut options = Self::new(&config.certname).with_alt_names(&config.dns_alt_names)?;
        if let Some(path) = &config.csr_attributes {
            options = options.with_attributes(CsrAttributes::load(path)?);
        }
        Ok(options)
    }

    /// Replaces the subject alt names with the parsed `dns_alt_names` value.
    pub fn with_alt_names(mut self, raw: &str) -> Result<Self> {
        self.alt_names = parse_alt_names(raw, &self.certname)?;
        Ok(self)
    }

    /// Attaches a CSR-attributes document.
    pub fn with_attributes(mut self, attributes: CsrAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Returns the resolved subject alt names.
    pub fn alt_names(&self) -> &[AltName] {
        &self.alt_names
    }

    /// Builds and signs the certificate request with the given key.
    pub fn generate(&self, key: &PrivateKey) -> Result<CertificateRequest> {
        let subject = Name::from_str(&format!("CN={}", self.certname))
            .map_err(|e| Error::Config(format!("invalid certname '{}': {e}", self.certname)))?;

        let public_key = SubjectPublicKeyInfoOwned::from_der(&key.public_key_der()?)
            .map_err(|e| Error::Crypto(format!("failed to encode public key: {e}")))?;

        let mut attributes = SetOfVec::new();
        for (oid, value) in &self.attributes.custom_attributes {
            insert_attribute(&mut attributes, utf8_attribute(oid, value)?)?;
        }
        insert_attribute(&mut attributes, self.extension_request_attribute()?)?;

        let info = CertReqInfo {
            version: Version::V1,
            subject,
            public_key,
            attributes,
        };
        let tbs = info
            .to_der()
            .map_err(|e| Error::Crypto(format!("failed to encode certificate request: {e}")))?;

        let signature = key
            .signing_key()
            .try_sign(&tbs)
            .map_err(|e| Error::Crypto(format!("failed to sign certificate request: {e}")))?;

        let request = CertReq {
            info,
            algorithm: AlgorithmIdentifierOwned {
                oid: oids::SHA_256_WITH_RSA_ENCRYPTION,
                parameters: Some(der::AnyRef::NULL.into()),
            },
            signature: BitString::from_bytes(&signature.to_vec())
                .map_err(|e| Error::Crypto(format!("failed to encode signature: {e}")))?,
        };

        let der = request
            .to_der()
            .map_err(|e| Error::Crypto(format!("failed to encode certificate request: {e}")))?;
        Ok(CertificateRequest { der, request })
    }

    fn extension_request_attribute(&self) -> Result<Attribute> {
        let mut extensions: Vec<Extension> = Vec::with_capacity(
            1 + self.attributes.extension_requests.len(),
        );

        let general_names = self
            .alt_names
            .iter()
            .map(|name| match name {
                AltName::Dns(dns) => {
                    let name = Ia5String::new(dns).map_err(|e| {
                        Error::Config(format!("invalid subject alt name '{dns}': {e}"))
                    })?;
                    Ok(GeneralName::DnsName(name))
                }
                AltName::Ip(addr) => {
                    let octets = match addr {
                        IpAddr::V4(v4) => v4.octets().to_vec(),
                        IpAddr::V6(v6) => v6.octets().to_vec(),
                    };
                    let octets = OctetString::new(octets).map_err(|e| {
                        Error::Config(format!("invalid subject alt name '{addr}': {e}"))
                    })?;
                    Ok(GeneralName::IpAddress(octets))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        extensions.push(encode_extension(
            oids::SUBJECT_ALT_NAME,
            &SubjectAltName(general_names),
        )?);

        for (oid, value) in &self.attributes.extension_requests {
            let utf8 = Utf8StringRef::new(value)
                .map_err(|e| Error::Config(format!("invalid extension request value: {e}")))?;
            extensions.push(encode_extension(parse_oid(oid, "extension_requests")?, &utf8)?);
        }

        let value = Any::encode_from(&extensions)
            .map_err(|e| Error::Crypto(format!("failed to encode extension request: {e}")))?;
        let mut values = SetOfVec::new();
        values
            .insert(value)
            .map_err(|e| Error::Crypto(format!("failed to encode extension request: {e}")))?;
        Ok(Attribute {
            oid: oids::EXTENSION_REQUEST,
            values,
        })
    }
}

fn encode_extension<T: Encode>(oid: ObjectIdentifier, value: &T) -> Result<Extension> {
    let der = value
        .to_der()
        .map_err(|e| Error::Crypto(format!("failed to encode extension {oid}: {e}")))?;
    Ok(Extension {
        extn_id: oid,
        critical: false,
        extn_value: OctetString::new(der)
            .map_err(|e| Error::Crypto(format!("failed to encode extension {oid}: {e}")))?,
    })
}

fn utf8_attribute(oid: &str, value: &str) -> Result<Attribute> {
    let oid = parse_oid(oid, "custom_attributes")?;
    let utf8 = Utf8StringRef::new(value)
        .map_err(|e| Error::Config(format!("invalid attribute value for {oid}: {e}")))?;
    let any = Any::encode_from(&utf8)
        .map_err(|e| Error::Crypto(format!("failed to encode attribute {oid}: {e}")))?;
    let mut values = SetOfVec::new();
    values
        .insert(any)
        .map_err(|e| Error::Crypto(format!("failed to encode attribute {oid}: {e}")))?;
    Ok(Attribute { oid, values })
}

fn insert_attribute(set: &mut SetOfVec<Attribute>, attribute: Attribute) -> Result<()> {
    set.insert(attribute)
        .map_err(|e| Error::Crypto(format!("failed to assemble attribute set: {e}")))
}

/// A signed certificate request, ready to persist and upload.
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    der: Vec<u8>,
    request: CertReq,
}

impl CertificateRequest {
    /// Decodes a request from DER bytes.
    pub fn from_der(der: Vec<u8>) -> Result<Self> {
        let request = CertReq::from_der(&der)
            .map_err(|e| Error::Parse(format!("failed to parse certificate request: {e}")))?;
        Ok(Self { der, request })
    }

    /// Returns the DER encoding uploaded to the CA.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the PEM encoding persisted on disk.
    pub fn to_pem(&self) -> String {
        pem::encode(&pem::Pem::new(CSR_TAG, self.der.clone()))
    }

    /// Returns the parsed request.
    pub fn parsed(&self) -> &CertReq {
        &self.request
    }
}
