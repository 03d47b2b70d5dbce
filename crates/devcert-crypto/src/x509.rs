//! X.509 certificate and chain parsing.

use chrono::{DateTime, Utc};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::{FromDer, X509Name};

use crate::fingerprint::Fingerprint;
use crate::keys::CryptoError;

/// Decoded view of one certificate.
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub common_name: Option<String>,
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub is_ca: bool,
    /// SHA-256 of the certificate DER.
    pub fingerprint: Fingerprint,
    /// SHA-256 of the embedded SubjectPublicKeyInfo.
    pub public_key_fingerprint: Fingerprint,
    pub der: Vec<u8>,
}

impl CertificateInfo {
    /// Whether the issuer name equals the subject name.
    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }
}

/// First CN attribute of a name, if it is a printable string.
pub(crate) fn first_common_name(name: &X509Name<'_>) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
}

fn parse_x509(der: &[u8]) -> Result<X509Certificate<'_>, CryptoError> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| CryptoError::Certificate(format!("failed to parse certificate: {e}")))?;
    Ok(cert)
}

fn timestamp(ts: i64) -> Result<DateTime<Utc>, CryptoError> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| CryptoError::Certificate(format!("timestamp out of range: {ts}")))
}

/// Decode a single DER certificate.
pub fn parse_certificate_der(der: &[u8]) -> Result<CertificateInfo, CryptoError> {
    let cert = parse_x509(der)?;
    let validity = cert.validity();

    Ok(CertificateInfo {
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        common_name: first_common_name(cert.subject()),
        serial: cert.raw_serial_as_string(),
        not_before: timestamp(validity.not_before.timestamp())?,
        not_after: timestamp(validity.not_after.timestamp())?,
        is_ca: cert
            .basic_constraints()
            .ok()
            .flatten()
            .map(|bc| bc.value.ca)
            .unwrap_or(false),
        fingerprint: Fingerprint::of(der),
        public_key_fingerprint: Fingerprint::of(cert.public_key().raw),
        der: der.to_vec(),
    })
}

/// Decode every `CERTIFICATE` block in a PEM text, in file order.
///
/// Fails when the text holds no certificate or any block does not parse.
pub fn parse_chain_pem(text: &str) -> Result<Vec<CertificateInfo>, CryptoError> {
    let blocks =
        pem::parse_many(text).map_err(|e| CryptoError::Certificate(e.to_string()))?;

    let chain = blocks
        .iter()
        .filter(|block| block.tag() == "CERTIFICATE")
        .map(|block| parse_certificate_der(block.contents()))
        .collect::<Result<Vec<_>, _>>()?;

    if chain.is_empty() {
        return Err(CryptoError::Certificate(
            "no CERTIFICATE block found".to_string(),
        ));
    }
    Ok(chain)
}

/// Check that `child` carries a valid signature made by `issuer`'s key.
pub fn verify_issued_by(child: &CertificateInfo, issuer: &CertificateInfo) -> bool {
    if child.issuer != issuer.subject {
        return false;
    }
    let (Ok(child_cert), Ok(issuer_cert)) = (parse_x509(&child.der), parse_x509(&issuer.der))
    else {
        return false;
    };
    child_cert
        .verify_signature(Some(issuer_cert.public_key()))
        .is_ok()
}

/// Every certificate is signed by the one that follows it.
pub fn chain_is_well_formed(chain: &[CertificateInfo]) -> bool {
    if chain.is_empty() {
        return false;
    }
    chain
        .windows(2)
        .all(|pair| verify_issued_by(&pair[0], &pair[1]))
}
