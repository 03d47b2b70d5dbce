//! Certificate Signing Request construction and verification.
//!
//! Device CSRs carry the common name plus the fixed organisation fields
//! used for every enrolled device.

use rcgen::{CertificateParams, DistinguishedName, DnType};
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::prelude::FromDer;

use crate::fingerprint::Fingerprint;
use crate::keys::{load_key_pair, CryptoError};
use crate::x509::first_common_name;

/// Country written into device CSR subjects.
pub const DEVICE_COUNTRY: &str = "DE";

/// Organisation written into device CSR subjects.
pub const DEVICE_ORGANIZATION: &str = "Thin Edge";

/// Organisational unit written into device CSR subjects.
pub const DEVICE_ORGANIZATIONAL_UNIT: &str = "Test Device";

/// What a verified CSR asserts.
#[derive(Debug, Clone)]
pub struct CsrInfo {
    pub subject: String,
    pub common_name: Option<String>,
    /// SHA-256 of the requested SubjectPublicKeyInfo.
    pub public_key_fingerprint: Fingerprint,
}

/// Build a PEM CSR for `common_name`, signed with the given PKCS#8 key.
pub fn build_csr(key_pem: &str, common_name: &str) -> Result<String, CryptoError> {
    if common_name.trim().is_empty() {
        return Err(CryptoError::Csr("common name must not be empty".into()));
    }

    let key_pair = load_key_pair(key_pem)?;

    let mut params = CertificateParams::new(vec![])
        .map_err(|e| CryptoError::Csr(format!("failed to create params: {e}")))?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::CountryName, DEVICE_COUNTRY);
    dn.push(DnType::OrganizationName, DEVICE_ORGANIZATION);
    dn.push(DnType::OrganizationalUnitName, DEVICE_ORGANIZATIONAL_UNIT);
    params.distinguished_name = dn;

    let csr = params
        .serialize_request(&key_pair)
        .map_err(|e| CryptoError::Csr(format!("CSR serialization failed: {e}")))?;

    csr.pem()
        .map_err(|e| CryptoError::Csr(format!("CSR PEM encoding failed: {e}")))
}

/// Parse a PEM CSR and verify its self-signature.
///
/// The embedded common name is reported but not compared against anything.
pub fn inspect_csr(csr_pem: &str) -> Result<CsrInfo, CryptoError> {
    let parsed = pem::parse(csr_pem).map_err(|e| CryptoError::Csr(e.to_string()))?;
    if !parsed.tag().ends_with("CERTIFICATE REQUEST") {
        return Err(CryptoError::Csr(format!(
            "expected CERTIFICATE REQUEST block, found '{}'",
            parsed.tag()
        )));
    }

    let (_, csr) = X509CertificationRequest::from_der(parsed.contents())
        .map_err(|e| CryptoError::Csr(format!("failed to parse CSR: {e}")))?;

    csr.verify_signature()
        .map_err(|e| CryptoError::Csr(format!("CSR signature verification failed: {e}")))?;

    let info = &csr.certification_request_info;
    Ok(CsrInfo {
        subject: info.subject.to_string(),
        common_name: first_common_name(&info.subject),
        public_key_fingerprint: Fingerprint::of(info.subject_pki.raw),
    })
}
