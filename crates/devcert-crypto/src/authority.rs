//! Local certificate authority: root bootstrap and CSR signing.
//!
//! Uses `rcgen` for both the self-signed root and the issued leaf
//! certificates. The issuer is reconstructed from the CA certificate PEM
//! on every signing call, so the on-disk files are the only CA state.

use std::time::Duration;

use rand::RngCore;
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, DistinguishedName,
    DnType, ExtendedKeyUsagePurpose, IsCa, KeyUsagePurpose, SerialNumber,
};
use time::OffsetDateTime;
use zeroize::Zeroizing;

use crate::csr::{inspect_csr, DEVICE_COUNTRY, DEVICE_ORGANIZATION};
use crate::keys::{generate_private_key, load_key_pair, CryptoError, KeyAlgorithm};

/// CA certificate validity period.
pub const CA_VALIDITY_DAYS: i64 = 1024;

const CA_COMMON_NAME: &str = "Thin Edge Device CA";
const CA_ORGANIZATIONAL_UNIT: &str = "Device Enrollment";

/// CA certificate and private key, both PEM.
pub struct CaMaterial {
    pub cert_pem: String,
    pub key_pem: Zeroizing<String>,
}

impl std::fmt::Debug for CaMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaMaterial")
            .field("cert_pem", &self.cert_pem)
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

fn build_ca_params() -> CertificateParams {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, CA_COMMON_NAME);
    dn.push(DnType::CountryName, DEVICE_COUNTRY);
    dn.push(DnType::OrganizationName, DEVICE_ORGANIZATION);
    dn.push(DnType::OrganizationalUnitName, CA_ORGANIZATIONAL_UNIT);
    params.distinguished_name = dn;

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];

    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(CA_VALIDITY_DAYS);
    params.serial_number = Some(random_serial());
    params
}

/// Positive 16-byte serial number.
fn random_serial() -> SerialNumber {
    let mut bytes = vec![0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes[0] &= 0x7f;
    SerialNumber::from(bytes)
}

/// Generate a new self-signed root CA.
pub fn create_root_ca(algorithm: KeyAlgorithm) -> Result<CaMaterial, CryptoError> {
    let key_pem = generate_private_key(algorithm)?;
    let key_pair = load_key_pair(&key_pem)?;

    let cert = build_ca_params()
        .self_signed(&key_pair)
        .map_err(|e| CryptoError::Signing(format!("root certificate generation failed: {e}")))?;

    tracing::info!(%algorithm, days = CA_VALIDITY_DAYS, "Root CA generated");

    Ok(CaMaterial {
        cert_pem: cert.pem(),
        key_pem,
    })
}

/// Sign a PEM CSR with the CA, returning the leaf certificate PEM.
///
/// The CSR's self-signature is verified before anything is signed. The
/// subject is taken from the CSR; validity runs from now for `validity`.
pub fn sign_csr(
    csr_pem: &str,
    ca: &CaMaterial,
    validity: Duration,
) -> Result<String, CryptoError> {
    inspect_csr(csr_pem)?;

    let issuer_params = CertificateParams::from_ca_cert_pem(&ca.cert_pem)
        .map_err(|e| CryptoError::Signing(format!("failed to parse CA certificate: {e}")))?;
    let issuer_key = load_key_pair(&ca.key_pem)?;
    let issuer = issuer_params
        .self_signed(&issuer_key)
        .map_err(|e| CryptoError::Signing(format!("failed to rebuild issuer: {e}")))?;

    let mut csr = CertificateSigningRequestParams::from_pem(csr_pem)
        .map_err(|e| CryptoError::Csr(format!("failed to parse CSR: {e}")))?;

    let lifetime = time::Duration::try_from(validity)
        .map_err(|e| CryptoError::Signing(format!("invalid validity: {e}")))?;
    let now = OffsetDateTime::now_utc();
    csr.params.not_before = now;
    csr.params.not_after = now + lifetime;
    csr.params.serial_number = Some(random_serial());
    csr.params.is_ca = IsCa::NoCa;
    csr.params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    csr.params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ClientAuth,
        ExtendedKeyUsagePurpose::ServerAuth,
    ];
    csr.params.use_authority_key_identifier_extension = true;

    let leaf = csr
        .signed_by(&issuer, &issuer_key)
        .map_err(|e| CryptoError::Signing(e.to_string()))?;

    Ok(leaf.pem())
}
