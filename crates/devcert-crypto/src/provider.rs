//! The cryptographic capability consumed by the lifecycle crate.

use std::time::Duration;

use zeroize::Zeroizing;

use crate::authority::{self, CaMaterial};
use crate::csr::{self, CsrInfo};
use crate::fingerprint::Fingerprint;
use crate::keys::{self, CryptoError, KeyAlgorithm};
use crate::x509::{self, CertificateInfo};

/// Key generation, CSR handling, certificate signing and parsing.
///
/// Object safe so components can share one `Arc<dyn CryptoProvider>`.
pub trait CryptoProvider: Send + Sync {
    /// New private key as PKCS#8 PEM.
    fn generate_key(&self, algorithm: KeyAlgorithm) -> Result<Zeroizing<String>, CryptoError>;

    /// Convert PKCS#1/SEC1/PKCS#8 key PEM to PKCS#8 PEM.
    fn normalize_key(&self, key_pem: &str) -> Result<Zeroizing<String>, CryptoError>;

    /// Fingerprint of the public half of a private key.
    fn public_key_fingerprint(&self, key_pem: &str) -> Result<Fingerprint, CryptoError>;

    fn build_csr(&self, key_pem: &str, common_name: &str) -> Result<String, CryptoError>;

    /// Parse and signature-check a CSR.
    fn inspect_csr(&self, csr_pem: &str) -> Result<CsrInfo, CryptoError>;

    fn create_root_ca(&self, algorithm: KeyAlgorithm) -> Result<CaMaterial, CryptoError>;

    fn sign_csr(
        &self,
        csr_pem: &str,
        ca: &CaMaterial,
        validity: Duration,
    ) -> Result<String, CryptoError>;

    /// Decode every certificate in a PEM text, in order.
    fn parse_chain(&self, pem_text: &str) -> Result<Vec<CertificateInfo>, CryptoError>;

    /// Each certificate is signed by its successor.
    fn chain_is_well_formed(&self, chain: &[CertificateInfo]) -> bool;
}

/// Pure-Rust implementation backed by `rcgen`, `p256`, `rsa` and `x509-parser`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareCrypto;

impl CryptoProvider for SoftwareCrypto {
    fn generate_key(&self, algorithm: KeyAlgorithm) -> Result<Zeroizing<String>, CryptoError> {
        keys::generate_private_key(algorithm)
    }

    fn normalize_key(&self, key_pem: &str) -> Result<Zeroizing<String>, CryptoError> {
        keys::normalize_private_key_pem(key_pem)
    }

    fn public_key_fingerprint(&self, key_pem: &str) -> Result<Fingerprint, CryptoError> {
        keys::public_key_fingerprint(key_pem)
    }

    fn build_csr(&self, key_pem: &str, common_name: &str) -> Result<String, CryptoError> {
        csr::build_csr(key_pem, common_name)
    }

    fn inspect_csr(&self, csr_pem: &str) -> Result<CsrInfo, CryptoError> {
        csr::inspect_csr(csr_pem)
    }

    fn create_root_ca(&self, algorithm: KeyAlgorithm) -> Result<CaMaterial, CryptoError> {
        authority::create_root_ca(algorithm)
    }

    fn sign_csr(
        &self,
        csr_pem: &str,
        ca: &CaMaterial,
        validity: Duration,
    ) -> Result<String, CryptoError> {
        authority::sign_csr(csr_pem, ca, validity)
    }

    fn parse_chain(&self, pem_text: &str) -> Result<Vec<CertificateInfo>, CryptoError> {
        x509::parse_chain_pem(pem_text)
    }

    fn chain_is_well_formed(&self, chain: &[CertificateInfo]) -> bool {
        x509::chain_is_well_formed(chain)
    }
}
