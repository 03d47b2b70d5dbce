//! Private key generation and normalisation.
//!
//! Device keys are ECDSA P-256. CA keys default to RSA-4096 but may be
//! P-256. Every key written to disk is PKCS#8 PEM; keys received in
//! PKCS#1 (`RSA PRIVATE KEY`) or SEC1 (`EC PRIVATE KEY`) form are
//! converted on the way in.

use std::fmt;
use std::str::FromStr;

use p256::ecdsa::SigningKey;
use p256::pkcs8::{EncodePrivateKey, LineEnding};
use rand::rngs::OsRng;
use rcgen::KeyPair;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::fingerprint::Fingerprint;

/// RSA modulus size used for generated RSA keys.
const RSA_BITS: usize = 4096;

/// Supported algorithms for locally generated keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyAlgorithm {
    EcdsaP256,
    Rsa4096,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EcdsaP256 => f.write_str("ecdsa-p256"),
            Self::Rsa4096 => f.write_str("rsa4096"),
        }
    }
}

impl FromStr for KeyAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ecdsa-p256" | "p256" | "ec" | "ecdsa" => Ok(Self::EcdsaP256),
            "rsa4096" | "rsa-4096" | "rsa" => Ok(Self::Rsa4096),
            other => Err(CryptoError::UnsupportedKey(format!(
                "unknown key algorithm '{other}'"
            ))),
        }
    }
}

/// Generate a new private key and return it as PKCS#8 PEM.
pub fn generate_private_key(algorithm: KeyAlgorithm) -> Result<Zeroizing<String>, CryptoError> {
    match algorithm {
        KeyAlgorithm::EcdsaP256 => {
            let signing_key = SigningKey::random(&mut OsRng);
            signing_key
                .to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| CryptoError::KeyEncoding(e.to_string()))
        }
        KeyAlgorithm::Rsa4096 => {
            tracing::debug!(bits = RSA_BITS, "Generating RSA key");
            let key = RsaPrivateKey::new(&mut OsRng, RSA_BITS)
                .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
            rsa::pkcs8::EncodePrivateKey::to_pkcs8_pem(&key, rsa::pkcs8::LineEnding::LF)
                .map_err(|e| CryptoError::KeyEncoding(e.to_string()))
        }
    }
}

/// Convert a private key PEM of any supported encoding to PKCS#8 PEM.
///
/// Accepts `PRIVATE KEY` (PKCS#8), `RSA PRIVATE KEY` (PKCS#1) and
/// `EC PRIVATE KEY` (SEC1, P-256 only). The result is guaranteed to load
/// as a signing key.
pub fn normalize_private_key_pem(key_pem: &str) -> Result<Zeroizing<String>, CryptoError> {
    let parsed = pem::parse(key_pem).map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;

    let pkcs8 = match parsed.tag() {
        "PRIVATE KEY" => Zeroizing::new(pem::encode_config(
            &parsed,
            pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
        )),
        "RSA PRIVATE KEY" => {
            let key = RsaPrivateKey::from_pkcs1_pem(key_pem)
                .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
            rsa::pkcs8::EncodePrivateKey::to_pkcs8_pem(&key, rsa::pkcs8::LineEnding::LF)
                .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?
        }
        "EC PRIVATE KEY" => {
            let key = p256::SecretKey::from_sec1_pem(key_pem)
                .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
            key.to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?
        }
        other => {
            return Err(CryptoError::UnsupportedKey(format!(
                "unsupported PEM block '{other}'"
            )))
        }
    };

    load_key_pair(&pkcs8)?;
    Ok(pkcs8)
}

/// Load a PKCS#8 PEM private key as an rcgen signing key.
pub fn load_key_pair(key_pem: &str) -> Result<KeyPair, CryptoError> {
    KeyPair::from_pem(key_pem).map_err(|e| CryptoError::UnsupportedKey(e.to_string()))
}

/// SHA-256 fingerprint of the SubjectPublicKeyInfo derived from a private key.
pub fn public_key_fingerprint(key_pem: &str) -> Result<Fingerprint, CryptoError> {
    let key = load_key_pair(key_pem)?;
    Ok(Fingerprint::of(&key.public_key_der()))
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key generation: {0}")]
    KeyGeneration(String),
    #[error("key encoding: {0}")]
    KeyEncoding(String),
    #[error("unsupported key: {0}")]
    UnsupportedKey(String),
    #[error("CSR: {0}")]
    Csr(String),
    #[error("certificate: {0}")]
    Certificate(String),
    #[error("signing: {0}")]
    Signing(String),
}
