//! Certificate Validator: structure, key correspondence and expiry.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use devcert_common::persist;
use devcert_crypto::{CertificateInfo, CryptoProvider};
use serde::Serialize;

use crate::error::DevcertError;
use crate::store::QUARANTINE_SUFFIX;

/// Why a certificate can or cannot be used as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Usability {
    Usable,
    Missing,
    Malformed,
    KeyMismatch,
    ExpiringSoon,
}

impl Usability {
    pub fn is_usable(self) -> bool {
        self == Self::Usable
    }
}

impl std::fmt::Display for Usability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Usable => "usable",
            Self::Missing => "missing",
            Self::Malformed => "malformed",
            Self::KeyMismatch => "does not match private key",
            Self::ExpiringSoon => "expiring soon",
        };
        f.write_str(text)
    }
}

pub struct CertificateValidator {
    crypto: Arc<dyn CryptoProvider>,
}

impl CertificateValidator {
    pub fn new(crypto: Arc<dyn CryptoProvider>) -> Self {
        Self { crypto }
    }

    /// Parse the certificate file into its chain.
    pub fn read_chain(&self, cert_path: &Path) -> Option<Vec<CertificateInfo>> {
        let text = std::fs::read_to_string(cert_path).ok()?;
        self.crypto.parse_chain(&text).ok()
    }

    /// The file parses and each certificate is signed by its successor.
    pub fn is_structurally_valid(&self, cert_path: &Path) -> bool {
        self.read_chain(cert_path)
            .is_some_and(|chain| self.crypto.chain_is_well_formed(&chain))
    }

    /// The leaf's public key is the one derived from the private key.
    ///
    /// Read-only: nothing is moved on mismatch.
    pub fn key_matches(&self, key_path: &Path, cert_path: &Path) -> bool {
        let key = std::fs::read_to_string(key_path)
            .ok()
            .and_then(|pem| self.crypto.public_key_fingerprint(&pem).ok());
        let leaf = self
            .read_chain(cert_path)
            .and_then(|chain| chain.into_iter().next());
        match (key, leaf) {
            (Some(key), Some(leaf)) => leaf.public_key_fingerprint == key,
            _ => false,
        }
    }

    /// Like [`key_matches`](Self::key_matches), but a mismatching
    /// certificate is renamed with an `.invalid` suffix.
    pub fn key_matches_certificate(&self, key_path: &Path, cert_path: &Path) -> bool {
        match self.ensure_key_matches(key_path, cert_path) {
            Ok(()) => true,
            Err(DevcertError::KeyCertificateMismatch { .. }) => false,
            Err(e) => {
                tracing::warn!(error = %e, path = %cert_path.display(), "Failed to quarantine certificate");
                false
            }
        }
    }

    /// Quarantine a certificate that does not belong to the key and report
    /// where it went. A missing certificate is not a mismatch.
    pub fn ensure_key_matches(&self, key_path: &Path, cert_path: &Path) -> Result<(), DevcertError> {
        if !cert_path.exists() || self.key_matches(key_path, cert_path) {
            return Ok(());
        }
        let quarantined = quarantine(cert_path)?;
        Err(DevcertError::KeyCertificateMismatch { quarantined })
    }

    /// Seconds of validity left on the leaf. Negative once expired.
    pub fn remaining_validity(&self, cert_path: &Path) -> Option<i64> {
        let leaf = self.read_chain(cert_path)?.into_iter().next()?;
        Some((leaf.not_after - Utc::now()).num_seconds())
    }

    /// Less than `window` of validity remains. Unreadable counts as expiring.
    pub fn expires_within(&self, cert_path: &Path, window: Duration) -> bool {
        let window = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
        match self.remaining_validity(cert_path) {
            Some(remaining) => remaining < window,
            None => true,
        }
    }

    /// Composite verdict: structurally valid, matches the key, and not
    /// expiring within `min_validity`.
    pub fn usability(&self, key_path: &Path, cert_path: &Path, min_validity: Duration) -> Usability {
        if !cert_path.exists() {
            return Usability::Missing;
        }
        if !self.is_structurally_valid(cert_path) {
            return Usability::Malformed;
        }
        if !self.key_matches(key_path, cert_path) {
            return Usability::KeyMismatch;
        }
        if self.expires_within(cert_path, min_validity) {
            return Usability::ExpiringSoon;
        }
        Usability::Usable
    }
}

/// Rename `cert_path` to `<cert_path>.invalid`.
///
/// Earlier quarantined copies are kept: when the name is taken a UTC
/// timestamp is appended, then a counter.
pub fn quarantine(cert_path: &Path) -> std::io::Result<PathBuf> {
    let target = quarantine_target(cert_path);
    persist::promote(cert_path, &target)?;
    tracing::warn!(path = %target.display(), "Certificate quarantined");
    Ok(target)
}

fn quarantine_target(cert_path: &Path) -> PathBuf {
    let plain = persist::with_suffix(cert_path, QUARANTINE_SUFFIX);
    if !plain.exists() {
        return plain;
    }
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    let stamped = persist::with_suffix(&plain, &stamp);
    std::iter::once(stamped.clone())
        .chain((1u32..).map(|n| persist::with_suffix(&stamped, &n.to_string())))
        .find(|candidate| !candidate.exists())
        .unwrap_or(stamped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use devcert_common::test::scratch_dir;
    use devcert_crypto::{KeyAlgorithm, SoftwareCrypto};

    struct Fixture {
        dir: PathBuf,
        key: PathBuf,
        cert: PathBuf,
    }

    /// Key plus a chain signed for it with the given lifetime.
    fn fixture(prefix: &str, lifetime: Duration) -> Fixture {
        let dir = scratch_dir(prefix);
        let crypto = SoftwareCrypto;
        let ca = crypto.create_root_ca(KeyAlgorithm::EcdsaP256).unwrap();
        let key = crypto.generate_key(KeyAlgorithm::EcdsaP256).unwrap();
        let csr = crypto.build_csr(&key, "device-001").unwrap();
        let leaf = crypto.sign_csr(&csr, &ca, lifetime).unwrap();

        let key_path = dir.join("device.key");
        let cert_path = dir.join("device.crt");
        std::fs::write(&key_path, key.as_bytes()).unwrap();
        std::fs::write(&cert_path, format!("{leaf}{}", ca.cert_pem)).unwrap();
        Fixture {
            dir,
            key: key_path,
            cert: cert_path,
        }
    }

    fn validator() -> CertificateValidator {
        CertificateValidator::new(Arc::new(SoftwareCrypto))
    }

    const DAY: Duration = Duration::from_secs(86_400);

    #[test]
    fn fresh_certificate_is_usable() {
        let f = fixture("validator-usable", DAY);
        let v = validator();
        assert!(v.is_structurally_valid(&f.cert));
        assert!(v.key_matches(&f.key, &f.cert));
        assert_eq!(v.usability(&f.key, &f.cert, Duration::from_secs(3600)), Usability::Usable);
    }

    #[test]
    fn expiry_window_is_strict() {
        let f = fixture("validator-expiry", DAY);
        let v = validator();
        assert!(v.expires_within(&f.cert, 2 * DAY));
        assert!(!v.expires_within(&f.cert, Duration::from_secs(3600)));
        assert_eq!(v.usability(&f.key, &f.cert, 2 * DAY), Usability::ExpiringSoon);
    }

    #[test]
    fn missing_and_garbage_files() {
        let f = fixture("validator-garbage", DAY);
        let v = validator();
        let absent = f.dir.join("absent.crt");
        assert_eq!(v.usability(&f.key, &absent, DAY), Usability::Missing);
        assert!(v.expires_within(&absent, DAY));

        std::fs::write(&f.cert, "garbage").unwrap();
        assert!(!v.is_structurally_valid(&f.cert));
        assert_eq!(v.usability(&f.key, &f.cert, DAY), Usability::Malformed);
    }

    #[test]
    fn leaf_without_issuer_is_still_structurally_valid() {
        let f = fixture("validator-leaf-only", DAY);
        let text = std::fs::read_to_string(&f.cert).unwrap();
        let leaf_end = text.find("-----END CERTIFICATE-----").unwrap() + 25;
        std::fs::write(&f.cert, &text[..leaf_end]).unwrap();
        assert!(validator().is_structurally_valid(&f.cert));
    }

    #[test]
    fn mismatch_quarantines_certificate() {
        let f = fixture("validator-mismatch", DAY);
        let other = SoftwareCrypto.generate_key(KeyAlgorithm::EcdsaP256).unwrap();
        std::fs::write(&f.key, other.as_bytes()).unwrap();

        let v = validator();
        assert_eq!(v.usability(&f.key, &f.cert, DAY / 2), Usability::KeyMismatch);
        assert!(f.cert.exists(), "usability check must not move files");

        assert!(!v.key_matches_certificate(&f.key, &f.cert));
        assert!(!f.cert.exists());
        assert!(f.dir.join("device.crt.invalid").exists());
    }

    #[test]
    fn mismatch_is_reported_with_quarantine_path() {
        let f = fixture("validator-mismatch-error", DAY);
        let other = SoftwareCrypto.generate_key(KeyAlgorithm::EcdsaP256).unwrap();
        std::fs::write(&f.key, other.as_bytes()).unwrap();

        match validator().ensure_key_matches(&f.key, &f.cert) {
            Err(DevcertError::KeyCertificateMismatch { quarantined }) => {
                assert_eq!(quarantined, f.dir.join("device.crt.invalid"));
                assert!(quarantined.exists());
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
        assert!(validator().ensure_key_matches(&f.key, &f.cert).is_ok());
    }

    #[test]
    fn repeated_quarantine_keeps_earlier_copies() {
        let f = fixture("validator-requarantine", DAY);
        let first = std::fs::read(&f.cert).unwrap();

        let a = quarantine(&f.cert).unwrap();
        std::fs::write(&f.cert, b"second").unwrap();
        let b = quarantine(&f.cert).unwrap();
        std::fs::write(&f.cert, b"third").unwrap();
        let c = quarantine(&f.cert).unwrap();

        assert_eq!(a, f.dir.join("device.crt.invalid"));
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert!(b.starts_with(&f.dir));
        assert_eq!(std::fs::read(&a).unwrap(), first);
        assert_eq!(std::fs::read(&b).unwrap(), b"second");
        assert_eq!(std::fs::read(&c).unwrap(), b"third");
        assert!(!f.cert.exists());
    }

    #[test]
    fn matching_pair_is_not_quarantined() {
        let f = fixture("validator-match", DAY);
        assert!(validator().key_matches_certificate(&f.key, &f.cert));
        assert!(f.cert.exists());
    }
}
