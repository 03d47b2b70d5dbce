//! End-to-end lifecycle behaviour against the local CA and a fake remote CA.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use devcert_common::test::scratch_dir;
use devcert_crypto::{authority, CaMaterial, CryptoProvider, KeyAlgorithm, SoftwareCrypto};
use devcert_lifecycle::config::{ConfigLayer, DevcertConfig};
use devcert_lifecycle::protocol::IssuedMaterial;
use devcert_lifecycle::signer::{CaService, CertSigner, LocalSigner, RemoteSigner, SigningBackend};
use devcert_lifecycle::{
    BackendKind, CertLifecycle, DevcertError, IssueOutcome, RenewalOutcome, TrustAnchor, Usability,
};

const DAY: Duration = Duration::from_secs(86_400);

fn local_config(prefix: &str) -> DevcertConfig {
    DevcertConfig {
        basedir: scratch_dir(prefix),
        ca_key_algorithm: KeyAlgorithm::EcdsaP256,
        min_validity: Duration::from_secs(3600),
        ..DevcertConfig::default()
    }
}

fn crypto() -> Arc<dyn CryptoProvider> {
    Arc::new(SoftwareCrypto)
}

/// Contents and modification time of every file in `dir`.
fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>, SystemTime)> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let path = entry.unwrap().path();
            let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
            let bytes = std::fs::read(&path).unwrap();
            (path, bytes, modified)
        })
        .collect();
    files.sort_by(|a, b| a.0.cmp(&b.0));
    files
}

fn pending_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "tmp"))
        .collect()
}

#[test]
fn bootstrap_then_new_then_show() {
    let lc = CertLifecycle::from_config(local_config("it-e2e")).unwrap();
    assert!(!lc.paths().ca_cert.exists());

    let outcome = lc.new_certificate(Some("device-001"), false).unwrap();
    assert!(matches!(outcome, IssueOutcome::Issued(_)));
    assert_eq!(outcome.path(), lc.paths().cert);

    let chain = lc.show(None).unwrap();
    let ca = lc.show(Some(&lc.paths().ca_cert)).unwrap();
    assert_eq!(chain[0].common_name.as_deref(), Some("device-001"));
    assert_eq!(chain[0].issuer, ca[0].subject);
}

#[test]
fn signed_file_holds_leaf_then_issuer() {
    let lc = CertLifecycle::from_config(local_config("it-chain")).unwrap();
    lc.new_certificate(Some("device-001"), false).unwrap();

    let chain = lc.show(None).unwrap();
    assert_eq!(chain.len(), 2);
    assert!(!chain[0].is_ca);
    assert!(chain[1].is_ca);
    assert_eq!(chain[0].issuer, chain[1].subject);
    assert!(chain[1].is_self_issued());
}

#[test]
fn second_new_writes_nothing() {
    let lc = CertLifecycle::from_config(local_config("it-idempotent")).unwrap();
    lc.new_certificate(Some("device-001"), false).unwrap();
    let before = snapshot(&lc.paths().basedir);

    let outcome = lc.new_certificate(Some("device-001"), false).unwrap();
    assert!(matches!(outcome, IssueOutcome::AlreadyUsable(_)));
    assert_eq!(snapshot(&lc.paths().basedir), before);
}

#[test]
fn force_recreates_key_csr_and_certificate() {
    let lc = CertLifecycle::from_config(local_config("it-force")).unwrap();
    lc.new_certificate(Some("device-001"), false).unwrap();
    let paths = lc.paths().clone();
    let old_key = std::fs::read(&paths.key).unwrap();
    let old_csr = std::fs::read(&paths.csr).unwrap();
    let old_cert = std::fs::read(&paths.cert).unwrap();

    lc.new_certificate(Some("device-001"), true).unwrap();

    assert_ne!(std::fs::read(&paths.key).unwrap(), old_key);
    assert_ne!(std::fs::read(&paths.csr).unwrap(), old_csr);
    assert_ne!(std::fs::read(&paths.cert).unwrap(), old_cert);
    assert!(lc.validator().key_matches(&paths.key, &paths.cert));
}

#[test]
fn force_from_configuration() {
    let config = DevcertConfig {
        force: true,
        ..local_config("it-force-config")
    };
    let lc = CertLifecycle::from_config(config).unwrap();
    lc.new_certificate(Some("device-001"), false).unwrap();
    let first = std::fs::read(&lc.paths().cert).unwrap();

    let outcome = lc.new_certificate(Some("device-001"), false).unwrap();
    assert!(matches!(outcome, IssueOutcome::Issued(_)));
    assert_ne!(std::fs::read(&lc.paths().cert).unwrap(), first);
}

#[test]
fn mismatched_pair_is_quarantined_and_regenerated() {
    let lc = CertLifecycle::from_config(local_config("it-mismatch")).unwrap();
    lc.new_certificate(Some("device-001"), false).unwrap();
    let paths = lc.paths().clone();
    let foreign_key = SoftwareCrypto.generate_key(KeyAlgorithm::EcdsaP256).unwrap();
    std::fs::write(&paths.key, foreign_key.as_bytes()).unwrap();
    let bad_cert = std::fs::read(&paths.cert).unwrap();

    assert_eq!(
        lc.validator().usability(&paths.key, &paths.cert, DAY / 2),
        Usability::KeyMismatch
    );

    lc.new_certificate(Some("device-001"), false).unwrap();

    let quarantined = paths.basedir.join("device.crt.invalid");
    assert_eq!(std::fs::read(&quarantined).unwrap(), bad_cert);
    assert_ne!(std::fs::read(&paths.key).unwrap(), foreign_key.as_bytes());
    assert!(lc.validator().key_matches(&paths.key, &paths.cert));
}

#[test]
fn validator_quarantines_on_mismatch() {
    let lc = CertLifecycle::from_config(local_config("it-quarantine")).unwrap();
    lc.new_certificate(Some("device-001"), false).unwrap();
    let paths = lc.paths().clone();
    assert!(lc.validator().key_matches_certificate(&paths.key, &paths.cert));

    let other = SoftwareCrypto.generate_key(KeyAlgorithm::EcdsaP256).unwrap();
    std::fs::write(&paths.key, other.as_bytes()).unwrap();
    assert!(!lc.validator().key_matches_certificate(&paths.key, &paths.cert));
    assert!(!paths.cert.exists());
    assert!(paths.quarantined_cert().exists());
}

/// Write a chain for the stored device key that is valid for `lifetime`.
fn install_short_lived(lc: &CertLifecycle, lifetime: Duration) {
    let anchor = lc.trust_anchor().unwrap();
    let ca = CaMaterial {
        cert_pem: anchor.public_certificate().to_string(),
        key_pem: zeroize::Zeroizing::new(anchor.private_key().unwrap().to_string()),
    };
    lc.store().generate_key().unwrap();
    lc.store().generate_csr("device-short").unwrap();
    let csr = lc.store().read_csr().unwrap();
    let leaf = authority::sign_csr(&csr, &ca, lifetime).unwrap();
    std::fs::write(&lc.paths().cert, format!("{leaf}{}", ca.cert_pem)).unwrap();
}

#[test]
fn renewal_triggers_only_below_minimum_validity() {
    let config = DevcertConfig {
        min_validity: 2 * DAY,
        ..local_config("it-renew-window")
    };
    let lc = CertLifecycle::from_config(config.clone()).unwrap();
    lc.new_certificate(Some("device-001"), false).unwrap();
    // One day left, two required.
    assert!(matches!(lc.renew_if_needed().unwrap(), RenewalOutcome::Renewed(_)));

    let relaxed = DevcertConfig {
        min_validity: Duration::from_secs(3600),
        ..config
    };
    let lc = CertLifecycle::from_config(relaxed).unwrap();
    assert!(matches!(
        lc.renew_if_needed().unwrap(),
        RenewalOutcome::NotDue { remaining_secs: Some(_) }
    ));
}

#[test]
fn renewal_threshold_is_floored_at_sixty_seconds() {
    let dir = scratch_dir("it-renew-floor");
    let layer = ConfigLayer {
        basedir: Some(dir),
        min_validity_seconds: Some(0),
        ca_key_algorithm: Some("ecdsa-p256".into()),
        ..ConfigLayer::default()
    };
    let config = DevcertConfig::resolve(&[layer]).unwrap();
    assert_eq!(config.min_validity, Duration::from_secs(60));

    let lc = CertLifecycle::from_config(config).unwrap();
    install_short_lived(&lc, Duration::from_secs(30));

    let outcome = lc.renew_if_needed().unwrap();
    assert!(matches!(outcome, RenewalOutcome::Renewed(_)));

    let chain = lc.show(None).unwrap();
    assert_eq!(chain[0].common_name.as_deref(), Some("device-short"));
    assert!(matches!(
        lc.renew_if_needed().unwrap(),
        RenewalOutcome::NotDue { .. }
    ));
}

#[test]
fn renewal_prefers_configured_device_id() {
    let config = DevcertConfig {
        device_id: Some("device-001".into()),
        ..local_config("it-renew-device-id")
    };
    let lc = CertLifecycle::from_config(config).unwrap();
    install_short_lived(&lc, Duration::from_secs(30));
    assert_eq!(
        lc.show(None).unwrap()[0].common_name.as_deref(),
        Some("device-short")
    );

    assert!(matches!(lc.renew_if_needed().unwrap(), RenewalOutcome::Renewed(_)));
    assert_eq!(
        lc.show(None).unwrap()[0].common_name.as_deref(),
        Some("device-001")
    );
}

#[test]
fn lost_ca_key_fails_without_replacing_root() {
    let lc = CertLifecycle::from_config(local_config("it-lost-ca-key")).unwrap();
    lc.trust_anchor().unwrap();
    let paths = lc.paths().clone();
    let root = std::fs::read(&paths.ca_cert).unwrap();
    std::fs::remove_file(&paths.ca_key).unwrap();

    let err = lc.new_certificate(Some("device-001"), false).unwrap_err();
    assert!(matches!(err, DevcertError::MissingTrustAnchor(_)));
    assert_eq!(std::fs::read(&paths.ca_cert).unwrap(), root);
    assert!(!paths.ca_key.exists());
    assert!(!paths.cert.exists());
}

/// Signs a CSR for some other key, so the result never matches the device.
struct MismatchingSigner(LocalSigner);

impl CertSigner for MismatchingSigner {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn sign(&self, _csr_pem: &str, anchor: &TrustAnchor) -> Result<String, DevcertError> {
        let key = SoftwareCrypto.generate_key(KeyAlgorithm::EcdsaP256)?;
        let csr = SoftwareCrypto.build_csr(&key, "intruder")?;
        self.0.sign(&csr, anchor)
    }
}

struct FailingSigner;

impl CertSigner for FailingSigner {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn sign(&self, _csr_pem: &str, _anchor: &TrustAnchor) -> Result<String, DevcertError> {
        Err(DevcertError::LocalSigning("CA offline".into()))
    }
}

#[test]
fn failed_validation_leaves_committed_certificate_untouched() {
    let config = DevcertConfig {
        min_validity: 2 * DAY,
        ..local_config("it-atomic")
    };
    CertLifecycle::from_config(config.clone())
        .unwrap()
        .new_certificate(Some("device-001"), false)
        .unwrap();
    let cert_path = config.basedir.join("device.crt");
    let before = std::fs::read(&cert_path).unwrap();

    let signer = MismatchingSigner(LocalSigner::new(crypto(), DAY));
    let lc = CertLifecycle::with_backend(config, crypto(), Box::new(signer), None);

    let err = lc.new_certificate(Some("device-001"), false).unwrap_err();
    assert!(matches!(err, DevcertError::RenewalValidationFailed(_)));
    assert_eq!(std::fs::read(&cert_path).unwrap(), before);
    assert!(pending_files(&lc.paths().basedir).is_empty());
}

#[test]
fn failed_signing_leaves_committed_certificate_untouched() {
    let config = DevcertConfig {
        min_validity: 2 * DAY,
        ..local_config("it-sign-fail")
    };
    CertLifecycle::from_config(config.clone())
        .unwrap()
        .new_certificate(Some("device-001"), false)
        .unwrap();
    let cert_path = config.basedir.join("device.crt");
    let before = std::fs::read(&cert_path).unwrap();

    let lc = CertLifecycle::with_backend(config, crypto(), Box::new(FailingSigner), None);
    assert!(matches!(
        lc.new_certificate(Some("device-001"), false),
        Err(DevcertError::LocalSigning(_))
    ));
    assert!(matches!(
        lc.renew_if_needed(),
        Err(DevcertError::LocalSigning(_))
    ));
    assert_eq!(std::fs::read(&cert_path).unwrap(), before);
    assert!(pending_files(&lc.paths().basedir).is_empty());
}

/// Local signer that ignores the one-day floor.
struct ShortLivedSigner(Duration);

impl CertSigner for ShortLivedSigner {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn sign(&self, csr_pem: &str, anchor: &TrustAnchor) -> Result<String, DevcertError> {
        let ca = CaMaterial {
            cert_pem: anchor.public_certificate().to_string(),
            key_pem: zeroize::Zeroizing::new(anchor.private_key()?.to_string()),
        };
        let leaf = authority::sign_csr(csr_pem, &ca, self.0)?;
        Ok(format!("{leaf}{}", ca.cert_pem))
    }
}

#[test]
fn local_path_rejects_nearly_expired_certificate() {
    let config = local_config("it-local-gate");
    let lc = CertLifecycle::with_backend(
        config,
        crypto(),
        Box::new(ShortLivedSigner(Duration::from_secs(20))),
        None,
    );
    assert!(matches!(
        lc.new_certificate(Some("device-001"), false),
        Err(DevcertError::RenewalValidationFailed(_))
    ));
    assert!(!lc.paths().cert.exists());
}

#[test]
fn sign_reissues_for_device_csr() {
    let lc = CertLifecycle::from_config(local_config("it-sign")).unwrap();
    lc.new_certificate(Some("device-001"), false).unwrap();
    let before = std::fs::read(&lc.paths().cert).unwrap();

    let path = lc.sign_csr(None).unwrap();
    assert_eq!(path, lc.paths().cert);
    assert_ne!(std::fs::read(&path).unwrap(), before);
    assert!(lc.validator().key_matches(&lc.paths().key, &path));
}

#[test]
fn foreign_csr_is_signed_beside_itself() {
    let lc = CertLifecycle::from_config(local_config("it-foreign")).unwrap();
    lc.new_certificate(Some("device-001"), false).unwrap();
    let device_cert = std::fs::read(&lc.paths().cert).unwrap();

    let other_key = SoftwareCrypto.generate_key(KeyAlgorithm::EcdsaP256).unwrap();
    let other_csr = SoftwareCrypto.build_csr(&other_key, "child-7").unwrap();
    let csr_path = lc.paths().basedir.join("child.csr");
    std::fs::write(&csr_path, other_csr).unwrap();

    let out = lc.sign_csr(Some(&csr_path)).unwrap();
    assert_eq!(out, lc.paths().basedir.join("child.csr.crt"));
    assert_eq!(std::fs::read(&lc.paths().cert).unwrap(), device_cert);

    let chain = lc.show(Some(&out)).unwrap();
    assert_eq!(chain[0].common_name.as_deref(), Some("child-7"));
}

#[test]
fn sign_rejects_tampered_csr() {
    let lc = CertLifecycle::from_config(local_config("it-sign-bad")).unwrap();
    let csr_path = lc.paths().basedir.join("bad.csr");
    std::fs::write(&csr_path, "-----BEGIN CERTIFICATE REQUEST-----\nAAAA\n-----END CERTIFICATE REQUEST-----\n").unwrap();
    assert!(matches!(
        lc.sign_csr(Some(&csr_path)),
        Err(DevcertError::LocalSigning(_))
    ));
}

#[test]
fn delete_is_idempotent_and_keeps_ca() {
    let lc = CertLifecycle::from_config(local_config("it-delete")).unwrap();
    lc.new_certificate(Some("device-001"), false).unwrap();

    assert_eq!(lc.delete().len(), 3);
    assert!(lc.delete().is_empty());
    assert!(!lc.paths().key.exists());
    assert!(!lc.paths().cert.exists());
    assert!(lc.paths().ca_cert.exists());
    assert!(lc.paths().ca_key.exists());
}

/// In-process stand-in for the remote CA, backed by a local root.
struct FakeCa {
    ca: CaMaterial,
    validity: Duration,
    reject_sign: bool,
}

impl FakeCa {
    fn new() -> Self {
        Self {
            ca: authority::create_root_ca(KeyAlgorithm::EcdsaP256).unwrap(),
            validity: DAY,
            reject_sign: false,
        }
    }
}

impl CaService for FakeCa {
    fn info(&self) -> Result<String, DevcertError> {
        Ok(self.ca.cert_pem.clone())
    }

    fn sign(&self, csr_pem: &str) -> Result<String, DevcertError> {
        if self.reject_sign {
            return Err(DevcertError::RemoteSigning("HTTP 500: signer unavailable".into()));
        }
        authority::sign_csr(csr_pem, &self.ca, self.validity)
            .map_err(|e| DevcertError::RemoteSigning(e.to_string()))
    }

    fn new_certificate(&self, common_name: &str) -> Result<IssuedMaterial, DevcertError> {
        let key = SoftwareCrypto.generate_key(KeyAlgorithm::EcdsaP256)?;
        let csr = SoftwareCrypto.build_csr(&key, common_name)?;
        let certificate = self.sign(&csr)?;
        Ok(IssuedMaterial {
            private_key: key.to_string(),
            certificate_request: csr,
            certificate,
        })
    }
}

fn remote(prefix: &str, fake: FakeCa, server_keygen: bool) -> CertLifecycle {
    let config = DevcertConfig {
        backend: BackendKind::Remote,
        ca_host: Some("ca.invalid:8888".into()),
        server_keygen,
        ..local_config(prefix)
    };
    let service: Arc<dyn CaService> = Arc::new(fake);
    let signer = SigningBackend::Remote(RemoteSigner::new(service.clone(), crypto(), server_keygen));
    CertLifecycle::with_backend(config, crypto(), Box::new(signer), Some(service))
}

#[test]
fn remote_new_uses_server_side_key_generation() {
    let lc = remote("it-remote-newcert", FakeCa::new(), true);
    lc.new_certificate(Some("device-remote"), false).unwrap();

    let paths = lc.paths();
    assert!(paths.ca_cert.exists());
    assert!(!paths.ca_key.exists());
    assert!(lc.store().has_valid_csr("device-remote"));
    assert!(lc.validator().key_matches(&paths.key, &paths.cert));

    let chain = lc.show(None).unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[0].common_name.as_deref(), Some("device-remote"));
}

#[test]
fn remote_new_with_local_key_generation() {
    let lc = remote("it-remote-sign", FakeCa::new(), false);
    lc.new_certificate(Some("device-remote"), false).unwrap();
    let key = std::fs::read(&lc.paths().key).unwrap();

    assert!(lc.validator().key_matches(&lc.paths().key, &lc.paths().cert));
    assert!(matches!(
        lc.new_certificate(Some("device-remote"), false).unwrap(),
        IssueOutcome::AlreadyUsable(_)
    ));
    assert_eq!(std::fs::read(&lc.paths().key).unwrap(), key);
}

#[test]
fn remote_path_skips_expiry_gate() {
    let fake = FakeCa {
        validity: Duration::from_secs(20),
        ..FakeCa::new()
    };
    let lc = remote("it-remote-gate", fake, false);
    assert!(lc.new_certificate(Some("device-remote"), false).is_ok());
}

#[test]
fn remote_failure_is_remote_signing_error() {
    let fake = FakeCa {
        reject_sign: true,
        ..FakeCa::new()
    };
    let lc = remote("it-remote-fail", fake, false);
    let err = lc.new_certificate(Some("device-remote"), false).unwrap_err();
    assert!(matches!(err, DevcertError::RemoteSigning(_)));
    assert!(!lc.paths().cert.exists());
    assert!(pending_files(&lc.paths().basedir).is_empty());
}

#[test]
fn remote_anchor_has_no_private_key() {
    let lc = remote("it-remote-anchor", FakeCa::new(), true);
    let anchor = lc.trust_anchor().unwrap();
    assert!(matches!(
        anchor.private_key(),
        Err(DevcertError::UnsupportedOperation(_))
    ));
}
