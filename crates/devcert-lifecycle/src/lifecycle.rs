//! Lifecycle Orchestrator: the certificate state machine.
//!
//! Each command observes the device files, derives a [`LifecycleState`],
//! and runs the [`Action`] that state calls for until nothing is left to
//! do. A signed certificate is staged next to its target and only renamed
//! into place after validation, so a failed run never alters the
//! committed certificate.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use devcert_common::persist;
use devcert_crypto::{CertificateInfo, CryptoProvider, Fingerprint, SoftwareCrypto};
use serde::Serialize;

use crate::config::{
    resolve_common_name, system_hostname, BackendKind, DevcertConfig, MIN_VALIDITY_FLOOR_SECS,
};
use crate::error::DevcertError;
use crate::signer::{CaService, CertSigner, IssuedIdentity, SigningBackend};
use crate::store::{KeyStore, PendingArtifact, StorePaths, DEVICE_KEY_ALGORITHM};
use crate::trust::{TrustAnchor, TrustProvider};
use crate::validator::{CertificateValidator, Usability};

/// Suffix of the chain written beside a CSR that is not the device's own.
const FOREIGN_CERT_SUFFIX: &str = "crt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No usable device key.
    Absent,
    /// Key present, no CSR for it.
    KeyReady,
    /// Key and CSR present, certificate missing or not usable.
    CsrReady,
    /// A chain is staged, not yet committed.
    Signed { validated: bool },
    /// The canonical certificate is usable.
    Committed,
    /// The staged chain failed validation and was discarded.
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    GenerateKey,
    GenerateCsr,
    RequestSigning,
    Validate,
    Commit,
    Nothing,
}

impl LifecycleState {
    pub fn next_action(self) -> Action {
        match self {
            Self::Absent => Action::GenerateKey,
            Self::KeyReady => Action::GenerateCsr,
            Self::CsrReady => Action::RequestSigning,
            Self::Signed { validated: false } => Action::Validate,
            Self::Signed { validated: true } => Action::Commit,
            Self::Committed | Self::Invalid => Action::Nothing,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Absent => "absent",
            Self::KeyReady => "key-ready",
            Self::CsrReady => "csr-ready",
            Self::Signed { validated: false } => "signed",
            Self::Signed { validated: true } => "signed (validated)",
            Self::Committed => "committed",
            Self::Invalid => "invalid",
        };
        f.write_str(text)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::GenerateKey => "generate key",
            Self::GenerateCsr => "generate CSR",
            Self::RequestSigning => "request signing",
            Self::Validate => "validate",
            Self::Commit => "commit",
            Self::Nothing => "nothing",
        };
        f.write_str(text)
    }
}

/// Result of `new`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    /// The existing certificate was usable; nothing was written.
    AlreadyUsable(PathBuf),
    Issued(PathBuf),
}

impl IssueOutcome {
    pub fn path(&self) -> &Path {
        match self {
            Self::AlreadyUsable(p) | Self::Issued(p) => p,
        }
    }
}

/// Result of a renewal check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalOutcome {
    NotDue { remaining_secs: Option<i64> },
    Renewed(PathBuf),
}

/// Read-only snapshot for the `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub backend: BackendKind,
    pub basedir: PathBuf,
    pub state: LifecycleState,
    pub next_action: Action,
    pub usability: Usability,
    pub remaining_validity_secs: Option<i64>,
    pub min_validity_secs: u64,
}

/// Which public key a signed chain has to carry.
enum KeyBinding {
    /// The device key in the store.
    DeviceKey,
    /// The key of a CSR that is not the device's own.
    Csr(Fingerprint),
}

/// Inputs of one run through the state machine.
struct SigningJob {
    common_name: Option<String>,
    csr_path: PathBuf,
    target: PathBuf,
    binding: KeyBinding,
}

pub struct CertLifecycle {
    config: DevcertConfig,
    crypto: Arc<dyn CryptoProvider>,
    store: KeyStore,
    validator: CertificateValidator,
    signer: Box<dyn CertSigner>,
    ca_service: Option<Arc<dyn CaService>>,
}

impl CertLifecycle {
    /// Wire the software crypto provider and the configured backend.
    pub fn from_config(config: DevcertConfig) -> Result<Self, DevcertError> {
        let crypto: Arc<dyn CryptoProvider> = Arc::new(SoftwareCrypto);
        let (backend, ca_service) = SigningBackend::from_config(&config, crypto.clone())?;
        Ok(Self::with_backend(config, crypto, Box::new(backend), ca_service))
    }

    /// Assemble from explicit parts.
    pub fn with_backend(
        config: DevcertConfig,
        crypto: Arc<dyn CryptoProvider>,
        signer: Box<dyn CertSigner>,
        ca_service: Option<Arc<dyn CaService>>,
    ) -> Self {
        let store = KeyStore::new(StorePaths::new(&config.basedir), crypto.clone());
        let validator = CertificateValidator::new(crypto.clone());
        Self {
            config,
            crypto,
            store,
            validator,
            signer,
            ca_service,
        }
    }

    pub fn config(&self) -> &DevcertConfig {
        &self.config
    }

    pub fn paths(&self) -> &StorePaths {
        self.store.paths()
    }

    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    pub fn validator(&self) -> &CertificateValidator {
        &self.validator
    }

    pub fn backend(&self) -> BackendKind {
        self.signer.kind()
    }

    /// Load the CA material, bootstrapping it if missing.
    pub fn trust_anchor(&self) -> Result<TrustAnchor, DevcertError> {
        TrustProvider::new(
            &self.config,
            self.store.paths(),
            self.crypto.clone(),
            self.ca_service.clone(),
        )
        .load_or_bootstrap()
    }

    /// Derive the current state from the files on disk.
    pub fn observe_state(&self) -> LifecycleState {
        let paths = self.store.paths();
        let Some(key_fp) = self.store.key_fingerprint() else {
            return LifecycleState::Absent;
        };
        let csr_for_key = self
            .store
            .csr_info()
            .is_some_and(|csr| csr.public_key_fingerprint == key_fp);
        if !csr_for_key {
            return LifecycleState::KeyReady;
        }
        let usability = self
            .validator
            .usability(&paths.key, &paths.cert, self.config.min_validity);
        if usability.is_usable() {
            LifecycleState::Committed
        } else {
            LifecycleState::CsrReady
        }
    }

    pub fn status(&self) -> StatusReport {
        let paths = self.store.paths();
        let state = self.observe_state();
        StatusReport {
            backend: self.backend(),
            basedir: paths.basedir.clone(),
            state,
            next_action: state.next_action(),
            usability: self
                .validator
                .usability(&paths.key, &paths.cert, self.config.min_validity),
            remaining_validity_secs: self.validator.remaining_validity(&paths.cert),
            min_validity_secs: self.config.min_validity.as_secs(),
        }
    }

    /// Make sure a usable device certificate exists.
    ///
    /// Without `force` a usable certificate is left alone and nothing is
    /// written. With `force` (or forced by configuration) all managed
    /// files are deleted first. A certificate that does not match the key
    /// is quarantined and key and CSR are regenerated.
    pub fn new_certificate(
        &self,
        common_name: Option<&str>,
        force: bool,
    ) -> Result<IssueOutcome, DevcertError> {
        let common_name = resolve_common_name(common_name, &self.config, system_hostname)?;
        let paths = self.store.paths();

        if force || self.config.force {
            let removed = self.delete();
            tracing::info!(removed = removed.len(), "Forced recreation");
        } else {
            match self
                .validator
                .usability(&paths.key, &paths.cert, self.config.min_validity)
            {
                Usability::Usable => {
                    tracing::info!(path = %paths.cert.display(), "Certificate already usable");
                    return Ok(IssueOutcome::AlreadyUsable(paths.cert.clone()));
                }
                Usability::KeyMismatch => {
                    match self.validator.ensure_key_matches(&paths.key, &paths.cert) {
                        Ok(()) => {}
                        Err(DevcertError::KeyCertificateMismatch { quarantined }) => {
                            persist::remove_if_exists(&paths.key)?;
                            persist::remove_if_exists(&paths.csr)?;
                            tracing::warn!(
                                quarantined = %quarantined.display(),
                                "Key and certificate disagreed, regenerating both"
                            );
                        }
                        Err(e) => return Err(e),
                    }
                }
                other => tracing::info!(usability = %other, "Certificate needs issuing"),
            }
        }

        let anchor = self.trust_anchor()?;

        if let Some(identity) = self.signer.issue_new(&common_name, &anchor)? {
            let cert = self.install_issued(identity)?;
            return Ok(IssueOutcome::Issued(cert));
        }

        let job = SigningJob {
            common_name: Some(common_name),
            csr_path: paths.csr.clone(),
            target: paths.cert.clone(),
            binding: KeyBinding::DeviceKey,
        };
        let cert = self.drive(self.observe_state(), &job, &anchor)?;
        Ok(IssueOutcome::Issued(cert))
    }

    /// Sign an existing CSR, by default the device's own.
    ///
    /// A CSR for a different key gets its chain written beside it as
    /// `<csr>.crt`; the device certificate is untouched.
    pub fn sign_csr(&self, csr_path: Option<&Path>) -> Result<PathBuf, DevcertError> {
        let paths = self.store.paths();
        let csr_path = csr_path.map_or_else(|| paths.csr.clone(), Path::to_path_buf);

        let csr_pem = match std::fs::read_to_string(&csr_path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DevcertError::Configuration(format!(
                    "no CSR at {}, run `new` first",
                    csr_path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };
        let info = self
            .crypto
            .inspect_csr(&csr_pem)
            .map_err(|e| self.signing_error(format!("CSR rejected: {e}")))?;

        let is_device_csr = self
            .store
            .key_fingerprint()
            .is_some_and(|fp| fp == info.public_key_fingerprint);

        let job = if is_device_csr {
            SigningJob {
                common_name: info.common_name,
                csr_path,
                target: paths.cert.clone(),
                binding: KeyBinding::DeviceKey,
            }
        } else {
            let target = persist::with_suffix(&csr_path, FOREIGN_CERT_SUFFIX);
            tracing::info!(
                csr = %csr_path.display(),
                target = %target.display(),
                "CSR is not for the device key, writing chain beside it"
            );
            SigningJob {
                common_name: info.common_name,
                csr_path,
                target,
                binding: KeyBinding::Csr(info.public_key_fingerprint),
            }
        };

        let anchor = self.trust_anchor()?;
        self.drive(LifecycleState::CsrReady, &job, &anchor)
    }

    /// Decode a certificate file, by default the device certificate.
    pub fn show(&self, cert_path: Option<&Path>) -> Result<Vec<CertificateInfo>, DevcertError> {
        let path = cert_path.map_or_else(|| self.store.paths().cert.clone(), Path::to_path_buf);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DevcertError::CertificateNotFound(path))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(self.crypto.parse_chain(&text)?)
    }

    /// Remove the device key, CSR, certificate and pending files.
    pub fn delete(&self) -> Vec<PathBuf> {
        self.store.delete_all()
    }

    /// Renew when less than the minimum validity remains.
    ///
    /// Renewal issues a new key, CSR and certificate. The common name is
    /// the configured device id, else that of the current certificate,
    /// else the host name. All three are staged and validated before any
    /// replaces the current identity.
    pub fn renew_if_needed(&self) -> Result<RenewalOutcome, DevcertError> {
        let paths = self.store.paths();
        if !self
            .validator
            .expires_within(&paths.cert, self.config.min_validity)
        {
            let remaining_secs = self.validator.remaining_validity(&paths.cert);
            tracing::debug!(?remaining_secs, "Renewal not due");
            return Ok(RenewalOutcome::NotDue { remaining_secs });
        }

        let current_name = self
            .validator
            .read_chain(&paths.cert)
            .and_then(|chain| chain.into_iter().next())
            .and_then(|leaf| leaf.common_name);
        let common_name = resolve_common_name(None, &self.config, || {
            current_name.or_else(system_hostname)
        })?;

        tracing::info!(%common_name, "Certificate due for renewal");
        let cert = self.rotate(&common_name)?;
        Ok(RenewalOutcome::Renewed(cert))
    }

    fn rotate(&self, common_name: &str) -> Result<PathBuf, DevcertError> {
        let anchor = self.trust_anchor()?;
        let identity = match self.signer.issue_new(common_name, &anchor)? {
            Some(identity) => identity,
            None => {
                let key_pem = self.crypto.generate_key(DEVICE_KEY_ALGORITHM)?;
                let csr_pem = self.crypto.build_csr(&key_pem, common_name)?;
                let chain_pem = self.signer.sign(&csr_pem, &anchor)?;
                IssuedIdentity {
                    key_pem,
                    csr_pem,
                    chain_pem,
                }
            }
        };
        self.install_issued(identity)
    }

    /// Validate a key, CSR and chain issued together, then commit them.
    fn install_issued(&self, identity: IssuedIdentity) -> Result<PathBuf, DevcertError> {
        let key_fp = self.crypto.public_key_fingerprint(&identity.key_pem)?;
        self.check_chain(&identity.chain_pem, &key_fp)
            .map_err(DevcertError::RenewalValidationFailed)?;
        self.store
            .install_identity(&identity.key_pem, &identity.csr_pem, &identity.chain_pem)
    }

    /// Run actions from `state` until the machine stops.
    fn drive(
        &self,
        mut state: LifecycleState,
        job: &SigningJob,
        anchor: &TrustAnchor,
    ) -> Result<PathBuf, DevcertError> {
        let mut pending: Option<PendingArtifact> = None;
        let mut failure: Option<String> = None;

        loop {
            let action = state.next_action();
            tracing::debug!(%state, %action, "Lifecycle step");

            state = match action {
                Action::GenerateKey => {
                    self.store.generate_key()?;
                    LifecycleState::KeyReady
                }
                Action::GenerateCsr => {
                    let common_name = job.common_name.as_deref().ok_or_else(|| {
                        DevcertError::Configuration("no common name for the CSR".into())
                    })?;
                    self.store.generate_csr(common_name)?;
                    LifecycleState::CsrReady
                }
                Action::RequestSigning => {
                    let csr_pem = std::fs::read_to_string(&job.csr_path)?;
                    let chain = self.signer.sign(&csr_pem, anchor)?;
                    pending = Some(PendingArtifact::stage(&job.target, chain.as_bytes(), false)?);
                    LifecycleState::Signed { validated: false }
                }
                Action::Validate => match self.validate_pending(pending.as_ref(), job) {
                    Ok(()) => LifecycleState::Signed { validated: true },
                    Err(reason) => {
                        tracing::warn!(%reason, "Signed certificate rejected");
                        failure = Some(reason);
                        pending = None;
                        LifecycleState::Invalid
                    }
                },
                Action::Commit => {
                    let staged = pending.take().ok_or_else(|| {
                        DevcertError::RenewalValidationFailed("nothing staged to commit".into())
                    })?;
                    if job.target == self.store.paths().cert {
                        self.store.write_certificate(staged)?;
                    } else {
                        let path = staged.commit()?;
                        tracing::info!(path = %path.display(), "Certificate committed");
                    }
                    LifecycleState::Committed
                }
                Action::Nothing => break,
            };
        }

        match state {
            LifecycleState::Committed => Ok(job.target.clone()),
            other => Err(DevcertError::RenewalValidationFailed(
                failure.unwrap_or_else(|| format!("stopped in state {other}")),
            )),
        }
    }

    fn validate_pending(
        &self,
        pending: Option<&PendingArtifact>,
        job: &SigningJob,
    ) -> Result<(), String> {
        let pending = pending.ok_or("nothing staged")?;
        let chain_pem = std::fs::read_to_string(pending.pending_path())
            .map_err(|e| format!("staged certificate unreadable: {e}"))?;
        let expected = match &job.binding {
            KeyBinding::DeviceKey => self
                .store
                .key_fingerprint()
                .ok_or("device key is no longer readable")?,
            KeyBinding::Csr(fp) => *fp,
        };
        self.check_chain(&chain_pem, &expected)
    }

    /// Structure, key correspondence and, for the local CA, a lifetime
    /// above the validity floor.
    fn check_chain(&self, chain_pem: &str, public_key_fp: &Fingerprint) -> Result<(), String> {
        let chain = self
            .crypto
            .parse_chain(chain_pem)
            .map_err(|e| format!("signed chain does not parse: {e}"))?;
        if chain.len() < 2 {
            return Err("signed chain lacks the issuer certificate".into());
        }
        if !self.crypto.chain_is_well_formed(&chain) {
            return Err("leaf is not signed by the CA certificate".into());
        }

        let leaf = &chain[0];
        if leaf.public_key_fingerprint != *public_key_fp {
            return Err("certificate public key does not match the private key".into());
        }

        // The remote CA just issued the certificate; only the local path is gated.
        if self.signer.kind() == BackendKind::Local {
            let remaining = (leaf.not_after - Utc::now()).num_seconds();
            if remaining < MIN_VALIDITY_FLOOR_SECS {
                return Err(format!("certificate is valid for only {remaining}s"));
            }
        }
        Ok(())
    }

    fn signing_error(&self, message: String) -> DevcertError {
        match self.signer.kind() {
            BackendKind::Remote => DevcertError::RemoteSigning(message),
            BackendKind::Local => DevcertError::LocalSigning(message),
        }
    }
}
