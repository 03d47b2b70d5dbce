//! Key Material Store: the device key, CSR and certificate files.
//!
//! Every write goes through a pending sibling file that is renamed into
//! place, so the canonical files are always either the old or the new
//! content.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use devcert_common::persist;
use devcert_crypto::{CryptoProvider, CsrInfo, Fingerprint, KeyAlgorithm};
use zeroize::Zeroizing;

use crate::error::DevcertError;

/// Algorithm for device keys generated on this machine.
pub const DEVICE_KEY_ALGORITHM: KeyAlgorithm = KeyAlgorithm::EcdsaP256;

/// Suffix given to a certificate that no longer matches its key.
pub const QUARANTINE_SUFFIX: &str = "invalid";

pub const KEY_FILE: &str = "device.key";
pub const CSR_FILE: &str = "device.csr";
pub const CERT_FILE: &str = "device.crt";
pub const CA_CERT_FILE: &str = "ca.crt";
pub const CA_KEY_FILE: &str = "ca.key";

/// Canonical file locations under one base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub basedir: PathBuf,
    pub key: PathBuf,
    pub csr: PathBuf,
    pub cert: PathBuf,
    pub ca_cert: PathBuf,
    pub ca_key: PathBuf,
}

impl StorePaths {
    pub fn new(basedir: &Path) -> Self {
        Self {
            basedir: basedir.to_path_buf(),
            key: basedir.join(KEY_FILE),
            csr: basedir.join(CSR_FILE),
            cert: basedir.join(CERT_FILE),
            ca_cert: basedir.join(CA_CERT_FILE),
            ca_key: basedir.join(CA_KEY_FILE),
        }
    }

    /// Where a mismatched certificate is moved.
    pub fn quarantined_cert(&self) -> PathBuf {
        persist::with_suffix(&self.cert, QUARANTINE_SUFFIX)
    }
}

/// A file written next to its target and not yet renamed over it.
///
/// Dropping an uncommitted artifact removes the pending file.
#[derive(Debug)]
pub struct PendingArtifact {
    pending: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl PendingArtifact {
    /// Write `contents` to the pending sibling of `target`.
    pub fn stage(target: &Path, contents: &[u8], private: bool) -> io::Result<Self> {
        let pending = persist::write_pending(target, contents, private)?;
        Ok(Self {
            pending,
            target: target.to_path_buf(),
            committed: false,
        })
    }

    pub fn pending_path(&self) -> &Path {
        &self.pending
    }

    /// Rename the pending file over the target.
    pub fn commit(mut self) -> io::Result<PathBuf> {
        persist::promote(&self.pending, &self.target)?;
        self.committed = true;
        Ok(self.target.clone())
    }
}

impl Drop for PendingArtifact {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match persist::remove_if_exists(&self.pending) {
            Ok(true) => {
                tracing::debug!(path = %self.pending.display(), "Pending artifact discarded")
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(
                error = %e,
                path = %self.pending.display(),
                "Failed to remove pending artifact"
            ),
        }
    }
}

/// Owner of the device key, CSR and certificate files.
pub struct KeyStore {
    paths: StorePaths,
    crypto: Arc<dyn CryptoProvider>,
}

impl KeyStore {
    pub fn new(paths: StorePaths, crypto: Arc<dyn CryptoProvider>) -> Self {
        Self { paths, crypto }
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// The key file exists and loads as a supported private key.
    pub fn has_valid_key(&self) -> bool {
        self.key_fingerprint().is_some()
    }

    /// Public key fingerprint of the stored key, if it is usable.
    pub fn key_fingerprint(&self) -> Option<Fingerprint> {
        let pem = std::fs::read_to_string(&self.paths.key).ok()?;
        match self.crypto.public_key_fingerprint(&pem) {
            Ok(fp) => Some(fp),
            Err(e) => {
                tracing::debug!(error = %e, path = %self.paths.key.display(), "Key file unusable");
                None
            }
        }
    }

    pub fn read_key(&self) -> Result<Zeroizing<String>, DevcertError> {
        Ok(Zeroizing::new(std::fs::read_to_string(&self.paths.key)?))
    }

    /// Create a key unless a valid one is already present.
    ///
    /// Returns `true` when a new key was written.
    pub fn generate_key(&self) -> Result<bool, DevcertError> {
        if self.has_valid_key() {
            return Ok(false);
        }
        let pem = self.crypto.generate_key(DEVICE_KEY_ALGORITHM)?;
        persist::write_atomic(&self.paths.key, pem.as_bytes(), true)?;
        tracing::info!(path = %self.paths.key.display(), algorithm = %DEVICE_KEY_ALGORITHM, "Device key generated");
        Ok(true)
    }

    /// The CSR file exists and carries a valid self-signature.
    ///
    /// The embedded common name is not compared with `_common_name`.
    pub fn has_valid_csr(&self, _common_name: &str) -> bool {
        self.csr_info().is_some()
    }

    /// Decoded CSR file, if present and correctly self-signed.
    pub fn csr_info(&self) -> Option<CsrInfo> {
        let pem = std::fs::read_to_string(&self.paths.csr).ok()?;
        match self.crypto.inspect_csr(&pem) {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::debug!(error = %e, path = %self.paths.csr.display(), "CSR file unusable");
                None
            }
        }
    }

    pub fn read_csr(&self) -> Result<String, DevcertError> {
        Ok(std::fs::read_to_string(&self.paths.csr)?)
    }

    /// Derive a CSR from the stored key and overwrite the CSR file.
    pub fn generate_csr(&self, common_name: &str) -> Result<(), DevcertError> {
        let key = self.read_key()?;
        let csr = self.crypto.build_csr(&key, common_name)?;
        persist::write_atomic(&self.paths.csr, csr.as_bytes(), false)?;
        tracing::info!(path = %self.paths.csr.display(), common_name, "CSR generated");
        Ok(())
    }

    /// Stage a certificate chain for the canonical certificate path.
    pub fn stage_certificate(&self, chain_pem: &str) -> Result<PendingArtifact, DevcertError> {
        Ok(PendingArtifact::stage(&self.paths.cert, chain_pem.as_bytes(), false)?)
    }

    /// Promote a staged certificate over its target.
    pub fn write_certificate(&self, pending: PendingArtifact) -> Result<PathBuf, DevcertError> {
        let path = pending.commit()?;
        tracing::info!(path = %path.display(), "Certificate committed");
        Ok(path)
    }

    /// Install a key, CSR and certificate issued together.
    ///
    /// All three are staged before any is committed. Commit order is key,
    /// CSR, certificate, so a certificate is never visible ahead of its key.
    pub fn install_identity(
        &self,
        key_pem: &str,
        csr_pem: &str,
        chain_pem: &str,
    ) -> Result<PathBuf, DevcertError> {
        let key = PendingArtifact::stage(&self.paths.key, key_pem.as_bytes(), true)?;
        let csr = PendingArtifact::stage(&self.paths.csr, csr_pem.as_bytes(), false)?;
        let cert = self.stage_certificate(chain_pem)?;

        key.commit()?;
        csr.commit()?;
        self.write_certificate(cert)
    }

    /// Remove key, CSR, certificate and pending files.
    ///
    /// Each removal is independent; failures are logged and skipped. CA
    /// files and quarantined certificates are kept. Returns the removed paths.
    pub fn delete_all(&self) -> Vec<PathBuf> {
        let canonical = [&self.paths.key, &self.paths.csr, &self.paths.cert];
        let pending = canonical.iter().map(|p| persist::pending_path(p));
        let targets: Vec<PathBuf> = canonical
            .iter()
            .map(|p| p.to_path_buf())
            .chain(pending)
            .collect();

        let mut removed = Vec::new();
        for path in targets {
            match persist::remove_if_exists(&path) {
                Ok(true) => {
                    tracing::debug!(path = %path.display(), "Removed");
                    removed.push(path);
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(error = %e, path = %path.display(), "Failed to remove"),
            }
        }
        removed
    }
}
