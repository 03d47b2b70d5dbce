//! CA Trust Provider: the CA certificate and, for local signing, its key.
//!
//! When the CA material is not on disk it is bootstrapped, trying in
//! order: base64 blobs from configuration, the remote CA's info endpoint
//! (remote backend only), a freshly generated root (local backend only).
//! The first source that succeeds is persisted so later runs load it
//! from disk.

use std::path::Path;
use std::sync::Arc;

use devcert_common::{encoding, persist};
use devcert_crypto::{CryptoProvider, Fingerprint};
use zeroize::Zeroizing;

use crate::config::{BackendKind, DevcertConfig};
use crate::error::DevcertError;
use crate::signer::remote::CaService;
use crate::store::StorePaths;

/// Where the trust anchor came from on this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorSource {
    Disk,
    Environment,
    RemoteInfo,
    Generated,
}

/// Outcome of reading an existing CA certificate from disk.
enum OnDisk {
    Ready(TrustAnchor),
    /// The certificate is fine but the local key is missing or foreign.
    KeyUnusable {
        cert_pem: String,
        public_key_fingerprint: Fingerprint,
    },
}

/// The CA certificate plus, for the local backend, its private key.
pub struct TrustAnchor {
    backend: BackendKind,
    cert_pem: String,
    key_pem: Option<Zeroizing<String>>,
    source: AnchorSource,
}

impl std::fmt::Debug for TrustAnchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustAnchor")
            .field("backend", &self.backend)
            .field("source", &self.source)
            .field("has_key", &self.key_pem.is_some())
            .finish()
    }
}

impl TrustAnchor {
    pub fn new(backend: BackendKind, cert_pem: String, key_pem: Option<Zeroizing<String>>) -> Self {
        Self {
            backend,
            cert_pem,
            key_pem,
            source: AnchorSource::Disk,
        }
    }

    pub fn public_certificate(&self) -> &str {
        &self.cert_pem
    }

    /// The CA private key. Only the local backend holds one.
    pub fn private_key(&self) -> Result<&str, DevcertError> {
        match (self.backend, &self.key_pem) {
            (BackendKind::Remote, _) => Err(DevcertError::UnsupportedOperation(
                "the remote CA does not expose its private key".into(),
            )),
            (BackendKind::Local, Some(key)) => Ok(key.as_str()),
            (BackendKind::Local, None) => Err(DevcertError::MissingTrustAnchor(
                "CA private key is not available".into(),
            )),
        }
    }

    pub fn source(&self) -> AnchorSource {
        self.source
    }
}

pub struct TrustProvider<'a> {
    config: &'a DevcertConfig,
    paths: &'a StorePaths,
    crypto: Arc<dyn CryptoProvider>,
    remote: Option<Arc<dyn CaService>>,
}

impl<'a> TrustProvider<'a> {
    pub fn new(
        config: &'a DevcertConfig,
        paths: &'a StorePaths,
        crypto: Arc<dyn CryptoProvider>,
        remote: Option<Arc<dyn CaService>>,
    ) -> Self {
        Self {
            config,
            paths,
            crypto,
            remote,
        }
    }

    /// Load the anchor from disk, bootstrapping it first when missing.
    ///
    /// Bootstrap only runs when no CA certificate exists. An existing
    /// certificate is never replaced by a generated root: if it is
    /// unreadable, or its key is missing, the anchor is unavailable unless
    /// configuration supplies the CA material.
    pub fn load_or_bootstrap(&self) -> Result<TrustAnchor, DevcertError> {
        let (anchor, source) = match read_optional(&self.paths.ca_cert)? {
            Some(cert_pem) => match self.load_from_disk(cert_pem)? {
                OnDisk::Ready(anchor) => return Ok(anchor),
                OnDisk::KeyUnusable {
                    cert_pem,
                    public_key_fingerprint,
                } => self.restore_key(cert_pem, &public_key_fingerprint)?,
            },
            None => self.bootstrap()?,
        };

        self.persist(&anchor)?;
        tracing::info!(?source, path = %self.paths.ca_cert.display(), "CA material installed");
        Ok(TrustAnchor { source, ..anchor })
    }

    /// The CA certificate PEM, bootstrapping if needed.
    pub fn public_certificate(&self) -> Result<String, DevcertError> {
        Ok(self.load_or_bootstrap()?.cert_pem)
    }

    fn needs_key(&self) -> bool {
        self.config.backend == BackendKind::Local
    }

    fn bootstrap(&self) -> Result<(TrustAnchor, AnchorSource), DevcertError> {
        let backend = self.config.backend;
        tracing::info!(%backend, "CA material missing, bootstrapping");

        if let Some(anchor) = self.from_environment()? {
            Ok((anchor, AnchorSource::Environment))
        } else if let Some(anchor) = self.from_remote_info()? {
            Ok((anchor, AnchorSource::RemoteInfo))
        } else if backend == BackendKind::Local {
            Ok((self.generate()?, AnchorSource::Generated))
        } else {
            Err(DevcertError::MissingTrustAnchor(
                "no CA certificate on disk, in configuration or from the remote CA".into(),
            ))
        }
    }

    /// Recover the key of the root on disk from configured blobs.
    ///
    /// The configured key must belong to the existing root; the certificate
    /// on disk is kept as is.
    fn restore_key(
        &self,
        cert_pem: String,
        expected: &Fingerprint,
    ) -> Result<(TrustAnchor, AnchorSource), DevcertError> {
        let unusable = || {
            DevcertError::MissingTrustAnchor(format!(
                "{} has no usable private key at {}",
                self.paths.ca_cert.display(),
                self.paths.ca_key.display()
            ))
        };

        let Some(TrustAnchor {
            key_pem: Some(key_pem),
            ..
        }) = self.from_environment()?
        else {
            return Err(unusable());
        };
        if self.crypto.public_key_fingerprint(&key_pem)? != *expected {
            tracing::warn!("Configured CA key belongs to a different root, ignoring");
            return Err(unusable());
        }

        Ok((
            TrustAnchor::new(BackendKind::Local, cert_pem, Some(key_pem)),
            AnchorSource::Environment,
        ))
    }

    fn load_from_disk(&self, cert_pem: String) -> Result<OnDisk, DevcertError> {
        let ca_cert = self
            .crypto
            .parse_chain(&cert_pem)
            .map_err(|e| {
                DevcertError::MissingTrustAnchor(format!(
                    "CA certificate {} is unreadable: {e}",
                    self.paths.ca_cert.display()
                ))
            })?
            .remove(0);

        if !self.needs_key() {
            return Ok(OnDisk::Ready(TrustAnchor::new(
                BackendKind::Remote,
                cert_pem,
                None,
            )));
        }

        let unusable = |cert_pem| OnDisk::KeyUnusable {
            cert_pem,
            public_key_fingerprint: ca_cert.public_key_fingerprint,
        };
        let Some(key_pem) = read_optional(&self.paths.ca_key)? else {
            tracing::warn!(path = %self.paths.ca_key.display(), "CA certificate present without its key");
            return Ok(unusable(cert_pem));
        };
        let key_pem = Zeroizing::new(key_pem);
        match self.crypto.public_key_fingerprint(&key_pem) {
            Ok(fp) if fp == ca_cert.public_key_fingerprint => Ok(OnDisk::Ready(
                TrustAnchor::new(BackendKind::Local, cert_pem, Some(key_pem)),
            )),
            Ok(_) => {
                tracing::warn!(path = %self.paths.ca_key.display(), "CA key does not belong to the CA certificate");
                Ok(unusable(cert_pem))
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %self.paths.ca_key.display(), "CA key on disk is unreadable");
                Ok(unusable(cert_pem))
            }
        }
    }

    /// Decode base64 blobs supplied through configuration.
    ///
    /// The local backend needs both blobs; a lone certificate is skipped.
    /// A blob that is present but malformed is a configuration error.
    fn from_environment(&self) -> Result<Option<TrustAnchor>, DevcertError> {
        let Some(cert_b64) = self.config.ca_cert_encoded.as_deref() else {
            return Ok(None);
        };

        let cert_pem = decode_pem_blob(cert_b64, "CA certificate")?;
        self.crypto
            .parse_chain(&cert_pem)
            .map_err(|e| DevcertError::Configuration(format!("encoded CA certificate: {e}")))?;

        if !self.needs_key() {
            return Ok(Some(TrustAnchor::new(BackendKind::Remote, cert_pem, None)));
        }

        let Some(key_b64) = self.config.ca_key_encoded.as_deref() else {
            tracing::warn!("Encoded CA certificate supplied without its key, ignoring");
            return Ok(None);
        };
        let key_pem = Zeroizing::new(decode_pem_blob(key_b64, "CA key")?);
        let key_pem = self
            .crypto
            .normalize_key(&key_pem)
            .map_err(|e| DevcertError::Configuration(format!("encoded CA key: {e}")))?;

        Ok(Some(TrustAnchor::new(BackendKind::Local, cert_pem, Some(key_pem))))
    }

    fn from_remote_info(&self) -> Result<Option<TrustAnchor>, DevcertError> {
        if self.config.backend != BackendKind::Remote {
            return Ok(None);
        }
        let Some(remote) = &self.remote else {
            return Ok(None);
        };

        let cert_pem = remote
            .info()
            .map_err(|e| DevcertError::MissingTrustAnchor(format!("remote CA info: {e}")))?;
        self.crypto
            .parse_chain(&cert_pem)
            .map_err(|e| DevcertError::MissingTrustAnchor(format!("remote CA certificate: {e}")))?;

        Ok(Some(TrustAnchor::new(BackendKind::Remote, cert_pem, None)))
    }

    fn generate(&self) -> Result<TrustAnchor, DevcertError> {
        let algorithm = self.config.ca_key_algorithm;
        tracing::info!(%algorithm, "Generating root CA");
        let material = self.crypto.create_root_ca(algorithm)?;
        Ok(TrustAnchor::new(
            BackendKind::Local,
            material.cert_pem,
            Some(material.key_pem),
        ))
    }

    /// Key first, so a certificate on disk always has its key beside it.
    fn persist(&self, anchor: &TrustAnchor) -> Result<(), DevcertError> {
        if let Some(key) = &anchor.key_pem {
            persist::write_atomic(&self.paths.ca_key, key.as_bytes(), true)?;
        }
        persist::write_atomic(&self.paths.ca_cert, anchor.cert_pem.as_bytes(), false)?;
        Ok(())
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, DevcertError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(DevcertError::Io(e)),
    }
}

fn decode_pem_blob(encoded: &str, what: &str) -> Result<String, DevcertError> {
    let bytes = encoding::base64_decode(encoded)
        .map_err(|e| DevcertError::Configuration(format!("encoded {what}: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|_| DevcertError::Configuration(format!("encoded {what} is not PEM text")))
}
