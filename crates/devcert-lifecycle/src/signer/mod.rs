//! Signing backends.
//!
//! [`SigningBackend`] is chosen once from configuration: the remote
//! cfssl-style HTTP CA or the local on-disk CA. Both turn a CSR into a
//! chain file (leaf followed by the CA certificate).

pub mod local;
pub mod remote;

use std::sync::Arc;

use devcert_crypto::CryptoProvider;
use zeroize::Zeroizing;

use crate::config::{BackendKind, DevcertConfig};
use crate::error::DevcertError;
use crate::trust::TrustAnchor;

pub use local::LocalSigner;
pub use remote::{CaService, CfsslClient, RemoteSigner};

/// Key, CSR and chain issued together by a backend.
pub struct IssuedIdentity {
    pub key_pem: Zeroizing<String>,
    pub csr_pem: String,
    pub chain_pem: String,
}

impl std::fmt::Debug for IssuedIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedIdentity")
            .field("key_pem", &"<redacted>")
            .field("csr_pem", &self.csr_pem)
            .field("chain_pem", &self.chain_pem)
            .finish()
    }
}

/// Turns CSRs into certificate chains.
pub trait CertSigner: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Sign `csr_pem` and return leaf plus CA certificate as one PEM text.
    fn sign(&self, csr_pem: &str, anchor: &TrustAnchor) -> Result<String, DevcertError>;

    /// Issue key, CSR and certificate in one step, if the backend can.
    ///
    /// `Ok(None)` means the caller generates key and CSR itself.
    fn issue_new(
        &self,
        _common_name: &str,
        _anchor: &TrustAnchor,
    ) -> Result<Option<IssuedIdentity>, DevcertError> {
        Ok(None)
    }
}

pub enum SigningBackend {
    Remote(RemoteSigner),
    Local(LocalSigner),
}

impl SigningBackend {
    /// Build the configured backend. The remote variant also hands back its
    /// CA service so trust bootstrap can query the info endpoint.
    pub fn from_config(
        config: &DevcertConfig,
        crypto: Arc<dyn CryptoProvider>,
    ) -> Result<(Self, Option<Arc<dyn CaService>>), DevcertError> {
        match config.backend {
            BackendKind::Remote => {
                let host = config.ca_host.as_deref().ok_or_else(|| {
                    DevcertError::Configuration("remote backend requires a CA host".into())
                })?;
                let service: Arc<dyn CaService> = Arc::new(CfsslClient::new(host));
                let signer = RemoteSigner::new(service.clone(), crypto, config.server_keygen);
                Ok((Self::Remote(signer), Some(service)))
            }
            BackendKind::Local => Ok((
                Self::Local(LocalSigner::new(crypto, config.cert_duration)),
                None,
            )),
        }
    }
}

impl CertSigner for SigningBackend {
    fn kind(&self) -> BackendKind {
        match self {
            Self::Remote(s) => s.kind(),
            Self::Local(s) => s.kind(),
        }
    }

    fn sign(&self, csr_pem: &str, anchor: &TrustAnchor) -> Result<String, DevcertError> {
        match self {
            Self::Remote(s) => s.sign(csr_pem, anchor),
            Self::Local(s) => s.sign(csr_pem, anchor),
        }
    }

    fn issue_new(
        &self,
        common_name: &str,
        anchor: &TrustAnchor,
    ) -> Result<Option<IssuedIdentity>, DevcertError> {
        match self {
            Self::Remote(s) => s.issue_new(common_name, anchor),
            Self::Local(s) => s.issue_new(common_name, anchor),
        }
    }
}

/// Leaf followed by issuer, each block newline-terminated.
pub fn append_issuer(leaf_pem: &str, ca_pem: &str) -> String {
    let mut chain = String::with_capacity(leaf_pem.len() + ca_pem.len() + 2);
    for block in [leaf_pem, ca_pem] {
        let block = block.trim();
        chain.push_str(block);
        chain.push('\n');
    }
    chain
}
