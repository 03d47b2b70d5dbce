//! Local CA signing with the on-disk trust anchor.

use std::sync::Arc;
use std::time::Duration;

use devcert_crypto::{CaMaterial, CryptoProvider};
use zeroize::Zeroizing;

use crate::config::{BackendKind, CERT_DURATION_FLOOR_SECS};
use crate::error::DevcertError;
use crate::signer::{append_issuer, CertSigner};
use crate::trust::TrustAnchor;

pub struct LocalSigner {
    crypto: Arc<dyn CryptoProvider>,
    validity: Duration,
}

impl LocalSigner {
    /// `validity` is raised to one day if shorter.
    pub fn new(crypto: Arc<dyn CryptoProvider>, validity: Duration) -> Self {
        let floor = Duration::from_secs(CERT_DURATION_FLOOR_SECS as u64);
        Self {
            crypto,
            validity: validity.max(floor),
        }
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }
}

impl CertSigner for LocalSigner {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn sign(&self, csr_pem: &str, anchor: &TrustAnchor) -> Result<String, DevcertError> {
        let key = anchor
            .private_key()
            .map_err(|e| DevcertError::LocalSigning(e.to_string()))?;

        self.crypto
            .inspect_csr(csr_pem)
            .map_err(|e| DevcertError::LocalSigning(format!("CSR rejected: {e}")))?;

        let ca = CaMaterial {
            cert_pem: anchor.public_certificate().to_string(),
            key_pem: Zeroizing::new(key.to_string()),
        };
        let leaf = self
            .crypto
            .sign_csr(csr_pem, &ca, self.validity)
            .map_err(|e| DevcertError::LocalSigning(e.to_string()))?;

        tracing::info!(validity_secs = self.validity.as_secs(), "CSR signed by local CA");
        Ok(append_issuer(&leaf, anchor.public_certificate()))
    }
}
