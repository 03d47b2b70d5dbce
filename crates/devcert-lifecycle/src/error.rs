//! Lifecycle error taxonomy.

use std::path::PathBuf;

use devcert_common::error::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum DevcertError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no CA certificate available: {0}")]
    MissingTrustAnchor(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("remote signing failed: {0}")]
    RemoteSigning(String),

    #[error("local signing failed: {0}")]
    LocalSigning(String),

    #[error("renewed certificate failed validation, existing certificate kept: {0}")]
    RenewalValidationFailed(String),

    #[error("certificate does not match private key, moved to {}", .quarantined.display())]
    KeyCertificateMismatch { quarantined: PathBuf },

    #[error("certificate not found: {}", .0.display())]
    CertificateNotFound(PathBuf),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<devcert_crypto::CryptoError> for DevcertError {
    fn from(e: devcert_crypto::CryptoError) -> Self {
        Self::Crypto(e.to_string())
    }
}

impl From<&DevcertError> for ErrorCode {
    fn from(e: &DevcertError) -> Self {
        match e {
            DevcertError::Configuration(_) => ErrorCode::Configuration,
            DevcertError::MissingTrustAnchor(_) => ErrorCode::MissingTrustAnchor,
            DevcertError::UnsupportedOperation(_) => ErrorCode::UnsupportedOperation,
            DevcertError::RemoteSigning(_) => ErrorCode::RemoteSigning,
            DevcertError::LocalSigning(_) => ErrorCode::LocalSigning,
            DevcertError::RenewalValidationFailed(_) => ErrorCode::RenewalValidationFailed,
            DevcertError::KeyCertificateMismatch { .. } => ErrorCode::KeyCertificateMismatch,
            DevcertError::CertificateNotFound(_) => ErrorCode::CertificateNotFound,
            DevcertError::Crypto(_) => ErrorCode::Internal,
            DevcertError::Io(_) => ErrorCode::IoError,
        }
    }
}
