use serde::{Deserialize, Serialize};

/// Machine-readable error classification shared by every surface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Configuration,
    MissingTrustAnchor,
    UnsupportedOperation,
    RemoteSigning,
    LocalSigning,
    RenewalValidationFailed,
    KeyCertificateMismatch,
    CertificateNotFound,
    IoError,
    Internal,
}

impl ErrorCode {
    /// Process exit status for this error. Zero is reserved for success.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Configuration => 2,
            Self::MissingTrustAnchor | Self::UnsupportedOperation => 3,
            Self::RemoteSigning | Self::LocalSigning => 4,
            Self::RenewalValidationFailed | Self::KeyCertificateMismatch => 5,
            Self::CertificateNotFound => 6,
            Self::IoError | Self::Internal => 1,
        }
    }
}
