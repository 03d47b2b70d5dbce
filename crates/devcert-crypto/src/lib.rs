//! Cryptographic capability behind the devcert certificate
//! lifecycle.
//!
//! Provides device and CA key generation, key-format normalisation,
//! CSR construction and verification, X.509 chain parsing, CA bootstrap
//! and CSR signing, and SHA-256 fingerprints. [`CryptoProvider`] bundles
//! these behind one object-safe trait.

pub mod authority;
pub mod csr;
pub mod fingerprint;
pub mod keys;
pub mod provider;
pub mod x509;

pub use authority::CaMaterial;
pub use csr::CsrInfo;
pub use fingerprint::Fingerprint;
pub use keys::{CryptoError, KeyAlgorithm};
pub use provider::{CryptoProvider, SoftwareCrypto};
pub use x509::CertificateInfo;
