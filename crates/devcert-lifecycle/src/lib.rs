//! Device certificate lifecycle.
//!
//! Manages one device identity (private key, CSR, certificate) under a
//! base directory, signed either by a remote cfssl-style CA over HTTP or
//! by a local CA kept next to the device files.
//!
//! [`CertLifecycle`] is the entry point. It consults the [`KeyStore`] and
//! [`CertificateValidator`] to find the current [`LifecycleState`], asks
//! the configured signing backend for a certificate, validates it, and
//! commits it by rename.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod protocol;
pub mod renewal;
pub mod signer;
pub mod store;
pub mod trust;
pub mod validator;

pub use config::{BackendKind, ConfigLayer, DevcertConfig};
pub use error::DevcertError;
pub use lifecycle::{Action, CertLifecycle, IssueOutcome, LifecycleState, RenewalOutcome, StatusReport};
pub use renewal::RenewalDriver;
pub use signer::{CertSigner, SigningBackend};
pub use store::{KeyStore, PendingArtifact, StorePaths};
pub use trust::{TrustAnchor, TrustProvider};
pub use validator::{CertificateValidator, Usability};
