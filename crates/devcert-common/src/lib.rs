//! Shared plumbing for the devcert crates: default paths, atomic file
//! persistence, encoding helpers and machine-readable error codes.

pub mod encoding;
pub mod error;
pub mod paths;
pub mod persist;
