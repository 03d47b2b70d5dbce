//! Resolved configuration.
//!
//! Each source (CLI flags, environment, TOML file) produces a
//! [`ConfigLayer`] with every field optional. [`DevcertConfig::resolve`]
//! walks the layers in precedence order and takes the first value set
//! for each field, falling back to built-in defaults. The resolved
//! struct is immutable and passed by reference to every component.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use devcert_crypto::KeyAlgorithm;
use serde::{Deserialize, Serialize};

use crate::error::DevcertError;

/// Default minimum remaining validity before renewal (7 days).
pub const DEFAULT_MIN_VALIDITY_SECS: i64 = 604_800;

/// Minimum validity can never be configured below this.
pub const MIN_VALIDITY_FLOOR_SECS: i64 = 60;

/// Default and minimum lifetime of locally signed certificates (1 day).
pub const CERT_DURATION_FLOOR_SECS: i64 = 86_400;

pub const ENV_BASEDIR: &str = "DEVCERT_BASEDIR";
pub const ENV_DEVICE_ID: &str = "DEVCERT_DEVICE_ID";
pub const ENV_FORCE: &str = "DEVCERT_FORCE";
pub const ENV_CA_HOST: &str = "DEVCERT_CA_HOST";
pub const ENV_BACKEND: &str = "DEVCERT_BACKEND";
pub const ENV_MIN_VALIDITY: &str = "DEVCERT_MIN_VALIDITY_SECONDS";
pub const ENV_CERT_DURATION: &str = "DEVCERT_CERT_DURATION_SECONDS";
pub const ENV_CA_KEY: &str = "DEVCERT_CA_KEY";
pub const ENV_CA_CERT: &str = "DEVCERT_CA_CERT";
pub const ENV_CA_KEY_ALGORITHM: &str = "DEVCERT_CA_KEY_ALGORITHM";
pub const ENV_SERVER_KEYGEN: &str = "DEVCERT_SERVER_KEYGEN";
pub const ENV_CONFIG: &str = "DEVCERT_CONFIG";

/// Which signing backend the lifecycle talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Remote,
    Local,
}

impl FromStr for BackendKind {
    type Err = DevcertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" | "cfssl" => Ok(Self::Remote),
            "local" | "openssl" => Ok(Self::Local),
            other => Err(DevcertError::Configuration(format!(
                "unknown backend '{other}', expected 'remote' or 'local'"
            ))),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote => f.write_str("remote"),
            Self::Local => f.write_str("local"),
        }
    }
}

/// One configuration source. Unset fields defer to lower layers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub basedir: Option<PathBuf>,
    pub device_id: Option<String>,
    pub force: Option<bool>,
    pub ca_host: Option<String>,
    pub backend: Option<String>,
    pub min_validity_seconds: Option<i64>,
    pub cert_duration_seconds: Option<i64>,
    pub ca_key_encoded: Option<String>,
    pub ca_cert_encoded: Option<String>,
    pub ca_key_algorithm: Option<String>,
    pub server_keygen: Option<bool>,
}

impl ConfigLayer {
    /// Layer built from the process environment.
    pub fn from_env() -> Result<Self, DevcertError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Layer built from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DevcertError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            basedir: get(ENV_BASEDIR).map(PathBuf::from),
            device_id: get(ENV_DEVICE_ID),
            force: get(ENV_FORCE).map(|v| parse_bool(ENV_FORCE, &v)).transpose()?,
            ca_host: get(ENV_CA_HOST),
            backend: get(ENV_BACKEND),
            min_validity_seconds: get(ENV_MIN_VALIDITY)
                .map(|v| parse_seconds(ENV_MIN_VALIDITY, &v))
                .transpose()?,
            cert_duration_seconds: get(ENV_CERT_DURATION)
                .map(|v| parse_seconds(ENV_CERT_DURATION, &v))
                .transpose()?,
            ca_key_encoded: get(ENV_CA_KEY),
            ca_cert_encoded: get(ENV_CA_CERT),
            ca_key_algorithm: get(ENV_CA_KEY_ALGORITHM),
            server_keygen: get(ENV_SERVER_KEYGEN)
                .map(|v| parse_bool(ENV_SERVER_KEYGEN, &v))
                .transpose()?,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, DevcertError> {
        toml::from_str(text)
            .map_err(|e| DevcertError::Configuration(format!("invalid config file: {e}")))
    }

    /// Load a TOML layer. A missing file yields an empty layer.
    pub fn load_file(path: &Path) -> Result<Self, DevcertError> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                tracing::debug!(path = %path.display(), "Loaded config file");
                Self::from_toml_str(&text).map_err(|e| match e {
                    DevcertError::Configuration(msg) => {
                        DevcertError::Configuration(format!("{}: {msg}", path.display()))
                    }
                    other => other,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(DevcertError::Io(e)),
        }
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, DevcertError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(DevcertError::Configuration(format!(
            "{name}: expected a boolean, got '{other}'"
        ))),
    }
}

fn parse_seconds(name: &str, value: &str) -> Result<i64, DevcertError> {
    value.trim().parse::<i64>().map_err(|_| {
        DevcertError::Configuration(format!("{name}: expected whole seconds, got '{value}'"))
    })
}

/// Fully resolved configuration.
#[derive(Clone)]
pub struct DevcertConfig {
    pub basedir: PathBuf,
    pub device_id: Option<String>,
    pub force: bool,
    pub ca_host: Option<String>,
    pub backend: BackendKind,
    /// Renew when less than this much validity remains. Never below 60 s.
    pub min_validity: Duration,
    /// Lifetime of locally signed certificates. Never below one day.
    pub cert_duration: Duration,
    pub ca_key_encoded: Option<String>,
    pub ca_cert_encoded: Option<String>,
    pub ca_key_algorithm: KeyAlgorithm,
    /// Let the remote CA generate key and CSR on `new`.
    pub server_keygen: bool,
}

impl std::fmt::Debug for DevcertConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevcertConfig")
            .field("basedir", &self.basedir)
            .field("device_id", &self.device_id)
            .field("force", &self.force)
            .field("ca_host", &self.ca_host)
            .field("backend", &self.backend)
            .field("min_validity", &self.min_validity)
            .field("cert_duration", &self.cert_duration)
            .field("ca_key_encoded", &self.ca_key_encoded.as_ref().map(|_| "<redacted>"))
            .field("ca_cert_encoded", &self.ca_cert_encoded.is_some())
            .field("ca_key_algorithm", &self.ca_key_algorithm)
            .field("server_keygen", &self.server_keygen)
            .finish()
    }
}

impl Default for DevcertConfig {
    fn default() -> Self {
        Self {
            basedir: devcert_common::paths::default_base_dir(),
            device_id: None,
            force: false,
            ca_host: None,
            backend: BackendKind::Local,
            min_validity: Duration::from_secs(DEFAULT_MIN_VALIDITY_SECS as u64),
            cert_duration: Duration::from_secs(CERT_DURATION_FLOOR_SECS as u64),
            ca_key_encoded: None,
            ca_cert_encoded: None,
            ca_key_algorithm: KeyAlgorithm::Rsa4096,
            server_keygen: true,
        }
    }
}

/// First layer that sets a field wins.
macro_rules! first {
    ($layers:expr, $field:ident) => {
        $layers.iter().find_map(|layer| layer.$field.clone())
    };
}

impl DevcertConfig {
    /// Merge layers, highest precedence first.
    pub fn resolve(layers: &[ConfigLayer]) -> Result<Self, DevcertError> {
        let defaults = Self::default();

        let ca_host = first!(layers, ca_host).filter(|h| !h.trim().is_empty());
        let backend = match first!(layers, backend) {
            Some(name) => name.parse()?,
            None if ca_host.is_some() => BackendKind::Remote,
            None => BackendKind::Local,
        };
        if backend == BackendKind::Remote && ca_host.is_none() {
            return Err(DevcertError::Configuration(
                "remote backend selected but no CA host configured".into(),
            ));
        }

        let ca_key_algorithm = match first!(layers, ca_key_algorithm) {
            Some(name) => name
                .parse::<KeyAlgorithm>()
                .map_err(|e| DevcertError::Configuration(e.to_string()))?,
            None => defaults.ca_key_algorithm,
        };

        let min_validity = first!(layers, min_validity_seconds)
            .unwrap_or(DEFAULT_MIN_VALIDITY_SECS)
            .max(MIN_VALIDITY_FLOOR_SECS);
        let cert_duration = first!(layers, cert_duration_seconds)
            .unwrap_or(CERT_DURATION_FLOOR_SECS)
            .max(CERT_DURATION_FLOOR_SECS);

        Ok(Self {
            basedir: first!(layers, basedir).unwrap_or(defaults.basedir),
            device_id: first!(layers, device_id).filter(|id| !id.trim().is_empty()),
            force: first!(layers, force).unwrap_or(defaults.force),
            ca_host,
            backend,
            min_validity: Duration::from_secs(min_validity as u64),
            cert_duration: Duration::from_secs(cert_duration as u64),
            ca_key_encoded: first!(layers, ca_key_encoded),
            ca_cert_encoded: first!(layers, ca_cert_encoded),
            ca_key_algorithm,
            server_keygen: first!(layers, server_keygen).unwrap_or(defaults.server_keygen),
        })
    }
}

/// Pick the device common name: explicit argument, then configured
/// device id, then the host name.
///
/// Fails before any file is touched when nothing usable is found.
pub fn resolve_common_name<H>(
    explicit: Option<&str>,
    config: &DevcertConfig,
    hostname: H,
) -> Result<String, DevcertError>
where
    H: FnOnce() -> Option<String>,
{
    let chosen = explicit
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| config.device_id.clone())
        .or_else(hostname)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    chosen.ok_or_else(|| {
        DevcertError::Configuration(
            "could not determine a common name: pass one explicitly or set a device id".into(),
        )
    })
}

/// Host name of this machine, if it is valid UTF-8.
pub fn system_hostname() -> Option<String> {
    hostname::get().ok().and_then(|h| h.into_string().ok())
}
