//! Wire types for the remote CA's cfssl-style HTTP API.
//!
//! Three endpoints are used, all `POST` with JSON bodies:
//!
//! - `/api/v1/cfssl/info` returns the CA certificate.
//! - `/api/v1/cfssl/sign` signs a PEM CSR.
//! - `/api/v1/cfssl/newcert` generates key, CSR and certificate server-side.
//!
//! Every response is wrapped in the same envelope with a `success` flag,
//! an `errors` list and a `result` object.

use serde::{Deserialize, Serialize};

use devcert_crypto::csr::{DEVICE_COUNTRY, DEVICE_ORGANIZATION, DEVICE_ORGANIZATIONAL_UNIT};

pub const INFO_PATH: &str = "/api/v1/cfssl/info";
pub const SIGN_PATH: &str = "/api/v1/cfssl/sign";
pub const NEWCERT_PATH: &str = "/api/v1/cfssl/newcert";

/// Signer profile queried for the CA certificate.
pub const INFO_LABEL: &str = "primary";

/// Key requested when the server generates the device key.
const SERVER_KEY_ALGO: &str = "rsa";
const SERVER_KEY_SIZE: u32 = 2048;

#[derive(Debug, Serialize)]
pub struct InfoRequest<'a> {
    pub label: &'a str,
}

#[derive(Debug, Serialize)]
pub struct SignRequest<'a> {
    pub certificate_request: &'a str,
}

#[derive(Debug, Serialize)]
pub struct NewCertRequest {
    pub request: CertificateRequest,
}

impl NewCertRequest {
    /// Request for a device identity with the fixed organisation fields.
    pub fn for_device(common_name: &str) -> Self {
        Self {
            request: CertificateRequest {
                hosts: Vec::new(),
                names: vec![SubjectName {
                    country: DEVICE_COUNTRY.to_string(),
                    organization: DEVICE_ORGANIZATION.to_string(),
                    organizational_unit: DEVICE_ORGANIZATIONAL_UNIT.to_string(),
                }],
                common_name: common_name.to_string(),
                key: KeyRequest {
                    algo: SERVER_KEY_ALGO.to_string(),
                    size: SERVER_KEY_SIZE,
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CertificateRequest {
    pub hosts: Vec<String>,
    pub names: Vec<SubjectName>,
    #[serde(rename = "CN")]
    pub common_name: String,
    pub key: KeyRequest,
}

#[derive(Debug, Serialize)]
pub struct SubjectName {
    #[serde(rename = "C")]
    pub country: String,
    #[serde(rename = "O")]
    pub organization: String,
    #[serde(rename = "OU")]
    pub organizational_unit: String,
}

#[derive(Debug, Serialize)]
pub struct KeyRequest {
    pub algo: String,
    pub size: u32,
}

/// Response envelope shared by every endpoint.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: Option<bool>,
    pub result: Option<T>,
    #[serde(default)]
    pub errors: Vec<ApiMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ApiMessage {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}

impl<T> Envelope<T> {
    /// The `result` object, or the reported errors as text.
    ///
    /// An explicit `success: false` fails even when a result is present.
    pub fn into_result(self) -> Result<T, String> {
        let messages = self
            .errors
            .iter()
            .map(|m| match m.code {
                Some(code) => format!("{} (code {code})", m.message),
                None => m.message.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ");

        match (self.success, self.result) {
            (Some(false), _) => Err(if messages.is_empty() {
                "server reported failure".to_string()
            } else {
                messages
            }),
            (_, Some(result)) => Ok(result),
            (_, None) => Err(if messages.is_empty() {
                "response has no result".to_string()
            } else {
                messages
            }),
        }
    }
}

/// `result` of `info` and `sign`.
#[derive(Debug, Deserialize)]
pub struct CertificateResult {
    #[serde(default)]
    pub certificate: Option<String>,
}

/// `result` of `newcert`.
#[derive(Debug, Deserialize)]
pub struct NewCertResult {
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub certificate_request: Option<String>,
    #[serde(default)]
    pub certificate: Option<String>,
}

/// Material returned by a server-side key generation.
#[derive(Debug, Clone)]
pub struct IssuedMaterial {
    pub private_key: String,
    pub certificate_request: String,
    pub certificate: String,
}

impl TryFrom<NewCertResult> for IssuedMaterial {
    type Error = String;

    fn try_from(result: NewCertResult) -> Result<Self, Self::Error> {
        let field = |value: Option<String>, name: &str| {
            value
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| format!("response is missing '{name}'"))
        };
        Ok(Self {
            private_key: field(result.private_key, "private_key")?,
            certificate_request: field(result.certificate_request, "certificate_request")?,
            certificate: field(result.certificate, "certificate")?,
        })
    }
}
