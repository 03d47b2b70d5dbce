//! Remote signing through a cfssl-style HTTP CA.
//!
//! Uses blocking `ureq`; the agent's connect and read timeouts are the
//! only latency bound on a signing request.

use std::sync::Arc;
use std::time::Duration;

use devcert_crypto::CryptoProvider;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::BackendKind;
use crate::error::DevcertError;
use crate::protocol::{
    CertificateResult, Envelope, InfoRequest, IssuedMaterial, NewCertRequest, NewCertResult,
    SignRequest, INFO_LABEL, INFO_PATH, NEWCERT_PATH, SIGN_PATH,
};
use crate::signer::{append_issuer, CertSigner, IssuedIdentity};
use crate::trust::TrustAnchor;

/// TCP connection timeout for CA requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Read timeout for CA requests. Server-side RSA key generation can be slow.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// The remote CA operations the lifecycle needs.
pub trait CaService: Send + Sync {
    /// CA certificate PEM.
    fn info(&self) -> Result<String, DevcertError>;

    /// Leaf certificate PEM for a CSR.
    fn sign(&self, csr_pem: &str) -> Result<String, DevcertError>;

    /// Key, CSR and leaf certificate generated by the CA.
    fn new_certificate(&self, common_name: &str) -> Result<IssuedMaterial, DevcertError>;
}

/// HTTP client for the cfssl API.
pub struct CfsslClient {
    endpoint: String,
    agent: ureq::Agent,
}

impl CfsslClient {
    pub fn new(host: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .build();
        Self {
            endpoint: normalize_endpoint(host),
            agent,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn post<B, R>(&self, path: &str, body: &B) -> Result<R, DevcertError>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let url = format!("{}{path}", self.endpoint);
        tracing::debug!(%url, "Calling remote CA");

        let resp = self.agent.post(&url).send_json(body).map_err(map_error)?;
        let envelope: Envelope<R> = resp
            .into_json()
            .map_err(|e| DevcertError::RemoteSigning(format!("invalid response from {url}: {e}")))?;
        envelope
            .into_result()
            .map_err(|e| DevcertError::RemoteSigning(format!("{url}: {e}")))
    }
}

impl CaService for CfsslClient {
    fn info(&self) -> Result<String, DevcertError> {
        let result: CertificateResult = self.post(INFO_PATH, &InfoRequest { label: INFO_LABEL })?;
        certificate_field(result)
    }

    fn sign(&self, csr_pem: &str) -> Result<String, DevcertError> {
        let result: CertificateResult = self.post(
            SIGN_PATH,
            &SignRequest {
                certificate_request: csr_pem,
            },
        )?;
        certificate_field(result)
    }

    fn new_certificate(&self, common_name: &str) -> Result<IssuedMaterial, DevcertError> {
        let result: NewCertResult =
            self.post(NEWCERT_PATH, &NewCertRequest::for_device(common_name))?;
        IssuedMaterial::try_from(result).map_err(DevcertError::RemoteSigning)
    }
}

fn certificate_field(result: CertificateResult) -> Result<String, DevcertError> {
    result
        .certificate
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| DevcertError::RemoteSigning("response is missing 'certificate'".into()))
}

/// Prefix `http://` when no scheme is given and drop trailing slashes.
fn normalize_endpoint(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

fn map_error(e: ureq::Error) -> DevcertError {
    match e {
        ureq::Error::Status(status, resp) => {
            let body = resp.into_string().unwrap_or_default();
            let detail = serde_json::from_str::<Envelope<serde_json::Value>>(&body)
                .ok()
                .and_then(|env| env.into_result().err())
                .unwrap_or(body);
            DevcertError::RemoteSigning(format!("HTTP {status}: {detail}"))
        }
        ureq::Error::Transport(t) => {
            DevcertError::RemoteSigning(format!("CA unreachable: {t}"))
        }
    }
}

/// Signing backend that delegates to a remote CA.
pub struct RemoteSigner {
    service: Arc<dyn CaService>,
    crypto: Arc<dyn CryptoProvider>,
    server_keygen: bool,
}

impl RemoteSigner {
    pub fn new(
        service: Arc<dyn CaService>,
        crypto: Arc<dyn CryptoProvider>,
        server_keygen: bool,
    ) -> Self {
        Self {
            service,
            crypto,
            server_keygen,
        }
    }
}

impl CertSigner for RemoteSigner {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn sign(&self, csr_pem: &str, anchor: &TrustAnchor) -> Result<String, DevcertError> {
        let leaf = self.service.sign(csr_pem)?;
        tracing::info!("CSR signed by remote CA");
        Ok(append_issuer(&leaf, anchor.public_certificate()))
    }

    fn issue_new(
        &self,
        common_name: &str,
        anchor: &TrustAnchor,
    ) -> Result<Option<IssuedIdentity>, DevcertError> {
        if !self.server_keygen {
            return Ok(None);
        }

        let material = self.service.new_certificate(common_name)?;
        let key_pem = self
            .crypto
            .normalize_key(&material.private_key)
            .map_err(|e| DevcertError::RemoteSigning(format!("unusable private key: {e}")))?;

        tracing::info!(common_name, "Identity issued by remote CA");
        Ok(Some(IssuedIdentity {
            key_pem,
            csr_pem: material.certificate_request,
            chain_pem: append_issuer(&material.certificate, anchor.public_certificate()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;

    /// Serve exactly one HTTP response and return the client URL plus a
    /// handle yielding the raw request body.
    fn one_shot(status: &str, body: &str) -> (String, std::thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );

        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let lower = line.to_ascii_lowercase();
                if let Some(v) = lower.strip_prefix("content-length:") {
                    content_length = v.trim().parse().unwrap();
                }
                if line == "\r\n" || line.is_empty() {
                    break;
                }
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).unwrap();
            reader.get_mut().write_all(response.as_bytes()).unwrap();
            String::from_utf8(request_body).unwrap()
        });

        (format!("127.0.0.1:{}", addr.port()), handle)
    }

    #[test]
    fn endpoint_gets_scheme_and_loses_trailing_slash() {
        assert_eq!(normalize_endpoint("ca.local:8888/"), "http://ca.local:8888");
        assert_eq!(normalize_endpoint("https://ca.local"), "https://ca.local");
        assert_eq!(CfsslClient::new("10.0.0.1").endpoint(), "http://10.0.0.1");
    }

    #[test]
    fn sign_posts_csr_and_extracts_certificate() {
        let (host, server) = one_shot(
            "200 OK",
            r#"{"success":true,"result":{"certificate":"LEAF PEM"},"errors":[]}"#,
        );
        let client = CfsslClient::new(&host);

        let cert = client.sign("CSR\nPEM\n").unwrap();
        assert_eq!(cert, "LEAF PEM");

        let request: serde_json::Value = serde_json::from_str(&server.join().unwrap()).unwrap();
        assert_eq!(request["certificate_request"], "CSR\nPEM\n");
    }

    #[test]
    fn non_success_status_is_remote_signing_error() {
        let (host, server) = one_shot(
            "400 Bad Request",
            r#"{"success":false,"result":null,"errors":[{"code":2000,"message":"invalid CSR"}]}"#,
        );
        let client = CfsslClient::new(&host);

        let err = client.sign("CSR").unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, DevcertError::RemoteSigning(_)));
        let text = err.to_string();
        assert!(text.contains("400"));
        assert!(text.contains("invalid CSR"));
    }

    #[test]
    fn missing_certificate_field_is_remote_signing_error() {
        let (host, server) = one_shot("200 OK", r#"{"success":true,"result":{}}"#);
        let client = CfsslClient::new(&host);

        let err = client.info().unwrap_err();
        server.join().unwrap();
        assert!(err.to_string().contains("certificate"));
    }

    #[test]
    fn info_sends_primary_label() {
        let (host, server) =
            one_shot("200 OK", r#"{"success":true,"result":{"certificate":"CA PEM"}}"#);
        let client = CfsslClient::new(&host);

        assert_eq!(client.info().unwrap(), "CA PEM");
        let request: serde_json::Value = serde_json::from_str(&server.join().unwrap()).unwrap();
        assert_eq!(request["label"], "primary");
    }

    #[test]
    fn unreachable_host_is_remote_signing_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = CfsslClient::new(&format!("127.0.0.1:{port}"));
        assert!(matches!(
            client.sign("CSR"),
            Err(DevcertError::RemoteSigning(_))
        ));
    }

    struct StaticService;

    impl CaService for StaticService {
        fn info(&self) -> Result<String, DevcertError> {
            Ok("CA".into())
        }
        fn sign(&self, _csr_pem: &str) -> Result<String, DevcertError> {
            Ok("LEAF\n".into())
        }
        fn new_certificate(&self, _common_name: &str) -> Result<IssuedMaterial, DevcertError> {
            Err(DevcertError::RemoteSigning("no keygen".into()))
        }
    }

    #[test]
    fn remote_signer_appends_ca_certificate() {
        let anchor = TrustAnchor::new(BackendKind::Remote, "CA\n".into(), None);
        let signer = RemoteSigner::new(
            Arc::new(StaticService),
            Arc::new(devcert_crypto::SoftwareCrypto),
            false,
        );

        assert_eq!(signer.sign("CSR", &anchor).unwrap(), "LEAF\nCA\n");
        assert!(signer.issue_new("device-001", &anchor).unwrap().is_none());
    }
}
