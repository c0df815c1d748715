//! Transport and authentication negotiation for the kubelet client.
//!
//! The kubelet accepts several ways of authenticating. They are tried in a
//! fixed order and the first one that applies to the current configuration
//! wins:
//!
//! 1. HTTPS with a configured client certificate and key
//! 2. HTTPS with a configured bearer token file
//! 3. HTTPS with the pod's service account token
//! 4. no credentials at all
//!
//! Before any of them, the TLS base is built (CA bundle and verification
//! mode). A broken CA bundle does not fail the negotiation: the resulting
//! [`Transport`] is marked insecure and callers only try plain HTTP.

use super::config::{KubeletSettings, REQUEST_TIMEOUT_SECONDS};
use super::USER_AGENT;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Certificate, Client, ClientBuilder, Identity};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use x509_parser::pem::Pem;

pub const URL_INFO_KEY: &str = "url";
pub const VERIFY_TLS_INFO_KEY: &str = "verify_tls";
pub const CA_CERT_INFO_KEY: &str = "ca_cert";
pub const TOKEN_INFO_KEY: &str = "token";
pub const CLIENT_CRT_INFO_KEY: &str = "client_crt";
pub const CLIENT_KEY_INFO_KEY: &str = "client_key";

/// Raw connection parameters kept for external inspection
pub type ConnectionInfo = HashMap<String, String>;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("unable to read {what} from {path}: {source}")]
    Read {
        what: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid CA bundle {path}: {reason}")]
    InvalidCa { path: String, reason: String },

    #[error("invalid client certificate {crt} / key {key}: {reason}")]
    InvalidIdentity {
        crt: String,
        key: String,
        reason: String,
    },

    #[error("bearer token file {path} is empty")]
    EmptyToken { path: String },

    #[error("bearer token from {path} is not a valid header value")]
    InvalidToken { path: String },

    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

/// Authentication schemes in preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStrategy {
    ClientCertificate,
    BearerToken,
    ServiceAccountToken,
    Anonymous,
}

impl AuthStrategy {
    pub const PRIORITY: [Self; 4] = [
        Self::ClientCertificate,
        Self::BearerToken,
        Self::ServiceAccountToken,
        Self::Anonymous,
    ];

    /// First strategy the settings allow
    #[must_use]
    pub fn select(settings: &KubeletSettings, service_account_token: &Path) -> Self {
        Self::PRIORITY
            .into_iter()
            .find(|s| s.applies(settings, service_account_token))
            .unwrap_or(Self::Anonymous)
    }

    #[must_use]
    pub fn applies(self, settings: &KubeletSettings, service_account_token: &Path) -> bool {
        match self {
            Self::ClientCertificate => settings.is_certificates_configured(),
            Self::BearerToken => settings.is_token_path_configured(),
            Self::ServiceAccountToken => is_service_account_token_available(service_account_token),
            Self::Anonymous => true,
        }
    }

    /// Load the credentials this strategy needs.
    ///
    /// # Errors
    ///
    /// Will return `Err` if a configured certificate, key or token file cannot
    /// be read or is malformed
    pub fn credentials(
        self,
        settings: &KubeletSettings,
        service_account_token: &Path,
    ) -> Result<Credentials, CredentialError> {
        match self {
            Self::ClientCertificate => {
                debug!("Using HTTPS with configured TLS certificates");
                load_client_certificate(&settings.client_crt, &settings.client_key)
            }
            Self::BearerToken => {
                debug!("Using HTTPS with configured bearer token");
                load_bearer_token(Path::new(&settings.token_path))
            }
            Self::ServiceAccountToken => {
                debug!("Using HTTPS with service account bearer token");
                load_bearer_token(service_account_token)
            }
            Self::Anonymous => {
                debug!("No configured token or TLS certificates, will try http only");
                Ok(Credentials::default())
            }
        }
    }
}

/// Output of one authentication strategy
#[derive(Default)]
pub struct Credentials {
    pub identity: Option<Identity>,
    pub headers: HeaderMap,
    pub connection_info: ConnectionInfo,
}

/// A configured HTTP client plus the request headers and diagnostics that go
/// with it
#[derive(Debug, Clone)]
pub struct Transport {
    pub client: Client,
    pub headers: HeaderMap,
    pub connection_info: ConnectionInfo,
    /// false when the TLS base could not be built; only HTTP should be tried
    pub secure: bool,
    pub strategy: Option<AuthStrategy>,
}

impl Transport {
    /// Drop every credential applied by the negotiation
    pub fn reset_credentials(&mut self) {
        self.headers.remove(AUTHORIZATION);
        self.connection_info.clear();
    }
}

/// Build a transport for the current settings.
///
/// # Errors
///
/// Will return `Err` if the selected strategy cannot load its credentials or
/// the client cannot be built. A CA bundle that fails to load is not an error:
/// the transport comes back with `secure == false`.
pub fn negotiate(
    settings: &KubeletSettings,
    service_account_token: &Path,
) -> Result<Transport, CredentialError> {
    let (builder, mut connection_info) = match tls_base(settings) {
        Ok(base) => base,
        Err(e) => {
            debug!("Failed to init tls, will try http only: {e}");
            return Ok(Transport {
                client: base_builder().build().map_err(CredentialError::Build)?,
                headers: HeaderMap::new(),
                connection_info: ConnectionInfo::new(),
                secure: false,
                strategy: None,
            });
        }
    };

    let strategy = AuthStrategy::select(settings, service_account_token);
    let credentials = strategy.credentials(settings, service_account_token)?;

    let builder = match credentials.identity {
        Some(identity) => builder.identity(identity),
        None => builder,
    };
    connection_info.extend(credentials.connection_info);

    Ok(Transport {
        client: builder.build().map_err(CredentialError::Build)?,
        headers: credentials.headers,
        connection_info,
        secure: true,
        strategy: Some(strategy),
    })
}

/// Client used for the bare reachability probe: no credentials and no
/// certificate verification.
///
/// # Errors
///
/// Will return `Err` if the client cannot be built
pub fn probe_client() -> Result<Client, CredentialError> {
    base_builder()
        .use_rustls_tls()
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(CredentialError::Build)
}

#[must_use]
pub fn is_service_account_token_available(path: &Path) -> bool {
    path.is_file()
}

fn base_builder() -> ClientBuilder {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
        .user_agent(USER_AGENT)
}

fn tls_base(
    settings: &KubeletSettings,
) -> Result<(ClientBuilder, ConnectionInfo), CredentialError> {
    let mut builder = base_builder().use_rustls_tls();
    let mut info = ConnectionInfo::new();

    if settings.tls_verify {
        if !settings.ca_path.is_empty() {
            for cert in load_ca_bundle(&settings.ca_path)? {
                builder = builder.add_root_certificate(cert);
            }
        }
        info.insert(CA_CERT_INFO_KEY.to_string(), settings.ca_path.clone());
    } else {
        builder = builder.danger_accept_invalid_certs(true);
    }
    info.insert(
        VERIFY_TLS_INFO_KEY.to_string(),
        settings.tls_verify.to_string(),
    );

    Ok((builder, info))
}

fn read_file(what: &'static str, path: &str) -> Result<Vec<u8>, CredentialError> {
    std::fs::read(path).map_err(|source| CredentialError::Read {
        what,
        path: path.to_string(),
        source,
    })
}

fn load_ca_bundle(path: &str) -> Result<Vec<Certificate>, CredentialError> {
    let invalid = |reason: String| CredentialError::InvalidCa {
        path: path.to_string(),
        reason,
    };
    let data = read_file("CA bundle", path)?;

    let mut certs = Vec::new();
    for pem in Pem::iter_from_buffer(&data) {
        let pem = pem.map_err(|e| invalid(e.to_string()))?;
        if pem.label != "CERTIFICATE" {
            continue;
        }
        pem.parse_x509().map_err(|e| invalid(e.to_string()))?;
        certs.push(Certificate::from_der(&pem.contents).map_err(|e| invalid(e.to_string()))?);
    }

    if certs.is_empty() {
        return Err(invalid("no certificate found".to_string()));
    }
    Ok(certs)
}

fn load_client_certificate(crt: &str, key: &str) -> Result<Credentials, CredentialError> {
    let invalid = |reason: String| CredentialError::InvalidIdentity {
        crt: crt.to_string(),
        key: key.to_string(),
        reason,
    };
    let crt_pem = read_file("client certificate", crt)?;
    let key_pem = read_file("client key", key)?;

    let leaf = Pem::iter_from_buffer(&crt_pem)
        .filter_map(Result::ok)
        .find(|pem| pem.label == "CERTIFICATE")
        .ok_or_else(|| invalid("no certificate found".to_string()))?;
    let cert = leaf.parse_x509().map_err(|e| invalid(e.to_string()))?;
    let validity = cert.validity();
    if validity.is_valid() {
        debug!("Client certificate valid until {}", validity.not_after);
    } else {
        warn!(
            "Client certificate {crt} is outside its validity period (not after {})",
            validity.not_after
        );
    }

    let mut bundle = crt_pem.clone();
    bundle.push(b'\n');
    bundle.extend_from_slice(&key_pem);
    let identity = Identity::from_pem(&bundle).map_err(|e| invalid(e.to_string()))?;

    let mut connection_info = ConnectionInfo::new();
    connection_info.insert(CLIENT_CRT_INFO_KEY.to_string(), crt.to_string());
    connection_info.insert(CLIENT_KEY_INFO_KEY.to_string(), key.to_string());

    Ok(Credentials {
        identity: Some(identity),
        headers: HeaderMap::new(),
        connection_info,
    })
}

fn load_bearer_token(path: &Path) -> Result<Credentials, CredentialError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| CredentialError::Read {
        what: "bearer token",
        path: display.clone(),
        source,
    })?;
    let token = raw.trim();
    if token.is_empty() {
        return Err(CredentialError::EmptyToken { path: display });
    }

    let mut value = HeaderValue::from_str(&format!("bearer {token}"))
        .map_err(|_| CredentialError::InvalidToken {
            path: display.clone(),
        })?;
    value.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, value);

    let mut connection_info = ConnectionInfo::new();
    connection_info.insert(TOKEN_INFO_KEY.to_string(), token.to_string());

    Ok(Credentials {
        identity: None,
        headers,
        connection_info,
    })
}

/// Why a TLS handshake with the kubelet failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsFailure {
    /// The serving certificate does not list the host we dialed
    SanMismatch,
    /// The serving certificate is not signed by a trusted CA
    UnknownAuthority,
    Other,
}

/// Classify a request error by walking its source chain.
#[must_use]
pub fn classify_tls_failure(err: &(dyn std::error::Error + 'static)) -> TlsFailure {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(failure) = classify_one(e) {
            return failure;
        }
        current = e.source();
    }
    TlsFailure::Other
}

fn classify_one(e: &(dyn std::error::Error + 'static)) -> Option<TlsFailure> {
    // tokio-rustls hands handshake errors back wrapped in io::Error, whose
    // source() skips the wrapped value
    let rustls_err = e.downcast_ref::<rustls::Error>().or_else(|| {
        e.downcast_ref::<std::io::Error>()
            .and_then(std::io::Error::get_ref)
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
    });

    let text = rustls_err.map_or_else(|| e.to_string(), |r| format!("{r:?}"));
    if text.contains("NotValidForName") || text.contains("certificate is valid for") {
        Some(TlsFailure::SanMismatch)
    } else if text.contains("UnknownIssuer") || text.contains("unknown authority") {
        Some(TlsFailure::UnknownAuthority)
    } else {
        None
    }
}
