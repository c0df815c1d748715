//! Endpoint resolution: find a kubelet host and scheme that answers.
//!
//! For every candidate host, HTTPS is tried first (bare reachability probe,
//! then an authenticated `/pods` query that must return 200), then plain HTTP
//! with credentials removed. The first usable combination wins and later hosts
//! are never contacted.

use super::KUBELET_POD_PATH;
use super::config::KubeletSettings;
use super::tls::{self, TlsFailure, Transport, classify_tls_failure};
use crate::error::{Error, Result};
use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Https,
    Http,
}

impl Scheme {
    pub const PROBE_ORDER: [Self; 2] = [Self::Https, Self::Http];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Https => "https",
            Self::Http => "http",
        }
    }

    #[must_use]
    pub const fn port(self, settings: &KubeletSettings) -> u16 {
        match self {
            Self::Https => settings.https_port,
            Self::Http => settings.http_port,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A host, scheme and transport that answered acceptably
#[derive(Debug, Clone)]
pub struct ResolvedEndpoint {
    pub host: String,
    pub scheme: Scheme,
    /// `${scheme}://${host}:${port}`
    pub endpoint: String,
    pub transport: Transport,
}

#[must_use]
pub fn endpoint_url(scheme: Scheme, host: &str, port: u16) -> String {
    format!("{scheme}://{host}:{port}")
}

/// Try every candidate host in order.
///
/// # Errors
///
/// Will return `Err` if credentials configured for the HTTPS path cannot be
/// loaded, or [`Error::Unreachable`] once every host failed
pub async fn resolve(
    hosts: &[String],
    settings: &KubeletSettings,
    service_account_token: &Path,
) -> Result<ResolvedEndpoint> {
    debug!("Potential kubelet hosts are: {}", hosts.join(", "));
    let probe = tls::probe_client()?;

    for (i, host) in hosts.iter().enumerate() {
        info!(
            "Host {}/{}, trying to use host {host} with HTTPS and HTTP settings",
            i + 1,
            hosts.len()
        );
        let mut transport = tls::negotiate(settings, service_account_token)?;

        for scheme in Scheme::PROBE_ORDER {
            let resolved = match scheme {
                Scheme::Https => try_https(&probe, host, settings, &transport).await,
                Scheme::Http => {
                    transport.reset_credentials();
                    try_http(host, settings, &transport).await
                }
            };
            if let Some(resolved) = resolved {
                return Ok(resolved);
            }
        }

        info!(
            "Host {}/{}, cannot use host {host} with HTTPS and HTTP settings",
            i + 1,
            hosts.len()
        );
    }

    let err = Error::Unreachable {
        hosts: hosts.to_vec(),
    };
    info!("Cannot set a kubelet client: {err}");
    Err(err)
}

pub(crate) async fn send(
    client: &Client,
    headers: &HeaderMap,
    url: &str,
) -> reqwest::Result<Response> {
    client.get(url).headers(headers.clone()).send().await
}

async fn try_https(
    probe: &Client,
    host: &str,
    settings: &KubeletSettings,
    transport: &Transport,
) -> Option<ResolvedEndpoint> {
    if !transport.secure {
        debug!("TLS settings unavailable, skipping HTTPS for {host}");
        return None;
    }

    let endpoint = endpoint_url(Scheme::Https, host, Scheme::Https.port(settings));
    debug!("Trying to query the kubelet endpoint {endpoint} ...");
    if let Err(e) = send(probe, &HeaderMap::new(), &format!("{endpoint}/")).await {
        debug!("Cannot reach {endpoint} over HTTPS: {e}");
        return None;
    }
    info!(
        "Successfully queried {endpoint}/ without any security settings, adding security settings to query {endpoint}{KUBELET_POD_PATH}"
    );

    let url = format!("{endpoint}{KUBELET_POD_PATH}");
    match send(&transport.client, &transport.headers, &url).await {
        Ok(response) => match response.status() {
            StatusCode::OK => {
                info!(
                    "Successfully authorized to query the kubelet on {url}: 200, using {endpoint} as kubelet endpoint"
                );
                return Some(ResolvedEndpoint {
                    host: host.to_string(),
                    scheme: Scheme::Https,
                    endpoint,
                    transport: transport.clone(),
                });
            }
            status if status.is_server_error() => {
                info!(
                    "Unexpected return code {status} on request {url} on kubelet endpoint {endpoint}"
                );
            }
            StatusCode::UNAUTHORIZED => {
                debug!(
                    "Unauthorized to request {url} on kubelet endpoint {endpoint}, check the kubelet authentication/authorization settings"
                );
            }
            status => {
                debug!("Unexpected http code {status} on kubelet endpoint {endpoint}");
            }
        },
        Err(e) => match classify_tls_failure(&e) {
            TlsFailure::SanMismatch => debug!(
                "Invalid x509 settings, the kubelet server certificate is not valid for this subject alternative name: {host}, {e}. Please check the SAN of the kubelet server certificate"
            ),
            TlsFailure::UnknownAuthority => debug!(
                "The kubelet server certificate is signed by unknown authority, the current cacert is {:?}. Is the kubelet issuing self-signed certificates? {e}",
                transport.connection_info.get(tls::CA_CERT_INFO_KEY)
            ),
            TlsFailure::Other => debug!("Cannot query {url} on kubelet endpoint {endpoint}: {e}"),
        },
    }

    debug!("Cannot use the HTTPS endpoint: {endpoint}, trying through HTTP");
    None
}

async fn try_http(
    host: &str,
    settings: &KubeletSettings,
    transport: &Transport,
) -> Option<ResolvedEndpoint> {
    let endpoint = endpoint_url(Scheme::Http, host, Scheme::Http.port(settings));
    debug!("Trying to query the kubelet endpoint {endpoint} ...");

    match send(&transport.client, &transport.headers, &format!("{endpoint}/")).await {
        Ok(response) => {
            info!(
                "Successfully requested {} on kubelet endpoint {endpoint}",
                response.url()
            );
            Some(ResolvedEndpoint {
                host: host.to_string(),
                scheme: Scheme::Http,
                endpoint,
                transport: transport.clone(),
            })
        }
        Err(e) => {
            info!("Cannot use the HTTP endpoint: {endpoint}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubelet::config::{HTTP_PORT_KEY, HTTPS_PORT_KEY, MapConfig};

    #[test]
    fn test_endpoint_url() {
        let settings = KubeletSettings::from_lookup(
            &MapConfig::with_defaults()
                .with(HTTPS_PORT_KEY, 11250)
                .with(HTTP_PORT_KEY, 11255),
        );
        assert_eq!(
            endpoint_url(Scheme::Https, "10.0.0.1", Scheme::Https.port(&settings)),
            "https://10.0.0.1:11250"
        );
        assert_eq!(
            endpoint_url(Scheme::Http, "node-a", Scheme::Http.port(&settings)),
            "http://node-a:11255"
        );
    }

    #[test]
    fn test_https_is_tried_first() {
        assert_eq!(Scheme::PROBE_ORDER, [Scheme::Https, Scheme::Http]);
    }

    #[tokio::test]
    async fn test_no_hosts_is_unreachable() {
        let settings = KubeletSettings::from_lookup(&MapConfig::with_defaults());
        let err = resolve(&[], &settings, Path::new("/nonexistent/token"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unreachable { hosts } if hosts.is_empty()));
    }
}
