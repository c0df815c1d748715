/**
 * Configuration keys, defaults and the lookup seam for the kubelet client
 */
use std::collections::HashMap;
use tracing::warn;

/// Verify the kubelet serving certificate
pub const TLS_VERIFY_KEY: &str = "kubelet_tls_verify";
/// CA bundle used to verify the kubelet serving certificate
pub const CLIENT_CA_KEY: &str = "kubelet_client_ca";
/// Client certificate presented to the kubelet
pub const CLIENT_CRT_KEY: &str = "kubelet_client_crt";
/// Private key of the client certificate
pub const CLIENT_KEY_KEY: &str = "kubelet_client_key";
/// File holding a bearer token for the kubelet
pub const AUTH_TOKEN_PATH_KEY: &str = "kubelet_auth_token_path";
pub const HTTPS_PORT_KEY: &str = "kubernetes_https_kubelet_port";
pub const HTTP_PORT_KEY: &str = "kubernetes_http_kubelet_port";

pub const DEFAULT_HTTPS_PORT: u16 = 10250;
pub const DEFAULT_HTTP_PORT: u16 = 10255;

/// Socket timeout applied to every kubelet request
pub const REQUEST_TIMEOUT_SECONDS: u64 = 1;

/// How long a fetched pod list is served without asking the kubelet again
pub const DEFAULT_POD_LIST_TTL_SECS: u64 = 10;

/// Endpoint resolution attempts before initialization gives up for good
pub const INIT_RETRY_COUNT: u32 = 10;

/// Advertised delay between two initialization attempts
pub const INIT_RETRY_DELAY_SECONDS: u64 = 30;

/// Token mounted into every pod running with a service account
pub const SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

const _: () = {
    assert!(REQUEST_TIMEOUT_SECONDS > 0, "REQUEST_TIMEOUT_SECONDS must be greater than 0");
    assert!(INIT_RETRY_COUNT > 0, "INIT_RETRY_COUNT must be greater than 0");
    assert!(INIT_RETRY_DELAY_SECONDS > 0, "INIT_RETRY_DELAY_SECONDS must be greater than 0");
    assert!(DEFAULT_HTTPS_PORT != DEFAULT_HTTP_PORT, "kubelet ports must differ");
};

/// Read-only typed view over the process configuration.
///
/// Missing keys read as zero values (`false`, `""`, `0`).
pub trait ConfigLookup: Send + Sync {
    fn get_bool(&self, key: &str) -> bool;
    fn get_string(&self, key: &str) -> String;
    fn get_int(&self, key: &str) -> i64;
}

/// In-memory configuration, stored as strings and parsed on read
#[derive(Debug, Clone, Default)]
pub struct MapConfig {
    values: HashMap<String, String>,
}

impl MapConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration holding the kubelet defaults
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new()
            .with(TLS_VERIFY_KEY, true)
            .with(CLIENT_CA_KEY, "")
            .with(CLIENT_CRT_KEY, "")
            .with(CLIENT_KEY_KEY, "")
            .with(AUTH_TOKEN_PATH_KEY, "")
            .with(HTTPS_PORT_KEY, DEFAULT_HTTPS_PORT)
            .with(HTTP_PORT_KEY, DEFAULT_HTTP_PORT)
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl ToString) -> &mut Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }
}

impl ConfigLookup for MapConfig {
    fn get_bool(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            )
        })
    }

    fn get_string(&self, key: &str) -> String {
        self.values.get(key).cloned().unwrap_or_default()
    }

    fn get_int(&self, key: &str) -> i64 {
        self.values.get(key).map_or(0, |v| {
            v.trim().parse().unwrap_or_else(|_| {
                warn!("Invalid integer {v:?} for config key {key}, using 0");
                0
            })
        })
    }
}

/// Snapshot of every setting the negotiator and prober read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeletSettings {
    pub tls_verify: bool,
    pub ca_path: String,
    pub client_crt: String,
    pub client_key: String,
    pub token_path: String,
    pub https_port: u16,
    pub http_port: u16,
}

impl KubeletSettings {
    #[must_use]
    pub fn from_lookup(config: &dyn ConfigLookup) -> Self {
        Self {
            tls_verify: config.get_bool(TLS_VERIFY_KEY),
            ca_path: config.get_string(CLIENT_CA_KEY),
            client_crt: config.get_string(CLIENT_CRT_KEY),
            client_key: config.get_string(CLIENT_KEY_KEY),
            token_path: config.get_string(AUTH_TOKEN_PATH_KEY),
            https_port: port(config, HTTPS_PORT_KEY, DEFAULT_HTTPS_PORT),
            http_port: port(config, HTTP_PORT_KEY, DEFAULT_HTTP_PORT),
        }
    }

    #[must_use]
    pub fn is_certificates_configured(&self) -> bool {
        !self.client_crt.is_empty() && !self.client_key.is_empty()
    }

    #[must_use]
    pub fn is_token_path_configured(&self) -> bool {
        !self.token_path.is_empty()
    }
}

fn port(config: &dyn ConfigLookup, key: &str, default: u16) -> u16 {
    let raw = config.get_int(key);
    u16::try_from(raw)
        .ok()
        .filter(|p| *p != 0)
        .unwrap_or_else(|| {
            warn!("Invalid port {raw} for {key}, using {default}");
            default
        })
}
