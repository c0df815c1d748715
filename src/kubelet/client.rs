//! The long-lived kubelet client.
//!
//! Build one [`KubeletClient`] at startup, wrap it in an `Arc` and hand it to
//! every consumer. The first [`KubeletClient::ensure_ready`] call resolves the
//! endpoint; later calls are cheap. Endpoint and credential state only changes
//! while the init lock is held.

use super::cache::{CacheStats, PodListCache};
use super::config::{
    ConfigLookup, DEFAULT_POD_LIST_TTL_SECS, INIT_RETRY_COUNT, INIT_RETRY_DELAY_SECONDS,
    KubeletSettings, SERVICE_ACCOUNT_TOKEN_PATH,
};
use super::hosts::HostProvider;
use super::pod::{Pod, parse_pod_list};
use super::prober::{self, ResolvedEndpoint};
use super::retry::{RetryStatus, Retrier};
use super::tls::{ConnectionInfo, URL_INFO_KEY};
use super::{KUBELET_METRICS_PATH, KUBELET_POD_PATH};
use crate::error::{Error, Result};
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, HeaderMap};
use reqwest::{Client, StatusCode};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, trace};

const RETRIER_NAME: &str = "kubeutil";

/// Resolved connection state; empty until the first successful resolution
#[derive(Debug, Clone, Default)]
pub struct ClientState {
    pub host: String,
    pub endpoint: String,
    pub http: Option<Client>,
    pub headers: HeaderMap,
    pub connection_info: ConnectionInfo,
}

impl From<ResolvedEndpoint> for ClientState {
    fn from(resolved: ResolvedEndpoint) -> Self {
        Self {
            host: resolved.host,
            endpoint: resolved.endpoint,
            http: Some(resolved.transport.client),
            headers: resolved.transport.headers,
            connection_info: resolved.transport.connection_info,
        }
    }
}

pub struct KubeletClient {
    config: Arc<dyn ConfigLookup>,
    hosts: Arc<dyn HostProvider>,
    service_account_token: PathBuf,
    state: RwLock<ClientState>,
    init: Mutex<Retrier>,
    ready: AtomicBool,
    pub(crate) pod_cache: PodListCache,
}

impl KubeletClient {
    #[must_use]
    pub fn new(config: Arc<dyn ConfigLookup>, hosts: Arc<dyn HostProvider>) -> Self {
        Self {
            config,
            hosts,
            service_account_token: PathBuf::from(SERVICE_ACCOUNT_TOKEN_PATH),
            state: RwLock::new(ClientState::default()),
            init: Mutex::new(Retrier::new(
                RETRIER_NAME,
                INIT_RETRY_COUNT,
                Duration::from_secs(INIT_RETRY_DELAY_SECONDS),
            )),
            ready: AtomicBool::new(false),
            pod_cache: PodListCache::new(Duration::from_secs(DEFAULT_POD_LIST_TTL_SECS)),
        }
    }

    #[must_use]
    pub fn with_service_account_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.service_account_token = path.into();
        self
    }

    #[must_use]
    pub fn with_pod_list_ttl(self, ttl: Duration) -> Self {
        self.pod_cache.set_ttl(ttl);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.init = Mutex::new(Retrier::new(RETRIER_NAME, max_attempts, delay));
        self
    }

    /// Resolve the kubelet endpoint unless that already happened.
    ///
    /// Concurrent callers queue on the init lock, so at most one resolution
    /// runs at a time.
    ///
    /// # Errors
    ///
    /// Returns the failed attempt's error, or [`Error::InitFailed`] once the
    /// attempt budget is spent
    pub async fn ensure_ready(&self) -> Result<()> {
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut retrier = self.init.lock().await;
        let result = retrier.trigger(|| self.init_endpoint()).await;
        if retrier.status() == RetryStatus::Succeeded {
            self.ready.store(true, Ordering::Release);
        }
        drop(retrier);

        result.inspect_err(|e| debug!("Init error: {e}"))
    }

    /// [`Self::ensure_ready`], handing back the client for chaining
    ///
    /// # Errors
    ///
    /// See [`Self::ensure_ready`]
    pub async fn ready(&self) -> Result<&Self> {
        self.ensure_ready().await?;
        Ok(self)
    }

    async fn init_endpoint(&self) -> Result<()> {
        let hosts = self.hosts.candidate_hosts().await;
        let settings = KubeletSettings::from_lookup(self.config.as_ref());
        let resolved = prober::resolve(&hosts, &settings, &self.service_account_token).await?;
        *self.state.write().await = ClientState::from(resolved);
        Ok(())
    }

    pub async fn init_status(&self) -> RetryStatus {
        self.init.lock().await.status()
    }

    /// Query `path` on the resolved endpoint; any status code is returned
    ///
    /// # Errors
    ///
    /// Will return `Err` if no endpoint is resolved or the request fails
    pub async fn query_kubelet(&self, path: &str) -> Result<(Bytes, StatusCode)> {
        let (client, headers, url) = {
            let state = self.state.read().await;
            match (&state.http, state.endpoint.is_empty()) {
                (Some(client), false) => (
                    client.clone(),
                    state.headers.clone(),
                    format!("{}{path}", state.endpoint),
                ),
                _ => return Err(Error::NotReady),
            }
        };

        let response = prober::send(&client, &headers, &url)
            .await
            .inspect_err(|e| debug!("Cannot request {url}: {e}"))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .inspect_err(|e| debug!("Fail to read request {url} body: {e}"))?;
        trace!(
            "Successfully connected to {url}, status code: {}, body len: {}",
            status.as_u16(),
            body.len()
        );
        Ok((body, status))
    }

    async fn query_ok(&self, path: &str) -> Result<Bytes> {
        let (body, status) = self.query_kubelet(path).await?;
        if status != StatusCode::OK {
            return Err(Error::HttpStatus {
                status,
                endpoint: self.get_kubelet_api_endpoint().await,
                path: path.to_string(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(body)
    }

    /// The node's pods, from cache when a fresh list is held.
    ///
    /// A failed fetch or parse leaves the cached list untouched.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the kubelet cannot be queried, answers with a
    /// non-200 status or sends a body that is not a pod list
    pub async fn get_local_list(&self, force_refresh: bool) -> Result<Arc<Vec<Pod>>> {
        if !force_refresh {
            if let Some(pods) = self.pod_cache.get().await {
                return Ok(pods);
            }
        }

        let body = self.query_ok(KUBELET_POD_PATH).await?;
        let pods = parse_pod_list(&body)?;
        Ok(self.pod_cache.put(pods).await)
    }

    /// # Errors
    ///
    /// See [`Self::get_local_list`]
    pub async fn get_local_pod_list(&self) -> Result<Arc<Vec<Pod>>> {
        self.get_local_list(false).await
    }

    /// Bypass the cache and fetch a new pod list
    ///
    /// # Errors
    ///
    /// See [`Self::get_local_list`]
    pub async fn force_get_local_pod_list(&self) -> Result<Arc<Vec<Pod>>> {
        self.get_local_list(true).await
    }

    pub fn set_pod_list_cache_duration(&self, ttl: Duration) {
        self.pod_cache.set_ttl(ttl);
    }

    pub async fn reset_cache(&self) {
        self.pod_cache.clear().await;
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.pod_cache.stats().await
    }

    /// The raw `/metrics` payload
    ///
    /// # Errors
    ///
    /// Will return `Err` if the query fails or does not return 200
    pub async fn get_raw_metrics(&self) -> Result<Bytes> {
        self.query_ok(KUBELET_METRICS_PATH).await
    }

    /// `${scheme}://${host}:${port}` of the resolved kubelet, empty before
    /// resolution
    pub async fn get_kubelet_api_endpoint(&self) -> String {
        self.state.read().await.endpoint.clone()
    }

    pub async fn get_kubelet_host(&self) -> String {
        self.state.read().await.host.clone()
    }

    /// URL and credentials in use, for consumers that connect on their own.
    ///
    /// Possible keys: `url`, `verify_tls`, `ca_cert`, `token`, `client_crt`,
    /// `client_key`.
    pub async fn get_raw_connection_info(&self) -> ConnectionInfo {
        let state = self.state.read().await;
        let mut info = state.connection_info.clone();
        info.entry(URL_INFO_KEY.to_string())
            .or_insert_with(|| state.endpoint.clone());
        info
    }

    /// Forget the applied credentials until the next successful resolution.
    ///
    /// Waits for an in-flight resolution to finish first.
    pub async fn reset_credentials(&self) {
        let _init = self.init.lock().await;
        let mut state = self.state.write().await;
        state.headers.remove(AUTHORIZATION);
        state.connection_info.clear();
    }

    /// Back to the never-initialized state: endpoint, credentials, retry
    /// budget and cached pods are all dropped
    pub async fn reset(&self) {
        let mut retrier = self.init.lock().await;
        retrier.reset();
        self.ready.store(false, Ordering::Release);
        *self.state.write().await = ClientState::default();
        self.pod_cache.clear().await;
    }
}
