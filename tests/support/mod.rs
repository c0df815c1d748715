//! In-process fake kubelet: one TLS listener and one plain listener sharing
//! the same routes, recording every request they receive.

#![allow(dead_code)]

use axum::Router;
use axum::extract::Request;
use axum::http::{HeaderName, StatusCode};
use axum::http::header::{AUTHORIZATION, HOST};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HyperAcceptor;
use hyper_util::service::TowerToHyperService;
use kubelet_util::kubelet::config::{HTTP_PORT_KEY, HTTPS_PORT_KEY, TLS_VERIFY_KEY};
use kubelet_util::{KubeletClient, MapConfig, StaticHosts};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

pub const METRICS_BODY: &str = "# TYPE kubelet_running_pods gauge\nkubelet_running_pods 2\n";

/// Service account token location that never exists on the test machine
pub const NO_SERVICE_ACCOUNT: &str = "/nonexistent/kubelet-util/serviceaccount/token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub scheme: &'static str,
    pub host: String,
    pub path: String,
    pub authorization: Option<String>,
}

struct FakeState {
    hits: Mutex<Vec<Hit>>,
    https_pods_status: AtomicU16,
    pods_status: AtomicU16,
    pods_body: Mutex<String>,
}

pub struct FakeKubelet {
    pub https_port: u16,
    pub http_port: u16,
    pub cert_pem: String,
    state: Arc<FakeState>,
}

impl FakeKubelet {
    /// Serve both schemes
    pub async fn start() -> Self {
        let state = Self::state();
        let (https_port, cert_pem) = serve_tls(router(state.clone(), "https")).await;
        let http_port = serve_plain(router(state.clone(), "http")).await;
        Self {
            https_port,
            http_port,
            cert_pem,
            state,
        }
    }

    /// Serve plain HTTP only, the HTTPS port refuses connections
    pub async fn http_only() -> Self {
        let state = Self::state();
        let http_port = serve_plain(router(state.clone(), "http")).await;
        Self {
            https_port: closed_port().await,
            http_port,
            cert_pem: String::new(),
            state,
        }
    }

    fn state() -> Arc<FakeState> {
        Arc::new(FakeState {
            hits: Mutex::new(Vec::new()),
            https_pods_status: AtomicU16::new(200),
            pods_status: AtomicU16::new(200),
            pods_body: Mutex::new(pod_list(&[]).to_string()),
        })
    }

    /// Defaults pointing at this fake, with certificate verification off
    pub fn config(&self) -> MapConfig {
        MapConfig::with_defaults()
            .with(HTTPS_PORT_KEY, self.https_port)
            .with(HTTP_PORT_KEY, self.http_port)
            .with(TLS_VERIFY_KEY, false)
    }

    pub fn client(&self, config: MapConfig, hosts: &[&str]) -> KubeletClient {
        KubeletClient::new(
            Arc::new(config),
            Arc::new(StaticHosts::new(hosts.iter().copied())),
        )
        .with_service_account_token_path(NO_SERVICE_ACCOUNT)
    }

    pub fn set_https_pods_status(&self, status: u16) {
        self.state.https_pods_status.store(status, Ordering::SeqCst);
    }

    pub fn set_pods_status(&self, status: u16) {
        self.state.pods_status.store(status, Ordering::SeqCst);
    }

    pub fn set_pods(&self, pods: &[Value]) {
        self.set_pods_body(pod_list(pods).to_string());
    }

    pub fn set_pods_body(&self, body: impl Into<String>) {
        *self.state.pods_body.lock().unwrap() = body.into();
    }

    pub fn hits(&self) -> Vec<Hit> {
        self.state.hits.lock().unwrap().clone()
    }

    pub fn count(&self, scheme: &str, path: &str) -> usize {
        self.hits()
            .iter()
            .filter(|h| h.scheme == scheme && h.path == path)
            .count()
    }
}

fn router(state: Arc<FakeState>, scheme: &'static str) -> Router {
    Router::new().fallback(move |req: Request| {
        let state = state.clone();
        async move { handle(&state, scheme, &req) }
    })
}

fn handle(state: &FakeState, scheme: &'static str, req: &Request) -> (StatusCode, String) {
    let header = |name: HeaderName| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let path = req.uri().path().to_string();
    state.hits.lock().unwrap().push(Hit {
        scheme,
        host: header(HOST).unwrap_or_default(),
        path: path.clone(),
        authorization: header(AUTHORIZATION),
    });

    match path.as_str() {
        "/pods" => {
            let status = if scheme == "https" {
                state.https_pods_status.load(Ordering::SeqCst)
            } else {
                state.pods_status.load(Ordering::SeqCst)
            };
            let status = StatusCode::from_u16(status).unwrap();
            let body = if status == StatusCode::OK {
                state.pods_body.lock().unwrap().clone()
            } else {
                status.canonical_reason().unwrap_or_default().to_string()
            };
            (status, body)
        }
        "/metrics" => (StatusCode::OK, METRICS_BODY.to_string()),
        _ => (StatusCode::NOT_FOUND, "404 page not found".to_string()),
    }
}

async fn serve_plain(router: Router) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    port
}

async fn serve_tls(router: Router) -> (u16, String) {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string(), "127.0.0.1".to_string()])
            .unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    let chain: Vec<CertificateDer<'static>> = vec![cert.der().clone()];

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::aws_lc_rs::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(chain, key)
    .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                continue;
            };
            let acceptor = acceptor.clone();
            let router = router.clone();
            tokio::spawn(async move {
                // handshakes rejected by a verifying client end here
                let Ok(tls_stream) = acceptor.accept(stream).await else {
                    return;
                };
                let _ = HyperAcceptor::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(tls_stream), TowerToHyperService::new(router))
                    .await;
            });
        }
    });
    (port, cert.pem())
}

/// A port nothing listens on
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub fn pod_list(pods: &[Value]) -> Value {
    json!({ "kind": "PodList", "apiVersion": "v1", "items": pods })
}

pub fn pod(uid: &str, node: &str, host_ip: &str, containers: &[&str]) -> Value {
    json!({
        "metadata": { "name": format!("pod-{uid}"), "namespace": "default", "uid": uid },
        "spec": { "nodeName": node },
        "status": {
            "phase": "Running",
            "hostIP": host_ip,
            "conditions": [{ "type": "Ready", "status": "True" }],
            "containerStatuses": containers
                .iter()
                .map(|id| {
                    json!({ "name": "app", "containerID": id, "image": "nginx", "ready": true })
                })
                .collect::<Vec<_>>(),
        }
    })
}

pub fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path.display().to_string()
}
