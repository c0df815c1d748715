pub mod cache;
pub mod client;
pub mod config;
pub mod hosts;
pub mod lookup;
pub mod pod;
pub mod prober;
pub mod retry;
pub mod tls;

pub use client::KubeletClient;
pub use hosts::{HostProvider, StaticHosts};
pub use lookup::{EntityId, NodeInfo, hostname_provider};
pub use pod::{Pod, is_pod_ready};

/// Inventory path listing every pod bound to the node
pub const KUBELET_POD_PATH: &str = "/pods";

pub const KUBELET_METRICS_PATH: &str = "/metrics";

/// User agent sent on every kubelet request - automatically uses the package version
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
