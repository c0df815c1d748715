pub mod error;
pub mod kubelet;

pub use error::{Error, Result};
pub use kubelet::config::{ConfigLookup, MapConfig};
pub use kubelet::{
    EntityId, HostProvider, KubeletClient, NodeInfo, Pod, StaticHosts, hostname_provider,
    is_pod_ready,
};
