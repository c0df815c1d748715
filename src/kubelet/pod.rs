//! The subset of the kubelet `/pods` payload the client inspects.
//!
//! Unknown fields are ignored and missing or `null` fields fall back to their
//! empty value, so a partially populated pod never fails the whole list.

use crate::error::Result;
use serde::{Deserialize, Deserializer, Serialize};

/// Prefix marking an entity identifier as a pod reference
pub const KUBE_POD_PREFIX: &str = "kubernetes_pod://";

pub const RUNNING_PHASE: &str = "Running";
pub const READY_CONDITION: &str = "Ready";

fn null_as_default<'de, D, T>(deserializer: D) -> core::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodList {
    #[serde(deserialize_with = "null_as_default")]
    pub items: Vec<Pod>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pod {
    #[serde(deserialize_with = "null_as_default")]
    pub metadata: PodMetadata,
    #[serde(deserialize_with = "null_as_default")]
    pub spec: PodSpec,
    #[serde(deserialize_with = "null_as_default")]
    pub status: PodStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodMetadata {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub namespace: String,
    #[serde(deserialize_with = "null_as_default")]
    pub uid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodSpec {
    #[serde(rename = "nodeName", deserialize_with = "null_as_default")]
    pub node_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodStatus {
    #[serde(rename = "hostIP", deserialize_with = "null_as_default")]
    pub host_ip: String,
    #[serde(rename = "podIP", deserialize_with = "null_as_default")]
    pub pod_ip: String,
    #[serde(deserialize_with = "null_as_default")]
    pub phase: String,
    #[serde(deserialize_with = "null_as_default")]
    pub conditions: Vec<PodCondition>,
    #[serde(rename = "containerStatuses", deserialize_with = "null_as_default")]
    pub containers: Vec<ContainerStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodCondition {
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub condition_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerStatus {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "containerID", deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub image: String,
    #[serde(deserialize_with = "null_as_default")]
    pub ready: bool,
}

impl Pod {
    #[must_use]
    pub fn has_container(&self, container_id: &str) -> bool {
        self.status.containers.iter().any(|c| c.id == container_id)
    }
}

/// Parse a `/pods` response body.
///
/// # Errors
///
/// Will return `Err` if the body is not a JSON pod list
pub fn parse_pod_list(data: &[u8]) -> Result<Vec<Pod>> {
    let list: PodList = serde_json::from_slice(data)?;
    Ok(list.items)
}

/// A pod is ready when it is running and its `Ready` condition is `True`
#[must_use]
pub fn is_pod_ready(pod: &Pod) -> bool {
    if pod.status.phase != RUNNING_PHASE {
        return false;
    }
    pod.status
        .conditions
        .iter()
        .any(|c| c.condition_type == READY_CONDITION && c.status == "True")
}
