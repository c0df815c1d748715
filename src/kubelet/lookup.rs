//! Point queries over the node's pod list.
//!
//! Every client lookup first scans the cached list; a miss forces one refresh
//! and scans again before reporting [`Error::NotFound`].

use super::client::KubeletClient;
use super::pod::{KUBE_POD_PREFIX, Pod};
use crate::error::{Error, Result};
use tracing::debug;

/// Address and node assignment of the node the kubelet runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub host_ip: String,
    pub node_name: String,
}

/// An entity identifier resolved to the kind of object it references
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityId<'a> {
    PodUid(&'a str),
    Container(&'a str),
}

impl<'a> EntityId<'a> {
    #[must_use]
    pub fn parse(entity_id: &'a str) -> Self {
        entity_id
            .strip_prefix(KUBE_POD_PREFIX)
            .map_or(Self::Container(entity_id), Self::PodUid)
    }
}

/// # Errors
///
/// [`Error::InvalidInput`] for an empty id, [`Error::NotFound`] on a miss
pub fn search_pod_for_container_id<'a>(pods: &'a [Pod], container_id: &str) -> Result<&'a Pod> {
    if container_id.is_empty() {
        return Err(Error::InvalidInput("containerID is empty".to_string()));
    }
    pods.iter()
        .find(|pod| pod.has_container(container_id))
        .ok_or_else(|| Error::not_found(format!("container {container_id} in PodList")))
}

/// # Errors
///
/// [`Error::InvalidInput`] for an empty uid, [`Error::NotFound`] on a miss
pub fn search_pod_for_uid<'a>(pods: &'a [Pod], uid: &str) -> Result<&'a Pod> {
    if uid.is_empty() {
        return Err(Error::InvalidInput("pod UID is empty".to_string()));
    }
    pods.iter()
        .find(|pod| pod.metadata.uid == uid)
        .ok_or_else(|| Error::not_found(format!("pod uid {uid} in PodList")))
}

/// First pod exposing both a host address and a node assignment
///
/// # Errors
///
/// [`Error::NotFound`] naming the list length when no pod qualifies
pub fn node_info(pods: &[Pod]) -> Result<NodeInfo> {
    pods.iter()
        .find(|pod| !pod.status.host_ip.is_empty() && !pod.spec.node_name.is_empty())
        .map(|pod| NodeInfo {
            host_ip: pod.status.host_ip.clone(),
            node_name: pod.spec.node_name.clone(),
        })
        .ok_or_else(|| {
            Error::not_found(format!("node info in a pod list of length {}", pods.len()))
        })
}

/// Node assignment of the first pod that has one
///
/// # Errors
///
/// [`Error::NotFound`] naming the list length when no pod has a node name
pub fn hostname(pods: &[Pod]) -> Result<String> {
    pods.iter()
        .map(|pod| pod.spec.node_name.as_str())
        .find(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::not_found(format!("hostname in a pod list of length {}", pods.len()))
        })
}

impl KubeletClient {
    async fn find_with_refresh<F>(&self, search: F) -> Result<Pod>
    where
        F: Fn(&[Pod]) -> Result<&Pod>,
    {
        let pods = self.get_local_pod_list().await?;
        match search(pods.as_slice()) {
            Ok(pod) => return Ok(pod.clone()),
            Err(e) if e.is_not_found() => debug!("{e}, retrying without cache..."),
            Err(e) => return Err(e),
        }

        let pods = self.force_get_local_pod_list().await?;
        search(pods.as_slice()).cloned()
    }

    /// Pod running the container with this runtime id
    /// (e.g. `docker://4e5b...`).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] for an empty id without any request,
    /// [`Error::NotFound`] if a refreshed list still lacks it
    pub async fn get_pod_for_container_id(&self, container_id: &str) -> Result<Pod> {
        if container_id.is_empty() {
            return Err(Error::InvalidInput("containerID is empty".to_string()));
        }
        self.find_with_refresh(|pods| search_pod_for_container_id(pods, container_id))
            .await
    }

    /// # Errors
    ///
    /// [`Error::InvalidInput`] for an empty uid without any request,
    /// [`Error::NotFound`] if a refreshed list still lacks it
    pub async fn get_pod_from_uid(&self, uid: &str) -> Result<Pod> {
        if uid.is_empty() {
            return Err(Error::InvalidInput("pod UID is empty".to_string()));
        }
        self.find_with_refresh(|pods| search_pod_for_uid(pods, uid))
            .await
    }

    /// `kubernetes_pod://<uid>` looks up a pod by uid, anything else is taken
    /// as a container id
    ///
    /// # Errors
    ///
    /// See [`Self::get_pod_from_uid`] and [`Self::get_pod_for_container_id`]
    pub async fn get_pod_for_entity_id(&self, entity_id: &str) -> Result<Pod> {
        match EntityId::parse(entity_id) {
            EntityId::PodUid(uid) => self.get_pod_from_uid(uid).await,
            EntityId::Container(id) => self.get_pod_for_container_id(id).await,
        }
    }

    /// # Errors
    ///
    /// Will return `Err` if the pod list cannot be fetched or no pod carries
    /// both fields
    pub async fn get_node_info(&self) -> Result<NodeInfo> {
        let pods = self.get_local_pod_list().await?;
        node_info(&pods)
    }

    /// # Errors
    ///
    /// Will return `Err` if the pod list cannot be fetched or no pod has a
    /// node name
    pub async fn get_hostname(&self) -> Result<String> {
        let pods = self.get_local_pod_list().await?;
        hostname(&pods)
    }
}

/// Hostname hook for host-alias discovery: resolves the endpoint if needed,
/// then reads the node name from the pod list
///
/// # Errors
///
/// Will return `Err` if the client cannot be readied or the hostname lookup
/// fails
pub async fn hostname_provider(client: &KubeletClient) -> Result<String> {
    client.ready().await?.get_hostname().await
}
