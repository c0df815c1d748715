use async_trait::async_trait;

/// Source of candidate kubelet addresses, tried in order
#[async_trait]
pub trait HostProvider: Send + Sync {
    async fn candidate_hosts(&self) -> Vec<String>;
}

/// A fixed candidate list
#[derive(Debug, Clone, Default)]
pub struct StaticHosts(pub Vec<String>);

impl StaticHosts {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(hosts.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl HostProvider for StaticHosts {
    async fn candidate_hosts(&self) -> Vec<String> {
        self.0.clone()
    }
}
