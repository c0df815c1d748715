use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use kubelet_util::kubelet::config::{
    AUTH_TOKEN_PATH_KEY, CLIENT_CA_KEY, CLIENT_CRT_KEY, CLIENT_KEY_KEY, HTTP_PORT_KEY,
    HTTPS_PORT_KEY, TLS_VERIFY_KEY,
};
use kubelet_util::{KubeletClient, MapConfig, StaticHosts, is_pod_ready};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Candidate kubelet host, tried in the order given
    #[arg(long = "host", required = true)]
    hosts: Vec<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,

    #[command(flatten)]
    kubelet: KubeletArgs,

    #[command(subcommand)]
    command: Command,
}

/// Kubelet connection settings; unset ones keep their defaults
#[derive(Args, Debug, Default)]
struct KubeletArgs {
    /// Verify the kubelet serving certificate
    #[arg(long, env = "KUBELET_UTIL_KUBELET_TLS_VERIFY")]
    kubelet_tls_verify: Option<bool>,

    /// CA bundle used to verify the kubelet serving certificate
    #[arg(long, env = "KUBELET_UTIL_KUBELET_CLIENT_CA")]
    kubelet_client_ca: Option<String>,

    /// Client certificate presented to the kubelet
    #[arg(long, env = "KUBELET_UTIL_KUBELET_CLIENT_CRT")]
    kubelet_client_crt: Option<String>,

    /// Private key of the client certificate
    #[arg(long, env = "KUBELET_UTIL_KUBELET_CLIENT_KEY")]
    kubelet_client_key: Option<String>,

    /// File holding a bearer token for the kubelet
    #[arg(long, env = "KUBELET_UTIL_KUBELET_AUTH_TOKEN_PATH")]
    kubelet_auth_token_path: Option<String>,

    #[arg(long, env = "KUBELET_UTIL_KUBERNETES_HTTPS_KUBELET_PORT")]
    kubernetes_https_kubelet_port: Option<u16>,

    #[arg(long, env = "KUBELET_UTIL_KUBERNETES_HTTP_KUBELET_PORT")]
    kubernetes_http_kubelet_port: Option<u16>,
}

impl KubeletArgs {
    fn to_config(&self) -> MapConfig {
        let mut config = MapConfig::with_defaults();
        if let Some(verify) = self.kubelet_tls_verify {
            config.set(TLS_VERIFY_KEY, verify);
        }
        let paths = [
            (CLIENT_CA_KEY, &self.kubelet_client_ca),
            (CLIENT_CRT_KEY, &self.kubelet_client_crt),
            (CLIENT_KEY_KEY, &self.kubelet_client_key),
            (AUTH_TOKEN_PATH_KEY, &self.kubelet_auth_token_path),
        ];
        for (key, value) in paths {
            if let Some(value) = value {
                config.set(key, value);
            }
        }
        if let Some(port) = self.kubernetes_https_kubelet_port {
            config.set(HTTPS_PORT_KEY, port);
        }
        if let Some(port) = self.kubernetes_http_kubelet_port {
            config.set(HTTP_PORT_KEY, port);
        }
        config
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the resolved kubelet endpoint
    Endpoint,
    /// Print the url and credentials in use
    ConnectionInfo,
    /// List the node's pods
    Pods {
        /// Skip the cache
        #[arg(long)]
        force: bool,
    },
    /// Print the node's address and name
    NodeInfo,
    Hostname,
    /// Find a single pod
    Pod(PodQuery),
    /// Dump the raw kubelet metrics
    Metrics,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct PodQuery {
    #[arg(long)]
    container_id: Option<String>,
    #[arg(long)]
    uid: Option<String>,
    #[arg(long)]
    entity_id: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    info!("Starting kubelet-util v{}", env!("CARGO_PKG_VERSION"));

    let config = cli.kubelet.to_config();
    let client = KubeletClient::new(
        Arc::new(config),
        Arc::new(StaticHosts::new(cli.hosts)),
    );
    client
        .ensure_ready()
        .await
        .context("cannot reach the kubelet")?;

    match cli.command {
        Command::Endpoint => println!("{}", client.get_kubelet_api_endpoint().await),
        Command::ConnectionInfo => {
            let info: BTreeMap<_, _> =
                client.get_raw_connection_info().await.into_iter().collect();
            for (key, value) in info {
                println!("{key}={value}");
            }
        }
        Command::Pods { force } => {
            let pods = client.get_local_list(force).await?;
            for pod in pods.iter() {
                println!(
                    "{}/{}\t{}\t{}\tready={}",
                    pod.metadata.namespace,
                    pod.metadata.name,
                    pod.metadata.uid,
                    pod.status.phase,
                    is_pod_ready(pod)
                );
            }
        }
        Command::NodeInfo => {
            let node = client.get_node_info().await?;
            println!("{}\t{}", node.node_name, node.host_ip);
        }
        Command::Hostname => println!("{}", client.get_hostname().await?),
        Command::Pod(query) => {
            let pod = match (query.container_id, query.uid, query.entity_id) {
                (Some(id), _, _) => client.get_pod_for_container_id(&id).await?,
                (_, Some(uid), _) => client.get_pod_from_uid(&uid).await?,
                (_, _, Some(entity)) => client.get_pod_for_entity_id(&entity).await?,
                (None, None, None) => {
                    anyhow::bail!("one of --container-id, --uid or --entity-id is required")
                }
            };
            println!("{}", serde_json::to_string_pretty(&pod)?);
        }
        Command::Metrics => {
            let metrics = client.get_raw_metrics().await?;
            std::io::stdout().write_all(&metrics)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubelet_util::ConfigLookup;

    #[test]
    fn test_unset_settings_keep_defaults() {
        let config = KubeletArgs::default().to_config();
        assert!(config.get_bool(TLS_VERIFY_KEY));
        assert_eq!(config.get_int(HTTPS_PORT_KEY), 10250);
        assert_eq!(config.get_int(HTTP_PORT_KEY), 10255);
        assert_eq!(config.get_string(AUTH_TOKEN_PATH_KEY), "");
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "kubelet-util",
            "--host",
            "10.0.0.1",
            "--kubelet-tls-verify",
            "false",
            "--kubelet-auth-token-path",
            "/etc/kubelet/token",
            "--kubernetes-http-kubelet-port",
            "11255",
            "endpoint",
        ])
        .unwrap();

        let config = cli.kubelet.to_config();
        assert!(!config.get_bool(TLS_VERIFY_KEY));
        assert_eq!(config.get_string(AUTH_TOKEN_PATH_KEY), "/etc/kubelet/token");
        assert_eq!(config.get_int(HTTP_PORT_KEY), 11255);
        assert_eq!(config.get_int(HTTPS_PORT_KEY), 10250);
        assert_eq!(cli.hosts, ["10.0.0.1"]);
    }

    #[test]
    fn test_settings_are_documented_with_their_env_vars() {
        use clap::CommandFactory;
        let help = Cli::command().render_long_help().to_string();
        assert!(help.contains("KUBELET_UTIL_KUBELET_TLS_VERIFY"), "{help}");
        assert!(help.contains("KUBELET_UTIL_KUBERNETES_HTTPS_KUBELET_PORT"), "{help}");
    }
}
