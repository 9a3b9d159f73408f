use anyhow::{Context, Result, anyhow};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::time::Duration;
use tracing::debug;

/// Timeout for connecting to K8s API
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for reading K8s API responses
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a client from the kubeconfig named by `KUBECONFIG`
///
/// Uses `context` when given, otherwise the kubeconfig's current-context.
pub async fn connect(context: Option<&str>) -> Result<Client> {
    let kubeconfig = Kubeconfig::read()?;

    let context_name = context
        .map(String::from)
        .or_else(|| kubeconfig.current_context.clone())
        .ok_or_else(|| anyhow!("No context specified and no current context in kubeconfig"))?;

    // Verify context exists
    if !kubeconfig.contexts.iter().any(|c| c.name == context_name) {
        return Err(anyhow!(
            "Context '{}' not found in kubeconfig",
            context_name
        ));
    }

    let mut config = Config::from_custom_kubeconfig(
        kubeconfig,
        &KubeConfigOptions {
            context: Some(context_name.clone()),
            ..Default::default()
        },
    )
    .await
    .with_context(|| format!("Failed to load kubeconfig for context '{}'", context_name))?;

    config.connect_timeout = Some(CONNECT_TIMEOUT);
    config.read_timeout = Some(READ_TIMEOUT);

    debug!(context = %context_name, cluster = %config.cluster_url, "Connecting to cluster");

    Client::try_from(config)
        .with_context(|| format!("Failed to create client for context '{}'", context_name))
}
