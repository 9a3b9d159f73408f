// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Tunnel lifecycle: list, initialize, connect and destroy
//!
//! `connect` is a strict sequence: resolve node, check namespace, create
//! Role, RoleBinding and relay Pod, wait for the pod, then hand over to the
//! relay session. Everything from the first create onwards runs under the
//! relay controller's cleanup guard.

use k8s_openapi::api::core::v1::Pod;
use kube::Resource;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::pty::ShellExit;
use super::readiness::{Delay, Readiness, ReadinessPoller};
use super::relay::{RelaySessionController, log_delete};
use crate::config::Settings;
use crate::error::{TunnelError, TunnelResult};
use crate::kubernetes::nodes::node_refs;
use crate::kubernetes::{ClusterGateway, CreateOutcome, DeleteOutcome, NodeRef, NodeSelector, resources};
use crate::progress::create_spinner;
use crate::session::SessionIdentity;

/// Phase reported for pods whose status is not populated yet
const UNKNOWN_PHASE: &str = "Unknown";

pub struct TunnelManager {
    gateway: Arc<dyn ClusterGateway>,
    relay: RelaySessionController,
    identity: SessionIdentity,
    settings: Settings,
    delay: Arc<dyn Delay>,
}

impl TunnelManager {
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        relay: RelaySessionController,
        identity: SessionIdentity,
        settings: Settings,
        delay: Arc<dyn Delay>,
    ) -> Self {
        Self {
            gateway,
            relay,
            identity,
            settings,
            delay,
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Current nodes in the order the API lists them
    pub async fn list(&self) -> TunnelResult<Vec<NodeRef>> {
        let nodes = self.gateway.list_nodes().await?;
        Ok(node_refs(&nodes))
    }

    /// Create the session namespace; a no-op if it exists
    pub async fn initialize(&self) -> TunnelResult<CreateOutcome> {
        let ns = self.identity.namespace();
        let outcome = self
            .gateway
            .create_namespace(&resources::namespace(ns))
            .await?;
        match outcome {
            CreateOutcome::Created => info!(namespace = %ns, "Created namespace"),
            CreateOutcome::AlreadyExists => info!(namespace = %ns, "Namespace already exists"),
        }
        Ok(outcome)
    }

    /// Open an interactive shell on the selected node
    ///
    /// Returns once the session ends. The relay pod and RBAC pair are deleted
    /// on every path once creation has started, including when `shutdown`
    /// fires.
    pub async fn connect<S>(&self, selector: &NodeSelector, shutdown: S) -> TunnelResult<ShellExit>
    where
        S: Future<Output = ()>,
    {
        let nodes = self.list().await?;
        let node = selector
            .resolve(&nodes)
            .cloned()
            .ok_or_else(|| TunnelError::NodeNotFound {
                selector: selector.to_string(),
                available: nodes.clone(),
            })?;
        debug!(node = %node.name, address = %node.address, "Resolved node");

        self.require_namespace().await?;

        info!(pod = %self.identity.service_name(), "Assigning pod");
        let session = async {
            self.provision(&node).await?;
            self.await_relay().await?;
            self.relay.attach(&self.identity).await
        };
        self.relay.guarded(&self.identity, session, shutdown).await
    }

    /// Delete every pod, Role and RoleBinding in the namespace, then the
    /// namespace itself
    ///
    /// Only the namespace deletion can fail the operation.
    pub async fn destroy(&self) -> TunnelResult<DeleteOutcome> {
        let ns = self.identity.namespace();

        info!(namespace = %ns, "Deleting pods");
        match self.gateway.list_pods(ns).await {
            Ok(pods) => {
                for name in pods.iter().filter_map(object_name) {
                    self.delete_pod_and_wait(&name).await;
                }
            }
            Err(e) => warn!(error = %e, "Failed to list pods"),
        }

        info!(namespace = %ns, "Deleting roles");
        match self.gateway.list_roles(ns).await {
            Ok(roles) => {
                for name in roles.iter().filter_map(object_name) {
                    info!(role = %name, "Deleting role");
                    log_delete("role", &name, self.gateway.delete_role(ns, &name).await);
                }
            }
            Err(e) => warn!(error = %e, "Failed to list roles"),
        }

        info!(namespace = %ns, "Deleting role bindings");
        match self.gateway.list_role_bindings(ns).await {
            Ok(bindings) => {
                for name in bindings.iter().filter_map(object_name) {
                    info!(role_binding = %name, "Deleting role binding");
                    log_delete(
                        "role binding",
                        &name,
                        self.gateway.delete_role_binding(ns, &name).await,
                    );
                }
            }
            Err(e) => warn!(error = %e, "Failed to list role bindings"),
        }

        info!(namespace = %ns, "Deleting namespace");
        Ok(self.gateway.delete_namespace(ns).await?)
    }

    async fn require_namespace(&self) -> TunnelResult<()> {
        let ns = self.identity.namespace();
        match self.gateway.read_namespace(ns).await? {
            Some(_) => Ok(()),
            None => Err(TunnelError::NotInitialized {
                namespace: ns.to_string(),
            }),
        }
    }

    /// Create Role, RoleBinding and Pod in that order
    async fn provision(&self, node: &NodeRef) -> TunnelResult<()> {
        let ns = self.identity.namespace();

        let outcome = self
            .gateway
            .create_role(ns, &resources::role(&self.identity, &self.settings))
            .await?;
        debug!(outcome = ?outcome, "Role");

        let outcome = self
            .gateway
            .create_role_binding(ns, &resources::role_binding(&self.identity))
            .await?;
        debug!(outcome = ?outcome, "RoleBinding");

        let pod = resources::relay_pod(&self.identity, &self.settings, node);
        let outcome = self.gateway.create_pod(ns, &pod).await?;
        debug!(outcome = ?outcome, "Pod");

        info!("Pod created, waiting to be ready...");
        Ok(())
    }

    /// Poll the relay pod; an exhausted poll only fails in strict mode
    async fn await_relay(&self) -> TunnelResult<()> {
        let ns = self.identity.namespace();
        let name = self.identity.service_name();
        let poller = ReadinessPoller::new(
            self.settings.readiness_attempts,
            self.settings.readiness_interval(),
        );

        let gateway = self.gateway.as_ref();
        let spinner = create_spinner("Waiting for relay pod...");
        let readiness = poller
            .wait(
                move || async move {
                    let pod = gateway.read_pod(ns, name).await?;
                    Ok::<_, TunnelError>(pod.map(|p| phase(&p)))
                },
                self.delay.as_ref(),
                |obs| {
                    spinner.suspend(|| info!("Pod status is: [{}]", obs.phase));
                    spinner.set_message(format!(
                        "Waiting for relay pod... [{}] ({}/{})",
                        obs.phase, obs.attempt, obs.max_attempts
                    ));
                },
            )
            .await;
        spinner.finish_and_clear();

        let attempts = match readiness? {
            Readiness::Running { .. } => return Ok(()),
            Readiness::Exhausted { attempts, last_phase } => {
                warn!(pod = %name, attempts, phase = %last_phase, "Pod not running, continuing anyway");
                attempts
            }
            Readiness::Missing { attempts } => {
                warn!(pod = %name, "Pod disappeared while waiting");
                attempts
            }
        };

        if self.settings.strict_readiness {
            return Err(TunnelError::RelayNotReady {
                pod: name.to_string(),
                attempts,
            });
        }
        Ok(())
    }

    /// Delete a pod and wait until it is gone
    async fn delete_pod_and_wait(&self, name: &str) {
        let ns = self.identity.namespace();
        info!(pod = %name, "Deleting pod");
        match self.gateway.delete_pod(ns, name).await {
            Ok(DeleteOutcome::Deleted) => {}
            Ok(DeleteOutcome::AlreadyAbsent) => return,
            Err(e) => {
                warn!(pod = %name, error = %e, "Failed to delete pod");
                return;
            }
        }

        let attempts = self.settings.readiness_attempts.max(1);
        for attempt in 1..=attempts {
            match self.gateway.read_pod(ns, name).await {
                Ok(None) => return,
                Ok(Some(_)) => debug!(pod = %name, attempt, "Pod still terminating"),
                Err(e) => warn!(pod = %name, error = %e, "Failed to read pod"),
            }
            if attempt < attempts {
                self.delay.sleep(self.settings.readiness_interval()).await;
            }
        }
        warn!(pod = %name, "Pod still present after waiting");
    }
}

fn phase(pod: &Pod) -> String {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.clone())
        .unwrap_or_else(|| UNKNOWN_PHASE.to_string())
}

fn object_name<K: Resource>(obj: &K) -> Option<String> {
    obj.meta().name.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::fake::FakeGateway;
    use crate::kubernetes::nodes::test_node;
    use crate::tunnel::readiness::tests::RecordingDelay;
    use crate::tunnel::relay::tests::{FakeForwarder, Script, ScriptedShell, relay_settings};
    use std::sync::atomic::Ordering;

    const NS: &str = "tunneling";
    const POD: &str = "tunneling-test0001";

    struct Harness {
        gateway: Arc<FakeGateway>,
        shell: Arc<ScriptedShell>,
        delay: Arc<RecordingDelay>,
        manager: TunnelManager,
    }

    fn harness_with(shell: ScriptedShell, settings: Settings) -> Harness {
        let gateway = Arc::new(FakeGateway::with_nodes(vec![
            test_node("worker-a", Some("10.0.0.1")),
            test_node("worker-b", Some("10.0.0.2")),
        ]));
        let shell = Arc::new(shell);
        let delay = Arc::new(RecordingDelay::default());
        let relay = RelaySessionController::new(
            gateway.clone(),
            Arc::new(FakeForwarder::default()),
            shell.clone(),
            delay.clone(),
            relay_settings(),
        );
        let identity = SessionIdentity::with_suffix(NS, "tunneling", "test0001");
        let manager =
            TunnelManager::new(gateway.clone(), relay, identity, settings, delay.clone());
        Harness {
            gateway,
            shell,
            delay,
            manager,
        }
    }

    fn harness() -> Harness {
        harness_with(ScriptedShell::new(Script::Exit(0)), Settings::default())
    }

    fn count(gateway: &FakeGateway, op: &str) -> usize {
        gateway.calls().iter().filter(|c| *c == op).count()
    }

    fn creates(gateway: &FakeGateway) -> Vec<String> {
        gateway
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("create_"))
            .collect()
    }

    #[tokio::test]
    async fn test_list_keeps_api_order() {
        let h = harness();
        let nodes = h.manager.list().await.unwrap();
        let names: Vec<_> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["worker-a", "worker-b"]);
        assert!(creates(&h.gateway).is_empty());
    }

    #[tokio::test]
    async fn test_initialize_twice() {
        let h = harness();
        assert_eq!(h.manager.initialize().await.unwrap(), CreateOutcome::Created);
        assert_eq!(
            h.manager.initialize().await.unwrap(),
            CreateOutcome::AlreadyExists
        );
        assert!(h.gateway.has_namespace(NS));
    }

    #[tokio::test]
    async fn test_connect_by_ordinal() {
        let h = harness();
        h.gateway.add_namespace(NS);
        h.gateway.set_phases(&["Pending", "Pending", "Running"]);
        // Keep the pod around to inspect it
        h.gateway.fail("delete_pod");

        h.manager
            .connect(&NodeSelector::parse("2"), std::future::pending())
            .await
            .unwrap();

        let pod = h.gateway.pod(NS, POD).unwrap();
        let args = pod.spec.unwrap().containers[0].args.clone().unwrap();
        assert_eq!(args[1], "tcp:10.0.0.2:22");

        let calls = h.gateway.calls();
        assert_eq!(
            creates(&h.gateway),
            vec!["create_role", "create_role_binding", "create_pod"]
        );
        assert_eq!(calls.iter().filter(|c| *c == "read_pod").count(), 3);
        assert_eq!(h.shell.attached.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_leaves_only_namespace() {
        let h = harness();
        h.gateway.add_namespace(NS);

        h.manager
            .connect(&NodeSelector::parse("worker-a"), std::future::pending())
            .await
            .unwrap();

        assert!(h.gateway.has_namespace(NS));
        assert!(h.gateway.pod_names(NS).is_empty());
        assert!(h.gateway.role_names(NS).is_empty());
        assert!(h.gateway.role_binding_names(NS).is_empty());
    }

    #[tokio::test]
    async fn test_connect_unknown_node_creates_nothing() {
        let h = harness();
        h.gateway.add_namespace(NS);

        for token in ["0", "3", "worker-z"] {
            let err = h
                .manager
                .connect(&NodeSelector::parse(token), std::future::pending())
                .await
                .unwrap_err();
            match err {
                TunnelError::NodeNotFound { selector, available } => {
                    assert_eq!(selector, token);
                    assert_eq!(available.len(), 2);
                }
                other => panic!("unexpected error: {}", other),
            }
        }
        assert!(creates(&h.gateway).is_empty());
        assert_eq!(h.shell.attached.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connect_requires_namespace() {
        let h = harness();
        let err = h
            .manager
            .connect(&NodeSelector::parse("1"), std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::NotInitialized { ref namespace } if namespace == NS));
        assert!(creates(&h.gateway).is_empty());
    }

    #[tokio::test]
    async fn test_provision_is_idempotent() {
        let h = harness();
        h.gateway.add_namespace(NS);
        h.gateway.add_role(NS, POD);
        let node = NodeRef {
            name: "worker-a".to_string(),
            address: "10.0.0.1".to_string(),
        };

        h.manager.provision(&node).await.unwrap();
        h.manager.provision(&node).await.unwrap();

        assert_eq!(h.gateway.role_names(NS), vec![POD]);
        assert_eq!(h.gateway.role_binding_names(NS), vec![POD]);
        assert_eq!(h.gateway.pod_names(NS), vec![POD]);
        // The pre-existing role was left untouched
        assert!(h.gateway.role(NS, POD).unwrap().rules.is_none());
    }

    #[tokio::test]
    async fn test_provision_failure_aborts_sequence() {
        let h = harness();
        h.gateway.add_namespace(NS);
        h.gateway.fail("create_role_binding");

        let err = h
            .manager
            .connect(&NodeSelector::parse("1"), std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::Kube(_)));
        assert!(!h.gateway.calls().contains(&"create_pod".to_string()));
        // Cleanup still ran
        assert!(h.gateway.role_names(NS).is_empty());
        assert_eq!(h.shell.attached.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connect_interrupted_removes_pod() {
        let (shell, signal) = ScriptedShell::interrupting();
        let h = harness_with(shell, Settings::default());
        h.gateway.add_namespace(NS);

        let shutdown = async {
            let _ = signal.await;
        };
        let err = h
            .manager
            .connect(&NodeSelector::parse("1"), shutdown)
            .await
            .unwrap_err();

        assert!(matches!(err, TunnelError::Interrupted));
        assert!(h.shell.aborted.load(Ordering::SeqCst));
        assert!(h.gateway.pod_names(NS).is_empty());
        assert!(h.gateway.role_names(NS).is_empty());
    }

    #[tokio::test]
    async fn test_connect_shell_failure_removes_pod() {
        let h = harness_with(ScriptedShell::new(Script::Fail), Settings::default());
        h.gateway.add_namespace(NS);

        let result = h
            .manager
            .connect(&NodeSelector::parse("1"), std::future::pending())
            .await;
        assert!(matches!(result, Err(TunnelError::Terminal(_))));
        assert!(h.gateway.pod_names(NS).is_empty());
    }

    #[tokio::test]
    async fn test_unready_relay_still_attaches() {
        let settings = Settings {
            readiness_attempts: 3,
            ..Settings::default()
        };
        let h = harness_with(ScriptedShell::new(Script::Exit(0)), settings);
        h.gateway.add_namespace(NS);
        h.gateway.set_phases(&["Pending"]);

        h.manager
            .connect(&NodeSelector::parse("1"), std::future::pending())
            .await
            .unwrap();
        let reads = h.gateway.calls().iter().filter(|c| *c == "read_pod").count();
        assert_eq!(reads, 3);
        assert_eq!(h.shell.attached.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_strict_readiness_fails_and_cleans_up() {
        let settings = Settings {
            readiness_attempts: 3,
            strict_readiness: true,
            ..Settings::default()
        };
        let h = harness_with(ScriptedShell::new(Script::Exit(0)), settings);
        h.gateway.add_namespace(NS);
        h.gateway.set_phases(&["Pending"]);

        let err = h
            .manager
            .connect(&NodeSelector::parse("1"), std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::RelayNotReady { attempts: 3, .. }));
        assert_eq!(h.shell.attached.load(Ordering::SeqCst), 0);
        assert!(h.gateway.pod_names(NS).is_empty());
    }

    #[tokio::test]
    async fn test_destroy_mixed_presence() {
        let h = harness();
        h.gateway.add_namespace(NS);
        h.gateway.add_pod(NS, "tunneling-aaaa");
        h.gateway.add_pod(NS, "tunneling-bbbb");
        h.gateway.add_role(NS, "tunneling-aaaa");
        // No role bindings at all

        let outcome = h.manager.destroy().await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted);
        assert!(h.gateway.pod_names(NS).is_empty());
        assert!(h.gateway.role_names(NS).is_empty());
        assert!(h.gateway.role_binding_names(NS).is_empty());
        assert!(!h.gateway.has_namespace(NS));

        let deletes: Vec<String> = h
            .gateway
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("delete_"))
            .collect();
        assert_eq!(
            deletes,
            vec!["delete_pod", "delete_pod", "delete_role", "delete_namespace"]
        );
    }

    #[tokio::test]
    async fn test_destroy_sweeps_before_namespace() {
        let h = harness();
        h.gateway.add_namespace(NS);
        h.gateway.add_pod(NS, "tunneling-aaaa");
        h.gateway.add_role(NS, "tunneling-aaaa");
        h.gateway.add_role_binding(NS, "tunneling-aaaa");
        h.gateway.add_role_binding(NS, "tunneling-bbbb");

        h.manager.destroy().await.unwrap();

        let calls = h.gateway.calls();
        let position = |op: &str| calls.iter().rposition(|c| c == op).unwrap();
        assert!(position("delete_pod") < position("delete_role"));
        assert!(position("delete_role") < position("delete_role_binding"));
        assert!(position("delete_role_binding") < position("delete_namespace"));
        assert_eq!(count(&h.gateway, "delete_role_binding"), 2);
        assert!(h.gateway.role_binding_names(NS).is_empty());
    }

    #[tokio::test]
    async fn test_destroy_waits_for_terminating_pod() {
        let h = harness();
        h.gateway.add_namespace(NS);
        h.gateway.add_pod(NS, "tunneling-aaaa");
        h.gateway.set_terminating_reads(2);

        h.manager.destroy().await.unwrap();

        // Two reads still see the pod, the third finds it gone
        assert_eq!(count(&h.gateway, "read_pod"), 3);
        assert_eq!(h.delay.sleeps.load(Ordering::SeqCst), 2);
        assert!(!h.gateway.has_namespace(NS));
    }

    #[tokio::test]
    async fn test_destroy_pod_wait_is_bounded() {
        let settings = Settings {
            readiness_attempts: 4,
            ..Settings::default()
        };
        let h = harness_with(ScriptedShell::new(Script::Exit(0)), settings);
        h.gateway.add_namespace(NS);
        h.gateway.add_pod(NS, "tunneling-aaaa");
        h.gateway.add_pod(NS, "tunneling-bbbb");
        h.gateway.set_terminating_reads(u32::MAX);

        let outcome = h.manager.destroy().await.unwrap();

        assert_eq!(outcome, DeleteOutcome::Deleted);
        assert_eq!(count(&h.gateway, "read_pod"), 8);
        // No sleep after the last read of each pod
        assert_eq!(h.delay.sleeps.load(Ordering::SeqCst), 6);
        assert!(!h.gateway.has_namespace(NS));
    }

    #[tokio::test]
    async fn test_destroy_without_namespace() {
        let h = harness();
        let outcome = h.manager.destroy().await.unwrap();
        assert_eq!(outcome, DeleteOutcome::AlreadyAbsent);
    }

    #[tokio::test]
    async fn test_destroy_continues_past_sweep_errors() {
        let h = harness();
        h.gateway.add_namespace(NS);
        h.gateway.add_role(NS, "tunneling-aaaa");
        h.gateway.add_role_binding(NS, "tunneling-aaaa");
        h.gateway.fail("delete_role");
        h.gateway.fail("list_pods");

        h.manager.destroy().await.unwrap();
        assert!(h.gateway.calls().contains(&"delete_role_binding".to_string()));
        assert!(h.gateway.role_binding_names(NS).is_empty());
        // The failed delete is left behind, not hidden
        assert_eq!(h.gateway.role_names(NS), vec!["tunneling-aaaa"]);
        assert!(!h.gateway.has_namespace(NS));
    }

    #[tokio::test]
    async fn test_destroy_fails_on_namespace_error() {
        let h = harness();
        h.gateway.add_namespace(NS);
        h.gateway.fail("delete_namespace");

        let err = h.manager.destroy().await.unwrap_err();
        assert!(matches!(err, TunnelError::Kube(_)));
    }

    #[test]
    fn test_phase_defaults_to_unknown() {
        assert_eq!(phase(&Pod::default()), "Unknown");
    }
}
