// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Relay session: port-forward to the relay pod, ssh over it, clean up
//!
//! Cleanup of the session's pod and RBAC pair is tied to a guard that is
//! armed before anything is created. It is released explicitly on every
//! normal, failing or interrupted path, and from `Drop` if the future is
//! abandoned.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::forward::{ForwardSpec, PortForwarder};
use super::pty::{ShellClient, ShellExit, ShellTarget};
use super::readiness::Delay;
use crate::config::Settings;
use crate::error::{TunnelError, TunnelResult};
use crate::kubernetes::{ClusterGateway, DeleteOutcome};
use crate::session::SessionIdentity;

/// Host the port-forward listens on
const LOCAL_HOST: &str = "localhost";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    pub local_port: u16,
    pub relay_port: u16,
    pub settle_delay: Duration,
    pub identity_file: PathBuf,
    pub ssh_user: Option<String>,
}

impl From<&Settings> for RelaySettings {
    fn from(settings: &Settings) -> Self {
        Self {
            local_port: settings.local_port,
            relay_port: settings.relay_port,
            settle_delay: settings.settle_delay(),
            identity_file: settings.identity_path(),
            ssh_user: settings.ssh_user.clone(),
        }
    }
}

pub struct RelaySessionController {
    gateway: Arc<dyn ClusterGateway>,
    forwarder: Arc<dyn PortForwarder>,
    shell: Arc<dyn ShellClient>,
    delay: Arc<dyn Delay>,
    settings: RelaySettings,
}

impl RelaySessionController {
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        forwarder: Arc<dyn PortForwarder>,
        shell: Arc<dyn ShellClient>,
        delay: Arc<dyn Delay>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            gateway,
            forwarder,
            shell,
            delay,
            settings,
        }
    }

    /// Run `work` with session cleanup guaranteed afterwards
    ///
    /// If `shutdown` resolves first, the running shell is aborted, `work` is
    /// dropped and the result is [`TunnelError::Interrupted`]. Cleanup runs in
    /// every case before returning.
    pub async fn guarded<T, W, S>(
        &self,
        identity: &SessionIdentity,
        work: W,
        shutdown: S,
    ) -> TunnelResult<T>
    where
        W: Future<Output = TunnelResult<T>>,
        S: Future<Output = ()>,
    {
        let guard = CleanupGuard::arm(Arc::clone(&self.gateway), identity.clone());

        let result = tokio::select! {
            result = work => result,
            () = shutdown => {
                warn!("Interrupted, cleaning up");
                self.shell.abort();
                Err(TunnelError::Interrupted)
            }
        };

        guard.release().await;
        result
    }

    /// Forward a local port to the relay pod and attach ssh to it
    ///
    /// The port-forward is stopped when the shell returns; if this future is
    /// dropped instead, dropping the forward handle stops it.
    pub async fn attach(&self, identity: &SessionIdentity) -> TunnelResult<ShellExit> {
        info!("Creating port-forward rules, please wait...");
        let spec = ForwardSpec {
            pod: identity.service_name().to_string(),
            namespace: identity.namespace().to_string(),
            local_port: self.settings.local_port,
            remote_port: self.settings.relay_port,
        };
        let mut forward = self.forwarder.start(&spec).await?;

        let result = self.open_shell().await;

        if let Err(e) = forward.terminate().await {
            warn!(error = %e, "Failed to stop port-forward");
        }
        result
    }

    async fn open_shell(&self) -> TunnelResult<ShellExit> {
        self.delay.sleep(self.settings.settle_delay).await;
        info!("Initializing SSH connection...");

        let target = ShellTarget {
            host: LOCAL_HOST.to_string(),
            port: self.settings.local_port,
            identity_file: self.settings.identity_file.clone(),
            user: self.settings.ssh_user.clone(),
        };
        let exit = self.shell.attach(&target).await?;
        debug!(code = exit.code, "SSH session ended");
        Ok(exit)
    }
}

/// Deletes the session's pod and RBAC pair unless already released
pub struct CleanupGuard {
    gateway: Arc<dyn ClusterGateway>,
    identity: SessionIdentity,
    armed: bool,
}

impl CleanupGuard {
    pub fn arm(gateway: Arc<dyn ClusterGateway>, identity: SessionIdentity) -> Self {
        Self {
            gateway,
            identity,
            armed: true,
        }
    }

    pub async fn release(mut self) {
        self.armed = false;
        release_session(self.gateway.as_ref(), &self.identity).await;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(pod = %self.identity.service_name(), "Session dropped without cleanup");
        // Best effort; the runtime may be shutting down
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let gateway = Arc::clone(&self.gateway);
            let identity = self.identity.clone();
            handle.spawn(async move {
                release_session(gateway.as_ref(), &identity).await;
            });
        }
    }
}

/// Delete the relay pod, RoleBinding and Role of one session
///
/// The pod deletion is not waited on. Failures are logged and do not stop
/// the remaining deletions.
pub async fn release_session(gateway: &dyn ClusterGateway, identity: &SessionIdentity) {
    let ns = identity.namespace();
    let name = identity.service_name();

    info!(pod = %name, "Deleting pod");
    log_delete("pod", name, gateway.delete_pod(ns, name).await);
    log_delete("role binding", name, gateway.delete_role_binding(ns, name).await);
    log_delete("role", name, gateway.delete_role(ns, name).await);
}

pub(crate) fn log_delete(kind: &str, name: &str, result: Result<DeleteOutcome, kube::Error>) {
    match result {
        Ok(DeleteOutcome::Deleted) => debug!(kind, name, "deleted"),
        Ok(DeleteOutcome::AlreadyAbsent) => debug!(kind, name, "already absent"),
        Err(e) => warn!(kind, name, error = %e, "Failed to delete"),
    }
}
