// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Background `kubectl port-forward` to the relay pod

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{TunnelError, TunnelResult};

/// How long to wait for kubectl to exit after being killed
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Where to forward
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSpec {
    pub pod: String,
    pub namespace: String,
    pub local_port: u16,
    pub remote_port: u16,
}

/// Running forward; dropping it without `terminate` still stops the process
#[async_trait]
pub trait ForwardHandle: Send {
    async fn terminate(&mut self) -> TunnelResult<()>;
}

#[async_trait]
pub trait PortForwarder: Send + Sync {
    async fn start(&self, spec: &ForwardSpec) -> TunnelResult<Box<dyn ForwardHandle>>;
}

/// Forwards through the `kubectl` binary on PATH
#[derive(Debug, Clone, Default)]
pub struct KubectlPortForward {
    context: Option<String>,
}

impl KubectlPortForward {
    pub fn new(context: Option<String>) -> Self {
        Self { context }
    }

    fn args(&self, spec: &ForwardSpec) -> Vec<String> {
        let mut args = vec![
            "port-forward".to_string(),
            spec.pod.clone(),
            format!("{}:{}", spec.local_port, spec.remote_port),
            "-n".to_string(),
            spec.namespace.clone(),
        ];
        if let Some(context) = &self.context {
            args.push("--context".to_string());
            args.push(context.clone());
        }
        args
    }
}

#[async_trait]
impl PortForwarder for KubectlPortForward {
    async fn start(&self, spec: &ForwardSpec) -> TunnelResult<Box<dyn ForwardHandle>> {
        let args = self.args(spec);
        debug!(args = ?args, "Spawning kubectl");

        let mut child = Command::new("kubectl")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TunnelError::Process {
                command: "kubectl port-forward".to_string(),
                source,
            })?;

        // kubectl reports bind and connection failures on stderr; keep them
        // out of the raw-mode terminal
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "k8s_node_ssh::kubectl", "{}", line);
                }
            });
        }

        Ok(Box::new(KubectlHandle { child }))
    }
}

struct KubectlHandle {
    child: Child,
}

#[async_trait]
impl ForwardHandle for KubectlHandle {
    async fn terminate(&mut self) -> TunnelResult<()> {
        if let Ok(Some(status)) = self.child.try_wait() {
            warn!(status = %status, "port-forward had already exited");
            return Ok(());
        }
        self.child.start_kill()?;
        match tokio::time::timeout(TERMINATE_TIMEOUT, self.child.wait()).await {
            Ok(status) => {
                debug!(status = ?status.ok(), "port-forward stopped");
            }
            Err(_) => warn!("port-forward did not exit in time"),
        }
        Ok(())
    }
}
