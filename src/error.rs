// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use thiserror::Error;

use crate::kubernetes::NodeRef;

/// Result type alias for tunnel operations.
pub type TunnelResult<T> = Result<T, TunnelError>;

/// Errors surfaced by the tunnel lifecycle.
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("KUBECONFIG environment variable is not set")]
    MissingKubeconfig,

    #[error("namespace '{namespace}' does not exist, run with --init first")]
    NotInitialized { namespace: String },

    #[error("node '{selector}' not found, check the node name or id")]
    NodeNotFound {
        selector: String,
        available: Vec<NodeRef>,
    },

    #[error("relay pod '{pod}' not running after {attempts} checks")]
    RelayNotReady { pod: String, attempts: u32 },

    #[error("interrupted")]
    Interrupted,

    #[error("K8s API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to run {command}: {source}")]
    Process {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("terminal error: {0}")]
    Terminal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TunnelError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            TunnelError::Interrupted => 130,
            _ => 1,
        }
    }
}
