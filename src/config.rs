// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Configuration for k8s-node-ssh
//!
//! All k8s-node-ssh data is stored under ~/.k8s-node-ssh/:
//! - ~/.k8s-node-ssh/config.json - relay and session settings
//! - ~/.k8s-node-ssh/log/ - rotated log files
//!
//! Every field is optional in the file; missing fields take their defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the base directory (~/.k8s-node-ssh/)
pub fn base_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|p| p.join(".k8s-node-ssh"))
        .context("Could not determine home directory")
}

/// Relay, RBAC and session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Namespace holding every provisioned object
    pub namespace: String,
    /// Prefix of the per-session object name
    pub name_prefix: String,
    /// Image of the TCP relay container
    pub relay_image: String,
    /// Port the relay pod listens on
    pub relay_port: u16,
    /// Local end of the port-forward
    pub local_port: u16,
    /// Shell port on the target node
    pub target_port: u16,
    /// SSH private key handed to the ssh client
    pub identity_file: String,
    pub ssh_user: Option<String>,
    /// PodSecurityPolicy the session Role is allowed to use
    pub pod_security_policy: String,
    pub readiness_attempts: u32,
    pub readiness_interval_secs: u64,
    /// Wait between starting the port-forward and starting ssh
    pub settle_delay_secs: u64,
    /// Fail `connect` when the relay never reports Running
    pub strict_readiness: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            namespace: "tunneling".to_string(),
            name_prefix: "tunneling".to_string(),
            relay_image: "toughiq/socat".to_string(),
            relay_port: 8022,
            local_port: 8022,
            target_port: 22,
            identity_file: "~/.ssh/google_compute_engine".to_string(),
            ssh_user: None,
            pod_security_policy: "gce.privileged".to_string(),
            readiness_attempts: 15,
            readiness_interval_secs: 2,
            settle_delay_secs: 3,
            strict_readiness: false,
        }
    }
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub namespace: Option<String>,
    pub relay_image: Option<String>,
    pub local_port: Option<u16>,
    pub identity_file: Option<String>,
    pub ssh_user: Option<String>,
    pub strict_readiness: bool,
}

impl Settings {
    /// Load settings from ~/.k8s-node-ssh/config.json, or defaults if absent
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Settings::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the config file path (~/.k8s-node-ssh/config.json)
    pub fn config_path() -> Result<PathBuf> {
        Ok(base_dir()?.join("config.json"))
    }

    pub fn apply(mut self, overrides: Overrides) -> Self {
        if let Some(namespace) = overrides.namespace {
            self.namespace = namespace;
        }
        if let Some(image) = overrides.relay_image {
            self.relay_image = image;
        }
        if let Some(port) = overrides.local_port {
            self.local_port = port;
        }
        if let Some(identity) = overrides.identity_file {
            self.identity_file = identity;
        }
        if overrides.ssh_user.is_some() {
            self.ssh_user = overrides.ssh_user;
        }
        self.strict_readiness |= overrides.strict_readiness;
        self
    }

    pub fn readiness_interval(&self) -> Duration {
        Duration::from_secs(self.readiness_interval_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    /// Identity file with a leading `~/` expanded to the home directory
    pub fn identity_path(&self) -> PathBuf {
        expand_home(&self.identity_file)
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
