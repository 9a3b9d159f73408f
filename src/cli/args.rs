// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use clap::{Parser, ValueEnum};

use crate::config::Overrides;

#[derive(Parser, Debug)]
#[command(name = "k8s-node-ssh")]
#[command(
    author,
    version,
    about = "Open an SSH session to a Kubernetes worker node through a relay pod"
)]
pub struct Args {
    /// Create the tunneling namespace
    #[arg(long)]
    pub init: bool,

    /// Connect to a node by list number or name
    #[arg(long, value_name = "NODE")]
    pub connect: Option<String>,

    /// List worker nodes
    #[arg(long)]
    pub list: bool,

    /// Delete all tunneling objects and the namespace
    #[arg(long)]
    pub destroy: bool,

    /// Kubeconfig context to use (default: current-context)
    #[arg(short, long, value_name = "CONTEXT")]
    pub context: Option<String>,

    /// Namespace holding relay pods
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// SSH private key
    #[arg(short, long, value_name = "FILE")]
    pub identity: Option<String>,

    /// Local port for the port-forward
    #[arg(long)]
    pub local_port: Option<u16>,

    /// Relay container image
    #[arg(long)]
    pub image: Option<String>,

    /// Remote SSH user
    #[arg(short, long)]
    pub user: Option<String>,

    /// Fail instead of connecting when the relay pod never reaches Running
    #[arg(long)]
    pub strict_readiness: bool,

    /// Output format for --list
    #[arg(short, long, value_enum, default_value = "table")]
    pub output: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Whether any operation flag was given
    pub fn has_action(&self) -> bool {
        self.init || self.connect.is_some() || self.list || self.destroy
    }

    pub fn overrides(&self) -> Overrides {
        Overrides {
            namespace: self.namespace.clone(),
            relay_image: self.image.clone(),
            local_port: self.local_port,
            identity_file: self.identity.clone(),
            ssh_user: self.user.clone(),
            strict_readiness: self.strict_readiness,
        }
    }
}

#[derive(ValueEnum, Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}
